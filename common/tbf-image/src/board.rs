// Licensed under the Apache-2.0 license

use crate::app::TabVariant;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Picks the variant of an app that should be placed on a target.
pub trait VariantSelector {
    fn select(&self, variants: &[TabVariant]) -> Option<usize>;
}

/// Rule the platform applies to the total size of an app in flash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeConstraint {
    #[default]
    None,
    /// MPU regions on Cortex-M need power of two sized apps.
    PowersOfTwo,
    Multiple(u32),
}

/// Description of the board apps are loaded onto.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BoardConfig {
    pub name: String,
    pub arch: String,
    /// Flash address of the first app.
    pub app_address: u32,
    #[serde(default)]
    pub size_constraint: SizeConstraint,
}

impl BoardConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BoardConfig = toml::de::from_str(contents)?;
        config.verify()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn verify(&self) -> Result<(), ConfigError> {
        if self.arch.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "board {} has an empty arch",
                self.name
            )));
        }
        if self.size_constraint == SizeConstraint::Multiple(0) {
            return Err(ConfigError::Invalid(format!(
                "board {} has a zero size multiple",
                self.name
            )));
        }
        Ok(())
    }

    /// Smallest total app size of at least `minimum` bytes the board accepts.
    pub fn app_size_for(&self, minimum: u32) -> Option<u32> {
        match self.size_constraint {
            SizeConstraint::None => Some(minimum),
            SizeConstraint::PowersOfTwo => minimum.checked_next_power_of_two(),
            SizeConstraint::Multiple(n) => minimum.checked_next_multiple_of(n),
        }
    }
}

impl VariantSelector for BoardConfig {
    fn select(&self, variants: &[TabVariant]) -> Option<usize> {
        variants.iter().position(|variant| {
            variant
                .architecture()
                .map_or(true, |arch| arch == self.arch)
                && variant.header().is_loadable_at(self.app_address)
        })
    }
}

/// Selects a variant by position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantIndex(pub usize);

impl VariantSelector for VariantIndex {
    fn select(&self, variants: &[TabVariant]) -> Option<usize> {
        (self.0 < variants.len()).then_some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::TbfHeaderBuilder;

    const BOARD: &str = r#"
name = "nrf52840dk"
arch = "cortex-m4"
app_address = 0x40000
size_constraint = "powers_of_two"
"#;

    fn variant(arch: &str, fixed_flash: Option<u32>) -> TabVariant {
        let mut builder = TbfHeaderBuilder::new().package_name("blink");
        if fixed_flash.is_some() {
            builder = builder.fixed_addresses(None, fixed_flash);
        }
        TabVariant::new(builder.build(64).unwrap(), Some(vec![0; 64])).with_architecture(arch)
    }

    #[test]
    fn test_parse_board() {
        let board = BoardConfig::from_toml_str(BOARD).unwrap();
        assert_eq!(board.name, "nrf52840dk");
        assert_eq!(board.app_address, 0x40000);
        assert_eq!(board.size_constraint, SizeConstraint::PowersOfTwo);
    }

    #[test]
    fn test_parse_board_defaults_and_multiple() {
        let board = BoardConfig::from_toml_str(
            "name = \"opentitan\"\narch = \"rv32imc\"\napp_address = 0x20030000\n",
        )
        .unwrap();
        assert_eq!(board.size_constraint, SizeConstraint::None);

        let board = BoardConfig::from_toml_str(
            r#"
name = "hifive1"
arch = "rv32imac"
app_address = 0x20040000
size_constraint = { multiple = 512 }
"#,
        )
        .unwrap();
        assert_eq!(board.size_constraint, SizeConstraint::Multiple(512));
        assert_eq!(board.app_size_for(513), Some(1024));
        assert_eq!(board.app_size_for(512), Some(512));
    }

    #[test]
    fn test_invalid_board() {
        assert!(matches!(
            BoardConfig::from_toml_str("name = \"x\"\narch = \"\"\napp_address = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BoardConfig::from_toml_str("name = \"x\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), BOARD).unwrap();
        let board = BoardConfig::from_file(file.path()).unwrap();
        assert_eq!(board.arch, "cortex-m4");
        assert!(matches!(
            BoardConfig::from_file(Path::new("/nonexistent/board.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_powers_of_two() {
        let board = BoardConfig::from_toml_str(BOARD).unwrap();
        assert_eq!(board.app_size_for(164), Some(256));
        assert_eq!(board.app_size_for(1024), Some(1024));
        assert_eq!(board.app_size_for(0x8000_0001), None);
    }

    #[test]
    fn test_select_by_arch() {
        let board = BoardConfig::from_toml_str(BOARD).unwrap();
        let variants = vec![variant("rv32imc", None), variant("cortex-m4", None)];
        assert_eq!(board.select(&variants), Some(1));
        assert_eq!(board.select(&variants[..1]), None);
    }

    #[test]
    fn test_select_by_fixed_address() {
        let board = BoardConfig::from_toml_str(BOARD).unwrap();
        let header_size = variant("cortex-m4", Some(0)).header().header_size();
        let variants = vec![
            variant("cortex-m4", Some(0x30000 + header_size)),
            variant("cortex-m4", Some(0x40000 + header_size)),
        ];
        assert_eq!(board.select(&variants), Some(1));
    }

    #[test]
    fn test_variant_index() {
        let variants = vec![variant("cortex-m4", None)];
        assert_eq!(VariantIndex(0).select(&variants), Some(0));
        assert_eq!(VariantIndex(1).select(&variants), None);
    }
}
