// Licensed under the Apache-2.0 license

use crate::board::{BoardConfig, VariantSelector};
use crate::crt0::Crt0Header;
use crate::error::{TbfError, TbfResult};
use crate::header::{TbfFlag, TbfHeader};

/// One compiled build of an app: its header and, once known, its binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabVariant {
    header: TbfHeader,
    binary: Option<Vec<u8>>,
    architecture: Option<String>,
}

impl TabVariant {
    pub fn new(header: TbfHeader, binary: Option<Vec<u8>>) -> Self {
        Self {
            header,
            binary,
            architecture: None,
        }
    }

    /// Splits a flash image into its header and the binary that follows it,
    /// up to the declared total size.
    pub fn from_tbf_bytes(image: &[u8]) -> TbfResult<Self> {
        let header = TbfHeader::parse(image)?;
        let start = header.header_size() as usize;
        let end = (header.app_size() as usize).clamp(start, image.len());
        let binary = image[start..end].to_vec();
        Ok(Self::new(header, Some(binary)))
    }

    pub fn with_architecture(mut self, architecture: &str) -> Self {
        self.architecture = Some(architecture.to_owned());
        self
    }

    pub fn header(&self) -> &TbfHeader {
        &self.header
    }

    pub fn binary(&self) -> Option<&[u8]> {
        self.binary.as_deref()
    }

    pub fn architecture(&self) -> Option<&str> {
        self.architecture.as_deref()
    }

    fn binary_len(&self) -> u32 {
        self.binary.as_ref().map_or(0, |b| b.len() as u32)
    }
}

/// A Tock application with all of its compiled variants.
#[derive(Debug, Clone)]
pub struct TabApp {
    name: String,
    variants: Vec<TabVariant>,
    active: Option<usize>,
    address: Option<u32>,
    modified: bool,
}

impl TabApp {
    pub fn new(name: &str, variants: Vec<TabVariant>) -> Self {
        Self {
            name: name.to_owned(),
            variants,
            active: None,
            address: None,
            modified: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[TabVariant] {
        &self.variants
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn address(&self) -> Option<u32> {
        self.address
    }

    pub fn select_variant(&mut self, index: usize) -> TbfResult<()> {
        if index >= self.variants.len() {
            return Err(TbfError::VariantOutOfRange {
                index,
                count: self.variants.len(),
            });
        }
        self.active = Some(index);
        Ok(())
    }

    pub fn select(&mut self, selector: &impl VariantSelector) -> TbfResult<usize> {
        let index = selector
            .select(&self.variants)
            .ok_or(TbfError::NoVariantSelected)?;
        self.select_variant(index)?;
        log::debug!(
            "App {} resolved to variant {} ({})",
            self.name,
            index,
            self.variants[index].architecture().unwrap_or("any")
        );
        Ok(index)
    }

    pub fn active_variant(&self) -> TbfResult<&TabVariant> {
        self.active
            .and_then(|index| self.variants.get(index))
            .ok_or(TbfError::NoVariantSelected)
    }

    fn active_variant_mut(&mut self) -> TbfResult<&mut TabVariant> {
        self.active
            .and_then(|index| self.variants.get_mut(index))
            .ok_or(TbfError::NoVariantSelected)
    }

    /// Marks every variant sticky.
    pub fn set_sticky(&mut self) {
        for variant in self.variants.iter_mut() {
            variant.header.set_flag(TbfFlag::Sticky, true);
        }
        self.modified = true;
    }

    /// Declared total size of the active variant.
    pub fn size(&self) -> TbfResult<u32> {
        Ok(self.active_variant()?.header.app_size())
    }

    /// Overrides the declared size of the active variant. The binary is
    /// neither padded nor truncated.
    pub fn set_size(&mut self, size: u32) -> TbfResult<()> {
        let variant = self.active_variant_mut()?;
        let minimum = variant.header.header_size() + variant.binary_len();
        if size < minimum {
            return Err(TbfError::Size {
                requested: size,
                minimum,
            });
        }
        variant.header.set_app_size(size);
        self.modified = true;
        Ok(())
    }

    /// Sets the smallest size the board accepts for the active variant.
    pub fn fit_to_board(&mut self, board: &BoardConfig) -> TbfResult<u32> {
        let variant = self.active_variant()?;
        let minimum = variant.header.header_size() + variant.binary_len();
        let size = board
            .app_size_for(minimum)
            .ok_or(TbfError::SizeConstraint { minimum })?;
        self.set_size(size)?;
        Ok(size)
    }

    pub fn header(&self) -> TbfResult<&TbfHeader> {
        Ok(&self.active_variant()?.header)
    }

    pub fn header_size(&self) -> TbfResult<u32> {
        Ok(self.header()?.header_size())
    }

    pub fn header_bytes(&self) -> TbfResult<Vec<u8>> {
        Ok(self.header()?.to_bytes()?)
    }

    /// Replaces the binary of the active variant. The declared size is left
    /// alone.
    pub fn set_app_binary(&mut self, binary: Vec<u8>) -> TbfResult<()> {
        self.active_variant_mut()?.binary = Some(binary);
        self.modified = true;
        Ok(())
    }

    pub fn has_app_binary(&self) -> bool {
        self.active_variant()
            .map(|variant| variant.binary.is_some())
            .unwrap_or(false)
    }

    pub fn app_binary(&self) -> TbfResult<&[u8]> {
        self.active_variant()?
            .binary()
            .ok_or(TbfError::MissingAppBinary)
    }

    pub fn set_address(&mut self, address: u32) {
        self.address = Some(address);
        self.modified = true;
    }

    /// Header followed by the app binary, cut to the declared size. Shorter
    /// images are returned unpadded.
    pub fn binary(&self) -> TbfResult<Vec<u8>> {
        let size = self.size()? as usize;
        let mut image = self.header_bytes()?;
        image.extend_from_slice(self.app_binary()?);
        if image.len() > size {
            log::warn!(
                "App {} image is {} bytes, dropping {} bytes past its declared size {}",
                self.name,
                image.len(),
                image.len() - size,
                size
            );
            image.truncate(size);
        }
        Ok(image)
    }

    pub fn crt0_header(&self) -> TbfResult<Crt0Header> {
        Ok(Crt0Header::parse(self.app_binary()?)?)
    }

    pub fn crt0_header_str(&self) -> TbfResult<String> {
        Ok(self.crt0_header()?.to_string())
    }

    pub fn info(&self, verbose: bool) -> TbfResult<String> {
        let header = self.header()?;
        let mut out = String::new();
        out.push_str(&format!("Name:                  {}\n", self.name));
        out.push_str(&format!("Enabled:               {}\n", header.is_enabled()));
        out.push_str(&format!("Sticky:                {}\n", header.is_sticky()));
        out.push_str(&format!(
            "Total Size in Flash:   {} bytes\n",
            header.app_size()
        ));
        if verbose {
            match self.address {
                Some(address) => {
                    out.push_str(&format!("Address in Flash:      {:#x}\n", address))
                }
                None => out.push_str("Address in Flash:      unknown\n"),
            }
            for line in header.to_string().lines() {
                out.push_str(&format!("  {line}\n"));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::TbfHeaderBuilder;

    fn app_with_binary(len: usize) -> TabApp {
        let header = TbfHeaderBuilder::new()
            .package_name("blink")
            .build(len as u32)
            .unwrap();
        let binary = (0..len).map(|i| i as u8).collect();
        let mut app = TabApp::new("blink", vec![TabVariant::new(header, Some(binary))]);
        app.select_variant(0).unwrap();
        app
    }

    #[test]
    fn test_no_variant_selected() {
        let header = TbfHeaderBuilder::new().build(0).unwrap();
        let app = TabApp::new("blink", vec![TabVariant::new(header, None)]);
        assert_eq!(app.size(), Err(TbfError::NoVariantSelected));
        assert_eq!(app.binary(), Err(TbfError::NoVariantSelected));
        assert_eq!(app.info(false), Err(TbfError::NoVariantSelected));
        assert!(!app.has_app_binary());
    }

    #[test]
    fn test_select_out_of_range() {
        let mut app = app_with_binary(8);
        assert_eq!(
            app.select_variant(3),
            Err(TbfError::VariantOutOfRange { index: 3, count: 1 })
        );
    }

    #[test]
    fn test_binary_matches_declared_size() {
        let app = app_with_binary(100);
        let image = app.binary().unwrap();
        assert_eq!(image.len() as u32, app.size().unwrap());
        let variant = TabVariant::from_tbf_bytes(&image).unwrap();
        assert_eq!(variant.binary(), app.app_binary().ok());
    }

    #[test]
    fn test_binary_truncated() {
        let mut app = app_with_binary(100);
        let header_size = app.header_size().unwrap();
        // Grow the binary without touching the declared size.
        app.set_app_binary(vec![0xAA; 200]).unwrap();
        let image = app.binary().unwrap();
        assert_eq!(image.len() as u32, header_size + 100);
        assert!(image[header_size as usize..].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn test_set_size() {
        let mut app = app_with_binary(100);
        let minimum = app.header_size().unwrap() + 100;
        assert_eq!(
            app.set_size(minimum - 1),
            Err(TbfError::Size {
                requested: minimum - 1,
                minimum
            })
        );
        assert!(!app.is_modified());
        app.set_size(minimum).unwrap();
        app.set_size(4096).unwrap();
        assert!(app.is_modified());
        assert_eq!(app.size().unwrap(), 4096);
        assert_eq!(app.binary().unwrap().len() as u32, minimum);
        assert_eq!(app.app_binary().unwrap().len(), 100);
    }

    #[test]
    fn test_missing_binary() {
        let header = TbfHeaderBuilder::new().build(32).unwrap();
        let mut app = TabApp::new("blink", vec![TabVariant::new(header, None)]);
        app.select_variant(0).unwrap();
        assert!(!app.has_app_binary());
        assert_eq!(app.binary(), Err(TbfError::MissingAppBinary));
        assert_eq!(app.crt0_header_str(), Err(TbfError::MissingAppBinary));
        app.set_app_binary(vec![0; 32]).unwrap();
        assert!(app.has_app_binary());
        assert!(app.is_modified());
    }

    #[test]
    fn test_crt0_too_short() {
        let app = app_with_binary(16);
        assert!(matches!(
            app.crt0_header_str(),
            Err(TbfError::Format(crate::error::FormatError::Crt0Truncated { len: 16, .. }))
        ));
    }

    #[test]
    fn test_set_address() {
        let mut app = app_with_binary(8);
        assert_eq!(app.address(), None);
        app.set_address(0x40000);
        assert_eq!(app.address(), Some(0x40000));
        assert!(app.is_modified());
        assert!(app.info(true).unwrap().contains("Address in Flash:      0x40000"));
    }

    #[test]
    fn test_info() {
        let app = app_with_binary(8);
        let info = app.info(false).unwrap();
        assert_eq!(
            info,
            format!(
                "Name:                  blink\n\
                 Enabled:               true\n\
                 Sticky:                false\n\
                 Total Size in Flash:   {} bytes\n",
                app.size().unwrap()
            )
        );
        let verbose = app.info(true).unwrap();
        assert!(verbose.starts_with(&info));
        assert!(verbose.contains("Address in Flash:      unknown"));
        assert!(verbose.contains("\n  TLV: Package Name (3)\n"));
    }

    #[test]
    fn test_fit_to_board() {
        let board = BoardConfig::from_toml_str(
            r#"
name = "nrf52840dk"
arch = "cortex-m4"
app_address = 0x40000
size_constraint = "powers_of_two"
"#,
        )
        .unwrap();
        let mut app = app_with_binary(100);
        let minimum = app.header_size().unwrap() + 100;
        let size = app.fit_to_board(&board).unwrap();
        assert_eq!(size, minimum.next_power_of_two());
        assert_eq!(app.size().unwrap(), size);
    }
}
