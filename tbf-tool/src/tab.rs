// Licensed under the Apache-2.0 license

use anyhow::{anyhow, bail, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tbf_image::{BoardConfig, TabApp, TabVariant, VariantIndex};

/// Reads one `.tbf` file as a variant named after its file stem.
pub fn load_variant(path: &Path) -> Result<TabVariant> {
    let image = fs::read(path)
        .map_err(|e| anyhow!("Cannot read file '{}': {}", path.display(), e))?;
    let variant = TabVariant::from_tbf_bytes(&image)
        .map_err(|e| anyhow!("Invalid TBF '{}': {}", path.display(), e))?;
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(arch) => Ok(variant.with_architecture(arch)),
        None => Ok(variant),
    }
}

/// Builds an app from `.tbf` files and resolves the variant to use: the one
/// matching `board`, or the first one.
pub fn load_app(
    files: &[PathBuf],
    name: Option<&str>,
    board: Option<&BoardConfig>,
) -> Result<TabApp> {
    if files.is_empty() {
        bail!("No TBF files given");
    }
    let variants = files
        .iter()
        .map(|path| load_variant(path))
        .collect::<Result<Vec<_>>>()?;
    let name = match name {
        Some(name) => name.to_owned(),
        None => variants[0]
            .header()
            .package_name()
            .unwrap_or("unknown")
            .to_owned(),
    };

    let mut app = TabApp::new(&name, variants);
    match board {
        Some(board) => {
            app.select(board).map_err(|_| {
                anyhow!(
                    "No variant of {} fits board {} ({} at {:#x})",
                    name,
                    board.name,
                    board.arch,
                    board.app_address
                )
            })?;
            app.set_address(board.app_address);
        }
        None => {
            app.select(&VariantIndex(0))?;
        }
    }
    Ok(app)
}

pub fn load_board(path: Option<&Path>) -> Result<Option<BoardConfig>> {
    path.map(|path| {
        BoardConfig::from_file(path)
            .map_err(|e| anyhow!("Board config '{}': {}", path.display(), e))
    })
    .transpose()
}

/// Edits the `update` command applies to the selected variant.
#[derive(Debug, Default)]
pub struct UpdateOptions {
    pub sticky: bool,
    pub size: Option<u32>,
    pub address: Option<u32>,
    pub binary: Option<PathBuf>,
}

/// Loads the app, applies `options` and writes its flash image to `output`.
/// An explicit size takes precedence over the board size constraint.
pub fn update_app(
    files: &[PathBuf],
    board: Option<&BoardConfig>,
    options: &UpdateOptions,
    output: &Path,
) -> Result<TabApp> {
    let mut app = load_app(files, None, board)?;
    if let Some(binary) = &options.binary {
        let b = fs::read(binary)
            .map_err(|e| anyhow!("Cannot read file '{}': {}", binary.display(), e))?;
        app.set_app_binary(b)?;
    }
    if options.sticky {
        app.set_sticky();
    }
    if let Some(address) = options.address {
        app.set_address(address);
    }
    match (options.size, board) {
        (Some(size), _) => app.set_size(size)?,
        (None, Some(board)) => {
            let size = app.fit_to_board(board)?;
            log::info!("Sized {} to {} bytes for {}", app.name(), size, board.name);
        }
        (None, None) => {}
    }
    write_image(output, &app.binary()?)?;
    Ok(app)
}

pub fn write_image(path: &Path, image: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| anyhow!("Unable to open file {}: {}", path.display(), e))?;
    file.write_all(image)?;
    log::info!("Wrote {} bytes to {}", image.len(), path.display());
    Ok(())
}
