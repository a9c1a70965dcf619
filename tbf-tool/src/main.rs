// Licensed under the Apache-2.0 license

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use std::path::PathBuf;
use tbf_image::TbfHeaderBuilder;

mod tab;

#[derive(Parser)]
#[command(version, about = "Inspects and edits Tock application images", long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the app described by one or more TBF variants
    Info {
        /// TBF files, one per architecture (e.g. cortex-m4.tbf)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Board description used to select the variant
        #[arg(long)]
        board: Option<PathBuf>,

        /// App name. Default: the package name of the first variant
        #[arg(long)]
        name: Option<String>,

        /// Include the flash address and the full header dump
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// Print the crt0 relocation header at the start of the app binary
    Crt0 {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        board: Option<PathBuf>,
    },
    /// Wrap a raw app binary in a TBF header
    Pack {
        /// Raw binary produced by objcopy
        binary: PathBuf,

        #[arg(long)]
        name: String,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_parser=maybe_hex::<u32>, default_value_t = 0)]
        minimum_ram: u32,

        /// Offset of _start from the beginning of the app binary
        #[arg(long, value_parser=maybe_hex::<u32>, default_value_t = 0x20)]
        init_fn_offset: u32,

        #[arg(long, value_parser=maybe_hex::<u32>, default_value_t = 0)]
        app_version: u32,

        /// Kernel version the app requires, as <major>.<minor>
        #[arg(long, value_parser = parse_kernel_version)]
        kernel_version: Option<(u16, u16)>,

        /// Allowed syscall as <driver>,<command>; may be repeated
        #[arg(long = "permission", value_parser = parse_permission)]
        permissions: Vec<(u32, u32)>,

        #[arg(long, value_parser=maybe_hex::<u32>)]
        fixed_flash: Option<u32>,

        #[arg(long, value_parser=maybe_hex::<u32>)]
        fixed_ram: Option<u32>,

        #[arg(long, default_value_t = false)]
        sticky: bool,

        #[arg(long, default_value_t = false)]
        disabled: bool,
    },
    /// Apply changes to an app and write its flash image
    Update {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// Board description used to select the variant and round its size
        #[arg(long)]
        board: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        sticky: bool,

        /// Declared total size in flash
        #[arg(long, value_parser=maybe_hex::<u32>)]
        size: Option<u32>,

        /// Flash address the app is placed at
        #[arg(long, value_parser=maybe_hex::<u32>)]
        address: Option<u32>,

        /// Replacement app binary
        #[arg(long)]
        binary: Option<PathBuf>,
    },
}

fn parse_permission(s: &str) -> Result<(u32, u32), String> {
    let (driver, command) = s
        .split_once(',')
        .ok_or_else(|| format!("expected <driver>,<command>, got {s:?}"))?;
    Ok((maybe_hex(driver.trim())?, maybe_hex(command.trim())?))
}

fn parse_kernel_version(s: &str) -> Result<(u16, u16), String> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| format!("expected <major>.<minor>, got {s:?}"))?;
    let major = major.parse().map_err(|e| format!("major version: {e}"))?;
    let minor = minor.parse().map_err(|e| format!("minor version: {e}"))?;
    Ok((major, minor))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();

    match cli.command {
        Commands::Info {
            files,
            board,
            name,
            verbose,
        } => {
            let board = tab::load_board(board.as_deref())?;
            let app = tab::load_app(&files, name.as_deref(), board.as_ref())?;
            print!("{}", app.info(verbose)?);
        }
        Commands::Crt0 { files, board } => {
            let board = tab::load_board(board.as_deref())?;
            let app = tab::load_app(&files, None, board.as_ref())?;
            print!("{}", app.crt0_header_str()?);
        }
        Commands::Pack {
            binary,
            name,
            output,
            minimum_ram,
            init_fn_offset,
            app_version,
            kernel_version,
            permissions,
            fixed_flash,
            fixed_ram,
            sticky,
            disabled,
        } => {
            let mut b = std::fs::read(&binary)
                .map_err(|e| anyhow!("Cannot read file '{}': {}", binary.display(), e))?;
            // align to 4-byte boundary
            while b.len() % 4 != 0 {
                b.push(0);
            }
            let mut builder = TbfHeaderBuilder::new()
                .package_name(&name)
                .minimum_ram_size(minimum_ram)
                .init_fn_offset(init_fn_offset)
                .app_version(app_version)
                .permissions(&permissions)
                .enabled(!disabled)
                .sticky(sticky);
            if let Some((major, minor)) = kernel_version {
                builder = builder.kernel_version(major, minor);
            }
            if fixed_flash.is_some() || fixed_ram.is_some() {
                builder = builder.fixed_addresses(fixed_ram, fixed_flash);
            }
            tab::write_image(&output, &builder.build_image(&b)?)?;
        }
        Commands::Update {
            files,
            output,
            board,
            sticky,
            size,
            address,
            binary,
        } => {
            let board = tab::load_board(board.as_deref())?;
            let options = tab::UpdateOptions {
                sticky,
                size,
                address,
                binary,
            };
            tab::update_app(&files, board.as_ref(), &options, &output)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_permission() {
        assert_eq!(parse_permission("1,2"), Ok((1, 2)));
        assert_eq!(parse_permission("0x8, 0x3"), Ok((8, 3)));
        assert!(parse_permission("1").is_err());
        assert!(parse_permission("a,b").is_err());
    }

    #[test]
    fn test_parse_kernel_version() {
        assert_eq!(parse_kernel_version("2.1"), Ok((2, 1)));
        assert!(parse_kernel_version("2").is_err());
        assert!(parse_kernel_version("x.1").is_err());
    }

    #[test]
    fn test_parse_update() {
        let cli = Cli::try_parse_from([
            "tbf-tool",
            "update",
            "cortex-m4.tbf",
            "--output",
            "out.bin",
            "--sticky",
            "--size",
            "0x800",
        ])
        .unwrap();
        match cli.command {
            Commands::Update {
                files,
                sticky,
                size,
                address,
                ..
            } => {
                assert_eq!(files, vec![PathBuf::from("cortex-m4.tbf")]);
                assert!(sticky);
                assert_eq!(size, Some(0x800));
                assert_eq!(address, None);
            }
            _ => panic!("expected update"),
        }
    }
}
