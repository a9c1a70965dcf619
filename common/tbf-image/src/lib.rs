// Licensed under the Apache-2.0 license

//! In-memory model of Tock application images: the TBF header codec, the
//! CRT0 relocation prologue, and [`TabApp`], which combines the compiled
//! variants of one application and serializes the selected one for flash.

pub mod app;
pub mod board;
pub mod crt0;
pub mod error;
pub mod header;
pub mod tlv;

pub use app::{TabApp, TabVariant};
pub use board::{BoardConfig, SizeConstraint, VariantIndex, VariantSelector};
pub use crt0::{Crt0Header, CRT0_HEADER_SIZE};
pub use error::{ConfigError, FormatError, TbfError, TbfResult};
pub use header::{
    calculate_checksum, TbfFlag, TbfHeader, TbfHeaderBuilder, TbfVersion, TBF_HEADER_BASE_SIZE,
};
pub use tlv::{Tlv, TlvType};
