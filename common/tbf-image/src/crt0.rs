// Licensed under the Apache-2.0 license

use crate::error::FormatError;
use core::fmt;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const CRT0_HEADER_SIZE: usize = core::mem::size_of::<Crt0Header>();

/// Relocation table placed by the C runtime at the start of a position
/// independent app binary.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct Crt0Header {
    pub got_sym_start: U32,
    pub got_start: U32,
    pub got_size: U32,
    pub data_sym_start: U32,
    pub data_start: U32,
    pub data_size: U32,
    pub bss_start: U32,
    pub bss_size: U32,
    pub reldata_start: U32,
    pub stack_size: U32,
}

impl Crt0Header {
    /// Decodes the table from the first bytes of `app_binary`. Field values
    /// are not checked.
    pub fn parse(app_binary: &[u8]) -> Result<Self, FormatError> {
        let (header, _) =
            Self::read_from_prefix(app_binary).map_err(|_| FormatError::Crt0Truncated {
                len: app_binary.len(),
                needed: CRT0_HEADER_SIZE,
            })?;
        Ok(header)
    }

    pub fn fields(&self) -> [(&'static str, u32); 10] {
        [
            ("got_sym_start", self.got_sym_start.get()),
            ("got_start", self.got_start.get()),
            ("got_size", self.got_size.get()),
            ("data_sym_start", self.data_sym_start.get()),
            ("data_start", self.data_start.get()),
            ("data_size", self.data_size.get()),
            ("bss_start", self.bss_start.get()),
            ("bss_size", self.bss_size.get()),
            ("reldata_start", self.reldata_start.get()),
            ("stack_size", self.stack_size.get()),
        ]
    }
}

impl fmt::Display for Crt0Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.fields() {
            writeln!(f, "{:<20}: {:>10} {:>#12x}", name, value, value)?;
        }
        Ok(())
    }
}
