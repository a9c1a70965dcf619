// Licensed under the Apache-2.0 license

use crate::error::FormatError;
use core::fmt;
use core::mem::size_of;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of the tag and length fields preceding every TLV value.
pub const TLV_HEADER_SIZE: usize = 4;

/// Flash or RAM address value meaning "not fixed".
pub const ADDRESS_UNSET: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum TlvType {
    Main = 1,
    WriteableFlashRegions = 2,
    PackageName = 3,
    PicOption1 = 4,
    FixedAddresses = 5,
    Permissions = 6,
    StoragePermissions = 7,
    KernelVersion = 8,
    Program = 9,
    ShortId = 10,
}

impl TlvType {
    pub fn from_tag(tag: u16) -> Option<Self> {
        Self::from_u16(tag)
    }
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TbfMain {
    pub init_fn_offset: U32,
    pub protected_trailer_size: U32,
    pub minimum_ram_size: U32,
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TbfProgram {
    pub init_fn_offset: U32,
    pub protected_trailer_size: U32,
    pub minimum_ram_size: U32,
    pub binary_end_offset: U32,
    pub app_version: U32,
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TbfFlashRegion {
    pub offset: U32,
    pub size: U32,
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TbfFixedAddresses {
    pub start_process_ram: U32,
    pub start_process_flash: U32,
}

/// Commands `offset * 64 ..= offset * 64 + 63` of `driver_number` allowed by
/// the bits of `allowed_commands`.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TbfDriverPermission {
    pub driver_number: U32,
    pub offset: U32,
    pub allowed_commands: U64,
}

impl TbfDriverPermission {
    pub fn allows(&self, driver: u32, command: u32) -> bool {
        self.driver_number.get() == driver
            && self.offset.get() == command / 64
            && self.allowed_commands.get() & (1 << (command % 64)) != 0
    }
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TbfKernelVersion {
    pub major: U16,
    pub minor: U16,
}

/// One header extension record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tlv {
    Main(TbfMain),
    WriteableFlashRegions(Vec<TbfFlashRegion>),
    PackageName(String),
    FixedAddresses(TbfFixedAddresses),
    Permissions(Vec<TbfDriverPermission>),
    KernelVersion(TbfKernelVersion),
    Program(TbfProgram),
    ShortId(u32),
    /// Unknown tag, or a known tag whose length does not match its layout.
    Opaque { tag: u16, value: Vec<u8> },
}

fn read_records<T: FromBytes>(bytes: &[u8]) -> Option<Vec<T>> {
    if bytes.len() % size_of::<T>() != 0 {
        return None;
    }
    bytes
        .chunks_exact(size_of::<T>())
        .map(|chunk| T::read_from_bytes(chunk).ok())
        .collect()
}

impl Tlv {
    /// Decodes a record value. Layout mismatches are kept as [`Tlv::Opaque`]
    /// so they survive re-serialization.
    pub fn decode(tag: u16, value: &[u8]) -> Result<Self, FormatError> {
        let opaque = || Tlv::Opaque {
            tag,
            value: value.to_vec(),
        };
        let tlv = match TlvType::from_tag(tag) {
            Some(TlvType::Main) => TbfMain::read_from_bytes(value).map(Tlv::Main).ok(),
            Some(TlvType::Program) => TbfProgram::read_from_bytes(value).map(Tlv::Program).ok(),
            Some(TlvType::FixedAddresses) => TbfFixedAddresses::read_from_bytes(value)
                .map(Tlv::FixedAddresses)
                .ok(),
            Some(TlvType::KernelVersion) => TbfKernelVersion::read_from_bytes(value)
                .map(Tlv::KernelVersion)
                .ok(),
            Some(TlvType::ShortId) => U32::read_from_bytes(value)
                .map(|id| Tlv::ShortId(id.get()))
                .ok(),
            Some(TlvType::WriteableFlashRegions) => {
                read_records(value).map(Tlv::WriteableFlashRegions)
            }
            Some(TlvType::PackageName) => {
                let name = core::str::from_utf8(value)
                    .map_err(|_| FormatError::InvalidPackageName)?;
                Some(Tlv::PackageName(name.to_owned()))
            }
            Some(TlvType::Permissions) => decode_permissions(value),
            _ => None,
        };
        Ok(tlv.unwrap_or_else(opaque))
    }

    pub fn tag(&self) -> u16 {
        match self {
            Tlv::Main(_) => TlvType::Main as u16,
            Tlv::WriteableFlashRegions(_) => TlvType::WriteableFlashRegions as u16,
            Tlv::PackageName(_) => TlvType::PackageName as u16,
            Tlv::FixedAddresses(_) => TlvType::FixedAddresses as u16,
            Tlv::Permissions(_) => TlvType::Permissions as u16,
            Tlv::KernelVersion(_) => TlvType::KernelVersion as u16,
            Tlv::Program(_) => TlvType::Program as u16,
            Tlv::ShortId(_) => TlvType::ShortId as u16,
            Tlv::Opaque { tag, .. } => *tag,
        }
    }

    pub fn value(&self) -> Vec<u8> {
        match self {
            Tlv::Main(main) => main.as_bytes().to_vec(),
            Tlv::WriteableFlashRegions(regions) => regions.as_bytes().to_vec(),
            Tlv::PackageName(name) => name.as_bytes().to_vec(),
            Tlv::FixedAddresses(addresses) => addresses.as_bytes().to_vec(),
            Tlv::Permissions(perms) => {
                // An oversized list fails the length check in `write_to`.
                let count = u16::try_from(perms.len()).unwrap_or(u16::MAX);
                let mut value = count.to_le_bytes().to_vec();
                value.extend_from_slice(perms.as_bytes());
                value
            }
            Tlv::KernelVersion(version) => version.as_bytes().to_vec(),
            Tlv::Program(program) => program.as_bytes().to_vec(),
            Tlv::ShortId(id) => id.to_le_bytes().to_vec(),
            Tlv::Opaque { value, .. } => value.clone(),
        }
    }

    /// Bytes this record occupies in the header, padding included.
    pub fn encoded_len(&self) -> usize {
        TLV_HEADER_SIZE + self.value().len().next_multiple_of(4)
    }

    /// Appends the record and its zero padding to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        let value = self.value();
        let length = u16::try_from(value.len()).map_err(|_| FormatError::TlvTooLarge {
            tag: self.tag(),
            length: value.len(),
        })?;
        out.extend_from_slice(&self.tag().to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&value);
        out.resize(out.len() + (value.len().next_multiple_of(4) - value.len()), 0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self {
            Tlv::Main(_) => "Main",
            Tlv::WriteableFlashRegions(_) => "Writeable Flash Regions",
            Tlv::PackageName(_) => "Package Name",
            Tlv::FixedAddresses(_) => "Fixed Addresses",
            Tlv::Permissions(_) => "Permissions",
            Tlv::KernelVersion(_) => "Kernel Version",
            Tlv::Program(_) => "Program",
            Tlv::ShortId(_) => "Short ID",
            Tlv::Opaque { .. } => "Unknown",
        }
    }
}

fn decode_permissions(value: &[u8]) -> Option<Tlv> {
    let (count, records) = value.split_first_chunk::<2>()?;
    let count = u16::from_le_bytes(*count) as usize;
    if records.len() != count * size_of::<TbfDriverPermission>() {
        return None;
    }
    read_records(records).map(Tlv::Permissions)
}

/// Writes one `name  decimal  hex` row of a field dump.
pub(crate) fn write_field(f: &mut fmt::Formatter<'_>, name: &str, value: u64) -> fmt::Result {
    writeln!(f, "  {:<22}{:>10} {:>#12x}", name, value, value)
}

impl fmt::Display for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TLV: {} ({})", self.name(), self.tag())?;
        match self {
            Tlv::Main(main) => {
                write_field(f, "init_fn_offset", main.init_fn_offset.get().into())?;
                write_field(
                    f,
                    "protected_trailer_size",
                    main.protected_trailer_size.get().into(),
                )?;
                write_field(f, "minimum_ram_size", main.minimum_ram_size.get().into())
            }
            Tlv::Program(program) => {
                write_field(f, "init_fn_offset", program.init_fn_offset.get().into())?;
                write_field(
                    f,
                    "protected_trailer_size",
                    program.protected_trailer_size.get().into(),
                )?;
                write_field(f, "minimum_ram_size", program.minimum_ram_size.get().into())?;
                write_field(f, "binary_end_offset", program.binary_end_offset.get().into())?;
                write_field(f, "app_version", program.app_version.get().into())
            }
            Tlv::WriteableFlashRegions(regions) => {
                for (i, region) in regions.iter().enumerate() {
                    write_field(f, &format!("region {i} offset"), region.offset.get().into())?;
                    write_field(f, &format!("region {i} size"), region.size.get().into())?;
                }
                Ok(())
            }
            Tlv::PackageName(name) => writeln!(f, "  {:<22}{}", "package_name", name),
            Tlv::FixedAddresses(addresses) => {
                write_field(f, "start_process_ram", addresses.start_process_ram.get().into())?;
                write_field(
                    f,
                    "start_process_flash",
                    addresses.start_process_flash.get().into(),
                )
            }
            Tlv::Permissions(perms) => {
                for perm in perms {
                    writeln!(
                        f,
                        "  driver {:>#10x} offset {:>3} allowed {:#018x}",
                        perm.driver_number.get(),
                        perm.offset.get(),
                        perm.allowed_commands.get()
                    )?;
                }
                Ok(())
            }
            Tlv::KernelVersion(version) => writeln!(
                f,
                "  {:<22}{}.{}",
                "kernel_version",
                version.major.get(),
                version.minor.get()
            ),
            Tlv::ShortId(id) => write_field(f, "short_id", (*id).into()),
            Tlv::Opaque { value, .. } => writeln!(f, "  {:<22}{:>10}", "length", value.len()),
        }
    }
}
