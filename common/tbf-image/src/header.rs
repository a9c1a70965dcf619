// Licensed under the Apache-2.0 license

use crate::error::FormatError;
use crate::tlv::{
    write_field, TbfDriverPermission, TbfFixedAddresses, TbfFlashRegion, TbfKernelVersion,
    TbfProgram, Tlv, ADDRESS_UNSET, TLV_HEADER_SIZE,
};
use core::fmt;
use core::mem::offset_of;
use core::str::FromStr;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const TBF_HEADER_BASE_SIZE: usize = core::mem::size_of::<TbfHeaderBase>();

const FLAG_ENABLED: u32 = 1 << 0;
const FLAG_STICKY: u32 = 1 << 1;

/// Fixed leading part of every TBF header.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct TbfHeaderBase {
    pub version: U16,
    pub header_size: U16,
    pub total_size: U32,
    pub flags: U32,
    pub checksum: U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbfVersion {
    V2,
}

impl TbfVersion {
    pub fn from_raw(version: u16) -> Result<Self, FormatError> {
        match version {
            2 => Ok(TbfVersion::V2),
            other => Err(FormatError::UnsupportedVersion(other)),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            TbfVersion::V2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbfFlag {
    Enabled,
    Sticky,
}

impl TbfFlag {
    fn mask(self) -> u32 {
        match self {
            TbfFlag::Enabled => FLAG_ENABLED,
            TbfFlag::Sticky => FLAG_STICKY,
        }
    }
}

impl FromStr for TbfFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(TbfFlag::Enabled),
            "sticky" => Ok(TbfFlag::Sticky),
            other => Err(format!("unknown TBF flag {other:?}")),
        }
    }
}

/// XOR of all little-endian words in `header`, skipping the checksum word.
pub fn calculate_checksum(header: &[u8]) -> u32 {
    let checksum_word = offset_of!(TbfHeaderBase, checksum) / 4;
    header
        .chunks(4)
        .enumerate()
        .filter(|(i, _)| *i != checksum_word)
        .fold(0u32, |acc, (_, chunk)| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            acc ^ u32::from_le_bytes(word)
        })
}

/// A parsed Tock Binary Format header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbfHeader {
    version: TbfVersion,
    base: TbfHeaderBase,
    tlvs: Vec<Tlv>,
}

impl TbfHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let (base, _) =
            TbfHeaderBase::read_from_prefix(bytes).map_err(|_| FormatError::BufferTooSmall {
                len: bytes.len(),
                needed: TBF_HEADER_BASE_SIZE,
            })?;
        let version = TbfVersion::from_raw(base.version.get())?;
        let header_size = base.header_size.get();
        if (header_size as usize) < TBF_HEADER_BASE_SIZE {
            return Err(FormatError::HeaderSizeTooSmall(header_size));
        }
        if bytes.len() < header_size as usize {
            return Err(FormatError::Truncated {
                len: bytes.len(),
                header_size,
            });
        }
        let header = &bytes[..header_size as usize];

        let computed = calculate_checksum(header);
        if computed != base.checksum.get() {
            return Err(FormatError::ChecksumMismatch {
                stored: base.checksum.get(),
                computed,
            });
        }

        let tlvs = parse_tlvs(header)?;
        log::debug!(
            "Parsed TBF header: size {} total {} flags {:#x} with {} TLVs",
            header_size,
            base.total_size.get(),
            base.flags.get(),
            tlvs.len()
        );
        Ok(Self {
            version,
            base,
            tlvs,
        })
    }

    /// Serializes the header to exactly `header_size` bytes with a fresh checksum.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let header_size = self.header_size() as usize;
        let mut base = self.base;
        base.version = self.version.raw().into();
        base.checksum = U32::ZERO;

        let mut out = Vec::with_capacity(header_size);
        out.extend_from_slice(base.as_bytes());
        for tlv in self.tlvs.iter() {
            tlv.write_to(&mut out)?;
        }
        out.resize(header_size, 0);

        let checksum = calculate_checksum(&out);
        out[offset_of!(TbfHeaderBase, checksum)..TBF_HEADER_BASE_SIZE]
            .copy_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    pub fn set_flag(&mut self, flag: TbfFlag, value: bool) {
        let flags = self.base.flags.get();
        let flags = if value {
            flags | flag.mask()
        } else {
            flags & !flag.mask()
        };
        self.base.flags = flags.into();
    }

    pub fn flag(&self, flag: TbfFlag) -> bool {
        self.base.flags.get() & flag.mask() != 0
    }

    pub fn is_enabled(&self) -> bool {
        self.flag(TbfFlag::Enabled)
    }

    pub fn is_sticky(&self) -> bool {
        self.flag(TbfFlag::Sticky)
    }

    /// Overwrites the declared total size. The caller keeps it large enough
    /// for the header and binary.
    pub fn set_app_size(&mut self, size: u32) {
        self.base.total_size = size.into();
    }

    pub fn app_size(&self) -> u32 {
        self.base.total_size.get()
    }

    pub fn header_size(&self) -> u32 {
        self.base.header_size.get().into()
    }

    pub fn version(&self) -> TbfVersion {
        self.version
    }

    pub fn flags(&self) -> u32 {
        self.base.flags.get()
    }

    /// Checksum as stored when parsed; [`TbfHeader::to_bytes`] recomputes it.
    pub fn checksum(&self) -> u32 {
        self.base.checksum.get()
    }

    pub fn tlvs(&self) -> &[Tlv] {
        &self.tlvs
    }

    pub fn package_name(&self) -> Option<&str> {
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::PackageName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    fn program(&self) -> Option<&TbfProgram> {
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::Program(program) => Some(program),
            _ => None,
        })
    }

    // Program supersedes Main when both are present.
    fn main_fields(&self) -> Option<(u32, u32, u32)> {
        if let Some(program) = self.program() {
            return Some((
                program.init_fn_offset.get(),
                program.protected_trailer_size.get(),
                program.minimum_ram_size.get(),
            ));
        }
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::Main(main) => Some((
                main.init_fn_offset.get(),
                main.protected_trailer_size.get(),
                main.minimum_ram_size.get(),
            )),
            _ => None,
        })
    }

    pub fn init_fn_offset(&self) -> Option<u32> {
        self.main_fields().map(|(init, _, _)| init)
    }

    pub fn protected_trailer_size(&self) -> u32 {
        self.main_fields().map_or(0, |(_, trailer, _)| trailer)
    }

    /// Bytes from the start of the app in flash to the first byte of code.
    pub fn protected_region_size(&self) -> u32 {
        self.header_size() + self.protected_trailer_size()
    }

    pub fn minimum_ram_size(&self) -> Option<u32> {
        self.main_fields().map(|(_, _, ram)| ram)
    }

    pub fn binary_end_offset(&self) -> Option<u32> {
        self.program().map(|program| program.binary_end_offset.get())
    }

    pub fn app_version(&self) -> Option<u32> {
        self.program().map(|program| program.app_version.get())
    }

    pub fn kernel_version(&self) -> Option<(u16, u16)> {
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::KernelVersion(version) => Some((version.major.get(), version.minor.get())),
            _ => None,
        })
    }

    fn fixed_addresses(&self) -> Option<&TbfFixedAddresses> {
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::FixedAddresses(addresses) => Some(addresses),
            _ => None,
        })
    }

    pub fn fixed_flash_address(&self) -> Option<u32> {
        self.fixed_addresses()
            .map(|addresses| addresses.start_process_flash.get())
            .filter(|address| *address != ADDRESS_UNSET)
    }

    pub fn fixed_ram_address(&self) -> Option<u32> {
        self.fixed_addresses()
            .map(|addresses| addresses.start_process_ram.get())
            .filter(|address| *address != ADDRESS_UNSET)
    }

    pub fn permissions(&self) -> &[TbfDriverPermission] {
        self.tlvs
            .iter()
            .find_map(|tlv| match tlv {
                Tlv::Permissions(perms) => Some(perms.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn writeable_flash_regions(&self) -> &[TbfFlashRegion] {
        self.tlvs
            .iter()
            .find_map(|tlv| match tlv {
                Tlv::WriteableFlashRegions(regions) => Some(regions.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn short_id(&self) -> Option<u32> {
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::ShortId(id) => Some(*id),
            _ => None,
        })
    }

    /// Whether an app carrying this header may start at flash `address`.
    /// Position independent apps can be placed anywhere.
    pub fn is_loadable_at(&self, address: u32) -> bool {
        match self.fixed_flash_address() {
            Some(fixed) => address.checked_add(self.protected_region_size()) == Some(fixed),
            None => true,
        }
    }
}

/// Decodes the records after the base header. Padding and trailing bytes are
/// covered by the checksum but never stored, so they must be zero.
fn parse_tlvs(header: &[u8]) -> Result<Vec<Tlv>, FormatError> {
    let mut tlvs = Vec::new();
    let mut offset = TBF_HEADER_BASE_SIZE;
    while offset + TLV_HEADER_SIZE <= header.len() {
        if header[offset..].iter().all(|b| *b == 0) {
            break;
        }
        let tag = u16::from_le_bytes([header[offset], header[offset + 1]]);
        let length = u16::from_le_bytes([header[offset + 2], header[offset + 3]]);
        let start = offset + TLV_HEADER_SIZE;
        let end = start + length as usize;
        if end > header.len() {
            return Err(FormatError::TlvOverflow {
                tag,
                offset,
                length,
            });
        }
        tlvs.push(Tlv::decode(tag, &header[start..end])?);
        offset = start + (length as usize).next_multiple_of(4);
        check_zero(header, end, offset)?;
    }
    check_zero(header, offset, header.len())?;
    Ok(tlvs)
}

fn check_zero(header: &[u8], start: usize, end: usize) -> Result<(), FormatError> {
    let end = end.min(header.len());
    match header
        .get(start..end)
        .and_then(|bytes| bytes.iter().position(|b| *b != 0))
    {
        Some(pos) => Err(FormatError::NonZeroPadding { offset: start + pos }),
        None => Ok(()),
    }
}

impl fmt::Display for TbfHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_field(f, "version", self.version.raw().into())?;
        write_field(f, "header_size", self.header_size().into())?;
        write_field(f, "total_size", self.app_size().into())?;
        write_field(f, "checksum", self.checksum().into())?;
        write_field(f, "flags", self.flags().into())?;
        writeln!(f, "    {:<20}{:>10}", "enabled", self.is_enabled())?;
        writeln!(f, "    {:<20}{:>10}", "sticky", self.is_sticky())?;
        for tlv in self.tlvs.iter() {
            write!(f, "{}", tlv)?;
        }
        Ok(())
    }
}

/// Assembles a new header for an application binary.
#[derive(Debug, Clone)]
pub struct TbfHeaderBuilder {
    package_name: Option<String>,
    init_fn_offset: u32,
    minimum_ram_size: u32,
    app_version: u32,
    kernel_version: Option<(u16, u16)>,
    permissions: Vec<(u32, u32)>,
    fixed_addresses: Option<(u32, u32)>,
    writeable_flash_regions: Vec<(u32, u32)>,
    short_id: Option<u32>,
    enabled: bool,
    sticky: bool,
}

impl Default for TbfHeaderBuilder {
    fn default() -> Self {
        Self {
            package_name: None,
            init_fn_offset: 0,
            minimum_ram_size: 0,
            app_version: 0,
            kernel_version: None,
            permissions: vec![],
            fixed_addresses: None,
            writeable_flash_regions: vec![],
            short_id: None,
            enabled: true,
            sticky: false,
        }
    }
}

impl TbfHeaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package_name(mut self, name: &str) -> Self {
        self.package_name = Some(name.to_owned());
        self
    }

    pub fn init_fn_offset(mut self, offset: u32) -> Self {
        self.init_fn_offset = offset;
        self
    }

    pub fn minimum_ram_size(mut self, size: u32) -> Self {
        self.minimum_ram_size = size;
        self
    }

    pub fn app_version(mut self, version: u32) -> Self {
        self.app_version = version;
        self
    }

    pub fn kernel_version(mut self, major: u16, minor: u16) -> Self {
        self.kernel_version = Some((major, minor));
        self
    }

    /// Allows each `(driver, command)` pair.
    pub fn permissions(mut self, permissions: &[(u32, u32)]) -> Self {
        self.permissions.extend_from_slice(permissions);
        self
    }

    /// `None` leaves that address unset.
    pub fn fixed_addresses(mut self, ram: Option<u32>, flash: Option<u32>) -> Self {
        self.fixed_addresses = Some((
            ram.unwrap_or(ADDRESS_UNSET),
            flash.unwrap_or(ADDRESS_UNSET),
        ));
        self
    }

    pub fn writeable_flash_region(mut self, offset: u32, size: u32) -> Self {
        self.writeable_flash_regions.push((offset, size));
        self
    }

    pub fn short_id(mut self, id: u32) -> Self {
        self.short_id = Some(id);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    fn permission_records(&self) -> Vec<TbfDriverPermission> {
        let mut records: Vec<TbfDriverPermission> = Vec::new();
        for (driver, command) in self.permissions.iter().copied() {
            let offset = command / 64;
            let bit = 1u64 << (command % 64);
            match records
                .iter_mut()
                .find(|r| r.driver_number.get() == driver && r.offset.get() == offset)
            {
                Some(record) => {
                    record.allowed_commands = (record.allowed_commands.get() | bit).into();
                }
                None => records.push(TbfDriverPermission {
                    driver_number: driver.into(),
                    offset: offset.into(),
                    allowed_commands: bit.into(),
                }),
            }
        }
        records
    }

    /// Builds a header sized for a binary of `binary_len` bytes placed
    /// directly after it. Fails when the records overflow the 16-bit header
    /// size or the image overflows the 32-bit total size.
    pub fn build(&self, binary_len: u32) -> Result<TbfHeader, FormatError> {
        let mut tlvs = vec![Tlv::Program(TbfProgram::default())];
        if let Some(name) = &self.package_name {
            tlvs.push(Tlv::PackageName(name.clone()));
        }
        if let Some((major, minor)) = self.kernel_version {
            tlvs.push(Tlv::KernelVersion(TbfKernelVersion {
                major: major.into(),
                minor: minor.into(),
            }));
        }
        if !self.permissions.is_empty() {
            tlvs.push(Tlv::Permissions(self.permission_records()));
        }
        if let Some((ram, flash)) = self.fixed_addresses {
            tlvs.push(Tlv::FixedAddresses(TbfFixedAddresses {
                start_process_ram: ram.into(),
                start_process_flash: flash.into(),
            }));
        }
        if !self.writeable_flash_regions.is_empty() {
            tlvs.push(Tlv::WriteableFlashRegions(
                self.writeable_flash_regions
                    .iter()
                    .map(|(offset, size)| TbfFlashRegion {
                        offset: (*offset).into(),
                        size: (*size).into(),
                    })
                    .collect(),
            ));
        }
        if let Some(id) = self.short_id {
            tlvs.push(Tlv::ShortId(id));
        }

        let header_size =
            TBF_HEADER_BASE_SIZE + tlvs.iter().map(Tlv::encoded_len).sum::<usize>();
        let header_size =
            u16::try_from(header_size).map_err(|_| FormatError::HeaderTooLarge(header_size))?;
        let total_size = u32::from(header_size)
            .checked_add(binary_len)
            .ok_or(FormatError::ImageTooLarge {
                header_size,
                binary_len: binary_len.into(),
            })?;
        tlvs[0] = Tlv::Program(TbfProgram {
            init_fn_offset: self.init_fn_offset.into(),
            protected_trailer_size: U32::ZERO,
            minimum_ram_size: self.minimum_ram_size.into(),
            binary_end_offset: total_size.into(),
            app_version: self.app_version.into(),
        });

        let mut flags = 0;
        if self.enabled {
            flags |= FLAG_ENABLED;
        }
        if self.sticky {
            flags |= FLAG_STICKY;
        }
        let mut header = TbfHeader {
            version: TbfVersion::V2,
            base: TbfHeaderBase {
                version: TbfVersion::V2.raw().into(),
                header_size: header_size.into(),
                total_size: total_size.into(),
                flags: flags.into(),
                checksum: U32::ZERO,
            },
            tlvs,
        };
        header.base.checksum = calculate_checksum(&header.to_bytes()?).into();
        Ok(header)
    }

    /// Header bytes followed by `binary`.
    pub fn build_image(&self, binary: &[u8]) -> Result<Vec<u8>, FormatError> {
        let binary_len = u32::try_from(binary.len()).map_err(|_| FormatError::ImageTooLarge {
            header_size: 0,
            binary_len: binary.len() as u64,
        })?;
        let mut image = self.build(binary_len)?.to_bytes()?;
        image.extend_from_slice(binary);
        Ok(image)
    }
}
