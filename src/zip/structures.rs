//! ZIP file format data structures.
//!
//! This module defines the records that make up a ZIP file according to the
//! PKZIP APPNOTE specification, each with a `parse` and an `encode` half so
//! the same definitions serve reading and rewriting.
//!
//! ## ZIP File Layout
//!
//! ```text
//! [Local File Header 1]
//! [File Data 1]
//! [Data Descriptor 1] (optional)
//! ...
//! [Central Directory File Header 1]
//! [Central Directory File Header 2]
//! ...
//! [ZIP64 End of Central Directory Record] (optional)
//! [ZIP64 End of Central Directory Locator] (optional)
//! [End of Central Directory Record]
//! ```
//!
//! All multi-byte integers are little-endian; the fixed layouts are packed
//! with no padding. 32-bit size/offset fields (and the 16-bit entry counts)
//! may hold all-ones sentinels, in which case the real value lives in a
//! ZIP64 structure.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Result, ZipError};

/// Sentinel in 32-bit size/offset fields meaning "see the ZIP64 extra".
pub const U32_SENTINEL: u32 = 0xFFFF_FFFF;
/// Sentinel in 16-bit entry-count fields meaning "see the ZIP64 EOCD".
pub const U16_SENTINEL: u16 = 0xFFFF;

/// Minimum version to extract entries this engine writes.
pub const VERSION_NEEDED_DEFAULT: u16 = 20;
/// Minimum version to extract once ZIP64 structures are involved.
pub const VERSION_NEEDED_ZIP64: u16 = 45;
/// UNIX host (3) in the high byte, spec version 2.1 in the low byte.
pub const VERSION_MADE_BY: u16 = 789;

/// General purpose bit 0: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// General purpose bit 3: sizes and CRC live in a trailing data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose bit 11: file name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// ZIP compression methods supported by this engine.
///
/// Anything else is preserved as `Unknown` so entries can still be listed
/// and copied verbatim, but never materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (method 0)
    Stored,
    /// DEFLATE compression, RFC 1951 (method 8)
    Deflate,
    /// Unknown or unsupported compression method
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Local File Header: precedes each entry's data.
///
/// ## Structure (30 bytes + variable tail)
///
/// | Offset | Size | Description |
/// |--------|------|-------------|
/// | 0 | 4 | Signature (0x04034b50) |
/// | 4 | 2 | Version needed to extract |
/// | 6 | 2 | General purpose bit flag |
/// | 8 | 2 | Compression method |
/// | 10 | 2 | Last mod time (MS-DOS) |
/// | 12 | 2 | Last mod date (MS-DOS) |
/// | 14 | 4 | CRC-32 |
/// | 18 | 4 | Compressed size |
/// | 22 | 4 | Uncompressed size |
/// | 26 | 2 | File name length (n) |
/// | 28 | 2 | Extra field length (m) |
/// | 30 | n | File name |
/// | 30+n | m | Extra field |
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    /// Length of the variable tail declared by a fixed 30-byte prefix,
    /// or `None` when the prefix is short or carries the wrong signature.
    pub fn tail_len(fixed: &[u8]) -> Option<usize> {
        if fixed.len() < Self::SIZE || &fixed[0..4] != Self::SIGNATURE {
            return None;
        }
        let name_len = u16::from_le_bytes([fixed[26], fixed[27]]) as usize;
        let extra_len = u16::from_le_bytes([fixed[28], fixed[29]]) as usize;
        Some(name_len + extra_len)
    }

    /// Parse a header from `data`, which must contain the fixed prefix and
    /// the full variable tail.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::InvalidLocalHeaderSize);
        }

        let mut cursor = Cursor::new(&data[4..]);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;

        if data.len() < Self::SIZE + name_len + extra_len {
            return Err(ZipError::InvalidLocalHeaderSize);
        }
        let file_name = data[Self::SIZE..Self::SIZE + name_len].to_vec();
        let extra_field =
            data[Self::SIZE + name_len..Self::SIZE + name_len + extra_len].to_vec();

        Ok(Self {
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name,
            extra_field,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.compression_method.to_le_bytes());
        out.extend_from_slice(&self.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.last_mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        out
    }

    /// Total encoded length including the variable tail.
    pub fn encoded_len(&self) -> usize {
        Self::SIZE + self.file_name.len() + self.extra_field.len()
    }

    /// ZIP64 sizes from the extra field, where the 32-bit fields hold
    /// sentinels.
    pub fn zip64_extra(&self) -> Option<Zip64ExtraField> {
        Zip64ExtraField::parse(
            &self.extra_field,
            self.uncompressed_size == U32_SENTINEL,
            self.compressed_size == U32_SENTINEL,
            false,
            false,
        )
    }
}

/// Central Directory File Header: one per entry, in the central directory.
///
/// ## Structure (46 bytes + variable tail)
///
/// | Offset | Size | Description |
/// |--------|------|-------------|
/// | 0 | 4 | Signature (0x02014b50) |
/// | 4 | 2 | Version made by |
/// | 6 | 2 | Version needed to extract |
/// | 8 | 2 | General purpose bit flag |
/// | 10 | 2 | Compression method |
/// | 12 | 2 | Last mod time (MS-DOS) |
/// | 14 | 2 | Last mod date (MS-DOS) |
/// | 16 | 4 | CRC-32 |
/// | 20 | 4 | Compressed size |
/// | 24 | 4 | Uncompressed size |
/// | 28 | 2 | File name length (n) |
/// | 30 | 2 | Extra field length (m) |
/// | 32 | 2 | File comment length (k) |
/// | 34 | 2 | Disk number start |
/// | 36 | 2 | Internal file attributes |
/// | 38 | 4 | External file attributes |
/// | 42 | 4 | Relative offset of local header |
/// | 46 | n+m+k | File name, extra field, comment |
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const SIZE: usize = 46;

    /// Parse one header from the front of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::InvalidCentralDirectorySize);
        }

        let mut cursor = Cursor::new(&data[4..]);
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
        let disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attributes = cursor.read_u16::<LittleEndian>()?;
        let external_attributes = cursor.read_u32::<LittleEndian>()?;
        let local_header_offset = cursor.read_u32::<LittleEndian>()?;

        if data.len() < Self::SIZE + name_len + extra_len + comment_len {
            return Err(ZipError::InvalidCentralDirectorySize);
        }
        let name_start = Self::SIZE;
        let extra_start = name_start + name_len;
        let comment_start = extra_start + extra_len;
        let file_name = data[name_start..extra_start].to_vec();
        let extra_field = data[extra_start..comment_start].to_vec();
        let comment = data[comment_start..comment_start + comment_len].to_vec();

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            file_name,
            extra_field,
            comment,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.compression_method.to_le_bytes());
        out.extend_from_slice(&self.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.last_mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.disk_number_start.to_le_bytes());
        out.extend_from_slice(&self.internal_attributes.to_le_bytes());
        out.extend_from_slice(&self.external_attributes.to_le_bytes());
        out.extend_from_slice(&self.local_header_offset.to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        out.extend_from_slice(&self.comment);
        out
    }

    /// Total encoded length including the variable tail.
    pub fn encoded_len(&self) -> usize {
        Self::SIZE + self.file_name.len() + self.extra_field.len() + self.comment.len()
    }

    pub fn zip64_extra(&self) -> Option<Zip64ExtraField> {
        Zip64ExtraField::parse(
            &self.extra_field,
            self.uncompressed_size == U32_SENTINEL,
            self.compressed_size == U32_SENTINEL,
            self.local_header_offset == U32_SENTINEL,
            self.disk_number_start == U16_SENTINEL,
        )
    }
}

/// End of Central Directory record, at the very end of the archive.
///
/// ## Structure (22 bytes + comment)
///
/// | Offset | Size | Description |
/// |--------|------|-------------|
/// | 0 | 4 | Signature (0x06054b50) |
/// | 4 | 2 | Disk number |
/// | 6 | 2 | Disk with Central Directory |
/// | 8 | 2 | Entries on this disk |
/// | 10 | 2 | Total entries |
/// | 12 | 4 | Central Directory size |
/// | 16 | 4 | Central Directory offset |
/// | 20 | 2 | Comment length |
/// | 22 | n | Comment |
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// An EOCD describing an empty archive, as written by create mode.
    pub fn empty() -> Self {
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 0,
            total_entries: 0,
            cd_size: 0,
            cd_offset: 0,
            comment: Vec::new(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::MissingEndOfCentralDirectoryRecord);
        }

        let mut cursor = Cursor::new(&data[4..]);
        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let disk_with_cd = cursor.read_u16::<LittleEndian>()?;
        let disk_entries = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;

        if data.len() < Self::SIZE + comment_len {
            return Err(ZipError::MissingEndOfCentralDirectoryRecord);
        }
        let comment = data[Self::SIZE..Self::SIZE + comment_len].to_vec();

        Ok(Self {
            disk_number,
            disk_with_cd,
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + self.comment.len());
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.disk_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }

    /// Whether any field carries a sentinel, meaning a ZIP64 EOCD holds
    /// the real values.
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == U16_SENTINEL
            || self.total_entries == U16_SENTINEL
            || self.cd_size == U32_SENTINEL
            || self.cd_offset == U32_SENTINEL
    }
}

/// ZIP64 End of Central Directory Locator, immediately before the EOCD.
///
/// ## Structure (20 bytes)
///
/// | Offset | Size | Description |
/// |--------|------|-------------|
/// | 0 | 4 | Signature (0x07064b50) |
/// | 4 | 4 | Disk with ZIP64 EOCD |
/// | 8 | 8 | ZIP64 EOCD offset |
/// | 16 | 4 | Total number of disks |
#[derive(Debug, Clone)]
pub struct Zip64Locator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::InvalidCentralDirectoryOffset);
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.disk_with_eocd64.to_le_bytes());
        out.extend_from_slice(&self.eocd64_offset.to_le_bytes());
        out.extend_from_slice(&self.total_disks.to_le_bytes());
        out
    }
}

/// ZIP64 End of Central Directory record.
///
/// ## Structure (56 bytes minimum)
///
/// | Offset | Size | Description |
/// |--------|------|-------------|
/// | 0 | 4 | Signature (0x06064b50) |
/// | 4 | 8 | Size of remaining record (44 with no extensible data) |
/// | 12 | 2 | Version made by |
/// | 14 | 2 | Version needed to extract |
/// | 16 | 4 | Disk number |
/// | 20 | 4 | Disk with Central Directory |
/// | 24 | 8 | Entries on this disk |
/// | 32 | 8 | Total entries |
/// | 40 | 8 | Central Directory size |
/// | 48 | 8 | Central Directory offset |
#[derive(Debug, Clone)]
pub struct Zip64EndOfCentralDirectory {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const SIZE: usize = 56;
    /// "Size of record" field value: the fixed fields minus the leading
    /// 12 bytes, with no extensible data sector.
    const RECORD_SIZE: u64 = 44;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::InvalidCentralDirectoryOffset);
        }

        let mut cursor = Cursor::new(&data[4..]);
        let _record_size = cursor.read_u64::<LittleEndian>()?;
        Ok(Self {
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&Self::RECORD_SIZE.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.disk_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out
    }
}

/// Data descriptor: trails the compressed data when general purpose bit 3
/// is set. 12 bytes classic, 20 bytes with ZIP64 sizes, optionally
/// preceded by a 4-byte signature.
#[derive(Debug, Clone)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Sizes are 64-bit on the wire.
    pub zip64: bool,
    /// The optional `PK\x07\x08` signature was present.
    pub has_signature: bool,
}

impl DataDescriptor {
    pub const SIGNATURE: &'static [u8] = b"PK\x07\x08";

    /// Parse a descriptor from `data`; `zip64` selects 64-bit sizes.
    pub fn parse(data: &[u8], zip64: bool) -> Result<Self> {
        let has_signature = data.len() >= 4 && &data[0..4] == Self::SIGNATURE;
        let body = if has_signature { &data[4..] } else { data };
        let needed = if zip64 { 20 } else { 12 };
        if body.len() < needed {
            return Err(ZipError::InvalidEntrySize);
        }

        let mut cursor = Cursor::new(body);
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (
                cursor.read_u64::<LittleEndian>()?,
                cursor.read_u64::<LittleEndian>()?,
            )
        } else {
            (
                cursor.read_u32::<LittleEndian>()? as u64,
                cursor.read_u32::<LittleEndian>()? as u64,
            )
        };

        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
            zip64,
            has_signature,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        if self.has_signature {
            out.extend_from_slice(Self::SIGNATURE);
        }
        out.extend_from_slice(&self.crc32.to_le_bytes());
        if self.zip64 {
            out.extend_from_slice(&self.compressed_size.to_le_bytes());
            out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            out.extend_from_slice(&(self.compressed_size as u32).to_le_bytes());
            out.extend_from_slice(&(self.uncompressed_size as u32).to_le_bytes());
        }
        out
    }

    pub fn encoded_len(&self) -> usize {
        let sig = if self.has_signature { 4 } else { 0 };
        let sizes = if self.zip64 { 16 } else { 8 };
        sig + 4 + sizes
    }
}

/// ZIP64 extended information extra field (header id `0x0001`).
///
/// Carries an ordered subset of 64-bit values; each is present on the wire
/// only when the corresponding field of the owning record holds its 32-bit
/// (or 16-bit, for the disk number) sentinel.
#[derive(Debug, Clone, Default)]
pub struct Zip64ExtraField {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_number_start: Option<u32>,
}

impl Zip64ExtraField {
    pub const HEADER_ID: u16 = 0x0001;

    /// Locate and decode the ZIP64 field inside a record's extra blob.
    /// The `*_present` flags say which fields the owning record promoted.
    pub fn parse(
        extra: &[u8],
        uncompressed_present: bool,
        compressed_present: bool,
        offset_present: bool,
        disk_present: bool,
    ) -> Option<Self> {
        let payload = find_extra_field(extra, Self::HEADER_ID)?;
        let mut cursor = Cursor::new(payload);
        let mut field = Self::default();

        if uncompressed_present {
            field.uncompressed_size = cursor.read_u64::<LittleEndian>().ok();
        }
        if compressed_present {
            field.compressed_size = cursor.read_u64::<LittleEndian>().ok();
        }
        if offset_present {
            field.local_header_offset = cursor.read_u64::<LittleEndian>().ok();
        }
        if disk_present {
            field.disk_number_start = cursor.read_u32::<LittleEndian>().ok();
        }
        Some(field)
    }

    /// Encode as a complete extra field: header id, payload size, payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        if let Some(v) = self.uncompressed_size {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.compressed_size {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.local_header_offset {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.disk_number_start {
            payload.extend_from_slice(&v.to_le_bytes());
        }

        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&Self::HEADER_ID.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.local_header_offset.is_none()
            && self.disk_number_start.is_none()
    }
}

/// Walk the id/size/payload list in an extra-field blob, returning the
/// payload of the field with `id`.
pub fn find_extra_field(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut cursor = Cursor::new(extra);
    loop {
        let field_id = cursor.read_u16::<LittleEndian>().ok()?;
        let field_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        let start = cursor.position() as usize;
        if start + field_len > extra.len() {
            return None;
        }
        if field_id == id {
            return Some(&extra[start..start + field_len]);
        }
        cursor.set_position((start + field_len) as u64);
    }
}

/// Copy an extra-field blob, dropping the field with `id` and keeping
/// everything else (and any trailing bytes that do not parse as fields)
/// verbatim.
pub(crate) fn remove_extra_field(extra: &[u8], id: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len());
    let mut offset = 0usize;
    while offset + 4 <= extra.len() {
        let field_id = u16::from_le_bytes([extra[offset], extra[offset + 1]]);
        let field_len = u16::from_le_bytes([extra[offset + 2], extra[offset + 3]]) as usize;
        let end = offset + 4 + field_len;
        if end > extra.len() {
            break;
        }
        if field_id != id {
            out.extend_from_slice(&extra[offset..end]);
        }
        offset = end;
    }
    out.extend_from_slice(&extra[offset..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eocd_round_trips_with_comment() {
        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 3,
            total_entries: 3,
            cd_size: 150,
            cd_offset: 1024,
            comment: b"hello".to_vec(),
        };
        let parsed = EndOfCentralDirectory::parse(&eocd.encode()).unwrap();
        assert_eq!(parsed.total_entries, 3);
        assert_eq!(parsed.cd_offset, 1024);
        assert_eq!(parsed.comment, b"hello");
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn eocd_sentinel_flags_zip64() {
        let mut eocd = EndOfCentralDirectory::empty();
        eocd.cd_offset = U32_SENTINEL;
        assert!(eocd.is_zip64());
    }

    #[test]
    fn zip64_extra_partial_presence() {
        let field = Zip64ExtraField {
            uncompressed_size: Some(5_000_000_000),
            compressed_size: None,
            local_header_offset: Some(7),
            disk_number_start: None,
        };
        let encoded = field.encode();
        // id + size prefix + two u64 values
        assert_eq!(encoded.len(), 4 + 16);

        let mut extra = vec![0x09, 0x00, 0x02, 0x00, 0xAA, 0xBB]; // unrelated field first
        extra.extend_from_slice(&encoded);
        let parsed = Zip64ExtraField::parse(&extra, true, false, true, false).unwrap();
        assert_eq!(parsed.uncompressed_size, Some(5_000_000_000));
        assert_eq!(parsed.compressed_size, None);
        assert_eq!(parsed.local_header_offset, Some(7));
    }

    #[test]
    fn data_descriptor_with_and_without_signature() {
        let with_sig = DataDescriptor {
            crc32: 0xDEADBEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            zip64: false,
            has_signature: true,
        };
        let parsed = DataDescriptor::parse(&with_sig.encode(), false).unwrap();
        assert!(parsed.has_signature);
        assert_eq!(parsed.crc32, 0xDEADBEEF);
        assert_eq!(parsed.uncompressed_size, 20);

        let bare = DataDescriptor {
            has_signature: false,
            zip64: true,
            ..with_sig
        };
        let parsed = DataDescriptor::parse(&bare.encode(), true).unwrap();
        assert!(!parsed.has_signature);
        assert_eq!(parsed.compressed_size, 10);
    }

    #[test]
    fn lfh_tail_len_reads_declared_lengths() {
        let lfh = LocalFileHeader {
            version_needed: VERSION_NEEDED_DEFAULT,
            flags: FLAG_UTF8,
            compression_method: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: b"dir/file.txt".to_vec(),
            extra_field: vec![1, 2, 3, 4],
        };
        let encoded = lfh.encode();
        assert_eq!(
            LocalFileHeader::tail_len(&encoded[..LocalFileHeader::SIZE]),
            Some(12 + 4)
        );
        let parsed = LocalFileHeader::parse(&encoded).unwrap();
        assert_eq!(parsed.file_name, b"dir/file.txt");
        assert_eq!(parsed.extra_field, vec![1, 2, 3, 4]);
    }

    #[test]
    fn short_cds_is_rejected() {
        let data = [0x50, 0x4b, 0x01, 0x02, 0, 0];
        assert!(CentralDirectoryHeader::parse(&data).is_err());
    }
}
