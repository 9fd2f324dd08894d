//! In-memory view of one archive entry.
//!
//! An [`Entry`] aggregates a central directory record with the values
//! derived from it: effective 64-bit sizes and offset (honoring ZIP64
//! sentinels), the entry kind, and the path decoded under the archive's
//! encoding.

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use codepage_437::{BorrowFromCp437, CP437_CONTROL};

use super::structures::{
    CentralDirectoryHeader, CompressionMethod, FLAG_DATA_DESCRIPTOR, FLAG_UTF8, U32_SENTINEL,
};

/// What an entry materializes as on a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Interpretation of entry paths that do not carry the UTF-8 flag.
///
/// Entries flagged UTF-8 (general purpose bit 11) are always decoded as
/// UTF-8; this only selects the fallback for legacy archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathEncoding {
    /// Treat legacy names as UTF-8 anyway (lossy).
    Utf8,
    /// Decode legacy names as CP437, the encoding APPNOTE prescribes.
    #[default]
    Cp437,
}

/// High external-attribute bits marking a symlink (`S_IFLNK`).
const UNIX_SYMLINK: u32 = 0xA000;
/// Mask over the Unix file-type bits in the high attribute half.
const UNIX_TYPE_MASK: u32 = 0xF000;

/// One logical item inside an archive, as discovered in the central
/// directory. Immutable; mutating operations return fresh entry lists.
#[derive(Debug, Clone)]
pub struct Entry {
    header: CentralDirectoryHeader,
    path: String,
    kind: EntryKind,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    zip64: bool,
}

impl Entry {
    pub(crate) fn from_header(header: CentralDirectoryHeader, encoding: PathEncoding) -> Self {
        let zip64_extra = header.zip64_extra();

        let uncompressed_size = if header.uncompressed_size == U32_SENTINEL {
            zip64_extra
                .as_ref()
                .and_then(|f| f.uncompressed_size)
                .unwrap_or(header.uncompressed_size as u64)
        } else {
            header.uncompressed_size as u64
        };
        let compressed_size = if header.compressed_size == U32_SENTINEL {
            zip64_extra
                .as_ref()
                .and_then(|f| f.compressed_size)
                .unwrap_or(header.compressed_size as u64)
        } else {
            header.compressed_size as u64
        };
        let local_header_offset = if header.local_header_offset == U32_SENTINEL {
            zip64_extra
                .as_ref()
                .and_then(|f| f.local_header_offset)
                .unwrap_or(header.local_header_offset as u64)
        } else {
            header.local_header_offset as u64
        };
        // ZIP64 applies when a field overflowed, not whenever a 0x0001
        // extra happens to be present.
        let zip64 = header.uncompressed_size == U32_SENTINEL
            || header.compressed_size == U32_SENTINEL
            || header.local_header_offset == U32_SENTINEL;

        let path = decode_path(&header.file_name, header.flags, encoding);

        let kind = if path.ends_with('/') {
            EntryKind::Directory
        } else if header.external_attributes >> 16 & UNIX_TYPE_MASK == UNIX_SYMLINK {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };

        Self {
            header,
            path,
            kind,
            compressed_size,
            uncompressed_size,
            local_header_offset,
            zip64,
        }
    }

    /// The entry path as stored, decoded to a string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.header.compression_method)
    }

    /// Size of the entry data as stored in the archive.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Size of the entry data once extracted.
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn crc32(&self) -> u32 {
        self.header.crc32
    }

    /// Offset of the entry's local file header from the archive start.
    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    /// Whether any of this entry's fields required ZIP64 promotion.
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// Whether sizes and CRC trail the data in a data descriptor.
    pub fn uses_data_descriptor(&self) -> bool {
        self.header.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// POSIX permission bits from the external attributes, when the
    /// creator stored Unix metadata.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.header.external_attributes >> 16;
        if mode == 0 { None } else { Some(mode & 0o7777) }
    }

    /// Last modification time, decoded from the MS-DOS date/time pair.
    pub fn modified(&self) -> Option<NaiveDateTime> {
        dos_to_datetime(self.header.last_mod_date, self.header.last_mod_time)
    }

    /// The raw (DOS date, DOS time) pair.
    pub fn dos_date_time(&self) -> (u16, u16) {
        (self.header.last_mod_date, self.header.last_mod_time)
    }

    pub fn comment(&self) -> &[u8] {
        &self.header.comment
    }

    pub(crate) fn header(&self) -> &CentralDirectoryHeader {
        &self.header
    }
}

fn decode_path(raw: &[u8], flags: u16, encoding: PathEncoding) -> String {
    if flags & FLAG_UTF8 != 0 || encoding == PathEncoding::Utf8 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        let decoded: Cow<'_, str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        decoded.into_owned()
    }
}

/// Decode an MS-DOS date/time pair.
///
/// Date packs day (bits 0-4), month (5-8) and years since 1980 (9-15);
/// time packs second/2 (0-4), minute (5-10) and hour (11-15).
pub(crate) fn dos_to_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let seconds = (time & 0b0000_0000_0001_1111) as u32 * 2;
    let minutes = (time & 0b0000_0111_1110_0000) as u32 >> 5;
    let hours = (time & 0b1111_1000_0000_0000) as u32 >> 11;

    let day = (date & 0b0000_0000_0001_1111) as u32;
    let month = (date & 0b0000_0001_1110_0000) as u32 >> 5;
    let year = ((date & 0b1111_1110_0000_0000) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hours, minutes, seconds)
}

/// Encode a timestamp as an MS-DOS (date, time) pair, clamping to the
/// representable 1980..=2107 range.
pub(crate) fn datetime_to_dos(when: NaiveDateTime) -> (u16, u16) {
    use chrono::Datelike;

    let year = when.year().clamp(1980, 2107) - 1980;
    let date = ((year as u16) << 9) | ((when.month() as u16) << 5) | when.day() as u16;
    let time = ((when.hour() as u16) << 11)
        | ((when.minute() as u16) << 5)
        | (when.second() as u16 / 2);
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::VERSION_NEEDED_DEFAULT;

    fn header(name: &[u8], external_attributes: u32) -> CentralDirectoryHeader {
        CentralDirectoryHeader {
            version_made_by: VERSION_NEEDED_DEFAULT,
            version_needed: VERSION_NEEDED_DEFAULT,
            flags: FLAG_UTF8,
            compression_method: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            crc32: 0,
            compressed_size: 10,
            uncompressed_size: 10,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes,
            local_header_offset: 0,
            file_name: name.to_vec(),
            extra_field: Vec::new(),
            comment: Vec::new(),
        }
    }

    #[test]
    fn kind_is_derived_from_path_and_attributes() {
        let dir = Entry::from_header(header(b"nested/dir/", 0), PathEncoding::default());
        assert_eq!(dir.kind(), EntryKind::Directory);

        let link = Entry::from_header(
            header(b"link", 0o120_777 << 16),
            PathEncoding::default(),
        );
        assert_eq!(link.kind(), EntryKind::Symlink);
        assert_eq!(link.unix_mode(), Some(0o777));

        let file = Entry::from_header(header(b"file.bin", 0o100_644 << 16), PathEncoding::default());
        assert_eq!(file.kind(), EntryKind::File);
        assert_eq!(file.unix_mode(), Some(0o644));
    }

    #[test]
    fn zip64_extra_overrides_sentinel_fields() {
        let mut h = header(b"big.bin", 0);
        h.uncompressed_size = U32_SENTINEL;
        h.local_header_offset = U32_SENTINEL;
        h.extra_field = crate::zip::structures::Zip64ExtraField {
            uncompressed_size: Some(6_000_000_000),
            compressed_size: None,
            local_header_offset: Some(12_345),
            disk_number_start: None,
        }
        .encode();

        let entry = Entry::from_header(h, PathEncoding::default());
        assert!(entry.is_zip64());
        assert_eq!(entry.uncompressed_size(), 6_000_000_000);
        assert_eq!(entry.compressed_size(), 10);
        assert_eq!(entry.local_header_offset(), 12_345);
    }

    #[test]
    fn dos_datetime_round_trip() {
        let when = NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(13, 45, 58)
            .unwrap();
        let (date, time) = datetime_to_dos(when);
        let back = dos_to_datetime(date, time).unwrap();
        assert_eq!(back, when);
    }

    #[test]
    fn cp437_fallback_without_utf8_flag() {
        let mut h = header(&[0x82], 0); // é in CP437
        h.flags = 0;
        let entry = Entry::from_header(h, PathEncoding::Cp437);
        assert_eq!(entry.path(), "é");
    }
}
