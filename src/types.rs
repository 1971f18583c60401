#![allow(clippy::wrong_self_convention)]

//! Types that specify what is contained in a ZIP.

use num_enum::{FromPrimitive, IntoPrimitive};
use std::path::{Component, PathBuf};
use std::time::SystemTime;

use crate::compression::CompressionMethod;
use crate::result::{DateTimeRangeError, ZipError, ZipResult};
use crate::spec::{self, Block};
use time::{error::ComponentRange, Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

pub(crate) mod ffi {
    pub const S_IFMT: u32 = 0o0170000;
    pub const S_IFDIR: u32 = 0o0040000;
    pub const S_IFREG: u32 = 0o0100000;
    pub const S_IFLNK: u32 = 0o0120000;
}

/// The originating host system recorded in the high byte of
/// `version made by`, which decides how external attributes are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum System {
    Dos = 0,
    Unix = 3,
    #[num_enum(default)]
    Unknown,
}

/// Representation of a moment in time.
///
/// Zip files use an old format from DOS to store timestamps,
/// with its own set of peculiarities.
/// For example, it has a resolution of 2 seconds!
///
/// # Warning
///
/// There is no timezone associated with a [`DateTime`]; the conversions to
/// and from the host clock treat the stored fields as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

/// MS-DOS date value a host timestamp before 1980 clamps to: 1980-01-01.
pub const MIN_DOS_DATEPART: u16 = 33;

/// MS-DOS date value a host timestamp past the encodable ceiling clamps to.
pub const MAX_DOS_DATEPART: u16 = 60961;

/// Last calendar year the host-clock conversion will encode before clamping.
const CLAMP_CEILING_YEAR: i32 = 2099;

impl Default for DateTime {
    /// Constructs an 'default' datetime of 1980-01-01 00:00:00
    fn default() -> DateTime {
        DateTime {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl DateTime {
    /// Converts an msdos (u16, u16) pair to a DateTime object
    pub const fn from_msdos(datepart: u16, timepart: u16) -> DateTime {
        let seconds = (timepart & 0b0000000000011111) << 1;
        let minutes = (timepart & 0b0000011111100000) >> 5;
        let hours = (timepart & 0b1111100000000000) >> 11;
        let days = datepart & 0b0000000000011111;
        let months = (datepart & 0b0000000111100000) >> 5;
        let years = (datepart & 0b1111111000000000) >> 9;

        DateTime {
            year: years + 1980,
            month: months as u8,
            day: days as u8,
            hour: hours as u8,
            minute: minutes as u8,
            second: seconds as u8,
        }
    }

    /// Constructs a DateTime from a specific date and time
    ///
    /// The bounds are:
    /// * year: [1980, 2107]
    /// * month: [1, 12]
    /// * day: [1, 31]
    /// * hour: [0, 23]
    /// * minute: [0, 59]
    /// * second: [0, 60]
    pub fn from_date_and_time(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<DateTime, DateTimeRangeError> {
        if (1980..=2107).contains(&year)
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour <= 23
            && minute <= 59
            && second <= 60
        {
            Ok(DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
            })
        } else {
            Err(DateTimeRangeError)
        }
    }

    /// Encodes a host timestamp, clamping instants the MS-DOS format cannot
    /// represent instead of failing.
    ///
    /// Instants before 1980-01-01T00:00:00Z (or so remote they cannot be
    /// decomposed into calendar fields) become the floor, whose date part is
    /// [`MIN_DOS_DATEPART`]; instants past the ceiling year become the value
    /// whose date part is [`MAX_DOS_DATEPART`]. Both clamp targets carry a
    /// zero time part.
    pub fn from_system_time(value: SystemTime) -> DateTime {
        let seconds = match value.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            Err(before) => i64::try_from(before.duration().as_secs())
                .map(i64::wrapping_neg)
                .unwrap_or(i64::MIN),
        };
        Self::from_unix_seconds(seconds)
    }

    /// Clamped encoding of a unix timestamp; see [`DateTime::from_system_time`].
    pub fn from_unix_seconds(seconds: i64) -> DateTime {
        let Ok(dt) = OffsetDateTime::from_unix_timestamp(seconds) else {
            return if seconds < 0 {
                Self::clamp_floor()
            } else {
                Self::clamp_ceiling()
            };
        };
        if dt.year() < 1980 {
            return Self::clamp_floor();
        }
        if dt.year() > CLAMP_CEILING_YEAR {
            return Self::clamp_ceiling();
        }
        DateTime {
            year: dt.year() as u16,
            month: dt.month().into(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        }
    }

    const fn clamp_floor() -> DateTime {
        DateTime {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }

    const fn clamp_ceiling() -> DateTime {
        DateTime {
            year: CLAMP_CEILING_YEAR as u16,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }

    /// Indicates whether this date and time can be written to a zip archive.
    pub fn is_valid(&self) -> bool {
        DateTime::from_date_and_time(
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )
        .is_ok()
    }

    /// Gets the time portion of this datetime in the msdos representation
    pub const fn timepart(&self) -> u16 {
        ((self.second as u16) >> 1) | ((self.minute as u16) << 5) | ((self.hour as u16) << 11)
    }

    /// Gets the date portion of this datetime in the msdos representation
    pub const fn datepart(&self) -> u16 {
        (self.day as u16) | ((self.month as u16) << 5) | ((self.year - 1980) << 9)
    }

    /// Converts the DateTime to a OffsetDateTime structure
    pub fn to_time(&self) -> Result<OffsetDateTime, ComponentRange> {
        let date =
            Date::from_calendar_date(self.year as i32, Month::try_from(self.month)?, self.day)?;
        let time = Time::from_hms(self.hour, self.minute, self.second)?;
        Ok(PrimitiveDateTime::new(date, time).assume_utc())
    }

    /// Converts the DateTime to the host clock, treating the fields as UTC.
    ///
    /// Field combinations read out of hostile archives may not form a real
    /// calendar date; those decode as the ZIP epoch, 1980-01-01.
    pub fn to_system_time(&self) -> SystemTime {
        let dt = self
            .to_time()
            .unwrap_or_else(|_| Self::default().to_time().expect("epoch is representable"));
        SystemTime::from(dt)
    }

    /// Get the year. There is no epoch, i.e. 2018 will be returned as 2018.
    pub const fn year(&self) -> u16 {
        self.year
    }

    /// Get the month, where 1 = january and 12 = december
    ///
    /// # Warning
    ///
    /// When read from a zip file, this may not be a reasonable value
    pub const fn month(&self) -> u8 {
        self.month
    }

    /// Get the day
    ///
    /// # Warning
    ///
    /// When read from a zip file, this may not be a reasonable value
    pub const fn day(&self) -> u8 {
        self.day
    }

    /// Get the hour
    ///
    /// # Warning
    ///
    /// When read from a zip file, this may not be a reasonable value
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    /// Get the minute
    ///
    /// # Warning
    ///
    /// When read from a zip file, this may not be a reasonable value
    pub const fn minute(&self) -> u8 {
        self.minute
    }

    /// Get the second
    ///
    /// # Warning
    ///
    /// When read from a zip file, this may not be a reasonable value
    pub const fn second(&self) -> u8 {
        self.second
    }
}

impl TryFrom<OffsetDateTime> for DateTime {
    type Error = DateTimeRangeError;

    fn try_from(dt: OffsetDateTime) -> Result<Self, Self::Error> {
        if dt.year() >= 1980 && dt.year() <= 2107 {
            Ok(DateTime {
                year: dt.year().try_into()?,
                month: dt.month().into(),
                day: dt.day(),
                hour: dt.hour(),
                minute: dt.minute(),
                second: dt.second(),
            })
        } else {
            Err(DateTimeRangeError)
        }
    }
}

pub const DEFAULT_VERSION: u8 = 46;

/// A parsed directory entry: the union of a central directory record and the
/// local file header it points at, reduced to queryable fields.
///
/// An `EntryData` is an immutable snapshot reconstructed from bytes. The
/// offsets it carries are only meaningful against the archive it was read
/// from; it is not a live handle.
#[derive(Debug, Clone)]
pub struct EntryData {
    /// Compatibility of the file attribute information
    pub system: System,
    /// Specification version of the producing implementation
    pub version_made_by: u8,
    /// True if the file is encrypted.
    pub encrypted: bool,
    /// True if the file uses a data-descriptor section
    pub using_data_descriptor: bool,
    /// Compression method used to store the file
    pub compression_method: CompressionMethod,
    /// Last modified time. This will only have a 2 second precision.
    pub last_modified_time: DateTime,
    /// CRC32 checksum
    pub crc32: u32,
    /// Size of the file in the ZIP
    pub compressed_size: u64,
    /// Size of the file when extracted
    pub uncompressed_size: u64,
    /// Name of the file
    pub file_name: Box<str>,
    /// Raw file name. To be used when file_name was incorrectly decoded.
    pub file_name_raw: Box<[u8]>,
    /// Extra field, carried opaquely
    pub extra_field: Box<[u8]>,
    /// File comment
    pub file_comment: Box<str>,
    /// Specifies where the local header of the file starts
    pub header_start: u64,
    /// Specifies where the central header of the file starts
    ///
    /// Note that when this is not known, it is set to 0
    pub central_header_start: u64,
    /// Specifies where the compressed data of the file starts
    pub data_start: u64,
    /// External file attributes
    pub external_attributes: u32,
}

impl EntryData {
    /// Materializes an entry from a parsed central directory block, pulling
    /// the variable-length name, extra field and comment through `provider`.
    ///
    /// The provider is called once per trailing section with the exact byte
    /// count the block declares, including zero.
    pub(crate) fn from_central_block(
        block: CentralDirectoryBlock,
        central_header_start: u64,
        mut provider: impl FnMut(usize) -> ZipResult<Vec<u8>>,
    ) -> ZipResult<Self> {
        let CentralDirectoryBlock {
            // magic,
            version_made_by,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name_length,
            extra_field_length,
            file_comment_length,
            external_file_attributes,
            offset,
            ..
        } = block;

        let encrypted = flags & 1 == 1;
        let using_data_descriptor = flags & (1 << 3) != 0;

        let file_name_raw = provider(file_name_length as usize)?;
        let extra_field = provider(extra_field_length as usize)?;
        let file_comment_raw = provider(file_comment_length as usize)?;

        let file_name: Box<str> = String::from_utf8_lossy(&file_name_raw).into();
        let file_comment: Box<str> = String::from_utf8_lossy(&file_comment_raw).into();

        let system: u8 = (version_made_by >> 8) as u8;
        Ok(EntryData {
            system: System::from(system),
            version_made_by: version_made_by as u8,
            encrypted,
            using_data_descriptor,
            compression_method: CompressionMethod::from_u16(compression_method),
            last_modified_time: DateTime::from_msdos(last_mod_date, last_mod_time),
            crc32,
            compressed_size: compressed_size.into(),
            uncompressed_size: uncompressed_size.into(),
            file_name,
            file_name_raw: file_name_raw.into(),
            extra_field: extra_field.into(),
            file_comment,
            header_start: offset.into(),
            central_header_start,
            data_start: 0,
            external_attributes: external_file_attributes,
        })
    }

    /// Checks a local file header against this central directory record.
    ///
    /// Local CRC and size fields of zero are accepted as deferred to a data
    /// descriptor; any other disagreement means the two headers describe
    /// different data and the pair is rejected.
    pub(crate) fn validate_local_block(&self, block: &LocalFileHeaderBlock) -> ZipResult<()> {
        let local_crc32 = block.crc32;
        let local_compressed = block.compressed_size as u64;
        let local_uncompressed = block.uncompressed_size as u64;

        if local_crc32 != 0 && local_crc32 != self.crc32 {
            return Err(ZipError::InvalidArchive(
                "Local file header CRC differs from central directory",
            ));
        }
        if local_compressed != 0 && local_compressed != self.compressed_size {
            return Err(ZipError::InvalidArchive(
                "Local file header compressed size differs from central directory",
            ));
        }
        if local_uncompressed != 0 && local_uncompressed != self.uncompressed_size {
            return Err(ZipError::InvalidArchive(
                "Local file header uncompressed size differs from central directory",
            ));
        }
        Ok(())
    }

    /// Whether this entry is a directory, marked by a trailing `/` in the
    /// stored name.
    pub fn is_dir(&self) -> bool {
        self.file_name.ends_with('/')
    }

    /// Whether this entry is a symbolic link, per its Unix mode bits.
    pub fn is_symlink(&self) -> bool {
        self.unix_mode()
            .is_some_and(|mode| mode & ffi::S_IFMT == ffi::S_IFLNK)
    }

    /// Get unix mode for the file
    pub(crate) const fn unix_mode(&self) -> Option<u32> {
        if self.external_attributes == 0 {
            return None;
        }

        match self.system {
            System::Unix => Some(self.external_attributes >> 16),
            System::Dos => {
                // Interpret MS-DOS directory bit
                let mut mode = if 0x10 == (self.external_attributes & 0x10) {
                    ffi::S_IFDIR | 0o0775
                } else {
                    ffi::S_IFREG | 0o0664
                };
                if 0x01 == (self.external_attributes & 0x01) {
                    // Read-only bit; strip write permissions
                    mode &= 0o0555;
                }
                Some(mode)
            }
            _ => None,
        }
    }

    /// The stored name reduced to a path that cannot escape the extraction
    /// root. `None` when the name is absolute or climbs above it.
    pub fn enclosed_name(&self) -> Option<PathBuf> {
        if self.file_name.contains('\0') {
            return None;
        }
        let path = PathBuf::from(self.file_name.to_string());
        let mut depth = 0usize;
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => return None,
                Component::ParentDir => depth = depth.checked_sub(1)?,
                Component::Normal(_) => depth += 1,
                Component::CurDir => (),
            }
        }
        Some(path)
    }

    pub(crate) const fn version_needed(&self) -> u16 {
        20
    }

    pub(crate) fn local_block(&self) -> ZipResult<LocalFileHeaderBlock> {
        let compressed_size: u32 = self
            .compressed_size
            .try_into()
            .map_err(|_| ZipError::UnsupportedArchive("File is too large to store"))?;
        let uncompressed_size: u32 = self
            .uncompressed_size
            .try_into()
            .map_err(|_| ZipError::UnsupportedArchive("File is too large to store"))?;
        let file_name_length: u16 = self
            .file_name_raw
            .len()
            .try_into()
            .map_err(|_| ZipError::InvalidArchive("File name is too long"))?;
        let extra_field_length: u16 = self
            .extra_field
            .len()
            .try_into()
            .map_err(|_| ZipError::InvalidArchive("Extra data field is too large"))?;
        Ok(LocalFileHeaderBlock {
            magic: spec::LOCAL_FILE_HEADER_SIGNATURE,
            version_needed: self.version_needed(),
            flags: self.header_flags(),
            compression_method: self.compression_method.to_u16(),
            last_mod_time: self.last_modified_time.timepart(),
            last_mod_date: self.last_modified_time.datepart(),
            crc32: self.crc32,
            compressed_size,
            uncompressed_size,
            file_name_length,
            extra_field_length,
        })
    }

    pub(crate) fn central_block(&self) -> ZipResult<CentralDirectoryBlock> {
        let local = self.local_block()?;
        let file_comment_length: u16 = self
            .file_comment
            .len()
            .try_into()
            .map_err(|_| ZipError::InvalidArchive("File comment is too long"))?;
        let offset: u32 = self
            .header_start
            .try_into()
            .map_err(|_| ZipError::UnsupportedArchive("Archive is too large to store"))?;
        Ok(CentralDirectoryBlock {
            magic: spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE,
            version_made_by: (self.system as u16) << 8 | (self.version_made_by as u16),
            version_needed: local.version_needed,
            flags: local.flags,
            compression_method: local.compression_method,
            last_mod_time: local.last_mod_time,
            last_mod_date: local.last_mod_date,
            crc32: local.crc32,
            compressed_size: local.compressed_size,
            uncompressed_size: local.uncompressed_size,
            file_name_length: local.file_name_length,
            extra_field_length: local.extra_field_length,
            file_comment_length,
            disk_number: 0,
            internal_file_attributes: 0,
            external_file_attributes: self.external_attributes,
            offset,
        })
    }

    const fn header_flags(&self) -> u16 {
        let utf8 = if !self.file_name.is_ascii() {
            1u16 << 11
        } else {
            0
        };
        let descriptor = if self.using_data_descriptor {
            1u16 << 3
        } else {
            0
        };
        utf8 | descriptor
    }
}

#[derive(Copy, Clone, Debug)]
#[repr(packed)]
pub(crate) struct CentralDirectoryBlock {
    pub magic: spec::Magic,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub offset: u32,
}

impl CentralDirectoryBlock {
    #[inline(always)]
    fn from_le(mut self) -> Self {
        from_le![
            self,
            [
                (magic, spec::Magic),
                (version_made_by, u16),
                (version_needed, u16),
                (flags, u16),
                (compression_method, u16),
                (last_mod_time, u16),
                (last_mod_date, u16),
                (crc32, u32),
                (compressed_size, u32),
                (uncompressed_size, u32),
                (file_name_length, u16),
                (extra_field_length, u16),
                (file_comment_length, u16),
                (disk_number, u16),
                (internal_file_attributes, u16),
                (external_file_attributes, u32),
                (offset, u32),
            ]
        ];
        self
    }

    #[inline(always)]
    fn to_le(mut self) -> Self {
        to_le![
            self,
            [
                (magic, spec::Magic),
                (version_made_by, u16),
                (version_needed, u16),
                (flags, u16),
                (compression_method, u16),
                (last_mod_time, u16),
                (last_mod_date, u16),
                (crc32, u32),
                (compressed_size, u32),
                (uncompressed_size, u32),
                (file_name_length, u16),
                (extra_field_length, u16),
                (file_comment_length, u16),
                (disk_number, u16),
                (internal_file_attributes, u16),
                (external_file_attributes, u32),
                (offset, u32),
            ]
        ];
        self
    }
}

impl Block for CentralDirectoryBlock {
    fn interpret(bytes: &[u8]) -> ZipResult<Self> {
        let block = Self::deserialize(bytes).from_le();

        if block.magic != spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE {
            return Err(ZipError::InvalidArchive("Invalid Central Directory header"));
        }

        Ok(block)
    }

    fn encode(self) -> Box<[u8]> {
        self.to_le().serialize()
    }
}

#[derive(Copy, Clone, Debug)]
#[repr(packed)]
pub(crate) struct LocalFileHeaderBlock {
    pub magic: spec::Magic,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeaderBlock {
    #[inline(always)]
    fn from_le(mut self) -> Self {
        from_le![
            self,
            [
                (magic, spec::Magic),
                (version_needed, u16),
                (flags, u16),
                (compression_method, u16),
                (last_mod_time, u16),
                (last_mod_date, u16),
                (crc32, u32),
                (compressed_size, u32),
                (uncompressed_size, u32),
                (file_name_length, u16),
                (extra_field_length, u16),
            ]
        ];
        self
    }

    #[inline(always)]
    fn to_le(mut self) -> Self {
        to_le![
            self,
            [
                (magic, spec::Magic),
                (version_needed, u16),
                (flags, u16),
                (compression_method, u16),
                (last_mod_time, u16),
                (last_mod_date, u16),
                (crc32, u32),
                (compressed_size, u32),
                (uncompressed_size, u32),
                (file_name_length, u16),
                (extra_field_length, u16),
            ]
        ];
        self
    }
}

impl Block for LocalFileHeaderBlock {
    fn interpret(bytes: &[u8]) -> ZipResult<Self> {
        let block = Self::deserialize(bytes).from_le();

        if block.magic != spec::LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ZipError::InvalidArchive("Invalid local file header"));
        }

        Ok(block)
    }

    fn encode(self) -> Box<[u8]> {
        self.to_le().serialize()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn system() {
        assert_eq!(u8::from(System::Dos), 0u8);
        assert_eq!(System::Dos as u8, 0u8);
        assert_eq!(System::Unix as u8, 3u8);
        assert_eq!(u8::from(System::Unix), 3u8);
        assert_eq!(System::from(0), System::Dos);
        assert_eq!(System::from(3), System::Unix);
        assert_eq!(System::from(0x15), System::Unknown);
    }

    #[test]
    #[allow(clippy::unusual_byte_groupings)]
    fn datetime_default() {
        let dt = DateTime::default();
        assert_eq!(dt.timepart(), 0);
        assert_eq!(dt.datepart(), 0b0000000_0001_00001);
    }

    #[test]
    #[allow(clippy::unusual_byte_groupings)]
    fn datetime_max() {
        let dt = DateTime::from_date_and_time(2107, 12, 31, 23, 59, 60).unwrap();
        assert_eq!(dt.timepart(), 0b10111_111011_11110);
        assert_eq!(dt.datepart(), 0b1111111_1100_11111);
    }

    #[test]
    fn datetime_bounds() {
        assert!(DateTime::from_date_and_time(2000, 1, 1, 23, 59, 60).is_ok());
        assert!(DateTime::from_date_and_time(2000, 1, 1, 24, 0, 0).is_err());
        assert!(DateTime::from_date_and_time(2000, 1, 1, 0, 60, 0).is_err());
        assert!(DateTime::from_date_and_time(2000, 1, 1, 0, 0, 61).is_err());

        assert!(DateTime::from_date_and_time(2107, 12, 31, 0, 0, 0).is_ok());
        assert!(DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).is_ok());
        assert!(DateTime::from_date_and_time(1979, 1, 1, 0, 0, 0).is_err());
        assert!(DateTime::from_date_and_time(1980, 0, 1, 0, 0, 0).is_err());
        assert!(DateTime::from_date_and_time(1980, 1, 0, 0, 0, 0).is_err());
        assert!(DateTime::from_date_and_time(2108, 12, 31, 0, 0, 0).is_err());
        assert!(DateTime::from_date_and_time(2107, 13, 31, 0, 0, 0).is_err());
        assert!(DateTime::from_date_and_time(2107, 12, 32, 0, 0, 0).is_err());
    }

    #[test]
    fn clamp_floor_is_documented_value() {
        // 1970-01-01 precedes the MS-DOS epoch.
        let dt = DateTime::from_unix_seconds(0);
        assert_eq!(dt.datepart(), MIN_DOS_DATEPART);
        assert_eq!(dt.timepart(), 0);

        // So does anything the calendar cannot even decompose.
        let dt = DateTime::from_unix_seconds(i64::MIN);
        assert_eq!(dt.datepart(), MIN_DOS_DATEPART);
        assert_eq!(dt.timepart(), 0);
    }

    #[test]
    fn clamp_ceiling_is_documented_value() {
        // 2100-01-01T00:00:00Z.
        let dt = DateTime::from_unix_seconds(4_102_444_800);
        assert_eq!(dt.datepart(), MAX_DOS_DATEPART);
        assert_eq!(dt.timepart(), 0);

        let dt = DateTime::from_unix_seconds(i64::MAX);
        assert_eq!(dt.datepart(), MAX_DOS_DATEPART);
        assert_eq!(dt.timepart(), 0);
    }

    #[test]
    fn in_range_instants_encode_field_by_field() {
        // 2000-01-01T12:30:10Z.
        let dt = DateTime::from_unix_seconds(946_729_810);
        assert_eq!(dt.year(), 2000);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.hour(), 12);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 10);
    }

    #[test]
    fn time_conversion() {
        let dt = DateTime::from_msdos(0x4D71, 0x54CF);
        assert_eq!(dt.year(), 2018);
        assert_eq!(dt.month(), 11);
        assert_eq!(dt.day(), 17);
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 38);
        assert_eq!(dt.second(), 30);

        assert_eq!(
            dt.to_time()
                .unwrap()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap(),
            "2018-11-17T10:38:30Z"
        );
    }

    #[test]
    fn time_out_of_bounds() {
        let dt = DateTime::from_msdos(0xFFFF, 0xFFFF);
        assert_eq!(dt.year(), 2107);
        assert_eq!(dt.month(), 15);
        assert_eq!(dt.day(), 31);
        assert_eq!(dt.hour(), 31);
        assert_eq!(dt.minute(), 63);
        assert_eq!(dt.second(), 62);

        assert!(dt.to_time().is_err());
        // Nonsense stored fields decode to the ZIP epoch rather than panicking.
        assert_eq!(
            dt.to_system_time(),
            DateTime::default().to_system_time()
        );

        let dt = DateTime::from_msdos(0x0000, 0x0000);
        assert_eq!(dt.year(), 1980);
        assert_eq!(dt.month(), 0);
        assert_eq!(dt.day(), 0);

        assert!(dt.to_time().is_err());
    }

    fn sample_entry(file_name: &str, external_attributes: u32, system: System) -> EntryData {
        EntryData {
            system,
            version_made_by: DEFAULT_VERSION,
            encrypted: false,
            using_data_descriptor: false,
            compression_method: CompressionMethod::Stored,
            last_modified_time: DateTime::default(),
            crc32: 0x9be3e0a3,
            compressed_size: 4,
            uncompressed_size: 4,
            file_name: file_name.into(),
            file_name_raw: file_name.as_bytes().into(),
            extra_field: Box::default(),
            file_comment: "".into(),
            header_start: 0,
            central_header_start: 0,
            data_start: 0,
            external_attributes,
        }
    }

    #[test]
    fn central_block_round_trip() {
        let entry = sample_entry("dir/file.bin", 0o100644 << 16, System::Unix);
        let block = entry.central_block().unwrap();

        let mut c = Cursor::new(Vec::new());
        block.write(&mut c).unwrap();
        c.write_all(&entry.file_name_raw).unwrap();
        c.write_all(&entry.extra_field).unwrap();
        c.write_all(entry.file_comment.as_bytes()).unwrap();
        c.set_position(0);

        let parsed = CentralDirectoryBlock::parse(&mut c).unwrap();
        let reread =
            EntryData::from_central_block(parsed, 0, spec::reader_provider(&mut c)).unwrap();
        assert_eq!(reread.file_name.as_ref(), "dir/file.bin");
        assert_eq!(reread.crc32, entry.crc32);
        assert_eq!(reread.external_attributes, entry.external_attributes);
        assert_eq!(reread.system, System::Unix);
        assert_eq!(reread.last_modified_time, entry.last_modified_time);
    }

    #[test]
    fn local_block_round_trip() {
        let entry = sample_entry("a.txt", 0, System::Unix);
        let block = entry.local_block().unwrap();
        let bytes = block.encode();
        let reread = LocalFileHeaderBlock::interpret(&bytes).unwrap();
        assert_eq!({ reread.crc32 }, entry.crc32);
        assert_eq!({ reread.compressed_size }, 4);
        assert_eq!({ reread.file_name_length }, 5);
        assert_eq!({ reread.magic }, spec::LOCAL_FILE_HEADER_SIGNATURE);
    }

    #[test]
    fn local_header_mismatch_is_rejected() {
        let entry = sample_entry("a.txt", 0, System::Unix);
        let mut block = entry.local_block().unwrap();
        assert!(entry.validate_local_block(&block).is_ok());

        block.crc32 = 0xdeadbeef;
        assert!(entry.validate_local_block(&block).is_err());

        // Zeroed fields are deferred to a data descriptor, not a mismatch.
        block.crc32 = 0;
        block.compressed_size = 0;
        block.uncompressed_size = 0;
        assert!(entry.validate_local_block(&block).is_ok());

        block.uncompressed_size = 5;
        assert!(entry.validate_local_block(&block).is_err());
    }

    #[test]
    fn root_name_is_not_enclosable() {
        let entry = sample_entry("/", 0x10, System::Dos);
        assert!(entry.is_dir());
        assert!(entry.enclosed_name().is_none());
    }

    #[test]
    fn enclosed_name_strips_nothing_from_clean_paths() {
        let entry = sample_entry("dir/sub/file.txt", 0, System::Unix);
        assert_eq!(
            entry.enclosed_name().unwrap(),
            PathBuf::from("dir/sub/file.txt")
        );

        let escape = sample_entry("../../etc/passwd", 0, System::Unix);
        assert!(escape.enclosed_name().is_none());
    }

    #[test]
    fn symlink_mode_detection() {
        let link = sample_entry("link", 0o120777 << 16, System::Unix);
        assert!(link.is_symlink());
        let file = sample_entry("file", 0o100644 << 16, System::Unix);
        assert!(!file.is_symlink());
        // MS-DOS attributes cannot mark symlinks.
        let dos = sample_entry("file", 0x01, System::Dos);
        assert!(!dos.is_symlink());
    }
}
