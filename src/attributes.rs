//! Bridging between ZIP on-disk metadata and host filesystem metadata.
//!
//! ZIP stores timestamps as MS-DOS packed values and permission bits inside
//! the central directory's external attributes, whose layout depends on the
//! originating system. This module translates both directions: deriving
//! host-facing attributes from parsed entries, and gathering host metadata
//! when entries are created. Absent permission bits are never trusted as
//! zero; they fall back to deterministic defaults instead.

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use filetime::FileTime;

use crate::result::{ZipError, ZipResult};
use crate::types::{ffi, DateTime, EntryData, System};

/// Default mode applied to files when the archive carries no usable
/// permission bits.
pub const DEFAULT_FILE_PERMISSIONS: u16 = 0o644;

/// Default mode applied to directories when the archive carries no usable
/// permission bits.
pub const DEFAULT_DIRECTORY_PERMISSIONS: u16 = 0o755;

/// Classification of an entry for attribute derivation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

impl EntryType {
    /// Classifies a parsed entry.
    ///
    /// A trailing `/` in the stored name marks a directory even when the
    /// attribute bits disagree or are absent; Unix mode bits decide between
    /// files and symlinks.
    pub fn of(entry: &EntryData) -> EntryType {
        if entry.is_symlink() {
            return EntryType::Symlink;
        }
        if entry.is_dir() {
            return EntryType::Directory;
        }
        match entry.system {
            System::Unix => match entry.unix_mode().map(|mode| mode & ffi::S_IFMT) {
                Some(ffi::S_IFDIR) => EntryType::Directory,
                _ => EntryType::File,
            },
            // MS-DOS attribute bit 0x10 marks directories.
            _ => {
                if entry.external_attributes & 0x10 != 0 {
                    EntryType::Directory
                } else {
                    EntryType::File
                }
            }
        }
    }

    const fn default_permissions(self) -> u16 {
        match self {
            EntryType::Directory => DEFAULT_DIRECTORY_PERMISSIONS,
            EntryType::File | EntryType::Symlink => DEFAULT_FILE_PERMISSIONS,
        }
    }
}

/// Host-facing attributes derived from an entry through the bridge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileAttributes {
    /// POSIX permission bits, never zero.
    pub posix_permissions: u16,
    /// The entry's modification instant on the host clock.
    pub modification_date: SystemTime,
    /// What kind of filesystem object the entry describes.
    pub file_type: EntryType,
}

impl FileAttributes {
    /// Derives the attribute set of a parsed entry.
    ///
    /// Unix-origin entries carry their mode in the upper half of the
    /// external attributes; everything else falls back to the MS-DOS bits
    /// with conservative defaults.
    pub fn from_entry(entry: &EntryData) -> FileAttributes {
        let file_type = EntryType::of(entry);
        FileAttributes {
            posix_permissions: permissions_for(entry.external_attributes, entry.system, file_type),
            modification_date: entry.last_modified_time.to_system_time(),
            file_type,
        }
    }
}

/// Extracts POSIX permissions from a raw external-attribute value.
///
/// Deterministic and total: when the value carries no usable bits for the
/// given system the per-type default is returned, never zero.
pub fn permissions_for(value: u32, system: System, entry_type: EntryType) -> u16 {
    match system {
        System::Unix => {
            let mode = (value >> 16) as u16 & !(ffi::S_IFMT as u16);
            if mode != 0 {
                mode
            } else {
                entry_type.default_permissions()
            }
        }
        // MS-DOS and unrecognized origins: only the read-only bit carries
        // meaning; everything else comes from the defaults.
        _ => {
            let mut mode = entry_type.default_permissions();
            if value & 0x01 != 0 {
                mode &= 0o555;
            }
            mode
        }
    }
}

/// An attribute-set request. Callers state exactly the keys they intend to
/// transfer; a required key that is absent fails the request instead of
/// being defaulted.
#[derive(Copy, Clone, Debug, Default)]
pub struct SetAttributes {
    pub posix_permissions: Option<u16>,
    pub modification_date: Option<SystemTime>,
}

impl SetAttributes {
    fn validated(&self) -> ZipResult<(u16, SystemTime)> {
        let permissions = self
            .posix_permissions
            .ok_or(ZipError::MissingPermissionsAttribute)?;
        let modification_date = self
            .modification_date
            .ok_or(ZipError::MissingModificationDateAttribute)?;
        Ok((permissions, modification_date))
    }
}

/// Transfers permissions and modification date onto a filesystem object,
/// following symlinks.
pub fn set_attributes(path: &Path, attributes: &SetAttributes) -> ZipResult<()> {
    // Existence first: a missing target always surfaces as not-found, no
    // matter which keys the request carries.
    fs::metadata(path)?;
    let (permissions, modification_date) = attributes.validated()?;
    apply_permissions(path, permissions)?;
    filetime::set_file_mtime(path, FileTime::from_system_time(modification_date))?;
    Ok(())
}

/// Transfers permissions and modification date onto the symlink itself,
/// never its target.
///
/// Both keys are validated before anything is touched. Platforms that cannot
/// change a link's own permission bits surface the underlying OS error
/// untouched.
pub fn set_symlink_attributes(path: &Path, attributes: &SetAttributes) -> ZipResult<()> {
    fs::symlink_metadata(path)?;
    let (permissions, modification_date) = attributes.validated()?;
    apply_symlink_permissions(path, permissions)?;
    set_symlink_modification_date(path, modification_date)?;
    Ok(())
}

/// Sets a symlink's own modification date without traversing it.
pub fn set_symlink_modification_date(path: &Path, date: SystemTime) -> ZipResult<()> {
    // lstat so a dangling link is still addressable but a missing one fails.
    fs::symlink_metadata(path)?;
    let mtime = FileTime::from_system_time(date);
    filetime::set_symlink_file_times(path, mtime, mtime)?;
    Ok(())
}

/// The host modification instant of a filesystem object, without following
/// symlinks. Missing paths surface as not-found.
pub fn modification_date_for(path: &Path) -> ZipResult<SystemTime> {
    Ok(fs::symlink_metadata(path)?.modified()?)
}

/// The byte size of a filesystem object, without following symlinks.
pub fn size_for(path: &Path) -> ZipResult<u64> {
    Ok(fs::symlink_metadata(path)?.len())
}

/// Classifies a filesystem object, without following symlinks.
pub fn entry_type_for(path: &Path) -> ZipResult<EntryType> {
    let file_type = fs::symlink_metadata(path)?.file_type();
    if file_type.is_symlink() {
        Ok(EntryType::Symlink)
    } else if file_type.is_dir() {
        Ok(EntryType::Directory)
    } else {
        Ok(EntryType::File)
    }
}

/// Everything the writer needs to know about a host filesystem object to
/// record it faithfully.
#[derive(Copy, Clone, Debug)]
pub(crate) struct HostMetadata {
    pub entry_type: EntryType,
    pub external_attributes: u32,
    pub last_modified: DateTime,
}

impl HostMetadata {
    /// Gathers metadata for `path` via lstat, so symlinks describe
    /// themselves rather than their target.
    pub(crate) fn gather(path: &Path) -> ZipResult<HostMetadata> {
        let metadata = fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();
        let entry_type = if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        };
        let last_modified = metadata
            .modified()
            .map(DateTime::from_system_time)
            .unwrap_or_default();
        Ok(HostMetadata {
            entry_type,
            external_attributes: external_attributes_of(&metadata, entry_type),
            last_modified,
        })
    }
}

#[cfg(unix)]
fn external_attributes_of(metadata: &fs::Metadata, entry_type: EntryType) -> u32 {
    use std::os::unix::fs::MetadataExt;
    let dos_bits = if entry_type == EntryType::Directory {
        0x10
    } else {
        0
    };
    (metadata.mode() << 16) | dos_bits
}

#[cfg(not(unix))]
fn external_attributes_of(metadata: &fs::Metadata, entry_type: EntryType) -> u32 {
    let type_bits = match entry_type {
        EntryType::Directory => ffi::S_IFDIR,
        EntryType::Symlink => ffi::S_IFLNK,
        EntryType::File => ffi::S_IFREG,
    };
    let mode = if metadata.permissions().readonly() {
        u32::from(entry_type.default_permissions()) & 0o555
    } else {
        u32::from(entry_type.default_permissions())
    };
    let dos_bits = if entry_type == EntryType::Directory {
        0x10
    } else {
        0
    };
    ((type_bits | mode) << 16) | dos_bits
}

#[cfg(unix)]
fn apply_permissions(path: &Path, permissions: u16) -> ZipResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(permissions.into()))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(path: &Path, permissions: u16) -> ZipResult<()> {
    // Only the write bit has a host equivalent.
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(permissions & 0o200 == 0);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(unix)]
fn apply_symlink_permissions(path: &Path, permissions: u16) -> ZipResult<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let rc = unsafe {
        libc::fchmodat(
            libc::AT_FDCWD,
            c_path.as_ptr(),
            libc::mode_t::from(permissions),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

#[cfg(not(unix))]
fn apply_symlink_permissions(_path: &Path, _permissions: u16) -> ZipResult<()> {
    Err(ZipError::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink permissions cannot be changed on this platform",
    )))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spec::Block;
    use crate::types::CentralDirectoryBlock;

    #[test]
    fn unix_mode_is_taken_from_the_upper_half() {
        assert_eq!(
            permissions_for(0o753 << 16, System::Unix, EntryType::File),
            0o753
        );
        // File-type bits are masked away.
        assert_eq!(
            permissions_for(0o100644 << 16, System::Unix, EntryType::File),
            0o644
        );
    }

    #[test]
    fn absent_bits_fall_back_to_defaults() {
        // 777 sits entirely in the low half, so a Unix interpretation sees
        // no mode bits at all.
        assert_eq!(
            permissions_for(777, System::Unix, EntryType::File),
            DEFAULT_FILE_PERMISSIONS
        );
        assert_eq!(
            permissions_for(0, System::Dos, EntryType::File),
            DEFAULT_FILE_PERMISSIONS
        );
        assert_eq!(
            permissions_for(0, System::Dos, EntryType::Directory),
            DEFAULT_DIRECTORY_PERMISSIONS
        );
        assert_eq!(
            permissions_for(0, System::Unknown, EntryType::Directory),
            DEFAULT_DIRECTORY_PERMISSIONS
        );
    }

    #[test]
    fn msdos_read_only_bit_strips_write_bits() {
        assert_eq!(permissions_for(0x01, System::Dos, EntryType::File), 0o444);
        assert_eq!(
            permissions_for(0x11, System::Dos, EntryType::Directory),
            0o555
        );
    }

    #[test]
    fn permissions_are_never_zero() {
        for system in [System::Dos, System::Unix, System::Unknown] {
            for entry_type in [EntryType::File, EntryType::Directory, EntryType::Symlink] {
                assert_ne!(permissions_for(0, system, entry_type), 0);
            }
        }
    }

    /// A central directory record captured from a real archive: unrecognized
    /// origin system byte, entry name `/`.
    #[test]
    fn root_directory_entry_gets_directory_defaults() {
        let cds_bytes: [u8; 46] = [
            0x50, 0x4b, 0x01, 0x02, 0x1e, 0x15, 0x14, 0x00, 0x08, 0x08, 0x08, 0x00, 0xab, 0x85,
            0x77, 0x47, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xb0, 0x11,
            0x00, 0x00, 0x00, 0x00,
        ];
        let block = CentralDirectoryBlock::interpret(&cds_bytes).unwrap();
        let entry = EntryData::from_central_block(block, 0, |count| {
            // The record asks for exactly the one-byte name and nothing else.
            let name = b"/";
            assert!(count == name.len() || count == 0);
            Ok(name[..count].to_vec())
        })
        .unwrap();

        assert_eq!(entry.system, System::Unknown);
        assert!(entry.is_dir());

        let attributes = FileAttributes::from_entry(&entry);
        assert_eq!(attributes.file_type, EntryType::Directory);
        assert_eq!(
            attributes.posix_permissions,
            DEFAULT_DIRECTORY_PERMISSIONS
        );
    }

    #[test]
    fn entry_classification_prefers_the_stored_name() {
        use crate::compression::CompressionMethod;
        use crate::types::DEFAULT_VERSION;

        let entry = EntryData {
            system: System::Dos,
            version_made_by: DEFAULT_VERSION,
            encrypted: false,
            using_data_descriptor: false,
            compression_method: CompressionMethod::Stored,
            last_modified_time: DateTime::default(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: "nested/dir/".into(),
            file_name_raw: b"nested/dir/".to_vec().into(),
            extra_field: Box::default(),
            file_comment: "".into(),
            header_start: 0,
            central_header_start: 0,
            data_start: 0,
            external_attributes: 0,
        };
        assert_eq!(EntryType::of(&entry), EntryType::Directory);
    }
}
