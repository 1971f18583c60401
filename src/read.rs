//! Types for reading ZIP archives

use crate::attributes::{EntryType, FileAttributes};
use crate::compression::CompressionMethod;
use crate::crc32::Crc32Reader;
use crate::result::{ZipError, ZipResult};
use crate::spec::{self, Block, CentralDirectoryEnd};
use crate::types::{CentralDirectoryBlock, EntryData, LocalFileHeaderBlock};
use filetime::FileTime;
use indexmap::IndexMap;
use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "_deflate-any")]
use flate2::read::DeflateDecoder;

// Put the struct declaration in a private module to convince rustdoc to display ZipArchive nicely
pub(crate) mod zip_archive {
    use indexmap::IndexMap;
    use std::sync::Arc;

    /// Extract immutable data from `ZipArchive` to make it cheap to clone
    #[derive(Debug)]
    pub(crate) struct Shared {
        pub(crate) files: IndexMap<Box<str>, super::EntryData>,
        pub(crate) offset: u64,
        pub(crate) dir_start: u64,
    }

    /// ZIP archive reader
    ///
    /// The central directory is parsed eagerly when the archive is opened;
    /// afterwards the entry sequence is immutable, so a read-only archive can
    /// be shared freely once parsing is done.
    ///
    /// ```no_run
    /// use std::io::prelude::*;
    /// fn list_zip_contents(reader: impl Read + Seek) -> zipbridge::result::ZipResult<()> {
    ///     let mut zip = zipbridge::ZipArchive::new(reader)?;
    ///
    ///     for i in 0..zip.len() {
    ///         let mut file = zip.by_index(i)?;
    ///         println!("Filename: {}", file.name());
    ///         std::io::copy(&mut file, &mut std::io::stdout())?;
    ///     }
    ///
    ///     Ok(())
    /// }
    /// ```
    #[derive(Clone, Debug)]
    pub struct ZipArchive<R> {
        pub(crate) reader: R,
        pub(crate) shared: Arc<Shared>,
        pub(crate) comment: Arc<[u8]>,
    }
}

pub use zip_archive::ZipArchive;
use zip_archive::Shared;

/// Parses the central directory and validates every entry's local header
/// against its central record.
///
/// Returns the shared entry table and the archive comment. Used for both
/// read-mode opens and append-mode opens, which must both see a well-formed
/// directory before touching anything.
pub(crate) fn read_shared<R: Read + Seek>(reader: &mut R) -> ZipResult<(Shared, Vec<u8>)> {
    let (footer, cde_start_pos) = CentralDirectoryEnd::find_and_parse(reader)?;

    if footer.disk_number != footer.disk_with_central_directory
        || footer.number_of_files != footer.number_of_files_on_this_disk
    {
        return Err(ZipError::UnsupportedArchive(
            "Support for multi-disk files is not implemented",
        ));
    }

    /* The stated directory offset is relative to the start of the zip data,
     * which may have arbitrary bytes prepended to it. The signature position
     * pins down where the directory actually ended up. */
    let archive_offset = cde_start_pos
        .checked_sub(footer.central_directory_size as u64)
        .and_then(|x| x.checked_sub(footer.central_directory_offset as u64))
        .ok_or(ZipError::InvalidArchive(
            "Invalid central directory size or offset",
        ))?;
    let directory_start = footer.central_directory_offset as u64 + archive_offset;

    let number_of_files = footer.number_of_files as usize;
    // If the parsed number of files is greater than the offset then
    // something fishy is going on and we shouldn't trust number_of_files.
    let file_capacity = if number_of_files > directory_start as usize {
        0
    } else {
        number_of_files
    };

    let mut files = IndexMap::with_capacity(file_capacity);
    reader.seek(SeekFrom::Start(directory_start))?;
    for _ in 0..number_of_files {
        let central_header_start = reader.stream_position()?;
        let block = CentralDirectoryBlock::parse(reader)?;
        let mut entry =
            EntryData::from_central_block(block, central_header_start, spec::reader_provider(reader))?;
        entry.header_start += archive_offset;
        files.insert(entry.file_name.clone(), entry);
    }

    /* Pair every central record with its local header. Anything inconsistent
     * fails the open; an entry is only ever constructed from a validated
     * pair. */
    for entry in files.values_mut() {
        reader.seek(SeekFrom::Start(entry.header_start))?;
        let local = LocalFileHeaderBlock::parse(reader)?;
        entry.validate_local_block(&local)?;
        let variable_fields_len =
            local.file_name_length as u64 + local.extra_field_length as u64;
        entry.data_start =
            entry.header_start + size_of::<LocalFileHeaderBlock>() as u64 + variable_fields_len;
    }

    Ok((
        Shared {
            files,
            offset: archive_offset,
            dir_start: directory_start,
        },
        footer.zip_file_comment,
    ))
}

impl<R> ZipArchive<R> {
    /// Number of files contained in this zip.
    pub fn len(&self) -> usize {
        self.shared.files.len()
    }

    /// Whether this zip archive contains no files
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the offset from the beginning of the underlying reader that this zip begins at, in bytes.
    ///
    /// Normally this value is zero, but if the zip has arbitrary data prepended to it, then this value will be the size
    /// of that prepended data.
    pub fn offset(&self) -> u64 {
        self.shared.offset
    }

    /// Get the comment of the zip archive.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Returns an iterator over all the file and directory names in this archive.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.shared.files.keys().map(|s| s.as_ref())
    }

    /// Looks up an entry by its stored path.
    ///
    /// Matching is byte-for-byte: a directory entry is only found under its
    /// trailing-slash name.
    pub fn entry(&self, name: &str) -> Option<&EntryData> {
        self.shared.files.get(name)
    }

    /// Entry metadata by position in central directory order.
    pub fn entry_by_index(&self, index: usize) -> Option<&EntryData> {
        self.shared.files.get_index(index).map(|(_, data)| data)
    }

    /// Host-facing attributes of a stored entry, derived through the
    /// attribute bridge.
    pub fn file_attributes(&self, name: &str) -> Option<FileAttributes> {
        self.entry(name).map(FileAttributes::from_entry)
    }

    /// Get the index of a file entry by name, if it's present.
    #[inline(always)]
    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        self.shared.files.get_index_of(name)
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Read a ZIP archive, collecting the files it contains.
    ///
    /// The backing storage must already contain a well-formed
    /// end-of-central-directory record within the trailing comment window.
    pub fn new(mut reader: R) -> ZipResult<ZipArchive<R>> {
        reader.seek(SeekFrom::Start(0))?;
        let (shared, comment) = read_shared(&mut reader)?;
        Ok(ZipArchive {
            reader,
            shared: Arc::new(shared),
            comment: comment.into(),
        })
    }

    /// Search for a file entry by name and return a reader for its data.
    pub fn by_name(&mut self, name: &str) -> ZipResult<ZipFile<'_, R>> {
        let index = self
            .index_for_name(name)
            .ok_or(ZipError::FileNotFound)?;
        self.by_index(index)
    }

    /// Get a contained file by index
    pub fn by_index(&mut self, file_number: usize) -> ZipResult<ZipFile<'_, R>> {
        let Self { reader, shared, .. } = self;
        let (_, data) = shared
            .files
            .get_index(file_number)
            .ok_or(ZipError::FileNotFound)?;

        if data.encrypted {
            return Err(ZipError::UnsupportedArchive(
                "Encrypted files are not supported",
            ));
        }

        reader.seek(SeekFrom::Start(data.data_start))?;
        let limit_reader = reader.take(data.compressed_size);

        let reader = match data.compression_method {
            CompressionMethod::Stored => {
                EntryReader::Stored(Crc32Reader::new(limit_reader, data.crc32))
            }
            #[cfg(feature = "_deflate-any")]
            CompressionMethod::Deflated => EntryReader::Deflated(Crc32Reader::new(
                DeflateDecoder::new(limit_reader),
                data.crc32,
            )),
            _ => {
                return Err(ZipError::UnsupportedArchive(
                    "Compression method not supported",
                ))
            }
        };
        Ok(ZipFile { data, reader })
    }

    /// Extract a Zip archive into a directory, overwriting files if they
    /// already exist. Paths are sanitized with [`EntryData::enclosed_name`].
    ///
    /// Extraction is not atomic. If an error is encountered, some of the files
    /// may be left on disk.
    ///
    /// Stored metadata is carried back onto the host through the attribute
    /// bridge: POSIX modes are applied children-first once all data is on
    /// disk, and modification times afterwards so parent directories keep the
    /// stored stamp.
    pub fn extract<P: AsRef<Path>>(&mut self, directory: P) -> ZipResult<()> {
        let directory = directory.as_ref();
        let mut deferred = Vec::with_capacity(self.len());

        for i in 0..self.len() {
            let mut file = self.by_index(i)?;
            let filepath = file
                .data
                .enclosed_name()
                .ok_or(ZipError::InvalidArchive("Invalid file path"))?;
            let outpath = directory.join(filepath);
            let attributes = FileAttributes::from_entry(file.data);

            if file.data.is_dir() {
                make_writable_dir_all(&outpath)?;
                deferred.push((outpath, attributes));
                continue;
            }

            if let Some(p) = outpath.parent() {
                make_writable_dir_all(p)?;
            }

            if file.data.is_symlink() {
                let mut target = Vec::with_capacity(file.data.uncompressed_size as usize);
                file.read_to_end(&mut target)?;
                drop(file);
                materialize_symlink(&target, &outpath)?;
                deferred.push((outpath, attributes));
                continue;
            }

            let mut outfile = fs::File::create(&outpath)?;
            io::copy(&mut file, &mut outfile)?;
            deferred.push((outpath, attributes));
        }

        // Ensure we update children's permissions before making a parent unwritable
        if deferred.len() > 1 {
            use std::cmp::Reverse;
            deferred.sort_by_key(|(path, _)| Reverse(path.clone()));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            for (path, attributes) in &deferred {
                if attributes.file_type == EntryType::Symlink {
                    continue;
                }
                fs::set_permissions(
                    path,
                    fs::Permissions::from_mode(attributes.posix_permissions.into()),
                )?;
            }
        }
        for (path, attributes) in &deferred {
            apply_mtime(path, attributes);
        }
        Ok(())
    }

    /// Extracts a single entry to `destination`, applying its attributes
    /// through the bridge.
    ///
    /// `destination` is the exact host path to create, not a directory to
    /// extract into. Lookup is byte-exact, as with [`ZipArchive::entry`].
    pub fn extract_entry<P: AsRef<Path>>(&mut self, name: &str, destination: P) -> ZipResult<()> {
        let destination = destination.as_ref();
        let index = self.index_for_name(name).ok_or(ZipError::FileNotFound)?;
        let mut file = self.by_index(index)?;
        let attributes = file.attributes();

        if file.data.is_dir() {
            fs::create_dir_all(destination)?;
        } else if file.data.is_symlink() {
            let mut target = Vec::with_capacity(file.data.uncompressed_size as usize);
            file.read_to_end(&mut target)?;
            materialize_symlink(&target, destination)?;
        } else {
            if let Some(p) = destination.parent() {
                fs::create_dir_all(p)?;
            }
            let mut outfile = fs::File::create(destination)?;
            io::copy(&mut file, &mut outfile)?;
        }

        #[cfg(unix)]
        if attributes.file_type != EntryType::Symlink {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                destination,
                fs::Permissions::from_mode(attributes.posix_permissions.into()),
            )?;
        }
        apply_mtime(destination, &attributes);
        Ok(())
    }
}

/// Writes a symlink target read out of an archive back to the host.
///
/// Platforms without symlinks get a regular file holding the target path in
/// UTF-8.
#[cfg(unix)]
fn materialize_symlink(target: &[u8], outpath: &Path) -> ZipResult<()> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    let target = OsString::from_vec(target.to_vec());
    if outpath.symlink_metadata().is_ok() {
        fs::remove_file(outpath)?;
    }
    std::os::unix::fs::symlink(&target, outpath)?;
    Ok(())
}

#[cfg(windows)]
fn materialize_symlink(target: &[u8], outpath: &Path) -> ZipResult<()> {
    let Ok(target) = std::str::from_utf8(target) else {
        return Err(ZipError::InvalidArchive("Invalid UTF-8 as symlink target"));
    };
    let target_is_dir = fs::metadata(target).map(|m| m.is_dir()).unwrap_or(false);
    if target_is_dir {
        std::os::windows::fs::symlink_dir(target, outpath)?;
    } else {
        std::os::windows::fs::symlink_file(target, outpath)?;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn materialize_symlink(target: &[u8], outpath: &Path) -> ZipResult<()> {
    fs::write(outpath, target)?;
    Ok(())
}

/// Best-effort modification-time transfer after extraction; a storage that
/// refuses is logged, not fatal.
fn apply_mtime(path: &Path, attributes: &FileAttributes) {
    let mtime = FileTime::from_system_time(attributes.modification_date);
    let result = if attributes.file_type == EntryType::Symlink {
        filetime::set_symlink_file_times(path, mtime, mtime)
    } else {
        filetime::set_file_mtime(path, mtime)
    };
    if let Err(e) = result {
        log::warn!(
            "Failed to set modification time on '{}': {}",
            path.display(),
            e
        );
    }
}

fn make_writable_dir_all<T: AsRef<Path>>(outpath: T) -> Result<(), ZipError> {
    fs::create_dir_all(outpath.as_ref())?;
    #[cfg(unix)]
    {
        // Dirs must be writable until all normal files are extracted
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(
            outpath.as_ref(),
            fs::Permissions::from_mode(
                0o700 | fs::metadata(outpath.as_ref())?.permissions().mode(),
            ),
        )?;
    }
    Ok(())
}

/// A single entry opened for reading. The data stream validates the stored
/// CRC32 when it reaches the end.
pub struct ZipFile<'a, R: Read> {
    pub(crate) data: &'a EntryData,
    reader: EntryReader<'a, R>,
}

enum EntryReader<'a, R: Read> {
    Stored(Crc32Reader<io::Take<&'a mut R>>),
    #[cfg(feature = "_deflate-any")]
    Deflated(Crc32Reader<DeflateDecoder<io::Take<&'a mut R>>>),
}

impl<R: Read> Read for ZipFile<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.reader {
            EntryReader::Stored(r) => r.read(buf),
            #[cfg(feature = "_deflate-any")]
            EntryReader::Deflated(r) => r.read(buf),
        }
    }
}

impl<R: Read> ZipFile<'_, R> {
    /// The stored name, exactly as recorded in the central directory.
    pub fn name(&self) -> &str {
        &self.data.file_name
    }

    /// Size of the file when extracted.
    pub fn size(&self) -> u64 {
        self.data.uncompressed_size
    }

    /// Size of the stored (possibly compressed) data.
    pub fn compressed_size(&self) -> u64 {
        self.data.compressed_size
    }

    /// CRC32 recorded for this entry.
    pub fn crc32(&self) -> u32 {
        self.data.crc32
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.data.is_dir()
    }

    /// Whether this entry is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.data.is_symlink()
    }

    /// The parsed entry metadata.
    pub fn data(&self) -> &EntryData {
        self.data
    }

    /// Host-facing attributes derived through the attribute bridge.
    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_entry(self.data)
    }
}

impl<R: Read> std::fmt::Debug for ZipFile<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipFile")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}
