//! Types for creating ZIP archives

use crate::attributes::HostMetadata;
use crate::compression::CompressionMethod;
use crate::path::path_to_string;
use crate::read::read_shared;
use crate::result::{ZipError, ZipResult};
use crate::spec::{Block, CentralDirectoryEnd};
use crate::types::{ffi, DateTime, EntryData, System, DEFAULT_VERSION};
use crc32fast::Hasher;
use indexmap::IndexMap;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;
use std::mem;
use std::path::Path;
use std::time::SystemTime;

#[cfg(feature = "_deflate-any")]
use flate2::{write::DeflateEncoder, Compression};

/// Per-entry settings chosen when an entry is started.
#[derive(Copy, Clone, Debug)]
pub struct EntryOptions {
    compression_method: CompressionMethod,
    last_modified_time: DateTime,
    permissions: Option<u32>,
}

impl Default for EntryOptions {
    /// Compression per the crate's default method, a timestamp of now, and
    /// permissions left to the per-type defaults.
    fn default() -> Self {
        EntryOptions {
            compression_method: CompressionMethod::default(),
            last_modified_time: DateTime::from_system_time(SystemTime::now()),
            permissions: None,
        }
    }
}

impl EntryOptions {
    /// Set the compression method for the new file
    #[must_use]
    pub const fn compression_method(mut self, method: CompressionMethod) -> EntryOptions {
        self.compression_method = method;
        self
    }

    /// Set the last modified time recorded for the new file
    #[must_use]
    pub const fn last_modified_time(mut self, mod_time: DateTime) -> EntryOptions {
        self.last_modified_time = mod_time;
        self
    }

    /// Set the permissions for the new file, low nine bits plus setuid-class
    /// bits; file-type bits are supplied by the writer.
    #[must_use]
    pub const fn unix_permissions(mut self, mode: u32) -> EntryOptions {
        self.permissions = Some(mode & 0o7777);
        self
    }
}

struct ZipWriterStats {
    hasher: Hasher,
    bytes_written: u64,
}

impl ZipWriterStats {
    fn new() -> Self {
        ZipWriterStats {
            hasher: Hasher::new(),
            bytes_written: 0,
        }
    }

    fn update(&mut self, buf: &[u8]) {
        self.hasher.update(buf);
        self.bytes_written += buf.len() as u64;
    }
}

enum InnerWriter<W: Write + Seek> {
    Closed,
    Storer(W),
    #[cfg(feature = "_deflate-any")]
    Deflater(DeflateEncoder<W>),
}

impl<W: Write + Seek> InnerWriter<W> {
    /// Flushes whatever encoder is active and re-wraps the bare writer for
    /// `method`.
    fn switch_to(&mut self, method: CompressionMethod) -> ZipResult<()> {
        let bare = match mem::replace(self, InnerWriter::Closed) {
            InnerWriter::Storer(w) => w,
            #[cfg(feature = "_deflate-any")]
            InnerWriter::Deflater(e) => e.finish()?,
            InnerWriter::Closed => {
                return Err(io::Error::other("ZipWriter was already closed").into())
            }
        };
        *self = match method {
            CompressionMethod::Stored => InnerWriter::Storer(bare),
            #[cfg(feature = "_deflate-any")]
            CompressionMethod::Deflated => {
                InnerWriter::Deflater(DeflateEncoder::new(bare, Compression::default()))
            }
            _ => {
                return Err(ZipError::UnsupportedArchive(
                    "Compression method not supported",
                ))
            }
        };
        Ok(())
    }

    fn current(&mut self) -> ZipResult<&mut dyn Write> {
        match self {
            InnerWriter::Storer(w) => Ok(w),
            #[cfg(feature = "_deflate-any")]
            InnerWriter::Deflater(e) => Ok(e),
            InnerWriter::Closed => Err(io::Error::other("ZipWriter was already closed").into()),
        }
    }

    /// The bare writer; only meaningful between entries, when no encoder is
    /// active.
    fn get_plain(&mut self) -> ZipResult<&mut W> {
        match self {
            InnerWriter::Storer(w) => Ok(w),
            _ => Err(io::Error::other("ZipWriter is in an inconsistent state").into()),
        }
    }

    const fn is_closed(&self) -> bool {
        matches!(self, InnerWriter::Closed)
    }
}

/// ZIP archive generator
///
/// Handles the bookkeeping involved in building an archive: local file
/// headers are written as entries are started and patched once their data has
/// been streamed, and the whole central directory is rewritten when the
/// writer finishes.
///
/// ```no_run
/// # fn doit() -> zipbridge::result::ZipResult<()> {
/// use std::io::Write;
/// use zipbridge::write::{EntryOptions, ZipWriter};
///
/// let file = std::fs::File::create("example.zip")?;
/// let mut zip = ZipWriter::new(file);
///
/// zip.start_file("hello_world.txt", EntryOptions::default())?;
/// zip.write_all(b"Hello, World!")?;
/// zip.finish()?;
/// # Ok(())
/// # }
/// ```
pub struct ZipWriter<W: Write + Seek> {
    inner: InnerWriter<W>,
    files: IndexMap<Box<str>, EntryData>,
    stats: ZipWriterStats,
    pending: Option<EntryData>,
    comment: Vec<u8>,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Initializes a new archive on an empty backing storage (create mode).
    ///
    /// The caller supplies the storage already truncated, e.g. via
    /// [`fs::File::create`].
    pub fn new(inner: W) -> ZipWriter<W> {
        ZipWriter {
            inner: InnerWriter::Storer(inner),
            files: IndexMap::new(),
            stats: ZipWriterStats::new(),
            pending: None,
            comment: Vec::new(),
        }
    }

    /// Opens an existing archive for appending (update mode).
    ///
    /// The storage must already hold a well-formed archive: the central
    /// directory is parsed and validated exactly as an open-for-read would,
    /// then the write cursor is parked where the central directory begins so
    /// new entries overwrite it. The directory is written back out on
    /// [`ZipWriter::finish`].
    pub fn new_append(mut readwriter: W) -> ZipResult<ZipWriter<W>>
    where
        W: Read,
    {
        readwriter.seek(SeekFrom::Start(0))?;
        let (shared, comment) = read_shared(&mut readwriter)?;
        readwriter.seek(SeekFrom::Start(shared.dir_start))?;
        Ok(ZipWriter {
            inner: InnerWriter::Storer(readwriter),
            files: shared.files,
            stats: ZipWriterStats::new(),
            pending: None,
            comment,
        })
    }

    /// Set the archive comment, written with the end-of-central-directory
    /// record.
    pub fn set_comment<S: Into<Box<str>>>(&mut self, comment: S) {
        self.comment = comment.into().into_boxed_bytes().into_vec();
    }

    /// Begins a new file entry; the data is whatever is written to `self`
    /// before the next entry starts.
    pub fn start_file<S: Into<Box<str>>>(
        &mut self,
        name: S,
        options: EntryOptions,
    ) -> ZipResult<()> {
        let permissions = options.permissions.unwrap_or(0o644);
        let external_attributes = (ffi::S_IFREG | permissions) << 16;
        self.start_entry(name.into(), &options, external_attributes)?;
        self.inner.switch_to(options.compression_method)?;
        Ok(())
    }

    /// Adds a directory entry: zero size, trailing `/` in the stored name,
    /// directory attribute bits.
    pub fn add_directory<S: Into<Box<str>>>(
        &mut self,
        name: S,
        options: EntryOptions,
    ) -> ZipResult<()> {
        let mut name: String = name.into().into();
        if !name.ends_with('/') {
            name.push('/');
        }
        let permissions = options.permissions.unwrap_or(0o755);
        let external_attributes = ((ffi::S_IFDIR | permissions) << 16) | 0x10;
        let options = options.compression_method(CompressionMethod::Stored);
        self.start_entry(name.into_boxed_str(), &options, external_attributes)?;
        self.finish_file()?;
        Ok(())
    }

    /// Adds a symlink entry whose stored data is the target path.
    ///
    /// The target is recorded verbatim and never resolved.
    pub fn add_symlink<N: Into<Box<str>>, T: Into<Box<str>>>(
        &mut self,
        name: N,
        target: T,
        options: EntryOptions,
    ) -> ZipResult<()> {
        let target: Box<str> = target.into();
        let permissions = options.permissions.unwrap_or(0o777);
        let external_attributes = (ffi::S_IFLNK | permissions) << 16;
        let options = options.compression_method(CompressionMethod::Stored);
        self.start_entry(name.into(), &options, external_attributes)?;
        self.write_all(target.as_bytes())?;
        self.finish_file()?;
        Ok(())
    }

    /// Records the filesystem object at `base_directory`/`relative_path`
    /// under the name `relative_path`, carrying its host metadata through
    /// the attribute bridge.
    ///
    /// Symlinks are recorded as themselves (their target string), never
    /// followed.
    pub fn add_path(
        &mut self,
        relative_path: impl AsRef<Path>,
        base_directory: impl AsRef<Path>,
    ) -> ZipResult<()> {
        self.add_path_with_options(relative_path, base_directory, EntryOptions::default())
    }

    /// [`ZipWriter::add_path`] with an explicit compression choice. The
    /// entry's timestamp and permissions always come from the filesystem.
    pub fn add_path_with_options(
        &mut self,
        relative_path: impl AsRef<Path>,
        base_directory: impl AsRef<Path>,
        options: EntryOptions,
    ) -> ZipResult<()> {
        use crate::attributes::EntryType;

        let full_path = base_directory.as_ref().join(relative_path.as_ref());
        let metadata = HostMetadata::gather(&full_path)?;
        let name = path_to_string(relative_path.as_ref());
        let options = options.last_modified_time(metadata.last_modified);

        match metadata.entry_type {
            EntryType::Directory => {
                let mut name = name;
                if !name.ends_with('/') {
                    name.push('/');
                }
                self.start_entry(
                    name.into_boxed_str(),
                    &options.compression_method(CompressionMethod::Stored),
                    metadata.external_attributes,
                )?;
                self.finish_file()
            }
            EntryType::Symlink => {
                let target = fs::read_link(&full_path)?;
                let target: Box<str> = target.to_string_lossy().into();
                self.start_entry(
                    name.into_boxed_str(),
                    &options.compression_method(CompressionMethod::Stored),
                    metadata.external_attributes,
                )?;
                self.write_all(target.as_bytes())?;
                self.finish_file()
            }
            EntryType::File => {
                self.start_entry(
                    name.into_boxed_str(),
                    &options,
                    metadata.external_attributes,
                )?;
                self.inner.switch_to(options.compression_method)?;
                // Scoped: the handle is released whether or not the copy
                // completes.
                let mut file = fs::File::open(&full_path)?;
                io::copy(&mut file, self)?;
                Ok(())
            }
        }
    }

    /// Writes the local header for a new entry and makes it pending.
    fn start_entry(
        &mut self,
        name: Box<str>,
        options: &EntryOptions,
        external_attributes: u32,
    ) -> ZipResult<()> {
        self.finish_file()?;

        if self.files.contains_key(&name) {
            return Err(ZipError::InvalidArchive("Duplicate filename"));
        }

        let writer = self.inner.get_plain()?;
        let header_start = writer.stream_position()?;

        let entry = EntryData {
            system: System::Unix,
            version_made_by: DEFAULT_VERSION,
            encrypted: false,
            using_data_descriptor: false,
            compression_method: options.compression_method,
            last_modified_time: options.last_modified_time,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name_raw: name.as_bytes().into(),
            file_name: name,
            extra_field: Box::default(),
            file_comment: "".into(),
            header_start,
            central_header_start: 0,
            data_start: 0,
            external_attributes,
        };

        entry.local_block()?.write(writer)?;
        writer.write_all(&entry.file_name_raw)?;
        let data_start = writer.stream_position()?;

        self.stats = ZipWriterStats::new();
        self.pending = Some(EntryData {
            data_start,
            ..entry
        });
        Ok(())
    }

    /// Completes the pending entry: flushes its encoder, patches the local
    /// header with the now-known CRC and sizes, and commits it to the entry
    /// table. No-op when nothing is pending.
    fn finish_file(&mut self) -> ZipResult<()> {
        let Some(mut entry) = self.pending.take() else {
            return Ok(());
        };

        self.inner.switch_to(CompressionMethod::Stored)?;
        let writer = self.inner.get_plain()?;
        let file_end = writer.stream_position()?;

        entry.crc32 = mem::replace(&mut self.stats.hasher, Hasher::new()).finalize();
        entry.uncompressed_size = self.stats.bytes_written;
        entry.compressed_size = file_end - entry.data_start;

        writer.seek(SeekFrom::Start(entry.header_start))?;
        entry.local_block()?.write(writer)?;
        writer.seek(SeekFrom::Start(file_end))?;

        self.files.insert(entry.file_name.clone(), entry);
        Ok(())
    }

    /// Writes the central directory and the end-of-central-directory record.
    fn finalize(&mut self) -> ZipResult<()> {
        self.finish_file()?;

        let writer = self.inner.get_plain()?;
        let central_start = writer.stream_position()?;
        for entry in self.files.values() {
            entry.central_block()?.write(writer)?;
            writer.write_all(&entry.file_name_raw)?;
            writer.write_all(&entry.extra_field)?;
            writer.write_all(entry.file_comment.as_bytes())?;
        }
        let central_size = writer.stream_position()? - central_start;

        let number_of_files: u16 = self
            .files
            .len()
            .try_into()
            .map_err(|_| ZipError::UnsupportedArchive("Archive holds too many entries"))?;
        let footer = CentralDirectoryEnd {
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: number_of_files,
            number_of_files,
            central_directory_size: central_size
                .try_into()
                .map_err(|_| ZipError::UnsupportedArchive("Central directory is too large"))?,
            central_directory_offset: central_start
                .try_into()
                .map_err(|_| ZipError::UnsupportedArchive("Archive is too large to store"))?,
            zip_file_comment: self.comment.clone(),
        };
        footer.write(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Finalizes the archive and returns the backing storage.
    pub fn finish(mut self) -> ZipResult<W> {
        self.finalize()?;
        match mem::replace(&mut self.inner, InnerWriter::Closed) {
            InnerWriter::Storer(w) => Ok(w),
            _ => Err(io::Error::other("ZipWriter is in an inconsistent state").into()),
        }
    }
}

impl<W: Write + Seek> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pending.is_none() {
            return Err(io::Error::other("No file has been started"));
        }
        let count = self.inner.current()?.write(buf)?;
        self.stats.update(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.inner.current()?.flush()?)
    }
}

impl<W: Write + Seek> Drop for ZipWriter<W> {
    fn drop(&mut self) {
        if !self.inner.is_closed() {
            if let Err(e) = self.finalize() {
                log::warn!("ZipWriter drop failed: {e}");
            }
        }
    }
}

impl<W: Write + Seek> std::fmt::Debug for ZipWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipWriter")
            .field("files", &self.files)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}
