#![allow(clippy::wrong_self_convention)]
#![macro_use]

use crate::result::{ZipError, ZipResult};
use memchr::memmem::FinderRev;
use std::io;
use std::io::prelude::*;
use std::mem;

pub type Magic = u32;

pub const LOCAL_FILE_HEADER_SIGNATURE: Magic = 0x04034b50;
pub const CENTRAL_DIRECTORY_HEADER_SIGNATURE: Magic = 0x02014b50;
pub(crate) const CENTRAL_DIRECTORY_END_SIGNATURE: Magic = 0x06054b50;

/// An end-of-central-directory record may be trailed by a comment of at most
/// `u16::MAX` bytes, so the signature can sit at most this far from the end of
/// the backing storage.
pub(crate) const END_MAX_COMMENT_DISTANCE: u64 =
    u16::MAX as u64 + mem::size_of::<CDEBlock>() as u64;

pub trait Block: Sized + Copy {
    fn interpret(bytes: &[u8]) -> ZipResult<Self>;

    fn deserialize(block: &[u8]) -> Self {
        assert_eq!(block.len(), mem::size_of::<Self>());
        let block_ptr: *const Self = block.as_ptr().cast();
        unsafe { block_ptr.read() }
    }

    fn parse<T: Read>(reader: &mut T) -> ZipResult<Self> {
        let mut block = vec![0u8; mem::size_of::<Self>()];
        reader.read_exact(&mut block)?;
        Self::interpret(&block)
    }

    fn encode(self) -> Box<[u8]>;

    fn serialize(self) -> Box<[u8]> {
        let mut out_block = vec![0u8; mem::size_of::<Self>()];
        let out_view: &mut [u8] = out_block.as_mut();
        let out_ptr: *mut Self = out_view.as_mut_ptr().cast();
        unsafe {
            out_ptr.write(self);
        }
        out_block.into_boxed_slice()
    }

    fn write<T: Write>(self, writer: &mut T) -> ZipResult<()> {
        let block = self.encode();
        writer.write_all(&block)?;
        Ok(())
    }
}

/// Convert all the fields of a struct *from* little-endian representations.
macro_rules! from_le {
    ($obj:ident, $field:ident, $type:ty) => {
        $obj.$field = <$type>::from_le($obj.$field);
    };
    ($obj:ident, [($field:ident, $type:ty) $(,)?]) => {
        from_le![$obj, $field, $type];
    };
    ($obj:ident, [($field:ident, $type:ty), $($rest:tt),+ $(,)?]) => {
        from_le![$obj, $field, $type];
        from_le!($obj, [$($rest),+]);
    };
}

/// Convert all the fields of a struct *into* little-endian representations.
macro_rules! to_le {
    ($obj:ident, $field:ident, $type:ty) => {
        $obj.$field = <$type>::to_le($obj.$field);
    };
    ($obj:ident, [($field:ident, $type:ty) $(,)?]) => {
        to_le![$obj, $field, $type];
    };
    ($obj:ident, [($field:ident, $type:ty), $($rest:tt),+ $(,)?]) => {
        to_le![$obj, $field, $type];
        to_le!($obj, [$($rest),+]);
    };
}

/// Reads the variable-length sections that trail a fixed-size record out of
/// `reader`, one requested run at a time.
///
/// Parsing call sites take any `FnMut(usize) -> ZipResult<Vec<u8>>`, so tests
/// can hand entry names straight to the parser without a backing stream.
pub(crate) fn reader_provider<T: Read>(
    reader: &mut T,
) -> impl FnMut(usize) -> ZipResult<Vec<u8>> + '_ {
    move |count: usize| {
        let mut data = vec![0u8; count];
        reader.read_exact(&mut data)?;
        Ok(data)
    }
}

#[derive(Copy, Clone, Debug)]
#[repr(packed)]
pub(crate) struct CDEBlock {
    pub magic: Magic,
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub number_of_files_on_this_disk: u16,
    pub number_of_files: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub zip_file_comment_length: u16,
}

impl CDEBlock {
    #[inline(always)]
    fn from_le(mut self) -> Self {
        from_le![
            self,
            [
                (magic, Magic),
                (disk_number, u16),
                (disk_with_central_directory, u16),
                (number_of_files_on_this_disk, u16),
                (number_of_files, u16),
                (central_directory_size, u32),
                (central_directory_offset, u32),
                (zip_file_comment_length, u16)
            ]
        ];
        self
    }

    #[inline(always)]
    fn to_le(mut self) -> Self {
        to_le![
            self,
            [
                (magic, Magic),
                (disk_number, u16),
                (disk_with_central_directory, u16),
                (number_of_files_on_this_disk, u16),
                (number_of_files, u16),
                (central_directory_size, u32),
                (central_directory_offset, u32),
                (zip_file_comment_length, u16)
            ]
        ];
        self
    }
}

impl Block for CDEBlock {
    fn interpret(bytes: &[u8]) -> ZipResult<Self> {
        let block = Self::deserialize(bytes).from_le();

        if block.magic != CENTRAL_DIRECTORY_END_SIGNATURE {
            return Err(ZipError::InvalidArchive(
                "Invalid end of central directory signature",
            ));
        }

        Ok(block)
    }

    fn encode(self) -> Box<[u8]> {
        self.to_le().serialize()
    }
}

/// The end-of-central-directory record, plus its trailing archive comment.
#[derive(Debug)]
pub(crate) struct CentralDirectoryEnd {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub number_of_files_on_this_disk: u16,
    pub number_of_files: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub zip_file_comment: Vec<u8>,
}

impl CentralDirectoryEnd {
    fn block_and_comment(self) -> (CDEBlock, Vec<u8>) {
        let Self {
            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
            zip_file_comment,
        } = self;
        let block = CDEBlock {
            magic: CENTRAL_DIRECTORY_END_SIGNATURE,

            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
            zip_file_comment_length: zip_file_comment.len().try_into().unwrap_or(u16::MAX),
        };
        (block, zip_file_comment)
    }

    pub(crate) fn parse<T: Read>(reader: &mut T) -> ZipResult<CentralDirectoryEnd> {
        let CDEBlock {
            // magic,
            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
            zip_file_comment_length,
            ..
        } = CDEBlock::parse(reader)?;

        let mut provider = reader_provider(reader);
        let zip_file_comment = provider(zip_file_comment_length as usize)?;

        Ok(CentralDirectoryEnd {
            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
            zip_file_comment,
        })
    }

    /// Locates the end-of-central-directory record by scanning a bounded
    /// trailing window backwards for its signature.
    ///
    /// The record may be preceded by an archive comment, so the signature is
    /// not necessarily the last record-sized run of the storage; the scan
    /// covers at most the comment-length bound.
    pub(crate) fn find_and_parse<T: Read + Seek>(
        reader: &mut T,
    ) -> ZipResult<(CentralDirectoryEnd, u64)> {
        let file_length = reader.seek(io::SeekFrom::End(0))?;

        if file_length < mem::size_of::<CDEBlock>() as u64 {
            return Err(ZipError::InvalidArchive("Invalid zip header"));
        }

        let search_lower_bound = file_length.saturating_sub(END_MAX_COMMENT_DISTANCE);

        const END_WINDOW_SIZE: usize = 512;

        let sig_bytes = CENTRAL_DIRECTORY_END_SIGNATURE.to_le_bytes();
        let finder = FinderRev::new(&sig_bytes);

        let mut window_start: u64 = file_length
            .saturating_sub(END_WINDOW_SIZE as u64)
            .max(search_lower_bound);
        let mut window = [0u8; END_WINDOW_SIZE];
        loop {
            /* Go to the start of the window in the file. */
            reader.seek(io::SeekFrom::Start(window_start))?;

            /* Identify how many bytes to read (this may be less than the window size for files
             * smaller than END_WINDOW_SIZE). */
            let end = (window_start + END_WINDOW_SIZE as u64).min(file_length);
            let cur_len = (end - window_start) as usize;
            debug_assert!(cur_len <= END_WINDOW_SIZE);
            let cur_window: &mut [u8] = &mut window[..cur_len];
            /* Read the window into the bytes! */
            reader.read_exact(cur_window)?;

            /* Find instances of the magic signature. */
            for offset in finder.rfind_iter(cur_window) {
                let cde_start_pos = window_start + offset as u64;
                reader.seek(io::SeekFrom::Start(cde_start_pos))?;
                if let Ok(cde) = Self::parse(reader) {
                    return Ok((cde, cde_start_pos));
                }
            }
            if window_start == search_lower_bound {
                break;
            }
            debug_assert!(END_WINDOW_SIZE > mem::size_of_val(&CENTRAL_DIRECTORY_END_SIGNATURE));
            /* Shift the window down, overlapping by a signature's width so one
             * straddling a window boundary is still seen. */
            window_start = window_start
                .saturating_sub(
                    END_WINDOW_SIZE as u64
                        - mem::size_of_val(&CENTRAL_DIRECTORY_END_SIGNATURE) as u64,
                )
                .max(search_lower_bound);
        }

        Err(ZipError::InvalidArchive(
            "Could not find central directory end",
        ))
    }

    pub(crate) fn write<T: Write>(self, writer: &mut T) -> ZipResult<()> {
        let (block, comment) = self.block_and_comment();
        block.write(writer)?;
        writer.write_all(&comment)?;
        Ok(())
    }
}
