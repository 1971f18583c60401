//! A library for reading and writing ZIP archives with faithful host
//! filesystem metadata.
//!
//! Beyond the usual create/read/append operations, the crate bridges ZIP's
//! on-disk metadata (MS-DOS timestamps, per-system external attribute
//! layouts) to host filesystem metadata (POSIX permissions, modification
//! times, symlink targets) in both directions, with deterministic fallbacks
//! where archives carry no usable bits.
//!
//! | Feature flag | Effect |
//! |--|--|
//! | `deflate` (default) | Deflate support through flate2's zlib-rs backend |
//! | `deflate-flate2` | Deflate support with a caller-chosen flate2 backend |

mod spec;

pub mod attributes;
pub mod compression;
mod crc32;
mod path;
pub mod read;
pub mod result;
pub mod types;
pub mod write;

pub use crate::attributes::{
    permissions_for, set_attributes, set_symlink_attributes, EntryType, FileAttributes,
    SetAttributes,
};
pub use crate::compression::CompressionMethod;
pub use crate::read::ZipArchive;
pub use crate::result::ZipError;
pub use crate::types::{DateTime, EntryData, System};
pub use crate::write::{EntryOptions, ZipWriter};
