//! Path manipulation utilities

use std::borrow::Cow;
use std::path::{Component, Path};

/// Converts a host path to the name format ZIP stores: forward-slash
/// delimited, relative, with parent-directory components folded away.
pub(crate) fn path_to_string<T: AsRef<Path>>(path: T) -> String {
    let mut normalized_components = Vec::new();

    for component in path.as_ref().components() {
        match component {
            Component::Normal(os_str) => match os_str.to_str() {
                Some(valid_str) => normalized_components.push(Cow::Borrowed(valid_str)),
                None => normalized_components.push(os_str.to_string_lossy()),
            },
            Component::ParentDir => {
                normalized_components.pop();
            }
            _ => (),
        }
    }
    normalized_components.join("/")
}
