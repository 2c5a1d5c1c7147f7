//! Depth-first enumeration of the regular files below a root directory

use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// One item produced by [`walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkItem {
    /// A regular file to encrypt.
    File(PathBuf),
    /// A directory (or entry) that could not be read. The walk carries on
    /// with the rest of the tree.
    Unreadable { path: PathBuf, message: String },
}

/// Lazily walks `root`, yielding regular files only.
///
/// Symlinks are not followed and not yielded, nor are devices, sockets or
/// FIFOs. `exclude` prunes one subtree, which is how a destination root
/// nested inside the source root is kept out of the walk. Siblings are
/// visited in file-name order.
pub fn walk(root: &Path, exclude: Option<PathBuf>) -> impl Iterator<Item = WalkItem> + Send {
    let root_owned = root.to_path_buf();
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| exclude.as_deref() != Some(entry.path()))
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(WalkItem::File(entry.into_path())),
            Ok(_) => None,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root_owned.clone());
                warn!(path = %path.display(), "cannot read directory entry: {err}");
                Some(WalkItem::Unreadable {
                    path,
                    message: err.to_string(),
                })
            }
        })
}
