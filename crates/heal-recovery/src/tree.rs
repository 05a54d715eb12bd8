use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Walk limit for locating a data root inside a restored tree. restic nests
/// the source under its absolute path, so real trees rarely exceed a handful.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Finds the directory called `name` below `root`.
///
/// The deepest match wins. Among matches at the same depth the first one in
/// file-name order is taken, so the result does not depend on directory
/// listing order. `root` itself is never a match.
pub fn find_data_root(root: &Path, name: &str, max_depth: usize) -> Option<PathBuf> {
    let mut best: Option<(usize, PathBuf)> = None;
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() || entry.file_name() != name {
            continue;
        }
        let depth = entry.depth();
        if best.as_ref().map_or(true, |(d, _)| depth > *d) {
            best = Some((depth, entry.into_path()));
        }
    }
    best.map(|(_, p)| p)
}
