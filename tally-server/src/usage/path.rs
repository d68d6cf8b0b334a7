use std::path::{Path, PathBuf};

/// Expand a leading `~` into the current user's home directory.
///
/// When the home directory cannot be determined the input is returned
/// unchanged and callers end up relative to the working directory.
pub fn resolve_path(path: &str) -> PathBuf {
    match dirs::home_dir() {
        Some(home) => expand_home(path, &home),
        None => PathBuf::from(path),
    }
}

fn expand_home(path: &str, home: &Path) -> PathBuf {
    let Some(remainder) = path.strip_prefix('~') else {
        return PathBuf::from(path);
    };

    let remainder = remainder.trim_start_matches(['/', '\\']);
    if remainder.is_empty() {
        home.to_path_buf()
    } else {
        home.join(remainder)
    }
}
