//! Name resolution inside the shared files directory.

use std::path::{Component, Path, PathBuf};

/// Resolve a bare file name inside `base`.
///
/// Names containing directories, `..` or an absolute root are rejected, as is
/// anything that canonicalizes outside `base` (a symlink pointing elsewhere).
pub(crate) fn resolve_file(base: &Path, file_name: &str) -> Result<PathBuf, String> {
    let name = file_name.trim();
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(format!("Invalid file name '{file_name}'")),
    }

    let path = base.join(name);
    if !path.is_file() {
        return Err(format!("File {name} not found"));
    }

    let canonical_base = base.canonicalize().map_err(|e| e.to_string())?;
    let canonical = path.canonicalize().map_err(|e| e.to_string())?;
    if !canonical.starts_with(&canonical_base) {
        return Err(format!("File {name} is outside the shared directory"));
    }
    Ok(canonical)
}
