//! Target name canonicalization.
//!
//! Targets are named by paths relative to the project root.  The same file
//! may be spelled many ways by build scripts ("./foo", "sub/../foo",
//! "/abs/root/foo"), and all spellings must map to one name so that the
//! store sees one target.

use std::path::Path;

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar" and "foo/../bar" => "bar".
/// Leading ".." components that can't be resolved are kept.
pub fn canon_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match components.last() {
                Some(&last) if last != ".." => {
                    components.pop();
                }
                // "/.." is just "/".
                _ if absolute => {}
                _ => components.push(".."),
            },
            _ => components.push(component),
        }
    }
    let joined = components.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

/// Map a path as given by a user or script to a target name.
/// Absolute paths under `root` become root-relative; other absolute paths
/// are kept absolute.
pub fn target_name(root: &Path, path: &str) -> String {
    let path = canon_path(path);
    if path.starts_with('/') {
        if let Ok(rel) = Path::new(&path).strip_prefix(root) {
            return canon_path(&rel.to_string_lossy());
        }
    }
    path
}
