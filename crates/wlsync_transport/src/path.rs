//! Resolution of file names beneath a backend root.
//!
//! Names are split on `/` and `\`. `.` and empty segments are dropped and
//! `..` pops a previous name segment but never climbs above the root.

use std::path::{Path, PathBuf};

fn name_segments(name: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            part => segments.push(part),
        }
    }
    segments
}

/// Resolves `name` beneath a local `root` directory.
pub fn local_path(root: &Path, name: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in name_segments(name) {
        path.push(segment);
    }
    path
}

/// Resolves `name` beneath a remote `root` using `/` separators.
///
/// An absolute root stays absolute; a relative one stays relative to the
/// remote login directory.
pub fn remote_path(root: &str, name: &str) -> String {
    let absolute = root.starts_with('/');
    let mut segments = name_segments(root);
    segments.extend(name_segments(name));

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_stays_beneath_root() {
        let root = Path::new("/srv/mc");
        assert_eq!(
            local_path(root, "whitelist.json"),
            PathBuf::from("/srv/mc/whitelist.json")
        );
        assert_eq!(
            local_path(root, "../../etc/passwd"),
            PathBuf::from("/srv/mc/etc/passwd")
        );
        assert_eq!(
            local_path(root, "/abs/./x/../whitelist.json"),
            PathBuf::from("/srv/mc/abs/whitelist.json")
        );
    }

    #[test]
    fn remote_paths() {
        assert_eq!(remote_path("/srv/mc", "whitelist.json"), "/srv/mc/whitelist.json");
        assert_eq!(remote_path("mc/", "whitelist.json"), "mc/whitelist.json");
        assert_eq!(remote_path("/", "../whitelist.json"), "/whitelist.json");
        assert_eq!(remote_path("", ""), ".");
        assert_eq!(remote_path("/", ""), "/");
    }
}
