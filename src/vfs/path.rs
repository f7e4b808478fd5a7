//! Slash-separated archive paths.
//!
//! Paths are kept in a canonical key form: no leading or trailing slash,
//! no empty, `.` or `..` segments. The empty key is the root and is shown
//! to users as `.`.

/// Canonical form of `path`. `..` segments are resolved and clamp at the root.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Canonical key of a raw entry name, or `None` if the name tries to climb
/// out of the archive or names the root itself.
pub fn entry_key(name: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

pub fn join(dir: &str, name: &str) -> String {
    clean(&format!("{dir}/{name}"))
}

/// Parent key; the root is its own parent.
pub fn parent(key: &str) -> &str {
    key.rsplit_once('/').map_or("", |(dir, _)| dir)
}

pub fn base_name(key: &str) -> &str {
    key.rsplit_once('/').map_or(key, |(_, name)| name)
}

/// Every proper ancestor of `key`, root excluded, outermost first.
pub fn ancestors(key: &str) -> impl Iterator<Item = &str> {
    key.match_indices('/').map(move |(i, _)| &key[..i])
}

/// User-facing form of a key.
pub fn display(key: &str) -> &str {
    if key.is_empty() { "." } else { key }
}
