use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::SystemTime;

use super::path;
use crate::zip::ZipFileEntry;

pub(crate) enum Node {
    Dir {
        children: BTreeSet<String>,
        modified: Option<SystemTime>,
    },
    File(ZipFileEntry),
}

/// Directory tree synthesized from the flat entry list of an archive.
///
/// Archives are not required to contain entries for their directories, so
/// every ancestor of every entry is materialized here.
pub(crate) struct Tree {
    nodes: HashMap<String, Node>,
}

impl Tree {
    pub fn build(entries: Vec<ZipFileEntry>) -> Self {
        let mut dirs: BTreeMap<String, Option<SystemTime>> = BTreeMap::new();
        let mut files: BTreeMap<String, ZipFileEntry> = BTreeMap::new();
        dirs.insert(String::new(), None);

        for entry in entries {
            let Some(key) = path::entry_key(&entry.name) else {
                if !matches!(entry.name.as_str(), "/" | "./") {
                    tracing::warn!(name = %entry.name, "Skipping archive entry with unsafe path");
                }
                continue;
            };

            for ancestor in path::ancestors(&key) {
                dirs.entry(ancestor.to_string()).or_insert(None);
            }

            if entry.is_directory {
                let modified = dirs.entry(key).or_insert(None);
                if modified.is_none() {
                    *modified = entry.modified();
                }
            } else if files.contains_key(&key) {
                tracing::warn!(name = %entry.name, "Duplicate archive entry, keeping the first");
            } else {
                files.insert(key, entry);
            }
        }

        files.retain(|key, _| {
            let shadowed = dirs.contains_key(key);
            if shadowed {
                tracing::warn!(path = %key, "Archive has both a file and a directory at this path, serving the directory");
            }
            !shadowed
        });

        let mut nodes = HashMap::with_capacity(dirs.len() + files.len());
        for (key, modified) in dirs {
            nodes.insert(
                key,
                Node::Dir {
                    children: BTreeSet::new(),
                    modified,
                },
            );
        }
        let child_keys: Vec<String> = nodes
            .keys()
            .filter(|key| !key.is_empty())
            .cloned()
            .chain(files.keys().cloned())
            .collect();
        for (key, entry) in files {
            nodes.insert(key, Node::File(entry));
        }
        for key in child_keys {
            if let Some(Node::Dir { children, .. }) = nodes.get_mut(path::parent(&key)) {
                children.insert(path::base_name(&key).to_string());
            }
        }

        Self { nodes }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::CompressionMethod;

    fn entry(name: &str) -> ZipFileEntry {
        ZipFileEntry {
            name: name.to_string(),
            flags: 0,
            compression_method: CompressionMethod::Stored,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            is_directory: name.ends_with('/'),
        }
    }

    fn children<'a>(tree: &'a Tree, key: &str) -> Vec<&'a str> {
        match tree.get(key) {
            Some(Node::Dir { children, .. }) => children.iter().map(String::as_str).collect(),
            _ => panic!("{key} is not a directory"),
        }
    }

    #[test]
    fn synthesizes_missing_directories() {
        let tree = Tree::build(vec![entry("site/css/app.css"), entry("site/index.html")]);
        assert_eq!(children(&tree, ""), ["site"]);
        assert_eq!(children(&tree, "site"), ["css", "index.html"]);
        assert_eq!(children(&tree, "site/css"), ["app.css"]);
        assert!(matches!(tree.get("site/index.html"), Some(Node::File(_))));
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn skips_entries_escaping_the_archive() {
        let tree = Tree::build(vec![entry("../evil.html"), entry("ok.html")]);
        assert_eq!(children(&tree, ""), ["ok.html"]);
    }

    #[test]
    fn directory_wins_over_file_with_same_path() {
        let tree = Tree::build(vec![entry("docs"), entry("docs/index.html")]);
        assert!(matches!(tree.get("docs"), Some(Node::Dir { .. })));
        assert_eq!(children(&tree, "docs"), ["index.html"]);
    }

    #[test]
    fn keeps_first_duplicate() {
        let mut first = entry("a.txt");
        first.crc32 = 1;
        let mut second = entry("a.txt");
        second.crc32 = 2;
        let tree = Tree::build(vec![first, second]);
        match tree.get("a.txt") {
            Some(Node::File(e)) => assert_eq!(e.crc32, 1),
            _ => panic!("a.txt missing"),
        }
    }

    #[test]
    fn children_sort_bytewise() {
        let tree = Tree::build(vec![entry("b.html"), entry("a/x"), entry(".prefix"), entry("B.html")]);
        assert_eq!(children(&tree, ""), [".prefix", "B.html", "a", "b.html"]);
    }
}
