use crate::node::JFFS2_ROOT_INO;
use crate::store::DirentVersionStore;
use log::{debug, warn};
use serde::Serialize;

/// An absolute path rebuilt from parent links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    pub path: String,
    /// False when the walk stopped on a missing parent or a cycle before
    /// reaching the root; `path` then holds the trailing components only.
    pub complete: bool,
}

fn is_root(ino: u32) -> bool {
    ino == 0 || ino == JFFS2_ROOT_INO
}

/// Follow `parent_ino` links from `ino` up to the root.
///
/// The number of hops is bounded by the number of dirents held, so a cycle
/// in corrupted data ends the walk instead of looping.
pub fn resolve_path(dirents: &DirentVersionStore, ino: u32) -> ResolvedPath {
    let mut components: Vec<String> = Vec::new();
    let mut current = ino;
    let mut hops = 0usize;

    let complete = loop {
        if is_root(current) {
            break true;
        }
        let dirent = match dirents.get(current) {
            Some(d) => d,
            None => {
                debug!("No dirent for inode {} while resolving inode {}", current, ino);
                break false;
            }
        };
        if hops >= dirents.len() {
            warn!("Parent links of inode {} loop back on themselves", ino);
            break false;
        }
        components.push(dirent.name_lossy());
        current = dirent.parent_ino;
        hops += 1;
    };

    let path = if components.is_empty() && complete {
        "/".to_string()
    } else {
        components
            .iter()
            .rev()
            .fold(String::new(), |acc, name| acc + "/" + name)
    };
    ResolvedPath { path, complete }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirent::DirentRecord;
    use crate::testutil::dirent_node;

    fn store(entries: &[(u32, u32, &str)]) -> DirentVersionStore {
        let mut store = DirentVersionStore::new();
        for &(pino, ino, name) in entries {
            store.upsert(DirentRecord::from_bytes(&dirent_node(pino, 1, ino, name), 0).unwrap());
        }
        store
    }

    #[test]
    fn resolves_nested_path() {
        let dirents = store(&[(1, 2, "etc"), (2, 3, "init.d"), (3, 4, "rcS")]);
        let resolved = resolve_path(&dirents, 4);
        assert_eq!(resolved.path, "/etc/init.d/rcS");
        assert!(resolved.complete);
    }

    #[test]
    fn root_sentinel_zero_also_ends_the_walk() {
        let dirents = store(&[(0, 2, "top")]);
        assert_eq!(
            resolve_path(&dirents, 2),
            ResolvedPath {
                path: "/top".into(),
                complete: true
            }
        );
    }

    #[test]
    fn dangling_parent_gives_partial_path() {
        let dirents = store(&[(50, 3, "lib"), (3, 4, "libc.so")]);
        let resolved = resolve_path(&dirents, 4);
        assert_eq!(resolved.path, "/lib/libc.so");
        assert!(!resolved.complete);
    }

    #[test]
    fn inode_without_dirent_resolves_to_nothing() {
        let dirents = store(&[(1, 2, "etc")]);
        let resolved = resolve_path(&dirents, 99);
        assert_eq!(resolved.path, "");
        assert!(!resolved.complete);
    }

    #[test]
    fn cycle_terminates() {
        let dirents = store(&[(3, 2, "a"), (2, 3, "b")]);
        let resolved = resolve_path(&dirents, 2);
        assert!(!resolved.complete);
        assert_eq!(resolved.path, "/b/a");
    }

    #[test]
    fn self_parent_terminates() {
        let dirents = store(&[(7, 7, "loop")]);
        let resolved = resolve_path(&dirents, 7);
        assert!(!resolved.complete);
        assert_eq!(resolved.path, "/loop");
    }
}
