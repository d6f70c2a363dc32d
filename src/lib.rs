use std::collections::HashSet;
use std::error::Error;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

pub mod compression;
pub mod dirent;
pub mod inode;
pub mod node;
pub mod patch;
pub mod path;
pub mod reassemble;
pub mod scanner;
pub mod store;

#[cfg(test)]
mod testutil;

use inode::{format_time, mode_to_string};
use log::{error, info, warn};
use node::RawNodeHeader;
use path::{resolve_path, ResolvedPath};
use prettytable::{Cell, Row, Table};
use reassemble::{reassemble, ReassemblyPolicy};
use scanner::{NodeRecord, NodeScanner, ScanConfig, ScanSummary};
use serde::Serialize;
use serde_json::{json, Value};
use store::{DirentVersionStore, InodeVersionStore};

/// Everything recovered from one pass over an image. Each call to `parse`
/// builds its own stores; nothing is shared between passes.
#[derive(Debug, Default, Clone)]
pub struct ParsedImage {
    pub inodes: InodeVersionStore,
    pub dirents: DirentVersionStore,
    pub summary: ScanSummary,
    /// Nodes of types that are reported but not interpreted, with their offset.
    pub others: Vec<(usize, RawNodeHeader)>,
}

/// A file known both by name and by content.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub ino: u32,
    pub path: String,
    pub complete_path: bool,
    pub records: usize,
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl FileEntry {
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(map) = value.as_object_mut() {
            map.insert("mode_str".into(), json!(mode_to_string(self.mode)));
            map.insert("mtime_h".into(), json!(format_time(self.mtime)));
        }
        value
    }
}

/// Outcome of `ParsedImage::dump_all`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DumpReport {
    pub written: Vec<PathBuf>,
    /// Symlinks among `written`. Each is a plain file holding the link target.
    pub symlinks: usize,
    pub directories: usize,
    pub empty: usize,
    pub failed: Vec<(u32, String)>,
}

/// Read a whole image into memory.
pub fn read_image<T: Read>(mut body: T) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut data = Vec::new();
    body.read_to_end(&mut data)?;
    info!("Image loaded: 0x{:x} bytes", data.len());
    Ok(data)
}

/// Scan `image` once and sort what was found into the version stores.
///
/// Corruption never makes this fail; a badly damaged image simply yields
/// partial or empty stores.
pub fn parse(image: &[u8], config: &ScanConfig) -> ParsedImage {
    let mut parsed = ParsedImage::default();
    let mut scanner = NodeScanner::new(image, *config);
    for node in scanner.by_ref() {
        match node.record {
            NodeRecord::Inode(rec) => parsed.inodes.add(rec),
            NodeRecord::Dirent(rec) => {
                parsed.dirents.upsert(rec);
            }
            NodeRecord::Other => parsed.others.push((node.raw_offset, node.header)),
        }
    }
    parsed.summary = scanner.into_summary();
    info!(
        "Scan done: {} nodes ({} inode, {} dirent), {} resync(s), 0x{:x} bytes skipped",
        parsed.summary.total_nodes,
        parsed.summary.inode_nodes,
        parsed.summary.dirent_nodes,
        parsed.summary.resyncs,
        parsed.summary.bytes_skipped
    );
    parsed
}

/// Turn a recovered path into a location under `root`. `.` and `..` and
/// empty components are dropped so nothing lands outside `root`.
fn local_path(root: &Path, path: &str) -> PathBuf {
    let mut local = root.to_path_buf();
    for part in Path::new(path).components() {
        if let Component::Normal(name) = part {
            local.push(name);
        }
    }
    local
}

impl ParsedImage {
    pub fn resolve_path(&self, ino: u32) -> ResolvedPath {
        resolve_path(&self.dirents, ino)
    }

    /// Content of `ino` rebuilt with `policy`, `None` if no data node was found.
    pub fn extract_file(&self, ino: u32, policy: ReassemblyPolicy) -> Option<Vec<u8>> {
        self.inodes
            .fragments(ino)
            .map(|fragments| reassemble(fragments, policy))
    }

    /// Every inode with data whose resolved path is `path`.
    pub fn find_inodes_by_path(&self, path: &str) -> Vec<u32> {
        self.dirents
            .inodes()
            .filter(|&ino| self.inodes.contains(ino))
            .filter(|&ino| self.resolve_path(ino).path == path)
            .collect()
    }

    /// Inodes having both a directory entry and data nodes.
    pub fn files(&self) -> Vec<FileEntry> {
        self.dirents
            .inodes()
            .filter_map(|ino| {
                let fragments = self.inodes.fragments(ino)?;
                let latest = self.inodes.latest(ino)?;
                let resolved = self.resolve_path(ino);
                Some(FileEntry {
                    ino,
                    path: resolved.path,
                    complete_path: resolved.complete,
                    records: fragments.len(),
                    mode: latest.mode,
                    size: latest.isize,
                    mtime: latest.mtime,
                })
            })
            .collect()
    }

    /// String representation of the file listing using prettytable
    pub fn files_table(&self) -> String {
        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("Path"),
            Cell::new("Inode"),
            Cell::new("Records"),
            Cell::new("Mode"),
            Cell::new("Size"),
            Cell::new("mtime"),
        ]));
        for entry in self.files() {
            let path = if entry.complete_path {
                entry.path.clone()
            } else {
                format!("?{}", entry.path)
            };
            table.add_row(Row::new(vec![
                Cell::new(&path),
                Cell::new(&entry.ino.to_string()),
                Cell::new(&entry.records.to_string()),
                Cell::new(&mode_to_string(entry.mode)),
                Cell::new(&format!("0x{:x}", entry.size)),
                Cell::new(&format_time(entry.mtime)),
            ]));
        }
        table.to_string()
    }

    /// Where `ino` goes under `output_dir`. Inodes without a name are
    /// placed at the top as `ino_<n>`.
    pub fn dump_path(&self, output_dir: &Path, ino: u32) -> PathBuf {
        let resolved = self.resolve_path(ino);
        let local = local_path(output_dir, &resolved.path);
        if local == output_dir {
            output_dir.join(format!("ino_{}", ino))
        } else {
            local
        }
    }

    /// Write the content of one inode under `output_dir`.
    ///
    /// Returns the file written, or `None` when there was nothing to write
    /// (empty content or a directory, which is only created). A symlink is
    /// never recreated as a link: its target is written as file content.
    pub fn dump_inode(
        &self,
        output_dir: &Path,
        ino: u32,
        policy: ReassemblyPolicy,
    ) -> Result<Option<PathBuf>, Box<dyn Error>> {
        let target = self.dump_path(output_dir, ino);

        if self.inodes.latest(ino).map_or(false, |r| r.is_dir()) {
            fs::create_dir_all(&target)?;
            return Ok(None);
        }

        let data = self
            .extract_file(ino, policy)
            .ok_or_else(|| format!("inode {} has no data node", ino))?;
        if data.is_empty() {
            return Ok(None);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &data)?;
        if self.inodes.latest(ino).map_or(false, |r| r.is_symlink()) {
            info!(
                "Symlink {} -> {} written as {}",
                ino,
                String::from_utf8_lossy(&data),
                target.display()
            );
        } else {
            info!("Inode {} -> {} (0x{:x} bytes)", ino, target.display(), data.len());
        }
        Ok(Some(target))
    }

    /// Dump every inode: named ones first, then the ones no dirent points at.
    /// Each inode is written once; a failure on one does not stop the others.
    pub fn dump_all(
        &self,
        output_dir: &Path,
        policy: ReassemblyPolicy,
    ) -> Result<DumpReport, Box<dyn Error>> {
        fs::create_dir_all(output_dir)?;

        let named = self.dirents.inodes().filter(|&ino| self.inodes.contains(ino));
        let mut processed: HashSet<u32> = HashSet::new();
        let order: Vec<u32> = named
            .chain(self.inodes.inodes())
            .filter(|ino| processed.insert(*ino))
            .collect();

        let mut report = DumpReport::default();
        for ino in order {
            match self.dump_inode(output_dir, ino, policy) {
                Ok(Some(path)) => {
                    if self.inodes.latest(ino).map_or(false, |r| r.is_symlink()) {
                        report.symlinks += 1;
                    }
                    report.written.push(path);
                }
                Ok(None) => {
                    if self.inodes.latest(ino).map_or(false, |r| r.is_dir()) {
                        report.directories += 1;
                    } else {
                        report.empty += 1;
                    }
                }
                Err(err) => {
                    error!("Failed to dump inode {}: {}", ino, err);
                    report.failed.push((ino, err.to_string()));
                }
            }
        }
        if !report.failed.is_empty() {
            warn!("{} inode(s) could not be written", report.failed.len());
        }
        Ok(report)
    }
}
