use crate::dirent::DirentRecord;
use crate::inode::InodeDataRecord;
use crate::node::{
    NodeKind, RawNodeHeader, DEFAULT_PAGE_SIZE, JFFS2_MAGIC_BITMASK, NODE_HEADER_SIZE,
};
use log::{debug, info, warn};
use serde::Serialize;

/// Knobs of the node walk.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    /// Flash page size. A node never starts in the last `NODE_HEADER_SIZE`
    /// bytes of a page. Zero disables the rule.
    pub page_size: usize,
    pub magic: u16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            page_size: DEFAULT_PAGE_SIZE,
            magic: JFFS2_MAGIC_BITMASK,
        }
    }
}

impl ScanConfig {
    /// Default config with a checked page size. A non-zero page must hold
    /// at least one header and keep nodes on their 4-byte alignment.
    pub fn with_page_size(page_size: usize) -> Result<Self, String> {
        if page_size != 0 && (page_size < NODE_HEADER_SIZE || page_size % 4 != 0) {
            return Err(format!(
                "invalid page size 0x{:x}: must be 0 or a multiple of 4 no smaller than 0x{:x}",
                page_size, NODE_HEADER_SIZE
            ));
        }
        Ok(ScanConfig {
            page_size,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone)]
pub enum NodeRecord {
    Inode(InodeDataRecord),
    Dirent(DirentRecord),
    /// A node type that is reported but not interpreted.
    Other,
}

#[derive(Debug, Clone)]
pub struct ScannedNode {
    pub header: RawNodeHeader,
    pub raw_offset: usize,
    pub record: NodeRecord,
}

/// Counters gathered during one walk.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Fully parsed nodes, padding and clean markers included.
    pub total_nodes: usize,
    pub inode_nodes: usize,
    pub dirent_nodes: usize,
    pub padding_nodes: usize,
    pub other_nodes: usize,
    /// Inode nodes whose payload could not be expanded.
    pub payload_errors: usize,
    pub resyncs: usize,
    pub bytes_skipped: usize,
}

/// Lazy walk over the nodes of an image held in memory.
///
/// Garbage between nodes is skipped by looking for the next 4-byte aligned
/// spot holding the magic followed by a known node type. The walk ends when
/// a header no longer fits in the buffer or no sync point is left.
pub struct NodeScanner<'a> {
    data: &'a [u8],
    offset: usize,
    config: ScanConfig,
    summary: ScanSummary,
    done: bool,
}

impl<'a> NodeScanner<'a> {
    pub fn new(data: &'a [u8], config: ScanConfig) -> Self {
        NodeScanner {
            data,
            offset: 0,
            config,
            summary: ScanSummary::default(),
            done: false,
        }
    }

    pub fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    pub fn into_summary(self) -> ScanSummary {
        self.summary
    }

    /// Search forward from `from` for the next sync point. `bad_offset` is
    /// where the walk lost track, only used for reporting.
    fn resync(&mut self, bad_offset: usize, from: usize) -> Option<usize> {
        let mut pos = from;
        while pos < self.data.len() {
            if let Some(hdr) = RawNodeHeader::from_bytes(self.data, pos) {
                if hdr.is_sync_point(self.config.magic) {
                    let skipped = pos - bad_offset;
                    self.summary.resyncs += 1;
                    self.summary.bytes_skipped += skipped;
                    warn!(
                        "Lost node stream at 0x{:x}, found next node at 0x{:x} (0x{:x} bytes skipped)",
                        bad_offset, pos, skipped
                    );
                    return Some(pos);
                }
            }
            pos += 4;
        }
        self.summary.bytes_skipped += self.data.len().saturating_sub(bad_offset);
        info!("No node found after 0x{:x}, end of scan", bad_offset);
        None
    }

    /// Offset of the node following the one at `offset`.
    fn next_offset(&self, offset: usize, hdr: &RawNodeHeader) -> usize {
        let mut next = offset.saturating_add(hdr.padded_len());
        let page = self.config.page_size;
        if page > 0 {
            let room = page - (next % page);
            if room < NODE_HEADER_SIZE {
                next = next.saturating_add(room);
            }
        }
        next
    }

    fn lose_track(&mut self, offset: usize, reason: &str) {
        warn!("Corrupt node at 0x{:x}: {}", offset, reason);
        match self.resync(offset, offset + 4) {
            Some(pos) => self.offset = pos,
            None => self.done = true,
        }
    }
}

impl<'a> Iterator for NodeScanner<'a> {
    type Item = ScannedNode;

    fn next(&mut self) -> Option<ScannedNode> {
        while !self.done {
            let offset = self.offset;
            let hdr = match RawNodeHeader::from_bytes(self.data, offset) {
                Some(hdr) => hdr,
                None => {
                    debug!("Header at 0x{:x} does not fit in the image, end of scan", offset);
                    self.done = true;
                    break;
                }
            };

            if !hdr.has_valid_magic(self.config.magic) {
                debug!(
                    "Bad magic at 0x{:x} (0x{:x}, 0x{:x})",
                    offset, hdr.magic, hdr.node_type
                );
                match self.resync(offset, offset) {
                    Some(pos) => self.offset = pos,
                    None => self.done = true,
                }
                continue;
            }

            if (hdr.total_len as usize) < NODE_HEADER_SIZE {
                self.lose_track(offset, &format!("total length 0x{:x}", hdr.total_len));
                continue;
            }

            let record = match hdr.kind() {
                NodeKind::Inode => match InodeDataRecord::from_bytes(self.data, offset) {
                    Ok(rec) => {
                        if let Some(reason) = rec.payload.error() {
                            warn!(
                                "Inode {} version {} at 0x{:x}: {}",
                                rec.ino, rec.version, offset, reason
                            );
                            self.summary.payload_errors += 1;
                        }
                        debug!(
                            "Inode node @0x{:x} ino {} version {} offset 0x{:x} csize 0x{:x} dsize 0x{:x}",
                            offset, rec.ino, rec.version, rec.offset, rec.csize, rec.dsize
                        );
                        self.summary.inode_nodes += 1;
                        Some(NodeRecord::Inode(rec))
                    }
                    Err(reason) => {
                        self.lose_track(offset, &reason);
                        continue;
                    }
                },
                NodeKind::Dirent => match DirentRecord::from_bytes(self.data, offset) {
                    Ok(rec) => {
                        debug!(
                            "Dirent node @0x{:x} {} -> ino {} (parent {}, version {})",
                            offset,
                            rec.name_lossy(),
                            rec.target_ino,
                            rec.parent_ino,
                            rec.version
                        );
                        self.summary.dirent_nodes += 1;
                        Some(NodeRecord::Dirent(rec))
                    }
                    Err(reason) => {
                        self.lose_track(offset, &reason);
                        continue;
                    }
                },
                NodeKind::Padding | NodeKind::CleanMarker => {
                    self.summary.padding_nodes += 1;
                    None
                }
                kind => {
                    info!(
                        "{} node at 0x{:x} (type 0x{:x}, length 0x{:x}) not interpreted",
                        kind.name(),
                        offset,
                        hdr.node_type,
                        hdr.total_len
                    );
                    self.summary.other_nodes += 1;
                    Some(NodeRecord::Other)
                }
            };

            self.summary.total_nodes += 1;
            self.offset = self.next_offset(offset, &hdr);

            if let Some(record) = record {
                return Some(ScannedNode {
                    header: hdr,
                    raw_offset: offset,
                    record,
                });
            }
        }
        None
    }
}
