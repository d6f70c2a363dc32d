/// Reference: https://github.com/torvalds/linux/blob/master/include/uapi/linux/jffs2.h
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::io::Cursor;

pub const JFFS2_MAGIC_BITMASK: u16 = 0x1985;

pub const JFFS2_COMPR_NONE: u8 = 0x00;
pub const JFFS2_COMPR_ZERO: u8 = 0x01;
pub const JFFS2_COMPR_RTIME: u8 = 0x02;
pub const JFFS2_COMPR_RUBINMIPS: u8 = 0x03;
pub const JFFS2_COMPR_COPY: u8 = 0x04;
pub const JFFS2_COMPR_DYNRUBIN: u8 = 0x05;
pub const JFFS2_COMPR_ZLIB: u8 = 0x06;
pub const JFFS2_COMPR_LZO: u8 = 0x07;

// Compatibility flags.
pub const JFFS2_NODE_ACCURATE: u16 = 0x2000;
pub const JFFS2_FEATURE_INCOMPAT: u16 = 0xc000;
pub const JFFS2_FEATURE_ROCOMPAT: u16 = 0x8000;
pub const JFFS2_FEATURE_RWCOMPAT_COPY: u16 = 0x4000;
pub const JFFS2_FEATURE_RWCOMPAT_DELETE: u16 = 0x0000;

pub const JFFS2_NODETYPE_DIRENT: u16 = JFFS2_FEATURE_INCOMPAT | JFFS2_NODE_ACCURATE | 1;
pub const JFFS2_NODETYPE_INODE: u16 = JFFS2_FEATURE_INCOMPAT | JFFS2_NODE_ACCURATE | 2;
pub const JFFS2_NODETYPE_CLEANMARKER: u16 = JFFS2_FEATURE_RWCOMPAT_DELETE | JFFS2_NODE_ACCURATE | 3;
pub const JFFS2_NODETYPE_PADDING: u16 = JFFS2_FEATURE_RWCOMPAT_DELETE | JFFS2_NODE_ACCURATE | 4;
pub const JFFS2_NODETYPE_SUMMARY: u16 = JFFS2_FEATURE_RWCOMPAT_DELETE | JFFS2_NODE_ACCURATE | 6;
pub const JFFS2_NODETYPE_XATTR: u16 = JFFS2_FEATURE_INCOMPAT | JFFS2_NODE_ACCURATE | 8;
pub const JFFS2_NODETYPE_XREF: u16 = JFFS2_FEATURE_INCOMPAT | JFFS2_NODE_ACCURATE | 9;

/// Inode number of the root directory. Top level dirents point at it.
pub const JFFS2_ROOT_INO: u32 = 1;

/// magic + nodetype + totlen.
pub const NODE_HEADER_SIZE: usize = 8;
/// Common header followed by the header CRC.
pub const UNKNOWN_NODE_SIZE: usize = 12;
/// Size of `struct jffs2_raw_inode`; the payload starts right after it.
pub const RAW_INODE_SIZE: usize = 0x44;
/// Size of `struct jffs2_raw_dirent`; the name starts right after it.
pub const RAW_DIRENT_SIZE: usize = 0x28;

pub const DEFAULT_PAGE_SIZE: usize = 0x200;

/// A data node never carries more than one kernel page. 64 KiB covers the
/// largest page size Linux builds with.
pub const MAX_NODE_DATA: usize = 0x10000;

/// Node types a resync is allowed to land on.
pub const KNOWN_NODE_TYPES: [u16; 7] = [
    JFFS2_NODETYPE_DIRENT,
    JFFS2_NODETYPE_INODE,
    JFFS2_NODETYPE_CLEANMARKER,
    JFFS2_NODETYPE_PADDING,
    JFFS2_NODETYPE_SUMMARY,
    JFFS2_NODETYPE_XATTR,
    JFFS2_NODETYPE_XREF,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Inode,
    Dirent,
    CleanMarker,
    Padding,
    Summary,
    Xattr,
    Xref,
    Unknown(u16),
}

impl NodeKind {
    pub fn from_raw(node_type: u16) -> Self {
        match node_type {
            JFFS2_NODETYPE_INODE => NodeKind::Inode,
            JFFS2_NODETYPE_DIRENT => NodeKind::Dirent,
            JFFS2_NODETYPE_CLEANMARKER => NodeKind::CleanMarker,
            JFFS2_NODETYPE_PADDING => NodeKind::Padding,
            JFFS2_NODETYPE_SUMMARY => NodeKind::Summary,
            JFFS2_NODETYPE_XATTR => NodeKind::Xattr,
            JFFS2_NODETYPE_XREF => NodeKind::Xref,
            other => NodeKind::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Inode => "inode",
            NodeKind::Dirent => "dirent",
            NodeKind::CleanMarker => "cleanmarker",
            NodeKind::Padding => "padding",
            NodeKind::Summary => "summary",
            NodeKind::Xattr => "xattr",
            NodeKind::Xref => "xref",
            NodeKind::Unknown(_) => "unknown",
        }
    }
}

/// The common header every node starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawNodeHeader {
    pub magic: u16,
    pub node_type: u16,
    /// Length of the whole node, header included.
    pub total_len: u32,
}

impl RawNodeHeader {
    /// Decode the header at `offset`. Returns `None` if fewer than
    /// `NODE_HEADER_SIZE` bytes remain.
    pub fn from_bytes(data: &[u8], offset: usize) -> Option<Self> {
        let end = offset.checked_add(NODE_HEADER_SIZE)?;
        let mut rdr = Cursor::new(data.get(offset..end)?);
        Some(RawNodeHeader {
            magic: rdr.read_u16::<LittleEndian>().ok()?,
            node_type: rdr.read_u16::<LittleEndian>().ok()?,
            total_len: rdr.read_u32::<LittleEndian>().ok()?,
        })
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::from_raw(self.node_type)
    }

    pub fn has_valid_magic(&self, magic: u16) -> bool {
        self.magic == magic
    }

    /// Magic and node type both recognised: a spot a resync can stop on.
    pub fn is_sync_point(&self, magic: u16) -> bool {
        self.magic == magic && KNOWN_NODE_TYPES.contains(&self.node_type)
    }

    /// `total_len` rounded up to the 4-byte node alignment.
    pub fn padded_len(&self) -> usize {
        align4(self.total_len as usize)
    }
}

pub fn align4(len: usize) -> usize {
    (len + 3) & !3
}
