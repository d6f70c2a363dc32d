//! Builders for synthetic JFFS2 images used across the unit tests.
use crate::compression::compress;
use crate::node::{
    align4, DEFAULT_PAGE_SIZE, JFFS2_COMPR_NONE, JFFS2_COMPR_ZLIB, JFFS2_MAGIC_BITMASK,
    JFFS2_NODETYPE_CLEANMARKER, JFFS2_NODETYPE_DIRENT, JFFS2_NODETYPE_INODE,
    JFFS2_NODETYPE_PADDING, NODE_HEADER_SIZE, RAW_DIRENT_SIZE, RAW_INODE_SIZE, UNKNOWN_NODE_SIZE,
};
use byteorder::{LittleEndian, WriteBytesExt};

pub struct InodeSpec {
    pub ino: u32,
    pub version: u32,
    pub offset: u32,
    pub data: Vec<u8>,
    pub compr: u8,
    pub compress: bool,
    pub mode: u32,
}

impl InodeSpec {
    pub fn new(ino: u32, version: u32, offset: u32, data: &[u8]) -> Self {
        InodeSpec {
            ino,
            version,
            offset,
            data: data.to_vec(),
            compr: JFFS2_COMPR_NONE,
            compress: false,
            mode: 0o100644,
        }
    }

    pub fn zlib(mut self) -> Self {
        self.compr = JFFS2_COMPR_ZLIB;
        self.compress = true;
        self
    }

    /// Label the payload with `compr` without encoding it.
    pub fn with_compr(mut self, compr: u8) -> Self {
        self.compr = compr;
        self.compress = false;
        self
    }
}

fn header(out: &mut Vec<u8>, node_type: u16, total_len: usize) {
    out.write_u16::<LittleEndian>(JFFS2_MAGIC_BITMASK).unwrap();
    out.write_u16::<LittleEndian>(node_type).unwrap();
    out.write_u32::<LittleEndian>(total_len as u32).unwrap();
}

pub fn inode_node(spec: &InodeSpec) -> Vec<u8> {
    let payload = if spec.compress {
        compress(spec.compr, &spec.data).unwrap()
    } else {
        spec.data.clone()
    };
    let mut out = Vec::new();
    header(&mut out, JFFS2_NODETYPE_INODE, RAW_INODE_SIZE + payload.len());
    out.write_u32::<LittleEndian>(0xAAAA_0001).unwrap(); // hdr_crc
    out.write_u32::<LittleEndian>(spec.ino).unwrap();
    out.write_u32::<LittleEndian>(spec.version).unwrap();
    out.write_u32::<LittleEndian>(spec.mode).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap(); // uid
    out.write_u16::<LittleEndian>(0).unwrap(); // gid
    out.write_u32::<LittleEndian>(spec.offset + spec.data.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(1_600_000_000).unwrap();
    out.write_u32::<LittleEndian>(1_600_000_100).unwrap();
    out.write_u32::<LittleEndian>(1_600_000_200).unwrap();
    out.write_u32::<LittleEndian>(spec.offset).unwrap();
    out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(spec.data.len() as u32).unwrap();
    out.write_u8(spec.compr).unwrap();
    out.write_u8(0).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u32::<LittleEndian>(0xAAAA_0002).unwrap(); // data_crc
    out.write_u32::<LittleEndian>(0xAAAA_0003).unwrap(); // node_crc
    assert_eq!(out.len(), RAW_INODE_SIZE);
    out.extend_from_slice(&payload);
    out
}

pub fn dirent_node(pino: u32, version: u32, ino: u32, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    header(&mut out, JFFS2_NODETYPE_DIRENT, RAW_DIRENT_SIZE + name.len());
    out.write_u32::<LittleEndian>(0xBBBB_0001).unwrap(); // hdr_crc
    out.write_u32::<LittleEndian>(pino).unwrap();
    out.write_u32::<LittleEndian>(version).unwrap();
    out.write_u32::<LittleEndian>(ino).unwrap();
    out.write_u32::<LittleEndian>(1_600_000_300).unwrap(); // mctime
    out.write_u8(name.len() as u8).unwrap();
    out.write_u8(8).unwrap(); // DT_REG
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u32::<LittleEndian>(0xBBBB_0002).unwrap(); // node_crc
    out.write_u32::<LittleEndian>(0xBBBB_0003).unwrap(); // name_crc
    assert_eq!(out.len(), RAW_DIRENT_SIZE);
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn bare_node(node_type: u16, total_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    header(&mut out, node_type, total_len);
    out.write_u32::<LittleEndian>(0).unwrap();
    out.resize(total_len.max(UNKNOWN_NODE_SIZE), 0);
    out
}

pub fn padding_node(total_len: usize) -> Vec<u8> {
    bare_node(JFFS2_NODETYPE_PADDING, total_len)
}

pub fn cleanmarker() -> Vec<u8> {
    bare_node(JFFS2_NODETYPE_CLEANMARKER, UNKNOWN_NODE_SIZE)
}

/// Lays nodes out the way the scanner expects to walk them: 4-byte
/// alignment and a jump to the next page when a header would not fit.
pub struct ImageBuilder {
    pub buf: Vec<u8>,
    page_size: usize,
    /// Offsets of every node pushed, in order.
    pub offsets: Vec<usize>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder {
            buf: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            offsets: Vec::new(),
        }
    }

    pub fn node(mut self, node: Vec<u8>) -> Self {
        self.offsets.push(self.buf.len());
        let next = self.buf.len() + align4(node.len());
        self.buf.extend_from_slice(&node);
        self.buf.resize(next, 0xFF);
        let room = self.page_size - (self.buf.len() % self.page_size);
        if room < NODE_HEADER_SIZE {
            let padded = self.buf.len() + room;
            self.buf.resize(padded, 0xFF);
        }
        self
    }

    pub fn inode(self, spec: InodeSpec) -> Self {
        let node = inode_node(&spec);
        self.node(node)
    }

    pub fn dirent(self, pino: u32, version: u32, ino: u32, name: &str) -> Self {
        self.node(dirent_node(pino, version, ino, name))
    }

    /// Raw bytes appended with no alignment handling.
    pub fn garbage(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}
