/// Reference: https://github.com/torvalds/linux/blob/master/include/uapi/linux/jffs2.h
use crate::compression::{decompress, scheme_name};
use crate::node::{NODE_HEADER_SIZE, RAW_INODE_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{TimeZone, Utc};
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, Cursor, Write};

/// Decoded content of one inode-data node.
///
/// A payload that could not be expanded is kept as a failure rather than
/// silently swallowed, so the caller can tell an empty extent from a
/// broken one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Decoded(Vec<u8>),
    Failed(String),
}

impl Payload {
    /// The usable bytes; empty when decoding failed.
    pub fn data(&self) -> &[u8] {
        match self {
            Payload::Decoded(data) => data,
            Payload::Failed(_) => &[],
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, Payload::Decoded(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Payload::Decoded(_) => None,
            Payload::Failed(reason) => Some(reason),
        }
    }
}

/// One `struct jffs2_raw_inode` as found in the log: an extent
/// `[offset, offset + dsize)` of a file's content at a given version.
#[derive(Debug, Clone, Serialize)]
pub struct InodeDataRecord {
    /// Byte position of the node in the image (start of the magic).
    pub raw_offset: usize,
    pub hdr_crc: u32,
    pub ino: u32,
    pub version: u32,
    pub mode: u32,
    pub uid: u16,
    pub gid: u16,
    pub isize: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    /// Position of this extent in the file.
    pub offset: u32,
    /// Size of the payload on flash.
    pub csize: u32,
    /// Size of the payload once expanded.
    pub dsize: u32,
    pub compr: u8,
    pub usercompr: u8,
    pub flags: u16,
    pub data_crc: u32,
    pub node_crc: u32,
    #[serde(skip)]
    pub payload: Payload,
}

/// Convert a mode (including file-type bits) into the familiar
/// 10-character string used by `ls -l`, e.g. "-rw-r--r--".
pub fn mode_to_string(mode: u32) -> String {
    const S_IFMT: u32 = 0o170000;
    const S_IFSOCK: u32 = 0o140000;
    const S_IFLNK: u32 = 0o120000;
    const S_IFREG: u32 = 0o100000;
    const S_IFBLK: u32 = 0o060000;
    const S_IFDIR: u32 = 0o040000;
    const S_IFCHR: u32 = 0o020000;
    const S_IFIFO: u32 = 0o010000;

    let file_ch = match mode & S_IFMT {
        S_IFSOCK => 's',
        S_IFLNK => 'l',
        S_IFREG => '-',
        S_IFBLK => 'b',
        S_IFDIR => 'd',
        S_IFCHR => 'c',
        S_IFIFO => 'p',
        _ => '?',
    };

    const RWX: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    let mut buf: Vec<char> = RWX
        .iter()
        .map(|&(bit, ch)| if mode & bit != 0 { ch } else { '-' })
        .collect();

    // special bits
    if mode & 0o4000 != 0 {
        buf[2] = if buf[2] == 'x' { 's' } else { 'S' };
    }
    if mode & 0o2000 != 0 {
        buf[5] = if buf[5] == 'x' { 's' } else { 'S' };
    }
    if mode & 0o1000 != 0 {
        buf[8] = if buf[8] == 'x' { 't' } else { 'T' };
    }

    std::iter::once(file_ch).chain(buf).collect()
}

pub fn format_time(seconds: u32) -> String {
    Utc.timestamp_opt(seconds as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

impl InodeDataRecord {
    /// Decode the inode node starting at `raw_offset` in `data`.
    ///
    /// Every field read is bounds-checked: a node whose fixed part or
    /// payload runs past the end of the image is an error. A payload that
    /// fails to decompress is not: it is kept as `Payload::Failed`.
    pub fn from_bytes(data: &[u8], raw_offset: usize) -> Result<Self, String> {
        let fixed = raw_offset
            .checked_add(NODE_HEADER_SIZE)
            .zip(raw_offset.checked_add(RAW_INODE_SIZE))
            .and_then(|(start, end)| data.get(start..end))
            .ok_or_else(|| format!("inode node at 0x{:x} is truncated", raw_offset))?;

        let mut rdr = Cursor::new(fixed);
        let short = |e: io::Error| format!("inode node at 0x{:x}: {}", raw_offset, e);
        let hdr_crc = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let ino = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let version = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let mode = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let uid = rdr.read_u16::<LittleEndian>().map_err(short)?;
        let gid = rdr.read_u16::<LittleEndian>().map_err(short)?;
        let isize = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let atime = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let mtime = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let ctime = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let offset = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let csize = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let dsize = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let compr = rdr.read_u8().map_err(short)?;
        let usercompr = rdr.read_u8().map_err(short)?;
        let flags = rdr.read_u16::<LittleEndian>().map_err(short)?;
        let data_crc = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let node_crc = rdr.read_u32::<LittleEndian>().map_err(short)?;

        let payload_start = raw_offset + RAW_INODE_SIZE;
        let raw_payload = payload_start
            .checked_add(csize as usize)
            .and_then(|end| data.get(payload_start..end))
            .ok_or_else(|| {
                format!(
                    "inode node at 0x{:x}: payload of 0x{:x} bytes runs past the image",
                    raw_offset, csize
                )
            })?;

        let payload = match decompress(compr, raw_payload, dsize as usize) {
            Ok(bytes) => Payload::Decoded(bytes),
            Err(reason) => Payload::Failed(reason),
        };

        Ok(InodeDataRecord {
            raw_offset,
            hdr_crc,
            ino,
            version,
            mode,
            uid,
            gid,
            isize,
            atime,
            mtime,
            ctime,
            offset,
            csize,
            dsize,
            compr,
            usercompr,
            flags,
            data_crc,
            node_crc,
            payload,
        })
    }

    /// Write the fixed fields that follow the common node header
    /// (`hdr_crc` through `node_crc`), substituting the given sizes.
    /// CRCs are written back unchanged.
    pub fn write_fixed_fields<W: Write>(&self, w: &mut W, csize: u32, dsize: u32) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.hdr_crc)?;
        w.write_u32::<LittleEndian>(self.ino)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.mode)?;
        w.write_u16::<LittleEndian>(self.uid)?;
        w.write_u16::<LittleEndian>(self.gid)?;
        w.write_u32::<LittleEndian>(self.isize)?;
        w.write_u32::<LittleEndian>(self.atime)?;
        w.write_u32::<LittleEndian>(self.mtime)?;
        w.write_u32::<LittleEndian>(self.ctime)?;
        w.write_u32::<LittleEndian>(self.offset)?;
        w.write_u32::<LittleEndian>(csize)?;
        w.write_u32::<LittleEndian>(dsize)?;
        w.write_u8(self.compr)?;
        w.write_u8(self.usercompr)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u32::<LittleEndian>(self.data_crc)?;
        w.write_u32::<LittleEndian>(self.node_crc)
    }

    /// End of the extent in the file.
    pub fn end(&self) -> usize {
        self.offset as usize + self.dsize as usize
    }

    pub fn is_dir(&self) -> bool {
        (self.mode & 0o170000) == 0o040000
    }

    pub fn is_symlink(&self) -> bool {
        (self.mode & 0o170000) == 0o120000
    }

    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(map) = value.as_object_mut() {
            map.insert("mode_str".into(), json!(mode_to_string(self.mode)));
            map.insert("compr_str".into(), json!(scheme_name(self.compr)));
            map.insert("atime_h".into(), json!(format_time(self.atime)));
            map.insert("mtime_h".into(), json!(format_time(self.mtime)));
            map.insert("ctime_h".into(), json!(format_time(self.ctime)));
            map.insert("payload_len".into(), json!(self.payload.data().len()));
            map.insert("payload_error".into(), json!(self.payload.error()));
        }
        value
    }

    /// String representation of a record using prettytable
    pub fn to_string(&self) -> String {
        let mut table = Table::new();
        let rows: Vec<(&str, String)> = vec![
            ("Inode", format!("{}", self.ino)),
            ("Version", format!("0x{:x}", self.version)),
            ("Mode", mode_to_string(self.mode)),
            ("UID", format!("{}", self.uid)),
            ("GID", format!("{}", self.gid)),
            ("Size", format!("0x{:x}", self.isize)),
            ("Offset", format!("0x{:x}", self.offset)),
            ("CSize", format!("0x{:x}", self.csize)),
            ("DSize", format!("0x{:x}", self.dsize)),
            ("Compression", scheme_name(self.compr).to_string()),
            ("Payload", format!("0x{:x}", self.payload.data().len())),
            ("Raw offset", format!("0x{:x}", self.raw_offset)),
            ("atime", format_time(self.atime)),
            ("mtime", format_time(self.mtime)),
            ("ctime", format_time(self.ctime)),
        ];
        for (name, value) in rows {
            table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value)]));
        }
        if let Some(reason) = self.payload.error() {
            table.add_row(Row::new(vec![Cell::new("Error"), Cell::new(reason)]));
        }
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{JFFS2_COMPR_NONE, JFFS2_COMPR_ZLIB};
    use crate::testutil::{inode_node, InodeSpec};

    #[test]
    fn decodes_fields_and_plain_payload() {
        let node = inode_node(&InodeSpec::new(7, 3, 0x10, b"hello"));
        let rec = InodeDataRecord::from_bytes(&node, 0).unwrap();
        assert_eq!(rec.ino, 7);
        assert_eq!(rec.version, 3);
        assert_eq!(rec.offset, 0x10);
        assert_eq!(rec.csize, 5);
        assert_eq!(rec.dsize, 5);
        assert_eq!(rec.compr, JFFS2_COMPR_NONE);
        assert_eq!(rec.payload, Payload::Decoded(b"hello".to_vec()));
        assert_eq!(rec.end(), 0x15);
    }

    #[test]
    fn decodes_zlib_payload() {
        let spec = InodeSpec::new(2, 1, 0, b"compressible compressible compressible").zlib();
        let node = inode_node(&spec);
        let rec = InodeDataRecord::from_bytes(&node, 0).unwrap();
        assert_eq!(rec.compr, JFFS2_COMPR_ZLIB);
        assert!(rec.csize < rec.dsize);
        assert_eq!(rec.payload.data(), &b"compressible compressible compressible"[..]);
    }

    #[test]
    fn broken_zlib_payload_is_flagged_not_fatal() {
        let spec = InodeSpec::new(2, 1, 0, b"abcdefgh").with_compr(JFFS2_COMPR_ZLIB);
        let node = inode_node(&spec);
        let rec = InodeDataRecord::from_bytes(&node, 0).unwrap();
        assert!(!rec.payload.is_decoded());
        assert!(rec.payload.data().is_empty());
        assert!(rec.payload.error().is_some());
        assert_eq!(rec.dsize, 8);
    }

    #[test]
    fn payload_past_the_buffer_is_rejected() {
        let node = inode_node(&InodeSpec::new(7, 1, 0, b"hello"));
        assert!(InodeDataRecord::from_bytes(&node[..node.len() - 8], 0).is_err());
        assert!(InodeDataRecord::from_bytes(&node[..0x20], 0).is_err());
    }

    #[test]
    fn fixed_fields_round_trip_through_the_writer() {
        let node = inode_node(&InodeSpec::new(9, 4, 0x100, b"abc"));
        let rec = InodeDataRecord::from_bytes(&node, 0).unwrap();
        let mut out = Vec::new();
        rec.write_fixed_fields(&mut out, rec.csize, rec.dsize).unwrap();
        assert_eq!(out.len(), RAW_INODE_SIZE - NODE_HEADER_SIZE);
        assert_eq!(&out[..], &node[NODE_HEADER_SIZE..RAW_INODE_SIZE]);
    }

    #[test]
    fn mode_string() {
        assert_eq!(mode_to_string(0o100644), "-rw-r--r--");
        assert_eq!(mode_to_string(0o040755), "drwxr-xr-x");
        assert_eq!(mode_to_string(0o104755), "-rwsr-xr-x");
    }

    #[test]
    fn json_carries_payload_summary() {
        let node = inode_node(&InodeSpec::new(7, 3, 0, b"hello"));
        let rec = InodeDataRecord::from_bytes(&node, 0).unwrap();
        let value = rec.to_json();
        assert_eq!(value["ino"], 7);
        assert_eq!(value["payload_len"], 5);
        assert!(value["payload_error"].is_null());
        assert!(rec.to_string().contains("Raw offset"));
    }
}
