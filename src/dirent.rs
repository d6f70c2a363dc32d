use crate::inode::format_time;
use crate::node::{NODE_HEADER_SIZE, RAW_DIRENT_SIZE};
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, Cursor};

// Structure representing a `struct jffs2_raw_dirent`
#[derive(Debug, Clone, Serialize)]
pub struct DirentRecord {
    // Byte position of the node in the image
    pub raw_offset: usize,
    pub hdr_crc: u32,
    // Inode number of the directory holding the entry
    pub parent_ino: u32,
    pub version: u32,
    // Inode number the entry refers to (0 when the name was unlinked)
    pub target_ino: u32,
    pub mctime: u32,
    // DT_* type of the target
    pub entry_type: u8,
    pub node_crc: u32,
    pub name_crc: u32,
    // Raw name bytes, not necessarily UTF-8
    pub name: Vec<u8>,
}

impl DirentRecord {
    /// Constructs a DirentRecord from the node starting at `raw_offset`.
    ///
    /// # Arguments
    /// * `data` - The whole image
    /// * `raw_offset` - Position of the node's magic in `data`
    ///
    /// # Returns
    /// The decoded record, or an error if the fixed part or the name runs
    /// past the end of `data`.
    pub fn from_bytes(data: &[u8], raw_offset: usize) -> Result<Self, String> {
        let fixed = raw_offset
            .checked_add(NODE_HEADER_SIZE)
            .zip(raw_offset.checked_add(RAW_DIRENT_SIZE))
            .and_then(|(start, end)| data.get(start..end))
            .ok_or_else(|| format!("dirent node at 0x{:x} is truncated", raw_offset))?;

        let mut rdr = Cursor::new(fixed);
        let short = |e: io::Error| format!("dirent node at 0x{:x}: {}", raw_offset, e);
        let hdr_crc = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let parent_ino = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let version = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let target_ino = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let mctime = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let nsize = rdr.read_u8().map_err(short)? as usize;
        let entry_type = rdr.read_u8().map_err(short)?;
        let _unused = rdr.read_u16::<LittleEndian>().map_err(short)?;
        let node_crc = rdr.read_u32::<LittleEndian>().map_err(short)?;
        let name_crc = rdr.read_u32::<LittleEndian>().map_err(short)?;

        let name_start = raw_offset + RAW_DIRENT_SIZE;
        let name = data
            .get(name_start..name_start + nsize)
            .ok_or_else(|| format!("dirent node at 0x{:x}: name runs past the image", raw_offset))?
            .to_vec();

        Ok(DirentRecord {
            raw_offset,
            hdr_crc,
            parent_ino,
            version,
            target_ino,
            mctime,
            entry_type,
            node_crc,
            name_crc,
            name,
        })
    }

    /// Name as text, invalid UTF-8 replaced.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).to_string()
    }

    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(map) = value.as_object_mut() {
            map.insert("name".into(), json!(self.name_lossy()));
            map.insert("mctime_h".into(), json!(format_time(self.mctime)));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::dirent_node;

    #[test]
    fn decodes_name_after_fixed_part() {
        let node = dirent_node(1, 5, 42, "busybox");
        let rec = DirentRecord::from_bytes(&node, 0).unwrap();
        assert_eq!(rec.parent_ino, 1);
        assert_eq!(rec.version, 5);
        assert_eq!(rec.target_ino, 42);
        assert_eq!(rec.entry_type, 8);
        assert_eq!(rec.node_crc, 0xBBBB_0002);
        assert_eq!(rec.name_crc, 0xBBBB_0003);
        assert_eq!(rec.name_lossy(), "busybox");
    }

    #[test]
    fn decodes_at_an_offset() {
        let mut image = vec![0xFFu8; 16];
        image.extend_from_slice(&dirent_node(3, 1, 4, "etc"));
        let rec = DirentRecord::from_bytes(&image, 16).unwrap();
        assert_eq!(rec.raw_offset, 16);
        assert_eq!(rec.name, b"etc".to_vec());
    }

    #[test]
    fn truncated_name_is_rejected() {
        let node = dirent_node(1, 1, 2, "truncated-name");
        assert!(DirentRecord::from_bytes(&node[..node.len() - 3], 0).is_err());
        assert!(DirentRecord::from_bytes(&node[..20], 0).is_err());
    }

    #[test]
    fn json_shows_the_name_as_text() {
        let node = dirent_node(1, 1, 2, "init");
        let rec = DirentRecord::from_bytes(&node, 0).unwrap();
        assert_eq!(rec.to_json()["name"], "init");
    }
}
