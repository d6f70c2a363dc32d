use crate::node::{JFFS2_COMPR_NONE, JFFS2_COMPR_ZERO, JFFS2_COMPR_ZLIB, MAX_NODE_DATA};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn scheme_name(compr: u8) -> &'static str {
    match compr {
        0x00 => "none",
        0x01 => "zero",
        0x02 => "rtime",
        0x03 => "rubinmips",
        0x04 => "copy",
        0x05 => "dynrubin",
        0x06 => "zlib",
        0x07 => "lzo",
        _ => "unknown",
    }
}

/// Expand an on-disk payload into the data it describes.
///
/// Only zlib is actually decompressed. `none` is taken as is and `zero`
/// is `dsize` zero bytes. Every other scheme is reported as an error.
///
/// Expanded output never exceeds `dsize`, itself capped at `MAX_NODE_DATA`,
/// whatever the stream would inflate to.
pub fn decompress(compr: u8, raw: &[u8], dsize: usize) -> Result<Vec<u8>, String> {
    let limit = dsize.min(MAX_NODE_DATA);
    match compr {
        JFFS2_COMPR_NONE => Ok(raw.to_vec()),
        JFFS2_COMPR_ZERO => Ok(vec![0u8; limit]),
        JFFS2_COMPR_ZLIB => {
            let mut decoder = ZlibDecoder::new(raw).take(limit as u64);
            let mut out = Vec::with_capacity(limit);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| format!("zlib: {}", e))?;
            Ok(out)
        }
        other => Err(format!(
            "compression scheme {} (0x{:x}) is not supported",
            scheme_name(other),
            other
        )),
    }
}

/// Encode `data` with the given scheme, the way it would be laid out on flash.
pub fn compress(compr: u8, data: &[u8]) -> Result<Vec<u8>, String> {
    match compr {
        JFFS2_COMPR_NONE => Ok(data.to_vec()),
        JFFS2_COMPR_ZLIB => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| format!("zlib: {}", e))?;
            encoder.finish().map_err(|e| format!("zlib: {}", e))
        }
        other => Err(format!(
            "cannot encode with compression scheme {} (0x{:x})",
            scheme_name(other),
            other
        )),
    }
}
