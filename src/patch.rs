use crate::compression::compress;
use crate::inode::InodeDataRecord;
use crate::node::{NODE_HEADER_SIZE, RAW_INODE_SIZE};
use log::{debug, info, warn};
use serde::Serialize;
use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

/// Erased flash reads back as all ones.
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PatchStatus {
    Patched,
    /// The encoded content needs more room than the extent has on flash.
    /// Extents cannot grow in place, so the fragment was left untouched.
    TooLarge { needed: usize },
    /// The fragment's compression scheme cannot be produced.
    EncodeFailed(String),
}

/// What happened to one fragment of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentPatch {
    pub raw_offset: usize,
    pub version: u32,
    pub offset: u32,
    pub original_csize: u32,
    pub original_dsize: u32,
    pub new_csize: u32,
    pub new_dsize: u32,
    pub status: PatchStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub fragments: Vec<FragmentPatch>,
    pub bytes_written: usize,
}

impl PatchReport {
    /// Every fragment of the chain was rewritten.
    pub fn is_complete(&self) -> bool {
        !self.fragments.is_empty()
            && self
                .fragments
                .iter()
                .all(|f| f.status == PatchStatus::Patched)
    }

    /// At least one extent would have had to grow.
    pub fn needs_growth(&self) -> bool {
        self.fragments
            .iter()
            .any(|f| matches!(f.status, PatchStatus::TooLarge { .. }))
    }
}

/// Fragments the new content is spread over: starting at file offset 0,
/// each one begins where the previous one ended. When several versions
/// start at the same offset the last scanned one is used, as it is the one
/// that shows through an overlay.
pub fn patch_chain(fragments: &[InodeDataRecord]) -> Vec<&InodeDataRecord> {
    let mut chain = Vec::new();
    let mut next_offset = 0usize;
    while let Some(fragment) = fragments
        .iter()
        .rev()
        .find(|f| f.offset as usize == next_offset)
    {
        chain.push(fragment);
        if fragment.dsize == 0 {
            break;
        }
        next_offset += fragment.dsize as usize;
    }
    chain
}

/// Rewrite the extents of one inode inside `out`, an image copy.
///
/// Each fragment of the chain receives the slice of `new_data` matching its
/// original extent; the last one takes whatever remains. A fragment is only
/// rewritten when its encoded slice fits in its original `csize`, the slack
/// being filled with `ERASED_BYTE`. Offsets are relative to `base_offset`,
/// the start of the filesystem in `out`.
pub fn patch_fragments<W: Write + Seek>(
    out: &mut W,
    base_offset: u64,
    fragments: &[InodeDataRecord],
    new_data: &[u8],
) -> io::Result<PatchReport> {
    let chain = patch_chain(fragments);
    let mut report = PatchReport::default();
    let mut cursor = 0usize;

    for (idx, fragment) in chain.iter().enumerate() {
        let start = cursor.min(new_data.len());
        let end = if idx + 1 == chain.len() {
            new_data.len()
        } else {
            (start + fragment.dsize as usize).min(new_data.len())
        };
        let chunk = &new_data[start..end];
        cursor += fragment.dsize as usize;

        let mut outcome = FragmentPatch {
            raw_offset: fragment.raw_offset,
            version: fragment.version,
            offset: fragment.offset,
            original_csize: fragment.csize,
            original_dsize: fragment.dsize,
            new_csize: fragment.csize,
            new_dsize: fragment.dsize,
            status: PatchStatus::Patched,
        };

        let encoded = match compress(fragment.compr, chunk) {
            Ok(encoded) => encoded,
            Err(reason) => {
                warn!(
                    "Fragment at 0x{:x} (offset 0x{:x}) not patched: {}",
                    fragment.raw_offset, fragment.offset, reason
                );
                outcome.status = PatchStatus::EncodeFailed(reason);
                report.fragments.push(outcome);
                continue;
            }
        };

        if encoded.len() > fragment.csize as usize {
            warn!(
                "Fragment at 0x{:x} (offset 0x{:x}) cannot grow from 0x{:x} to 0x{:x} bytes",
                fragment.raw_offset,
                fragment.offset,
                fragment.csize,
                encoded.len()
            );
            outcome.status = PatchStatus::TooLarge {
                needed: encoded.len(),
            };
            report.fragments.push(outcome);
            continue;
        }

        let node_start = base_offset + fragment.raw_offset as u64;
        out.seek(SeekFrom::Start(node_start + NODE_HEADER_SIZE as u64))?;
        fragment.write_fixed_fields(out, encoded.len() as u32, chunk.len() as u32)?;
        out.write_all(&encoded)?;
        let slack = fragment.csize as usize - encoded.len();
        out.write_all(&vec![ERASED_BYTE; slack])?;

        report.bytes_written += RAW_INODE_SIZE - NODE_HEADER_SIZE + fragment.csize as usize;
        outcome.new_csize = encoded.len() as u32;
        outcome.new_dsize = chunk.len() as u32;
        info!(
            "Patched fragment at 0x{:x}: offset 0x{:x}, dsize 0x{:x} -> 0x{:x}, csize 0x{:x} -> 0x{:x}",
            fragment.raw_offset,
            fragment.offset,
            fragment.dsize,
            outcome.new_dsize,
            fragment.csize,
            outcome.new_csize
        );
        report.fragments.push(outcome);
    }

    debug!(
        "Patch chain of {} fragment(s), 0x{:x} bytes written",
        report.fragments.len(),
        report.bytes_written
    );
    Ok(report)
}

/// Copy `image_path` to `output_path` and patch the copy. The input image
/// is never opened for writing.
pub fn patch_file<P: AsRef<Path>, Q: AsRef<Path>>(
    image_path: P,
    output_path: Q,
    base_offset: u64,
    fragments: &[InodeDataRecord],
    new_data: &[u8],
) -> Result<PatchReport, Box<dyn Error>> {
    let mut reports = patch_inodes(image_path, output_path, base_offset, &[(0, fragments)], new_data)?;
    Ok(reports.pop().map(|(_, report)| report).unwrap_or_default())
}

/// Copy `image_path` to `output_path` once, then write `new_data` into the
/// chain of every `(ino, fragments)` pair on that single copy. All patches
/// land in the same output.
pub fn patch_inodes<P: AsRef<Path>, Q: AsRef<Path>>(
    image_path: P,
    output_path: Q,
    base_offset: u64,
    chains: &[(u32, &[InodeDataRecord])],
    new_data: &[u8],
) -> Result<Vec<(u32, PatchReport)>, Box<dyn Error>> {
    let image_path = image_path.as_ref();
    let output_path = output_path.as_ref();

    if output_path.exists() && fs::canonicalize(image_path)? == fs::canonicalize(output_path)? {
        return Err(format!(
            "refusing to patch '{}' in place, choose another output file",
            image_path.display()
        )
        .into());
    }

    fs::copy(image_path, output_path)?;
    let mut out = OpenOptions::new().write(true).open(output_path)?;
    let mut reports = Vec::with_capacity(chains.len());
    for (ino, fragments) in chains {
        let report = patch_fragments(&mut out, base_offset, fragments, new_data)?;
        info!(
            "Inode {}: {} fragment(s) patched in {}",
            ino,
            report.fragments.len(),
            output_path.display()
        );
        reports.push((*ino, report));
    }
    out.flush()?;
    Ok(reports)
}
