use crate::inode::InodeDataRecord;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// How the fragments of one inode are put back together.
///
/// Neither policy is more correct than the other on a damaged log, so both
/// are kept and the caller picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ReassemblyPolicy {
    /// Write every fragment at its offset in scan order; later fragments
    /// overwrite earlier ones, uncovered bytes stay zero.
    #[default]
    Overlay,
    /// Follow the chain of fragments starting at offset 0, each one picking
    /// up where the previous ended. Stops growing at the first gap.
    Sequential,
}

impl ReassemblyPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ReassemblyPolicy::Overlay => "overlay",
            ReassemblyPolicy::Sequential => "sequential",
        }
    }
}

impl fmt::Display for ReassemblyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReassemblyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overlay" => Ok(ReassemblyPolicy::Overlay),
            "sequential" | "seq" => Ok(ReassemblyPolicy::Sequential),
            other => Err(format!("unknown reassembly policy '{}'", other)),
        }
    }
}

/// The bytes a fragment contributes: its payload clipped to `dsize`.
fn fragment_bytes(fragment: &InodeDataRecord) -> &[u8] {
    let data = fragment.payload.data();
    &data[..data.len().min(fragment.dsize as usize)]
}

pub fn overlay(fragments: &[InodeDataRecord]) -> Vec<u8> {
    let len = fragments.iter().map(|f| f.end()).max().unwrap_or(0);
    let mut data = vec![0u8; len];
    for fragment in fragments {
        let bytes = fragment_bytes(fragment);
        let start = fragment.offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }
    data
}

pub fn sequential(fragments: &[InodeDataRecord]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut next_offset = 0usize;
    for fragment in fragments {
        if fragment.offset as usize != next_offset {
            continue;
        }
        data.extend_from_slice(fragment_bytes(fragment));
        next_offset += fragment.dsize as usize;
        // A short payload still occupies its whole extent.
        data.resize(next_offset, 0);
    }
    data
}

pub fn reassemble(fragments: &[InodeDataRecord], policy: ReassemblyPolicy) -> Vec<u8> {
    match policy {
        ReassemblyPolicy::Overlay => overlay(fragments),
        ReassemblyPolicy::Sequential => sequential(fragments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::JFFS2_COMPR_ZLIB;
    use crate::testutil::{inode_node, InodeSpec};

    fn frag(spec: InodeSpec) -> InodeDataRecord {
        InodeDataRecord::from_bytes(&inode_node(&spec), 0).unwrap()
    }

    #[test]
    fn later_fragment_wins_on_overlap() {
        let fragments = vec![
            frag(InodeSpec::new(2, 1, 0, b"AAAAAAAAAA")),
            frag(InodeSpec::new(2, 2, 4, b"bbbb")),
        ];
        assert_eq!(overlay(&fragments), b"AAAAbbbbAA".to_vec());
    }

    #[test]
    fn overlap_precedence_is_scan_order_not_version() {
        let fragments = vec![
            frag(InodeSpec::new(2, 9, 0, b"newer")),
            frag(InodeSpec::new(2, 1, 0, b"older")),
        ];
        assert_eq!(overlay(&fragments), b"older".to_vec());
    }

    #[test]
    fn gap_handling_differs_between_policies() {
        let fragments = vec![
            frag(InodeSpec::new(2, 1, 0, b"0123456789")),
            frag(InodeSpec::new(2, 2, 20, b"klmnopqrst")),
        ];
        assert_eq!(sequential(&fragments), b"0123456789".to_vec());

        let full = overlay(&fragments);
        assert_eq!(full.len(), 30);
        assert_eq!(&full[..10], b"0123456789");
        assert_eq!(&full[10..20], &[0u8; 10]);
        assert_eq!(&full[20..], b"klmnopqrst");
    }

    #[test]
    fn sequential_follows_the_chain_in_scan_order() {
        let fragments = vec![
            frag(InodeSpec::new(2, 1, 0, b"abc")),
            frag(InodeSpec::new(2, 2, 6, b"ghi")),
            frag(InodeSpec::new(2, 3, 3, b"def")),
        ];
        // [6, 9) came before the chain reached it and is not revisited.
        assert_eq!(sequential(&fragments), b"abcdef".to_vec());
        assert_eq!(overlay(&fragments), b"abcdefghi".to_vec());
    }

    #[test]
    fn failed_payload_leaves_zeros_and_keeps_the_rest() {
        let fragments = vec![
            frag(InodeSpec::new(2, 1, 0, b"broken!!").with_compr(JFFS2_COMPR_ZLIB)),
            frag(InodeSpec::new(2, 2, 8, b"ok")),
        ];
        let mut expected = vec![0u8; 8];
        expected.extend_from_slice(b"ok");
        assert_eq!(overlay(&fragments), expected);
        assert_eq!(sequential(&fragments), expected);
    }

    #[test]
    fn mixed_compression_reassembles() {
        let fragments = vec![
            frag(InodeSpec::new(2, 1, 0, b"plain text, ").zlib()),
            frag(InodeSpec::new(2, 2, 12, b"then more")),
        ];
        assert_eq!(
            reassemble(&fragments, ReassemblyPolicy::Overlay),
            b"plain text, then more".to_vec()
        );
    }

    #[test]
    fn no_fragments_no_bytes() {
        assert!(overlay(&[]).is_empty());
        assert!(sequential(&[]).is_empty());
    }

    #[test]
    fn policy_parses_from_cli_text() {
        assert_eq!("overlay".parse::<ReassemblyPolicy>(), Ok(ReassemblyPolicy::Overlay));
        assert_eq!("Sequential".parse::<ReassemblyPolicy>(), Ok(ReassemblyPolicy::Sequential));
        assert!("newest".parse::<ReassemblyPolicy>().is_err());
        assert_eq!(ReassemblyPolicy::default().to_string(), "overlay");
    }
}
