//! Candidate frame enumeration.
//!
//! The target binary is never parsed as ELF; the scanner walks the raw byte
//! view for the two Zstandard magic families and yields every hit in
//! ascending offset order. Frame structure is not validated here, so
//! overlapping or bogus hits are fine; the decoder sorts them out.

use std::iter::Peekable;

use memchr::memmem::{self, FindIter};

/// Standard Zstandard frame magic.
pub const STANDARD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// ELF header magic; the target must carry it before and after a patch.
pub const ELF_MAGIC: [u8; 4] = [0x7F, 0x45, 0x4C, 0x46];

// Fixed tail of the skippable magic family 0x184D2A5n; the leading byte
// varies in its low nibble.
const SKIPPABLE_TAIL: [u8; 3] = [0x2A, 0x4D, 0x18];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicKind {
    Standard,
    Skippable,
}

/// Lazy two-pattern scan over a byte view, merged by offset.
pub struct FrameScanner<'a> {
    data: &'a [u8],
    standard: Peekable<FindIter<'a, 'static>>,
    skippable: Peekable<FindIter<'a, 'static>>,
}

impl<'a> FrameScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        FrameScanner {
            data,
            standard: memmem::find_iter(data, &STANDARD_MAGIC).peekable(),
            skippable: memmem::find_iter(data, &SKIPPABLE_TAIL).peekable(),
        }
    }

    // The skippable search keys on the three fixed tail bytes; a hit only
    // counts when the byte before it belongs to the 0x50..=0x5F family.
    fn peek_skippable(&mut self) -> Option<usize> {
        loop {
            let pos = *self.skippable.peek()?;
            if pos >= 1 && (self.data[pos - 1] & 0xF0) == 0x50 {
                return Some(pos - 1);
            }
            self.skippable.next();
        }
    }
}

impl Iterator for FrameScanner<'_> {
    type Item = (usize, MagicKind);

    fn next(&mut self) -> Option<Self::Item> {
        let skippable = self.peek_skippable();
        let standard = self.standard.peek().copied();
        match (standard, skippable) {
            (Some(s), Some(k)) if s <= k => {
                self.standard.next();
                Some((s, MagicKind::Standard))
            }
            (Some(s), None) => {
                self.standard.next();
                Some((s, MagicKind::Standard))
            }
            (_, Some(k)) => {
                self.skippable.next();
                Some((k, MagicKind::Skippable))
            }
            (None, None) => None,
        }
    }
}

/// Parse a single skippable frame that must cover `bytes` exactly; returns
/// the declared payload length.
pub fn parse_exact_skippable(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 8 {
        return None;
    }
    if (bytes[0] & 0xF0) != 0x50 || bytes[1..4] != SKIPPABLE_TAIL {
        return None;
    }
    let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if bytes.len() != 8 + len as usize {
        return None;
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(data: &[u8]) -> Vec<(usize, MagicKind)> {
        FrameScanner::new(data).collect()
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(offsets(&[]).is_empty());
        assert!(offsets(&[0u8; 64]).is_empty());
    }

    #[test]
    fn finds_standard_magic_in_order() {
        let mut data = vec![0u8; 100];
        data[10..14].copy_from_slice(&STANDARD_MAGIC);
        data[50..54].copy_from_slice(&STANDARD_MAGIC);
        assert_eq!(
            offsets(&data),
            vec![(10, MagicKind::Standard), (50, MagicKind::Standard)]
        );
    }

    #[test]
    fn recognises_every_skippable_variant_nibble() {
        for nibble in 0u8..16 {
            let mut data = vec![0u8; 32];
            data[4] = 0x50 | nibble;
            data[5..8].copy_from_slice(&SKIPPABLE_TAIL);
            assert_eq!(offsets(&data), vec![(4, MagicKind::Skippable)], "nibble {nibble}");
        }
    }

    #[test]
    fn skippable_tail_without_family_byte_is_not_a_hit() {
        let mut data = vec![0u8; 32];
        // 0x60 is outside the 0x5n family.
        data[4] = 0x60;
        data[5..8].copy_from_slice(&SKIPPABLE_TAIL);
        assert!(offsets(&data).is_empty());
        // Tail at offset 0 has no preceding byte at all.
        let mut head = vec![0u8; 16];
        head[0..3].copy_from_slice(&SKIPPABLE_TAIL);
        assert!(offsets(&head).is_empty());
    }

    #[test]
    fn merges_both_kinds_by_ascending_offset() {
        let mut data = vec![0u8; 100];
        data[40..44].copy_from_slice(&STANDARD_MAGIC);
        data[8] = 0x5A;
        data[9..12].copy_from_slice(&SKIPPABLE_TAIL);
        data[70] = 0x50;
        data[71..74].copy_from_slice(&SKIPPABLE_TAIL);
        assert_eq!(
            offsets(&data),
            vec![
                (8, MagicKind::Skippable),
                (40, MagicKind::Standard),
                (70, MagicKind::Skippable),
            ]
        );
    }

    #[test]
    fn adjacent_magics_both_reported() {
        let mut data = vec![0u8; 32];
        data[4..8].copy_from_slice(&STANDARD_MAGIC);
        data[8..12].copy_from_slice(&STANDARD_MAGIC);
        assert_eq!(
            offsets(&data),
            vec![(4, MagicKind::Standard), (8, MagicKind::Standard)]
        );
    }

    #[test]
    fn exact_skippable_roundtrip() {
        let mut frame = vec![0x50, 0x2A, 0x4D, 0x18];
        frame.extend_from_slice(&12u32.to_le_bytes());
        frame.extend_from_slice(&[0u8; 12]);
        assert_eq!(parse_exact_skippable(&frame), Some(12));

        // Wrong cover length.
        assert_eq!(parse_exact_skippable(&frame[..frame.len() - 1]), None);
        let mut longer = frame.clone();
        longer.push(0);
        assert_eq!(parse_exact_skippable(&longer), None);

        // Wrong magic.
        let mut bad = frame;
        bad[0] = 0x28;
        assert_eq!(parse_exact_skippable(&bad), None);
    }

    #[test]
    fn exact_skippable_minimum_is_the_bare_header() {
        let mut frame = vec![0x5F, 0x2A, 0x4D, 0x18];
        frame.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(parse_exact_skippable(&frame), Some(0));
        assert_eq!(parse_exact_skippable(&frame[..7]), None);
    }
}
