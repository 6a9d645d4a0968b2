//! Capacity-budgeted recompression and atomic in-place mutation.
//!
//! The hard invariant lives here: the replacement must occupy the exact
//! byte range of the original frame. `build_replacement` is pure so the
//! level ladder and padding arithmetic stay unit-testable without touching
//! a file; `apply_in_place` wraps it with backup, positioned write, fsync,
//! post-write validation, and restore-on-failure.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::decode;
use crate::error::{PatchError, Result};
use crate::scan::{parse_exact_skippable, ELF_MAGIC};

/// Compression levels tried in order; the first whose output fits wins.
pub const LEVEL_LADDER: [i32; 6] = [22, 19, 15, 11, 7, 3];

#[derive(Debug)]
pub struct BuiltFrame {
    /// Exactly `capacity` bytes: one standard frame plus optional padding.
    pub bytes: Vec<u8>,
    pub level: i32,
    pub padding: usize,
}

/// Recompress `payload` so the result occupies exactly `capacity` bytes,
/// absorbing slack with a single skippable frame.
pub fn build_replacement(payload: &[u8], capacity: usize) -> Result<BuiltFrame> {
    let mut smallest = usize::MAX;
    for &level in &LEVEL_LADDER {
        let compressed = zstd::bulk::compress(payload, level)?;
        smallest = smallest.min(compressed.len());
        if compressed.len() > capacity {
            debug!(level, len = compressed.len(), capacity, "level does not fit");
            continue;
        }
        let slack = capacity - compressed.len();
        debug!(level, len = compressed.len(), slack, "level fits");
        return match slack {
            0 => Ok(BuiltFrame {
                bytes: compressed,
                level,
                padding: 0,
            }),
            1..=7 => Err(PatchError::PaddingTooSmall { slack }),
            _ => {
                let mut bytes = compressed;
                bytes.extend_from_slice(&skippable_frame(slack));
                debug_assert_eq!(bytes.len(), capacity);
                Ok(BuiltFrame {
                    bytes,
                    level,
                    padding: slack,
                })
            }
        };
    }
    Err(PatchError::CapacityExceeded { smallest, capacity })
}

// One skippable frame of `total` bytes: magic 50 2A 4D 18, little-endian
// payload length, zero payload.
fn skippable_frame(total: usize) -> Vec<u8> {
    debug_assert!(total >= 8);
    let payload_len = (total - 8) as u32;
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&0x184D_2A50u32.to_le_bytes());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.resize(total, 0);
    frame
}

/// Mutate `target` so `[offset, offset + capacity)` holds a frame decoding
/// to `payload`. The sequence backup, write, fsync, validate, restore-on-
/// failure runs in that order and nothing is skipped.
pub fn apply_in_place(
    target: &Path,
    offset: usize,
    capacity: usize,
    payload: &[u8],
    backup: &Path,
) -> Result<BuiltFrame> {
    let frame = build_replacement(payload, capacity)?;
    let original_len = fs::metadata(target)?.len();

    if !backup.exists() {
        fs::copy(target, backup)?;
        debug!(backup = %backup.display(), "backup written");
    }

    if let Err(e) = write_region(target, offset, &frame.bytes) {
        warn!(error = %e, "write failed, restoring backup");
        restore_backup(backup, target);
        return Err(PatchError::Io(e));
    }

    if let Err(e) = validate_patched(target, offset, capacity, payload, original_len) {
        warn!(error = %e, "post-write validation failed, restoring backup");
        restore_backup(backup, target);
        return Err(e);
    }

    Ok(frame)
}

fn write_region(target: &Path, offset: usize, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = OpenOptions::new().read(true).write(true).open(target)?;
    f.seek(SeekFrom::Start(offset as u64))?;
    f.write_all(bytes)?;
    f.flush()?;
    f.sync_all()?;
    Ok(())
}

// Best-effort; the error surfaced to the caller stays the original one.
fn restore_backup(backup: &Path, target: &Path) {
    if let Err(e) = fs::copy(backup, target) {
        warn!(error = %e, "backup restore failed");
    }
}

fn validate_patched(
    target: &Path,
    offset: usize,
    capacity: usize,
    payload: &[u8],
    original_len: u64,
) -> Result<()> {
    let file = File::open(target)?;
    let map = unsafe { Mmap::map(&file)? };
    let data: &[u8] = &map;

    if data.len() as u64 != original_len {
        return Err(PatchError::PostWriteValidation(format!(
            "file length changed: {} -> {}",
            original_len,
            data.len()
        )));
    }
    if !data.starts_with(&ELF_MAGIC) {
        return Err(PatchError::PostWriteValidation(
            "target does not start with the ELF magic".into(),
        ));
    }
    let end = offset
        .checked_add(capacity)
        .filter(|&e| e <= data.len())
        .ok_or_else(|| {
            PatchError::PostWriteValidation("patched range exceeds file bounds".into())
        })?;

    let decoded = decode::decode_raw(data, offset, payload.len()).map_err(|r| {
        PatchError::PostWriteValidation(format!("patched frame does not decode: {}", r.tag()))
    })?;
    if decoded.bytes != payload {
        return Err(PatchError::PostWriteValidation(
            "patched frame decodes to different bytes".into(),
        ));
    }
    if decoded.compressed_len > capacity {
        return Err(PatchError::PostWriteValidation(
            "patched frame overruns its capacity".into(),
        ));
    }
    let pad = &data[offset + decoded.compressed_len..end];
    if !pad.is_empty() && parse_exact_skippable(pad).is_none() {
        return Err(PatchError::PostWriteValidation(
            "trailing slack is not a single skippable frame".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEXT: &[u8] = br#"{"alphabetic":[["a","b","c"],["d","e","f"],["g","h","i"]],"special":["x","y"],"pad":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}"#;

    fn level22_len(payload: &[u8]) -> usize {
        zstd::bulk::compress(payload, 22).unwrap().len()
    }

    #[test]
    fn exact_fit_needs_no_padding() {
        let capacity = level22_len(TEXT);
        let frame = build_replacement(TEXT, capacity).unwrap();
        assert_eq!(frame.bytes.len(), capacity);
        assert_eq!(frame.level, 22);
        assert_eq!(frame.padding, 0);
        let out = decode::decode_raw(&frame.bytes, 0, TEXT.len()).unwrap();
        assert_eq!(out.bytes, TEXT);
        assert_eq!(out.compressed_len, capacity);
    }

    #[test]
    fn slack_is_absorbed_by_one_skippable_frame() {
        let capacity = level22_len(TEXT) + 100;
        let frame = build_replacement(TEXT, capacity).unwrap();
        assert_eq!(frame.bytes.len(), capacity);
        assert_eq!(frame.padding, 100);
        let out = decode::decode_raw(&frame.bytes, 0, TEXT.len()).unwrap();
        assert_eq!(out.bytes, TEXT);
        let pad = &frame.bytes[out.compressed_len..];
        assert_eq!(parse_exact_skippable(pad), Some(92));
    }

    #[test]
    fn minimal_padding_is_the_bare_header() {
        let capacity = level22_len(TEXT) + 8;
        let frame = build_replacement(TEXT, capacity).unwrap();
        assert_eq!(frame.padding, 8);
        let out = decode::decode_raw(&frame.bytes, 0, TEXT.len()).unwrap();
        assert_eq!(parse_exact_skippable(&frame.bytes[out.compressed_len..]), Some(0));
    }

    #[test]
    fn sub_header_slack_fails() {
        let capacity = level22_len(TEXT) + 3;
        let err = build_replacement(TEXT, capacity).unwrap_err();
        assert!(matches!(err, PatchError::PaddingTooSmall { slack: 3 }));
    }

    #[test]
    fn impossible_capacity_fails_after_the_whole_ladder() {
        let floor = LEVEL_LADDER
            .iter()
            .map(|&l| zstd::bulk::compress(TEXT, l).unwrap().len())
            .min()
            .unwrap();
        let err = build_replacement(TEXT, floor - 1).unwrap_err();
        match err {
            PatchError::CapacityExceeded { smallest, capacity } => {
                assert_eq!(smallest, floor);
                assert_eq!(capacity, floor - 1);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    proptest! {
        // The capacity invariant for arbitrary payloads and slack sizes:
        // an accepted build is always exactly capacity bytes, roundtrips,
        // and carries well-formed padding; 1..=7 bytes of slack always
        // fail cleanly.
        #[test]
        fn replacement_always_fills_capacity(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            extra in 0usize..256,
        ) {
            let base = level22_len(&payload);
            let capacity = base + extra;
            match build_replacement(&payload, capacity) {
                Ok(frame) => {
                    prop_assert!(extra == 0 || extra >= 8);
                    prop_assert_eq!(frame.bytes.len(), capacity);
                    prop_assert_eq!(frame.padding, extra);
                    let out = decode::decode_raw(&frame.bytes, 0, payload.len()).unwrap();
                    prop_assert_eq!(out.bytes, payload);
                    prop_assert_eq!(out.compressed_len, base);
                    if extra > 0 {
                        let pad = &frame.bytes[base..];
                        prop_assert_eq!(parse_exact_skippable(pad), Some((extra - 8) as u32));
                    }
                }
                Err(PatchError::PaddingTooSmall { slack }) => {
                    prop_assert_eq!(slack, extra);
                    prop_assert!((1..8).contains(&extra));
                }
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }
}
