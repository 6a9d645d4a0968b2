//! Candidate decompression and JSON gating.
//!
//! The capacity any rewrite must respect is the exact number of source
//! bytes the Zstandard decoder consumed to reach the frame end, so the
//! decode runs through the streaming API and reports the input position
//! rather than trusting any length field found in the binary.

use serde_json::Value;
use zstd::zstd_safe::{DCtx, InBuffer, OutBuffer};

use crate::scan::STANDARD_MAGIC;

/// Default safety cap for decoded payloads (8 MiB).
pub const DEFAULT_DECODE_CAP: usize = 8 * 1024 * 1024;

const OUT_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    NotZstd,
    Truncated,
    DecodeError,
    /// Decoded output exceeded the safety cap; reported under `decode-error`.
    TooLarge,
    NotUtf8,
    NotJson,
}

impl DecodeFailure {
    pub fn tag(self) -> &'static str {
        match self {
            DecodeFailure::NotZstd => "not-zstd",
            DecodeFailure::Truncated => "truncated",
            DecodeFailure::DecodeError | DecodeFailure::TooLarge => "decode-error",
            DecodeFailure::NotUtf8 => "not-utf8",
            DecodeFailure::NotJson => "not-json",
        }
    }
}

#[derive(Debug)]
pub struct DecodedFrame {
    pub bytes: Vec<u8>,
    /// Source bytes consumed from `offset` to produce `bytes`.
    pub compressed_len: usize,
}

#[derive(Debug)]
pub struct DecodedLayout {
    pub value: Value,
    pub compressed_len: usize,
}

/// Decode one standard frame starting at `offset`.
///
/// Stops exactly at the frame boundary; trailing bytes in the source are
/// not touched and not counted. Output larger than `cap` is rejected
/// before it accumulates much past the limit.
pub fn decode_raw(data: &[u8], offset: usize, cap: usize) -> Result<DecodedFrame, DecodeFailure> {
    let src = data.get(offset..).ok_or(DecodeFailure::NotZstd)?;
    if !src.starts_with(&STANDARD_MAGIC) {
        return Err(DecodeFailure::NotZstd);
    }

    let mut dctx = DCtx::create();
    let mut input = InBuffer::around(src);
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; OUT_CHUNK];

    loop {
        let (produced, done) = {
            let mut output = OutBuffer::around(&mut chunk[..]);
            let hint = dctx
                .decompress_stream(&mut output, &mut input)
                .map_err(|_| DecodeFailure::DecodeError)?;
            (output.pos(), hint == 0)
        };
        bytes.extend_from_slice(&chunk[..produced]);
        if bytes.len() > cap {
            return Err(DecodeFailure::TooLarge);
        }
        if done {
            return Ok(DecodedFrame {
                bytes,
                compressed_len: input.pos,
            });
        }
        if produced == 0 && input.pos == src.len() {
            return Err(DecodeFailure::Truncated);
        }
    }
}

/// Full candidate gate: frame decode, UTF-8 check, JSON parse, object check.
pub fn decode_layout(
    data: &[u8],
    offset: usize,
    cap: usize,
) -> Result<DecodedLayout, DecodeFailure> {
    let frame = decode_raw(data, offset, cap)?;
    let text = std::str::from_utf8(&frame.bytes).map_err(|_| DecodeFailure::NotUtf8)?;
    let value: Value = serde_json::from_str(text).map_err(|_| DecodeFailure::NotJson)?;
    if !value.is_object() {
        return Err(DecodeFailure::NotJson);
    }
    Ok(DecodedLayout {
        value,
        compressed_len: frame.compressed_len,
    })
}
