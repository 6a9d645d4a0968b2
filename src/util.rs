//! Override text loading and file hashing.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};

/// Read a text file tolerating a UTF-8 BOM or UTF-16 in either endianness
/// (BOM required). Override files come from desktop editors that save any
/// of these.
pub fn read_text_allow_bom(path: &Path) -> anyhow::Result<String> {
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    if let Some(rest) = raw.strip_prefix(&[0xEF, 0xBB, 0xBF][..]) {
        return String::from_utf8(rest.to_vec()).context("utf-8 after BOM");
    }
    if raw.starts_with(&[0xFF, 0xFE]) {
        return utf16_units(&raw[2..], u16::from_le_bytes).context("utf-16le");
    }
    if raw.starts_with(&[0xFE, 0xFF]) {
        return utf16_units(&raw[2..], u16::from_be_bytes).context("utf-16be");
    }
    String::from_utf8(raw).context("utf-8")
}

fn utf16_units(body: &[u8], decode: fn([u8; 2]) -> u16) -> anyhow::Result<String> {
    if body.len() % 2 != 0 {
        bail!("odd byte count in utf-16 payload");
    }
    let units: Vec<u16> = body.chunks_exact(2).map(|p| decode([p[0], p[1]])).collect();
    Ok(String::from_utf16(&units)?)
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
