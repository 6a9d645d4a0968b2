//! In-place keyboard layout patcher for the reMarkable `xochitl` binary.
//!
//! The on-screen-keyboard layouts xochitl ships are Zstandard-compressed
//! JSON blobs embedded in the executable, not files on disk. This crate
//! finds the blob for a locale by structural scoring, substitutes key
//! contents from an override file, recompresses the result into the exact
//! byte range of the original frame (skippable-frame padding absorbs any
//! slack), and rewrites the binary in place without moving a single
//! surrounding byte.
//!
//! [`run_apply`] mutates the target (after writing a backup next to it);
//! [`run_check`] only reports whether a patch would change anything.

pub mod decode;
pub mod error;
pub mod identify;
pub mod layout;
pub mod scan;
pub mod transform;
pub mod util;
pub mod writer;

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{PatchError, Result};

pub struct Config {
    pub locale: String,
    pub override_json: PathBuf,
    pub target: PathBuf,
    /// Defaults to the target path with `.orig` appended.
    pub backup: Option<PathBuf>,
    pub decode_cap: usize,
}

impl Config {
    pub fn backup_path(&self) -> PathBuf {
        self.backup.clone().unwrap_or_else(|| {
            let mut name = self
                .target
                .file_name()
                .unwrap_or_default()
                .to_os_string();
            name.push(".orig");
            self.target.with_file_name(name)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The target already holds the desired layout contents.
    AlreadyPatched,
    /// Check mode only: a patch would change the file.
    PatchNeeded,
    /// Apply mode: file rewritten; SHA-256 of the patched binary.
    Patched { sha256: String },
}

struct Selection {
    offset: usize,
    capacity: usize,
    target_bytes: Vec<u8>,
    already: bool,
}

/// Report whether the target already matches the desired end state.
/// Reads only; exit mapping is 0 / 2 / 1 at the CLI.
pub fn run_check(cfg: &Config) -> Result<Outcome> {
    let over = load_override(&cfg.override_json)?;
    let (_file, map) = open_target(&cfg.target)?;
    let selection = select_target(&map, cfg, &over)?;
    Ok(if selection.already {
        Outcome::AlreadyPatched
    } else {
        Outcome::PatchNeeded
    })
}

/// Identify, transform and rewrite the target in place.
pub fn run_apply(cfg: &Config) -> Result<Outcome> {
    let over = load_override(&cfg.override_json)?;
    let backup = cfg.backup_path();

    // The map must be gone before the writer opens the file read-write.
    let selection = {
        let (_file, map) = open_target(&cfg.target)?;
        match select_target(&map, cfg, &over) {
            Ok(s) => s,
            // A run killed between write and fsync can leave a frame the
            // scanner cannot use; the backup still holds the original, so
            // restore it and scan once more.
            Err(e)
                if matches!(
                    e,
                    PatchError::NoMatch(_) | PatchError::NoCandidates(_)
                ) && backup.exists() =>
            {
                warn!(error = %e, backup = %backup.display(), "identification failed, retrying from backup");
                drop(map);
                std::fs::copy(&backup, &cfg.target)?;
                let (_file, map) = open_target(&cfg.target)?;
                select_target(&map, cfg, &over)?
            }
            Err(e) => return Err(e),
        }
    };

    if selection.already {
        info!("target already patched");
        return Ok(Outcome::AlreadyPatched);
    }

    let frame = writer::apply_in_place(
        &cfg.target,
        selection.offset,
        selection.capacity,
        &selection.target_bytes,
        &backup,
    )?;
    info!(
        offset = selection.offset,
        capacity = selection.capacity,
        level = frame.level,
        padding = frame.padding,
        "patched in place"
    );

    let sha256 = util::sha256_file(&cfg.target)?;
    Ok(Outcome::Patched { sha256 })
}

fn load_override(path: &Path) -> Result<Value> {
    let text = util::read_text_allow_bom(path)
        .map_err(|e| PatchError::Input(format!("override JSON: {e:#}")))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| PatchError::Input(format!("override JSON does not parse: {e}")))?;
    if !value.is_object() {
        return Err(PatchError::Input("override JSON is not an object".into()));
    }
    transform::validate_override(&value)?;
    Ok(value)
}

fn open_target(path: &Path) -> Result<(File, Mmap)> {
    let file = File::open(path)
        .map_err(|e| PatchError::TargetMissing(format!("{}: {e}", path.display())))?;
    let map = unsafe { Mmap::map(&file) }
        .map_err(|e| PatchError::TargetMissing(format!("{}: {e}", path.display())))?;
    Ok((file, map))
}

/// Pick the layout frame and compute the transformed serialisation.
fn select_target(data: &[u8], cfg: &Config, over: &Value) -> Result<Selection> {
    let sig = identify::signature_for(&cfg.locale)?;
    let candidates = identify::collect_candidates(data, cfg.decode_cap)?;

    if let Some((cand, score)) = identify::best_by_signature(&candidates, sig) {
        info!(
            offset = cand.offset,
            capacity = cand.compressed_len,
            total = score.total,
            "layout identified by signature"
        );
        let mapping = transform::build_mapping(&cand.layout, over);
        let mut after = cand.layout.clone();
        let stats = transform::apply_mapping(&mut after, &mapping);
        debug!(touched = stats.touched, changed = stats.changed, "mapping applied");
        if stats.touched == 0 {
            return Err(PatchError::Input(
                "override supplies no replacements for the identified layout".into(),
            ));
        }
        return Ok(Selection {
            offset: cand.offset,
            capacity: cand.compressed_len,
            target_bytes: transform::to_bytes(&after)?,
            already: stats.changed == 0,
        });
    }

    // A patched layout no longer carries the locale's letters, so the
    // signature cannot re-find it. A candidate the override transform
    // leaves untouched already equals the target contents.
    for cand in &candidates {
        if !identify::structural_gate(&cand.layout) {
            continue;
        }
        let mapping = transform::build_mapping(&cand.layout, over);
        if mapping.is_empty() {
            continue;
        }
        let mut after = cand.layout.clone();
        let stats = transform::apply_mapping(&mut after, &mapping);
        if stats.touched > 0 && stats.changed == 0 {
            info!(offset = cand.offset, "layout already equals the target contents");
            return Ok(Selection {
                offset: cand.offset,
                capacity: cand.compressed_len,
                target_bytes: transform::to_bytes(&cand.layout)?,
                already: true,
            });
        }
    }

    Err(PatchError::NoMatch(format!(
        "no candidate matches the {} signature",
        sig.locale
    )))
}
