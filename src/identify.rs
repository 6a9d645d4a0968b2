//! Locale signatures and candidate selection.
//!
//! Layout blobs carry no name or id, so the right one is picked by scoring
//! each decoded JSON object against the letters a locale's three alphabetic
//! rows are expected to hold. Scores are set-based: reordered keys still
//! match, missing letters cost, locale extras (the umlaut keys for de_DE)
//! weigh heaviest because they separate the locale from its QWERTY cousins.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, trace};

use crate::decode::{self, DecodedLayout};
use crate::error::{PatchError, Result};
use crate::layout;
use crate::scan::{FrameScanner, MagicKind};

#[derive(Debug)]
pub struct LocaleSignature {
    pub locale: &'static str,
    /// Base Latin letters expected in each of the three alphabetic rows.
    pub rows: [&'static [char]; 3],
    /// Locale-extra letters expected in each row.
    pub extras: [&'static [char]; 3],
}

static DE_DE: LocaleSignature = LocaleSignature {
    locale: "de_DE",
    rows: [
        &['q', 'w', 'e', 'r', 't', 'z', 'u', 'i', 'o', 'p'],
        &['a', 's', 'd', 'f', 'g', 'h', 'j', 'k', 'l'],
        &['y', 'x', 'c', 'v', 'b', 'n', 'm'],
    ],
    extras: [&['ü'], &['ö', 'ä'], &[]],
};

pub fn signature_for(locale: &str) -> Result<&'static LocaleSignature> {
    match locale {
        "de_DE" => Ok(&DE_DE),
        other => Err(PatchError::Input(format!("unsupported locale {other}"))),
    }
}

const ROW_LETTER_WEIGHT: i32 = 100;
const EXTRA_WEIGHT: i32 = 400;
const MISSING_PENALTY: i32 = 50;

#[derive(Debug, Clone, Copy)]
pub struct Score {
    pub total: i32,
    pub row_hits: [usize; 3],
    pub extras_present: usize,
    pub extras_expected: usize,
}

impl Score {
    /// Minimum acceptance: every row contributed at least one expected
    /// letter and every locale-extra letter is present.
    pub fn accepted(&self) -> bool {
        self.row_hits.iter().all(|&h| h > 0) && self.extras_present == self.extras_expected
    }
}

/// A candidate must hold `alphabetic` with at least three non-empty rows
/// and a `special` array before scoring means anything.
pub fn structural_gate(v: &Value) -> bool {
    let Some(rows) = layout::alphabetic_rows(v) else {
        return false;
    };
    if rows.len() < 3 {
        return false;
    }
    if !rows[..3]
        .iter()
        .all(|r| r.as_array().is_some_and(|a| !a.is_empty()))
    {
        return false;
    }
    v.get("special").is_some_and(Value::is_array)
}

pub fn score_layout(v: &Value, sig: &LocaleSignature) -> Option<Score> {
    if !structural_gate(v) {
        return None;
    }
    let rows = layout::alphabetic_rows(v)?;

    let mut total = 0i32;
    let mut row_hits = [0usize; 3];
    let mut extras_present = 0usize;
    let mut extras_expected = 0usize;

    for i in 0..3 {
        let observed: HashSet<char> = rows[i]
            .as_array()?
            .iter()
            .filter_map(layout::base_letter)
            .collect();
        let hits = sig.rows[i].iter().filter(|c| observed.contains(*c)).count();
        let missing = sig.rows[i].len() - hits;
        let extras = sig.extras[i].iter().filter(|c| observed.contains(*c)).count();

        row_hits[i] = hits;
        extras_present += extras;
        extras_expected += sig.extras[i].len();
        total += hits as i32 * ROW_LETTER_WEIGHT + extras as i32 * EXTRA_WEIGHT
            - missing as i32 * MISSING_PENALTY;
    }

    Some(Score {
        total,
        row_hits,
        extras_present,
        extras_expected,
    })
}

pub struct Candidate {
    pub offset: usize,
    pub compressed_len: usize,
    pub layout: Value,
}

/// Walk the scanner and keep every standard frame that decodes to a JSON
/// object. Errors with `no-candidates` when no standard magic exists at all.
pub fn collect_candidates(data: &[u8], decode_cap: usize) -> Result<Vec<Candidate>> {
    let mut standard = 0usize;
    let mut skippable = 0usize;
    let mut out = Vec::new();

    for (offset, kind) in FrameScanner::new(data) {
        match kind {
            MagicKind::Skippable => {
                skippable += 1;
                continue;
            }
            MagicKind::Standard => standard += 1,
        }
        match decode::decode_layout(data, offset, decode_cap) {
            Ok(DecodedLayout {
                value,
                compressed_len,
            }) => {
                trace!(offset, compressed_len, "candidate decoded");
                out.push(Candidate {
                    offset,
                    compressed_len,
                    layout: value,
                });
            }
            Err(reason) => trace!(offset, reason = reason.tag(), "candidate rejected"),
        }
    }

    debug!(standard, skippable, decoded = out.len(), "frame scan finished");
    if standard == 0 {
        return Err(PatchError::NoCandidates(
            "no standard Zstandard frame magic in target".into(),
        ));
    }
    Ok(out)
}

/// Best accepted candidate by score; ties keep the earliest offset.
pub fn best_by_signature<'a>(
    candidates: &'a [Candidate],
    sig: &LocaleSignature,
) -> Option<(&'a Candidate, Score)> {
    let mut best: Option<(&Candidate, Score)> = None;
    for cand in candidates {
        let Some(score) = score_layout(&cand.layout, sig) else {
            continue;
        };
        trace!(offset = cand.offset, total = score.total, "candidate scored");
        if !score.accepted() {
            continue;
        }
        match &best {
            Some((_, b)) if score.total <= b.total => {}
            _ => best = Some((cand, score)),
        }
    }
    if let Some((cand, score)) = &best {
        debug!(
            offset = cand.offset,
            capacity = cand.compressed_len,
            total = score.total,
            "best candidate"
        );
    }
    best
}
