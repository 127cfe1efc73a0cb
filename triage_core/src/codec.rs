//! Compact text codec for sharing and restoring encounters.
//!
//! Wire format (pipe-delimited ASCII):
//!
//! ```text
//! <protocolCode>|R<base36>|H<base64>|F<decimal>|<idx>.<base36>.<outcomeIdx>|...
//! legacy: <protocolCode>|L<decimalIdx>|S<digitString>
//! ```
//!
//! Encoding always emits tokens in this canonical order. Decoding is lenient:
//! unknown or malformed tokens are skipped.

use crate::engine;
use crate::{Protocol, Run, StepKind, MAX_FLAG_OPTIONS};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const SEPARATOR: char = '|';

/// Which note sections the encounter should render
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InclusionFlags {
    pub algorithm: bool,
    pub decision_making: bool,
    pub hpi: bool,
}

impl InclusionFlags {
    pub fn all() -> Self {
        Self {
            algorithm: true,
            decision_making: true,
            hpi: true,
        }
    }

    /// Legacy payloads only ever carried the algorithm section
    pub fn legacy() -> Self {
        Self {
            algorithm: true,
            ..Self::default()
        }
    }

    /// bit0 algorithm, bit1 decision-making, bit2 HPI
    pub fn bits(&self) -> u32 {
        (self.algorithm as u32) | (self.decision_making as u32) << 1 | (self.hpi as u32) << 2
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            algorithm: bits & 1 != 0,
            decision_making: bits & 2 != 0,
            hpi: bits & 4 != 0,
        }
    }
}

/// One answered step on the wire
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepEntry {
    pub step_index: usize,
    pub selection_bitmask: u32,
    /// `None` for legacy entries, whose outcome was never recorded
    pub outcome_index: Option<usize>,
}

/// Decoded form of a note string
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodedNote {
    pub protocol_code: String,
    pub rf_flag_bitmask: u32,
    pub hpi_text: String,
    pub inclusion_flags: InclusionFlags,
    pub step_entries: Vec<StepEntry>,
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize a run, free text and inclusion flags into a note string
pub fn encode(
    protocol: &Protocol,
    run: &Run,
    free_text: &str,
    inclusion_flags: InclusionFlags,
    protocol_code: &str,
) -> String {
    let mut segments = vec![
        protocol_code.to_string(),
        format!("R{}", to_base36(red_flag_bitmask(protocol, run))),
    ];

    if !free_text.is_empty() {
        segments.push(format!("H{}", BASE64.encode(percent_encode(free_text))));
    }
    segments.push(format!("F{}", inclusion_flags.bits()));

    for (index, state) in run.step_states.iter().enumerate() {
        if protocol.steps[index].kind == StepKind::RedFlag || !state.visible {
            continue;
        }
        let Some(outcome) = state.chosen_outcome else {
            continue;
        };
        segments.push(format!(
            "{}.{}.{}",
            index,
            to_base36(selection_bitmask(&state.selected_flags)),
            outcome
        ));
    }

    let note = segments.join("|");
    tracing::debug!("Encoded run of {} into {} bytes", protocol.id, note.len());
    note
}

/// Red-flag selections packed across RedFlag steps in protocol order
pub fn red_flag_bitmask(protocol: &Protocol, run: &Run) -> u32 {
    let mut mask = 0u32;
    let mut offset = 0usize;
    for rf in protocol.red_flag_indices() {
        for &flag in &run.step_states[rf].selected_flags {
            let bit = offset + flag;
            if bit < MAX_FLAG_OPTIONS {
                mask |= 1u32 << bit;
            }
        }
        offset += protocol.steps[rf].flag_options.len();
    }
    if offset > MAX_FLAG_OPTIONS {
        tracing::warn!(
            "Protocol {} has {} red flags; only the first {} are encoded",
            protocol.id,
            offset,
            MAX_FLAG_OPTIONS
        );
    }
    mask
}

fn selection_bitmask(flags: &BTreeSet<usize>) -> u32 {
    flags
        .iter()
        .filter(|&&f| f < MAX_FLAG_OPTIONS)
        .fold(0u32, |mask, &f| mask | 1u32 << f)
}

fn bitmask_flags(mask: u32, count: usize) -> BTreeSet<usize> {
    (0..count.min(MAX_FLAG_OPTIONS))
        .filter(|f| mask & (1u32 << f) != 0)
        .collect()
}

// ============================================================================
// Decoding
// ============================================================================

/// Parse a note string; `None` means there is nothing to restore
pub fn decode(text: &str) -> Option<EncodedNote> {
    let mut tokens = text.trim().split(SEPARATOR).filter(|t| !t.is_empty());

    let protocol_code = tokens.next()?;
    if !is_protocol_code(protocol_code) {
        tracing::debug!("Rejected note with protocol code {:?}", protocol_code);
        return None;
    }

    let mut note = EncodedNote {
        protocol_code: protocol_code.to_string(),
        rf_flag_bitmask: 0,
        hpi_text: String::new(),
        inclusion_flags: InclusionFlags::all(),
        step_entries: Vec::new(),
    };
    let mut legacy_index: Option<usize> = None;
    let mut legacy_selection: Option<u32> = None;

    for token in tokens {
        let Some(lead) = token.chars().next() else {
            continue;
        };
        let body = &token[lead.len_utf8()..];

        let parsed = match lead {
            'R' => from_base36(body).map(|mask| note.rf_flag_bitmask = mask),
            'H' => {
                note.hpi_text = decode_free_text(body);
                Some(())
            }
            'F' => body
                .parse::<u32>()
                .ok()
                .map(|bits| note.inclusion_flags = InclusionFlags::from_bits(bits)),
            'L' => body.parse::<usize>().ok().map(|i| legacy_index = Some(i)),
            'S' => parse_legacy_selection(body).map(|mask| legacy_selection = Some(mask)),
            c if c.is_ascii_digit() => {
                parse_step_entry(token).map(|entry| note.step_entries.push(entry))
            }
            _ => None,
        };

        if parsed.is_none() {
            tracing::debug!("Skipping unrecognized note token {:?}", token);
        }
    }

    if note.step_entries.is_empty() {
        if let Some(step_index) = legacy_index {
            note.step_entries.push(StepEntry {
                step_index,
                selection_bitmask: legacy_selection.unwrap_or(0),
                outcome_index: None,
            });
            note.inclusion_flags = InclusionFlags::legacy();
        }
    }

    Some(note)
}

fn is_protocol_code(code: &str) -> bool {
    code.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn parse_step_entry(token: &str) -> Option<StepEntry> {
    let mut parts = token.split('.');
    let step_index = parts.next()?.parse().ok()?;
    let selection_bitmask = from_base36(parts.next()?)?;
    let outcome_index = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(StepEntry {
        step_index,
        selection_bitmask,
        outcome_index: Some(outcome_index),
    })
}

/// One decimal digit per selected flag, 1-based; "0" means none
fn parse_legacy_selection(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(
        digits
            .chars()
            .filter_map(|c| c.to_digit(10))
            .filter(|&d| d > 0)
            .fold(0u32, |mask, d| mask | 1u32 << (d - 1)),
    )
}

/// base64(percent-encoded UTF-8), falling back to raw base64 or raw
/// percent-encoding when the payload was written differently
fn decode_free_text(body: &str) -> String {
    match BASE64.decode(body) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            percent_decode(&text).unwrap_or(text)
        }
        Err(_) => percent_decode(body).unwrap_or_else(|| body.to_string()),
    }
}

// ============================================================================
// Restoring
// ============================================================================

/// Rebuild a run by replaying a decoded note through the decision engine
///
/// Red flags are applied first, then step entries in ascending index order.
/// Entries naming RedFlag or unknown steps are skipped, as are new-format
/// entries for steps that are hidden at replay time. A legacy entry for a
/// hidden step only sets that step's selection.
///
/// `active_disposition` is whatever the forward replay leaves behind. A run
/// that reached its state through `undo` can carry an older disposition than
/// the one restored here, because the note does not record how it got there.
pub fn restore(protocol: &Protocol, note: &EncodedNote) -> Run {
    if note.protocol_code != protocol.id {
        tracing::warn!(
            "Restoring note for {} into protocol {}",
            note.protocol_code,
            protocol.id
        );
    }

    let mut run = engine::start(protocol);

    let mut offset = 0usize;
    for rf in protocol.red_flag_indices() {
        let count = protocol.steps[rf].flag_options.len();
        for flag in 0..count {
            let bit = offset + flag;
            if bit < MAX_FLAG_OPTIONS && note.rf_flag_bitmask & (1u32 << bit) != 0 {
                run = engine::toggle_flag(protocol, &run, rf, flag);
            }
        }
        offset += count;
    }

    let mut entries: Vec<&StepEntry> = note.step_entries.iter().collect();
    entries.sort_by_key(|e| e.step_index);

    for entry in entries {
        let index = entry.step_index;
        let Some(step) = protocol.steps.get(index) else {
            tracing::warn!("Note names step {} outside protocol {}", index, protocol.id);
            continue;
        };
        if step.kind == StepKind::RedFlag {
            tracing::debug!("Skipping note entry for RedFlag step {}", index);
            continue;
        }

        let wanted = bitmask_flags(entry.selection_bitmask, step.flag_options.len());
        if !run.step_states[index].visible {
            if entry.outcome_index.is_none() {
                tracing::debug!(
                    "Legacy entry for hidden step {}: selection kept, visibility not rebuilt",
                    index
                );
                run.step_states[index].selected_flags = wanted;
            } else {
                tracing::debug!("Skipping note entry for hidden step {}", index);
            }
            continue;
        }

        let current = run.step_states[index].selected_flags.clone();
        for &flag in current.symmetric_difference(&wanted) {
            run = engine::toggle_flag(protocol, &run, index, flag);
        }

        if let Some(outcome) = entry.outcome_index {
            if outcome >= step.outcomes.len() {
                tracing::warn!("Note names outcome {} missing from step {}", outcome, index);
            } else if run.step_states[index].chosen_outcome != Some(outcome) {
                run = engine::choose_outcome(protocol, &run, index, outcome);
            }
        }
        run.step_states[index].selected_flags = wanted;
    }

    run
}

// ============================================================================
// Text helpers
// ============================================================================

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn to_base36(mut value: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Strict inverse of [`to_base36`]: lowercase digits only, no sign
pub fn from_base36(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| BASE36_DIGITS.contains(&b)) {
        return None;
    }
    u32::from_str_radix(text, 36).ok()
}

/// `encodeURIComponent`-compatible percent-encoding
pub fn percent_encode(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Inverse of [`percent_encode`]; `None` on bad escapes or invalid UTF-8
pub fn percent_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
