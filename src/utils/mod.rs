//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;
pub mod retry;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use regex::Regex;
use std::sync::OnceLock;

/// Normalize a phone number to bare E.164 digits (no leading plus).
///
/// Accepts common formatting noise (spaces, dashes, dots, parentheses,
/// a leading `+`) and rejects anything that does not leave 8 to 15 digits.
pub fn normalize_phone(raw: &str) -> Result<String> {
    static STRIP_RE: OnceLock<Regex> = OnceLock::new();

    let re = STRIP_RE.get_or_init(|| Regex::new(r"[\s\-.()]").expect("Invalid regex pattern"));

    let stripped = re.replace_all(raw.trim(), "");
    let digits = stripped.strip_prefix('+').unwrap_or(&stripped);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        anyhow::bail!("Invalid phone number: {raw}");
    }

    if !(8..=15).contains(&digits.len()) {
        anyhow::bail!("Phone number out of range (8-15 digits): {raw}");
    }

    Ok(digits.to_string())
}

/// Parse a workspace timezone given as a UTC offset in `+09:00` form.
pub fn parse_utc_offset(tz: &str) -> Result<FixedOffset> {
    static OFFSET_RE: OnceLock<Regex> = OnceLock::new();

    let re = OFFSET_RE
        .get_or_init(|| Regex::new(r"^([+-])(\d{2}):(\d{2})$").expect("Invalid regex pattern"));

    let caps = re
        .captures(tz.trim())
        .with_context(|| format!("Invalid timezone offset: {tz}"))?;

    let hours: i32 = caps[2].parse()?;
    let minutes: i32 = caps[3].parse()?;

    if minutes >= 60 {
        anyhow::bail!("Invalid timezone offset minutes: {tz}");
    }

    let mut secs = hours * 3600 + minutes * 60;
    if &caps[1] == "-" {
        secs = -secs;
    }

    FixedOffset::east_opt(secs).with_context(|| format!("Timezone offset out of range: {tz}"))
}

/// Truncate text to a maximum length, respecting char boundaries.
/// Used to bound error messages before they are persisted.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    let cut = max_len.saturating_sub(3);
    let boundary = text
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|i| *i <= cut)
        .last()
        .unwrap_or(0);

    format!("{}...", &text[..boundary])
}
