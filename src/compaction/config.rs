//! Cleanup threshold configuration parsing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// When the context window counts as under pressure.
///
/// Percentages are held in basis points (`80%` = 8000) so the boundary
/// comparison is exact integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CleanupThreshold {
    /// Fraction of the model window, in basis points.
    Percentage(u32),
    /// Absolute token count.
    Absolute(u64),
}

impl CleanupThreshold {
    /// Whole-percent threshold; `None` outside `1..=100`.
    pub fn percent(pct: u32) -> Option<Self> {
        match pct {
            1..=100 => Some(CleanupThreshold::Percentage(pct * 100)),
            _ => None,
        }
    }

    /// True once `tokens` reaches the threshold for a window of `window` tokens.
    /// Reaching it exactly counts.
    pub fn is_reached(&self, tokens: u64, window: u64) -> bool {
        match self {
            CleanupThreshold::Percentage(bp) => {
                (tokens as u128) * 10_000 >= (*bp as u128) * (window as u128)
            }
            CleanupThreshold::Absolute(limit) => tokens >= *limit,
        }
    }

    /// Token count at which the threshold is reached.
    pub fn effective_limit(&self, window: u64) -> u64 {
        match self {
            CleanupThreshold::Percentage(bp) => {
                ((*bp as u128 * window as u128).div_ceil(10_000)) as u64
            }
            CleanupThreshold::Absolute(limit) => *limit,
        }
    }
}

impl Default for CleanupThreshold {
    fn default() -> Self {
        CleanupThreshold::Percentage(8_000)
    }
}

impl std::fmt::Display for CleanupThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupThreshold::Percentage(bp) if bp % 100 == 0 => write!(f, "{}%", bp / 100),
            CleanupThreshold::Percentage(bp) => write!(f, "{}.{:02}%", bp / 100, bp % 100),
            CleanupThreshold::Absolute(tokens) => write!(f, "{}", tokens),
        }
    }
}

impl TryFrom<String> for CleanupThreshold {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        parse_cleanup_threshold(&value)
    }
}

impl From<CleanupThreshold> for String {
    fn from(value: CleanupThreshold) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for CleanupThreshold {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_cleanup_threshold(s)
    }
}

/// Parse a threshold string.
///
/// Accepts a percentage with up to two decimals (`"80%"`, `"72.5%"`) or an
/// absolute token count (`"6000"`).
pub fn parse_cleanup_threshold(s: &str) -> Result<CleanupThreshold> {
    let s = s.trim();

    if s.is_empty() {
        anyhow::bail!("Cleanup threshold cannot be empty");
    }

    if let Some(num_str) = s.strip_suffix('%') {
        let bp = parse_basis_points(num_str.trim())
            .with_context(|| format!("Invalid percentage in cleanup threshold: {}", s))?;

        if bp == 0 || bp > 10_000 {
            anyhow::bail!(
                "Cleanup threshold percentage must be between 0 and 100, got {}",
                num_str
            );
        }

        Ok(CleanupThreshold::Percentage(bp))
    } else {
        let tokens: u64 = s
            .parse()
            .with_context(|| format!("Invalid absolute cleanup threshold: {}", s))?;

        if tokens == 0 {
            anyhow::bail!("Cleanup threshold cannot be zero");
        }

        Ok(CleanupThreshold::Absolute(tokens))
    }
}

fn parse_basis_points(s: &str) -> Result<u32> {
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        anyhow::bail!("expected digits, got '{}'", s);
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        anyhow::bail!("at most two decimal places are supported, got '{}'", s);
    }
    let whole: u32 = whole.parse()?;
    let frac: u32 = if frac.is_empty() {
        0
    } else {
        format!("{:0<2}", frac).parse()?
    };
    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(frac))
        .context("percentage out of range")
}
