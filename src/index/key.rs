//! Human-level index keys
//!
//! An [`IndexKey`] is what a user types at a seek prompt: a list of atoms,
//! each either normalized text or a number. Keys compare atom by atom; when
//! two atoms differ in type they compare by their canonical text form.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One component of an [`IndexKey`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyAtom {
    /// Trimmed, upper-cased text
    Text(String),
    Number(f64),
}

impl KeyAtom {
    /// Atom for free-form text (trimmed and upper-cased)
    pub fn text(s: &str) -> Self {
        KeyAtom::Text(s.trim().to_ascii_uppercase())
    }

    /// Canonical text form used for cross-type comparison
    pub fn canonical(&self) -> String {
        match self {
            KeyAtom::Text(s) => s.clone(),
            KeyAtom::Number(n) => format_g15(*n),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, KeyAtom::Text(s) if s.is_empty())
    }
}

impl Ord for KeyAtom {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyAtom::Text(a), KeyAtom::Text(b)) => a.cmp(b),
            (KeyAtom::Number(a), KeyAtom::Number(b)) => a.total_cmp(b),
            _ => self.canonical().cmp(&other.canonical()),
        }
    }
}

impl PartialOrd for KeyAtom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyAtom {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyAtom {}

impl fmt::Display for KeyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAtom::Text(s) => write!(f, "\"{}\"", s),
            KeyAtom::Number(n) => write!(f, "{}", format_g15(*n)),
        }
    }
}

/// Ordered list of key atoms
///
/// A key that is a strict prefix of another sorts first.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey {
    pub parts: Vec<KeyAtom>,
}

impl IndexKey {
    pub fn new(parts: Vec<KeyAtom>) -> Self {
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Classify one seek token: numeric when it starts like a number and
    /// parses completely, text otherwise
    pub fn atom_from_token(token: &str) -> KeyAtom {
        let trimmed = token.trim();
        let numeric_start = trimmed
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_digit() || c == '+' || c == '-');

        if numeric_start {
            if let Ok(n) = trimmed.parse::<f64>() {
                if n.is_finite() {
                    return KeyAtom::Number(n);
                }
            }
        }
        KeyAtom::text(trimmed)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, atom) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", atom)?;
        }
        write!(f, "]")
    }
}

/// Render a number with 15 significant digits, trailing zeros removed,
/// switching to exponent form outside `[1e-4, 1e15)`
pub fn format_g15(n: f64) -> String {
    const PRECISION: i32 = 15;

    if n == 0.0 {
        return if n.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    if !n.is_finite() {
        return if n.is_nan() {
            "nan".into()
        } else if n > 0.0 {
            "inf".into()
        } else {
            "-inf".into()
        };
    }

    // Exponent after rounding to the target precision
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= PRECISION {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
