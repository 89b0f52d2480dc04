// Validation pass applied after serde decoding.
//
// Serde enforces shape: required fields, known enum values, no unknown
// fields, identifier syntax. Everything that depends on a value's contents
// (numeric bounds, username alphabet, token shape, free-text limits) lives
// in `Validate` impls next to each type, built from the helpers below.
//
// `SchemaError` is the single error type of the schema layer. The codec
// wraps serde failures as `Malformed`; the helpers produce `Invalid` with a
// dotted field path so logs point at the offending value.

use thiserror::Error;

/// Why a message was rejected by the schema layer.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The bytes were not JSON of the expected shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The message parsed but a field violates the contract.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SchemaError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Content checks that serde's derive cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), SchemaError>;
}

impl<T: Validate> Validate for [T] {
    fn validate(&self) -> Result<(), SchemaError> {
        self.iter().try_for_each(Validate::validate)
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Some(inner) => inner.validate(),
            None => Ok(()),
        }
    }
}

pub(crate) const USERNAME_MIN_CHARS: usize = 3;
pub(crate) const USERNAME_MAX_CHARS: usize = 27;
/// Upper bound for free-text fields (log lines, team names).
pub const SAFE_STRING_MAX_CHARS: usize = 1000;
const FLAG_MAX_CHARS: usize = 128;

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '[' | ']' | 'ü' | 'Ü' | '.')
}

/// 3-27 characters from `[a-zA-Z0-9_ \[\]üÜ.]`.
pub fn check_username(field: &'static str, name: &str) -> Result<(), SchemaError> {
    let count = name.chars().count();
    if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&count) {
        return Err(SchemaError::invalid(
            field,
            format!("must be {USERNAME_MIN_CHARS}-{USERNAME_MAX_CHARS} characters, got {count}"),
        ));
    }
    if let Some(bad) = name.chars().find(|c| !is_username_char(*c)) {
        return Err(SchemaError::invalid(
            field,
            format!("character {bad:?} is not allowed"),
        ));
    }
    Ok(())
}

fn is_base64url(segment: &str) -> bool {
    segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A token is either a UUID or a JWT: three base64url segments, the header
/// and payload non-empty.
pub fn check_token(field: &'static str, token: &str) -> Result<(), SchemaError> {
    if uuid::Uuid::parse_str(token).is_ok() {
        return Ok(());
    }
    let parts: Vec<&str> = token.split('.').collect();
    let jwt_shaped = parts.len() == 3
        && !parts[0].is_empty()
        && !parts[1].is_empty()
        && parts.iter().all(|p| is_base64url(p));
    if jwt_shaped {
        Ok(())
    } else {
        Err(SchemaError::invalid(field, "neither a UUID nor a JWT"))
    }
}

/// Bounded free text without control characters.
pub fn check_safe_string(field: &'static str, s: &str, max_chars: usize) -> Result<(), SchemaError> {
    if s.chars().count() > max_chars {
        return Err(SchemaError::invalid(
            field,
            format!("longer than {max_chars} characters"),
        ));
    }
    if s.chars().any(char::is_control) {
        return Err(SchemaError::invalid(field, "contains control characters"));
    }
    Ok(())
}

/// Finite and `>= 0`.
pub fn check_non_negative(field: &'static str, value: f64) -> Result<(), SchemaError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            field,
            format!("{value} is not a finite non-negative number"),
        ))
    }
}

/// Inclusive range check for floating-point settings.
pub fn check_range_f64(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), SchemaError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            field,
            format!("{value} outside {min}..={max}"),
        ))
    }
}

/// Inclusive range check for integer settings.
pub fn check_range_u32(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), SchemaError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            field,
            format!("{value} outside {min}..={max}"),
        ))
    }
}

/// Empty, a custom `!`-prefixed flag, or a two-letter country code.
pub fn check_flag(field: &'static str, flag: &str) -> Result<(), SchemaError> {
    if flag.chars().count() > FLAG_MAX_CHARS {
        return Err(SchemaError::invalid(field, "too long"));
    }
    let ok = flag.is_empty()
        || flag.starts_with('!')
        || (flag.len() == 2 && flag.bytes().all(|b| b.is_ascii_alphabetic()));
    if ok {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            field,
            format!("{flag:?} is not a country code or custom flag"),
        ))
    }
}

/// `#rrggbb`.
pub fn check_hex_color(field: &'static str, color: &str) -> Result<(), SchemaError> {
    let ok = color.len() == 7
        && color.starts_with('#')
        && color[1..].bytes().all(|b| b.is_ascii_hexdigit());
    if ok {
        Ok(())
    } else {
        Err(SchemaError::invalid(field, format!("{color:?} is not #rrggbb")))
    }
}
