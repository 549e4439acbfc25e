//! Format validation for Bitcoin identifiers.
//!
//! Validation is purely syntactic: character set and length. Checksum
//! verification belongs to the address owner, not a screening pipeline; a
//! syntactically valid address that never existed simply screens clean.
//! Invalid inputs are rejected here before any network call happens.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::error::{Result, ScreeningError};

/// Base58 alphabet: no `0`, `O`, `I`, or `l`.
static BASE58_SET: Lazy<HashSet<char>> = Lazy::new(|| {
    "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz"
        .chars()
        .collect()
});

/// What a syntactically valid identifier turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Address,
    Tx,
}

/// True iff `s` is a legacy/P2SH base58 address (`1…`/`3…`, 25-34 payload
/// chars) or a bech32 address (`bc1`, 39-59 payload chars, lower case only).
///
/// Mixed- or upper-case bech32 is rejected outright: the lowercase form is
/// canonical and case-folding a bech32 string silently changes its checksum
/// domain.
pub fn is_valid_address(s: &str) -> bool {
    is_base58_address(s) || is_bech32_address(s)
}

fn is_base58_address(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first != '1' && first != '3' {
        return false;
    }
    let rest = chars.as_str();
    (25..=34).contains(&rest.len()) && rest.chars().all(|c| BASE58_SET.contains(&c))
}

fn is_bech32_address(s: &str) -> bool {
    let Some(payload) = s.strip_prefix("bc1") else {
        return false;
    };
    (39..=59).contains(&payload.len())
        && payload
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// True iff `s` is a 64-character hex string.
pub fn is_valid_tx_hash(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Classify an identifier as an address or transaction hash.
///
/// Transaction hashes are checked first: a 64-hex string can never collide
/// with a valid address shape, but the ordering keeps the intent explicit.
pub fn classify_identifier(s: &str) -> Result<IdentifierKind> {
    if is_valid_tx_hash(s) {
        Ok(IdentifierKind::Tx)
    } else if is_valid_address(s) {
        Ok(IdentifierKind::Address)
    } else {
        Err(ScreeningError::validation("identifier", s))
    }
}

/// Validate an address, producing a `VALIDATION` error on failure.
pub fn require_valid_address(s: &str) -> Result<()> {
    if is_valid_address(s) {
        Ok(())
    } else {
        Err(ScreeningError::validation("address", s))
    }
}

/// Validate a transaction hash, producing a `VALIDATION` error on failure.
pub fn require_valid_tx_hash(s: &str) -> Result<()> {
    if is_valid_tx_hash(s) {
        Ok(())
    } else {
        Err(ScreeningError::validation("transaction hash", s))
    }
}
