//! Asset identifier lexical classes.
//!
//! Three classes are recognised:
//!   - base:  `[A-Z0-9]` with non-terminal `-` (`CRD`, `GOLD-1`)
//!   - basic: base, optionally dotted with another base (`GOLD.RING`)
//!   - mint:  basic suffixed `:mint` (`GOLD:mint`)
//!
//! Holding one `X:mint` unit is the right to mint `X`.

/// The base currency. Its minter entry is pinned to null and its price
/// is always +infinity.
pub const CRD: &str = "CRD";

pub const MINT_SUFFIX: &str = ":mint";

fn is_base_segment(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let bytes = s.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|b| matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b'-'))
}

pub fn is_base_asset(s: &str) -> bool {
    is_base_segment(s)
}

pub fn is_basic_asset(s: &str) -> bool {
    match s.split_once('.') {
        Some((base, sub)) => is_base_segment(base) && is_base_segment(sub),
        None => is_base_segment(s),
    }
}

pub fn is_mint_asset(s: &str) -> bool {
    match s.strip_suffix(MINT_SUFFIX) {
        Some(basic) => is_basic_asset(basic),
        None => false,
    }
}

/// Any identifier a balance can be held in: basic or mint.
pub fn is_valid_asset(s: &str) -> bool {
    is_basic_asset(s) || is_mint_asset(s)
}

/// The mint-asset of a base asset: `X` -> `X:mint`.
pub fn mint_asset(base: &str) -> String {
    format!("{base}{MINT_SUFFIX}")
}

/// The base asset an identifier belongs to: strips `:mint`, then any
/// `.sub` component. `GOLD.RING:mint` -> `GOLD`.
pub fn base_of(asset: &str) -> &str {
    let basic = asset.strip_suffix(MINT_SUFFIX).unwrap_or(asset);
    match basic.split_once('.') {
        Some((base, _)) => base,
        None => basic,
    }
}
