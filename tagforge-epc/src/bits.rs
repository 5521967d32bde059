//! Fixed-width hex/binary conversion and bit-range algebra over binary
//! strings.
//!
//! Binary strings are plain `'0'`/`'1'` text with bit 0 being the most
//! significant (leftmost) bit, which is how chip datasheets number TID bits.
//! Range indices are clamped to the source length instead of failing; callers
//! relying on that permissive behaviour include the formula engine, which
//! slices fixed 96-bit layouts.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use tagforge_error::{TFError, TFResult};

/// Placeholder emitted by [`insert_hex_value`] for positions no range covers.
pub const WILDCARD: char = 'x';

/// Strip an optional `0x` prefix, whitespace and dashes from hex input.
pub fn normalize_hex(input: &str) -> String {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    body.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// True when `s` is non-empty and every character is a hex digit.
#[inline]
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Convert hex text into a binary string of exactly `4 × digits` bits.
pub fn hex_to_binary(hex: &str) -> TFResult<String> {
    let clean = normalize_hex(hex);
    if clean.is_empty() {
        return Err(TFError::Format("hex input is empty".to_string()));
    }
    let mut out = String::with_capacity(clean.len() * 4);
    for c in clean.chars() {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| TFError::Format(format!("invalid hex digit '{c}' in '{hex}'")))?;
        out.push_str(&format!("{nibble:04b}"));
    }
    Ok(out)
}

/// Reject anything but `'0'`/`'1'` characters.
pub fn ensure_binary(bits: &str) -> TFResult<()> {
    match bits.chars().find(|c| *c != '0' && *c != '1') {
        Some(bad) => Err(TFError::Format(format!(
            "invalid binary digit '{bad}' in binary input"
        ))),
        None => Ok(()),
    }
}

/// Convert a binary string to uppercase hex, left-padding to a 4-bit boundary.
pub fn binary_to_hex(bits: &str) -> TFResult<String> {
    if bits.is_empty() {
        return Err(TFError::Format("binary input is empty".to_string()));
    }
    ensure_binary(bits)?;
    let pad = (4 - bits.len() % 4) % 4;
    let padded: String = "0".repeat(pad) + bits;
    let mut out = String::with_capacity(padded.len() / 4);
    for chunk in padded.as_bytes().chunks(4) {
        let nibble = chunk
            .iter()
            .fold(0u32, |acc, b| (acc << 1) | u32::from(*b == b'1'));
        // nibble is always < 16 here
        if let Some(c) = std::char::from_digit(nibble, 16) {
            out.push(c.to_ascii_uppercase());
        }
    }
    Ok(out)
}

/// Render `value` as a zero-padded binary string of `width` bits.
///
/// Fails when the value needs more than `width` bits.
pub fn u64_to_bits(value: u64, width: usize) -> TFResult<String> {
    if width < 64 && value >> width != 0 {
        return Err(TFError::Argument(format!(
            "value {value} does not fit into {width} bits"
        )));
    }
    Ok(format!("{value:0width$b}"))
}

/// Parse a binary string (up to 64 bits) into an integer.
pub fn bits_to_u64(bits: &str) -> TFResult<u64> {
    if bits.is_empty() {
        return Ok(0);
    }
    if bits.len() > 64 {
        return Err(TFError::Format(format!(
            "binary value of {} bits exceeds 64",
            bits.len()
        )));
    }
    u64::from_str_radix(bits, 2)
        .map_err(|e| TFError::Format(format!("invalid binary value '{bits}': {e}")))
}

/// Inclusive bit range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitRange {
    pub start: usize,
    pub end: usize,
}

impl BitRange {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn single(bit: usize) -> Self {
        Self {
            start: bit,
            end: bit,
        }
    }

    /// Number of bits covered, `0` for an inverted range.
    #[inline]
    pub const fn width(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// Clamp to a source of `len` bits, returning the half-open slice bounds.
    #[inline]
    fn clamped(&self, len: usize) -> (usize, usize) {
        let start = self.start.min(len);
        let end = if self.end < self.start {
            start
        } else {
            (self.end + 1).min(len)
        };
        (start, end)
    }
}

impl Display for BitRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Ordered list of inclusive bit ranges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitRanges(Vec<BitRange>);

impl BitRanges {
    pub fn new(ranges: Vec<BitRange>) -> Self {
        Self(ranges)
    }

    pub fn from_pairs(pairs: &[(usize, usize)]) -> Self {
        Self(pairs.iter().map(|&(s, e)| BitRange::new(s, e)).collect())
    }

    /// Total width in bits, ignoring clamping.
    pub fn width(&self) -> usize {
        self.0.iter().map(BitRange::width).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BitRange> {
        self.0.iter()
    }

    /// True when `bit` falls inside any range.
    pub fn covers(&self, bit: usize) -> bool {
        self.0.iter().any(|r| r.start <= bit && bit <= r.end)
    }
}

impl FromStr for BitRanges {
    type Err = TFError;

    /// Parse `"0-3,8-11,15"` style text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let index = |text: &str| {
                text.trim()
                    .parse::<usize>()
                    .map_err(|e| TFError::Format(format!("invalid bit index '{text}' in '{s}': {e}")))
            };
            let range = match part.split_once('-') {
                Some((a, b)) => BitRange::new(index(a)?, index(b)?),
                None => BitRange::single(index(part)?),
            };
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err(TFError::Format(format!("no bit ranges in '{s}'")));
        }
        Ok(Self(ranges))
    }
}

impl Display for BitRanges {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

/// Concatenate the bits selected by `ranges` from `source`.
///
/// `source` must be a binary string; indices are byte offsets, which is
/// only sound once that holds.
pub fn apply_to_hex_value(ranges: &BitRanges, source: &str) -> TFResult<String> {
    ensure_binary(source)?;
    let len = source.len();
    let mut out = String::with_capacity(ranges.width());
    for range in ranges.iter() {
        let (start, end) = range.clamped(len);
        out.push_str(&source[start..end]);
    }
    Ok(out)
}

/// Splice `value` into a `target_len`-bit template according to `ranges`.
///
/// Bits of `value` are consumed left to right, one range after another.
/// Target positions not covered by any range are filled with [`WILDCARD`].
/// Ranges are clamped to `target_len`; surplus value bits are ignored and
/// missing ones leave the wildcard in place.
pub fn insert_hex_value(ranges: &BitRanges, value: &str, target_len: usize) -> TFResult<String> {
    ensure_binary(value)?;
    let mut target: Vec<char> = vec![WILDCARD; target_len];
    let mut src = value.chars();
    'ranges: for range in ranges.iter() {
        let (start, end) = range.clamped(target_len);
        for slot in target.iter_mut().take(end).skip(start) {
            match src.next() {
                Some(bit) => *slot = bit,
                None => break 'ranges,
            }
        }
    }
    Ok(target.into_iter().collect())
}

/// Replace every wildcard with `fill`.
pub fn fill_wildcards(bits: &str, fill: char) -> String {
    bits.chars()
        .map(|c| if c == WILDCARD { fill } else { c })
        .collect()
}
