//! Per chip-generation serial formulas.
//!
//! Every family exposes a small model-group field inside the TMN bits. The
//! group selects one of the family's recipes: an ordered list of inclusive
//! TID bit slices whose concatenation is the 38-bit serial. A few recipes
//! also rely on a check bit the silicon stores next to the serial; it is not
//! carried in the serial and is recomputed during inverse reconstruction.
//!
//! MSS value layout (96 bits):
//!
//! ```text
//! | TID bits 0..=47 (class, MDID, TMN, XTID header) | 0 x 10 | serial (38) |
//! ```
//!
//! Unknown model groups produce all-zero serials and MSS values instead of
//! failing.

use crate::bits::{apply_to_hex_value, fill_wildcards, insert_hex_value, BitRange, BitRanges};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::ops::RangeInclusive;
use tagforge_error::{TFError, TFResult};

/// Width of TID / MSS binary strings accepted by the engine.
pub const TID_BITS: usize = 96;
/// Width of the serial produced by the forward transform.
pub const MSS_SERIAL_BITS: usize = 38;
/// TID header bits copied verbatim into the MSS value.
const MSS_HEADER_BITS: usize = 48;
/// Zero gap between the copied header and the serial.
const MSS_GAP_BITS: usize = TID_BITS - MSS_HEADER_BITS - MSS_SERIAL_BITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FormulaFamily {
    /// Monza 4 generation.
    LegacyMonza4,
    /// Monza 5 and Monza X generation.
    LegacyMonza5,
    /// Monza R6-P / R6-A / R6-B.
    MidGen,
    /// Monza R6.
    R6,
    /// M700 and M800 series.
    M700,
}

impl FormulaFamily {
    pub const ALL: [FormulaFamily; 5] = [
        FormulaFamily::LegacyMonza4,
        FormulaFamily::LegacyMonza5,
        FormulaFamily::MidGen,
        FormulaFamily::R6,
        FormulaFamily::M700,
    ];

    fn table(self) -> &'static FamilyTable {
        match self {
            FormulaFamily::LegacyMonza4 => &LEGACY_MONZA4,
            FormulaFamily::LegacyMonza5 => &LEGACY_MONZA5,
            FormulaFamily::MidGen => &MID_GEN,
            FormulaFamily::R6 => &R6,
            FormulaFamily::M700 => &M700,
        }
    }

    /// Bit range holding the model group for this family.
    pub fn group_field(self) -> BitRange {
        self.table().group_field
    }
}

impl Display for FormulaFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormulaFamily::LegacyMonza4 => "legacy-monza4",
            FormulaFamily::LegacyMonza5 => "legacy-monza5",
            FormulaFamily::MidGen => "mid-gen",
            FormulaFamily::R6 => "r6",
            FormulaFamily::M700 => "m700",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParityKind {
    Even,
    Odd,
}

/// Stored check bit at `position`, computed over `window`.
#[derive(Debug, Clone, Copy)]
struct CheckBit {
    position: usize,
    window: BitRange,
    kind: ParityKind,
}

#[derive(Debug)]
struct Recipe {
    groups: RangeInclusive<u8>,
    slices: &'static [(usize, usize)],
    check: Option<CheckBit>,
}

#[derive(Debug)]
struct FamilyTable {
    group_field: BitRange,
    recipes: &'static [Recipe],
}

static LEGACY_MONZA4: FamilyTable = FamilyTable {
    group_field: BitRange::new(29, 31),
    recipes: &[Recipe {
        groups: 0..=5,
        slices: &[(58, 95)],
        check: None,
    }],
};

static LEGACY_MONZA5: FamilyTable = FamilyTable {
    group_field: BitRange::new(24, 27),
    recipes: &[
        Recipe {
            groups: 3..=3,
            slices: &[(48, 49), (60, 95)],
            check: None,
        },
        Recipe {
            groups: 4..=5,
            slices: &[(50, 51), (60, 95)],
            check: None,
        },
    ],
};

static MID_GEN: FamilyTable = FamilyTable {
    group_field: BitRange::new(29, 31),
    recipes: &[
        Recipe {
            groups: 0..=3,
            slices: &[(30, 31), (60, 95)],
            check: None,
        },
        Recipe {
            groups: 4..=5,
            slices: &[(30, 31), (56, 57), (62, 95)],
            check: None,
        },
    ],
};

static R6: FamilyTable = FamilyTable {
    group_field: BitRange::new(28, 31),
    recipes: &[Recipe {
        groups: 0..=1,
        slices: &[(31, 31), (59, 95)],
        check: None,
    }],
};

static M700: FamilyTable = FamilyTable {
    group_field: BitRange::new(27, 31),
    recipes: &[
        Recipe {
            groups: 16..=23,
            slices: &[(30, 31), (60, 95)],
            check: Some(CheckBit {
                position: 59,
                window: BitRange::new(60, 95),
                kind: ParityKind::Even,
            }),
        },
        Recipe {
            groups: 0..=7,
            slices: &[(29, 31), (61, 95)],
            check: Some(CheckBit {
                position: 60,
                window: BitRange::new(61, 95),
                kind: ParityKind::Odd,
            }),
        },
    ],
};

fn ensure_96(bits: &str, what: &str) -> TFResult<()> {
    if bits.len() != TID_BITS {
        return Err(TFError::Argument(format!(
            "{what} must be {TID_BITS} bits, got {}",
            bits.len()
        )));
    }
    if bits.chars().any(|c| c != '0' && c != '1') {
        return Err(TFError::Argument(format!("{what} is not a binary string")));
    }
    Ok(())
}

/// Parity bit over `window` of `bits`.
///
/// `Even` returns the bit that makes the count of ones (window plus check
/// bit) even; `Odd` makes it odd. Out-of-range windows are clamped.
pub fn parity(bits: &str, window: BitRange, kind: ParityKind) -> TFResult<char> {
    let ones = apply_to_hex_value(&BitRanges::new(vec![window]), bits)?
        .chars()
        .filter(|c| *c == '1')
        .count();
    let odd_ones = ones % 2 == 1;
    Ok(match (kind, odd_ones) {
        (ParityKind::Even, true) | (ParityKind::Odd, false) => '1',
        _ => '0',
    })
}

/// Read the model group of `bits` for `family`.
pub fn model_group(family: FormulaFamily, bits: &str) -> TFResult<u8> {
    ensure_96(bits, "TID")?;
    let field = family.group_field();
    let raw = apply_to_hex_value(&BitRanges::new(vec![field]), bits)?;
    u8::from_str_radix(&raw, 2)
        .map_err(|e| TFError::Format(format!("model group '{raw}' unreadable: {e}")))
}

fn recipe_for(family: FormulaFamily, group: u8) -> Option<&'static Recipe> {
    family
        .table()
        .recipes
        .iter()
        .find(|r| r.groups.contains(&group))
}

/// TID (96-bit binary) → 38-bit serial. Unknown groups give all zeros.
pub fn forward_serial(family: FormulaFamily, tid_bits: &str) -> TFResult<String> {
    let group = model_group(family, tid_bits)?;
    match recipe_for(family, group) {
        Some(recipe) => apply_to_hex_value(&BitRanges::from_pairs(recipe.slices), tid_bits),
        None => {
            tracing::debug!(%family, group, "unknown model group, emitting zero serial");
            Ok("0".repeat(MSS_SERIAL_BITS))
        }
    }
}

/// TID (96-bit binary) → full 96-bit MSS value. Unknown groups give all zeros.
pub fn forward_mss(family: FormulaFamily, tid_bits: &str) -> TFResult<String> {
    let group = model_group(family, tid_bits)?;
    if recipe_for(family, group).is_none() {
        return Ok("0".repeat(TID_BITS));
    }
    let serial = forward_serial(family, tid_bits)?;
    let mut mss = String::with_capacity(TID_BITS);
    mss.push_str(&tid_bits[..MSS_HEADER_BITS]);
    mss.push_str(&"0".repeat(MSS_GAP_BITS));
    mss.push_str(&serial);
    Ok(mss)
}

/// MSS value (96-bit binary) → reconstructed TID.
///
/// Header bits come back verbatim, serial bits are spliced into their TID
/// positions, uncovered positions are zero and the stored check bit is
/// recomputed where the family has one.
pub fn inverse(family: FormulaFamily, mss_bits: &str) -> TFResult<String> {
    let group = model_group(family, mss_bits)?;
    let Some(recipe) = recipe_for(family, group) else {
        return Ok("0".repeat(TID_BITS));
    };

    let serial = &mss_bits[TID_BITS - MSS_SERIAL_BITS..];
    let spliced = insert_hex_value(&BitRanges::from_pairs(recipe.slices), serial, TID_BITS)?;

    let header = &mss_bits[..MSS_HEADER_BITS];
    let merged: String = spliced
        .chars()
        .enumerate()
        .map(|(i, c)| match header.as_bytes().get(i) {
            Some(h) if c == crate::bits::WILDCARD => *h as char,
            _ => c,
        })
        .collect();
    let mut tid = fill_wildcards(&merged, '0');

    if let Some(check) = recipe.check {
        let bit = parity(&tid, check.window, check.kind)?;
        tid.replace_range(check.position..check.position + 1, &bit.to_string());
    }
    Ok(tid)
}

/// Bit slices carrying serial material for `group`, if the group is known.
pub fn serial_slices(family: FormulaFamily, group: u8) -> Option<BitRanges> {
    recipe_for(family, group).map(|r| BitRanges::from_pairs(r.slices))
}
