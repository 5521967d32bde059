use super::formula::FormulaFamily;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

/// Impinj mask designer ID.
pub const MDID_IMPINJ: u16 = 0x001;
/// NXP mask designer ID.
pub const MDID_NXP: u16 = 0x006;

/// Serial extraction family a chip belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChipFamily {
    /// NXP UCODE parts with a fixed serial byte range.
    Nxu,
    LegacyMonza4,
    LegacyMonza5,
    MidGen,
    R6,
    M700,
    Unknown,
}

impl ChipFamily {
    /// Classify by mask designer and model number ranges.
    pub fn classify(mdid: u16, tmn: u16) -> Self {
        match (mdid, tmn) {
            (MDID_NXP, 0x800..=0x9FF) => ChipFamily::Nxu,
            (MDID_IMPINJ, 0x100..=0x10F) => ChipFamily::LegacyMonza4,
            (MDID_IMPINJ, 0x130..=0x15F) => ChipFamily::LegacyMonza5,
            (MDID_IMPINJ, 0x160..=0x16F) => ChipFamily::R6,
            (MDID_IMPINJ, 0x170..=0x17F) => ChipFamily::MidGen,
            (MDID_IMPINJ, 0x190..=0x1CF) => ChipFamily::M700,
            _ => ChipFamily::Unknown,
        }
    }

    pub fn formula(self) -> Option<FormulaFamily> {
        match self {
            ChipFamily::LegacyMonza4 => Some(FormulaFamily::LegacyMonza4),
            ChipFamily::LegacyMonza5 => Some(FormulaFamily::LegacyMonza5),
            ChipFamily::MidGen => Some(FormulaFamily::MidGen),
            ChipFamily::R6 => Some(FormulaFamily::R6),
            ChipFamily::M700 => Some(FormulaFamily::M700),
            ChipFamily::Nxu | ChipFamily::Unknown => None,
        }
    }
}

/// How the tag parser pulls the 40-bit serial out of a TID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SerialLayout {
    /// Inclusive byte range of the 12-byte TID.
    ByteRange { first: usize, last: usize },
    /// Per-generation formula serial, zero-padded to 40 bits.
    Formula { family: FormulaFamily },
    /// Last five TID bytes.
    Fallback,
}

impl SerialLayout {
    pub const FALLBACK_FIRST_BYTE: usize = 7;
    pub const FALLBACK_LAST_BYTE: usize = 11;

    pub fn for_family(family: ChipFamily) -> Self {
        match family {
            // Low 40 bits of the 48-bit UCODE serial.
            ChipFamily::Nxu => SerialLayout::ByteRange { first: 7, last: 11 },
            ChipFamily::R6 => SerialLayout::Formula {
                family: FormulaFamily::R6,
            },
            ChipFamily::M700 => SerialLayout::Formula {
                family: FormulaFamily::M700,
            },
            _ => SerialLayout::Fallback,
        }
    }
}

/// Everything known about a TID's chip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChipProfile {
    pub vendor: String,
    pub model_name: String,
    pub mdid: u16,
    pub tmn: u16,
    pub family: ChipFamily,
    pub serial_layout: SerialLayout,
}

pub const UNKNOWN_VENDOR: &str = "Unknown vendor";

/// Vendor prefix and model tables.
///
/// Vendor lookup is a longest-prefix match over 1..=4 byte hex keys; model
/// lookup is keyed by `(MDID, TMN)`.
#[derive(Debug, Clone, Default)]
pub struct ChipRegistry {
    vendors: HashMap<String, String>,
    models: HashMap<(u16, u16), String>,
}

const VENDOR_PREFIXES: &[(&str, &str)] = &[
    ("E004", "NXP Semiconductors"),
    ("E007", "Texas Instruments"),
    ("E016", "EM Microelectronic"),
    ("E20034", "Alien Technology"),
    ("E200B0", "EM Microelectronic"),
    ("E28011", "Impinj"),
    ("E28068", "NXP Semiconductors"),
    ("E28069", "NXP Semiconductors"),
    ("E2003412", "Alien Technology (Higgs 3)"),
    ("E2003414", "Alien Technology (Higgs 4)"),
    ("E2801160", "Impinj (Monza R6)"),
    ("E2801190", "Impinj (M750)"),
    ("E2801191", "Impinj (M730)"),
    ("E2806894", "NXP Semiconductors (UCODE 8)"),
    ("E2806915", "NXP Semiconductors (UCODE 9)"),
];

const MODELS: &[(u16, u16, &str)] = &[
    (MDID_IMPINJ, 0x100, "Monza 4D"),
    (MDID_IMPINJ, 0x104, "Monza 4U"),
    (MDID_IMPINJ, 0x105, "Monza 4QT"),
    (MDID_IMPINJ, 0x10C, "Monza 4E"),
    (MDID_IMPINJ, 0x130, "Monza 5"),
    (MDID_IMPINJ, 0x140, "Monza X-2K"),
    (MDID_IMPINJ, 0x150, "Monza X-8K"),
    (MDID_IMPINJ, 0x160, "Monza R6"),
    (MDID_IMPINJ, 0x170, "Monza R6-P"),
    (MDID_IMPINJ, 0x171, "Monza R6-A"),
    (MDID_IMPINJ, 0x173, "Monza R6-B"),
    (MDID_IMPINJ, 0x190, "M750"),
    (MDID_IMPINJ, 0x191, "M730"),
    (MDID_IMPINJ, 0x1A0, "M770"),
    (MDID_IMPINJ, 0x1A2, "M775"),
    (MDID_IMPINJ, 0x1B0, "M780"),
    (MDID_IMPINJ, 0x1B1, "M781"),
    (MDID_IMPINJ, 0x1C0, "M830"),
    (MDID_NXP, 0x810, "UCODE 7"),
    (MDID_NXP, 0x890, "UCODE 7m"),
    (MDID_NXP, 0x894, "UCODE 8"),
    (MDID_NXP, 0x915, "UCODE 9"),
    (0x003, 0x412, "Higgs 3"),
    (0x003, 0x414, "Higgs 4"),
];

static BUILTIN: Lazy<Arc<ChipRegistry>> = Lazy::new(|| {
    let mut registry = ChipRegistry::default();
    for (prefix, vendor) in VENDOR_PREFIXES {
        registry.add_vendor(prefix, vendor);
    }
    for (mdid, tmn, name) in MODELS {
        registry.add_model(*mdid, *tmn, name);
    }
    Arc::new(registry)
});

impl ChipRegistry {
    /// Shared registry with the built-in tables.
    pub fn builtin() -> Arc<ChipRegistry> {
        Arc::clone(&BUILTIN)
    }

    /// Register a vendor under a hex prefix of 1..=4 bytes.
    pub fn add_vendor(&mut self, prefix: &str, vendor: &str) {
        self.vendors
            .insert(prefix.to_ascii_uppercase(), vendor.to_string());
    }

    pub fn add_model(&mut self, mdid: u16, tmn: u16, name: &str) {
        self.models.insert((mdid, tmn), name.to_string());
    }

    /// Longest registered prefix of `tid_hex` (4, 3, 2 then 1 bytes).
    pub fn vendor(&self, tid_hex: &str) -> &str {
        let upper = tid_hex.to_ascii_uppercase();
        [8usize, 6, 4, 2]
            .iter()
            .filter(|len| upper.len() >= **len)
            .find_map(|len| self.vendors.get(&upper[..*len]))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_VENDOR)
    }

    /// Model name, or `Unknown (TMN 0xHHH)` when the code is unmapped.
    pub fn model_name(&self, mdid: u16, tmn: u16) -> String {
        match self.models.get(&(mdid, tmn)) {
            Some(name) => name.clone(),
            None => format!("Unknown (TMN 0x{tmn:03X})"),
        }
    }

    pub fn profile(&self, tid_hex: &str, mdid: u16, tmn: u16) -> ChipProfile {
        let family = ChipFamily::classify(mdid, tmn);
        ChipProfile {
            vendor: self.vendor(tid_hex).to_string(),
            model_name: self.model_name(mdid, tmn),
            mdid,
            tmn,
            family,
            serial_layout: SerialLayout::for_family(family),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_lookup_prefers_longest_prefix() {
        let registry = ChipRegistry::builtin();
        assert_eq!(
            registry.vendor("E2801160200074C5F1A2B3C4"),
            "Impinj (Monza R6)"
        );
        assert_eq!(registry.vendor("E2801105200074C5F1A2B3C4"), "Impinj");
        assert_eq!(registry.vendor("e2806894000000000000abcd"), "NXP Semiconductors (UCODE 8)");
        assert_eq!(registry.vendor("E0040150AABBCCDD"), "NXP Semiconductors");
        assert_eq!(registry.vendor("A1B2C3D4E5F60718293A4B5C"), UNKNOWN_VENDOR);
    }

    #[test]
    fn unmapped_model_renders_tmn() {
        let registry = ChipRegistry::builtin();
        assert_eq!(registry.model_name(MDID_IMPINJ, 0x160), "Monza R6");
        assert_eq!(registry.model_name(MDID_IMPINJ, 0x1AB), "Unknown (TMN 0x1AB)");
        assert_eq!(registry.model_name(0x0FF, 0x00C), "Unknown (TMN 0x00C)");
    }

    #[test]
    fn classification_follows_tmn_ranges() {
        assert_eq!(ChipFamily::classify(MDID_NXP, 0x894), ChipFamily::Nxu);
        assert_eq!(ChipFamily::classify(MDID_IMPINJ, 0x16A), ChipFamily::R6);
        assert_eq!(ChipFamily::classify(MDID_IMPINJ, 0x1B1), ChipFamily::M700);
        assert_eq!(ChipFamily::classify(MDID_IMPINJ, 0x105), ChipFamily::LegacyMonza4);
        assert_eq!(ChipFamily::classify(MDID_NXP, 0x160), ChipFamily::Unknown);
        assert_eq!(
            SerialLayout::for_family(ChipFamily::LegacyMonza4),
            SerialLayout::Fallback
        );
    }

    #[test]
    fn custom_entries_extend_a_registry() {
        let mut registry = ChipRegistry::default();
        registry.add_vendor("e2aa", "Acme");
        registry.add_model(0x0AA, 0x001, "Acme One");
        assert_eq!(registry.vendor("E2AA0001"), "Acme");
        let profile = registry.profile("E2AA0001", 0x0AA, 0x001);
        assert_eq!(profile.model_name, "Acme One");
        assert_eq!(profile.family, ChipFamily::Unknown);
    }
}
