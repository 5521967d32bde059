use super::{
    formula,
    registry::{ChipProfile, ChipRegistry, SerialLayout},
};
use crate::{
    bits::{binary_to_hex, hex_to_binary},
    epc::normalize_96,
};
use serde::{Serialize, Serializer};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
    sync::Arc,
};
use tagforge_error::{TFError, TFResult};

/// Hex digits of the serial the parser exposes (40 bits).
pub const SERIAL_HEX_LEN: usize = 10;

/// A 96-bit Tag Identifier, stored as normalised uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagIdentifier(String);

impl TagIdentifier {
    pub fn parse(input: &str) -> TFResult<Self> {
        Ok(Self(normalize_96(input)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bits(&self) -> String {
        // normalised on construction, conversion cannot fail
        hex_to_binary(&self.0).unwrap_or_default()
    }

    fn nibble(&self, i: usize) -> u16 {
        self.0
            .as_bytes()
            .get(i)
            .and_then(|b| (*b as char).to_digit(16))
            .unwrap_or(0) as u16
    }

    /// Allocation class byte, `0xE2` for EPC Gen2 tags.
    pub fn class_id(&self) -> u8 {
        ((self.nibble(0) << 4) | self.nibble(1)) as u8
    }

    /// 9-bit mask designer ID (TID bits 11..=19).
    pub fn mdid(&self) -> u16 {
        ((self.nibble(2) & 0x1) << 8) | (self.nibble(3) << 4) | self.nibble(4)
    }

    /// 12-bit tag model number (TID bits 20..=31).
    pub fn tmn(&self) -> u16 {
        (self.nibble(5) << 8) | (self.nibble(6) << 4) | self.nibble(7)
    }

    /// Hex text of bytes `first..=last`.
    pub fn byte_range(&self, first: usize, last: usize) -> &str {
        let start = (first * 2).min(self.0.len());
        let end = ((last + 1) * 2).min(self.0.len()).max(start);
        &self.0[start..end]
    }
}

impl FromStr for TagIdentifier {
    type Err = TFError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagIdentifier::parse(s)
    }
}

impl Display for TagIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TagIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Extract the 10-hex-digit serial for `tid` according to `layout`.
pub fn extract_serial(tid: &TagIdentifier, layout: SerialLayout) -> TFResult<String> {
    match layout {
        SerialLayout::ByteRange { first, last } => Ok(tid.byte_range(first, last).to_string()),
        SerialLayout::Formula { family } => {
            let serial = formula::forward_serial(family, &tid.to_bits())?;
            let padded = format!("{serial:0>width$}", width = SERIAL_HEX_LEN * 4);
            binary_to_hex(&padded)
        }
        SerialLayout::Fallback => Ok(tid
            .byte_range(
                SerialLayout::FALLBACK_FIRST_BYTE,
                SerialLayout::FALLBACK_LAST_BYTE,
            )
            .to_string()),
    }
}

#[derive(Debug)]
struct Parsed {
    tid: TagIdentifier,
    profile: ChipProfile,
    serial_hex: String,
}

/// Chip metadata and serial for one TID.
///
/// The parser is usable until [`TidParser::dispose`] is called; every query
/// afterwards fails with [`TFError::InvalidState`].
#[derive(Debug)]
pub struct TidParser {
    parsed: Option<Parsed>,
}

impl TidParser {
    pub fn new(tid: &str, registry: Arc<ChipRegistry>) -> TFResult<Self> {
        let tid = TagIdentifier::parse(tid)?;
        let profile = registry.profile(tid.as_str(), tid.mdid(), tid.tmn());
        let serial_hex = extract_serial(&tid, profile.serial_layout)?;
        tracing::trace!(
            tid = %tid,
            vendor = %profile.vendor,
            model = %profile.model_name,
            family = ?profile.family,
            serial = %serial_hex,
            "TID parsed"
        );
        Ok(Self {
            parsed: Some(Parsed {
                tid,
                profile,
                serial_hex,
            }),
        })
    }

    fn parsed(&self) -> TFResult<&Parsed> {
        self.parsed
            .as_ref()
            .ok_or_else(|| TFError::InvalidState("TID parser already disposed".to_string()))
    }

    pub fn tid(&self) -> TFResult<&TagIdentifier> {
        Ok(&self.parsed()?.tid)
    }

    pub fn vendor(&self) -> TFResult<&str> {
        Ok(&self.parsed()?.profile.vendor)
    }

    pub fn model_name(&self) -> TFResult<&str> {
        Ok(&self.parsed()?.profile.model_name)
    }

    pub fn profile(&self) -> TFResult<&ChipProfile> {
        Ok(&self.parsed()?.profile)
    }

    /// 40-bit serial as 10 uppercase hex digits.
    pub fn serial_hex(&self) -> TFResult<&str> {
        Ok(&self.parsed()?.serial_hex)
    }

    pub fn serial_decimal(&self) -> TFResult<u64> {
        let hex = self.serial_hex()?;
        u64::from_str_radix(hex, 16)
            .map_err(|e| TFError::Format(format!("serial {hex} is not hexadecimal: {e}")))
    }

    pub fn dispose(&mut self) {
        self.parsed = None;
    }

    pub fn is_disposed(&self) -> bool {
        self.parsed.is_none()
    }
}
