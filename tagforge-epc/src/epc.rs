use crate::{
    bits::{is_hex, normalize_hex},
    sgtin96::Sgtin96,
};
use std::fmt::{self, Display, Formatter};
use tagforge_error::{TFError, TFResult};

/// Number of hex characters in a 96-bit EPC or TID.
pub const HEX_LEN_96: usize = 24;

/// Normalise a 96-bit identifier to 24 uppercase hex characters.
///
/// Spaces, dashes and a `0x` prefix are stripped first.
pub fn normalize_96(input: &str) -> TFResult<String> {
    let clean = normalize_hex(input).to_ascii_uppercase();
    if clean.len() != HEX_LEN_96 {
        return Err(TFError::Argument(format!(
            "'{input}' must be {HEX_LEN_96} hex characters, got {}",
            clean.len()
        )));
    }
    if !is_hex(&clean) {
        return Err(TFError::Argument(format!("'{input}' is not hexadecimal")));
    }
    Ok(clean)
}

/// 24 uppercase hex characters that do not decode as SGTIN-96.
///
/// Only constructible through [`RawEpc::parse`] or [`EpcValue::parse`], so the
/// length and alphabet are always valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawEpc(String);

impl RawEpc {
    pub fn parse(hex: &str) -> TFResult<Self> {
        normalize_96(hex).map(RawEpc)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RawEpc {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical identifier written to a tag: structured SGTIN-96 or raw hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EpcValue {
    Sgtin(Sgtin96),
    Raw(RawEpc),
}

impl EpcValue {
    /// Parse hex text, preferring the SGTIN-96 interpretation when the header
    /// and fields decode cleanly.
    pub fn parse(hex: &str) -> TFResult<Self> {
        let clean = normalize_96(hex)?;
        match Sgtin96::from_epc_hex(&clean) {
            Ok(sgtin) => Ok(EpcValue::Sgtin(sgtin)),
            Err(_) => Ok(EpcValue::Raw(RawEpc(clean))),
        }
    }

    /// 24 uppercase hex characters.
    pub fn to_hex(&self) -> String {
        match self {
            EpcValue::Sgtin(s) => s.to_epc(),
            EpcValue::Raw(raw) => raw.as_str().to_string(),
        }
    }

    pub fn as_sgtin(&self) -> Option<&Sgtin96> {
        match self {
            EpcValue::Sgtin(s) => Some(s),
            EpcValue::Raw(_) => None,
        }
    }
}

impl Display for EpcValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Sgtin96> for EpcValue {
    fn from(value: Sgtin96) -> Self {
        EpcValue::Sgtin(value)
    }
}
