//! EPC candidate generation and session-wide serial uniqueness.

use crate::{
    bits::{is_hex, normalize_hex},
    chip::{ChipRegistry, TidParser},
    epc::HEX_LEN_96,
    sgtin96::Sgtin96,
};
use dashmap::DashSet;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use tagforge_error::{TFError, TFResult};

/// Exclusive upper bound for sequential generation.
pub const MAX_SEQUENTIAL_QUANTITY: u64 = 10_000_000_000;
/// Inclusive upper bound for fixed-header generation (6 decimal digits).
pub const MAX_FIXED_HEADER_QUANTITY: u32 = 999_999;
/// Hex characters taken from a seed EPC as the vendor prefix.
pub const VENDOR_PREFIX_LEN: usize = 14;
/// Hex characters of a generated random serial (40 bits).
pub const RANDOM_SERIAL_LEN: usize = 10;

const HEADER_LEN: usize = 4;
const FIXED_MIDDLE_LEN: usize = 14;
const TID_MIDDLE_LEN: usize = 4;
const RANDOM_MASK: u64 = (1 << 40) - 1;

/// Serials issued during the current session.
///
/// Cloning shares the underlying set. Registration is a single atomic
/// insert-if-absent.
#[derive(Debug, Clone, Default)]
pub struct UsedSerialSet(Arc<DashSet<String>>);

impl UsedSerialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `serial`; `false` when it was already issued.
    pub fn try_register(&self, serial: &str) -> bool {
        self.0.insert(serial.to_ascii_uppercase())
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.0.contains(&serial.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&self) {
        self.0.clear();
    }
}

fn check_segment(name: &str, value: &str, len: usize) -> TFResult<String> {
    let upper = value.trim().to_ascii_uppercase();
    if upper.len() != len {
        return Err(TFError::Argument(format!(
            "{name} must be {len} characters, got {}",
            upper.len()
        )));
    }
    if !is_hex(&upper) {
        return Err(TFError::Argument(format!("{name} '{value}' is not hexadecimal")));
    }
    Ok(upper)
}

fn check_epc_len(epc: String) -> TFResult<String> {
    if epc.len() != HEX_LEN_96 {
        return Err(TFError::Validation(format!(
            "generated EPC '{epc}' is {} characters, expected {HEX_LEN_96}",
            epc.len()
        )));
    }
    Ok(epc)
}

/// SGTIN-96 EPCs with serials `1..=quantity`.
#[derive(Debug, Clone)]
pub struct SequentialEpcs {
    base: Sgtin96,
    next: u64,
    last: u64,
}

impl Iterator for SequentialEpcs {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let serial = self.next;
        self.next += 1;
        self.base.with_serial(serial).ok().map(|s| s.to_epc())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.last + 1).saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

/// `header + middle + NNNNNN` for `1..=quantity`.
#[derive(Debug, Clone)]
pub struct FixedHeaderEpcs {
    prefix: String,
    next: u32,
    last: u32,
}

impl Iterator for FixedHeaderEpcs {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let epc = format!("{}{:06}", self.prefix, self.next);
        self.next += 1;
        Some(epc)
    }
}

/// Builds EPC candidates and hands out session-unique serials.
#[derive(Debug, Clone)]
pub struct EpcGenerator {
    registry: Arc<ChipRegistry>,
    used: UsedSerialSet,
    random_attempts: u32,
    default_vendor_prefix: String,
}

impl EpcGenerator {
    pub fn new(
        registry: Arc<ChipRegistry>,
        used: UsedSerialSet,
        random_attempts: u32,
        default_vendor_prefix: &str,
    ) -> TFResult<Self> {
        let default_vendor_prefix =
            check_segment("default vendor prefix", default_vendor_prefix, VENDOR_PREFIX_LEN)?;
        Ok(Self {
            registry,
            used,
            random_attempts,
            default_vendor_prefix,
        })
    }

    pub fn used_serials(&self) -> &UsedSerialSet {
        &self.used
    }

    pub fn sequential(
        &self,
        gtin: &str,
        company_prefix_length: usize,
        quantity: u64,
    ) -> TFResult<SequentialEpcs> {
        if quantity >= MAX_SEQUENTIAL_QUANTITY {
            return Err(TFError::Argument(format!(
                "quantity {quantity} must be below {MAX_SEQUENTIAL_QUANTITY}"
            )));
        }
        let base = Sgtin96::from_gtin(gtin, company_prefix_length)?;
        Ok(SequentialEpcs {
            base,
            next: 1,
            last: quantity,
        })
    }

    pub fn fixed_header(
        &self,
        header: &str,
        middle: &str,
        quantity: u32,
    ) -> TFResult<FixedHeaderEpcs> {
        if quantity > MAX_FIXED_HEADER_QUANTITY {
            return Err(TFError::Argument(format!(
                "quantity {quantity} exceeds {MAX_FIXED_HEADER_QUANTITY}"
            )));
        }
        let header = check_segment("header", header, HEADER_LEN)?;
        let middle = check_segment("middle segment", middle, FIXED_MIDDLE_LEN)?;
        Ok(FixedHeaderEpcs {
            prefix: format!("{header}{middle}"),
            next: 1,
            last: quantity,
        })
    }

    /// `header + middle + TID serial`, the serial left-padded with zeros to
    /// fill 24 characters.
    pub fn tid_derived(&self, tid: &str, header: &str, middle: &str) -> TFResult<String> {
        let header = check_segment("header", header, HEADER_LEN)?;
        let middle = check_segment("middle segment", middle, TID_MIDDLE_LEN)?;
        let parser = TidParser::new(tid, Arc::clone(&self.registry))?;
        let serial = parser.serial_hex()?;
        let width = HEX_LEN_96 - HEADER_LEN - TID_MIDDLE_LEN;
        check_epc_len(format!("{header}{middle}{serial:0>width$}"))
    }

    /// Draw random 40-bit serials until one is unused, registering it.
    pub fn random_serial(&self) -> TFResult<String> {
        for attempt in 1..=self.random_attempts {
            let value = OsRng.next_u64() & RANDOM_MASK;
            let serial = format!("{value:0width$X}", width = RANDOM_SERIAL_LEN);
            if self.used.try_register(&serial) {
                return Ok(serial);
            }
            tracing::debug!(attempt, serial = %serial, "random serial collided");
        }
        Err(TFError::Exhaustion(format!(
            "no unused random serial after {} attempts",
            self.random_attempts
        )))
    }

    /// Vendor prefix of `current_epc`, or the default prefix when it is too
    /// short or not hexadecimal.
    pub fn vendor_prefix(&self, current_epc: &str) -> String {
        let clean = normalize_hex(current_epc).to_ascii_uppercase();
        match clean.get(..VENDOR_PREFIX_LEN) {
            Some(prefix) if is_hex(prefix) => prefix.to_string(),
            _ => {
                tracing::debug!(
                    epc = %current_epc,
                    fallback = %self.default_vendor_prefix,
                    "seed EPC prefix unusable, substituting default vendor prefix"
                );
                self.default_vendor_prefix.clone()
            }
        }
    }

    /// Next EPC for `tid`: seed prefix + TID serial, or seed prefix + random
    /// serial when the TID serial was already issued.
    pub fn next_epc_for_tag(&self, current_epc: &str, tid: &str) -> TFResult<String> {
        let prefix = self.vendor_prefix(current_epc);
        let parser = TidParser::new(tid, Arc::clone(&self.registry))?;
        let serial = parser.serial_hex()?;
        if self.used.try_register(serial) {
            return check_epc_len(format!("{prefix}{serial}"));
        }
        tracing::debug!(tid = %tid, serial = %serial, "TID serial already issued, using random serial");
        let random = self.random_serial()?;
        check_epc_len(format!("{prefix}{random}"))
    }
}
