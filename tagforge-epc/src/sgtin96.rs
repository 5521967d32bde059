//! GS1 SGTIN-96 encoding.
//!
//! Layout (96 bits, MSB first):
//!
//! ```text
//! | header (8) | filter (3) | partition (3) | company prefix | item reference | serial (38) |
//! ```
//!
//! Company prefix and item reference widths always sum to 44 bits; the split
//! is selected by the partition value.

use crate::bits::{binary_to_hex, bits_to_u64, hex_to_binary, normalize_hex, u64_to_bits};
use serde::Serialize;
use std::{
    fmt::{self, Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use tagforge_error::{TFError, TFResult};

/// SGTIN-96 header value (`0x30`).
pub const SGTIN96_HEADER: u8 = 48;
/// Width of the serial field.
pub const SERIAL_BITS: usize = 38;
/// Largest serial encodable in 38 bits.
pub const MAX_SERIAL: u64 = (1 << SERIAL_BITS) - 1;
/// Combined company prefix + item reference width.
const PAYLOAD_BITS: usize = 44;

const URI_SCHEME: &str = "sgtin-96:";
const URN_PREFIX: &str = "urn:epc:tag:";

/// One row of the SGTIN partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRow {
    pub company_prefix_bits: usize,
    pub company_prefix_digits: usize,
    pub item_reference_bits: usize,
    pub item_reference_digits: usize,
}

const fn row(cp_bits: usize, partition: usize) -> PartitionRow {
    PartitionRow {
        company_prefix_bits: cp_bits,
        company_prefix_digits: 12 - partition,
        item_reference_bits: PAYLOAD_BITS - cp_bits,
        item_reference_digits: partition + 1,
    }
}

/// Partition table indexed by partition value 0..=6.
pub const PARTITION_TABLE: [PartitionRow; 7] = [
    row(40, 0),
    row(37, 1),
    row(34, 2),
    row(30, 3),
    row(27, 4),
    row(24, 5),
    row(20, 6),
];

/// Look up the partition row, rejecting values above 6.
pub fn partition_row(partition: u8) -> TFResult<PartitionRow> {
    PARTITION_TABLE
        .get(partition as usize)
        .copied()
        .ok_or_else(|| TFError::Format(format!("partition {partition} out of range 0..=6")))
}

/// GS1 mod-10 check digit over `digits` (the check digit itself excluded).
///
/// Weights alternate 3, 1, 3, ... starting from the rightmost digit.
pub fn gs1_check_digit(digits: &str) -> TFResult<u8> {
    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let d = c
            .to_digit(10)
            .ok_or_else(|| TFError::Validation(format!("non-digit '{c}' in '{digits}'")))?;
        sum += if i % 2 == 0 { d * 3 } else { d };
    }
    Ok(((10 - sum % 10) % 10) as u8)
}

/// Digits-only URI field to integer; overflow is a format error.
fn numeric_field<T>(name: &str, value: &str, uri: &str) -> TFResult<T>
where
    T: FromStr<Err = ParseIntError>,
{
    value.parse().map_err(|e| {
        TFError::Format(format!("{name} '{value}' in '{uri}' is out of range: {e}"))
    })
}

/// Validate a GTIN and return it normalised to 14 digits.
///
/// GTIN-8/12/13 inputs are left-padded with zeros.
pub fn validate_gtin(gtin: &str) -> TFResult<String> {
    let gtin = gtin.trim();
    if !matches!(gtin.len(), 8 | 12 | 13 | 14) {
        return Err(TFError::Validation(format!(
            "GTIN '{gtin}' must have 8, 12, 13 or 14 digits"
        )));
    }
    if !gtin.chars().all(|c| c.is_ascii_digit()) {
        return Err(TFError::Validation(format!(
            "GTIN '{gtin}' contains non-digit characters"
        )));
    }
    let padded = format!("{gtin:0>14}");
    let (body, check) = padded.split_at(13);
    let expected = gs1_check_digit(body)?;
    if check != expected.to_string() {
        return Err(TFError::Validation(format!(
            "GTIN '{gtin}' fails check digit (expected {expected})"
        )));
    }
    Ok(padded)
}

/// Decoded SGTIN-96 value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sgtin96 {
    filter: u8,
    partition: u8,
    company_prefix: u64,
    item_reference: u64,
    serial: u64,
}

impl Sgtin96 {
    /// Build from field values, validating each against the partition table.
    pub fn new(
        filter: u8,
        partition: u8,
        company_prefix: u64,
        item_reference: u64,
        serial: u64,
    ) -> TFResult<Self> {
        if filter > 7 {
            return Err(TFError::Format(format!("filter {filter} out of range 0..=7")));
        }
        let row = partition_row(partition)?;
        if company_prefix >= 10u64.pow(row.company_prefix_digits as u32) {
            return Err(TFError::Format(format!(
                "company prefix {company_prefix} exceeds {} digits",
                row.company_prefix_digits
            )));
        }
        if item_reference >= 10u64.pow(row.item_reference_digits as u32) {
            return Err(TFError::Format(format!(
                "item reference {item_reference} exceeds {} digits",
                row.item_reference_digits
            )));
        }
        if serial > MAX_SERIAL {
            return Err(TFError::Format(format!(
                "serial {serial} exceeds {SERIAL_BITS} bits"
            )));
        }
        Ok(Self {
            filter,
            partition,
            company_prefix,
            item_reference,
            serial,
        })
    }

    /// Build from a GTIN whose company prefix has `company_prefix_length`
    /// digits. Filter is 1 (point of sale item) and serial 0.
    pub fn from_gtin(gtin: &str, company_prefix_length: usize) -> TFResult<Self> {
        let gtin = validate_gtin(gtin)?;
        if !(6..=12).contains(&company_prefix_length) {
            return Err(TFError::Validation(format!(
                "company prefix length {company_prefix_length} out of range 6..=12"
            )));
        }
        let indicator = &gtin[0..1];
        let company_prefix = &gtin[1..1 + company_prefix_length];
        let item_reference = &gtin[1 + company_prefix_length..13];
        let uri = format!("{URI_SCHEME}1.{company_prefix}.{indicator}{item_reference}.0");
        Self::from_uri(&uri)
    }

    /// Parse `sgtin-96:<filter>.<company prefix>.<item reference>.<serial>`,
    /// optionally prefixed with `urn:epc:tag:`.
    pub fn from_uri(uri: &str) -> TFResult<Self> {
        let uri = uri.trim();
        let body = uri
            .strip_prefix(URN_PREFIX)
            .unwrap_or(uri)
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| TFError::Format(format!("'{uri}' is not an sgtin-96 URI")))?;

        let fields: Vec<&str> = body.split('.').collect();
        let [filter, company_prefix, item_reference, serial] = fields.as_slice() else {
            return Err(TFError::Format(format!(
                "'{uri}' must have 4 dot-separated fields"
            )));
        };
        for (name, value) in [
            ("filter", filter),
            ("company prefix", company_prefix),
            ("item reference", item_reference),
            ("serial", serial),
        ] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(TFError::Format(format!(
                    "{name} '{value}' in '{uri}' is not numeric"
                )));
            }
        }

        let cp_digits = company_prefix.len();
        if !(6..=12).contains(&cp_digits) {
            return Err(TFError::Format(format!(
                "company prefix '{company_prefix}' must have 6..=12 digits"
            )));
        }
        let partition = (12 - cp_digits) as u8;
        let row = partition_row(partition)?;
        if item_reference.len() != row.item_reference_digits {
            return Err(TFError::Format(format!(
                "item reference '{item_reference}' must have {} digits for a {cp_digits}-digit company prefix",
                row.item_reference_digits
            )));
        }

        Self::new(
            numeric_field("filter", filter, uri)?,
            partition,
            numeric_field("company prefix", company_prefix, uri)?,
            numeric_field("item reference", item_reference, uri)?,
            numeric_field("serial", serial, uri)?,
        )
    }

    /// Decode a 24-character EPC hex string.
    pub fn from_epc_hex(hex: &str) -> TFResult<Self> {
        let clean = normalize_hex(hex);
        if clean.len() != 24 {
            return Err(TFError::Format(format!(
                "EPC '{hex}' must be 24 hex characters, got {}",
                clean.len()
            )));
        }
        let bits = hex_to_binary(&clean)?;

        let header = bits_to_u64(&bits[0..8])?;
        if header != SGTIN96_HEADER as u64 {
            return Err(TFError::Format(format!(
                "EPC header {header:#04X} is not SGTIN-96"
            )));
        }
        let filter = bits_to_u64(&bits[8..11])? as u8;
        let partition = bits_to_u64(&bits[11..14])? as u8;
        let row = partition_row(partition)?;

        let cp_end = 14 + row.company_prefix_bits;
        let ir_end = cp_end + row.item_reference_bits;
        let company_prefix = bits_to_u64(&bits[14..cp_end])?;
        let item_reference = bits_to_u64(&bits[cp_end..ir_end])?;
        let serial = bits_to_u64(&bits[ir_end..96])?;

        Self::new(filter, partition, company_prefix, item_reference, serial)
    }

    /// Encode to 24 uppercase hex characters.
    pub fn to_epc(&self) -> String {
        let row = PARTITION_TABLE[self.partition as usize];
        // Field widths are guaranteed by the constructors, so every call
        // below succeeds.
        let bits = [
            u64_to_bits(SGTIN96_HEADER as u64, 8),
            u64_to_bits(self.filter as u64, 3),
            u64_to_bits(self.partition as u64, 3),
            u64_to_bits(self.company_prefix, row.company_prefix_bits),
            u64_to_bits(self.item_reference, row.item_reference_bits),
            u64_to_bits(self.serial, SERIAL_BITS),
        ]
        .into_iter()
        .collect::<TFResult<String>>()
        .and_then(|b| binary_to_hex(&b));

        match bits {
            Ok(hex) => format!("{hex:0>24}"),
            Err(e) => {
                tracing::error!(error = %e, "SGTIN-96 field overflow on encode");
                "0".repeat(24)
            }
        }
    }

    /// Render the `sgtin-96:` URI form.
    pub fn to_uri(&self) -> String {
        format!(
            "{URI_SCHEME}{}.{}.{}.{}",
            self.filter,
            self.company_prefix_text(),
            self.item_reference_text(),
            self.serial
        )
    }

    /// Rebuild the 14-digit code: indicator, company prefix, remaining item
    /// reference digits and the GS1 check digit.
    pub fn to_upc(&self) -> String {
        let item_reference = self.item_reference_text();
        let (indicator, rest) = item_reference.split_at(1);
        let body = format!("{indicator}{}{rest}", self.company_prefix_text());
        // body is always 13 ASCII digits
        let check = gs1_check_digit(&body).unwrap_or(0);
        format!("{body}{check}")
    }

    /// Same product identity with the serial cleared.
    pub fn with_zero_serial(&self) -> Self {
        Self {
            serial: 0,
            ..self.clone()
        }
    }

    /// Same product identity with a new serial.
    pub fn with_serial(&self, serial: u64) -> TFResult<Self> {
        if serial > MAX_SERIAL {
            return Err(TFError::Argument(format!(
                "serial {serial} exceeds {SERIAL_BITS} bits"
            )));
        }
        Ok(Self {
            serial,
            ..self.clone()
        })
    }

    pub fn filter(&self) -> u8 {
        self.filter
    }

    pub fn partition(&self) -> u8 {
        self.partition
    }

    pub fn company_prefix(&self) -> u64 {
        self.company_prefix
    }

    pub fn item_reference(&self) -> u64 {
        self.item_reference
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Company prefix zero-padded to its partition digit count.
    pub fn company_prefix_text(&self) -> String {
        let digits = PARTITION_TABLE[self.partition as usize].company_prefix_digits;
        format!("{:0digits$}", self.company_prefix)
    }

    /// Item reference (indicator digit first) zero-padded to its digit count.
    pub fn item_reference_text(&self) -> String {
        let digits = PARTITION_TABLE[self.partition as usize].item_reference_digits;
        format!("{:0digits$}", self.item_reference)
    }
}

impl Display for Sgtin96 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_table_widths_sum_to_44() {
        for (p, row) in PARTITION_TABLE.iter().enumerate() {
            assert_eq!(row.company_prefix_bits + row.item_reference_bits, 44);
            assert_eq!(row.item_reference_digits, p + 1);
            assert_eq!(row.company_prefix_digits + row.item_reference_digits, 13);
        }
        assert!(partition_row(7).is_err());
    }

    #[test]
    fn check_digit_matches_known_gtins() {
        assert_eq!(gs1_check_digit("0789103374893").unwrap(), 8);
        assert_eq!(gs1_check_digit("0061414112345").unwrap(), 2);
        assert!(gs1_check_digit("12a").is_err());
    }

    #[test]
    fn gtin_validation_rejects_bad_input() {
        assert!(validate_gtin("07891033748938").is_ok());
        assert!(matches!(
            validate_gtin("07891033748939"),
            Err(TFError::Validation(_))
        ));
        assert!(matches!(
            validate_gtin("0789103374893X"),
            Err(TFError::Validation(_))
        ));
        assert!(matches!(validate_gtin("123"), Err(TFError::Validation(_))));
        assert_eq!(validate_gtin("614141123452").unwrap(), "00614141123452");
    }

    #[test]
    fn uri_rejects_inconsistent_digit_counts() {
        assert!(Sgtin96::from_uri("sgtin-96:1.789103.037489.0").is_err());
        assert!(Sgtin96::from_uri("sgtin-96:8.789103.0374893.0").is_err());
        assert!(Sgtin96::from_uri("sgtin-96:1.789103.0374893").is_err());
        assert!(Sgtin96::from_uri("sgtin-64:1.789103.0374893.0").is_err());
        assert!(Sgtin96::from_uri("urn:epc:tag:sgtin-96:1.789103.0374893.5").is_ok());
    }

    #[test]
    fn hex_decode_rejects_foreign_headers() {
        assert!(Sgtin96::from_epc_hex("E2801160200074C5F1A2B3C4").is_err());
        assert!(Sgtin96::from_epc_hex("303B029BC16E").is_err());
        // partition 7
        assert!(Sgtin96::from_epc_hex("303E029BC16E1B4301843203").is_err());
    }

    #[test]
    fn zero_serial_identity_ignores_serial() {
        let a = Sgtin96::from_gtin("07891033748938", 6)
            .unwrap()
            .with_serial(10)
            .unwrap();
        let b = a.with_serial(11).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.with_zero_serial(), b.with_zero_serial());
        assert!(a.with_serial(MAX_SERIAL + 1).is_err());
    }
}
