//! Chip identification: vendor/model lookup, serial extraction from TIDs and
//! per-generation serial formulas.

pub mod formula;
pub mod registry;
pub mod tid;

pub use formula::{FormulaFamily, ParityKind};
pub use registry::{ChipFamily, ChipProfile, ChipRegistry, SerialLayout};
pub use tid::{extract_serial, TagIdentifier, TidParser, SERIAL_HEX_LEN};
