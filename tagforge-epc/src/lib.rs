//! Hardware-independent identifier handling: bit utilities, the SGTIN-96
//! codec, chip serial formulas, TID parsing and EPC generation.

pub mod bits;
pub mod chip;
pub mod epc;
pub mod epc_list;
pub mod generator;
pub mod sgtin96;

pub use chip::{
    ChipFamily, ChipProfile, ChipRegistry, FormulaFamily, SerialLayout, TagIdentifier, TidParser,
};
pub use epc::{normalize_96, EpcValue, RawEpc, HEX_LEN_96};
pub use epc_list::EpcList;
pub use generator::{EpcGenerator, UsedSerialSet};
pub use sgtin96::Sgtin96;
