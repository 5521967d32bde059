#![allow(dead_code)]

use std::sync::Once;
use tagforge_epc::bits::hex_to_binary;
use tracing::Level;

static INIT_TRACING: Once = Once::new();

/// Install a compact `tracing` subscriber once per test binary.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// 96-bit binary form of a TID fixture.
pub fn tid_bits(hex: &str) -> String {
    match hex_to_binary(hex) {
        Ok(bits) => bits,
        Err(e) => panic!("bad TID fixture '{hex}': {e}"),
    }
}

/// One TID per formula family, each with a model group the family knows.
pub const FAMILY_FIXTURES: [(tagforge_epc::FormulaFamily, &str); 6] = [
    // Monza 4QT, TMN 0x105, group 5
    (tagforge_epc::FormulaFamily::LegacyMonza4, "E2801105200074C5F1A2B3C4"),
    // Monza 5, TMN 0x130, group 3
    (tagforge_epc::FormulaFamily::LegacyMonza5, "E2801130200055AA13579BDF"),
    // Monza R6-B, TMN 0x173, group 3
    (tagforge_epc::FormulaFamily::MidGen, "E2801173200066019876FEDC"),
    // Monza R6, TMN 0x160, group 0
    (tagforge_epc::FormulaFamily::R6, "E2801160200074C5F1A2B3C4"),
    // M750, TMN 0x190, group 16 (even parity at bit 59)
    (tagforge_epc::FormulaFamily::M700, "E2801190200012345ABCDEF1"),
    // M775, TMN 0x1A2, group 2 (odd parity at bit 60)
    (tagforge_epc::FormulaFamily::M700, "E28011A22000777700C0FFEE"),
];
