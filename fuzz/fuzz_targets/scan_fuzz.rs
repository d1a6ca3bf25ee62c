//! Scanner + decoder fuzz target: arbitrary bytes are scanned and every message
//! found is decoded and bit-counted. Nothing may panic; errors are fine.
//! Build with: cargo fuzz run scan_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const TABLE: &str = r#"
table master version 13;
element 0-01-001 "WMO BLOCK NUMBER" "Numeric" width 7 scale 0 reference 0;
element 0-01-002 "WMO STATION NUMBER" "Numeric" width 10 scale 0 reference 0;
element 0-01-015 "STATION OR SITE NAME" "CCITT IA5" width 32 scale 0 reference 0;
element 0-12-001 "TEMPERATURE" "C" width 12 scale 1 reference -40;
element 0-31-001 "DELAYED DESCRIPTOR REPLICATION FACTOR" "Numeric" width 8 scale 0 reference 0;
sequence 3-01-001 "WMO BLOCK AND STATION NUMBERS" { 0-01-001 0-01-002 }
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use bufr_decoder::{parse_table, Decoder, DecoderConfig, MessageScanner, TableSet};
    use std::sync::Arc;

    let Ok(table) = parse_table(TABLE) else { return };
    let config = DecoderConfig { max_nodes: 1 << 14, max_steps: 1 << 16, ..DecoderConfig::default() };
    let decoder = Decoder::new(Arc::new(TableSet::new().with(table)), config);
    for message in MessageScanner::new(data).flatten() {
        let _ = decoder.count_bits(&message);
        let _ = decoder.decode(&message);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run scan_fuzz");
}
