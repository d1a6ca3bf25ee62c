//! Table parser fuzz target: feed arbitrary text to the table parser and lint
//! whatever parses. The parser must not panic; it should return Ok or Err.
//! Build with: cargo fuzz run table_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if let Ok(table) = bufr_decoder::parse_table(s) {
        let _ = bufr_decoder::lint(&table, None);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run table_fuzz");
}
