#![no_main]

use libfuzzer_sys::fuzz_target;
use vncse::ir::parse::parse_proc;

fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else {
        return;
    };
    let _ = parse_proc(src);
});
