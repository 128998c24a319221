#![no_main]

use libfuzzer_sys::fuzz_target;
use vncse::cse::config::CseConfig;
use vncse::cse::optimize;
use vncse::ir::parse::parse_proc;
use vncse::ir::verify::verify_proc;
use vncse::vn::VnStore;

fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else {
        return;
    };
    let mut proc = match parse_proc(src) {
        Ok(p) => p,
        Err(_) => return,
    };
    if verify_proc(&proc).is_err() {
        return;
    }

    let mut vn = VnStore::new();
    vn.number_proc(&mut proc);

    let cfg = CseConfig::default();
    let _ = optimize(&mut proc, &mut vn, &cfg);

    // Whatever the pass did, the IR must still be well formed.
    verify_proc(&proc).expect("CSE produced malformed IR");
});
