use std::env;
use std::fs;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Instant;

use vncse::cse::config::CseConfig;
use vncse::cse::optimize;
use vncse::ir::parse::parse_proc;
use vncse::ir::verify::verify_proc;
use vncse::vn::VnStore;

struct CliLog {
    color: bool,
    detailed: bool,
}

impl CliLog {
    fn new() -> Self {
        let is_tty = std::io::stdout().is_terminal();
        let no_color = env::var_os("NO_COLOR").is_some();
        let force_color = env::var_os("VNCSE_FORCE_COLOR").is_some();
        let force_verbose = env::var_os("VNCSE_VERBOSE_LOG").is_some();
        Self {
            color: (is_tty || force_color) && !no_color,
            detailed: is_tty || force_verbose,
        }
    }

    fn style(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn dim(&self, text: &str) -> String {
        self.style("2", text)
    }

    fn red_bold(&self, text: &str) -> String {
        self.style("1;91", text)
    }

    fn green_bold(&self, text: &str) -> String {
        self.style("1;92", text)
    }

    fn cyan_bold(&self, text: &str) -> String {
        self.style("1;96", text)
    }

    fn white_bold(&self, text: &str) -> String {
        self.style("1;97", text)
    }

    fn banner(&self, input: &str) {
        if !self.detailed {
            return;
        }
        println!("{}", self.red_bold("vncse"));
        println!(" {} {}", self.dim("└─"), self.white_bold(&format!("Input: {}", input)));
    }

    fn step_start(&self, idx: usize, total: usize, title: &str) -> Instant {
        if self.detailed {
            println!(
                "{} {} {}",
                self.cyan_bold("=>"),
                self.dim(&format!("[{}/{}]", idx, total)),
                self.white_bold(title)
            );
        }
        Instant::now()
    }

    fn step_done(&self, start: Instant, detail: &str) {
        if self.detailed {
            println!(
                "   {} {} {}",
                self.green_bold("✓"),
                self.white_bold(detail),
                self.dim(&format!("({:.1?})", start.elapsed()))
            );
        }
    }
}

fn usage() -> &'static str {
    "usage: vncse [options] <descriptor.cfg>\n\
     \n\
     options:\n\
       --policy=<default|greedy|softmax|update|replay|random|hook>\n\
       --const-cse=<all|all-no-share|target-only|target-only-no-share|off>\n\
       --replay=<n,n,...>     1-based candidate sequence; 0 stops\n\
       --rewards=<f,f,...>    per-step rewards for update mode\n\
       --params=<f,f,...>     parameter vector (25 doubles)\n\
       --alpha=<f>            learning rate for update mode\n\
       --salt=<n>             PRNG salt\n\
       --mask=<hex|dec>       bitmask over the first 32 attempts\n\
       --size                 optimize for code size\n\
       --disable              skip the pass\n\
       --verbose              trace pass decisions\n\
       --metrics              emit a metrics row\n\
     \n\
     Environment variables VNCSE_* provide the same knobs."
}

fn main() -> ExitCode {
    let mut cfg = CseConfig::from_env();
    let mut input: Option<String> = None;

    for arg in env::args().skip(1) {
        if let Some(v) = arg.strip_prefix("--policy=") {
            cfg.set_policy(v);
        } else if let Some(v) = arg.strip_prefix("--const-cse=") {
            cfg.set_const_cse(v);
        } else if let Some(v) = arg.strip_prefix("--replay=") {
            cfg.set_replay(v);
        } else if let Some(v) = arg.strip_prefix("--rewards=") {
            cfg.set_rewards(v);
        } else if let Some(v) = arg.strip_prefix("--params=") {
            cfg.set_params(v);
        } else if let Some(v) = arg.strip_prefix("--alpha=") {
            cfg.set_alpha(v);
        } else if let Some(v) = arg.strip_prefix("--salt=") {
            cfg.set_rng_salt(v);
        } else if let Some(v) = arg.strip_prefix("--mask=") {
            cfg.set_mask(v);
        } else if arg == "--size" {
            cfg.opt_size = true;
        } else if arg == "--disable" {
            cfg.disable = true;
        } else if arg == "--verbose" {
            cfg.verbose = true;
        } else if arg == "--metrics" {
            cfg.metrics = true;
        } else if arg == "--help" || arg == "-h" {
            println!("{}", usage());
            return ExitCode::SUCCESS;
        } else if arg.starts_with("--") {
            eprintln!("unknown option '{}'\n\n{}", arg, usage());
            return ExitCode::FAILURE;
        } else {
            input = Some(arg);
        }
    }

    let Some(input) = input else {
        eprintln!("{}", usage());
        return ExitCode::FAILURE;
    };

    let log = CliLog::new();
    log.banner(&input);

    let text = match fs::read_to_string(&input) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", input, e);
            return ExitCode::FAILURE;
        }
    };

    let t = log.step_start(1, 4, "Parse");
    let mut proc = match parse_proc(&text) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = verify_proc(&proc) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    log.step_done(
        t,
        &format!("{} blocks, {} exprs", proc.blocks.len(), proc.exprs.len()),
    );

    let t = log.step_start(2, 4, "Value numbering");
    let mut vn = VnStore::new();
    vn.number_proc(&mut proc);
    log.step_done(t, "numbered");

    let t = log.step_start(3, 4, "CSE");
    let (changed, metrics) = optimize(&mut proc, &mut vn, &cfg);
    log.step_done(t, if changed { "changed" } else { "no change" });

    let t = log.step_start(4, 4, "Verify");
    if let Err(e) = verify_proc(&proc) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    log.step_done(t, "ok");

    print!("{}", proc.dump());
    if let Some(row) = metrics {
        println!("metrics,{},{}", proc.name, row.trim_start());
    }

    ExitCode::SUCCESS
}
