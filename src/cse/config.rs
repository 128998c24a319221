//! Pass configuration, settable from `VNCSE_*` environment variables and
//! overridable by the driver's command line flags. Malformed values warn in
//! verbose mode and degrade to their empty defaults.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstCseMode {
    All,
    AllNoShare,
    TargetOnly,
    TargetOnlyNoShare,
    Off,
}

impl ConstCseMode {
    pub fn const_cse_enabled(self) -> bool {
        self != ConstCseMode::Off
    }

    pub fn shared_const_cse_enabled(self) -> bool {
        matches!(self, ConstCseMode::All | ConstCseMode::TargetOnly)
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "all" => Self::All,
            "all-no-share" => Self::AllNoShare,
            "target-only" => Self::TargetOnly,
            "target-only-no-share" => Self::TargetOnlyNoShare,
            "off" => Self::Off,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::AllNoShare => "all-no-share",
            Self::TargetOnly => "target-only",
            Self::TargetOnlyNoShare => "target-only-no-share",
            Self::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Default,
    Greedy,
    Softmax,
    Update,
    Replay,
    Random,
    Hook,
}

impl PolicyKind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "default" => Self::Default,
            "greedy" => Self::Greedy,
            "softmax" => Self::Softmax,
            "update" => Self::Update,
            "replay" => Self::Replay,
            "random" => Self::Random,
            "hook" => Self::Hook,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CseConfig {
    pub disable: bool,
    pub const_cse: ConstCseMode,
    pub policy: PolicyKind,
    pub rng_salt: u64,
    /// Parameter vector for the parameterized policies; empty uses defaults.
    pub params: Vec<f64>,
    /// 1-based candidate indices for replay/update/hook; 0 means stop.
    pub replay: Vec<u32>,
    pub rewards: Vec<f64>,
    pub alpha: Option<f64>,
    /// Bitmask gating the first 32 promotion attempts.
    pub cse_mask: Option<u32>,
    pub opt_size: bool,
    pub stress: bool,
    pub verbose: bool,
    pub metrics: bool,
}

impl Default for CseConfig {
    fn default() -> Self {
        Self {
            disable: false,
            const_cse: ConstCseMode::TargetOnly,
            policy: PolicyKind::Default,
            rng_salt: 0,
            params: Vec::new(),
            replay: Vec::new(),
            rewards: Vec::new(),
            alpha: None,
            cse_mask: None,
            opt_size: false,
            stress: false,
            verbose: false,
            metrics: false,
        }
    }
}

fn env_bool(key: &str, default_v: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default_v,
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl CseConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.verbose = env_bool("VNCSE_VERBOSE", false);
        cfg.disable = env_bool("VNCSE_DISABLE", false);
        cfg.opt_size = env_bool("VNCSE_OPT_SIZE", false);
        cfg.stress = env_bool("VNCSE_STRESS", false);
        cfg.metrics = env_bool("VNCSE_METRICS", false);

        if let Some(v) = env_str("VNCSE_CONST_CSE") {
            cfg.set_const_cse(&v);
        }
        if let Some(v) = env_str("VNCSE_POLICY") {
            cfg.set_policy(&v);
        }
        if let Some(v) = env_str("VNCSE_RNG_SALT") {
            cfg.set_rng_salt(&v);
        }
        if let Some(v) = env_str("VNCSE_PARAMS") {
            cfg.set_params(&v);
        }
        if let Some(v) = env_str("VNCSE_REPLAY") {
            cfg.set_replay(&v);
        }
        if let Some(v) = env_str("VNCSE_REWARDS") {
            cfg.set_rewards(&v);
        }
        if let Some(v) = env_str("VNCSE_ALPHA") {
            cfg.set_alpha(&v);
        }
        if let Some(v) = env_str("VNCSE_MASK") {
            cfg.set_mask(&v);
        }
        cfg
    }

    fn warn(&self, field: &str, value: &str) {
        if self.verbose {
            eprintln!("warning: malformed {} value '{}', ignored", field, value);
        }
    }

    pub fn set_const_cse(&mut self, v: &str) {
        match ConstCseMode::parse(v.trim()) {
            Some(m) => self.const_cse = m,
            None => self.warn("const-cse", v),
        }
    }

    pub fn set_policy(&mut self, v: &str) {
        match PolicyKind::parse(v.trim()) {
            Some(p) => self.policy = p,
            None => self.warn("policy", v),
        }
    }

    pub fn set_params(&mut self, v: &str) {
        match parse_f64_list(v) {
            Some(p) => self.params = p,
            None => self.warn("params", v),
        }
    }

    pub fn set_replay(&mut self, v: &str) {
        match parse_u32_list(v) {
            Some(r) => self.replay = r,
            None => self.warn("replay", v),
        }
    }

    pub fn set_rewards(&mut self, v: &str) {
        match parse_f64_list(v) {
            Some(r) => self.rewards = r,
            None => self.warn("rewards", v),
        }
    }

    pub fn set_rng_salt(&mut self, v: &str) {
        match v.trim().parse::<u64>() {
            Ok(s) => self.rng_salt = s,
            Err(_) => self.warn("rng-salt", v),
        }
    }

    pub fn set_alpha(&mut self, v: &str) {
        match v.trim().parse::<f64>() {
            Ok(a) => self.alpha = Some(a),
            Err(_) => self.warn("alpha", v),
        }
    }

    pub fn set_mask(&mut self, v: &str) {
        let t = v.trim();
        let parsed = if let Some(hex) = t.strip_prefix("0x") {
            u32::from_str_radix(hex, 16).ok()
        } else {
            t.parse::<u32>().ok()
        };
        match parsed {
            Some(m) => self.cse_mask = Some(m),
            None => self.warn("mask", v),
        }
    }
}

fn parse_f64_list(v: &str) -> Option<Vec<f64>> {
    v.split(',')
        .map(|s| s.trim().parse::<f64>().ok())
        .collect()
}

fn parse_u32_list(v: &str) -> Option<Vec<u32>> {
    v.split(',')
        .map(|s| s.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_cse_modes_gate_sharing() {
        assert!(ConstCseMode::All.shared_const_cse_enabled());
        assert!(ConstCseMode::TargetOnly.shared_const_cse_enabled());
        assert!(!ConstCseMode::AllNoShare.shared_const_cse_enabled());
        assert!(!ConstCseMode::Off.const_cse_enabled());
        assert!(ConstCseMode::AllNoShare.const_cse_enabled());
    }

    #[test]
    fn list_setters_accept_well_formed_values() {
        let mut cfg = CseConfig::default();
        cfg.set_replay("1, 3,0");
        assert_eq!(cfg.replay, vec![1, 3, 0]);
        cfg.set_rewards("0.5,-1.25");
        assert_eq!(cfg.rewards, vec![0.5, -1.25]);
        cfg.set_mask("0xff");
        assert_eq!(cfg.cse_mask, Some(255));
    }

    #[test]
    fn malformed_values_are_ignored() {
        let mut cfg = CseConfig::default();
        cfg.set_replay("1,zap,3");
        assert!(cfg.replay.is_empty());
        cfg.set_policy("bogus");
        assert_eq!(cfg.policy, PolicyKind::Default);
        cfg.set_alpha("fast");
        assert_eq!(cfg.alpha, None);
        cfg.set_rng_salt("-1");
        assert_eq!(cfg.rng_salt, 0);
    }

    #[test]
    fn alpha_and_salt_setters_accept_well_formed_values() {
        let mut cfg = CseConfig::default();
        cfg.set_alpha("0.01");
        assert_eq!(cfg.alpha, Some(0.01));
        cfg.set_rng_salt("17");
        assert_eq!(cfg.rng_salt, 17);
    }
}
