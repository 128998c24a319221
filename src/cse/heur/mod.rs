//! Profitability policies.
//!
//! All policies share one legality filter and operate over the viable
//! candidates (at least one def, at least one use, exception promise
//! intact). Selection strategy is the only thing that varies, so the
//! policies are a tagged enum dispatched by match.

pub mod greedy;
pub mod hook;
pub mod random;
pub mod replay;
pub mod rl;
pub mod standard;

use crate::cse::config::{CseConfig, PolicyKind};
use crate::cse::{CsePass, MIN_CSE_COST};
use crate::ir::def::{flags, BinOp, Callee, ExprKind, Proc};
use crate::rng::hash_name;
use crate::vn::VnStore;
use std::cmp::Ordering;
use std::fmt::Write as _;

// Register model: callee-saved/trash counts per class, and the enreg
// cutoffs derived from them the way the promotion buckets expect.
pub const CNT_CALLEE_ENREG_INT: u32 = 8;
pub const CNT_CALLEE_TRASH_INT: u32 = 7;
pub const CNT_CALLEE_SAVED_INT: u32 = 8;
pub const CNT_CALLEE_ENREG_FLT: u32 = 10;
pub const CNT_CALLEE_TRASH_FLT: u32 = 6;
pub const CNT_CALLEE_SAVED_FLT: u32 = 10;
pub const CNT_CALLEE_ENREG_MSK: u32 = 4;
pub const CNT_CALLEE_TRASH_MSK: u32 = 4;
pub const CNT_CALLEE_SAVED_MSK: u32 = 0;

pub const CNT_AGGRESSIVE_ENREG: u32 = CNT_CALLEE_ENREG_INT * 3 / 2;
pub const CNT_MODERATE_ENREG: u32 = CNT_CALLEE_ENREG_INT * 3 + CNT_CALLEE_TRASH_INT * 2;
pub const CNT_AGGRESSIVE_ENREG_FLT: u32 = CNT_CALLEE_ENREG_FLT * 3 / 2;
pub const CNT_MODERATE_ENREG_FLT: u32 = CNT_CALLEE_ENREG_FLT * 3 + CNT_CALLEE_TRASH_FLT * 2;
pub const CNT_AGGRESSIVE_ENREG_MSK: u32 = CNT_CALLEE_ENREG_MSK * 3 / 2;
pub const CNT_MODERATE_ENREG_MSK: u32 = CNT_CALLEE_ENREG_MSK * 3 + CNT_CALLEE_TRASH_MSK * 2;

pub enum Policy {
    Standard(standard::StandardPolicy),
    Greedy(greedy::ParamPolicy),
    Softmax(rl::RlPolicy),
    Update(rl::RlPolicy),
    Replay,
    Random(random::RandomPolicy),
    Hook,
}

impl Policy {
    pub fn from_config(cfg: &CseConfig, proc_name: &str) -> Policy {
        let seed = hash_name(proc_name) ^ cfg.rng_salt;
        match cfg.policy {
            PolicyKind::Default => Policy::Standard(standard::StandardPolicy::new(seed)),
            PolicyKind::Greedy => Policy::Greedy(greedy::ParamPolicy::new(cfg)),
            PolicyKind::Softmax => Policy::Softmax(rl::RlPolicy::new(cfg, seed, false)),
            PolicyKind::Update => Policy::Update(rl::RlPolicy::new(cfg, seed, true)),
            PolicyKind::Replay => Policy::Replay,
            PolicyKind::Random => Policy::Random(random::RandomPolicy::new(seed)),
            PolicyKind::Hook => Policy::Hook,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Standard(_) => "standard",
            Policy::Greedy(_) => "greedy",
            Policy::Softmax(_) => "softmax",
            Policy::Update(_) => "update",
            Policy::Replay => "replay",
            Policy::Random(_) => "random",
            Policy::Hook => "hook",
        }
    }

    /// Legality filter applied during discovery; identical across policies.
    pub fn consider_tree(
        &self,
        pass: &CsePass,
        proc: &Proc,
        vn: &VnStore,
        id: usize,
        is_return: bool,
    ) -> bool {
        can_consider_expr(pass, proc, vn, id, is_return)
    }

    pub fn initialize(&mut self, pass: &mut CsePass, proc: &Proc) {
        if let Policy::Standard(s) = self {
            s.initialize(pass, proc);
        }
    }

    pub fn sort_candidates(&mut self, pass: &mut CsePass, proc: &Proc) {
        match self {
            Policy::Standard(_) => sort_by_cost(pass, proc),
            // The other policies order (or permute) their own worklist.
            _ => {}
        }
    }

    pub fn consider_candidates(
        &mut self,
        pass: &mut CsePass,
        proc: &mut Proc,
        vn: &mut VnStore,
        cfg: &CseConfig,
    ) {
        match self {
            Policy::Standard(s) => s.consider_candidates(pass, proc, vn, cfg),
            Policy::Greedy(g) => g.consider_candidates(pass, proc, vn),
            Policy::Softmax(r) | Policy::Update(r) => r.consider_candidates(pass, proc, vn, cfg),
            Policy::Replay => replay::consider_candidates(pass, proc, vn, cfg),
            Policy::Random(r) => r.consider_candidates(pass, proc, vn),
            Policy::Hook => hook::consider_candidates(pass, proc, vn, cfg),
        }
    }

    /// Shared epilogue: shed any tags discovery or the rewrite left
    /// behind, so the pass can run again over its own output.
    pub fn cleanup(&mut self, proc: &mut Proc) {
        crate::cse::cleanup(proc);
    }

    /// One comma-separated metrics row fragment; field names are stable.
    pub fn metrics_row(&self, pass: &CsePass, proc: &Proc, cfg: &CseConfig) -> String {
        if let Policy::Hook = self {
            return hook::metrics_row(pass, proc, cfg);
        }
        let mut out = String::new();
        let _ = write!(out, " {} seq ", self.name());
        for (i, k) in pass.sequence.iter().enumerate() {
            let _ = write!(out, "{}{}", if i == 0 { "" } else { "," }, k);
        }
        match self {
            Policy::Greedy(g) => {
                append_params(&mut out, "params", &g.params);
            }
            Policy::Softmax(r) => {
                append_params(&mut out, "params", &r.base.params);
                append_floats(&mut out, "likelihoods", &r.base.likelihoods);
                append_floats(&mut out, "baseLikelihoods", &r.base_likelihoods);
            }
            Policy::Update(r) => {
                append_params(&mut out, "params", &r.initial_params);
                append_params(&mut out, "updatedparams", &r.base.params);
            }
            _ => {}
        }
        out
    }
}

fn append_params(out: &mut String, label: &str, params: &[f64]) {
    let _ = write!(out, " {} ", label);
    for (i, p) in params.iter().enumerate() {
        let _ = write!(out, "{}{:.6}", if i == 0 { "" } else { "," }, p);
    }
}

fn append_floats(out: &mut String, label: &str, values: &[f64]) {
    let _ = write!(out, " {} ", label);
    for (i, v) in values.iter().enumerate() {
        let _ = write!(out, "{}{:.3}", if i == 0 { "" } else { "," }, v);
    }
}

fn subtree_has_store(proc: &Proc, root: usize) -> bool {
    proc.eval_order(root)
        .iter()
        .any(|&id| matches!(proc.expr(id).kind, ExprKind::StoreLcl { .. }))
}

/// Legality: can this expression be a CSE candidate at all?
pub fn can_consider_expr(
    pass: &CsePass,
    proc: &Proc,
    vn: &VnStore,
    id: usize,
    is_return: bool,
) -> bool {
    let e = proc.expr(id);

    if e.is_integral_const() && !pass.const_cse_enabled {
        return false;
    }

    // A struct store under a return is not re-morphed cleanly; SIMD values
    // are fine.
    if is_return && e.ty.is_struct() {
        return false;
    }

    if e.has_flag(flags::DONT_CSE) {
        return false;
    }
    if subtree_has_store(proc, id) {
        return false;
    }
    if e.ty.is_void() {
        return false;
    }

    let cost = if pass.opt_size { e.cost_sz } else { e.cost_ex };
    if cost < MIN_CSE_COST {
        return false;
    }

    match &e.kind {
        ExprKind::Call { callee, .. } => {
            // An allocator's result is deliberately left alone: marking it
            // usually blocks the loads through it from becoming CSEs.
            if matches!(callee, Callee::Helper { allocator: true, .. }) {
                return false;
            }
            if proc.subtree_has_persistent_effects(id) {
                return false;
            }
        }
        ExprKind::IntCon(_) | ExprKind::DblCon(_) => {}
        ExprKind::Ind { .. } | ExprKind::ArrLen { .. } => {}
        ExprKind::LclLoad(_) => return false,
        ExprKind::Unop { .. } | ExprKind::Cast { .. } | ExprKind::Cmp { .. } => {}
        ExprKind::Binop { op, .. } => {
            // Address-mode components fold into the consuming load/store.
            if matches!(op, BinOp::Add | BinOp::Mul | BinOp::Shl)
                && e.has_flag(flags::ADDR_MODE)
            {
                return false;
            }
        }
        ExprKind::Comma { .. } => {}
        ExprKind::BoundsCheck { .. } | ExprKind::StoreLcl { .. } | ExprKind::Ret { .. } => {
            return false;
        }
    }

    let value_vn = vn.normalize(e.vnp.liberal);
    if vn.is_reserved(value_vn) && value_vn != vn.vn_for_null() {
        return false;
    }

    // Non-leaf trees that compute a constant are left to assertion
    // propagation, which works from conservative numbers.
    if !e.is_leaf() && vn.is_constant(vn.normalize(e.vnp.conservative)) {
        return false;
    }

    true
}

/// Rank candidates most-appealing first into the shared sort table.
pub fn sort_by_cost(pass: &mut CsePass, proc: &Proc) {
    let mut tab = pass.cse_tab.clone();
    let opt_size = pass.opt_size;
    tab.sort_by(|&a, &b| {
        let da = &pass.dscs[a];
        let db = &pass.dscs[b];
        let ea = proc.expr(da.occs[0].expr);
        let eb = proc.expr(db.occs[0].expr);
        // Highest cost first, then most uses, then fewest defs; ties
        // break on the candidate index for a stable order.
        let ord = if opt_size {
            (eb.cost_sz, db.use_count, da.def_count, da.index).partial_cmp(&(
                ea.cost_sz,
                da.use_count,
                db.def_count,
                db.index,
            ))
        } else {
            (eb.cost_ex as f64, db.use_wtd, da.def_wtd, da.index as f64).partial_cmp(&(
                ea.cost_ex as f64,
                da.use_wtd,
                db.def_wtd,
                db.index as f64,
            ))
        };
        ord.unwrap_or(Ordering::Equal)
    });
    pass.sort_tab = tab.into_iter().map(Some).collect();
}
