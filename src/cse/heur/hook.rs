//! External-hook policy: the pass emits one row of raw feature values per
//! candidate for an out-of-process learner, and performs whatever decision
//! list the configuration supplies (1-based indices, 0 stops). No learning
//! happens in-process.

use crate::cse::config::CseConfig;
use crate::cse::heur::greedy::occurrence_spread;
use crate::cse::{rewrite, CsePass};
use crate::ir::def::{BinOp, ExprKind, Proc, Ty, UnOp};
use crate::vn::VnStore;
use std::fmt::Write as _;

pub const MAX_FEATURES: usize = 19;

pub const FEATURE_NAMES: [&str; MAX_FEATURES] = [
    "type",
    "viable",
    "live_across_call",
    "const",
    "shared_const",
    "make_cse",
    "has_call",
    "containable",
    "cost_ex",
    "cost_sz",
    "use_count",
    "def_count",
    "use_wt_cnt",
    "def_wt_cnt",
    "distinct_locals",
    "local_occurrences",
    "bb_count",
    "block_spread",
    "enreg_count",
];

fn type_code(ty: Ty) -> i64 {
    match ty {
        Ty::Int => 1,
        Ty::Long => 2,
        Ty::Float => 3,
        Ty::Double => 4,
        Ty::Struct { .. } => 5,
        Ty::Simd => 6,
        _ => 0,
    }
}

/// Raw feature values, deliberately simple building blocks rather than
/// composites; the learner combines them.
pub fn get_features(pass: &CsePass, proc: &Proc, dsc_id: usize, features: &mut [i64; MAX_FEATURES]) {
    let dsc = &pass.dscs[dsc_id];
    let tree = proc.expr(dsc.occs[0].expr);

    let mut enreg_count: i64 = 0;
    for lcl in &proc.lcls {
        if lcl.ref_cnt == 0 || lcl.do_not_enreg {
            continue;
        }
        if !lcl.ty.uses_float_reg() {
            enreg_count += 1;
        }
    }

    let (is_make_cse, _min_block, _max_block, block_spread) = occurrence_spread(pass, proc, dsc_id);
    let is_containable = match &tree.kind {
        ExprKind::Binop { op, .. } => matches!(op, BinOp::Add | BinOp::Mul | BinOp::Shl),
        ExprKind::Unop { op, .. } => *op == UnOp::Not,
        _ => false,
    };

    features[0] = type_code(tree.ty);
    features[1] = dsc.is_viable() as i64;
    features[2] = dsc.live_across_call as i64;
    features[3] = tree.is_const() as i64;
    features[4] = dsc.is_shared_const as i64;
    features[5] = is_make_cse as i64;
    features[6] = proc.subtree_has_call(dsc.occs[0].expr) as i64;
    features[7] = is_containable as i64;
    features[8] = tree.cost_ex as i64;
    features[9] = tree.cost_sz as i64;
    features[10] = dsc.use_count as i64;
    features[11] = dsc.def_count as i64;
    features[12] = dsc.use_wtd as i64;
    features[13] = dsc.def_wtd as i64;
    features[14] = dsc.num_distinct_lcls as i64;
    features[15] = dsc.num_lcl_occs as i64;
    features[16] = proc.blocks.len() as i64;
    features[17] = block_spread as i64;
    features[18] = enreg_count;
}

pub fn consider_candidates(
    pass: &mut CsePass,
    proc: &mut Proc,
    vn: &mut VnStore,
    cfg: &CseConfig,
) {
    let n = pass.candidate_count;
    for &cand_number in &cfg.replay {
        if cand_number == 0 {
            break;
        }
        let index = cand_number as usize - 1;
        if index >= n {
            if pass.verbose {
                println!("invalid candidate number {} in hook decisions", cand_number);
            }
            continue;
        }
        let dsc_id = pass.cse_tab[index];
        if !pass.dscs[dsc_id].is_viable() {
            continue;
        }
        pass.attempt += 1;
        rewrite::perform_cse(pass, proc, vn, dsc_id);
    }
}

/// Metrics surface: feature names, one row per candidate, and the applied
/// sequence.
pub fn metrics_row(pass: &CsePass, proc: &Proc, cfg: &CseConfig) -> String {
    let mut out = String::new();
    let _ = write!(out, " featureNames ");
    for (i, name) in FEATURE_NAMES.iter().enumerate() {
        let _ = write!(out, "{}{}", if i == 0 { "" } else { "," }, name);
    }
    for k in 0..pass.candidate_count {
        let dsc_id = pass.cse_tab[k];
        let mut features = [0i64; MAX_FEATURES];
        get_features(pass, proc, dsc_id, &mut features);
        let _ = write!(out, " features #{}", pass.dscs[dsc_id].index);
        for f in features.iter() {
            let _ = write!(out, ",{}", f);
        }
    }
    if !cfg.replay.is_empty() {
        let _ = write!(out, " seq ");
        for (i, k) in pass.sequence.iter().enumerate() {
            let _ = write!(out, "{}{}", if i == 0 { "" } else { "," }, k);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cse::config::CseConfig;
    use crate::cse::heur::Policy;
    use crate::cse::{dataflow, index, label};

    fn pipeline(p: &mut Proc, cfg: &CseConfig) -> (CsePass, VnStore) {
        let mut vn = VnStore::new();
        vn.number_proc(p);
        let mut pass = CsePass::new(cfg, &vn);
        let policy = Policy::from_config(cfg, &p.name);
        assert!(index::locate(&mut pass, p, &vn, &policy));
        dataflow::init(&mut pass, p);
        dataflow::solve(&mut pass, p);
        label::availability(&mut pass, p, &mut vn);
        (pass, vn)
    }

    fn one_cand_proc() -> Proc {
        let mut p = Proc::new("hook");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let l = p.add_lcl("p", Ty::Long);
        for _ in 0..2 {
            let a = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
            let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
            let ret = p.add_expr(ExprKind::Ret { value: Some(ind) }, Ty::Void);
            p.add_stmt(b0, ret);
        }
        p.recount_locals();
        p
    }

    #[test]
    fn decisions_are_performed_and_metrics_emitted() {
        let mut cfg = CseConfig::default();
        cfg.replay = vec![1];
        let mut p = one_cand_proc();
        let (mut pass, mut vn) = pipeline(&mut p, &cfg);
        consider_candidates(&mut pass, &mut p, &mut vn, &cfg);
        assert_eq!(pass.sequence, vec![1]);

        let row = metrics_row(&pass, &p, &cfg);
        assert!(row.contains("featureNames type,viable"), "{row}");
        assert!(row.contains(" features #1,1,"), "{row}");
        assert!(row.contains(" seq 1"), "{row}");
    }

    #[test]
    fn feature_vector_matches_candidate() {
        let cfg = CseConfig::default();
        let mut p = one_cand_proc();
        let (pass, _vn) = pipeline(&mut p, &cfg);
        let mut features = [0i64; MAX_FEATURES];
        get_features(&pass, &p, pass.cse_tab[0], &mut features);
        assert_eq!(features[0], 1, "int typed");
        assert_eq!(features[1], 1, "viable");
        assert_eq!(features[8], 3, "cost_ex");
        assert_eq!(features[10], 1, "one use");
        assert_eq!(features[11], 1, "one def");
        assert_eq!(features[16], 1, "one block");
    }
}
