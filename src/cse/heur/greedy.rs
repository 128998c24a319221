//! Parameterized greedy policy: a linear profitability model over a
//! 25-dimensional feature vector, trained offline by policy-gradient runs.
//! Stopping is its own option whose preference tracks estimated register
//! pressure, so the policy quits when one more temp would start spilling.

use crate::cse::config::CseConfig;
use crate::cse::heur::{CNT_CALLEE_SAVED_INT, CNT_CALLEE_TRASH_INT};
use crate::cse::{rewrite, CsePass, BB_UNITY_WEIGHT, MIN_CSE_COST};
use crate::ir::def::{flags, BinOp, ExprKind, Proc, UnOp};
use crate::vn::VnStore;

pub const NUM_PARAMETERS: usize = 25;

const BOOLEAN_SCALE: f64 = 5.0;
const DE_MINIMIS: f64 = 1e-3;

/// Default parameter values from offline policy-gradient training.
pub const DEFAULT_PARAMETERS: [f64; NUM_PARAMETERS] = [
    0.2425, 0.2479, 0.1089, -0.2363, 0.2472, -0.0559, -0.8418, -0.0585, -0.2773, 0.0000, 0.0213,
    -0.4116, 0.0000, -0.0922, 0.2593, -0.0315, -0.0745, 0.2607, 0.3475, -0.0590, -0.3177, -0.6883,
    -0.4998, -0.3220, -0.2268,
];

#[derive(Debug, Clone)]
pub struct Choice {
    /// None is the option to stop doing CSEs.
    pub dsc: Option<usize>,
    pub preference: f64,
    pub softmax: f64,
    pub performed: bool,
}

impl Choice {
    pub fn new(dsc: Option<usize>, preference: f64) -> Self {
        Self { dsc, preference, softmax: 0.0, performed: false }
    }
}

pub struct ParamPolicy {
    pub params: [f64; NUM_PARAMETERS],
    pub local_weights: Vec<f64>,
    pub register_pressure: u32,
    pub likelihoods: Vec<f64>,
}

impl ParamPolicy {
    pub fn new(cfg: &CseConfig) -> Self {
        let mut params = DEFAULT_PARAMETERS;
        if !cfg.params.is_empty() {
            // Missing trailing values stay zero, extras are ignored.
            params = [0.0; NUM_PARAMETERS];
            for (slot, value) in params.iter_mut().zip(cfg.params.iter()) {
                *slot = *value;
            }
        }
        Self {
            params,
            local_weights: Vec::new(),
            register_pressure: CNT_CALLEE_TRASH_INT + CNT_CALLEE_SAVED_INT,
            likelihoods: Vec::new(),
        }
    }

    /// Sorted (highest first) weights of the enregisterable integer
    /// locals: the temp introduced by a CSE competes with these.
    pub fn capture_local_weights(&mut self, proc: &Proc) {
        self.local_weights.clear();
        for lcl in &proc.lcls {
            if lcl.ref_cnt == 0 || lcl.do_not_enreg {
                continue;
            }
            if lcl.ty.uses_float_reg() || lcl.ty.uses_mask_reg() {
                continue;
            }
            self.local_weights.push(lcl.ref_cnt_wtd / BB_UNITY_WEIGHT);
        }
        self.local_weights
            .sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn get_features(
        &self,
        pass: &CsePass,
        proc: &Proc,
        dsc_id: Option<usize>,
        features: &mut [f64; NUM_PARAMETERS],
    ) {
        features.fill(0.0);
        let Some(dsc_id) = dsc_id else {
            self.get_stopping_features(pass, features);
            return;
        };
        let dsc = &pass.dscs[dsc_id];
        let tree = proc.expr(dsc.occs[0].expr);
        let cost_ex = tree.cost_ex as f64;
        let de_minimis_adj = -DE_MINIMIS.ln();

        features[0] = cost_ex;
        features[1] = de_minimis_adj + dsc.use_wtd.max(DE_MINIMIS).ln();
        features[2] = de_minimis_adj + dsc.def_wtd.max(DE_MINIMIS).ln();
        features[3] = tree.cost_sz as f64;
        features[4] = dsc.use_count as f64;
        features[5] = dsc.def_count as f64;

        // Booleans are scaled up so their dynamic range matches the
        // numeric features, roughly [0..5].
        let is_live_across_call = dsc.live_across_call;
        features[6] = BOOLEAN_SCALE * is_live_across_call as u8 as f64;
        features[7] = BOOLEAN_SCALE * tree.ty.uses_int_reg() as u8 as f64;

        let is_constant = tree.is_const();
        let is_shared_const = dsc.is_shared_const;
        features[8] = BOOLEAN_SCALE * (is_constant && !is_shared_const) as u8 as f64;
        features[9] = BOOLEAN_SCALE * is_shared_const as u8 as f64;

        let is_min_cost = tree.cost_ex == MIN_CSE_COST;
        let is_low_cost = tree.cost_ex <= MIN_CSE_COST + 1;
        features[10] = BOOLEAN_SCALE * is_min_cost as u8 as f64;
        features[11] = BOOLEAN_SCALE * (is_constant && is_live_across_call) as u8 as f64;
        features[12] = BOOLEAN_SCALE * (is_constant && is_min_cost) as u8 as f64;
        features[13] = BOOLEAN_SCALE * (is_min_cost && is_live_across_call) as u8 as f64;

        let (is_make_cse, min_block, max_block, block_spread) = occurrence_spread(pass, proc, dsc_id);
        features[14] = BOOLEAN_SCALE * is_make_cse as u8 as f64;
        features[15] = dsc.num_distinct_lcls as f64;
        features[16] = dsc.num_lcl_occs as f64;
        features[17] = BOOLEAN_SCALE * proc.subtree_has_call(dsc.occs[0].expr) as u8 as f64;
        features[18] =
            de_minimis_adj + (dsc.use_count as f64 * dsc.use_wtd).max(DE_MINIMIS).ln();
        features[19] =
            de_minimis_adj + (dsc.num_lcl_occs as f64 * dsc.use_wtd).max(DE_MINIMIS).ln();
        let num_bbs = proc.blocks.len() as f64;
        features[20] = BOOLEAN_SCALE * (block_spread as f64 / num_bbs);

        let is_containable = match &tree.kind {
            ExprKind::Binop { op, .. } => matches!(op, BinOp::Add | BinOp::Mul | BinOp::Shl),
            ExprKind::Unop { op, .. } => *op == UnOp::Not,
            _ => false,
        };
        features[21] = BOOLEAN_SCALE * is_containable as u8 as f64;
        features[22] = BOOLEAN_SCALE * (is_containable && is_low_cost) as u8 as f64;

        // Approximate the allocator's notion of "live across a call" by
        // probing the block range the occurrences span.
        let mut live_across_call_lsra = is_live_across_call;
        if !live_across_call_lsra {
            let lo = min_block.min(max_block);
            let hi = min_block.max(max_block);
            let mut count = 0u32;
            for bid in lo..hi {
                if count >= block_spread {
                    break;
                }
                if pass.block_has_call[bid] {
                    live_across_call_lsra = true;
                    break;
                }
                count += 1;
            }
        }
        features[23] = BOOLEAN_SCALE * live_across_call_lsra as u8 as f64;
    }

    /// The stop option's single feature: the (log) local weight at which
    /// one more temp would force a spill.
    fn get_stopping_features(&self, pass: &CsePass, features: &mut [f64; NUM_PARAMETERS]) {
        let de_minimis_adj = -DE_MINIMIS.ln();
        let current_pressure = self
            .register_pressure
            .saturating_sub(pass.add_cse_count) as usize;
        let spill_at_weight = if current_pressure < self.local_weights.len() {
            self.local_weights[current_pressure]
        } else {
            DE_MINIMIS
        };
        features[24] = de_minimis_adj + spill_at_weight.max(DE_MINIMIS).ln();
    }

    pub fn preference(&self, pass: &CsePass, proc: &Proc, dsc_id: Option<usize>) -> f64 {
        let mut features = [0.0; NUM_PARAMETERS];
        self.get_features(pass, proc, dsc_id, &mut features);
        features
            .iter()
            .zip(self.params.iter())
            .map(|(f, p)| f * p)
            .sum()
    }

    /// All still-available viable candidates, plus the stop option last.
    pub fn build_choices(&self, pass: &CsePass, proc: &Proc, choices: &mut Vec<Choice>) {
        choices.clear();
        for i in 0..pass.candidate_count {
            let Some(dsc_id) = pass.sort_tab[i] else {
                continue;
            };
            if !pass.dscs[dsc_id].is_viable() {
                continue;
            }
            choices.push(Choice::new(Some(dsc_id), self.preference(pass, proc, Some(dsc_id))));
        }
        choices.push(Choice::new(None, self.preference(pass, proc, None)));
    }

    /// Pick the most preferred choice; ties favor stopping, then the
    /// lowest candidate index.
    pub fn choose_greedy(
        &self,
        pass: &CsePass,
        proc: &Proc,
        choices: &mut Vec<Choice>,
        recompute: bool,
    ) -> usize {
        if recompute {
            self.build_choices(pass, proc, choices);
        } else {
            // The stopping preference tracks ambient state; refresh it.
            let stop = choices
                .iter_mut()
                .rfind(|c| c.dsc.is_none())
                .expect("choice array lost its stop option");
            stop.preference = self.preference(pass, proc, None);
        }

        let stop_pos = choices
            .iter()
            .rposition(|c| c.dsc.is_none())
            .expect("choice array lost its stop option");
        let mut best = stop_pos;
        for (i, choice) in choices.iter().enumerate() {
            if i == stop_pos || choice.performed {
                continue;
            }
            let delta = choice.preference - choices[best].preference;
            let update = if delta > 0.0 {
                true
            } else if delta == 0.0 {
                match (choice.dsc, choices[best].dsc) {
                    (None, _) => true,
                    (Some(c), Some(b)) => pass.dscs[c].index < pass.dscs[b].index,
                    _ => false,
                }
            } else {
                false
            };
            if update {
                best = i;
            }
        }
        best
    }

    pub fn greedy_policy(&mut self, pass: &mut CsePass, proc: &mut Proc, vn: &mut VnStore) {
        let mut choices: Vec<Choice> = Vec::new();
        let mut num_unmarked = pass.unmarks;
        let mut recompute = true;

        loop {
            let idx = self.choose_greedy(pass, proc, &mut choices, recompute);
            self.likelihoods.push(choices[idx].softmax);
            let Some(dsc_id) = choices[idx].dsc else {
                break;
            };

            // Purge from the sort table so it cannot be chosen again.
            let index = pass.dscs[dsc_id].index as usize;
            debug_assert_eq!(pass.sort_tab[index - 1], Some(dsc_id));
            pass.sort_tab[index - 1] = None;
            debug_assert!(pass.dscs[dsc_id].is_viable());
            choices[idx].performed = true;

            rewrite::perform_cse(pass, proc, vn, dsc_id);

            // If this CSE unmarked nested uses, other candidates' features
            // are stale and every preference must be recomputed.
            let new_unmarked = pass.unmarks;
            debug_assert!(new_unmarked >= num_unmarked);
            recompute = new_unmarked != num_unmarked;
            num_unmarked = new_unmarked;
        }
    }

    pub fn consider_candidates(&mut self, pass: &mut CsePass, proc: &mut Proc, vn: &mut VnStore) {
        pass.sort_tab = pass.cse_tab.iter().map(|&d| Some(d)).collect();
        self.capture_local_weights(proc);
        self.greedy_policy(pass, proc, vn);
    }
}

/// Hoisting marks and the postorder span of a candidate's occurrences.
pub fn occurrence_spread(
    pass: &CsePass,
    proc: &Proc,
    dsc_id: usize,
) -> (bool, usize, usize, u32) {
    let dsc = &pass.dscs[dsc_id];
    let num_bbs = proc.blocks.len() as u32;
    let mut is_make_cse = false;
    let mut min_postorder = num_bbs;
    let mut max_postorder = 0u32;
    let mut min_block = 0usize;
    let mut max_block = 0usize;
    for occ in &dsc.occs {
        let postorder = proc.blocks[occ.block].postorder_num;
        if postorder < min_postorder {
            min_postorder = postorder;
            min_block = occ.block;
        }
        if postorder >= max_postorder {
            max_postorder = postorder;
            max_block = occ.block;
        }
        is_make_cse |= proc.expr(occ.expr).has_flag(flags::MAKE_CSE);
    }
    let spread = max_postorder.saturating_sub(min_postorder);
    (is_make_cse, min_block, max_block, spread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cse::config::CseConfig;
    use crate::cse::heur::Policy;
    use crate::cse::{dataflow, index, label};
    use crate::ir::def::Ty;

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

    fn two_ind_proc() -> Proc {
        let mut p = Proc::new("greedy");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        let l = p.add_lcl("p", Ty::Long);
        for b in [b0, b1] {
            let a = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
            let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
            let ret = p.add_expr(ExprKind::Ret { value: Some(ind) }, Ty::Void);
            p.add_stmt(b, ret);
        }
        p.recount_locals();
        p
    }

    #[test]
    fn features_reflect_candidate_shape() {
        let cfg = CseConfig::default();
        let mut p = two_ind_proc();
        let (pass, _vn) = pipeline(&mut p, &cfg);
        let policy = ParamPolicy::new(&cfg);
        let mut features = [0.0; NUM_PARAMETERS];
        policy.get_features(&pass, &p, Some(pass.cse_tab[0]), &mut features);
        assert_eq!(features[0], 3.0); // lcl(1) + ind(2)
        assert_eq!(features[4], 1.0); // one use
        assert_eq!(features[5], 1.0); // one def
        assert_eq!(features[6], 0.0); // not live across call
        assert_eq!(features[7], BOOLEAN_SCALE); // int-typed
        assert_eq!(features[15], 1.0);
        assert!(features[20] > 0.0, "occurrences span two blocks");
        assert_eq!(features[24], 0.0, "stop feature belongs to None");
    }

    #[test]
    fn stop_feature_tracks_pressure() {
        let cfg = CseConfig::default();
        let mut p = two_ind_proc();
        let (mut pass, _vn) = pipeline(&mut p, &cfg);
        let mut policy = ParamPolicy::new(&cfg);
        policy.capture_local_weights(&p);
        let mut features = [0.0; NUM_PARAMETERS];
        policy.get_features(&pass, &p, None, &mut features);
        let relaxed = features[24];
        // Pretend we already added many temps: pressure rises and the
        // stopping weight climbs to the hottest local.
        pass.add_cse_count = policy.register_pressure;
        policy.get_features(&pass, &p, None, &mut features);
        let tight = features[24];
        assert!(tight >= relaxed);
    }

    #[test]
    fn greedy_performs_profitable_cse_and_stops() {
        let cfg = CseConfig::default();
        let mut p = two_ind_proc();
        let (mut pass, mut vn) = pipeline(&mut p, &cfg);
        let mut policy = ParamPolicy::new(&cfg);
        policy.consider_candidates(&mut pass, &mut p, &mut vn);
        // With the default parameters this simple candidate scores above
        // the stop option.
        assert!(pass.made_changes);
        assert_eq!(pass.sequence, vec![1]);
    }

    #[test]
    fn custom_parameters_are_padded_and_truncated() {
        let mut cfg = CseConfig::default();
        cfg.params = vec![1.0, 2.0];
        let policy = ParamPolicy::new(&cfg);
        assert_eq!(policy.params[0], 1.0);
        assert_eq!(policy.params[1], 2.0);
        assert_eq!(policy.params[2], 0.0);

        cfg.params = vec![0.5; NUM_PARAMETERS + 10];
        let policy = ParamPolicy::new(&cfg);
        assert_eq!(policy.params[NUM_PARAMETERS - 1], 0.5);
    }

    #[test]
    fn negative_stop_weight_forces_immediate_stop() {
        // A parameter vector that penalizes every feature performs
        // nothing: the stop option's preference dominates.
        let mut cfg = CseConfig::default();
        cfg.params = vec![-1.0; NUM_PARAMETERS];
        let mut p = two_ind_proc();
        let (mut pass, mut vn) = pipeline(&mut p, &cfg);
        let mut policy = ParamPolicy::new(&cfg);
        policy.consider_candidates(&mut pass, &mut p, &mut vn);
        assert!(!pass.made_changes);
        assert!(pass.sequence.is_empty());
    }
}
