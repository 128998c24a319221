//! Stochastic softmax policy and its policy-gradient update mode.
//!
//! Both share the parameterized feature model. The stochastic mode turns
//! preferences into likelihoods via softmax and samples one choice per
//! step from a deterministically seeded generator. The update mode replays
//! a recorded sequence with per-step rewards, accumulates
//! `alpha * reward * (phi(chosen) - sum_i pi(i) * phi(i))` at every step,
//! and folds the total into the parameter vector at the end.

use super::greedy::{Choice, ParamPolicy, NUM_PARAMETERS};
use crate::cse::config::CseConfig;
use crate::cse::{rewrite, CsePass};
use crate::ir::def::Proc;
use crate::rng::Rng;
use crate::vn::VnStore;

const DEFAULT_ALPHA: f64 = 0.001;

pub struct RlPolicy {
    pub base: ParamPolicy,
    pub initial_params: [f64; NUM_PARAMETERS],
    pub base_likelihoods: Vec<f64>,
    rng: Rng,
    alpha: f64,
    rewards: Vec<f64>,
    update_mode: bool,
}

impl RlPolicy {
    pub fn new(cfg: &CseConfig, seed: u64, update_mode: bool) -> Self {
        let base = ParamPolicy::new(cfg);
        let initial_params = base.params;
        Self {
            base,
            initial_params,
            base_likelihoods: Vec::new(),
            rng: Rng::new(seed),
            alpha: cfg.alpha.unwrap_or(DEFAULT_ALPHA),
            rewards: cfg.rewards.clone(),
            update_mode,
        }
    }

    pub fn consider_candidates(
        &mut self,
        pass: &mut CsePass,
        proc: &mut Proc,
        vn: &mut VnStore,
        cfg: &CseConfig,
    ) {
        pass.sort_tab = pass.cse_tab.iter().map(|&d| Some(d)).collect();
        self.base.capture_local_weights(proc);
        if self.update_mode {
            self.update_parameters(pass, proc, vn, cfg);
        } else {
            self.softmax_policy(pass, proc, vn);
        }
    }

    fn softmax_policy(&mut self, pass: &mut CsePass, proc: &mut Proc, vn: &mut VnStore) {
        let mut choices: Vec<Choice> = Vec::new();
        let mut first = true;

        loop {
            let idx = self.choose_softmax(pass, proc, &mut choices);

            if first {
                // Record the starting likelihood of every option.
                for option in &choices {
                    let tag = match option.dsc {
                        Some(d) => pass.dscs[d].index as f64,
                        None => 0.0,
                    };
                    self.base_likelihoods.push(tag);
                    self.base_likelihoods.push(option.softmax);
                }
                first = false;
            }

            let Some(dsc_id) = choices[idx].dsc else {
                self.base.likelihoods.push(choices[idx].softmax);
                break;
            };

            let index = pass.dscs[dsc_id].index as usize;
            debug_assert_eq!(pass.sort_tab[index - 1], Some(dsc_id));
            pass.sort_tab[index - 1] = None;
            debug_assert!(pass.dscs[dsc_id].is_viable());

            rewrite::perform_cse(pass, proc, vn, dsc_id);
            self.base.likelihoods.push(choices[idx].softmax);
        }
    }

    /// Convert preferences to spans in [0, 1] and pick the span containing
    /// a fresh random draw.
    fn choose_softmax(&mut self, pass: &CsePass, proc: &Proc, choices: &mut Vec<Choice>) -> usize {
        self.base.build_choices(pass, proc, choices);
        softmax(choices);

        let random_factor = self.rng.next_double();
        let mut sum = 0.0;
        for (i, choice) in choices.iter().enumerate() {
            sum += choice.softmax;
            if random_factor < sum {
                return i;
            }
        }
        0
    }

    fn update_parameters(
        &mut self,
        pass: &mut CsePass,
        proc: &mut Proc,
        vn: &mut VnStore,
        cfg: &CseConfig,
    ) {
        let n = pass.candidate_count;
        if n == 0 {
            return;
        }

        // Likelihoods must reflect the current parameters throughout, so
        // the per-step deltas accumulate on the side.
        let mut delta = [0.0f64; NUM_PARAMETERS];
        let mut choices: Vec<Choice> = Vec::new();
        let mut step = 0usize;

        for &cand_number in &cfg.replay {
            if cand_number == 0 {
                break;
            }
            let index = cand_number as usize - 1;
            if index >= n {
                if pass.verbose {
                    println!("invalid candidate number {} in replay", cand_number);
                }
                continue;
            }

            // Evaluate the options as they stood before this step.
            self.base.build_choices(pass, proc, &mut choices);
            softmax(&mut choices);

            pass.attempt += 1;
            let Some(dsc_id) = pass.sort_tab[index] else {
                continue;
            };
            pass.sort_tab[index] = None;
            if !pass.dscs[dsc_id].is_viable() {
                // Off-policy sequences can name non-viable candidates.
                continue;
            }

            let reward = self.reward(step);
            self.update_parameters_step(pass, proc, Some(dsc_id), &choices, reward, &mut delta);

            // Perform the CSE so later steps observe the evolved method.
            rewrite::perform_cse(pass, proc, vn, dsc_id);
            step += 1;
        }

        // Stopping early is itself a choice that needs an update, when
        // any viable candidate was left on the table.
        self.base.build_choices(pass, proc, &mut choices);
        if choices.len() > 1 {
            softmax(&mut choices);
            let reward = self.reward(step);
            self.update_parameters_step(pass, proc, None, &choices, reward, &mut delta);
        }

        for (p, d) in self.base.params.iter_mut().zip(delta.iter()) {
            *p += d;
        }
    }

    fn reward(&self, step: usize) -> f64 {
        self.rewards.get(step).copied().unwrap_or(0.0)
    }

    fn update_parameters_step(
        &self,
        pass: &CsePass,
        proc: &Proc,
        chosen: Option<usize>,
        choices: &[Choice],
        reward: f64,
        delta: &mut [f64; NUM_PARAMETERS],
    ) {
        let mut current = [0.0; NUM_PARAMETERS];
        self.base.get_features(pass, proc, chosen, &mut current);

        // Expected feature vector under the current policy.
        let mut adjustment = [0.0; NUM_PARAMETERS];
        for choice in choices {
            let mut features = [0.0; NUM_PARAMETERS];
            self.base.get_features(pass, proc, choice.dsc, &mut features);
            for (a, f) in adjustment.iter_mut().zip(features.iter()) {
                *a += choice.softmax * f;
            }
        }

        for i in 0..NUM_PARAMETERS {
            let gradient = current[i] - adjustment[i];
            delta[i] += self.alpha * reward * gradient;
        }
    }
}

/// softmax(i) = e^pref(i) / sum_k e^pref(k); the results sum to 1.
pub fn softmax(choices: &mut [Choice]) {
    let mut sum = 0.0;
    for choice in choices.iter_mut() {
        choice.softmax = choice.preference.exp();
        sum += choice.softmax;
    }
    if sum > 0.0 {
        for choice in choices.iter_mut() {
            choice.softmax /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cse::config::CseConfig;
    use crate::cse::heur::Policy;
    use crate::cse::{dataflow, index, label};
    use crate::ir::def::{ExprKind, Ty};

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

    fn two_cand_proc() -> Proc {
        let mut p = Proc::new("rl");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let lp = p.add_lcl("p", Ty::Long);
        let lq = p.add_lcl("q", Ty::Long);
        for lcl in [lp, lq] {
            for _ in 0..2 {
                let a = p.add_expr(ExprKind::LclLoad(lcl), Ty::Long);
                let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
                let ret = p.add_expr(ExprKind::Ret { value: Some(ind) }, Ty::Void);
                p.add_stmt(b0, ret);
            }
        }
        p.recount_locals();
        p
    }

    #[test]
    fn softmax_likelihoods_sum_to_one() {
        let mut choices = vec![
            Choice::new(None, 1.0),
            Choice::new(None, 2.0),
            Choice::new(None, 0.3),
        ];
        softmax(&mut choices);
        let sum: f64 = choices.iter().map(|c| c.softmax).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(choices[1].softmax > choices[0].softmax);
        assert!(choices[0].softmax > choices[2].softmax);
    }

    #[test]
    fn stochastic_runs_are_reproducible_for_a_salt() {
        let mut cfg = CseConfig::default();
        cfg.set_policy("softmax");
        cfg.rng_salt = 11;

        let run = |cfg: &CseConfig| {
            let mut p = two_cand_proc();
            let (mut pass, mut vn) = pipeline(&mut p, cfg);
            let mut policy = RlPolicy::new(cfg, crate::rng::hash_name(&p.name) ^ cfg.rng_salt, false);
            policy.consider_candidates(&mut pass, &mut p, &mut vn, cfg);
            (pass.sequence.clone(), p.dump())
        };
        let (seq1, dump1) = run(&cfg);
        let (seq2, dump2) = run(&cfg);
        assert_eq!(seq1, seq2);
        assert_eq!(dump1, dump2);
    }

    #[test]
    fn update_mode_moves_parameters() {
        let mut cfg = CseConfig::default();
        cfg.set_policy("update");
        cfg.replay = vec![1, 0];
        cfg.rewards = vec![1.0, 1.0];
        cfg.alpha = Some(0.01);

        let mut p = two_cand_proc();
        let (mut pass, mut vn) = pipeline(&mut p, &cfg);
        let mut policy = RlPolicy::new(&cfg, 0, true);
        let before = policy.base.params;
        policy.consider_candidates(&mut pass, &mut p, &mut vn, &cfg);
        assert!(pass.made_changes, "the replayed step must be performed");
        assert_ne!(policy.base.params, before, "gradient update must move parameters");
        assert_eq!(policy.initial_params, before);
    }

    #[test]
    fn update_mode_skips_invalid_indices() {
        let mut cfg = CseConfig::default();
        cfg.set_policy("update");
        cfg.replay = vec![99, 1];
        cfg.rewards = vec![0.5, 0.5];

        let mut p = two_cand_proc();
        let (mut pass, mut vn) = pipeline(&mut p, &cfg);
        let mut policy = RlPolicy::new(&cfg, 0, true);
        policy.consider_candidates(&mut pass, &mut p, &mut vn, &cfg);
        assert_eq!(pass.sequence, vec![1]);
    }
}
