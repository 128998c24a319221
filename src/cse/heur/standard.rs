//! The fixed profitability heuristic.
//!
//! Candidates are ranked by cost and promoted when the modeled cost of a
//! store-plus-loads rendition beats re-evaluating the expression at every
//! use. How optimistic the model is depends on how many enregisterable
//! locals already compete for registers: a temp expected to stay in a
//! register gets minimum def/use costs, one expected to spill pays the
//! memory-access rate.

use super::{
    CNT_AGGRESSIVE_ENREG, CNT_AGGRESSIVE_ENREG_FLT, CNT_AGGRESSIVE_ENREG_MSK,
    CNT_CALLEE_SAVED_FLT, CNT_CALLEE_SAVED_MSK, CNT_MODERATE_ENREG, CNT_MODERATE_ENREG_FLT,
    CNT_MODERATE_ENREG_MSK,
};
use crate::cse::config::CseConfig;
use crate::cse::{rewrite, CsePass, BB_UNITY_WEIGHT};
use crate::ir::def::{Proc, Ty};
use crate::rng::Rng;
use crate::vn::VnStore;

const LARGE_FRAME_SIZE: u32 = 0x080;
const HUGE_FRAME_SIZE: u32 = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Aggressive,
    Moderate,
    Conservative,
}

pub struct StandardPolicy {
    aggressive_ref_cnt: f64,
    moderate_ref_cnt: f64,
    enreg_count_int: u32,
    enreg_count_flt: u32,
    enreg_count_msk: u32,
    large_frame: bool,
    huge_frame: bool,
    rng: Rng,
}

impl StandardPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            aggressive_ref_cnt: 0.0,
            moderate_ref_cnt: 0.0,
            enreg_count_int: 0,
            enreg_count_flt: 0,
            enreg_count_msk: 0,
            large_frame: false,
            huge_frame: false,
            rng: Rng::new(seed),
        }
    }

    /// Establish the aggressive/moderate cutoffs from the weight
    /// distribution of enregisterable locals, and estimate the frame size.
    pub fn initialize(&mut self, pass: &mut CsePass, proc: &Proc) {
        let mut frame_size: u32 = 0;
        let mut reg_avail_int = CNT_MODERATE_ENREG + 1;
        let mut reg_avail_flt = CNT_MODERATE_ENREG_FLT + 1;
        let mut reg_avail_msk = CNT_MODERATE_ENREG_MSK + 1;

        for lcl in &proc.lcls {
            // Unreferenced locals take no frame slot; incoming arguments
            // live in the caller's frame.
            if lcl.ref_cnt == 0 || lcl.is_param {
                continue;
            }
            let avail = if lcl.ty.uses_int_reg() {
                &mut reg_avail_int
            } else if lcl.ty.uses_mask_reg() {
                &mut reg_avail_msk
            } else {
                &mut reg_avail_flt
            };

            let mut on_stack = *avail == 0;
            if lcl.do_not_enreg {
                on_stack = true;
            }
            if on_stack {
                frame_size += lcl.ty.stack_home_size();
            } else if lcl.ref_cnt <= 2 {
                // A single-use single-def local occupies one register.
                *avail -= 1;
            } else if *avail >= 2 {
                *avail -= 2;
            } else {
                *avail = 0;
            }

            if frame_size > LARGE_FRAME_SIZE {
                self.large_frame = true;
            }
            if frame_size > HUGE_FRAME_SIZE {
                self.huge_frame = true;
                break;
            }
        }

        // Visit register candidates in decreasing weight order; the
        // cutoffs record the weight at which the register file runs out.
        let mut tracked: Vec<&crate::ir::def::LclDsc> = proc
            .lcls
            .iter()
            .filter(|l| l.ref_cnt > 0 && !l.do_not_enreg)
            .collect();
        if pass.opt_size {
            tracked.sort_by(|a, b| b.ref_cnt.cmp(&a.ref_cnt));
        } else {
            tracked.sort_by(|a, b| {
                b.ref_cnt_wtd
                    .partial_cmp(&a.ref_cnt_wtd)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        for lcl in tracked {
            let (enreg_count, cnt_aggressive, cnt_moderate) = if lcl.ty.uses_int_reg() {
                self.enreg_count_int += 1;
                (self.enreg_count_int, CNT_AGGRESSIVE_ENREG, CNT_MODERATE_ENREG)
            } else if lcl.ty.uses_mask_reg() {
                self.enreg_count_msk += 1;
                (
                    self.enreg_count_msk,
                    CNT_AGGRESSIVE_ENREG_MSK,
                    CNT_MODERATE_ENREG_MSK,
                )
            } else {
                self.enreg_count_flt += 1;
                (
                    self.enreg_count_flt,
                    CNT_AGGRESSIVE_ENREG_FLT,
                    CNT_MODERATE_ENREG_FLT,
                )
            };

            let weight = if pass.opt_size {
                lcl.ref_cnt as f64
            } else {
                lcl.ref_cnt_wtd
            };
            if self.aggressive_ref_cnt == 0.0 && enreg_count > cnt_aggressive {
                self.aggressive_ref_cnt = weight + BB_UNITY_WEIGHT;
            }
            if self.moderate_ref_cnt == 0.0 && enreg_count > cnt_moderate {
                self.moderate_ref_cnt = weight + BB_UNITY_WEIGHT / 2.0;
            }
        }

        self.aggressive_ref_cnt = self.aggressive_ref_cnt.max(BB_UNITY_WEIGHT * 2.0);
        self.moderate_ref_cnt = self.moderate_ref_cnt.max(BB_UNITY_WEIGHT);

        if pass.verbose {
            println!(
                "aggressive cutoff {}, moderate cutoff {}, enreg int/flt/msk {}/{}/{}, {} frame",
                self.aggressive_ref_cnt,
                self.moderate_ref_cnt,
                self.enreg_count_int,
                self.enreg_count_flt,
                self.enreg_count_msk,
                if self.huge_frame {
                    "huge"
                } else if self.large_frame {
                    "large"
                } else {
                    "small"
                }
            );
        }
    }

    /// Model the cost of promoting against the cost of leaving the
    /// expression in place.
    fn promotion_check(&mut self, pass: &CsePass, proc: &Proc, dsc_id: usize, stress: bool) -> (bool, Bucket) {
        let dsc = &pass.dscs[dsc_id];
        let expr = proc.expr(dsc.occs[0].expr);
        let opt_size = pass.opt_size;

        let (def_count, use_count) = if opt_size {
            (dsc.def_count as f64, dsc.use_count as f64)
        } else {
            (dsc.def_wtd, dsc.use_wtd)
        };
        let cost = if opt_size {
            expr.cost_sz as u32
        } else {
            expr.cost_ex as u32
        };
        // Promoting adds two refs per def and one per use.
        let cse_ref_cnt = def_count * 2.0 + use_count;

        let mut can_enregister = true;
        let mut slot_count: u32 = 1;
        let mut enreg_count: u32 = 0;
        let mut cnt_aggressive_enreg: u32 = 0;
        if expr.ty.is_struct() {
            can_enregister = false;
            slot_count = expr.ty.stack_home_size().div_ceil(8);
        } else if expr.ty.uses_int_reg() {
            enreg_count = self.enreg_count_int;
            cnt_aggressive_enreg = CNT_AGGRESSIVE_ENREG;
        } else if expr.ty.uses_mask_reg() {
            enreg_count = self.enreg_count_msk;
            cnt_aggressive_enreg = CNT_AGGRESSIVE_ENREG_MSK;
        } else {
            enreg_count = self.enreg_count_flt;
            cnt_aggressive_enreg = CNT_AGGRESSIVE_ENREG_FLT;
        }

        let mut cse_def_cost: u32;
        let mut cse_use_cost: u32;
        let bucket;

        if opt_size {
            // Code-size promotion: byte costs and unweighted counts.
            if cse_ref_cnt >= self.aggressive_ref_cnt {
                bucket = Bucket::Aggressive;
                cse_def_cost = 1;
                cse_use_cost = 1;
                if (dsc.live_across_call || !can_enregister) && self.large_frame {
                    cse_def_cost += 1;
                    cse_use_cost += 1;
                }
                if (dsc.live_across_call || !can_enregister) && self.huge_frame {
                    cse_def_cost += 1;
                    cse_use_cost += 1;
                }
            } else {
                bucket = Bucket::Conservative;
                if self.large_frame {
                    cse_def_cost = 6; // mov [frame+disp32],reg
                    cse_use_cost = 5;
                } else {
                    cse_def_cost = 3; // mov [frame+disp8],reg
                    cse_use_cost = 2;
                }
            }
            if expr.ty.is_floating() {
                // Float loads/stores encode longer.
                cse_def_cost += 2;
                cse_use_cost += 1;
            }
        } else if cse_ref_cnt >= self.aggressive_ref_cnt && can_enregister {
            // Expected to be enregistered all the way.
            bucket = Bucket::Aggressive;
            cse_def_cost = 1;
            cse_use_cost = 1;
        } else if cse_ref_cnt >= self.moderate_ref_cnt {
            bucket = Bucket::Moderate;
            if !dsc.live_across_call && can_enregister {
                cse_def_cost = 2;
                cse_use_cost = 1;
            } else {
                cse_def_cost = 2;
                cse_use_cost = if can_enregister {
                    if enreg_count < cnt_aggressive_enreg {
                        1
                    } else {
                        2
                    }
                } else {
                    3
                };
            }
        } else {
            bucket = Bucket::Conservative;
            if !dsc.live_across_call && can_enregister {
                cse_def_cost = 2;
                cse_use_cost = 2;
            } else {
                cse_def_cost = 2;
                cse_use_cost = 3;
            }
        }

        if slot_count > 1 {
            cse_def_cost *= slot_count;
            cse_use_cost *= slot_count;
        }

        let mut extra_yes_cost: f64 = 0.0;
        if dsc.live_across_call {
            // Without callee-saved registers of the right class the
            // allocator must spill at the def and reload at the use.
            if bucket != Bucket::Conservative {
                let has_required_spill = if expr.ty.uses_int_reg() {
                    false
                } else if expr.ty.uses_mask_reg() {
                    CNT_CALLEE_SAVED_MSK == 0
                } else {
                    CNT_CALLEE_SAVED_FLT == 0 || expr.ty == Ty::Simd
                };
                if has_required_spill {
                    cse_def_cost += 1;
                    cse_use_cost += 1;
                }
            }

            if enreg_count < cnt_aggressive_enreg {
                // Likely caller-saved spill/restore around the call.
                extra_yes_cost = BB_UNITY_WEIGHT;
                if cse_ref_cnt < self.moderate_ref_cnt {
                    extra_yes_cost *= 2.0;
                }
            }
        }

        // Size won if we skip the CSE: each remaining use re-emits the
        // expression.
        let mut extra_no_cost: f64 = 0.0;
        let size = expr.cost_sz as u32;
        if size > cse_use_cost {
            extra_no_cost = ((size - cse_use_cost) * dsc.use_count * 2) as f64;
        }

        let no_cse_cost = use_count * cost as f64 + extra_no_cost;
        let yes_cse_cost =
            def_count * cse_def_cost as f64 + use_count * cse_use_cost as f64 + extra_yes_cost;

        if pass.verbose {
            println!(
                "CSE #{:02} promotion: no {} vs yes {} [{:?}]",
                dsc.index, no_cse_cost, yes_cse_cost, bucket
            );
        }

        let mut result = yes_cse_cost <= no_cse_cost;
        if !result && stress && no_cse_cost > 0.0 {
            let percentage = ((no_cse_cost * 100.0) / yes_cse_cost).min(100.0) as u32;
            if percentage > 0 && self.rng.next(100) < percentage {
                result = true;
            }
        }
        (result, bucket)
    }

    /// Each promoted temp that lives across a call crowds the registers a
    /// little more; raise the cutoffs as we go.
    fn adjust_after(&mut self, pass: &CsePass, dsc_id: usize) {
        let dsc = &pass.dscs[dsc_id];
        let cse_ref_cnt = (dsc.def_count * 2 + dsc.use_count) as f64;
        if dsc.live_across_call {
            let incr = BB_UNITY_WEIGHT;
            if cse_ref_cnt > self.aggressive_ref_cnt {
                self.aggressive_ref_cnt += incr;
            }
            if cse_ref_cnt > self.moderate_ref_cnt {
                self.moderate_ref_cnt += incr / 2.0;
            }
        }
    }

    pub fn consider_candidates(
        &mut self,
        pass: &mut CsePass,
        proc: &mut Proc,
        vn: &mut VnStore,
        cfg: &CseConfig,
    ) {
        for slot in 0..pass.sort_tab.len() {
            let Some(dsc_id) = pass.sort_tab[slot] else {
                continue;
            };
            let attempt = pass.attempt;
            pass.attempt += 1;

            if !pass.dscs[dsc_id].is_viable() {
                continue;
            }

            let (mut do_cse, _bucket) = self.promotion_check(pass, proc, dsc_id, cfg.stress);

            // Bisection mask over the first 32 attempts.
            if let Some(mask) = cfg.cse_mask {
                if attempt >= 32 {
                    do_cse = false;
                } else {
                    do_cse = (mask >> attempt) & 1 != 0;
                }
            }

            if do_cse {
                self.adjust_after(pass, dsc_id);
                rewrite::perform_cse(pass, proc, vn, dsc_id);
            }
        }
    }
}
