//! Replay policy: perform exactly the configured sequence of candidate
//! numbers (1-based; 0 stops), skipping entries that are out of range or
//! not viable. Feeding back the sequence a prior run emitted reproduces
//! its rewritten IR.

use crate::cse::config::CseConfig;
use crate::cse::{rewrite, CsePass};
use crate::ir::def::Proc;
use crate::vn::VnStore;

pub fn consider_candidates(
    pass: &mut CsePass,
    proc: &mut Proc,
    vn: &mut VnStore,
    cfg: &CseConfig,
) {
    let n = pass.candidate_count;
    if n == 0 {
        return;
    }

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
        pass.attempt += 1;
        let dsc_id = pass.cse_tab[index];
        if !pass.dscs[dsc_id].is_viable() {
            if pass.verbose {
                println!("replay skipping CSE #{:02}: not viable", cand_number);
            }
            continue;
        }
        rewrite::perform_cse(pass, proc, vn, dsc_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cse::config::CseConfig;
    use crate::cse::heur::Policy;
    use crate::cse::{dataflow, index, label};
    use crate::ir::def::{ExprKind, Ty};

    fn two_cand_proc() -> Proc {
        let mut p = Proc::new("replay");
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
        p
    }

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

    #[test]
    fn performs_exactly_the_listed_sequence() {
        let mut cfg = CseConfig::default();
        cfg.replay = vec![2, 1];
        let mut p = two_cand_proc();
        let (mut pass, mut vn) = pipeline(&mut p, &cfg);
        consider_candidates(&mut pass, &mut p, &mut vn, &cfg);
        assert_eq!(pass.sequence, vec![2, 1]);
    }

    #[test]
    fn zero_stops_and_bad_indices_are_skipped() {
        let mut cfg = CseConfig::default();
        cfg.replay = vec![7, 1, 0, 2];
        let mut p = two_cand_proc();
        let (mut pass, mut vn) = pipeline(&mut p, &cfg);
        consider_candidates(&mut pass, &mut p, &mut vn, &cfg);
        assert_eq!(pass.sequence, vec![1], "7 is skipped, 0 stops before 2");
    }
}
