//! Availability dataflow.
//!
//! Two bits per candidate: `11` available and available across calls, `10`
//! available but killed across calls, `00` unavailable. One extra bit is
//! allocated beyond the candidate bits; `full()` sets it but no gen set ever
//! does, so the first recomputation of every block's out-set registers as a
//! change and all successors get visited at least once.

use crate::bitset::{BitVec, BitVecSize};
use crate::cse::{avail_bit, avail_cross_call_bit, CsePass};
use crate::ir::def::{ExprKind, Proc};

/// Build the per-block gen/in/out sets and the call-kill masks.
pub fn init(pass: &mut CsePass, proc: &Proc) {
    let bit_count = pass.candidate_count * 2 + 1;
    pass.bit_size = BitVecSize(bit_count);

    // A call preserves plain availability and severs cross-call
    // availability: the kill mask has only the avail bits set (…0101).
    pass.call_kills = BitVec::empty(pass.bit_size);
    for inx in 1..=pass.candidate_count as u8 {
        pass.call_kills.add(avail_bit(inx));
    }

    pass.block_has_call = (0..proc.blocks.len())
        .map(|b| proc.block_has_call(b))
        .collect();

    pass.cse_in = Vec::with_capacity(proc.blocks.len());
    pass.cse_out = Vec::with_capacity(proc.blocks.len());
    pass.gen = Vec::with_capacity(proc.blocks.len());
    for (bid, block) in proc.blocks.iter().enumerate() {
        // Nothing reaches the entry; handlers can be entered from anywhere
        // in their protected region, so nothing is available there either.
        let init_to_zero = bid == proc.entry || block.is_handler_entry;
        pass.cse_in.push(if init_to_zero {
            BitVec::empty(pass.bit_size)
        } else {
            BitVec::full(pass.bit_size)
        });
        pass.cse_out.push(BitVec::full(pass.bit_size));
        pass.gen.push(BitVec::empty(pass.bit_size));
    }

    // Every occurrence generates availability in its block. Cross-call
    // availability is granted wholesale for call-free blocks; blocks with
    // calls are refined by the backward scan below.
    for k in 0..pass.candidate_count {
        let dsc = &pass.dscs[pass.cse_tab[k]];
        let index = dsc.index;
        for occ in &dsc.occs {
            pass.gen[occ.block].add(avail_bit(index));
            if !pass.block_has_call[occ.block] {
                pass.gen[occ.block].add(avail_cross_call_bit(index));
            }
        }
    }

    if proc.is_async {
        setup_async_byref_kills(pass, proc);
    }

    // In blocks that contain calls, occurrences after the last call are
    // still available across it: walk backwards from the block end until
    // the first call node is seen.
    for (bid, block) in proc.blocks.iter().enumerate() {
        if !pass.block_has_call[bid] || pass.gen[bid].is_empty() {
            continue;
        }
        'scan: for stmt in block.stmts.iter().rev() {
            for &id in proc.eval_order(stmt.root).iter().rev() {
                if let Some(k) = proc.expr(id).mark.index() {
                    pass.gen[bid].add(avail_cross_call_bit(k));
                }
                if proc.expr(id).is_call() {
                    break 'scan;
                }
            }
        }
    }
}

/// In async procedures a suspension point invalidates by-ref values; clear
/// both bits for by-ref candidates in every block that suspends, then
/// restore plain availability for occurrences after the last async call.
fn setup_async_byref_kills(pass: &mut CsePass, proc: &Proc) {
    pass.async_kills = BitVec::full(pass.bit_size);
    let mut any_kills = false;
    for k in 0..pass.candidate_count {
        let dsc = &pass.dscs[pass.cse_tab[k]];
        let first = dsc.occs[0].expr;
        if proc.expr(first).ty.is_gc_byref() {
            pass.async_kills.remove(avail_bit(dsc.index));
            pass.async_kills.remove(avail_cross_call_bit(dsc.index));
            any_kills = true;
        }
    }
    if !any_kills {
        return;
    }

    for (bid, block) in proc.blocks.iter().enumerate() {
        // Locate the last async call in the block, if any.
        let mut found: Option<(usize, usize)> = None; // (stmt idx, eval position)
        'find: for (sidx, stmt) in block.stmts.iter().enumerate().rev() {
            let order = proc.eval_order(stmt.root);
            for (pos, &id) in order.iter().enumerate().rev() {
                if let ExprKind::Call { is_async: true, .. } = proc.expr(id).kind {
                    found = Some((sidx, pos));
                    break 'find;
                }
            }
        }
        let Some((call_stmt, call_pos)) = found else {
            continue;
        };

        pass.gen[bid].intersect(&pass.async_kills);
        pass.cse_out[bid].intersect(&pass.async_kills);

        // Re-enable availability for candidates evaluated at or after the
        // suspension point.
        for (sidx, stmt) in block.stmts.iter().enumerate().skip(call_stmt) {
            let order = proc.eval_order(stmt.root);
            let start = if sidx == call_stmt { call_pos } else { 0 };
            for &id in &order[start..] {
                if let Some(k) = proc.expr(id).mark.index() {
                    pass.gen[bid].add(avail_bit(k));
                    pass.cse_out[bid].add(avail_bit(k));
                }
            }
        }
    }
}

/// Forward fixed point, meet by intersection. Each sweep snapshots a
/// block's out-set, merges predecessor out-sets into its in-set, applies
/// the call-kill transfer, and loops while any out-set moved.
pub fn solve(pass: &mut CsePass, proc: &Proc) {
    let mut changed = true;
    while changed {
        changed = false;
        for (bid, block) in proc.blocks.iter().enumerate() {
            let pre_merge_out = pass.cse_out[bid].clone();

            // Handlers take no merge; their in-set stays clamped.
            if !block.is_handler_entry {
                for &pred in &block.preds {
                    let pred_out = pass.cse_out[pred].clone();
                    pass.cse_in[bid].intersect(&pred_out);
                }
            }
            if block.no_cse_in {
                pass.cse_in[bid].clear();
            }

            let mut base = pass.cse_in[bid].clone();
            if pass.block_has_call[bid] && !base.is_empty() {
                base.intersect(&pass.call_kills);
            }
            base.union_with(&pass.gen[bid]);
            pass.cse_out[bid] = base;

            if pass.cse_out[bid] != pre_merge_out {
                changed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cse::config::CseConfig;
    use crate::cse::heur::Policy;
    use crate::cse::index;
    use crate::ir::def::{CseMark, ExprId, Ty};
    use crate::vn::VnStore;

    fn add_ind_stmt(p: &mut Proc, block: usize, lcl: usize) -> ExprId {
        let a = p.add_expr(ExprKind::LclLoad(lcl), Ty::Long);
        let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
        let ret = p.add_expr(ExprKind::Ret { value: Some(ind) }, Ty::Void);
        p.add_stmt(block, ret);
        ind
    }

    fn add_call_stmt(p: &mut Proc, block: usize, is_async: bool) {
        let call = p.add_expr(
            ExprKind::Call {
                callee: crate::ir::def::Callee::Helper {
                    name: "f".to_string(),
                    pure_result: false,
                    allocator: false,
                },
                args: vec![],
                is_async,
            },
            Ty::Long,
        );
        p.add_stmt(block, call);
    }

    fn run_locate(p: &mut Proc) -> (CsePass, VnStore) {
        let cfg = CseConfig::default();
        let mut vn = VnStore::new();
        vn.number_proc(p);
        let mut pass = CsePass::new(&cfg, &vn);
        let policy = Policy::from_config(&cfg, &p.name);
        assert!(index::locate(&mut pass, p, &vn, &policy));
        (pass, vn)
    }

    #[test]
    fn straight_line_availability_flows_forward() {
        let mut p = Proc::new("s1");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        let l = p.add_lcl("p", Ty::Long);
        add_ind_stmt(&mut p, b0, l);
        add_ind_stmt(&mut p, b1, l);

        let (mut pass, _vn) = run_locate(&mut p);
        init(&mut pass, &p);
        solve(&mut pass, &p);

        assert!(pass.cse_out[b0].contains(avail_bit(1)));
        assert!(pass.cse_out[b0].contains(avail_cross_call_bit(1)));
        assert!(pass.cse_in[b1].contains(avail_bit(1)));
    }

    #[test]
    fn merge_is_intersection() {
        // Diamond where only one arm generates the candidate: not
        // available at the join.
        let mut p = Proc::new("diamond");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        let b2 = p.add_block(1.0);
        let b3 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        p.link(b0, b2);
        p.link(b1, b3);
        p.link(b2, b3);
        let l = p.add_lcl("p", Ty::Long);
        add_ind_stmt(&mut p, b1, l);
        add_ind_stmt(&mut p, b3, l);

        let (mut pass, _vn) = run_locate(&mut p);
        init(&mut pass, &p);
        solve(&mut pass, &p);

        assert!(pass.cse_out[b1].contains(avail_bit(1)));
        assert!(!pass.cse_in[b3].contains(avail_bit(1)));
        // Post-dataflow in = intersection of predecessor outs.
        for bid in [b1, b2, b3] {
            let mut expect = BitVec::full(pass.bit_size);
            for &pr in &p.blocks[bid].preds {
                expect.intersect(&pass.cse_out[pr]);
            }
            assert_eq!(pass.cse_in[bid], expect, "in/out mismatch at B{bid}");
        }
    }

    #[test]
    fn call_kills_cross_call_bit_only() {
        let mut p = Proc::new("ck");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        let l = p.add_lcl("p", Ty::Long);
        add_ind_stmt(&mut p, b0, l);
        add_call_stmt(&mut p, b0, false);
        add_ind_stmt(&mut p, b1, l);

        let (mut pass, _vn) = run_locate(&mut p);
        init(&mut pass, &p);
        solve(&mut pass, &p);

        // Generated before the call: the cross-call bit is not in gen.
        assert!(pass.gen[b0].contains(avail_bit(1)));
        assert!(!pass.gen[b0].contains(avail_cross_call_bit(1)));
        assert!(pass.cse_in[b1].contains(avail_bit(1)));
        assert!(!pass.cse_in[b1].contains(avail_cross_call_bit(1)));
    }

    #[test]
    fn occurrence_after_last_call_keeps_cross_call_bit() {
        let mut p = Proc::new("after");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        let l = p.add_lcl("p", Ty::Long);
        add_call_stmt(&mut p, b0, false);
        add_ind_stmt(&mut p, b0, l);
        add_ind_stmt(&mut p, b1, l);

        let (mut pass, _vn) = run_locate(&mut p);
        init(&mut pass, &p);
        solve(&mut pass, &p);

        assert!(pass.gen[b0].contains(avail_cross_call_bit(1)));
        assert!(pass.cse_in[b1].contains(avail_cross_call_bit(1)));
    }

    #[test]
    fn handler_entry_is_clamped_to_zero() {
        let mut p = Proc::new("handler");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        p.blocks[b1].is_handler_entry = true;
        let l = p.add_lcl("p", Ty::Long);
        add_ind_stmt(&mut p, b0, l);
        add_ind_stmt(&mut p, b1, l);

        let (mut pass, _vn) = run_locate(&mut p);
        init(&mut pass, &p);
        solve(&mut pass, &p);

        assert!(pass.cse_in[b1].is_empty());
        // The handler still generates availability of its own.
        assert!(pass.cse_out[b1].contains(avail_bit(1)));
    }

    #[test]
    fn async_byref_candidate_is_killed_at_suspension() {
        let mut p = Proc::new("async");
        p.is_async = true;
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        let l = p.add_lcl("p", Ty::Long);
        // By-ref typed loads.
        let a1 = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let i1 = p.add_expr(ExprKind::Ind { addr: a1 }, Ty::Byref);
        let r1 = p.add_expr(ExprKind::Ret { value: Some(i1) }, Ty::Void);
        p.add_stmt(b0, r1);
        add_call_stmt(&mut p, b0, true);
        let a2 = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let i2 = p.add_expr(ExprKind::Ind { addr: a2 }, Ty::Byref);
        let r2 = p.add_expr(ExprKind::Ret { value: Some(i2) }, Ty::Void);
        p.add_stmt(b1, r2);

        let (mut pass, _vn) = run_locate(&mut p);
        init(&mut pass, &p);
        solve(&mut pass, &p);

        // The by-ref value generated before the suspension point does not
        // survive the block.
        assert!(!pass.cse_out[b0].contains(avail_bit(1)));
        assert!(!pass.cse_in[b1].contains(avail_bit(1)));
    }

    #[test]
    fn async_occurrence_after_suspension_survives() {
        let mut p = Proc::new("async2");
        p.is_async = true;
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        let l = p.add_lcl("p", Ty::Long);
        add_call_stmt(&mut p, b0, true);
        let a1 = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let i1 = p.add_expr(ExprKind::Ind { addr: a1 }, Ty::Byref);
        let r1 = p.add_expr(ExprKind::Ret { value: Some(i1) }, Ty::Void);
        p.add_stmt(b0, r1);
        let a2 = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let i2 = p.add_expr(ExprKind::Ind { addr: a2 }, Ty::Byref);
        let r2 = p.add_expr(ExprKind::Ret { value: Some(i2) }, Ty::Void);
        p.add_stmt(b1, r2);

        let (mut pass, _vn) = run_locate(&mut p);
        init(&mut pass, &p);
        solve(&mut pass, &p);

        assert!(pass.cse_out[b0].contains(avail_bit(1)));
        assert!(pass.cse_in[b1].contains(avail_bit(1)));
    }

    #[test]
    fn marks_survive_locate_for_gen_tracking() {
        let mut p = Proc::new("marks");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let l = p.add_lcl("p", Ty::Long);
        let i1 = add_ind_stmt(&mut p, b0, l);
        let i2 = add_ind_stmt(&mut p, b0, l);
        let (pass, _vn) = run_locate(&mut p);
        let _ = pass;
        assert_eq!(p.expr(i1).mark, CseMark::Cand(1));
        assert_eq!(p.expr(i2).mark, CseMark::Cand(1));
    }
}
