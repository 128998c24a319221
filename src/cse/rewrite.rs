//! IR rewriting for promoted candidates.
//!
//! Every def becomes `comma(store cseN = expr, cseN)`, every use becomes a
//! read of the temp (with `cseN + delta` for shared constants). Side
//! effects buried under a replaced use are extracted into a sequenced
//! chain: nested CSE uses are unmarked, nested CSE defs are preserved.
//! Stores and loads are registered with the incremental SSA builder, and
//! uses take their conservative number from the reaching def.

use crate::bitset::{BitVec, BitVecSize};
use crate::cse::{CsePass, Occ};
use crate::ir::def::{flags, BinOp, CseMark, ExprId, ExprKind, Proc};
use crate::ssa::{IncrementalSsaBuilder, UseDefLoc};
use crate::vn::{VnPair, VnStore, NO_VN};

/// The ARM-class addressing modes absorb a subtraction of up to 255, so a
/// shared-constant def may sit that far below an occurrence before we
/// prefer re-basing.
const SHARED_CONST_MAX_DEF_DELTA: i64 = -255;

pub fn perform_cse(pass: &mut CsePass, proc: &mut Proc, vn: &mut VnStore, dsc_id: usize) {
    let index = pass.dscs[dsc_id].index;
    let is_shared = pass.dscs[dsc_id].is_shared_const;
    let occs: Vec<Occ> = pass.dscs[dsc_id].occs.clone();

    pass.sequence.push(index);

    let first_expr = occs[0].expr;
    let temp_ty = proc.expr(first_expr).ty.actual();
    let temp = proc.grab_cse_temp(temp_ty, index);
    pass.add_cse_count += 1;

    if pass.verbose {
        println!(
            "performing CSE #{:02} -> {} ({})",
            index,
            proc.lcls[temp].name,
            temp_ty.name()
        );
    }

    // Walk the occurrences once: establish the temp's ref counts, and for
    // shared constants choose the representative whose value keeps every
    // use delta non-negative and every def delta above -255.
    let mut set_ref_cnt = true;
    let mut best_vn = NO_VN;
    let mut best_is_def = false;
    let mut best_const_value: i64 = 0;
    for occ in &occs {
        let e = proc.expr(occ.expr);
        if e.mark.index() != Some(index) {
            continue;
        }
        let curr_vn = vn.normalize(e.vnp.liberal);
        debug_assert_ne!(curr_vn, NO_VN);
        let curr_const = if is_shared { vn.coerce_i64(curr_vn) } else { 0 };
        let is_def = e.mark.is_def();

        if best_vn == NO_VN {
            best_vn = curr_vn;
            if is_shared {
                best_const_value = curr_const;
                best_is_def = is_def;
            }
        } else if curr_vn != best_vn {
            debug_assert!(is_shared);
            let diff = curr_const - best_const_value;
            if (best_is_def && diff < SHARED_CONST_MAX_DEF_DELTA) || (!best_is_def && diff < 0) {
                best_vn = curr_vn;
                best_const_value = curr_const;
                best_is_def = is_def;
            }
        }

        let weight = proc.blocks[occ.block].weight;
        if set_ref_cnt {
            proc.lcls[temp].ref_cnt = 1;
            proc.lcls[temp].ref_cnt_wtd = weight;
            set_ref_cnt = false;
        } else {
            proc.lcls[temp].ref_cnt += 1;
            proc.lcls[temp].ref_cnt_wtd += weight;
        }
        // A def references the temp twice.
        if is_def {
            proc.lcls[temp].ref_cnt += 1;
            proc.lcls[temp].ref_cnt_wtd += weight;
        }
    }
    pass.dscs[dsc_id].const_def_value = best_const_value;
    pass.dscs[dsc_id].const_def_vn = best_vn;

    let mut ssa = IncrementalSsaBuilder::new(temp);
    let mut def_uses: Vec<UseDefLoc> = Vec::new();

    // Defs first.
    for occ in &occs {
        let exp = occ.expr;
        if proc.expr(exp).mark != CseMark::Def(index) {
            continue;
        }
        let exp_vnp = proc.expr(exp).vnp;
        let curr_vn = vn.normalize(exp_vnp.liberal);

        let (val, val_vnp) = if is_shared {
            let delta = vn.coerce_i64(curr_vn) - best_const_value;
            if delta != 0 {
                let c = proc.add_expr(ExprKind::IntCon(best_const_value), temp_ty);
                let vnp = VnPair::both(best_vn);
                proc.expr_mut(c).vnp = vnp;
                (c, vnp)
            } else {
                (exp, exp_vnp)
            }
        } else {
            (exp, exp_vnp)
        };

        let store = proc.add_expr(ExprKind::StoreLcl { lcl: temp, value: val }, crate::ir::def::Ty::Void);
        let val_exc = vn.pair_exception_sets(val_vnp);
        let void_pair = VnPair::both(vn.vn_for_void());
        proc.expr_mut(store).vnp = vn.pair_with_exc(void_pair, val_exc);

        // The store inherits the def position; the original node is no
        // longer tracked.
        proc.expr_mut(store).mark = CseMark::Def(index);
        proc.expr_mut(exp).mark = CseMark::None;

        let cse_lcl = proc.add_expr(ExprKind::LclLoad(temp), temp_ty);
        proc.expr_mut(cse_lcl).vnp = vn.normal_pair(val_vnp);

        let mut cse_use = cse_lcl;
        if is_shared {
            let delta = vn.coerce_i64(curr_vn) - best_const_value;
            if delta != 0 {
                let d = proc.add_expr(ExprKind::IntCon(delta), temp_ty);
                let d_vn = vn.vn_for_int(delta, temp_ty);
                proc.expr_mut(d).vnp = VnPair::both(d_vn);
                let add = proc.add_expr(
                    ExprKind::Binop { op: BinOp::Add, lhs: cse_lcl, rhs: d },
                    temp_ty,
                );
                proc.expr_mut(add).flags |= flags::DONT_CSE;
                proc.expr_mut(add).vnp = VnPair::both(curr_vn);
                cse_use = add;
            }
        }

        let comma_ty = proc.expr(exp).ty.actual();
        let comma = proc.add_expr(ExprKind::Comma { effect: store, value: cse_use }, comma_ty);
        let store_exc = {
            let vnp = proc.expr(store).vnp;
            vn.pair_exception_sets(vnp)
        };
        let use_vnp = proc.expr(cse_use).vnp;
        proc.expr_mut(comma).vnp = vn.pair_with_exc(use_vnp, store_exc);

        replace_cse_node(proc, occ, exp, comma);

        ssa.insert_def(
            UseDefLoc { block: occ.block, stmt: occ.stmt, expr: store },
            proc.expr(cse_lcl).vnp,
        );
        def_uses.push(UseDefLoc { block: occ.block, stmt: occ.stmt, expr: cse_lcl });
    }

    let insert_into_ssa = ssa.finalize_defs(proc);

    // The loads we created at def sites join SSA first.
    if insert_into_ssa {
        for loc in &def_uses {
            insert_use_into_ssa(proc, vn, &ssa, *loc);
        }
    }

    // Now the real uses.
    for occ in &occs {
        let exp = occ.expr;
        if proc.expr(exp).mark != CseMark::Cand(index) {
            continue;
        }
        pass.cur_weight = proc.blocks[occ.block].weight;
        let exp_vnp = proc.expr(exp).vnp;

        let cse_lcl = proc.add_expr(ExprKind::LclLoad(temp), temp_ty);
        let mut cse = cse_lcl;
        if is_shared {
            proc.expr_mut(cse_lcl).vnp = VnPair::both(best_vn);
            let curr_vn = vn.normalize(exp_vnp.liberal);
            let delta = vn.coerce_i64(curr_vn) - best_const_value;
            if delta != 0 {
                let d = proc.add_expr(ExprKind::IntCon(delta), temp_ty);
                let d_vn = vn.vn_for_int(delta, temp_ty);
                proc.expr_mut(d).vnp = VnPair::both(d_vn);
                let add = proc.add_expr(
                    ExprKind::Binop { op: BinOp::Add, lhs: cse_lcl, rhs: d },
                    temp_ty,
                );
                proc.expr_mut(add).flags |= flags::DONT_CSE;
                proc.expr_mut(add).vnp = VnPair::both(curr_vn);
                cse = add;
            }
        } else {
            proc.expr_mut(cse_lcl).vnp = vn.normal_pair(exp_vnp);
        }

        proc.expr_mut(exp).mark = CseMark::None;

        let side_eff = extract_side_effects_for_cse(pass, proc, vn, exp);
        let mut side_exc = (NO_VN, NO_VN);
        if let Some(se) = side_eff {
            let se_vnp = proc.expr(se).vnp;
            side_exc = vn.pair_exception_sets(se_vnp);
            let comma_ty = proc.expr(exp).ty.actual();
            let inner_vnp = proc.expr(cse).vnp;
            let comma = proc.add_expr(ExprKind::Comma { effect: se, value: cse }, comma_ty);
            proc.expr_mut(comma).vnp = vn.pair_with_exc(inner_vnp, side_exc);
            cse = comma;
        }

        replace_cse_node(proc, occ, exp, cse);

        if insert_into_ssa {
            let changed = insert_use_into_ssa(
                proc,
                vn,
                &ssa,
                UseDefLoc { block: occ.block, stmt: occ.stmt, expr: cse_lcl },
            );
            // A new reaching def means the comma above holds a stale pair.
            if changed && side_eff.is_some() {
                debug_assert!(!is_shared);
                let lcl_vnp = proc.expr(cse_lcl).vnp;
                let fixed = vn.pair_with_exc(lcl_vnp, side_exc);
                proc.expr_mut(cse).vnp = fixed;
            }
        }
    }

    pass.made_changes = true;
}

/// Update a load's pair from its reaching def. Returns true if it changed.
/// A join-reached (phi-valued) load keeps its liberal number and takes a
/// fresh conservative one.
fn insert_use_into_ssa(
    proc: &mut Proc,
    vn: &mut VnStore,
    ssa: &IncrementalSsaBuilder,
    loc: UseDefLoc,
) -> bool {
    let old = proc.expr(loc.expr).vnp;
    let new = match ssa.insert_use(loc) {
        Some(def_pair) => def_pair,
        None => VnPair::new(old.liberal, vn.unique()),
    };
    if new.conservative != old.conservative
        && vn.is_vn_checked_bound(old.conservative)
        && !vn.is_constant(new.conservative)
    {
        // Keep assertion propagation interested in the renamed number.
        vn.set_vn_is_checked_bound(new.conservative);
    }
    proc.expr_mut(loc.expr).vnp = new;
    new != old
}

/// Swap the statement's link to `exp` over to `new_node`.
fn replace_cse_node(proc: &mut Proc, occ: &Occ, exp: ExprId, new_node: ExprId) {
    let root = proc.blocks[occ.block].stmts[occ.stmt].root;
    if root == exp {
        proc.blocks[occ.block].stmts[occ.stmt].root = new_node;
        proc.refresh_costs(new_node);
        return;
    }
    let mut parent = None;
    for id in proc.eval_order(root) {
        if id != exp && proc.children(id).contains(&exp) {
            parent = Some(id);
            break;
        }
    }
    let parent = parent.expect("replaced node has no parent link in its statement");
    let patched = proc.replace_child(parent, exp, new_node);
    debug_assert!(patched);
    proc.refresh_costs(root);
}

/// Collect the side effects of a replaced use into a sequenced chain.
/// Nested CSE uses are unmarked; nested CSE defs and nodes with persistent
/// side effects are preserved in evaluation order.
pub fn extract_side_effects_for_cse(
    pass: &mut CsePass,
    proc: &mut Proc,
    vn: &mut VnStore,
    root: ExprId,
) -> Option<ExprId> {
    let mut result: Option<ExprId> = None;
    walk_extract(pass, proc, vn, root, &mut result);
    result
}

fn walk_extract(
    pass: &mut CsePass,
    proc: &mut Proc,
    vn: &mut VnStore,
    id: ExprId,
    result: &mut Option<ExprId>,
) {
    if proc.node_has_persistent_effects(id) {
        append_side_effect(proc, vn, id, result);
        return;
    }
    if !unmark_cse(pass, proc, id) {
        // A nested def must happen; keep the whole subtree.
        debug_assert!(proc.expr(id).mark.is_def());
        append_side_effect(proc, vn, id, result);
        return;
    }
    for c in proc.children(id) {
        walk_extract(pass, proc, vn, c, result);
    }
}

fn append_side_effect(proc: &mut Proc, vn: &mut VnStore, node: ExprId, result: &mut Option<ExprId>) {
    match *result {
        None => *result = Some(node),
        Some(prev) => {
            let comma = proc.add_expr(
                ExprKind::Comma { effect: prev, value: node },
                crate::ir::def::Ty::Void,
            );
            let prev_vnp = proc.expr(prev).vnp;
            let node_vnp = proc.expr(node).vnp;
            if prev_vnp.both_defined() && node_vnp.both_defined() {
                let prev_exc = vn.pair_exception_sets(prev_vnp);
                proc.expr_mut(comma).vnp = vn.pair_with_exc(node_vnp, prev_exc);
            }
            *result = Some(comma);
        }
    }
}

/// Revert a node's CSE classification. Returns false for defs, which the
/// caller must preserve instead of removing.
pub fn unmark_cse(pass: &mut CsePass, proc: &mut Proc, id: ExprId) -> bool {
    match proc.expr(id).mark {
        CseMark::None => true,
        CseMark::Cand(k) => {
            let dsc = &mut pass.dscs[pass.cse_tab[k as usize - 1]];
            debug_assert!(dsc.use_count > 0);
            if dsc.use_count > 0 {
                dsc.use_count -= 1;
                if dsc.use_wtd < pass.cur_weight {
                    dsc.use_wtd = 0.0;
                } else {
                    dsc.use_wtd -= pass.cur_weight;
                }
            }
            proc.expr_mut(id).mark = CseMark::None;
            pass.unmarks += 1;
            true
        }
        CseMark::Def(_) => false,
    }
}

/// Def/use bit masks over a subtree, indexed by candidate number - 1.
pub fn get_mask_data(pass: &CsePass, proc: &Proc, root: ExprId) -> (BitVec, BitVec) {
    let size = BitVecSize(pass.candidate_count.max(1));
    let mut def_mask = BitVec::empty(size);
    let mut use_mask = BitVec::empty(size);
    for id in proc.eval_order(root) {
        match proc.expr(id).mark {
            CseMark::Def(k) => def_mask.add(k as usize - 1),
            CseMark::Cand(k) => use_mask.add(k as usize - 1),
            CseMark::None => {}
        }
    }
    (def_mask, use_mask)
}

/// True iff the evaluation order of two subtrees can be exchanged without
/// moving a CSE def across one of its uses. `op1` evaluates before `op2`.
pub fn can_swap(pass: &CsePass, proc: &Proc, op1: ExprId, op2: ExprId) -> bool {
    let (def1, use1) = get_mask_data(pass, proc, op1);
    let (def2, use2) = get_mask_data(pass, proc, op2);
    !def1.intersects(&use2) && !def2.intersects(&use1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cse::config::CseConfig;
    use crate::cse::heur::Policy;
    use crate::cse::{dataflow, index, label};
    use crate::ir::def::{Callee, Ty};
    use crate::ir::verify::verify_proc;

    fn prepare(p: &mut Proc) -> (CsePass, VnStore) {
        let cfg = CseConfig::default();
        let mut vn = VnStore::new();
        vn.number_proc(p);
        let mut pass = CsePass::new(&cfg, &vn);
        let policy = Policy::from_config(&cfg, &p.name);
        assert!(index::locate(&mut pass, p, &vn, &policy));
        dataflow::init(&mut pass, p);
        dataflow::solve(&mut pass, p);
        label::availability(&mut pass, p, &mut vn);
        (pass, vn)
    }

    fn count_kind(p: &Proc, f: impl Fn(&ExprKind) -> bool) -> usize {
        let mut n = 0;
        for b in &p.blocks {
            for s in &b.stmts {
                for id in p.eval_order(s.root) {
                    if f(&p.expr(id).kind) {
                        n += 1;
                    }
                }
            }
        }
        n
    }

    #[test]
    fn def_and_use_rewrite_to_store_and_load() {
        let mut p = Proc::new("s1");
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

        let (mut pass, mut vn) = prepare(&mut p);
        let dsc_id = pass.cse_tab[0];
        perform_cse(&mut pass, &mut p, &mut vn, dsc_id);

        assert!(pass.made_changes);
        // One store to the temp, two temp reads (one at the def comma, one
        // at the use), and the original load count unchanged at one.
        let temp = p.lcls.iter().position(|d| d.is_cse_temp).expect("no temp");
        let stores = count_kind(&p, |k| matches!(k, ExprKind::StoreLcl { lcl, .. } if *lcl == temp));
        let loads = count_kind(&p, |k| matches!(k, ExprKind::LclLoad(l) if *l == temp));
        let inds = count_kind(&p, |k| matches!(k, ExprKind::Ind { .. }));
        assert_eq!(stores, 1);
        assert_eq!(loads, 2);
        assert_eq!(inds, 1, "the use site must not re-evaluate the load");
        assert!(verify_proc(&p).is_ok());

        // The def site became comma(store, load) preserving the original
        // number and exception set.
        let root = p.blocks[b0].stmts[0].root;
        let ExprKind::Ret { value: Some(vroot) } = p.expr(root).kind else {
            panic!("expected ret root");
        };
        let ExprKind::Comma { effect, value } = p.expr(vroot).kind else {
            panic!("def site is not a comma");
        };
        assert!(matches!(p.expr(effect).kind, ExprKind::StoreLcl { .. }));
        assert!(matches!(p.expr(value).kind, ExprKind::LclLoad(_)));
    }

    #[test]
    fn shared_const_uses_rebase_with_a_delta() {
        let mut p = Proc::new("s4");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        let x = p.add_lcl("x", Ty::Long);
        let y = p.add_lcl("y", Ty::Long);
        for (b, lcl, v) in [(b0, x, 0x1000i64), (b1, y, 0x1010)] {
            let c = p.add_expr(ExprKind::IntCon(v), Ty::Long);
            let st = p.add_expr(ExprKind::StoreLcl { lcl, value: c }, Ty::Void);
            p.add_stmt(b, st);
        }

        let (mut pass, mut vn) = prepare(&mut p);
        let dsc_id = pass.cse_tab[0];
        assert!(pass.dscs[dsc_id].is_shared_const);
        perform_cse(&mut pass, &mut p, &mut vn, dsc_id);

        assert_eq!(pass.dscs[dsc_id].const_def_value, 0x1000);
        // The use site computes temp + 0x10.
        let use_root = p.blocks[b1].stmts[0].root;
        let ExprKind::StoreLcl { value, .. } = p.expr(use_root).kind else {
            panic!("expected store root");
        };
        let ExprKind::Binop { op: BinOp::Add, lhs, rhs } = p.expr(value).kind else {
            panic!("expected temp + delta, got {:?}", p.expr(value).kind);
        };
        assert!(matches!(p.expr(lhs).kind, ExprKind::LclLoad(_)));
        assert!(matches!(p.expr(rhs).kind, ExprKind::IntCon(0x10)));
        assert!(p.expr(value).has_flag(flags::DONT_CSE));
        assert!(verify_proc(&p).is_ok());
    }

    #[test]
    fn shared_const_def_never_rebases_below_neg_255() {
        // First occurrence (the def) is 0x1fff; the use at 0x1000 in the
        // same bucket sits far more than 255 below it, so the
        // representative must move to keep the def delta in range.
        let mut p = Proc::new("rebase");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let t = p.add_lcl("t", Ty::Long);
        for v in [0x1fffi64, 0x1000] {
            let c = p.add_expr(ExprKind::IntCon(v), Ty::Long);
            let st = p.add_expr(ExprKind::StoreLcl { lcl: t, value: c }, Ty::Void);
            p.add_stmt(b0, st);
        }
        let (mut pass, mut vn) = prepare(&mut p);
        let dsc_id = pass.cse_tab[0];
        perform_cse(&mut pass, &mut p, &mut vn, dsc_id);
        assert_eq!(pass.dscs[dsc_id].const_def_value, 0x1000);
        // No use delta is negative afterwards.
        for b in &p.blocks {
            for s in &b.stmts {
                for id in p.eval_order(s.root) {
                    if let ExprKind::Binop { op: BinOp::Add, rhs, .. } = p.expr(id).kind {
                        if let ExprKind::IntCon(d) = p.expr(rhs).kind {
                            assert!(d >= 0, "negative use delta {d}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn side_effect_extraction_preserves_calls_and_nested_defs() {
        // A replaced tree holding a user call and a nested CSE def yields
        // a left-to-right sequenced chain of both.
        let mut p = Proc::new("sideeff");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let pp = p.add_lcl("p", Ty::Long);

        // Two plain (ind p) statements make candidate 1.
        let mut inds = Vec::new();
        for _ in 0..2 {
            let a = p.add_expr(ExprKind::LclLoad(pp), Ty::Long);
            let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
            let ret = p.add_expr(ExprKind::Ret { value: Some(ind) }, Ty::Void);
            p.add_stmt(b0, ret);
            inds.push(ind);
        }

        let (mut pass, mut vn) = prepare(&mut p);
        assert_eq!(pass.candidate_count, 1);

        // Build a detached tree (add (cast int (calluser g)) (ind p)) and
        // force the inner load into def position for the walk.
        let call = p.add_expr(
            ExprKind::Call {
                callee: Callee::User("g".to_string()),
                args: vec![],
                is_async: false,
            },
            Ty::Long,
        );
        let call_i = p.add_expr(ExprKind::Cast { src: call, to: Ty::Int }, Ty::Int);
        let a = p.add_expr(ExprKind::LclLoad(pp), Ty::Long);
        let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
        p.expr_mut(ind).mark = CseMark::Def(1);
        let add = p.add_expr(ExprKind::Binop { op: BinOp::Add, lhs: call_i, rhs: ind }, Ty::Int);

        pass.cur_weight = 1.0;
        let se = extract_side_effects_for_cse(&mut pass, &mut p, &mut vn, add)
            .expect("side effects were dropped");
        let ExprKind::Comma { effect, value } = &p.expr(se).kind else {
            panic!("expected a sequenced chain, got {:?}", p.expr(se).kind);
        };
        assert_eq!(*effect, call, "call must run first");
        assert_eq!(*value, ind, "nested def must be preserved after it");
        assert!(p.expr(se).ty.is_void());
        let _ = inds;
    }

    #[test]
    fn nested_use_inside_replaced_tree_is_unmarked() {
        // Candidate A = (ind p); candidate B = (add (ind p) (lcl q)). When
        // B's use is rewritten, the nested A use inside it is unmarked and
        // A's use count drops.
        let mut p = Proc::new("nested");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let pp = p.add_lcl("p", Ty::Long);
        let q = p.add_lcl("q", Ty::Int);
        let t = p.add_lcl("t", Ty::Int);

        let mut adds = Vec::new();
        for _ in 0..2 {
            let a = p.add_expr(ExprKind::LclLoad(pp), Ty::Long);
            let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
            let lq = p.add_expr(ExprKind::LclLoad(q), Ty::Int);
            let add = p.add_expr(ExprKind::Binop { op: BinOp::Add, lhs: ind, rhs: lq }, Ty::Int);
            let st = p.add_expr(ExprKind::StoreLcl { lcl: t, value: add }, Ty::Void);
            p.add_stmt(b0, st);
            adds.push(add);
        }

        let (mut pass, mut vn) = prepare(&mut p);
        // Two candidates: the ind and the add.
        assert_eq!(pass.candidate_count, 2);
        let add_dsc = (0..pass.candidate_count)
            .map(|i| pass.cse_tab[i])
            .find(|&d| pass.dscs[d].occs.iter().any(|o| adds.contains(&o.expr)))
            .expect("no add candidate");
        let ind_dsc = (0..pass.candidate_count)
            .map(|i| pass.cse_tab[i])
            .find(|&d| d != add_dsc)
            .unwrap();
        let ind_uses_before = pass.dscs[ind_dsc].use_count;
        assert_eq!(ind_uses_before, 1);

        perform_cse(&mut pass, &mut p, &mut vn, add_dsc);
        assert_eq!(pass.dscs[ind_dsc].use_count, 0, "nested use not unmarked");
        assert!(pass.unmarks > 0);
        assert!(verify_proc(&p).is_ok());
    }

    #[test]
    fn can_swap_refuses_def_use_reordering() {
        let mut p = Proc::new("swap");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let l = p.add_lcl("p", Ty::Long);
        let mut inds = Vec::new();
        for _ in 0..2 {
            let a = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
            let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
            let ret = p.add_expr(ExprKind::Ret { value: Some(ind) }, Ty::Void);
            p.add_stmt(b0, ret);
            inds.push(ind);
        }
        let (pass, _vn) = prepare(&mut p);
        // inds[0] is the def, inds[1] the use.
        assert!(!can_swap(&pass, &p, inds[0], inds[1]));
        assert!(!can_swap(&pass, &p, inds[1], inds[0]));
        // Two unrelated constants can swap.
        let mut p2 = Proc::new("swap2");
        let b = p2.add_block(1.0);
        p2.entry = b;
        let c1 = p2.add_expr(ExprKind::IntCon(1), Ty::Int);
        let c2 = p2.add_expr(ExprKind::IntCon(2), Ty::Int);
        assert!(can_swap(&pass, &p2, c1, c2));
    }

    #[test]
    fn multi_def_join_uses_become_phi_valued() {
        // Diamond with a def in each arm: the join occurrences are uses
        // reached by two defs, so their loads take fresh conservative
        // numbers (phi values).
        let mut p = Proc::new("phi");
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
        let r0 = p.add_expr(ExprKind::Ret { value: None }, Ty::Void);
        p.add_stmt(b0, r0);
        let mut use_ind = 0;
        for b in [b1, b2, b3] {
            let a = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
            let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
            let ret = p.add_expr(ExprKind::Ret { value: Some(ind) }, Ty::Void);
            p.add_stmt(b, ret);
            use_ind = ind;
        }

        let (mut pass, mut vn) = prepare(&mut p);
        let dsc_id = pass.cse_tab[0];
        assert_eq!(pass.dscs[dsc_id].def_count, 2);
        assert_eq!(pass.dscs[dsc_id].use_count, 1);
        let old_pair = p.expr(use_ind).vnp;
        perform_cse(&mut pass, &mut p, &mut vn, dsc_id);
        // The join use was replaced by a load with a fresh conservative
        // number and its liberal number intact.
        let root = p.blocks[b3].stmts[0].root;
        let ExprKind::Ret { value: Some(v) } = p.expr(root).kind else {
            panic!("expected ret");
        };
        assert!(matches!(p.expr(v).kind, ExprKind::LclLoad(_)));
        assert_ne!(p.expr(v).vnp.conservative, old_pair.conservative);
        assert_eq!(
            p.expr(v).vnp.liberal,
            vn.normalize(old_pair.liberal),
            "liberal number survives the phi"
        );
        assert!(verify_proc(&p).is_ok());
    }
}
