//! Use/def labeling.
//!
//! With the dataflow solved, walk every block with a scratch availability
//! set seeded from its in-set. An occurrence met while its candidate is
//! available is a use, otherwise a def. Along the way the walk reconciles
//! exception sets: `def_exc_current` narrows to the intersection of all
//! accepted defs' liberal sets, `def_exc_promise` widens to the union of
//! every accepted use's requirements. A def that cannot honor the promise
//! abandons the whole candidate; a use the defs cannot cover is dropped
//! alone.
//!
//! Expressions with the same normal number can still have different
//! exception sets: arithmetic identities fold values away but keep their
//! exceptions, and a value read back out of a local lacks the exceptions of
//! the expression that produced it.

use crate::bitset::BitVec;
use crate::cse::{avail_bit, avail_cross_call_bit, CsePass};
use crate::ir::def::{CseMark, ExprKind, Proc};
use crate::vn::VnStore;

pub fn availability(pass: &mut CsePass, proc: &mut Proc, vn: &mut VnStore) {
    let verbose = pass.verbose;
    let mut available = BitVec::empty(pass.bit_size);

    for bid in 0..proc.blocks.len() {
        available.assign(&pass.cse_in[bid]);
        let weight = proc.blocks[bid].weight;

        for sidx in 0..proc.blocks[bid].stmts.len() {
            let root = proc.blocks[bid].stmts[sidx].root;
            for id in proc.eval_order(root) {
                let mut is_use = false;
                let mut is_def = false;
                let mut def_index: Option<u8> = None;
                // Set when this occurrence was rejected; the call-kill step
                // below is skipped for such nodes.
                let mut dropped = false;

                if let CseMark::Cand(k) = proc.expr(id).mark {
                    let bit_a = avail_bit(k);
                    let bit_c = avail_cross_call_bit(k);
                    let dsc_id = pass.cse_tab[k as usize - 1];

                    is_use = available.contains(bit_a);
                    is_def = !is_use;

                    // A use that is not available across calls forces the
                    // temp to live across one.
                    if is_use
                        && !pass.dscs[dsc_id].live_across_call
                        && !available.contains(bit_c)
                    {
                        pass.dscs[dsc_id].live_across_call = true;
                        if verbose {
                            println!("CSE #{:02} now live across call", k);
                        }
                    }

                    // A def is unavailable here, so it cannot be available
                    // across a call either.
                    if is_def {
                        debug_assert!(!available.contains(bit_c));
                    }

                    if pass.dscs[dsc_id].def_exc_promise.is_none() {
                        // Candidate already abandoned; shed the tag.
                        proc.expr_mut(id).mark = CseMark::None;
                        dropped = true;
                    } else {
                        let liberal_exc = vn.exception_set(proc.expr(id).vnp.liberal);

                        if is_def {
                            match pass.dscs[dsc_id].def_exc_current {
                                None => {
                                    pass.dscs[dsc_id].def_exc_current = Some(liberal_exc);
                                }
                                Some(cur) if cur != liberal_exc => {
                                    // Narrow to what every def can produce.
                                    let inter = vn.exc_intersect(cur, liberal_exc);
                                    debug_assert!(vn.exc_is_subset(inter, cur));
                                    pass.dscs[dsc_id].def_exc_current = Some(inter);
                                }
                                Some(_) => {}
                            }

                            let promise = pass.dscs[dsc_id].def_exc_promise.unwrap();
                            if promise != vn.empty_exc_set()
                                && !vn.exc_is_subset(promise, liberal_exc)
                            {
                                // This def cannot produce what some use was
                                // already promised: give up on the whole
                                // candidate.
                                pass.dscs[dsc_id].def_exc_promise = None;
                                proc.expr_mut(id).mark = CseMark::None;
                                if verbose {
                                    println!(
                                        "CSE #{:02} abandoned: def breaks the use promise",
                                        k
                                    );
                                }
                                dropped = true;
                            } else {
                                pass.dscs[dsc_id].def_count += 1;
                                pass.dscs[dsc_id].def_wtd += weight;
                                proc.expr_mut(id).mark = CseMark::Def(k);
                                def_index = Some(k);
                                available.add(bit_a);
                                available.add(bit_c);
                            }
                        } else {
                            // Use.
                            let mut use_ok = true;
                            if liberal_exc != vn.empty_exc_set() {
                                match pass.dscs[dsc_id].def_exc_current {
                                    None => {
                                        // Use seen before any def on this
                                        // walk (bottom-tested loop): widen
                                        // the promise.
                                        let promise =
                                            pass.dscs[dsc_id].def_exc_promise.unwrap();
                                        pass.dscs[dsc_id].def_exc_promise =
                                            Some(vn.exc_union(promise, liberal_exc));
                                    }
                                    Some(cur) => {
                                        if vn.exc_is_subset(liberal_exc, cur) {
                                            let promise =
                                                pass.dscs[dsc_id].def_exc_promise.unwrap();
                                            pass.dscs[dsc_id].def_exc_promise =
                                                Some(vn.exc_union(promise, liberal_exc));
                                        }
                                    }
                                }
                                let promise = pass.dscs[dsc_id].def_exc_promise.unwrap();
                                if !vn.exc_is_subset(liberal_exc, promise) {
                                    // Only this use is lost; the rest of
                                    // the candidate survives.
                                    proc.expr_mut(id).mark = CseMark::None;
                                    if verbose {
                                        println!(
                                            "CSE #{:02} use dropped: exceptions not promised",
                                            k
                                        );
                                    }
                                    use_ok = false;
                                    dropped = true;
                                }
                            }
                            if use_ok {
                                pass.dscs[dsc_id].use_count += 1;
                                pass.dscs[dsc_id].use_wtd += weight;
                            }
                        }
                    }
                }

                // Calls sever cross-call availability. A call that is
                // itself a CSE use will be replaced by a temp read, so it
                // kills nothing; a call that is a def becomes available
                // again right after the call.
                if !dropped && proc.expr(id).is_call() && !available.is_empty() {
                    if !is_use {
                        available.intersect(&pass.call_kills);
                        if proc.is_async {
                            if let ExprKind::Call { is_async: true, .. } = proc.expr(id).kind
                            {
                                available.intersect(&pass.async_kills);
                            }
                        }
                        if is_def {
                            if let Some(k) = def_index {
                                available.add(avail_cross_call_bit(k));
                            }
                        }
                    }
                }
            }
        }
    }
}
