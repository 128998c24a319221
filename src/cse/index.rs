//! Candidate discovery: walk every statement, key eligible expressions by
//! normalized liberal value number, and collect duplicate occurrences into a
//! dense candidate table.

use crate::cse::heur::Policy;
use crate::cse::{CseDsc, CsePass, Occ, MAX_CSE_CNT};
use crate::ir::def::{CseMark, ExprKind, Proc};
use crate::vn::{VnStore, NO_VN};

/// Initial bucket count: twice the candidate-set width.
pub const HASH_SIZE_INITIAL: usize = super::EXPSET_SZ * 2;
const HASH_GROWTH_FACTOR: usize = 2;
/// Target chain occupancy; the table grows past `size * bucket size`.
pub const HASH_BUCKET_SIZE: usize = 4;

/// Shared-constant keys shift out the low bits of the constant and set a
/// reserved high bit so they can never collide with a value number.
const SHARED_CONST_KEY_BIT: u64 = 1 << 63;
const SHARED_CONST_SHIFT: u32 = 12;

pub fn encode_shared_const(val: i64) -> u64 {
    ((val as u64) >> SHARED_CONST_SHIFT) | SHARED_CONST_KEY_BIT
}

pub fn decode_shared_const(key: u64) -> i64 {
    ((key & !SHARED_CONST_KEY_BIT) << SHARED_CONST_SHIFT) as i64
}

pub fn is_shared_const_key(key: u64) -> bool {
    key & SHARED_CONST_KEY_BIT != 0
}

fn key_to_bucket(key: u64, size: usize) -> usize {
    let mut hash = key as u32 ^ (key >> 32) as u32;
    hash = hash.wrapping_mul((size as u32).wrapping_add(1));
    hash >>= 7;
    hash as usize % size
}

/// Walk the procedure and build the candidate table. Returns false when no
/// expression occurred twice (nothing for the rest of the pass to do).
pub fn locate(
    pass: &mut CsePass,
    proc: &mut Proc,
    vn: &VnStore,
    policy: &Policy,
) -> bool {
    for bid in 0..proc.blocks.len() {
        for sidx in 0..proc.blocks[bid].stmts.len() {
            let root = proc.blocks[bid].stmts[sidx].root;
            let is_return = matches!(proc.expr(root).kind, ExprKind::Ret { .. });
            for id in proc.eval_order(root) {
                if !policy.consider_tree(pass, proc, vn, id, is_return) {
                    continue;
                }
                index_expr(pass, proc, vn, Occ { block: bid, stmt: sidx, expr: id });
            }
        }
    }

    if !pass.do_cse {
        return false;
    }
    build_table(pass);
    true
}

/// Returns the candidate index now tagged on the expression, or 0.
fn index_expr(pass: &mut CsePass, proc: &mut Proc, vn: &VnStore, occ: Occ) -> u8 {
    let id = occ.expr;
    let vn_lib = proc.expr(id).vnp.liberal;
    let vn_lib_norm = vn.normalize(vn_lib);
    let enable_shared = pass.shared_const_cse;
    let mut is_shared_const = false;

    // Candidates normally key on the normalized liberal number so that all
    // expressions computing the same value can join, whatever their
    // exception sets; promotion reconciles the sets later. A comma whose
    // number differs from its value child produced extra exceptions in its
    // first operand; keying on the full number lets the comma and its value
    // be separate candidates. Struct commas stay merged: sinking a store
    // below a struct comma would break a nested comma def.
    let key: u64;
    if let ExprKind::Comma { value, .. } = proc.expr(id).kind {
        if !proc.expr(id).ty.is_struct() && proc.expr(value).vnp.liberal != vn_lib {
            key = vn_lib as u64;
        } else {
            key = vn_lib_norm as u64;
        }
    } else if enable_shared && proc.expr(id).is_integral_const() {
        debug_assert!(vn.is_constant(vn_lib_norm));
        let const_val = vn.coerce_i64(vn_lib_norm);
        key = encode_shared_const(const_val);
        is_shared_const = true;
    } else {
        key = vn_lib_norm as u64;
    }

    debug_assert_eq!(is_shared_const, is_shared_const_key(key));

    let bucket = key_to_bucket(key, pass.hash_size);
    let mut found: Option<usize> = None;
    for &dsc_id in &pass.buckets[bucket] {
        if pass.dscs[dsc_id].hash_key != key {
            continue;
        }
        // Integral constants of different node types stay separate.
        let first = pass.dscs[dsc_id].occs[0].expr;
        if proc.expr(id).is_integral_const() && proc.expr(id).ty != proc.expr(first).ty {
            continue;
        }
        found = Some(dsc_id);
        break;
    }

    let Some(dsc_id) = found else {
        // First sighting of this key. Beyond the candidate limit new keys
        // are not even recorded.
        if pass.candidate_count < MAX_CSE_CNT {
            if pass.hash_count == pass.hash_max_count_before_resize {
                grow_table(pass);
            }
            pass.hash_count += 1;
            let dsc = CseDsc::new(key, occ, pass.empty_exc);
            let dsc_id = pass.dscs.len();
            pass.dscs.push(dsc);
            let bucket = key_to_bucket(key, pass.hash_size);
            pass.buckets[bucket].push(dsc_id);
        }
        return 0;
    };

    if pass.dscs[dsc_id].occs.len() == 1 {
        // Second sighting. If the first occurrence dominates this one in
        // the same block but raises strictly fewer exceptions, it could
        // never be a valid def for this one; let the richer occurrence
        // lead the list instead.
        let first = pass.dscs[dsc_id].occs[0];
        if occ.block == first.block {
            let prev_vn_lib = proc.expr(first.expr).vnp.liberal;
            if prev_vn_lib != vn_lib {
                let prev_exc = vn.exception_set(prev_vn_lib);
                let cur_exc = vn.exception_set(vn_lib);
                if prev_exc != cur_exc && vn.exc_is_subset(prev_exc, cur_exc) {
                    proc.expr_mut(first.expr).mark = CseMark::None;
                    pass.dscs[dsc_id].occs[0] = occ;
                    let index = pass.dscs[dsc_id].index;
                    if index != 0 {
                        proc.expr_mut(id).mark = CseMark::Cand(index);
                    }
                    return index;
                }
            }
        }
        pass.dscs[dsc_id].is_shared_const = is_shared_const;
    }

    pass.dscs[dsc_id].occs.push(occ);
    pass.do_cse = true;

    let index = pass.dscs[dsc_id].index;
    if index != 0 {
        proc.expr_mut(id).mark = CseMark::Cand(index);
        return index;
    }

    // Matching entry without an index yet: allocate one, unless the table
    // is already full.
    if pass.candidate_count == MAX_CSE_CNT {
        return 0;
    }
    pass.candidate_count += 1;
    let index = pass.candidate_count as u8;
    pass.dscs[dsc_id].index = index;
    let first = pass.dscs[dsc_id].occs[0].expr;
    debug_assert_eq!(proc.expr(first).mark, CseMark::None);
    proc.expr_mut(first).mark = CseMark::Cand(index);
    proc.expr_mut(id).mark = CseMark::Cand(index);
    compute_num_locals(&mut pass.dscs[dsc_id], proc);
    index
}

fn grow_table(pass: &mut CsePass) {
    let new_size = pass.hash_size * HASH_GROWTH_FACTOR;
    let mut new_buckets: Vec<Vec<usize>> = vec![Vec::new(); new_size];
    for chain in &pass.buckets {
        for &dsc_id in chain {
            let b = key_to_bucket(pass.dscs[dsc_id].hash_key, new_size);
            new_buckets[b].push(dsc_id);
        }
    }
    pass.buckets = new_buckets;
    pass.hash_size = new_size;
    pass.hash_max_count_before_resize *= HASH_GROWTH_FACTOR;
}

/// Materialize the dense candidate table so `cse_tab[k-1]` is candidate `k`.
fn build_table(pass: &mut CsePass) {
    pass.cse_tab = vec![usize::MAX; pass.candidate_count];
    for (dsc_id, dsc) in pass.dscs.iter().enumerate() {
        if dsc.index != 0 {
            debug_assert!(dsc.index as usize <= pass.candidate_count);
            pass.cse_tab[dsc.index as usize - 1] = dsc_id;
        }
    }
    debug_assert!(pass.cse_tab.iter().all(|&d| d != usize::MAX));
}

/// Distinct locals and total local reads in the candidate's first tree,
/// capped at eight distinct locals.
fn compute_num_locals(dsc: &mut CseDsc, proc: &Proc) {
    const MAX_LOCALS: usize = 8;
    let mut locals: Vec<(usize, u16)> = Vec::new();
    let mut occurrences: u16 = 0;
    for id in proc.eval_order(dsc.occs[0].expr) {
        let lcl = match proc.expr(id).kind {
            ExprKind::LclLoad(l) => l,
            _ => continue,
        };
        occurrences += 1;
        if let Some(entry) = locals.iter_mut().find(|(n, _)| *n == lcl) {
            entry.1 += 1;
            continue;
        }
        if locals.len() >= MAX_LOCALS {
            break;
        }
        locals.push((lcl, 1));
    }
    dsc.num_distinct_lcls = locals.len() as u16;
    dsc.num_lcl_occs = occurrences;
}

impl CseDsc {
    fn new(key: u64, first: Occ, empty_exc: crate::vn::Vn) -> Self {
        Self {
            index: 0,
            hash_key: key,
            is_shared_const: false,
            occs: vec![first],
            def_count: 0,
            use_count: 0,
            def_wtd: 0.0,
            use_wtd: 0.0,
            live_across_call: false,
            def_exc_current: None,
            def_exc_promise: Some(empty_exc),
            num_distinct_lcls: 0,
            num_lcl_occs: 0,
            const_def_value: 0,
            const_def_vn: NO_VN,
        }
    }
}
