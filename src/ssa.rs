//! Incremental SSA for CSE temps.
//!
//! The rewriter registers every store it creates, finalizes, and then asks
//! for the reaching definition of each load it creates. Single-def temps are
//! trivially in SSA. Multi-def temps resolve uses through a dominator walk;
//! a use first reached at a join (a phi value) gets no recorded def and the
//! caller assigns it a fresh conservative number. Shapes the builder cannot
//! handle make `finalize_defs` report failure and the pass skips SSA
//! insertion entirely.

use crate::ir::def::{BlockId, ExprId, LclId, Proc};
use crate::vn::VnPair;
use rustc_hash::{FxHashMap, FxHashSet};

const MAX_SSA_DEFS: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct UseDefLoc {
    pub block: BlockId,
    pub stmt: usize,
    pub expr: ExprId,
}

pub struct IncrementalSsaBuilder {
    lcl: LclId,
    defs: Vec<(UseDefLoc, VnPair)>,
    doms: Option<FxHashMap<BlockId, FxHashSet<BlockId>>>,
    finalized: bool,
}

impl IncrementalSsaBuilder {
    pub fn new(lcl: LclId) -> Self {
        Self {
            lcl,
            defs: Vec::new(),
            doms: None,
            finalized: false,
        }
    }

    pub fn lcl(&self) -> LclId {
        self.lcl
    }

    pub fn insert_def(&mut self, loc: UseDefLoc, value_vnp: VnPair) {
        debug_assert!(!self.finalized);
        self.defs.push((loc, value_vnp));
    }

    /// Returns true when uses can be resolved against the recorded defs.
    pub fn finalize_defs(&mut self, proc: &Proc) -> bool {
        if self.defs.is_empty() || self.defs.len() > MAX_SSA_DEFS {
            return false;
        }
        if self.defs.len() > 1 {
            let reachable = compute_reachable(proc);
            if self.defs.iter().any(|(loc, _)| !reachable.contains(&loc.block)) {
                return false;
            }
            self.doms = Some(compute_dominators(proc, &reachable));
        }
        self.finalized = true;
        true
    }

    fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        match &self.doms {
            Some(doms) => doms.get(&b).is_some_and(|set| set.contains(&a)),
            None => true,
        }
    }

    /// Reaching definition for a use, or None when the use is phi-valued.
    pub fn insert_use(&self, loc: UseDefLoc) -> Option<VnPair> {
        debug_assert!(self.finalized);
        if self.defs.len() == 1 {
            return Some(self.defs[0].1);
        }

        let mut best: Option<&(UseDefLoc, VnPair)> = None;
        for cand in &self.defs {
            let (dloc, _) = cand;
            let reaches = if dloc.block == loc.block {
                dloc.stmt <= loc.stmt
            } else {
                self.dominates(dloc.block, loc.block)
            };
            if !reaches {
                continue;
            }
            best = match best {
                None => Some(cand),
                Some(prev) => {
                    let (ploc, _) = prev;
                    // Dominating defs of a point are totally ordered; the
                    // nearer one is dominated by the farther one.
                    let cand_nearer = if dloc.block == ploc.block {
                        dloc.stmt > ploc.stmt
                    } else if dloc.block == loc.block {
                        true
                    } else if ploc.block == loc.block {
                        false
                    } else {
                        self.dominates(ploc.block, dloc.block)
                    };
                    Some(if cand_nearer { cand } else { prev })
                }
            };
        }
        best.map(|(_, vnp)| *vnp)
    }
}

fn compute_reachable(proc: &Proc) -> FxHashSet<BlockId> {
    let mut reachable = FxHashSet::default();
    let mut queue = vec![proc.entry];
    reachable.insert(proc.entry);

    let mut head = 0;
    while head < queue.len() {
        let bid = queue[head];
        head += 1;
        for &s in &proc.blocks[bid].succs {
            if reachable.insert(s) {
                queue.push(s);
            }
        }
    }
    reachable
}

fn compute_dominators(
    proc: &Proc,
    reachable: &FxHashSet<BlockId>,
) -> FxHashMap<BlockId, FxHashSet<BlockId>> {
    let all_blocks: FxHashSet<BlockId> = reachable.iter().cloned().collect();
    let mut doms: FxHashMap<BlockId, FxHashSet<BlockId>> = FxHashMap::default();

    doms.insert(proc.entry, std::iter::once(proc.entry).collect());
    for &b in &all_blocks {
        if b != proc.entry {
            doms.insert(b, all_blocks.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &bb in &all_blocks {
            if bb == proc.entry {
                continue;
            }
            let pred_list = proc.blocks[bb].preds.clone();
            if pred_list.is_empty() {
                continue;
            }

            let mut new_dom: Option<FxHashSet<BlockId>> = None;
            for p in pred_list {
                if !reachable.contains(&p) {
                    continue;
                }
                if let Some(p_dom) = doms.get(&p) {
                    match new_dom {
                        None => new_dom = Some(p_dom.clone()),
                        Some(ref mut set) => set.retain(|x| p_dom.contains(x)),
                    }
                }
            }

            if let Some(mut set) = new_dom {
                set.insert(bb);
                if set != *doms.get(&bb).unwrap() {
                    doms.insert(bb, set);
                    changed = true;
                }
            }
        }
    }

    doms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::def::{ExprKind, Proc, Ty};
    use crate::vn::VnPair;

    fn diamond() -> Proc {
        // B0 -> B1, B0 -> B2, B1 -> B3, B2 -> B3
        let mut p = Proc::new("d");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        let b2 = p.add_block(1.0);
        let b3 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        p.link(b0, b2);
        p.link(b1, b3);
        p.link(b2, b3);
        for b in 0..4 {
            let ret = p.add_expr(ExprKind::Ret { value: None }, Ty::Void);
            p.add_stmt(b, ret);
        }
        p
    }

    fn loc(block: BlockId, stmt: usize) -> UseDefLoc {
        UseDefLoc { block, stmt, expr: 0 }
    }

    #[test]
    fn single_def_reaches_every_use() {
        let p = diamond();
        let mut ssa = IncrementalSsaBuilder::new(0);
        let vnp = VnPair::both(42);
        ssa.insert_def(loc(0, 0), vnp);
        assert!(ssa.finalize_defs(&p));
        assert_eq!(ssa.insert_use(loc(3, 0)), Some(vnp));
    }

    #[test]
    fn nearest_dominating_def_wins() {
        let p = diamond();
        let mut ssa = IncrementalSsaBuilder::new(0);
        let top = VnPair::both(1);
        let near = VnPair::both(2);
        ssa.insert_def(loc(0, 0), top);
        ssa.insert_def(loc(1, 0), near);
        assert!(ssa.finalize_defs(&p));
        assert_eq!(ssa.insert_use(loc(1, 1)), Some(near));
        // B3 is only dominated by B0; the B1 def does not reach it alone.
        assert_eq!(ssa.insert_use(loc(3, 0)), Some(top));
        // B2 sees the entry def.
        assert_eq!(ssa.insert_use(loc(2, 0)), Some(top));
    }

    #[test]
    fn join_reached_use_is_phi_valued() {
        let p = diamond();
        let mut ssa = IncrementalSsaBuilder::new(0);
        ssa.insert_def(loc(1, 0), VnPair::both(1));
        ssa.insert_def(loc(2, 0), VnPair::both(2));
        assert!(ssa.finalize_defs(&p));
        assert_eq!(ssa.insert_use(loc(3, 0)), None);
    }

    #[test]
    fn no_defs_fails_finalize() {
        let p = diamond();
        let mut ssa = IncrementalSsaBuilder::new(0);
        assert!(!ssa.finalize_defs(&p));
    }
}
