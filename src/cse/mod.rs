//! Value-number-based common subexpression elimination.
//!
//! The pass runs in five steps over a value-numbered procedure:
//!
//! 1. discovery: hash every eligible expression by normalized liberal
//!    number and collect duplicated occurrences into candidates
//!    ([`index`]),
//! 2. availability dataflow over two bits per candidate ([`dataflow`]),
//! 3. use/def labeling with exception-set reconciliation ([`label`]),
//! 4. a profitability policy choosing which candidates to promote
//!    ([`heur`]),
//! 5. the rewrite proper, with incremental SSA for the new temps
//!    ([`rewrite`]).

pub mod config;
pub mod dataflow;
pub mod heur;
pub mod index;
pub mod label;
pub mod rewrite;

use crate::bitset::{BitVec, BitVecSize};
use crate::ir::def::{BlockId, CseMark, ExprId, Proc};
use crate::vn::{Vn, VnStore};
use config::CseConfig;
use heur::Policy;

/// Hard cap on indexed candidates; the tag is a small integer.
pub const MAX_CSE_CNT: usize = 64;
/// Width of the candidate set, used to size the initial hash table.
pub const EXPSET_SZ: usize = 64;
/// Expressions cheaper than this never pay for a temp.
pub const MIN_CSE_COST: u8 = 2;
/// Weight of a once-executed block; cutoff arithmetic is relative to it.
pub const BB_UNITY_WEIGHT: f64 = 1.0;

/// Bit positions for candidate `index` (1-based) in the dataflow sets.
pub fn avail_bit(index: u8) -> usize {
    2 * (index as usize - 1)
}

pub fn avail_cross_call_bit(index: u8) -> usize {
    avail_bit(index) + 1
}

/// One sighting of a candidate expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occ {
    pub block: BlockId,
    pub stmt: usize,
    pub expr: ExprId,
}

/// Candidate descriptor. Entries are created for every hashed expression;
/// an `index` is assigned on the second occurrence.
#[derive(Debug, Clone)]
pub struct CseDsc {
    pub index: u8,
    pub hash_key: u64,
    pub is_shared_const: bool,
    pub occs: Vec<Occ>,
    pub def_count: u32,
    pub use_count: u32,
    pub def_wtd: f64,
    pub use_wtd: f64,
    pub live_across_call: bool,
    /// Intersection of liberal exception sets over accepted defs;
    /// None until the first def is seen.
    pub def_exc_current: Option<Vn>,
    /// Union of exception sets promised to accepted uses; None once the
    /// candidate is abandoned.
    pub def_exc_promise: Option<Vn>,
    pub num_distinct_lcls: u16,
    pub num_lcl_occs: u16,
    pub const_def_value: i64,
    pub const_def_vn: Vn,
}

impl CseDsc {
    pub fn is_viable(&self) -> bool {
        self.def_count > 0 && self.use_count > 0 && self.def_exc_promise.is_some()
    }
}

/// Scratch state for one run of the pass.
pub struct CsePass {
    pub dscs: Vec<CseDsc>,
    pub buckets: Vec<Vec<usize>>,
    pub hash_size: usize,
    pub hash_count: usize,
    pub hash_max_count_before_resize: usize,
    pub candidate_count: usize,
    /// Dense table: `cse_tab[k-1]` is the descriptor of candidate `k`.
    pub cse_tab: Vec<usize>,
    /// Policy worklist; a slot goes `None` once its candidate is done.
    pub sort_tab: Vec<Option<usize>>,
    pub do_cse: bool,
    pub made_changes: bool,
    pub attempt: u32,
    pub unmarks: u32,
    pub add_cse_count: u32,
    pub cur_weight: f64,
    pub sequence: Vec<u8>,
    // Dataflow scratch.
    pub bit_size: BitVecSize,
    pub gen: Vec<BitVec>,
    pub cse_in: Vec<BitVec>,
    pub cse_out: Vec<BitVec>,
    pub call_kills: BitVec,
    pub async_kills: BitVec,
    pub block_has_call: Vec<bool>,
    // Config snapshot.
    pub const_cse_enabled: bool,
    pub shared_const_cse: bool,
    pub opt_size: bool,
    pub verbose: bool,
    pub empty_exc: Vn,
}

impl CsePass {
    pub fn new(cfg: &CseConfig, vn: &VnStore) -> Self {
        Self {
            dscs: Vec::new(),
            buckets: vec![Vec::new(); index::HASH_SIZE_INITIAL],
            hash_size: index::HASH_SIZE_INITIAL,
            hash_count: 0,
            hash_max_count_before_resize: index::HASH_SIZE_INITIAL * index::HASH_BUCKET_SIZE,
            candidate_count: 0,
            cse_tab: Vec::new(),
            sort_tab: Vec::new(),
            do_cse: false,
            made_changes: false,
            attempt: 0,
            unmarks: 0,
            add_cse_count: 0,
            cur_weight: 0.0,
            sequence: Vec::new(),
            bit_size: BitVecSize(1),
            gen: Vec::new(),
            cse_in: Vec::new(),
            cse_out: Vec::new(),
            call_kills: BitVec::empty(BitVecSize(1)),
            async_kills: BitVec::empty(BitVecSize(1)),
            block_has_call: Vec::new(),
            const_cse_enabled: cfg.const_cse.const_cse_enabled(),
            shared_const_cse: cfg.const_cse.shared_const_cse_enabled(),
            opt_size: cfg.opt_size,
            verbose: cfg.verbose,
            empty_exc: vn.empty_exc_set(),
        }
    }
}

/// Run the pass over a value-numbered procedure. Returns true when the IR
/// was changed. A second run over the result finds nothing new.
pub fn optimize(proc: &mut Proc, vn: &mut VnStore, cfg: &CseConfig) -> (bool, Option<String>) {
    if cfg.disable {
        return (false, None);
    }

    let mut policy = Policy::from_config(cfg, &proc.name);
    let mut pass = CsePass::new(cfg, vn);

    if !index::locate(&mut pass, proc, vn, &policy) {
        policy.cleanup(proc);
        return (false, None);
    }

    dataflow::init(&mut pass, proc);
    dataflow::solve(&mut pass, proc);
    label::availability(&mut pass, proc, vn);

    policy.initialize(&mut pass, proc);
    policy.sort_candidates(&mut pass, proc);
    policy.consider_candidates(&mut pass, proc, vn, cfg);

    let metrics = if cfg.metrics {
        Some(policy.metrics_row(&pass, proc, cfg))
    } else {
        None
    };

    let changed = pass.made_changes;
    policy.cleanup(proc);
    (changed, metrics)
}

/// Clear every leftover candidate tag so the pass can run again cleanly.
pub(crate) fn cleanup(proc: &mut Proc) {
    for e in &mut proc.exprs {
        e.mark = CseMark::None;
    }
}
