//! Value-number store.
//!
//! A full value number is `WithExc(normal, excset)`: the normal half
//! identifies the computed value, the exception half is an interned, sorted
//! set of exception items the expression may raise. Liberal numbers assume
//! the heap is stable (loads intern by address), conservative numbers do not
//! (every load gets a fresh number). The CSE pass keys candidates by
//! normalized liberal numbers and reconciles exception sets separately.

use crate::ir::def::{BinOp, ExprKind, LclId, Proc, RelOp, Ty, UnOp};
use rustc_hash::{FxHashMap, FxHashSet};

pub type Vn = u32;

/// Sentinel: not a value number. Also the "abandoned" marker for a
/// candidate's promised exception set.
pub const NO_VN: Vn = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VnPair {
    pub liberal: Vn,
    pub conservative: Vn,
}

impl VnPair {
    pub fn both(vn: Vn) -> Self {
        Self { liberal: vn, conservative: vn }
    }

    pub fn new(liberal: Vn, conservative: Vn) -> Self {
        Self { liberal, conservative }
    }

    pub fn both_defined(&self) -> bool {
        self.liberal != NO_VN && self.conservative != NO_VN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    NullPtr,
    Bounds,
    DivByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func1Op {
    Ind,
    ArrLen,
    Neg,
    Not,
    Cast(Ty),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func2Op {
    Bin(BinOp),
    Rel(RelOp),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VnData {
    Null,
    Void,
    EmptyExc,
    IntCon { val: i64, ty: Ty },
    DblCon { bits: u64 },
    LclVal { lcl: LclId, version: u32 },
    ExcItem { kind: ExcKind, a: Vn, b: Vn },
    ExcSet(Vec<Vn>),
    WithExc { normal: Vn, exc: Vn },
    Func1 { op: Func1Op, a: Vn },
    Func2 { op: Func2Op, a: Vn, b: Vn },
    CallPure { name: String, args: Vec<Vn> },
    Unique(u32),
}

pub struct VnStore {
    data: Vec<VnData>,
    map: FxHashMap<VnData, Vn>,
    unique_counter: u32,
    checked_bound: FxHashSet<Vn>,
    vn_null: Vn,
    vn_void: Vn,
    vn_empty_exc: Vn,
}

impl Default for VnStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VnStore {
    pub fn new() -> Self {
        let mut store = Self {
            data: Vec::new(),
            map: FxHashMap::default(),
            unique_counter: 0,
            checked_bound: FxHashSet::default(),
            vn_null: NO_VN,
            vn_void: NO_VN,
            vn_empty_exc: NO_VN,
        };
        store.vn_null = store.intern(VnData::Null);
        store.vn_void = store.intern(VnData::Void);
        store.vn_empty_exc = store.intern(VnData::EmptyExc);
        store
    }

    fn intern(&mut self, d: VnData) -> Vn {
        if let Some(&vn) = self.map.get(&d) {
            return vn;
        }
        self.data.push(d.clone());
        let vn = self.data.len() as Vn; // ids start at 1; 0 is NO_VN
        self.map.insert(d, vn);
        vn
    }

    fn get(&self, vn: Vn) -> &VnData {
        &self.data[vn as usize - 1]
    }

    pub fn vn_for_null(&self) -> Vn {
        self.vn_null
    }

    pub fn vn_for_void(&self) -> Vn {
        self.vn_void
    }

    pub fn empty_exc_set(&self) -> Vn {
        self.vn_empty_exc
    }

    /// The handful of preallocated numbers; expressions whose normal number
    /// is reserved (other than null) are not CSE material.
    pub fn is_reserved(&self, vn: Vn) -> bool {
        vn == NO_VN || vn <= self.vn_empty_exc
    }

    pub fn vn_for_int(&mut self, val: i64, ty: Ty) -> Vn {
        self.intern(VnData::IntCon { val, ty })
    }

    pub fn vn_for_dbl(&mut self, val: f64) -> Vn {
        self.intern(VnData::DblCon { bits: val.to_bits() })
    }

    pub fn unique(&mut self) -> Vn {
        self.unique_counter += 1;
        let c = self.unique_counter;
        self.intern(VnData::Unique(c))
    }

    pub fn is_constant(&self, vn: Vn) -> bool {
        if vn == NO_VN {
            return false;
        }
        matches!(self.get(vn), VnData::IntCon { .. } | VnData::DblCon { .. })
    }

    pub fn coerce_i64(&self, vn: Vn) -> i64 {
        match self.get(vn) {
            VnData::IntCon { val, .. } => *val,
            _ => {
                debug_assert!(false, "coerce_i64 on non-integral VN");
                0
            }
        }
    }

    pub fn normalize(&self, vn: Vn) -> Vn {
        if vn == NO_VN {
            return NO_VN;
        }
        match self.get(vn) {
            VnData::WithExc { normal, .. } => *normal,
            _ => vn,
        }
    }

    pub fn exception_set(&self, vn: Vn) -> Vn {
        if vn == NO_VN {
            return self.vn_empty_exc;
        }
        match self.get(vn) {
            VnData::WithExc { exc, .. } => *exc,
            _ => self.vn_empty_exc,
        }
    }

    pub fn with_exc(&mut self, normal: Vn, exc: Vn) -> Vn {
        if exc == self.vn_empty_exc || exc == NO_VN {
            return normal;
        }
        self.intern(VnData::WithExc { normal, exc })
    }

    pub fn normal_pair(&self, vnp: VnPair) -> VnPair {
        VnPair::new(self.normalize(vnp.liberal), self.normalize(vnp.conservative))
    }

    pub fn pair_exception_sets(&self, vnp: VnPair) -> (Vn, Vn) {
        (
            self.exception_set(vnp.liberal),
            self.exception_set(vnp.conservative),
        )
    }

    /// Attach additional exception items to a pair, keeping any it already
    /// carries.
    pub fn pair_with_exc(&mut self, vnp: VnPair, exc: (Vn, Vn)) -> VnPair {
        let (le, ce) = self.pair_exception_sets(vnp);
        let lib_exc = self.exc_union(le, exc.0);
        let con_exc = self.exc_union(ce, exc.1);
        let lib_norm = self.normalize(vnp.liberal);
        let con_norm = self.normalize(vnp.conservative);
        VnPair::new(
            self.with_exc(lib_norm, lib_exc),
            self.with_exc(con_norm, con_exc),
        )
    }

    fn exc_items(&self, exc: Vn) -> Vec<Vn> {
        if exc == self.vn_empty_exc || exc == NO_VN {
            return Vec::new();
        }
        match self.get(exc) {
            VnData::ExcSet(items) => items.clone(),
            _ => {
                debug_assert!(false, "not an exception set VN");
                Vec::new()
            }
        }
    }

    fn exc_from_items(&mut self, mut items: Vec<Vn>) -> Vn {
        items.sort_unstable();
        items.dedup();
        if items.is_empty() {
            return self.vn_empty_exc;
        }
        self.intern(VnData::ExcSet(items))
    }

    pub fn exc_item(&mut self, kind: ExcKind, a: Vn, b: Vn) -> Vn {
        let item = self.intern(VnData::ExcItem { kind, a, b });
        self.exc_from_items(vec![item])
    }

    pub fn exc_union(&mut self, a: Vn, b: Vn) -> Vn {
        let mut items = self.exc_items(a);
        items.extend(self.exc_items(b));
        self.exc_from_items(items)
    }

    pub fn exc_intersect(&mut self, a: Vn, b: Vn) -> Vn {
        let ia = self.exc_items(a);
        let ib: FxHashSet<Vn> = self.exc_items(b).into_iter().collect();
        let items: Vec<Vn> = ia.into_iter().filter(|v| ib.contains(v)).collect();
        self.exc_from_items(items)
    }

    /// True iff every item of `sub` appears in `sup`.
    pub fn exc_is_subset(&self, sub: Vn, sup: Vn) -> bool {
        let sup_items: FxHashSet<Vn> = self.exc_items(sup).into_iter().collect();
        self.exc_items(sub).iter().all(|v| sup_items.contains(v))
    }

    pub fn is_vn_checked_bound(&self, vn: Vn) -> bool {
        self.checked_bound.contains(&vn)
    }

    pub fn set_vn_is_checked_bound(&mut self, vn: Vn) {
        self.checked_bound.insert(vn);
    }

    /// Assign liberal/conservative pairs to every node of the procedure.
    ///
    /// Local versions are bumped at stores and pessimistically at join and
    /// handler blocks for any local stored anywhere in the procedure.
    pub fn number_proc(&mut self, proc: &mut Proc) {
        let mut version: Vec<u32> = vec![0; proc.lcls.len()];
        let mut next_version: u32 = 1;

        let mut stored: FxHashSet<LclId> = FxHashSet::default();
        for b in &proc.blocks {
            for s in &b.stmts {
                for id in proc.eval_order(s.root) {
                    if let ExprKind::StoreLcl { lcl, .. } = proc.exprs[id].kind {
                        stored.insert(lcl);
                    }
                }
            }
        }
        let mut stored: Vec<LclId> = stored.into_iter().collect();
        stored.sort_unstable();

        for bid in 0..proc.blocks.len() {
            if proc.blocks[bid].preds.len() > 1 || proc.blocks[bid].is_handler_entry {
                for &l in &stored {
                    version[l] = next_version;
                    next_version += 1;
                }
            }
            let roots: Vec<_> = proc.blocks[bid].stmts.iter().map(|s| s.root).collect();
            for root in roots {
                for id in proc.eval_order(root) {
                    let vnp = self.number_expr(proc, id, &mut version, &mut next_version);
                    proc.exprs[id].vnp = vnp;
                }
            }
        }
    }

    fn number_expr(
        &mut self,
        proc: &Proc,
        id: usize,
        version: &mut [u32],
        next_version: &mut u32,
    ) -> VnPair {
        let child = |p: &Proc, c: usize| p.exprs[c].vnp;
        let e = &proc.exprs[id];
        match &e.kind {
            ExprKind::IntCon(v) => VnPair::both(self.vn_for_int(*v, e.ty)),
            ExprKind::DblCon(v) => VnPair::both(self.vn_for_dbl(*v)),
            ExprKind::LclLoad(l) => {
                let vn = self.intern(VnData::LclVal { lcl: *l, version: version[*l] });
                VnPair::both(vn)
            }
            ExprKind::Ind { addr } => {
                let a = child(proc, *addr);
                let addr_norm = self.normalize(a.liberal);
                let lib_norm = self.intern(VnData::Func1 { op: Func1Op::Ind, a: addr_norm });
                let con_norm = self.unique();
                let null_exc = self.exc_item(ExcKind::NullPtr, addr_norm, NO_VN);
                let lib_exc = {
                    let ae = self.exception_set(a.liberal);
                    self.exc_union(ae, null_exc)
                };
                let con_exc = {
                    let ae = self.exception_set(a.conservative);
                    self.exc_union(ae, null_exc)
                };
                VnPair::new(
                    self.with_exc(lib_norm, lib_exc),
                    self.with_exc(con_norm, con_exc),
                )
            }
            ExprKind::ArrLen { arr } => {
                let a = child(proc, *arr);
                let arr_norm = self.normalize(a.liberal);
                let lib_norm = self.intern(VnData::Func1 { op: Func1Op::ArrLen, a: arr_norm });
                let con_norm = self.unique();
                let null_exc = self.exc_item(ExcKind::NullPtr, arr_norm, NO_VN);
                let lib_exc = {
                    let ae = self.exception_set(a.liberal);
                    self.exc_union(ae, null_exc)
                };
                let con_exc = {
                    let ae = self.exception_set(a.conservative);
                    self.exc_union(ae, null_exc)
                };
                VnPair::new(
                    self.with_exc(lib_norm, lib_exc),
                    self.with_exc(con_norm, con_exc),
                )
            }
            ExprKind::Unop { op, src } => {
                let s = child(proc, *src);
                let f = match op {
                    UnOp::Neg => Func1Op::Neg,
                    UnOp::Not => Func1Op::Not,
                };
                self.func1_pair(f, s)
            }
            ExprKind::Cast { src, to } => {
                let s = child(proc, *src);
                self.func1_pair(Func1Op::Cast(*to), s)
            }
            ExprKind::Binop { op, lhs, rhs } => {
                let l = child(proc, *lhs);
                let r = child(proc, *rhs);
                let extra = if matches!(op, BinOp::Div | BinOp::Mod) {
                    let rn = self.normalize(l.liberal);
                    let dn = self.normalize(r.liberal);
                    Some(self.exc_item(ExcKind::DivByZero, rn, dn))
                } else {
                    None
                };
                self.func2_pair(Func2Op::Bin(*op), l, r, extra)
            }
            ExprKind::Cmp { op, lhs, rhs } => {
                let l = child(proc, *lhs);
                let r = child(proc, *rhs);
                self.func2_pair(Func2Op::Rel(*op), l, r, None)
            }
            ExprKind::Comma { effect, value } => {
                let ef = child(proc, *effect);
                let val = child(proc, *value);
                let lib_exc = {
                    let a = self.exception_set(ef.liberal);
                    let b = self.exception_set(val.liberal);
                    self.exc_union(a, b)
                };
                let con_exc = {
                    let a = self.exception_set(ef.conservative);
                    let b = self.exception_set(val.conservative);
                    self.exc_union(a, b)
                };
                VnPair::new(
                    self.with_exc(self.normalize(val.liberal), lib_exc),
                    self.with_exc(self.normalize(val.conservative), con_exc),
                )
            }
            ExprKind::BoundsCheck { index, length } => {
                let i = child(proc, *index);
                let l = child(proc, *length);
                let i_norm = self.normalize(i.liberal);
                let l_norm = self.normalize(l.liberal);
                self.set_vn_is_checked_bound(l_norm);
                let bounds = self.exc_item(ExcKind::Bounds, i_norm, l_norm);
                let lib_exc = {
                    let a = self.exception_set(i.liberal);
                    let b = self.exception_set(l.liberal);
                    let ab = self.exc_union(a, b);
                    self.exc_union(ab, bounds)
                };
                let v = self.vn_for_void();
                VnPair::both(self.with_exc(v, lib_exc))
            }
            ExprKind::Call { callee, args, .. } => {
                let arg_pairs: Vec<VnPair> = args.iter().map(|a| child(proc, *a)).collect();
                let mut lib_exc = self.vn_empty_exc;
                let mut con_exc = self.vn_empty_exc;
                for p in &arg_pairs {
                    let le = self.exception_set(p.liberal);
                    let ce = self.exception_set(p.conservative);
                    lib_exc = self.exc_union(lib_exc, le);
                    con_exc = self.exc_union(con_exc, ce);
                }
                let pure_helper = matches!(
                    callee,
                    crate::ir::def::Callee::Helper { pure_result: true, .. }
                );
                if pure_helper {
                    let lib_args: Vec<Vn> =
                        arg_pairs.iter().map(|p| self.normalize(p.liberal)).collect();
                    let con_args: Vec<Vn> = arg_pairs
                        .iter()
                        .map(|p| self.normalize(p.conservative))
                        .collect();
                    let name = callee.name().to_string();
                    let lib_norm = self.intern(VnData::CallPure { name: name.clone(), args: lib_args });
                    let con_norm = self.intern(VnData::CallPure { name, args: con_args });
                    VnPair::new(
                        self.with_exc(lib_norm, lib_exc),
                        self.with_exc(con_norm, con_exc),
                    )
                } else {
                    let u = self.unique();
                    VnPair::new(self.with_exc(u, lib_exc), self.with_exc(u, con_exc))
                }
            }
            ExprKind::StoreLcl { lcl, value } => {
                version[*lcl] = *next_version;
                *next_version += 1;
                let v = child(proc, *value);
                let exc = self.pair_exception_sets(v);
                let void = self.vn_for_void();
                VnPair::new(self.with_exc(void, exc.0), self.with_exc(void, exc.1))
            }
            ExprKind::Ret { value } => match value {
                Some(v) => {
                    let p = child(proc, *v);
                    let exc = self.pair_exception_sets(p);
                    let void = self.vn_for_void();
                    VnPair::new(self.with_exc(void, exc.0), self.with_exc(void, exc.1))
                }
                None => VnPair::both(self.vn_for_void()),
            },
        }
    }

    fn func1_pair(&mut self, op: Func1Op, s: VnPair) -> VnPair {
        let lib_norm = {
            let a = self.normalize(s.liberal);
            self.intern(VnData::Func1 { op, a })
        };
        let con_norm = {
            let a = self.normalize(s.conservative);
            self.intern(VnData::Func1 { op, a })
        };
        let exc = self.pair_exception_sets(s);
        VnPair::new(self.with_exc(lib_norm, exc.0), self.with_exc(con_norm, exc.1))
    }

    /// Fold a two-operand function over integral constants.
    fn try_fold2(&mut self, op: Func2Op, a: Vn, b: Vn) -> Option<Vn> {
        let (va, ty) = match self.get(a) {
            VnData::IntCon { val, ty } => (*val, *ty),
            _ => return None,
        };
        let vb = match self.get(b) {
            VnData::IntCon { val, .. } => *val,
            _ => return None,
        };
        let folded = match op {
            Func2Op::Bin(bin) => match bin {
                BinOp::Add => va.wrapping_add(vb),
                BinOp::Sub => va.wrapping_sub(vb),
                BinOp::Mul => va.wrapping_mul(vb),
                BinOp::Div => {
                    if vb == 0 {
                        return None;
                    }
                    va.wrapping_div(vb)
                }
                BinOp::Mod => {
                    if vb == 0 {
                        return None;
                    }
                    va.wrapping_rem(vb)
                }
                BinOp::And => va & vb,
                BinOp::Or => va | vb,
                BinOp::Xor => va ^ vb,
                BinOp::Shl => va.wrapping_shl(vb as u32 & 63),
                BinOp::Shr => va.wrapping_shr(vb as u32 & 63),
            },
            Func2Op::Rel(rel) => {
                let t = match rel {
                    RelOp::Eq => va == vb,
                    RelOp::Ne => va != vb,
                    RelOp::Lt => va < vb,
                    RelOp::Le => va <= vb,
                    RelOp::Gt => va > vb,
                    RelOp::Ge => va >= vb,
                };
                return Some(self.vn_for_int(t as i64, Ty::Int));
            }
        };
        Some(self.vn_for_int(folded, ty))
    }

    fn func2_pair(&mut self, op: Func2Op, l: VnPair, r: VnPair, extra_exc: Option<Vn>) -> VnPair {
        let lib_norm = {
            let a = self.normalize(l.liberal);
            let b = self.normalize(r.liberal);
            self.try_fold2(op, a, b)
                .unwrap_or_else(|| self.intern(VnData::Func2 { op, a, b }))
        };
        let con_norm = {
            let a = self.normalize(l.conservative);
            let b = self.normalize(r.conservative);
            self.try_fold2(op, a, b)
                .unwrap_or_else(|| self.intern(VnData::Func2 { op, a, b }))
        };
        let mut lib_exc = {
            let a = self.exception_set(l.liberal);
            let b = self.exception_set(r.liberal);
            self.exc_union(a, b)
        };
        let mut con_exc = {
            let a = self.exception_set(l.conservative);
            let b = self.exception_set(r.conservative);
            self.exc_union(a, b)
        };
        if let Some(x) = extra_exc {
            lib_exc = self.exc_union(lib_exc, x);
            con_exc = self.exc_union(con_exc, x);
        }
        VnPair::new(self.with_exc(lib_norm, lib_exc), self.with_exc(con_norm, con_exc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::def::ExprKind;

    fn numbered_proc() -> (Proc, VnStore) {
        let mut p = Proc::new("t");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let l = p.add_lcl("p", Ty::Long);
        let a1 = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let i1 = p.add_expr(ExprKind::Ind { addr: a1 }, Ty::Int);
        let a2 = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let i2 = p.add_expr(ExprKind::Ind { addr: a2 }, Ty::Int);
        let add = p.add_expr(
            ExprKind::Binop { op: BinOp::Add, lhs: i1, rhs: i2 },
            Ty::Int,
        );
        let ret = p.add_expr(ExprKind::Ret { value: Some(add) }, Ty::Void);
        p.add_stmt(b0, ret);
        let mut store = VnStore::new();
        store.number_proc(&mut p);
        (p, store)
    }

    #[test]
    fn two_loads_of_same_address_share_liberal_vn() {
        let (p, store) = numbered_proc();
        let inds: Vec<_> = p
            .exprs
            .iter()
            .filter(|e| matches!(e.kind, ExprKind::Ind { .. }))
            .collect();
        assert_eq!(inds.len(), 2);
        assert_eq!(
            store.normalize(inds[0].vnp.liberal),
            store.normalize(inds[1].vnp.liberal)
        );
        // Conservative numbers are deliberately distinct.
        assert_ne!(
            store.normalize(inds[0].vnp.conservative),
            store.normalize(inds[1].vnp.conservative)
        );
    }

    #[test]
    fn load_exception_set_carries_null_deref() {
        let (p, store) = numbered_proc();
        let ind = p
            .exprs
            .iter()
            .find(|e| matches!(e.kind, ExprKind::Ind { .. }))
            .unwrap();
        let exc = store.exception_set(ind.vnp.liberal);
        assert_ne!(exc, store.empty_exc_set());
        assert!(store.exc_is_subset(store.empty_exc_set(), exc));
        assert!(!store.exc_is_subset(exc, store.empty_exc_set()));
    }

    #[test]
    fn exc_set_algebra() {
        let mut store = VnStore::new();
        let a = store.exc_item(ExcKind::NullPtr, 11, NO_VN);
        let b = store.exc_item(ExcKind::DivByZero, 12, 13);
        let ab = store.exc_union(a, b);
        assert!(store.exc_is_subset(a, ab));
        assert!(store.exc_is_subset(b, ab));
        assert_eq!(store.exc_intersect(a, b), store.empty_exc_set());
        assert_eq!(store.exc_intersect(ab, a), a);
        // Union is idempotent and interned.
        assert_eq!(store.exc_union(ab, a), ab);
    }

    #[test]
    fn comma_vn_differs_from_value_when_effect_adds_exceptions() {
        let mut p = Proc::new("t");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let idx = p.add_lcl("i", Ty::Int);
        let len = p.add_lcl("n", Ty::Int);
        let ptr = p.add_lcl("p", Ty::Long);
        let i = p.add_expr(ExprKind::LclLoad(idx), Ty::Int);
        let n = p.add_expr(ExprKind::LclLoad(len), Ty::Int);
        let bc = p.add_expr(ExprKind::BoundsCheck { index: i, length: n }, Ty::Void);
        let a = p.add_expr(ExprKind::LclLoad(ptr), Ty::Long);
        let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
        let comma = p.add_expr(ExprKind::Comma { effect: bc, value: ind }, Ty::Int);
        let ret = p.add_expr(ExprKind::Ret { value: Some(comma) }, Ty::Void);
        p.add_stmt(b0, ret);

        let mut store = VnStore::new();
        store.number_proc(&mut p);

        let comma_vn = p.expr(comma).vnp.liberal;
        let ind_vn = p.expr(ind).vnp.liberal;
        assert_ne!(comma_vn, ind_vn, "comma picks up the bounds-check exception");
        assert_eq!(store.normalize(comma_vn), store.normalize(ind_vn));
        // The bounds length became a checked bound.
        let n_norm = store.normalize(p.expr(n).vnp.liberal);
        assert!(store.is_vn_checked_bound(n_norm));
    }

    #[test]
    fn store_bumps_local_version() {
        let mut p = Proc::new("t");
        let b0 = p.add_block(1.0);
        p.entry = b0;
        let x = p.add_lcl("x", Ty::Int);
        let r1 = p.add_expr(ExprKind::LclLoad(x), Ty::Int);
        let e1 = p.add_expr(ExprKind::Ret { value: Some(r1) }, Ty::Void);
        let c = p.add_expr(ExprKind::IntCon(5), Ty::Int);
        let st = p.add_expr(ExprKind::StoreLcl { lcl: x, value: c }, Ty::Void);
        let r2 = p.add_expr(ExprKind::LclLoad(x), Ty::Int);
        let e2 = p.add_expr(ExprKind::Ret { value: Some(r2) }, Ty::Void);
        p.add_stmt(b0, e1);
        p.add_stmt(b0, st);
        p.add_stmt(b0, e2);

        let mut store = VnStore::new();
        store.number_proc(&mut p);
        assert_ne!(p.expr(r1).vnp.liberal, p.expr(r2).vnp.liberal);
    }
}
