use crate::vn::VnPair;
use std::fmt::Write as _;

pub type BlockId = usize;
pub type ExprId = usize;
pub type LclId = usize;

/// Types carried by expression nodes and locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    Int,
    Long,
    Float,
    Double,
    Byref,
    Struct { gc_byref: bool },
    Simd,
    Mask,
}

impl Ty {
    pub fn is_void(self) -> bool {
        self == Ty::Void
    }

    pub fn is_struct(self) -> bool {
        matches!(self, Ty::Struct { .. })
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Ty::Float | Ty::Double)
    }

    /// True for types invalidated by an async suspension point.
    pub fn is_gc_byref(self) -> bool {
        matches!(self, Ty::Byref | Ty::Struct { gc_byref: true })
    }

    pub fn uses_int_reg(self) -> bool {
        matches!(self, Ty::Int | Ty::Long | Ty::Byref | Ty::Struct { .. })
    }

    pub fn uses_float_reg(self) -> bool {
        matches!(self, Ty::Float | Ty::Double | Ty::Simd)
    }

    pub fn uses_mask_reg(self) -> bool {
        self == Ty::Mask
    }

    /// Widened type used when a value lands in a temp.
    pub fn actual(self) -> Ty {
        self
    }

    /// Estimated stack-home size in bytes.
    pub fn stack_home_size(self) -> u32 {
        match self {
            Ty::Void => 0,
            Ty::Int | Ty::Float => 4,
            Ty::Long | Ty::Double | Ty::Byref => 8,
            Ty::Struct { .. } | Ty::Simd => 16,
            Ty::Mask => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Ty::Void => "void",
            Ty::Int => "int",
            Ty::Long => "long",
            Ty::Float => "float",
            Ty::Double => "double",
            Ty::Byref => "byref",
            Ty::Struct { gc_byref: false } => "struct",
            Ty::Struct { gc_byref: true } => "refstruct",
            Ty::Simd => "simd",
            Ty::Mask => "mask",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Call targets. Helper calls may be pure (interned value numbers) and may
/// be allocators (never CSE candidates).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    Helper {
        name: String,
        pure_result: bool,
        allocator: bool,
    },
    User(String),
}

impl Callee {
    pub fn name(&self) -> &str {
        match self {
            Callee::Helper { name, .. } => name,
            Callee::User(name) => name,
        }
    }
}

/// Per-node CSE classification. Candidates are tagged during discovery and
/// retagged as definitions during labeling; the rewriter clears tags as it
/// replaces nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CseMark {
    None,
    Cand(u8),
    Def(u8),
}

impl CseMark {
    pub fn index(self) -> Option<u8> {
        match self {
            CseMark::None => None,
            CseMark::Cand(k) | CseMark::Def(k) => Some(k),
        }
    }

    pub fn is_cand(self) -> bool {
        matches!(self, CseMark::Cand(_))
    }

    pub fn is_def(self) -> bool {
        matches!(self, CseMark::Def(_))
    }
}

pub mod flags {
    /// Never consider this node for CSE.
    pub const DONT_CSE: u32 = 1 << 0;
    /// Hoisting marked this node as a desirable CSE.
    pub const MAKE_CSE: u32 = 1 << 1;
    /// Node folds into an address mode on the target.
    pub const ADDR_MODE: u32 = 1 << 2;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntCon(i64),
    DblCon(f64),
    LclLoad(LclId),
    Ind { addr: ExprId },
    ArrLen { arr: ExprId },
    Unop { op: UnOp, src: ExprId },
    Binop { op: BinOp, lhs: ExprId, rhs: ExprId },
    Cmp { op: RelOp, lhs: ExprId, rhs: ExprId },
    Cast { src: ExprId, to: Ty },
    Comma { effect: ExprId, value: ExprId },
    BoundsCheck { index: ExprId, length: ExprId },
    Call { callee: Callee, args: Vec<ExprId>, is_async: bool },
    StoreLcl { lcl: LclId, value: ExprId },
    Ret { value: Option<ExprId> },
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub ty: Ty,
    pub cost_ex: u8,
    pub cost_sz: u8,
    pub flags: u32,
    pub mark: CseMark,
    pub vnp: VnPair,
}

impl Expr {
    pub fn has_flag(&self, f: u32) -> bool {
        self.flags & f != 0
    }

    pub fn is_integral_const(&self) -> bool {
        matches!(self.kind, ExprKind::IntCon(_))
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind, ExprKind::IntCon(_) | ExprKind::DblCon(_))
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, ExprKind::Call { .. })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::IntCon(_) | ExprKind::DblCon(_) | ExprKind::LclLoad(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub root: ExprId,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub weight: f64,
    pub stmts: Vec<Stmt>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
    pub postorder_num: u32,
    pub is_handler_entry: bool,
    pub no_cse_in: bool,
}

#[derive(Debug, Clone)]
pub struct LclDsc {
    pub name: String,
    pub ty: Ty,
    pub is_param: bool,
    pub do_not_enreg: bool,
    pub is_cse_temp: bool,
    pub ref_cnt: u32,
    pub ref_cnt_wtd: f64,
}

#[derive(Debug, Clone)]
pub struct Proc {
    pub name: String,
    pub blocks: Vec<Block>,
    pub exprs: Vec<Expr>,
    pub lcls: Vec<LclDsc>,
    pub entry: BlockId,
    pub is_async: bool,
}

impl Proc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            exprs: Vec::new(),
            lcls: Vec::new(),
            entry: 0,
            is_async: false,
        }
    }

    pub fn add_block(&mut self, weight: f64) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block {
            id,
            name: format!("B{}", id),
            weight,
            stmts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            postorder_num: 0,
            is_handler_entry: false,
            no_cse_in: false,
        });
        id
    }

    pub fn link(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from].succs.contains(&to) {
            self.blocks[from].succs.push(to);
        }
        if !self.blocks[to].preds.contains(&from) {
            self.blocks[to].preds.push(from);
        }
    }

    pub fn add_lcl(&mut self, name: impl Into<String>, ty: Ty) -> LclId {
        let id = self.lcls.len();
        self.lcls.push(LclDsc {
            name: name.into(),
            ty,
            is_param: false,
            do_not_enreg: false,
            is_cse_temp: false,
            ref_cnt: 0,
            ref_cnt_wtd: 0.0,
        });
        id
    }

    /// Allocate a fresh CSE temp local.
    pub fn grab_cse_temp(&mut self, ty: Ty, cse_index: u8) -> LclId {
        let id = self.lcls.len();
        self.lcls.push(LclDsc {
            name: format!("cse{}", cse_index),
            ty,
            is_param: false,
            do_not_enreg: false,
            is_cse_temp: true,
            ref_cnt: 0,
            ref_cnt_wtd: 0.0,
        });
        id
    }

    /// Append a node to the arena. Costs accumulate over the subtree.
    pub fn add_expr(&mut self, kind: ExprKind, ty: Ty) -> ExprId {
        let (own_ex, own_sz) = Self::own_costs(&kind);
        let mut cost_ex = own_ex as u32;
        let mut cost_sz = own_sz as u32;
        for &c in Self::kind_children(&kind).iter() {
            cost_ex += self.exprs[c].cost_ex as u32;
            cost_sz += self.exprs[c].cost_sz as u32;
        }
        let id = self.exprs.len();
        self.exprs.push(Expr {
            id,
            kind,
            ty,
            cost_ex: cost_ex.min(u8::MAX as u32) as u8,
            cost_sz: cost_sz.min(u8::MAX as u32) as u8,
            flags: 0,
            mark: CseMark::None,
            vnp: VnPair::default(),
        });
        id
    }

    pub fn add_stmt(&mut self, block: BlockId, root: ExprId) {
        self.blocks[block].stmts.push(Stmt { root });
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id]
    }

    fn own_costs(kind: &ExprKind) -> (u8, u8) {
        match kind {
            ExprKind::IntCon(v) => {
                if (-128..=255).contains(v) {
                    (1, 1)
                } else if *v >= i32::MIN as i64 && *v <= i32::MAX as i64 {
                    (2, 4)
                } else {
                    (3, 8)
                }
            }
            ExprKind::DblCon(_) => (2, 8),
            ExprKind::LclLoad(_) => (1, 1),
            ExprKind::Ind { .. } => (2, 2),
            ExprKind::ArrLen { .. } => (2, 2),
            ExprKind::Unop { .. } => (1, 1),
            ExprKind::Binop { op, .. } => match op {
                BinOp::Div | BinOp::Mod => (4, 2),
                BinOp::Mul => (2, 2),
                _ => (1, 1),
            },
            ExprKind::Cmp { .. } => (1, 1),
            ExprKind::Cast { .. } => (1, 1),
            ExprKind::Comma { .. } => (0, 0),
            ExprKind::BoundsCheck { .. } => (3, 3),
            ExprKind::Call { .. } => (5, 4),
            ExprKind::StoreLcl { .. } => (1, 1),
            ExprKind::Ret { .. } => (0, 0),
        }
    }

    fn kind_children(kind: &ExprKind) -> Vec<ExprId> {
        match kind {
            ExprKind::IntCon(_) | ExprKind::DblCon(_) | ExprKind::LclLoad(_) => vec![],
            ExprKind::Ind { addr } => vec![*addr],
            ExprKind::ArrLen { arr } => vec![*arr],
            ExprKind::Unop { src, .. } => vec![*src],
            ExprKind::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExprKind::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExprKind::Cast { src, .. } => vec![*src],
            ExprKind::Comma { effect, value } => vec![*effect, *value],
            ExprKind::BoundsCheck { index, length } => vec![*index, *length],
            ExprKind::Call { args, .. } => args.clone(),
            ExprKind::StoreLcl { value, .. } => vec![*value],
            ExprKind::Ret { value } => value.iter().copied().collect(),
        }
    }

    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        Self::kind_children(&self.exprs[id].kind)
    }

    /// Replace `old` with `new` among the direct children of `parent`.
    /// Returns true if a link was patched.
    pub fn replace_child(&mut self, parent: ExprId, old: ExprId, new: ExprId) -> bool {
        let kind = &mut self.exprs[parent].kind;
        let slot = match kind {
            ExprKind::Ind { addr } => Some(addr),
            ExprKind::ArrLen { arr } => Some(arr),
            ExprKind::Unop { src, .. } => Some(src),
            ExprKind::Cast { src, .. } => Some(src),
            ExprKind::StoreLcl { value, .. } => Some(value),
            ExprKind::Binop { lhs, rhs, .. } | ExprKind::Cmp { lhs, rhs, .. } => {
                if *lhs == old {
                    Some(lhs)
                } else {
                    Some(rhs)
                }
            }
            ExprKind::Comma { effect, value } => {
                if *effect == old {
                    Some(effect)
                } else {
                    Some(value)
                }
            }
            ExprKind::BoundsCheck { index, length } => {
                if *index == old {
                    Some(index)
                } else {
                    Some(length)
                }
            }
            ExprKind::Call { args, .. } => args.iter_mut().find(|a| **a == old),
            ExprKind::Ret { value } => value.as_mut(),
            _ => None,
        };
        match slot {
            Some(s) if *s == old => {
                *s = new;
                true
            }
            _ => false,
        }
    }

    /// Evaluation (execution) order of a statement tree: post-order,
    /// left-to-right, so operands precede their operator.
    pub fn eval_order(&self, root: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        self.eval_order_into(root, &mut out);
        out
    }

    fn eval_order_into(&self, id: ExprId, out: &mut Vec<ExprId>) {
        for c in self.children(id) {
            self.eval_order_into(c, out);
        }
        out.push(id);
    }

    /// Recompute accumulated subtree costs after a rewrite changed links.
    pub fn refresh_costs(&mut self, root: ExprId) {
        for id in self.eval_order(root) {
            let (own_ex, own_sz) = Self::own_costs(&self.exprs[id].kind);
            let mut ex = own_ex as u32;
            let mut sz = own_sz as u32;
            for c in self.children(id) {
                ex += self.exprs[c].cost_ex as u32;
                sz += self.exprs[c].cost_sz as u32;
            }
            self.exprs[id].cost_ex = ex.min(u8::MAX as u32) as u8;
            self.exprs[id].cost_sz = sz.min(u8::MAX as u32) as u8;
        }
    }

    pub fn block_has_call(&self, block: BlockId) -> bool {
        self.blocks[block].stmts.iter().any(|s| {
            self.eval_order(s.root)
                .iter()
                .any(|&e| self.exprs[e].is_call())
        })
    }

    pub fn subtree_has_call(&self, root: ExprId) -> bool {
        self.eval_order(root).iter().any(|&e| self.exprs[e].is_call())
    }

    /// True if this node by itself carries a persistent side effect
    /// (a store, or a call that isn't a pure helper).
    pub fn node_has_persistent_effects(&self, id: ExprId) -> bool {
        match &self.exprs[id].kind {
            ExprKind::StoreLcl { .. } => true,
            ExprKind::Call { callee, .. } => match callee {
                Callee::Helper { pure_result, .. } => !*pure_result,
                Callee::User(_) => true,
            },
            _ => false,
        }
    }

    pub fn subtree_has_persistent_effects(&self, root: ExprId) -> bool {
        self.eval_order(root)
            .iter()
            .any(|&e| self.node_has_persistent_effects(e))
    }

    /// Assign postorder numbers from a DFS over the successor graph.
    pub fn compute_postorder(&mut self) {
        let n = self.blocks.len();
        let mut visited = vec![false; n];
        let mut number = 0u32;
        // Iterative DFS: (block, next successor slot).
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited[self.entry] = true;
        while let Some(&(bid, next)) = stack.last() {
            if next < self.blocks[bid].succs.len() {
                stack.last_mut().unwrap().1 += 1;
                let s = self.blocks[bid].succs[next];
                if !visited[s] {
                    visited[s] = true;
                    stack.push((s, 0));
                }
            } else {
                self.blocks[bid].postorder_num = number;
                number += 1;
                stack.pop();
            }
        }
        // Unreachable blocks get numbers after the reachable ones.
        for bid in 0..n {
            if !visited[bid] {
                self.blocks[bid].postorder_num = number;
                number += 1;
            }
        }
    }

    /// Recompute local ref counts from the IR, weighted by block weight.
    pub fn recount_locals(&mut self) {
        for lcl in &mut self.lcls {
            lcl.ref_cnt = 0;
            lcl.ref_cnt_wtd = 0.0;
        }
        let mut counts: Vec<(u32, f64)> = vec![(0, 0.0); self.lcls.len()];
        for b in &self.blocks {
            for s in &b.stmts {
                for id in self.eval_order(s.root) {
                    let lcl = match self.exprs[id].kind {
                        ExprKind::LclLoad(l) => Some(l),
                        ExprKind::StoreLcl { lcl, .. } => Some(lcl),
                        _ => None,
                    };
                    if let Some(l) = lcl {
                        counts[l].0 += 1;
                        counts[l].1 += b.weight;
                    }
                }
            }
        }
        for (lcl, (cnt, wtd)) in self.lcls.iter_mut().zip(counts) {
            lcl.ref_cnt = cnt;
            lcl.ref_cnt_wtd = wtd;
        }
    }

    /// Deterministic textual dump, used by the driver and golden tests.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "proc {}{}", self.name, if self.is_async { " async" } else { "" });
        for lcl in &self.lcls {
            let mut attrs = String::new();
            if lcl.is_param {
                attrs.push_str(" param");
            }
            if lcl.do_not_enreg {
                attrs.push_str(" noenreg");
            }
            if lcl.is_cse_temp {
                attrs.push_str(" cse");
            }
            let _ = writeln!(out, "local {} {}{}", lcl.name, lcl.ty.name(), attrs);
        }
        for b in &self.blocks {
            let mut attrs = format!(" weight={}", b.weight);
            if b.is_handler_entry {
                attrs.push_str(" handler");
            }
            if b.no_cse_in {
                attrs.push_str(" nocse");
            }
            if !b.succs.is_empty() {
                attrs.push_str(" ->");
                for s in &b.succs {
                    let _ = write!(attrs, " {}", self.blocks[*s].name);
                }
            }
            let _ = writeln!(out, "block {}{}", b.name, attrs);
            for s in &b.stmts {
                let _ = writeln!(out, "  {}", self.fmt_expr(s.root));
            }
        }
        out
    }

    pub fn fmt_expr(&self, id: ExprId) -> String {
        let e = &self.exprs[id];
        let body = match &e.kind {
            ExprKind::IntCon(v) => format!("{}", v),
            ExprKind::DblCon(v) => format!("(dcon {})", v),
            ExprKind::LclLoad(l) => format!("(lcl {})", self.lcls[*l].name),
            ExprKind::Ind { addr } => format!("(ind {})", self.fmt_expr(*addr)),
            ExprKind::ArrLen { arr } => format!("(arrlen {})", self.fmt_expr(*arr)),
            ExprKind::Unop { op, src } => {
                let name = match op {
                    UnOp::Neg => "neg",
                    UnOp::Not => "not",
                };
                format!("({} {})", name, self.fmt_expr(*src))
            }
            ExprKind::Binop { op, lhs, rhs } => {
                let name = match op {
                    BinOp::Add => "add",
                    BinOp::Sub => "sub",
                    BinOp::Mul => "mul",
                    BinOp::Div => "div",
                    BinOp::Mod => "mod",
                    BinOp::And => "and",
                    BinOp::Or => "or",
                    BinOp::Xor => "xor",
                    BinOp::Shl => "shl",
                    BinOp::Shr => "shr",
                };
                format!("({} {} {})", name, self.fmt_expr(*lhs), self.fmt_expr(*rhs))
            }
            ExprKind::Cmp { op, lhs, rhs } => {
                let name = match op {
                    RelOp::Eq => "eq",
                    RelOp::Ne => "ne",
                    RelOp::Lt => "lt",
                    RelOp::Le => "le",
                    RelOp::Gt => "gt",
                    RelOp::Ge => "ge",
                };
                format!("({} {} {})", name, self.fmt_expr(*lhs), self.fmt_expr(*rhs))
            }
            ExprKind::Cast { src, to } => {
                format!("(cast {} {})", to.name(), self.fmt_expr(*src))
            }
            ExprKind::Comma { effect, value } => {
                format!("(comma {} {})", self.fmt_expr(*effect), self.fmt_expr(*value))
            }
            ExprKind::BoundsCheck { index, length } => format!(
                "(boundscheck {} {})",
                self.fmt_expr(*index),
                self.fmt_expr(*length)
            ),
            ExprKind::Call { callee, args, is_async } => {
                let head = match callee {
                    Callee::Helper { allocator: true, .. } => "callalloc",
                    Callee::Helper { pure_result: true, .. } => "callpure",
                    Callee::Helper { .. } => "call",
                    Callee::User(_) => "calluser",
                };
                let head = if *is_async { "asynccall" } else { head };
                let mut s = format!("({} {}", head, callee.name());
                for a in args {
                    let _ = write!(s, " {}", self.fmt_expr(*a));
                }
                s.push(')');
                s
            }
            ExprKind::StoreLcl { lcl, value } => {
                format!("(store {} {})", self.lcls[*lcl].name, self.fmt_expr(*value))
            }
            ExprKind::Ret { value } => match value {
                Some(v) => format!("(ret {})", self.fmt_expr(*v)),
                None => "(ret)".to_string(),
            },
        };
        match e.mark {
            CseMark::None => body,
            CseMark::Cand(k) => format!("{}#cse{}", body, k),
            CseMark::Def(k) => format!("{}#csedef{}", body, k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn costs_accumulate_over_subtrees() {
        let mut p = Proc::new("t");
        let l = p.add_lcl("p", Ty::Long);
        let a = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
        assert_eq!(p.expr(ind).cost_ex, 3); // 1 (lcl) + 2 (ind)
        let two = p.add_expr(ExprKind::IntCon(2), Ty::Int);
        let add = p.add_expr(
            ExprKind::Binop { op: BinOp::Add, lhs: ind, rhs: two },
            Ty::Int,
        );
        assert_eq!(p.expr(add).cost_ex, 5);
    }

    #[test]
    fn eval_order_is_postorder() {
        let mut p = Proc::new("t");
        let l = p.add_lcl("p", Ty::Long);
        let a = p.add_expr(ExprKind::LclLoad(l), Ty::Long);
        let ind = p.add_expr(ExprKind::Ind { addr: a }, Ty::Int);
        let c = p.add_expr(ExprKind::IntCon(1), Ty::Int);
        let add = p.add_expr(
            ExprKind::Binop { op: BinOp::Add, lhs: ind, rhs: c },
            Ty::Int,
        );
        assert_eq!(p.eval_order(add), vec![a, ind, c, add]);
    }

    #[test]
    fn replace_child_patches_the_right_slot() {
        let mut p = Proc::new("t");
        let a = p.add_expr(ExprKind::IntCon(1), Ty::Int);
        let b = p.add_expr(ExprKind::IntCon(2), Ty::Int);
        let add = p.add_expr(
            ExprKind::Binop { op: BinOp::Add, lhs: a, rhs: b },
            Ty::Int,
        );
        let c = p.add_expr(ExprKind::IntCon(3), Ty::Int);
        assert!(p.replace_child(add, b, c));
        assert_eq!(p.children(add), vec![a, c]);
    }

    #[test]
    fn postorder_numbers_cover_all_blocks() {
        let mut p = Proc::new("t");
        let b0 = p.add_block(1.0);
        let b1 = p.add_block(1.0);
        let b2 = p.add_block(1.0);
        p.entry = b0;
        p.link(b0, b1);
        p.link(b0, b2);
        p.link(b1, b2);
        p.compute_postorder();
        let mut nums: Vec<u32> = p.blocks.iter().map(|b| b.postorder_num).collect();
        nums.sort_unstable();
        assert_eq!(nums, vec![0, 1, 2]);
        // The entry finishes last in a DFS postorder.
        assert_eq!(p.blocks[b0].postorder_num, 2);
    }
}
