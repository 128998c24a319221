//! Structural IR checks, run at pass boundaries by the driver.

use crate::error::{CseResult, ErrCode, PassError, Stage};
use crate::ir::def::{ExprKind, Proc};

fn fail(msg: String) -> PassError {
    PassError::new(ErrCode::E2001, Stage::Verify, msg)
}

pub fn verify_proc(proc: &Proc) -> CseResult<()> {
    if proc.blocks.is_empty() {
        return Err(fail("procedure has no blocks".to_string()));
    }
    if proc.entry >= proc.blocks.len() {
        return Err(fail(format!("entry block {} out of range", proc.entry)));
    }

    for (bid, b) in proc.blocks.iter().enumerate() {
        if b.id != bid {
            return Err(fail(format!("block {} has stale id {}", bid, b.id)));
        }
        for s in &b.succs {
            if *s >= proc.blocks.len() {
                return Err(fail(format!("block {} has bad successor {}", bid, s)));
            }
            if !proc.blocks[*s].preds.contains(&bid) {
                return Err(fail(format!(
                    "edge {} -> {} missing the reverse pred link",
                    bid, s
                )));
            }
        }
        for pr in &b.preds {
            if *pr >= proc.blocks.len() || !proc.blocks[*pr].succs.contains(&bid) {
                return Err(fail(format!("block {} has bad predecessor {}", bid, pr)));
            }
        }
        for stmt in &b.stmts {
            if stmt.root >= proc.exprs.len() {
                return Err(fail(format!("block {} statement root out of range", bid)));
            }
            verify_tree(proc, stmt.root)?;
        }
    }
    Ok(())
}

fn verify_tree(proc: &Proc, root: usize) -> CseResult<()> {
    for id in proc.eval_order(root) {
        let e = proc.expr(id);
        for c in proc.children(id) {
            if c >= proc.exprs.len() {
                return Err(fail(format!("expr {} has bad child {}", id, c)));
            }
        }
        match &e.kind {
            ExprKind::LclLoad(l) | ExprKind::StoreLcl { lcl: l, .. } => {
                if *l >= proc.lcls.len() {
                    return Err(fail(format!("expr {} references bad local {}", id, l)));
                }
            }
            ExprKind::Comma { value, .. } => {
                // Void commas sequence side effects; value commas must
                // agree with their value child.
                if !e.ty.is_void() && proc.expr(*value).ty != e.ty {
                    return Err(fail(format!(
                        "comma {} type {:?} differs from its value {:?}",
                        id,
                        e.ty,
                        proc.expr(*value).ty
                    )));
                }
            }
            ExprKind::BoundsCheck { .. } | ExprKind::Ret { .. } => {
                if !e.ty.is_void() {
                    return Err(fail(format!("expr {} should be void-typed", id)));
                }
            }
            _ => {}
        }
        // Void values may only appear where no value is consumed.
        if e.ty.is_void()
            && !matches!(
                e.kind,
                ExprKind::StoreLcl { .. }
                    | ExprKind::Ret { .. }
                    | ExprKind::BoundsCheck { .. }
                    | ExprKind::Comma { .. }
                    | ExprKind::Call { .. }
            )
        {
            return Err(fail(format!("unexpected void-typed expr {}", id)));
        }
    }
    Ok(())
}
