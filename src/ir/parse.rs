//! Parser for the textual CFG descriptor.
//!
//! The format is line oriented:
//!
//! ```text
//! proc demo async
//! local p long param
//! local i int
//! block B0 weight=4 -> B1 B2
//!   (store t (add (ind (lcl p)) 1))
//!   (calluser f)
//! block B1 weight=2 handler
//!   (ret (ind (lcl p)))
//! ```
//!
//! Statements are prefix expressions, one per line. `#` starts a comment.
//! Attribute wrappers `(nocse e)`, `(makecse e)` and `(amode e)` set node
//! flags and yield the wrapped expression.

use crate::error::{CseResult, ErrCode, PassError, Stage};
use crate::ir::def::{flags, BinOp, Callee, ExprKind, LclId, Proc, RelOp, Ty, UnOp};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

fn local_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^local\s+(\S+)\s+(\S+)(.*)$").unwrap())
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^block\s+(\S+)(.*)$").unwrap())
}

fn weight_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"weight=([0-9]+(?:\.[0-9]+)?)").unwrap())
}

fn err(code: ErrCode, line: usize, msg: impl Into<String>) -> PassError {
    PassError::new(code, Stage::Parse, msg).with_line(line)
}

pub fn parse_proc(text: &str) -> CseResult<Proc> {
    let mut proc: Option<Proc> = None;
    let mut lcl_names: FxHashMap<String, LclId> = FxHashMap::default();
    let mut block_names: FxHashMap<String, usize> = FxHashMap::default();
    // (block id, succ names, line) resolved after all blocks are known.
    let mut pending_succs: Vec<(usize, Vec<String>, usize)> = Vec::new();
    let mut cur_block: Option<usize> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("proc ") {
            if proc.is_some() {
                return Err(err(ErrCode::E0001, lineno, "duplicate proc line"));
            }
            let mut words = rest.split_whitespace();
            let name = words
                .next()
                .ok_or_else(|| err(ErrCode::E0001, lineno, "proc needs a name"))?;
            let mut p = Proc::new(name);
            for w in words {
                match w {
                    "async" => p.is_async = true,
                    other => {
                        return Err(err(
                            ErrCode::E0001,
                            lineno,
                            format!("unknown proc attribute '{other}'"),
                        ))
                    }
                }
            }
            proc = Some(p);
            continue;
        }

        let p = proc
            .as_mut()
            .ok_or_else(|| err(ErrCode::E0001, lineno, "expected a proc line first"))?;

        if let Some(caps) = local_re().captures(line) {
            let name = caps.get(1).unwrap().as_str();
            let ty = parse_ty(caps.get(2).unwrap().as_str())
                .ok_or_else(|| err(ErrCode::E0002, lineno, "unknown local type"))?;
            if lcl_names.contains_key(name) {
                return Err(err(ErrCode::E0001, lineno, format!("duplicate local '{name}'")));
            }
            let id = p.add_lcl(name, ty);
            for attr in caps.get(3).unwrap().as_str().split_whitespace() {
                match attr {
                    "param" => p.lcls[id].is_param = true,
                    "noenreg" => p.lcls[id].do_not_enreg = true,
                    other => {
                        return Err(err(
                            ErrCode::E0001,
                            lineno,
                            format!("unknown local attribute '{other}'"),
                        ))
                    }
                }
            }
            lcl_names.insert(name.to_string(), id);
            continue;
        }

        if let Some(caps) = block_re().captures(line) {
            let name = caps.get(1).unwrap().as_str().to_string();
            let rest = caps.get(2).unwrap().as_str();
            if block_names.contains_key(&name) {
                return Err(err(ErrCode::E0001, lineno, format!("duplicate block '{name}'")));
            }
            let weight = match weight_re().captures(rest) {
                Some(w) => w.get(1).unwrap().as_str().parse::<f64>().unwrap_or(1.0),
                None => 1.0,
            };
            let id = p.add_block(weight);
            p.blocks[id].name = name.clone();
            if block_names.is_empty() {
                p.entry = id;
            }
            block_names.insert(name, id);
            cur_block = Some(id);

            let (attrs, succs) = match rest.find("->") {
                Some(pos) => (&rest[..pos], Some(&rest[pos + 2..])),
                None => (rest, None),
            };
            for attr in attrs.split_whitespace() {
                if attr.starts_with("weight=") {
                    continue;
                }
                match attr {
                    "handler" => p.blocks[id].is_handler_entry = true,
                    "nocse" => p.blocks[id].no_cse_in = true,
                    other => {
                        return Err(err(
                            ErrCode::E0001,
                            lineno,
                            format!("unknown block attribute '{other}'"),
                        ))
                    }
                }
            }
            if let Some(succs) = succs {
                let names: Vec<String> =
                    succs.split_whitespace().map(|s| s.to_string()).collect();
                pending_succs.push((id, names, lineno));
            }
            continue;
        }

        if line.starts_with('(') {
            let block = cur_block
                .ok_or_else(|| err(ErrCode::E0001, lineno, "statement outside any block"))?;
            let tokens = tokenize(line, lineno)?;
            let mut pos = 0;
            let root = parse_expr(p, &lcl_names, &tokens, &mut pos, lineno)?;
            if pos != tokens.len() {
                return Err(err(ErrCode::E0001, lineno, "trailing tokens after statement"));
            }
            p.add_stmt(block, root);
            continue;
        }

        return Err(err(ErrCode::E0001, lineno, format!("unrecognized line '{line}'")));
    }

    let mut p = proc.ok_or_else(|| {
        PassError::new(ErrCode::E0001, Stage::Parse, "descriptor has no proc line")
    })?;
    for (from, names, lineno) in pending_succs {
        for name in names {
            let to = *block_names
                .get(&name)
                .ok_or_else(|| err(ErrCode::E0003, lineno, format!("unknown block '{name}'")))?;
            p.link(from, to);
        }
    }
    p.compute_postorder();
    p.recount_locals();
    Ok(p)
}

fn parse_ty(s: &str) -> Option<Ty> {
    Some(match s {
        "void" => Ty::Void,
        "int" => Ty::Int,
        "long" => Ty::Long,
        "float" => Ty::Float,
        "double" => Ty::Double,
        "byref" => Ty::Byref,
        "struct" => Ty::Struct { gc_byref: false },
        "refstruct" => Ty::Struct { gc_byref: true },
        "simd" => Ty::Simd,
        "mask" => Ty::Mask,
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Open,
    Close,
    Atom(String),
}

fn tokenize(line: &str, lineno: usize) -> CseResult<Vec<Tok>> {
    let mut toks = Vec::new();
    let mut cur = String::new();
    for c in line.chars() {
        match c {
            '(' | ')' => {
                if !cur.is_empty() {
                    toks.push(Tok::Atom(std::mem::take(&mut cur)));
                }
                toks.push(if c == '(' { Tok::Open } else { Tok::Close });
            }
            c if c.is_whitespace() => {
                if !cur.is_empty() {
                    toks.push(Tok::Atom(std::mem::take(&mut cur)));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        toks.push(Tok::Atom(cur));
    }
    if toks.is_empty() {
        return Err(err(ErrCode::E0001, lineno, "empty statement"));
    }
    Ok(toks)
}

fn parse_expr(
    p: &mut Proc,
    lcls: &FxHashMap<String, LclId>,
    toks: &[Tok],
    pos: &mut usize,
    lineno: usize,
) -> CseResult<usize> {
    let tok = toks
        .get(*pos)
        .ok_or_else(|| err(ErrCode::E0001, lineno, "unexpected end of statement"))?
        .clone();
    *pos += 1;
    match tok {
        Tok::Atom(a) => {
            if let Ok(v) = a.parse::<i64>() {
                return Ok(p.add_expr(ExprKind::IntCon(v), int_con_ty(v)));
            }
            Err(err(ErrCode::E0001, lineno, format!("unexpected atom '{a}'")))
        }
        Tok::Close => Err(err(ErrCode::E0001, lineno, "unexpected ')'")),
        Tok::Open => {
            let head = match toks.get(*pos) {
                Some(Tok::Atom(a)) => a.clone(),
                _ => return Err(err(ErrCode::E0001, lineno, "expected an operator name")),
            };
            *pos += 1;
            let id = parse_form(p, lcls, &head, toks, pos, lineno)?;
            match toks.get(*pos) {
                Some(Tok::Close) => {
                    *pos += 1;
                    Ok(id)
                }
                _ => Err(err(ErrCode::E0001, lineno, format!("missing ')' after '{head}'"))),
            }
        }
    }
}

fn int_con_ty(v: i64) -> Ty {
    if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
        Ty::Int
    } else {
        Ty::Long
    }
}

fn parse_form(
    p: &mut Proc,
    lcls: &FxHashMap<String, LclId>,
    head: &str,
    toks: &[Tok],
    pos: &mut usize,
    lineno: usize,
) -> CseResult<usize> {
    let binops: &[(&str, BinOp)] = &[
        ("add", BinOp::Add),
        ("sub", BinOp::Sub),
        ("mul", BinOp::Mul),
        ("div", BinOp::Div),
        ("mod", BinOp::Mod),
        ("and", BinOp::And),
        ("or", BinOp::Or),
        ("xor", BinOp::Xor),
        ("shl", BinOp::Shl),
        ("shr", BinOp::Shr),
    ];
    let relops: &[(&str, RelOp)] = &[
        ("eq", RelOp::Eq),
        ("ne", RelOp::Ne),
        ("lt", RelOp::Lt),
        ("le", RelOp::Le),
        ("gt", RelOp::Gt),
        ("ge", RelOp::Ge),
    ];

    if let Some((_, op)) = binops.iter().find(|(n, _)| *n == head) {
        let lhs = parse_expr(p, lcls, toks, pos, lineno)?;
        let rhs = parse_expr(p, lcls, toks, pos, lineno)?;
        let ty = p.expr(lhs).ty;
        return Ok(p.add_expr(ExprKind::Binop { op: *op, lhs, rhs }, ty));
    }
    if let Some((_, op)) = relops.iter().find(|(n, _)| *n == head) {
        let lhs = parse_expr(p, lcls, toks, pos, lineno)?;
        let rhs = parse_expr(p, lcls, toks, pos, lineno)?;
        return Ok(p.add_expr(ExprKind::Cmp { op: *op, lhs, rhs }, Ty::Int));
    }

    match head {
        "lcl" => {
            let name = expect_atom(toks, pos, lineno)?;
            let lcl = *lcls
                .get(&name)
                .ok_or_else(|| err(ErrCode::E0003, lineno, format!("unknown local '{name}'")))?;
            let ty = p.lcls[lcl].ty;
            Ok(p.add_expr(ExprKind::LclLoad(lcl), ty))
        }
        "dcon" => {
            let a = expect_atom(toks, pos, lineno)?;
            let v = a
                .parse::<f64>()
                .map_err(|_| err(ErrCode::E0001, lineno, "bad double literal"))?;
            Ok(p.add_expr(ExprKind::DblCon(v), Ty::Double))
        }
        "ind" => {
            let addr = parse_expr(p, lcls, toks, pos, lineno)?;
            Ok(p.add_expr(ExprKind::Ind { addr }, Ty::Int))
        }
        "indty" => {
            // (indty <ty> <addr>) -- typed load
            let tyname = expect_atom(toks, pos, lineno)?;
            let ty = parse_ty(&tyname)
                .ok_or_else(|| err(ErrCode::E0002, lineno, "unknown load type"))?;
            let addr = parse_expr(p, lcls, toks, pos, lineno)?;
            Ok(p.add_expr(ExprKind::Ind { addr }, ty))
        }
        "arrlen" => {
            let arr = parse_expr(p, lcls, toks, pos, lineno)?;
            Ok(p.add_expr(ExprKind::ArrLen { arr }, Ty::Int))
        }
        "neg" | "not" => {
            let op = if head == "neg" { UnOp::Neg } else { UnOp::Not };
            let src = parse_expr(p, lcls, toks, pos, lineno)?;
            let ty = p.expr(src).ty;
            Ok(p.add_expr(ExprKind::Unop { op, src }, ty))
        }
        "cast" => {
            let tyname = expect_atom(toks, pos, lineno)?;
            let to = parse_ty(&tyname)
                .ok_or_else(|| err(ErrCode::E0002, lineno, "unknown cast type"))?;
            let src = parse_expr(p, lcls, toks, pos, lineno)?;
            Ok(p.add_expr(ExprKind::Cast { src, to }, to))
        }
        "comma" => {
            let effect = parse_expr(p, lcls, toks, pos, lineno)?;
            let value = parse_expr(p, lcls, toks, pos, lineno)?;
            let ty = p.expr(value).ty;
            Ok(p.add_expr(ExprKind::Comma { effect, value }, ty))
        }
        "boundscheck" => {
            let index = parse_expr(p, lcls, toks, pos, lineno)?;
            let length = parse_expr(p, lcls, toks, pos, lineno)?;
            Ok(p.add_expr(ExprKind::BoundsCheck { index, length }, Ty::Void))
        }
        "call" | "callpure" | "callalloc" | "calluser" | "asynccall" => {
            let name = expect_atom(toks, pos, lineno)?;
            let mut args = Vec::new();
            while !matches!(toks.get(*pos), Some(Tok::Close) | None) {
                args.push(parse_expr(p, lcls, toks, pos, lineno)?);
            }
            let callee = match head {
                "callpure" => Callee::Helper { name, pure_result: true, allocator: false },
                "callalloc" => Callee::Helper { name, pure_result: false, allocator: true },
                "calluser" => Callee::User(name),
                _ => Callee::Helper { name, pure_result: false, allocator: false },
            };
            let is_async = head == "asynccall";
            Ok(p.add_expr(ExprKind::Call { callee, args, is_async }, Ty::Long))
        }
        "store" => {
            let name = expect_atom(toks, pos, lineno)?;
            let lcl = *lcls
                .get(&name)
                .ok_or_else(|| err(ErrCode::E0003, lineno, format!("unknown local '{name}'")))?;
            let value = parse_expr(p, lcls, toks, pos, lineno)?;
            Ok(p.add_expr(ExprKind::StoreLcl { lcl, value }, Ty::Void))
        }
        "ret" => {
            let value = if matches!(toks.get(*pos), Some(Tok::Close)) {
                None
            } else {
                Some(parse_expr(p, lcls, toks, pos, lineno)?)
            };
            Ok(p.add_expr(ExprKind::Ret { value }, Ty::Void))
        }
        "nocse" | "makecse" | "amode" => {
            let inner = parse_expr(p, lcls, toks, pos, lineno)?;
            let f = match head {
                "nocse" => flags::DONT_CSE,
                "makecse" => flags::MAKE_CSE,
                _ => flags::ADDR_MODE,
            };
            p.expr_mut(inner).flags |= f;
            Ok(inner)
        }
        other => Err(err(ErrCode::E0002, lineno, format!("unknown operator '{other}'"))),
    }
}

fn expect_atom(toks: &[Tok], pos: &mut usize, lineno: usize) -> CseResult<String> {
    match toks.get(*pos) {
        Some(Tok::Atom(a)) => {
            *pos += 1;
            Ok(a.clone())
        }
        _ => Err(err(ErrCode::E0001, lineno, "expected a name")),
    }
}
