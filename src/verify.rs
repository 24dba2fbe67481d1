//! Structural verifier for the lowered translation unit.
//!
//! Checks the invariants later phases rely on: external-symbol aliases
//! never chain, generic procedures have candidates, operator nodes have
//! homogeneous operand base types, module dependency lists cover every
//! imported module, and allocatable locals are released by a single
//! implicit deallocation at the end of their unit's body.

use std::collections::BTreeSet;

use crate::asr::{
    expr_type, Arena, CaseStmt, Expr, Intent, Module, ScopeId, Stmt, Storage, Symbol, SymbolId,
    TranslationUnit, UnitItem,
};
use crate::ast::Location;
use crate::errors::{ErrorKind, Result, SemanticError};

fn verr(message: String, loc: Location) -> SemanticError {
    SemanticError::new(ErrorKind::Verifier, message, loc)
}

pub fn verify(arena: &Arena, unit: &TranslationUnit) -> Result<()> {
    for (_, sym) in arena.symbols() {
        match sym {
            Symbol::External(e) => {
                if matches!(arena.symbol(e.external), Symbol::External(_)) {
                    return Err(verr(
                        format!("external symbol '{}' points at another external symbol", e.name),
                        e.loc,
                    ));
                }
            }
            Symbol::GenericProcedure(g) => {
                if g.procs.is_empty() {
                    return Err(verr(
                        format!("generic procedure '{}' has no candidates", g.name),
                        g.loc,
                    ));
                }
            }
            Symbol::Module(m) => verify_module_dependencies(arena, m)?,
            Symbol::Program(p) => {
                verify_stmts(arena, &p.body)?;
                verify_allocatable_tail(arena, p.symtab, &p.body, &p.name, p.loc)?;
            }
            Symbol::Subroutine(s) => {
                verify_stmts(arena, &s.body)?;
                if !s.body.is_empty() {
                    verify_allocatable_tail(arena, s.symtab, &s.body, &s.name, s.loc)?;
                }
            }
            Symbol::Function(f) => {
                verify_stmts(arena, &f.body)?;
                if !f.body.is_empty() {
                    verify_allocatable_tail(arena, f.symtab, &f.body, &f.name, f.loc)?;
                }
            }
            _ => {}
        }
    }
    for item in &unit.items {
        match item {
            UnitItem::Stmt(s) => verify_stmt(arena, s)?,
            UnitItem::Expr(e) => verify_expr(arena, e)?,
        }
    }
    Ok(())
}

/// A module depends on every module it holds an external symbol from.
fn verify_module_dependencies(arena: &Arena, m: &Module) -> Result<()> {
    for (sid, scope) in arena.scopes() {
        if !arena.scope_contains(m.symtab, sid) {
            continue;
        }
        for &symid in scope.symbols.values() {
            if let Symbol::External(e) = arena.symbol(symid) {
                if !m.dependencies.contains(&e.module_name) {
                    return Err(verr(
                        format!(
                            "module '{}' is missing dependency '{}'",
                            m.name, e.module_name
                        ),
                        m.loc,
                    ));
                }
            }
        }
    }
    Ok(())
}

fn allocatable_locals(arena: &Arena, symtab: ScopeId) -> BTreeSet<SymbolId> {
    let mut out = BTreeSet::new();
    for &id in arena.scope(symtab).symbols.values() {
        if let Symbol::Variable(v) = arena.symbol(id) {
            if v.storage == Storage::Allocatable && v.intent == Intent::Local {
                out.insert(id);
            }
        }
    }
    out
}

fn verify_allocatable_tail(
    arena: &Arena,
    symtab: ScopeId,
    body: &[Stmt],
    name: &str,
    loc: Location,
) -> Result<()> {
    let expected = allocatable_locals(arena, symtab);
    if expected.is_empty() {
        return Ok(());
    }
    match body.last() {
        Some(Stmt::ImplicitDeallocate { syms, .. }) => {
            let got: BTreeSet<SymbolId> = syms.iter().copied().collect();
            if got != expected {
                return Err(verr(
                    format!(
                        "implicit deallocation at the end of '{}' does not list its allocatable locals",
                        name
                    ),
                    loc,
                ));
            }
            Ok(())
        }
        _ => Err(verr(
            format!("body of '{}' does not end in an implicit deallocation", name),
            loc,
        )),
    }
}

fn verify_stmts(arena: &Arena, stmts: &[Stmt]) -> Result<()> {
    for s in stmts {
        verify_stmt(arena, s)?;
    }
    Ok(())
}

fn verify_stmt(arena: &Arena, s: &Stmt) -> Result<()> {
    match s {
        Stmt::Assignment { target, value, .. } | Stmt::Associate { target, value, .. } => {
            verify_expr(arena, target)?;
            verify_expr(arena, value)
        }
        Stmt::SubroutineCall { args, .. } => {
            for a in args {
                verify_expr(arena, a)?;
            }
            Ok(())
        }
        Stmt::Allocate { args, stat, .. } => {
            for a in args {
                for d in &a.dims {
                    verify_opt_expr(arena, d.start.as_ref())?;
                    verify_opt_expr(arena, d.end.as_ref())?;
                }
            }
            verify_opt_expr(arena, stat.as_ref())
        }
        Stmt::ExplicitDeallocate { .. } | Stmt::ImplicitDeallocate { .. } => Ok(()),
        Stmt::If {
            test, body, orelse, ..
        } => {
            verify_expr(arena, test)?;
            verify_stmts(arena, body)?;
            verify_stmts(arena, orelse)
        }
        Stmt::WhileLoop { test, body, .. } => {
            verify_expr(arena, test)?;
            verify_stmts(arena, body)
        }
        Stmt::DoLoop { head, body, .. } | Stmt::DoConcurrentLoop { head, body, .. } => {
            verify_expr(arena, &head.var)?;
            verify_expr(arena, &head.start)?;
            verify_expr(arena, &head.end)?;
            verify_opt_expr(arena, head.increment.as_ref())?;
            verify_stmts(arena, body)
        }
        Stmt::Select {
            test,
            cases,
            default,
            ..
        } => {
            verify_expr(arena, test)?;
            for c in cases {
                match c {
                    CaseStmt::Values { tests, body, .. } => {
                        for t in tests {
                            verify_expr(arena, t)?;
                        }
                        verify_stmts(arena, body)?;
                    }
                    CaseStmt::Range {
                        start, end, body, ..
                    } => {
                        verify_opt_expr(arena, start.as_ref())?;
                        verify_opt_expr(arena, end.as_ref())?;
                        verify_stmts(arena, body)?;
                    }
                }
            }
            verify_stmts(arena, default)
        }
        Stmt::Return { .. } | Stmt::Exit { .. } | Stmt::Cycle { .. } => Ok(()),
        Stmt::Stop { code, .. } | Stmt::ErrorStop { code, .. } => {
            verify_opt_expr(arena, code.as_ref())
        }
        Stmt::Print { values, .. } => {
            for v in values {
                verify_expr(arena, v)?;
            }
            Ok(())
        }
        Stmt::Write {
            unit,
            fmt,
            iomsg,
            iostat,
            id,
            values,
            ..
        }
        | Stmt::Read {
            unit,
            fmt,
            iomsg,
            iostat,
            id,
            values,
            ..
        } => {
            verify_opt_expr(arena, unit.as_ref())?;
            verify_opt_expr(arena, fmt.as_ref())?;
            verify_opt_expr(arena, iomsg.as_ref())?;
            verify_opt_expr(arena, iostat.as_ref())?;
            verify_opt_expr(arena, id.as_ref())?;
            for v in values {
                verify_expr(arena, v)?;
            }
            Ok(())
        }
        Stmt::Open {
            unit, file, status, ..
        } => {
            verify_expr(arena, unit)?;
            verify_opt_expr(arena, file.as_ref())?;
            verify_opt_expr(arena, status.as_ref())
        }
        Stmt::Close {
            unit,
            iostat,
            iomsg,
            err,
            status,
            ..
        } => {
            verify_expr(arena, unit)?;
            verify_opt_expr(arena, iostat.as_ref())?;
            verify_opt_expr(arena, iomsg.as_ref())?;
            verify_opt_expr(arena, err.as_ref())?;
            verify_opt_expr(arena, status.as_ref())
        }
    }
}

fn verify_opt_expr(arena: &Arena, e: Option<&Expr>) -> Result<()> {
    match e {
        Some(e) => verify_expr(arena, e),
        None => Ok(()),
    }
}

fn verify_expr(arena: &Arena, e: &Expr) -> Result<()> {
    match e {
        Expr::BinOp {
            left, right, loc, ..
        }
        | Expr::Compare {
            left, right, loc, ..
        }
        | Expr::BoolOp {
            left, right, loc, ..
        }
        | Expr::StrOp {
            left, right, loc, ..
        } => {
            verify_expr(arena, left)?;
            verify_expr(arena, right)?;
            let lt = expr_type(arena, left);
            let rt = expr_type(arena, right);
            if lt.base() != rt.base() {
                return Err(verr(
                    format!(
                        "operator node has heterogeneous operand types ({:?} vs {:?})",
                        lt.base(),
                        rt.base()
                    ),
                    *loc,
                ));
            }
            Ok(())
        }
        Expr::UnaryOp { operand, .. } => verify_expr(arena, operand),
        Expr::ImplicitCast { arg, .. } => verify_expr(arena, arg),
        Expr::DerivedRef { base, .. } => verify_expr(arena, base),
        Expr::ConstantComplex { re, im, .. } => {
            verify_expr(arena, re)?;
            verify_expr(arena, im)
        }
        Expr::ConstantArray { elems, .. } => {
            for el in elems {
                verify_expr(arena, el)?;
            }
            Ok(())
        }
        Expr::FunctionCall { args, .. } => {
            for a in args {
                verify_expr(arena, a)?;
            }
            Ok(())
        }
        Expr::ArrayRef { args, .. } => {
            for a in args {
                verify_opt_expr(arena, a.left.as_ref())?;
                verify_opt_expr(arena, a.right.as_ref())?;
                verify_opt_expr(arena, a.step.as_ref())?;
            }
            Ok(())
        }
        Expr::Var { .. }
        | Expr::ConstantInteger { .. }
        | Expr::ConstantReal { .. }
        | Expr::ConstantString { .. }
        | Expr::ConstantLogical { .. } => Ok(()),
    }
}
