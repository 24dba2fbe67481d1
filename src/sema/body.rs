//! Pass 2: body lowering.
//!
//! Re-enters the scopes built by pass 1 and lowers every executable
//! statement and expression into typed IR, attaching procedure and
//! program bodies to their declarations. This pass resolves calls
//! (including generic overloads and type-bound procedures), lazily
//! imports intrinsics, and inserts the implicit deallocations required
//! for allocatables.

use crate::asr::{
    expr_type, Abi, Access, AllocArg, Arena, ArrayIndex, CaseStmt, Deftype, Dimension,
    DoLoopHead, Expr, ExternalSymbol, Function, Intent, Presence, ScopeId, Stmt, Storage,
    Symbol, SymbolId, TranslationUnit, Ttype, TypeBase, UnitItem, Variable,
};
use crate::ast;
use crate::ast::Location;
use crate::errors::{ErrorKind, Result, SemanticError};
use crate::intrinsics::{self, ModuleLoader};

use super::common;

pub struct BodyVisitor<'a> {
    arena: &'a mut Arena,
    loader: &'a mut dyn ModuleLoader,
    current_scope: ScopeId,
    global_scope: ScopeId,
    current_module: Option<SymbolId>,
}

pub fn lower_bodies(
    arena: &mut Arena,
    unit_ast: &ast::TranslationUnit,
    loader: &mut dyn ModuleLoader,
    unit: &mut TranslationUnit,
) -> Result<()> {
    let mut v = BodyVisitor {
        arena,
        loader,
        current_scope: unit.global_scope,
        global_scope: unit.global_scope,
        current_module: None,
    };
    for item in &unit_ast.items {
        match item {
            ast::UnitItem::Module(m) => v.visit_module(m)?,
            ast::UnitItem::Program(p) => v.visit_program(p)?,
            ast::UnitItem::Subroutine(s) => v.visit_subroutine(s)?,
            ast::UnitItem::Function(f) => v.visit_function(f)?,
            ast::UnitItem::Stmt(s) => {
                if let Some(st) = v.lower_stmt(s)? {
                    unit.items.push(UnitItem::Stmt(st));
                }
            }
            ast::UnitItem::Expr(e) => {
                let ex = v.lower_expr(e)?;
                unit.items.push(UnitItem::Expr(ex));
            }
        }
    }
    Ok(())
}

impl<'a> BodyVisitor<'a> {
    fn enter_unit(&mut self, name: &str, loc: Location) -> Result<(SymbolId, ScopeId)> {
        let t = self.arena.get(self.current_scope, name).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::Internal,
                format!("unit '{}' has no symbol-table entry", name),
                loc,
            )
        })?;
        let symtab = match self.arena.symbol(t) {
            Symbol::Module(m) => m.symtab,
            Symbol::Program(p) => p.symtab,
            Symbol::Subroutine(s) => s.symtab,
            Symbol::Function(f) => f.symtab,
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::Internal,
                    format!("'{}' is not a program unit", name),
                    loc,
                ))
            }
        };
        Ok((t, symtab))
    }

    fn visit_module(&mut self, x: &ast::Module) -> Result<()> {
        let (t, symtab) = self.enter_unit(&x.name, x.loc)?;
        let old_scope = self.current_scope;
        self.current_scope = symtab;
        self.current_module = Some(t);
        for u in &x.contains {
            self.visit_program_unit(u)?;
        }
        self.current_scope = old_scope;
        self.current_module = None;
        Ok(())
    }

    fn visit_program(&mut self, x: &ast::Program) -> Result<()> {
        let (t, symtab) = self.enter_unit(&x.name, x.loc)?;
        let old_scope = self.current_scope;
        self.current_scope = symtab;
        let body = self.lower_unit_body(&x.body, x.loc)?;
        if let Symbol::Program(p) = self.arena.symbol_mut(t) {
            p.body = body;
        }
        for u in &x.contains {
            self.visit_program_unit(u)?;
        }
        self.current_scope = old_scope;
        Ok(())
    }

    fn visit_subroutine(&mut self, x: &ast::Subroutine) -> Result<()> {
        let (t, symtab) = self.enter_unit(&x.name, x.loc)?;
        let old_scope = self.current_scope;
        self.current_scope = symtab;
        let body = self.lower_unit_body(&x.body, x.loc)?;
        if let Symbol::Subroutine(s) = self.arena.symbol_mut(t) {
            s.body = body;
        }
        for u in &x.contains {
            self.visit_program_unit(u)?;
        }
        self.current_scope = old_scope;
        Ok(())
    }

    fn visit_function(&mut self, x: &ast::Function) -> Result<()> {
        let (t, symtab) = self.enter_unit(&x.name, x.loc)?;
        let old_scope = self.current_scope;
        self.current_scope = symtab;
        let body = self.lower_unit_body(&x.body, x.loc)?;
        if let Symbol::Function(f) = self.arena.symbol_mut(t) {
            f.body = body;
        }
        for u in &x.contains {
            self.visit_program_unit(u)?;
        }
        self.current_scope = old_scope;
        Ok(())
    }

    fn visit_program_unit(&mut self, u: &ast::ProgramUnit) -> Result<()> {
        match u {
            ast::ProgramUnit::Subroutine(s) => self.visit_subroutine(s),
            ast::ProgramUnit::Function(f) => self.visit_function(f),
        }
    }

    /// The body of a program unit: call sites binding allocatables to
    /// intent(out) formals get a deallocation in front, and locals still
    /// allocatable at scope exit get one at the tail.
    fn lower_unit_body(&mut self, stmts: &[ast::Stmt], loc: Location) -> Result<Vec<Stmt>> {
        let mut body = Vec::with_capacity(stmts.len());
        for s in stmts {
            if let Some(st) = self.lower_stmt(s)? {
                if matches!(st, Stmt::SubroutineCall { .. }) {
                    if let Some(d) = self.implicit_deallocate_for_call(&st) {
                        body.push(d);
                    }
                }
                body.push(st);
            }
        }
        if let Some(d) = self.create_implicit_deallocate(loc) {
            body.push(d);
        }
        Ok(body)
    }

    fn lower_stmts(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<Stmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for s in stmts {
            if let Some(st) = self.lower_stmt(s)? {
                out.push(st);
            }
        }
        Ok(out)
    }

    fn create_implicit_deallocate(&self, loc: Location) -> Option<Stmt> {
        let mut del_syms = Vec::new();
        for (_, &id) in &self.arena.scope(self.current_scope).symbols {
            if let Symbol::Variable(v) = self.arena.symbol(id) {
                if v.storage == Storage::Allocatable && v.intent == Intent::Local {
                    del_syms.push(id);
                }
            }
        }
        if del_syms.is_empty() {
            None
        } else {
            Some(Stmt::ImplicitDeallocate {
                syms: del_syms,
                loc,
            })
        }
    }

    /// An actual argument that is an allocatable variable bound to an
    /// intent(out) formal is deallocated right before the call.
    fn implicit_deallocate_for_call(&self, st: &Stmt) -> Option<Stmt> {
        let Stmt::SubroutineCall { sym, args, loc, .. } = st else {
            return None;
        };
        let formals: Vec<SymbolId> = match self.arena.symbol(self.arena.past_external(*sym)) {
            Symbol::Subroutine(sub) => sub.args.clone(),
            _ => return None,
        };
        let mut del_syms = Vec::new();
        for (i, a) in args.iter().enumerate() {
            let Expr::Var { sym: actual, .. } = a else {
                continue;
            };
            let Symbol::Variable(var) = self.arena.symbol(self.arena.past_external(*actual))
            else {
                continue;
            };
            if var.storage != Storage::Allocatable {
                continue;
            }
            let Some(&formal) = formals.get(i) else {
                continue;
            };
            if let Symbol::Variable(orig) = self.arena.symbol(self.arena.past_external(formal)) {
                if orig.intent == Intent::Out {
                    del_syms.push(*actual);
                }
            }
        }
        if del_syms.is_empty() {
            None
        } else {
            Some(Stmt::ImplicitDeallocate {
                syms: del_syms,
                loc: *loc,
            })
        }
    }

    fn lower_stmt(&mut self, s: &ast::Stmt) -> Result<Option<Stmt>> {
        match s {
            ast::Stmt::Assignment { target, value, loc } => {
                self.lower_assignment(target, value, *loc).map(Some)
            }
            ast::Stmt::Associate { target, value, loc } => {
                self.lower_associate(target, value, *loc).map(Some)
            }
            ast::Stmt::SubroutineCall {
                name,
                base,
                args,
                loc,
            } => self
                .lower_subroutine_call(name, base.as_deref(), args, *loc)
                .map(Some),
            ast::Stmt::Allocate {
                args,
                keywords,
                loc,
            } => self.lower_allocate(args, keywords, *loc).map(Some),
            ast::Stmt::Deallocate { args, loc } => self.lower_deallocate(args, *loc).map(Some),
            ast::Stmt::If {
                test,
                body,
                orelse,
                loc,
            } => {
                let test = self.lower_expr(test)?;
                let body = self.lower_stmts(body)?;
                let orelse = self.lower_stmts(orelse)?;
                Ok(Some(Stmt::If {
                    test,
                    body,
                    orelse,
                    loc: *loc,
                }))
            }
            ast::Stmt::WhileLoop { test, body, loc } => {
                let test = self.lower_expr(test)?;
                let body = self.lower_stmts(body)?;
                Ok(Some(Stmt::WhileLoop {
                    test,
                    body,
                    loc: *loc,
                }))
            }
            ast::Stmt::DoLoop {
                var,
                start,
                end,
                increment,
                body,
                loc,
            } => {
                let head = self.lower_loop_head(
                    var.as_deref(),
                    start.as_ref(),
                    end.as_ref(),
                    increment.as_ref(),
                    *loc,
                )?;
                let body = self.lower_stmts(body)?;
                Ok(Some(Stmt::DoLoop {
                    head,
                    body,
                    loc: *loc,
                }))
            }
            ast::Stmt::DoConcurrentLoop {
                controls,
                body,
                loc,
            } => {
                if controls.len() != 1 {
                    return Err(SemanticError::new(
                        ErrorKind::Unsupported,
                        "Do concurrent: exactly one control statement is required for now",
                        *loc,
                    ));
                }
                let c = &controls[0];
                let head = self.lower_loop_head(
                    c.var.as_deref(),
                    c.start.as_ref(),
                    c.end.as_ref(),
                    c.increment.as_ref(),
                    *loc,
                )?;
                let body = self.lower_stmts(body)?;
                Ok(Some(Stmt::DoConcurrentLoop {
                    head,
                    body,
                    loc: *loc,
                }))
            }
            ast::Stmt::Select { test, body, loc } => self.lower_select(test, body, *loc).map(Some),
            ast::Stmt::Return { loc } => Ok(Some(Stmt::Return { loc: *loc })),
            ast::Stmt::Exit { loc } => Ok(Some(Stmt::Exit { loc: *loc })),
            ast::Stmt::Cycle { loc } => Ok(Some(Stmt::Cycle { loc: *loc })),
            // nothing to lower
            ast::Stmt::Continue { .. } => Ok(None),
            ast::Stmt::Stop { code, loc } => {
                let code = self.lower_opt_expr(code.as_ref())?;
                Ok(Some(Stmt::Stop { code, loc: *loc }))
            }
            ast::Stmt::ErrorStop { code, loc } => {
                let code = self.lower_opt_expr(code.as_ref())?;
                Ok(Some(Stmt::ErrorStop { code, loc: *loc }))
            }
            ast::Stmt::Print { values, loc } => {
                let mut vs = Vec::with_capacity(values.len());
                for v in values {
                    vs.push(self.lower_expr(v)?);
                }
                Ok(Some(Stmt::Print {
                    values: vs,
                    loc: *loc,
                }))
            }
            ast::Stmt::Write {
                args,
                kwargs,
                values,
                loc,
            } => self
                .lower_read_write(args, kwargs, values, *loc, true)
                .map(Some),
            ast::Stmt::Read {
                args,
                kwargs,
                values,
                loc,
            } => self
                .lower_read_write(args, kwargs, values, *loc, false)
                .map(Some),
            ast::Stmt::Open {
                label,
                args,
                kwargs,
                loc,
            } => self.lower_open(*label, args, kwargs, *loc).map(Some),
            ast::Stmt::Close {
                label,
                args,
                kwargs,
                loc,
            } => self.lower_close(*label, args, kwargs, *loc).map(Some),
        }
    }

    fn lower_opt_expr(&mut self, e: Option<&ast::Expr>) -> Result<Option<Expr>> {
        match e {
            Some(e) => Ok(Some(self.lower_expr(e)?)),
            None => Ok(None),
        }
    }

    fn lower_assignment(
        &mut self,
        target: &ast::Expr,
        value: &ast::Expr,
        loc: Location,
    ) -> Result<Stmt> {
        let target = self.lower_expr(target)?;
        let target_type = expr_type(self.arena, &target);
        if !matches!(
            target,
            Expr::Var { .. } | Expr::ArrayRef { .. } | Expr::DerivedRef { .. }
        ) {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "The LHS of assignment can only be a variable or an array reference",
                loc,
            ));
        }
        let mut value = self.lower_expr(value)?;
        let value_type = expr_type(self.arena, &value);
        if matches!(target, Expr::Var { .. })
            && !target_type.is_array()
            && matches!(value, Expr::ConstantArray { .. })
        {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "ArrayInitalizer expressions can only be assigned array references",
                loc,
            ));
        }
        super::cast::set_converted_value(loc, &mut value, &value_type, &target_type)?;
        Ok(Stmt::Assignment { target, value, loc })
    }

    fn lower_associate(
        &mut self,
        target: &ast::Expr,
        value: &ast::Expr,
        loc: Location,
    ) -> Result<Stmt> {
        let target = self.lower_expr(target)?;
        let value = self.lower_expr(value)?;
        let target_type = expr_type(self.arena, &target);
        let value_type = expr_type(self.arena, &value);
        if !(target_type.is_pointer() && !value_type.is_pointer()) {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "Only a pointer variable can be associated with a non-pointer variable.",
                loc,
            ));
        }
        if target_type.type_index() % 6 != value_type.type_index() % 6 {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "Pointer and target must have the same base type",
                loc,
            ));
        }
        Ok(Stmt::Associate { target, value, loc })
    }

    fn lower_subroutine_call(
        &mut self,
        name: &str,
        base: Option<&str>,
        args: &[ast::FnArg],
        loc: Location,
    ) -> Result<Stmt> {
        let original_sym = if let Some(obj) = base {
            self.resolve_class_proc(name, obj, loc)?
        } else {
            self.arena
                .resolve(self.current_scope, name)
                .ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::NameResolution,
                        format!("Subroutine '{}' not declared", name),
                        loc,
                    )
                })?
        };
        let args = self.lower_expr_list(args, loc)?;
        enum Callee {
            Direct,
            Generic,
            Class(SymbolId),
            External {
                under: SymbolId,
                alias_name: String,
                alias_module: String,
            },
        }
        let callee = match self.arena.symbol(original_sym) {
            Symbol::Subroutine(_) => Callee::Direct,
            Symbol::GenericProcedure(_) => Callee::Generic,
            Symbol::ClassProcedure(cp) => Callee::Class(cp.proc),
            Symbol::External(es) => Callee::External {
                under: es.external,
                alias_name: es.name.clone(),
                alias_module: es.module_name.clone(),
            },
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::Unsupported,
                    "Symbol type not supported",
                    loc,
                ))
            }
        };
        let (final_sym, original) = match callee {
            Callee::Direct => (original_sym, None),
            Callee::Generic => {
                let idx = self.select_generic_procedure(&args, original_sym, loc)?;
                let p = match self.arena.symbol(original_sym) {
                    Symbol::GenericProcedure(g) => g.procs[idx],
                    _ => unreachable!(),
                };
                (p, Some(original_sym))
            }
            Callee::Class(proc) => (proc, Some(original_sym)),
            Callee::External {
                under,
                alias_name,
                alias_module,
            } => match self.arena.symbol(under) {
                Symbol::Subroutine(_) => (original_sym, None),
                Symbol::GenericProcedure(_) => {
                    let idx = self.select_generic_procedure(&args, under, loc)?;
                    let g_proc = match self.arena.symbol(under) {
                        Symbol::GenericProcedure(g) => g.procs[idx],
                        _ => unreachable!(),
                    };
                    let g_proc = self.arena.past_external(g_proc);
                    if !matches!(self.arena.symbol(g_proc), Symbol::Subroutine(_)) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "ExternalSymbol must point to a Subroutine",
                            loc,
                        ));
                    }
                    // the per-call alias is mangled as
                    // genericLocalName@chosenProcedureName and memoised
                    let proc_name = self.arena.symbol_name(g_proc).to_string();
                    let local_sym = format!("{}@{}", alias_name, proc_name);
                    let final_sym =
                        if let Some(existing) = self.arena.get(self.current_scope, &local_sym) {
                            existing
                        } else {
                            let id = self.arena.alloc(Symbol::External(ExternalSymbol {
                                name: local_sym.clone(),
                                scope: self.current_scope,
                                external: g_proc,
                                module_name: alias_module,
                                original_name: proc_name,
                                access: Access::Private,
                                loc,
                            }));
                            self.arena.install(self.current_scope, &local_sym, id);
                            id
                        };
                    (final_sym, Some(original_sym))
                }
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        "ExternalSymbol must point to a Subroutine",
                        loc,
                    ))
                }
            },
        };
        Ok(Stmt::SubroutineCall {
            sym: final_sym,
            original,
            args,
            loc,
        })
    }

    /// Overload resolution: first candidate whose formal parameter types
    /// equal the argument types pairwise, in declaration order.
    fn select_generic_procedure(
        &self,
        args: &[Expr],
        gp: SymbolId,
        loc: Location,
    ) -> Result<usize> {
        let procs = match self.arena.symbol(gp) {
            Symbol::GenericProcedure(p) => p.procs.clone(),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::Internal,
                    "overload resolution on a non-generic symbol",
                    loc,
                ))
            }
        };
        for (i, proc) in procs.iter().enumerate() {
            let formals = match self.arena.symbol(self.arena.past_external(*proc)) {
                Symbol::Subroutine(sub) => &sub.args,
                Symbol::Function(f) => &f.args,
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::Unsupported,
                        "Only Subroutine supported in generic procedure",
                        loc,
                    ))
                }
            };
            if self.argument_types_match(args, formals) {
                log::debug!(
                    "generic '{}' resolved to candidate {}",
                    self.arena.symbol_name(gp),
                    i
                );
                return Ok(i);
            }
        }
        Err(SemanticError::new(
            ErrorKind::TypeMismatch,
            "Arguments do not match",
            loc,
        ))
    }

    fn argument_types_match(&self, args: &[Expr], formals: &[SymbolId]) -> bool {
        if args.len() != formals.len() {
            return false;
        }
        for (a, f) in args.iter().zip(formals) {
            let actual = expr_type(self.arena, a);
            let formal = match self.arena.symbol(self.arena.past_external(*f)) {
                Symbol::Variable(v) => &v.ty,
                _ => return false,
            };
            if !common::types_equal(&actual, formal) {
                return false;
            }
        }
        true
    }

    /// `call obj%method(...)`: look the bound procedure up in the member
    /// scope of the object's derived type.
    fn resolve_class_proc(&self, proc: &str, obj: &str, loc: Location) -> Result<SymbolId> {
        let v = self.arena.resolve(self.current_scope, obj).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::NameResolution,
                format!("Variable '{}' not declared", obj),
                loc,
            )
        })?;
        let var_ty = match self.arena.symbol(self.arena.past_external(v)) {
            Symbol::Variable(var) => var.ty.clone(),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    format!("Variable '{}' is not a derived type", obj),
                    loc,
                ))
            }
        };
        let dt_sym = match var_ty {
            Ttype::Derived { derived_type, .. } | Ttype::DerivedPointer { derived_type, .. } => {
                derived_type
            }
            Ttype::Class { class_type, .. } => class_type,
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    format!("Variable '{}' is not a derived type", obj),
                    loc,
                ))
            }
        };
        let dt_decl = self.arena.past_external(dt_sym);
        let member_scope = match self.arena.symbol(dt_decl) {
            Symbol::DerivedType(dt) => dt.symtab,
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NameResolution,
                    format!("'{}' isn't a Derived type.", self.arena.symbol_name(dt_sym)),
                    loc,
                ))
            }
        };
        self.arena.resolve(member_scope, proc).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::NameResolution,
                format!(
                    "Variable '{}' doesn't have any member named, '{}'.",
                    obj, proc
                ),
                loc,
            )
        })
    }

    fn lower_allocate(
        &mut self,
        args: &[ast::FnArg],
        keywords: &[ast::Keyword],
        loc: Location,
    ) -> Result<Stmt> {
        let mut alloc_args = Vec::with_capacity(args.len());
        for a in args {
            let e = a.end.as_ref().ok_or_else(|| {
                SemanticError::new(ErrorKind::Internal, "argument expression missing", loc)
            })?;
            let lowered = self.lower_expr(e)?;
            let Expr::ArrayRef {
                sym,
                args: idx_args,
                loc: aloc,
                ..
            } = lowered
            else {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    "Only an allocatable array can be allocated",
                    loc,
                ));
            };
            if let Symbol::Variable(v) = self.arena.symbol(self.arena.past_external(sym)) {
                if v.storage != Storage::Allocatable {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        "Only an allocatable array can be allocated",
                        loc,
                    ));
                }
            }
            let mut dims = Vec::with_capacity(idx_args.len());
            for ai in idx_args {
                // a dimension without a lower bound starts at 1
                let start = match ai.left {
                    Some(e) => Some(e),
                    None => Some(Expr::ConstantInteger {
                        n: 1,
                        ty: Ttype::integer(4),
                        loc: aloc,
                    }),
                };
                dims.push(Dimension {
                    start,
                    end: ai.right,
                });
            }
            alloc_args.push(AllocArg {
                sym,
                dims,
                loc: aloc,
            });
        }
        if keywords.len() > 1 || (keywords.len() == 1 && keywords[0].arg != "stat") {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "`allocate` statement only accepts one keyword argument, `stat`",
                loc,
            ));
        }
        let stat = match keywords.first() {
            Some(k) => Some(self.lower_expr(&k.value)?),
            None => None,
        };
        Ok(Stmt::Allocate {
            args: alloc_args,
            stat,
            loc,
        })
    }

    fn lower_deallocate(&mut self, args: &[ast::FnArg], loc: Location) -> Result<Stmt> {
        let mut syms = Vec::with_capacity(args.len());
        for a in args {
            let e = a.end.as_ref().ok_or_else(|| {
                SemanticError::new(ErrorKind::Internal, "argument expression missing", loc)
            })?;
            let lowered = self.lower_expr(e)?;
            let Expr::Var { sym, loc: vloc } = lowered else {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    "Only an allocatable variable symbol can be deallocated.",
                    loc,
                ));
            };
            match self.arena.symbol(self.arena.past_external(sym)) {
                Symbol::Variable(v) if v.storage == Storage::Allocatable => syms.push(sym),
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        "Only an allocatable variable symbol can be deallocated.",
                        vloc,
                    ))
                }
            }
        }
        Ok(Stmt::ExplicitDeallocate { syms, loc })
    }

    fn lower_loop_head(
        &mut self,
        var: Option<&str>,
        start: Option<&ast::Expr>,
        end: Option<&ast::Expr>,
        increment: Option<&ast::Expr>,
        loc: Location,
    ) -> Result<DoLoopHead> {
        let var = var.ok_or_else(|| {
            SemanticError::new(
                ErrorKind::Unsupported,
                "Do loop: loop variable is required for now",
                loc,
            )
        })?;
        let var = self.resolve_variable(var, loc)?;
        let start = start.ok_or_else(|| {
            SemanticError::new(
                ErrorKind::Unsupported,
                "Do loop: start condition required for now",
                loc,
            )
        })?;
        let end = end.ok_or_else(|| {
            SemanticError::new(
                ErrorKind::Unsupported,
                "Do loop: end condition required for now",
                loc,
            )
        })?;
        let start = self.lower_expr(start)?;
        let end = self.lower_expr(end)?;
        let increment = self.lower_opt_expr(increment)?;
        Ok(DoLoopHead {
            var,
            start,
            end,
            increment,
            loc,
        })
    }

    fn lower_select(
        &mut self,
        test: &ast::Expr,
        body: &[ast::CaseStmt],
        loc: Location,
    ) -> Result<Stmt> {
        let test = self.lower_expr(test)?;
        self.check_case_integer(&test)?;
        let mut cases = Vec::new();
        let mut default = Vec::new();
        let mut seen_default = false;
        for c in body {
            match c {
                ast::CaseStmt::Default { body, .. } => {
                    if seen_default {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Default case present more than once",
                            loc,
                        ));
                    }
                    seen_default = true;
                    default = self.lower_stmts(body)?;
                }
                ast::CaseStmt::Case {
                    conds,
                    body,
                    loc: cloc,
                } => {
                    if conds.is_empty() {
                        return Err(SemanticError::new(
                            ErrorKind::Unsupported,
                            "Case statement must have at least one condition",
                            *cloc,
                        ));
                    }
                    match &conds[0] {
                        ast::CaseCond::Expr(_) => {
                            let mut tests = Vec::with_capacity(conds.len());
                            for cond in conds {
                                let ast::CaseCond::Expr(e) = cond else {
                                    return Err(SemanticError::new(
                                        ErrorKind::Unsupported,
                                        "Not implemented yet: range expression not in first position",
                                        *cloc,
                                    ));
                                };
                                let t = self.lower_expr(e)?;
                                self.check_case_integer(&t)?;
                                tests.push(t);
                            }
                            let body = self.lower_stmts(body)?;
                            cases.push(CaseStmt::Values {
                                tests,
                                body,
                                loc: *cloc,
                            });
                        }
                        ast::CaseCond::Range(s, e) => {
                            if conds.len() != 1 {
                                return Err(SemanticError::new(
                                    ErrorKind::Unsupported,
                                    "Not implemented: more than one range condition",
                                    *cloc,
                                ));
                            }
                            let start = self.lower_opt_expr(s.as_ref())?;
                            let end = self.lower_opt_expr(e.as_ref())?;
                            if let Some(b) = &start {
                                self.check_case_integer(b)?;
                            }
                            if let Some(b) = &end {
                                self.check_case_integer(b)?;
                            }
                            let body = self.lower_stmts(body)?;
                            cases.push(CaseStmt::Range {
                                start,
                                end,
                                body,
                                loc: *cloc,
                            });
                        }
                    }
                }
            }
        }
        Ok(Stmt::Select {
            test,
            cases,
            default,
            loc,
        })
    }

    fn check_case_integer(&self, e: &Expr) -> Result<()> {
        if expr_type(self.arena, e).base() != TypeBase::Integer {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "Expression in Case selector can only be an Integer",
                e.loc(),
            ));
        }
        Ok(())
    }

    fn is_integer(&self, e: &Expr) -> bool {
        expr_type(self.arena, e).base() == TypeBase::Integer
    }

    fn is_character(&self, e: &Expr) -> bool {
        expr_type(self.arena, e).base() == TypeBase::Character
    }

    fn lower_read_write(
        &mut self,
        args: &[ast::ArgStar],
        kwargs: &[ast::Keyword],
        values: &[ast::Expr],
        loc: Location,
        is_write: bool,
    ) -> Result<Stmt> {
        if args.len() > 2 {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "Number of arguments cannot be more than 2 in Read/Write statement.",
                loc,
            ));
        }
        let mut unit = match args.first().and_then(|a| a.value.as_ref()) {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };
        let mut fmt = match args.get(1).and_then(|a| a.value.as_ref()) {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };
        let mut iomsg = None;
        let mut iostat = None;
        let mut id = None;
        for kw in kwargs {
            match kw.arg.as_str() {
                "unit" => {
                    if unit.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `unit` found, `unit` has already been specified via argument or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !self.is_integer(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`unit` must be of type, Integer or IntegerPointer",
                            kw.loc,
                        ));
                    }
                    unit = Some(e);
                }
                "fmt" => {
                    if fmt.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `fmt` found, `fmt` has already been specified via argument or keyword arguments",
                            kw.loc,
                        ));
                    }
                    fmt = Some(self.lower_expr(&kw.value)?);
                }
                "iostat" => {
                    if iostat.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `iostat` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !matches!(e, Expr::Var { .. }) || !self.is_integer(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`iostat` must be of type, Integer or IntegerPointer",
                            kw.loc,
                        ));
                    }
                    iostat = Some(e);
                }
                "iomsg" => {
                    if iomsg.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `iomsg` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !matches!(e, Expr::Var { .. }) || !self.is_character(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`iomsg` must be of type, Character or CharacterPointer",
                            kw.loc,
                        ));
                    }
                    iomsg = Some(e);
                }
                "id" => {
                    if id.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `id` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !self.is_character(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`status` must be of type, Character or CharacterPointer",
                            kw.loc,
                        ));
                    }
                    id = Some(e);
                }
                _ => {}
            }
        }
        if unit.is_none() && args.is_empty() {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "`unit` must be specified either in arguments or keyword arguments.",
                loc,
            ));
        }
        if fmt.is_none() && args.len() < 2 {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "`fmt` must be specified either in arguments or keyword arguments.",
                loc,
            ));
        }
        let mut vs = Vec::with_capacity(values.len());
        for v in values {
            vs.push(self.lower_expr(v)?);
        }
        Ok(if is_write {
            Stmt::Write {
                unit,
                fmt,
                iomsg,
                iostat,
                id,
                values: vs,
                loc,
            }
        } else {
            Stmt::Read {
                unit,
                fmt,
                iomsg,
                iostat,
                id,
                values: vs,
                loc,
            }
        })
    }

    fn lower_open(
        &mut self,
        label: i64,
        args: &[ast::Expr],
        kwargs: &[ast::Keyword],
        loc: Location,
    ) -> Result<Stmt> {
        if args.len() > 1 {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "Number of arguments cannot be more than 1 in Open statement.",
                loc,
            ));
        }
        let mut newunit = match args.first() {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };
        let mut filename = None;
        let mut status = None;
        for kw in kwargs {
            match kw.arg.as_str() {
                "newunit" | "unit" => {
                    if newunit.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `unit` found, `unit` has already been specified via argument or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if (kw.arg == "newunit" && !matches!(e, Expr::Var { .. }))
                        || !self.is_integer(&e)
                    {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`newunit`/`unit` must be a variable of type, Integer or IntegerPointer",
                            kw.loc,
                        ));
                    }
                    newunit = Some(e);
                }
                "file" => {
                    if filename.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `file` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !self.is_character(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`file` must be of type, Character or CharacterPointer",
                            kw.loc,
                        ));
                    }
                    filename = Some(e);
                }
                "status" => {
                    if status.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `status` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !self.is_character(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`status` must be of type, Character or CharacterPointer",
                            kw.loc,
                        ));
                    }
                    status = Some(e);
                }
                _ => {}
            }
        }
        let unit = newunit.ok_or_else(|| {
            SemanticError::new(
                ErrorKind::Unsupported,
                "`newunit` or `unit` must be specified either in argument or keyword arguments.",
                loc,
            )
        })?;
        Ok(Stmt::Open {
            label,
            unit,
            file: filename,
            status,
            loc,
        })
    }

    fn lower_close(
        &mut self,
        label: i64,
        args: &[ast::Expr],
        kwargs: &[ast::Keyword],
        loc: Location,
    ) -> Result<Stmt> {
        if args.len() > 1 {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "Number of arguments cannot be more than 1 in Close statement.",
                loc,
            ));
        }
        let mut unit = match args.first() {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };
        let mut iostat = None;
        let mut iomsg = None;
        let mut err = None;
        let mut status = None;
        for kw in kwargs {
            match kw.arg.as_str() {
                "unit" => {
                    if unit.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `unit` found, `unit` has already been specified via argument or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !self.is_integer(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`unit` must be of type, Integer or IntegerPointer",
                            kw.loc,
                        ));
                    }
                    unit = Some(e);
                }
                "iostat" => {
                    if iostat.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `iostat` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !matches!(e, Expr::Var { .. }) || !self.is_integer(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`iostat` must be a variable of type, Integer or IntegerPointer",
                            kw.loc,
                        ));
                    }
                    iostat = Some(e);
                }
                "iomsg" => {
                    if iomsg.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `iomsg` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !matches!(e, Expr::Var { .. }) || !self.is_character(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`iomsg` must be of type, Character or CharacterPointer",
                            kw.loc,
                        ));
                    }
                    iomsg = Some(e);
                }
                "status" => {
                    if status.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `status` found, unit has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if !self.is_character(&e) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`status` must be of type, Character or CharacterPointer",
                            kw.loc,
                        ));
                    }
                    status = Some(e);
                }
                "err" => {
                    if err.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::Redeclaration,
                            "Duplicate value of `err` found, `err` has already been specified via arguments or keyword arguments",
                            kw.loc,
                        ));
                    }
                    if !matches!(kw.value, ast::Expr::Num { .. }) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`err` must be a literal integer",
                            kw.loc,
                        ));
                    }
                    err = Some(self.lower_expr(&kw.value)?);
                }
                _ => {}
            }
        }
        let unit = unit.ok_or_else(|| {
            SemanticError::new(
                ErrorKind::Unsupported,
                "`newunit` or `unit` must be specified either in argument or keyword arguments.",
                loc,
            )
        })?;
        Ok(Stmt::Close {
            label,
            unit,
            iostat,
            iomsg,
            err,
            status,
            loc,
        })
    }

    fn resolve_variable(&self, id: &str, loc: Location) -> Result<Expr> {
        let sym = self.arena.resolve(self.current_scope, id).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::NameResolution,
                format!("Variable '{}' not declared", id),
                loc,
            )
        })?;
        Ok(Expr::Var { sym, loc })
    }

    fn lower_expr_list(&mut self, args: &[ast::FnArg], loc: Location) -> Result<Vec<Expr>> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            let e = a.end.as_ref().ok_or_else(|| {
                SemanticError::new(ErrorKind::Internal, "argument expression missing", loc)
            })?;
            out.push(self.lower_expr(e)?);
        }
        Ok(out)
    }

    fn lower_expr(&mut self, e: &ast::Expr) -> Result<Expr> {
        match e {
            ast::Expr::Num { n, loc } => Ok(common::integer_constant(*n, *loc)),
            ast::Expr::Real { n, loc } => Ok(common::real_constant(n, *loc)),
            ast::Expr::Str { s, loc } => Ok(common::string_constant(s, *loc)),
            ast::Expr::Logical { b, loc } => Ok(common::logical_constant(*b, *loc)),
            ast::Expr::Complex { re, im, loc } => {
                let re = self.lower_expr(re)?;
                let im = self.lower_expr(im)?;
                Ok(common::complex_constant(self.arena, re, im, *loc))
            }
            ast::Expr::BinOp {
                op,
                left,
                right,
                loc,
            } => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                common::make_binop(self.arena, *loc, *op, l, r)
            }
            ast::Expr::BoolOp {
                op,
                left,
                right,
                loc,
            } => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                common::make_boolop(self.arena, *loc, *op, l, r)
            }
            ast::Expr::Compare {
                op,
                left,
                right,
                loc,
            } => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                common::make_compare(self.arena, *loc, *op, l, r)
            }
            ast::Expr::StrOp {
                op,
                left,
                right,
                loc,
            } => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                common::make_strop(self.arena, *loc, *op, l, r)
            }
            ast::Expr::UnaryOp { op, operand, loc } => {
                let o = self.lower_expr(operand)?;
                common::make_unaryop(self.arena, *loc, *op, o)
            }
            ast::Expr::Parenthesis { operand, .. } => self.lower_expr(operand),
            ast::Expr::ArrayInitializer { args, loc } => self.lower_array_initializer(args, *loc),
            ast::Expr::Name { id, members, loc } => self.lower_name(id, members, *loc),
            ast::Expr::FuncCallOrArray { func, args, loc } => {
                self.lower_func_call_or_array(func, args, *loc)
            }
        }
    }

    fn lower_array_initializer(&mut self, args: &[ast::Expr], loc: Location) -> Result<Expr> {
        let mut elems = Vec::with_capacity(args.len());
        let mut ty: Option<Ttype> = None;
        for a in args {
            let e = self.lower_expr(a)?;
            let et = expr_type(self.arena, &e);
            match &ty {
                None => ty = Some(et),
                Some(t) => {
                    if t.type_index() != et.type_index() {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "Type mismatch in array initializer",
                            loc,
                        ));
                    }
                }
            }
            elems.push(e);
        }
        Ok(Expr::ConstantArray {
            elems,
            ty: ty.unwrap_or_else(|| Ttype::integer(4)),
            loc,
        })
    }

    /// A bare name resolves to a variable reference; a qualified name
    /// walks the derived-type member scopes left to right.
    fn lower_name(&mut self, id: &str, members: &[String], loc: Location) -> Result<Expr> {
        if members.is_empty() {
            return self.resolve_variable(id, loc);
        }
        let mut expr = self.resolve_variable(id, loc)?;
        let mut base_name = id.to_string();
        for m in members {
            expr = self.derived_member_ref(expr, &base_name, m, loc)?;
            base_name = m.clone();
        }
        Ok(expr)
    }

    fn derived_member_ref(
        &mut self,
        base: Expr,
        base_name: &str,
        member_name: &str,
        loc: Location,
    ) -> Result<Expr> {
        let base_ty = expr_type(self.arena, &base);
        // a cross-module derived type on the LHS gets its local alias
        // before the member scope is entered
        let base_ty = self.localize_derived_type(base_ty, loc)?;
        let dt_sym = match base_ty {
            Ttype::Derived { derived_type, .. } | Ttype::DerivedPointer { derived_type, .. } => {
                derived_type
            }
            Ttype::Class { class_type, .. } => class_type,
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    format!("Variable '{}' is not a derived type", base_name),
                    loc,
                ))
            }
        };
        let dt_decl = self.arena.past_external(dt_sym);
        let member_scope = match self.arena.symbol(dt_decl) {
            Symbol::DerivedType(dt) => dt.symtab,
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NameResolution,
                    format!("'{}' isn't a Derived type.", self.arena.symbol_name(dt_sym)),
                    loc,
                ))
            }
        };
        let member = self.arena.resolve(member_scope, member_name).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::NameResolution,
                format!(
                    "Variable '{}' doesn't have any member named, '{}'.",
                    base_name, member_name
                ),
                loc,
            )
        })?;
        let member_ty = match self.arena.symbol(self.arena.past_external(member)) {
            Symbol::Variable(v) => v.ty.clone(),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    format!("'{}' is not a field", member_name),
                    loc,
                ))
            }
        };
        let member_ty = self.localize_derived_type(member_ty, loc)?;
        Ok(Expr::DerivedRef {
            base: Box::new(base),
            member,
            ty: member_ty,
            loc,
        })
    }

    /// A member whose type is a derived type declared across a module
    /// boundary gets re-pointed at a local `1_<module>_<type>` alias so
    /// every reference in this scope shares one alias.
    fn localize_derived_type(&mut self, ty: Ttype, loc: Location) -> Result<Ttype> {
        let (dt, dims, is_pointer) = match ty {
            Ttype::Derived { derived_type, dims } => (derived_type, dims, false),
            Ttype::DerivedPointer { derived_type, dims } => (derived_type, dims, true),
            other => return Ok(other),
        };
        let reassemble = |dt: SymbolId, dims: Vec<Dimension>| {
            if is_pointer {
                Ttype::DerivedPointer {
                    derived_type: dt,
                    dims,
                }
            } else {
                Ttype::Derived {
                    derived_type: dt,
                    dims,
                }
            }
        };
        let decl = self.arena.past_external(dt);
        let (type_name, member_scope) = match self.arena.symbol(decl) {
            Symbol::DerivedType(d) => (d.name.clone(), d.symtab),
            _ => return Ok(reassemble(dt, dims)),
        };
        let owner_scope = self.arena.scope(member_scope).parent;
        let same_region = owner_scope
            .map(|o| self.arena.scope_contains(o, self.current_scope))
            .unwrap_or(false);
        if same_region {
            return Ok(reassemble(dt, dims));
        }
        let module_name = match self.arena.symbol(dt) {
            Symbol::External(es) => es.module_name.clone(),
            _ => self
                .owning_module_name(member_scope)
                .unwrap_or_else(|| "nullptr".to_string()),
        };
        let mangled = format!("1_{}_{}", module_name, type_name);
        if let Some(existing) = self.arena.get(self.current_scope, &mangled) {
            return Ok(reassemble(existing, dims));
        }
        // a plain-named alias of the same declaration also serves
        if let Some(plain) = self.arena.get(self.current_scope, &type_name) {
            if let Symbol::External(es) = self.arena.symbol(plain) {
                if es.external == decl {
                    return Ok(reassemble(plain, dims));
                }
            }
        }
        let alias = self.arena.alloc(Symbol::External(ExternalSymbol {
            name: mangled.clone(),
            scope: self.current_scope,
            external: decl,
            module_name,
            original_name: type_name,
            access: Access::Public,
            loc,
        }));
        self.arena.install(self.current_scope, &mangled, alias);
        Ok(reassemble(alias, dims))
    }

    fn owning_module_name(&self, member_scope: ScopeId) -> Option<String> {
        let owner = self.arena.scope(member_scope).parent?;
        for (_, s) in self.arena.symbols() {
            if let Symbol::Module(m) = s {
                if m.symtab == owner {
                    return Some(m.name.clone());
                }
            }
        }
        None
    }

    fn function_return_type(&self, f: SymbolId) -> Result<Ttype> {
        if let Symbol::Function(f) = self.arena.symbol(f) {
            if let Symbol::Variable(rv) = self.arena.symbol(self.arena.past_external(f.return_var))
            {
                return Ok(rv.ty.clone());
            }
        }
        Err(SemanticError::new(
            ErrorKind::Internal,
            "function has no return variable",
            Location::default(),
        ))
    }

    fn lower_array_indices(&mut self, args: &[ast::FnArg], loc: Location) -> Result<Vec<ArrayIndex>> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            let left = self.lower_opt_expr(a.start.as_ref())?;
            let right = self.lower_opt_expr(a.end.as_ref())?;
            let step = self.lower_opt_expr(a.step.as_ref())?;
            let iloc = right
                .as_ref()
                .or(left.as_ref())
                .map(|e| e.loc())
                .unwrap_or(loc);
            out.push(ArrayIndex {
                left,
                right,
                step,
                loc: iloc,
            });
        }
        Ok(out)
    }

    fn lower_func_call_or_array(
        &mut self,
        func: &str,
        args: &[ast::FnArg],
        loc: Location,
    ) -> Result<Expr> {
        let v = match self.arena.resolve(self.current_scope, func) {
            Some(v) => v,
            None => self.materialize_intrinsic(func, loc)?,
        };
        let target = self.arena.past_external(v);
        enum CallShape {
            Func,
            Array(Ttype),
        }
        let shape = match self.arena.symbol(target) {
            Symbol::Function(_) => CallShape::Func,
            Symbol::Variable(var) => CallShape::Array(var.ty.clone()),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NameResolution,
                    format!("Symbol '{}' is not a function or an array", func),
                    loc,
                ))
            }
        };
        match shape {
            CallShape::Func => {
                let lowered = self.lower_expr_list(args, loc)?;
                let ty = self.function_return_type(target)?;
                Ok(Expr::FunctionCall {
                    sym: v,
                    args: lowered,
                    ty,
                    value: None,
                    loc,
                })
            }
            CallShape::Array(ty) => {
                let idx = self.lower_array_indices(args, loc)?;
                Ok(Expr::ArrayRef {
                    sym: v,
                    args: idx,
                    ty,
                    loc,
                })
            }
        }
    }

    /// An unresolved call-position name may still be an intrinsic: load
    /// its module and alias it here, or synthesize the declaration for
    /// `present` and the elementary functions.
    fn materialize_intrinsic(&mut self, func: &str, loc: Location) -> Result<SymbolId> {
        let remote_sym = func.to_lowercase();
        if let Some(module_name) = intrinsics::intrinsic_module(&remote_sym) {
            let m = self
                .loader
                .load_module(self.arena, self.global_scope, module_name, loc, true)?;
            let m_symtab = match self.arena.symbol(m) {
                Symbol::Module(m) => m.symtab,
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::Internal,
                        format!("loader returned a non-module for '{}'", module_name),
                        loc,
                    ))
                }
            };
            let t = self.arena.get(m_symtab, &remote_sym).ok_or_else(|| {
                SemanticError::new(
                    ErrorKind::NameResolution,
                    format!(
                        "The symbol '{}' not found in the module '{}'",
                        remote_sym, module_name
                    ),
                    loc,
                )
            })?;
            let t_name = self.arena.symbol_name(t).to_string();
            let alias = self.arena.alloc(Symbol::External(ExternalSymbol {
                name: t_name.clone(),
                scope: self.current_scope,
                external: t,
                module_name: module_name.to_string(),
                original_name: t_name.clone(),
                access: Access::Private,
                loc,
            }));
            self.arena.install(self.current_scope, &t_name, alias);
            if let Some(cm) = self.current_module {
                if let Symbol::Module(m) = self.arena.symbol_mut(cm) {
                    if !m.dependencies.iter().any(|d| d == module_name) {
                        m.dependencies.push(module_name.to_string());
                    }
                }
            }
            log::debug!("lazily imported intrinsic '{}' from '{}'", remote_sym, module_name);
            Ok(alias)
        } else if remote_sym == "present" {
            Ok(self.synthesize_global_fn("present", None, Ttype::logical(4), Abi::Source, loc))
        } else if intrinsics::ELEMENTAL_INTRINSICS.contains(&remote_sym.as_str()) {
            Ok(self.synthesize_global_fn(
                &remote_sym,
                Some(Ttype::real(4)),
                Ttype::real(4),
                Abi::Intrinsic,
                loc,
            ))
        } else {
            Err(SemanticError::new(
                ErrorKind::NameResolution,
                format!("Function or array '{}' not declared", func),
                loc,
            ))
        }
    }

    fn synthesize_global_fn(
        &mut self,
        name: &str,
        arg_ty: Option<Ttype>,
        ret_ty: Ttype,
        abi: Abi,
        loc: Location,
    ) -> SymbolId {
        let fn_scope = self.arena.new_scope(Some(self.global_scope));
        let mut args = Vec::new();
        if let Some(arg_ty) = arg_ty {
            let arg = self.arena.alloc(Symbol::Variable(Variable {
                name: "x".to_string(),
                scope: fn_scope,
                intent: Intent::In,
                init: None,
                storage: Storage::Default,
                ty: arg_ty,
                abi: Abi::Source,
                access: Access::Public,
                presence: Presence::Required,
                loc,
            }));
            self.arena.install(fn_scope, "x", arg);
            args.push(arg);
        }
        let ret = self.arena.alloc(Symbol::Variable(Variable {
            name: name.to_string(),
            scope: fn_scope,
            intent: Intent::ReturnVar,
            init: None,
            storage: Storage::Default,
            ty: ret_ty,
            abi: Abi::Source,
            access: Access::Public,
            presence: Presence::Required,
            loc,
        }));
        self.arena.install(fn_scope, name, ret);
        let f = self.arena.alloc(Symbol::Function(Function {
            name: name.to_string(),
            symtab: fn_scope,
            args,
            body: Vec::new(),
            return_var: ret,
            abi,
            access: Access::Public,
            deftype: Deftype::Implementation,
            loc,
        }));
        self.arena.install(self.global_scope, name, f);
        f
    }
}
