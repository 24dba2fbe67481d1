//! Pass 1: symbol-table construction.
//!
//! Walks the declarative constructs of a translation unit and builds the
//! scope graph: modules, programs, procedures, derived types, interfaces,
//! use imports, and variable declarations. Executable statements are left
//! for the body pass; procedure bodies stay empty here.

use std::collections::BTreeMap;

use crate::asr::{
    expr_type, Abi, Access, Arena, Deftype, Dimension, DerivedType, Expr, Function,
    GenericProcedure, Intent, Module, Presence, Program, ScopeId, Storage, Subroutine, Symbol,
    SymbolId, TranslationUnit, Ttype, Variable,
};
use crate::ast;
use crate::ast::Location;
use crate::errors::{ErrorKind, Result, SemanticError};
use crate::intrinsics::{self, ModuleLoader};

use super::cast;
use super::common;

pub struct SymbolTableVisitor<'a> {
    arena: &'a mut Arena,
    loader: &'a mut dyn ModuleLoader,
    current_scope: ScopeId,
    generic_procedures: BTreeMap<String, Vec<String>>,
    class_procedures: BTreeMap<String, Vec<(String, String)>>,
    dflt_access: Access,
    dflt_presence: Presence,
    assgnd_access: BTreeMap<String, Access>,
    assgnd_presence: BTreeMap<String, Presence>,
    current_module_dependencies: Vec<String>,
    in_module: bool,
    is_interface: bool,
    current_procedure_args: Vec<String>,
}

pub fn build_symbol_table(
    arena: &mut Arena,
    unit: &ast::TranslationUnit,
    loader: &mut dyn ModuleLoader,
) -> Result<TranslationUnit> {
    let global_scope = arena.new_scope(None);
    let mut v = SymbolTableVisitor {
        arena,
        loader,
        current_scope: global_scope,
        generic_procedures: BTreeMap::new(),
        class_procedures: BTreeMap::new(),
        dflt_access: Access::Public,
        dflt_presence: Presence::Required,
        assgnd_access: BTreeMap::new(),
        assgnd_presence: BTreeMap::new(),
        current_module_dependencies: Vec::new(),
        in_module: false,
        is_interface: false,
        current_procedure_args: Vec::new(),
    };
    for item in &unit.items {
        match item {
            ast::UnitItem::Module(m) => v.visit_module(m)?,
            ast::UnitItem::Program(p) => v.visit_program(p)?,
            ast::UnitItem::Subroutine(s) => v.visit_subroutine(s)?,
            ast::UnitItem::Function(f) => v.visit_function(f)?,
            // executable items are handled by the body pass
            ast::UnitItem::Stmt(_) | ast::UnitItem::Expr(_) => {}
        }
    }
    Ok(TranslationUnit {
        global_scope,
        items: Vec::new(),
        loc: unit.loc,
    })
}

impl<'a> SymbolTableVisitor<'a> {
    fn visit_module(&mut self, x: &ast::Module) -> Result<()> {
        let parent_scope = self.current_scope;
        self.current_scope = self.arena.new_scope(Some(parent_scope));
        self.current_module_dependencies.clear();
        self.generic_procedures.clear();
        self.class_procedures.clear();
        self.assgnd_access.clear();
        self.assgnd_presence.clear();
        self.dflt_access = Access::Public;
        self.in_module = true;
        for u in &x.uses {
            self.visit_use(u)?;
        }
        for d in &x.decls {
            self.visit_decl(d)?;
        }
        for c in &x.contains {
            self.visit_program_unit(c)?;
        }
        self.add_generic_procedures()?;
        self.add_class_procedures()?;
        let dependencies = std::mem::take(&mut self.current_module_dependencies);
        let module_scope = self.current_scope;
        self.current_scope = parent_scope;
        self.in_module = false;
        self.dflt_access = Access::Public;
        if self.arena.get(parent_scope, &x.name).is_some() {
            return Err(SemanticError::new(
                ErrorKind::Redeclaration,
                "Module already defined",
                x.loc,
            ));
        }
        let id = self.arena.alloc(Symbol::Module(Module {
            name: x.name.clone(),
            symtab: module_scope,
            dependencies,
            intrinsic: false,
            loc: x.loc,
        }));
        self.arena.install(parent_scope, &x.name, id);
        Ok(())
    }

    fn visit_program(&mut self, x: &ast::Program) -> Result<()> {
        let parent_scope = self.current_scope;
        self.current_scope = self.arena.new_scope(Some(parent_scope));
        self.current_module_dependencies.clear();
        self.generic_procedures.clear();
        self.class_procedures.clear();
        self.assgnd_access.clear();
        self.assgnd_presence.clear();
        for u in &x.uses {
            self.visit_use(u)?;
        }
        for d in &x.decls {
            self.visit_decl(d)?;
        }
        for c in &x.contains {
            self.visit_program_unit(c)?;
        }
        self.add_generic_procedures()?;
        self.add_class_procedures()?;
        let dependencies = std::mem::take(&mut self.current_module_dependencies);
        let program_scope = self.current_scope;
        self.current_scope = parent_scope;
        if self.arena.get(parent_scope, &x.name).is_some() {
            return Err(SemanticError::new(
                ErrorKind::Redeclaration,
                "Program already defined",
                x.loc,
            ));
        }
        let id = self.arena.alloc(Symbol::Program(Program {
            name: x.name.clone(),
            symtab: program_scope,
            dependencies,
            body: Vec::new(),
            loc: x.loc,
        }));
        self.arena.install(parent_scope, &x.name, id);
        Ok(())
    }

    fn visit_program_unit(&mut self, u: &ast::ProgramUnit) -> Result<()> {
        match u {
            ast::ProgramUnit::Subroutine(s) => self.visit_subroutine(s),
            ast::ProgramUnit::Function(f) => self.visit_function(f),
        }
    }

    /// Shadowing a previous entry is allowed when it was only a forward
    /// interface (or an interactive stub).
    fn may_shadow(&self, prev: SymbolId) -> bool {
        match self.arena.symbol(prev) {
            Symbol::Subroutine(s) => {
                s.abi == Abi::Interactive || s.deftype == Deftype::Interface
            }
            Symbol::Function(f) => f.abi == Abi::Interactive || f.deftype == Deftype::Interface,
            _ => false,
        }
    }

    fn visit_subroutine(&mut self, x: &ast::Subroutine) -> Result<()> {
        let deftype = if self.is_interface {
            Deftype::Interface
        } else {
            Deftype::Implementation
        };
        let parent_scope = self.current_scope;
        self.current_scope = self.arena.new_scope(Some(parent_scope));
        let saved_args =
            std::mem::replace(&mut self.current_procedure_args, x.args.clone());
        for d in &x.decls {
            self.visit_decl(d)?;
        }
        for c in &x.contains {
            self.visit_program_unit(c)?;
        }
        let mut args = Vec::with_capacity(x.args.len());
        for arg in &x.args {
            match self.arena.get(self.current_scope, arg) {
                Some(id) => args.push(id),
                None => {
                    return Err(SemanticError::new(
                        ErrorKind::NameResolution,
                        format!("Dummy argument '{}' not defined", arg),
                        x.loc,
                    ))
                }
            }
        }
        let s_access = self
            .assgnd_access
            .get(&x.name)
            .copied()
            .unwrap_or(self.dflt_access);
        let sub_scope = self.current_scope;
        self.current_scope = parent_scope;
        self.current_procedure_args = saved_args;
        if let Some(prev) = self.arena.get(parent_scope, &x.name) {
            if !self.may_shadow(prev) {
                return Err(SemanticError::new(
                    ErrorKind::Redeclaration,
                    "Subroutine already defined",
                    x.loc,
                ));
            }
        }
        let id = self.arena.alloc(Symbol::Subroutine(Subroutine {
            name: x.name.clone(),
            symtab: sub_scope,
            args,
            body: Vec::new(),
            abi: Abi::Source,
            access: s_access,
            deftype,
            loc: x.loc,
        }));
        self.arena.install(parent_scope, &x.name, id);
        Ok(())
    }

    fn find_return_type<'b>(
        &self,
        attributes: &'b [ast::Attribute],
        loc: Location,
    ) -> Result<Option<&'b ast::AttrType>> {
        let mut found = None;
        for a in attributes {
            if let ast::Attribute::Type(t) = a {
                if found.is_some() {
                    return Err(SemanticError::new(
                        ErrorKind::Redeclaration,
                        "Return type declared twice",
                        loc,
                    ));
                }
                found = Some(t);
            }
        }
        Ok(found)
    }

    fn visit_function(&mut self, x: &ast::Function) -> Result<()> {
        let deftype = if self.is_interface {
            Deftype::Interface
        } else {
            Deftype::Implementation
        };
        let parent_scope = self.current_scope;
        self.current_scope = self.arena.new_scope(Some(parent_scope));
        let saved_args =
            std::mem::replace(&mut self.current_procedure_args, x.args.clone());
        for d in &x.decls {
            self.visit_decl(d)?;
        }
        for c in &x.contains {
            self.visit_program_unit(c)?;
        }
        let mut args = Vec::with_capacity(x.args.len());
        for arg in &x.args {
            match self.arena.get(self.current_scope, arg) {
                Some(id) => args.push(id),
                None => {
                    return Err(SemanticError::new(
                        ErrorKind::NameResolution,
                        format!("Dummy argument '{}' not defined", arg),
                        x.loc,
                    ))
                }
            }
        }

        // The return variable is named by result(...) or by the function
        // itself, and typed by the prefix or by a local declaration.
        let return_var_name = x.return_name.clone().unwrap_or_else(|| x.name.clone());
        let return_type = self.find_return_type(&x.attributes, x.loc)?.cloned();
        let return_var = match self.arena.get(self.current_scope, &return_var_name) {
            None => {
                let rt = return_type.ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::TypeMismatch,
                        "Return type not specified",
                        x.loc,
                    )
                })?;
                let a_kind = match &rt.kind {
                    Some(k) => {
                        let ke = self.lower_expr(k)?;
                        common::extract_kind(self.arena, &ke, x.loc)?
                    }
                    None => 4,
                };
                let ty = match rt.base {
                    ast::BaseType::Integer => Ttype::integer(a_kind),
                    ast::BaseType::Real => Ttype::real(a_kind),
                    ast::BaseType::Complex => Ttype::complex(a_kind),
                    ast::BaseType::Logical => Ttype::logical(4),
                    _ => {
                        return Err(SemanticError::new(
                            ErrorKind::Unsupported,
                            "Return type not supported",
                            x.loc,
                        ))
                    }
                };
                let v = self.arena.alloc(Symbol::Variable(Variable {
                    name: return_var_name.clone(),
                    scope: self.current_scope,
                    intent: Intent::ReturnVar,
                    init: None,
                    storage: Storage::Default,
                    ty,
                    abi: Abi::Source,
                    access: Access::Public,
                    presence: Presence::Required,
                    loc: x.loc,
                }));
                self.arena.install(self.current_scope, &return_var_name, v);
                v
            }
            Some(v) => {
                if return_type.is_some() {
                    return Err(SemanticError::new(
                        ErrorKind::Redeclaration,
                        "Cannot specify the return type twice",
                        x.loc,
                    ));
                }
                match self.arena.symbol_mut(v) {
                    Symbol::Variable(var) => var.intent = Intent::ReturnVar,
                    _ => {
                        return Err(SemanticError::new(
                            ErrorKind::Internal,
                            format!("return entry '{}' is not a variable", return_var_name),
                            x.loc,
                        ))
                    }
                }
                v
            }
        };

        let s_access = self
            .assgnd_access
            .get(&x.name)
            .copied()
            .unwrap_or(self.dflt_access);
        let fn_scope = self.current_scope;
        self.current_scope = parent_scope;
        self.current_procedure_args = saved_args;
        if let Some(prev) = self.arena.get(parent_scope, &x.name) {
            if !self.may_shadow(prev) {
                return Err(SemanticError::new(
                    ErrorKind::Redeclaration,
                    "Function already defined",
                    x.loc,
                ));
            }
        }
        let id = self.arena.alloc(Symbol::Function(Function {
            name: x.name.clone(),
            symtab: fn_scope,
            args,
            body: Vec::new(),
            return_var,
            abi: Abi::Source,
            access: s_access,
            deftype,
            loc: x.loc,
        }));
        self.arena.install(parent_scope, &x.name, id);
        Ok(())
    }

    fn visit_decl(&mut self, d: &ast::Decl) -> Result<()> {
        match d {
            ast::Decl::Declaration(x) => self.visit_declaration(x),
            ast::Decl::DerivedType(x) => self.visit_derived_type(x),
            ast::Decl::Interface(x) => self.visit_interface(x),
        }
    }

    fn visit_declaration(&mut self, x: &ast::Declaration) -> Result<()> {
        if x.vartype.is_none()
            && x.attributes.len() == 1
            && matches!(x.attributes[0], ast::Attribute::Namelist(_))
        {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "Namelists not implemented yet",
                x.loc,
            ));
        }
        for a in &x.attributes {
            if matches!(a, ast::Attribute::Type(_)) {
                return Err(SemanticError::new(
                    ErrorKind::Unsupported,
                    "Type must be declared first",
                    x.loc,
                ));
            }
        }
        let sym_type = match &x.vartype {
            None => return self.visit_attribute_declaration(x),
            Some(t) => t.clone(),
        };
        for s in &x.syms {
            self.declare_variable(x, &sym_type, s)?;
        }
        Ok(())
    }

    /// `private`, `public :: x, y`, `optional :: z` and friends: no type,
    /// only a default-access flip or per-name overrides.
    fn visit_attribute_declaration(&mut self, x: &ast::Declaration) -> Result<()> {
        if x.attributes.is_empty() {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "No attribute specified",
                x.loc,
            ));
        }
        if x.attributes.len() > 1 {
            return Err(SemanticError::new(
                ErrorKind::Unsupported,
                "Only one attribute can be specified if type is missing",
                x.loc,
            ));
        }
        let sa = match &x.attributes[0] {
            ast::Attribute::Simple(sa) => *sa,
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::Unsupported,
                    "Attribute declaration not supported",
                    x.loc,
                ))
            }
        };
        if x.syms.is_empty() {
            match sa {
                ast::SimpleAttr::Private => self.dflt_access = Access::Private,
                // public access is already the default
                ast::SimpleAttr::Public => {}
                ast::SimpleAttr::Save => {
                    // every entity in a module carries save implicitly
                    if !self.in_module {
                        return Err(SemanticError::new(
                            ErrorKind::Unsupported,
                            "Save Attribute not supported yet",
                            x.loc,
                        ));
                    }
                }
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::Unsupported,
                        "Attribute declaration not supported yet",
                        x.loc,
                    ))
                }
            }
        } else {
            for s in &x.syms {
                match sa {
                    ast::SimpleAttr::Private => {
                        self.assgnd_access.insert(s.name.clone(), Access::Private);
                    }
                    ast::SimpleAttr::Public => {
                        self.assgnd_access.insert(s.name.clone(), Access::Public);
                    }
                    ast::SimpleAttr::Optional => {
                        self.assgnd_presence
                            .insert(s.name.clone(), Presence::Optional);
                    }
                    _ => {
                        return Err(SemanticError::new(
                            ErrorKind::Unsupported,
                            "Attribute declaration not supported",
                            x.loc,
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    fn declare_variable(
        &mut self,
        x: &ast::Declaration,
        sym_type: &ast::AttrType,
        s: &ast::VarSym,
    ) -> Result<()> {
        let mut s_access = self
            .assgnd_access
            .get(&s.name)
            .copied()
            .unwrap_or(self.dflt_access);
        let mut s_presence = self
            .assgnd_presence
            .get(&s.name)
            .copied()
            .unwrap_or(self.dflt_presence);
        let mut storage = Storage::Default;
        let mut is_pointer = false;
        if self.arena.get(self.current_scope, &s.name).is_some()
            && self.arena.scope(self.current_scope).parent.is_some()
        {
            // re-declaring a global-scope entry silently replaces it
            return Err(SemanticError::new(
                ErrorKind::Redeclaration,
                "Symbol already declared",
                x.loc,
            ));
        }
        let mut s_intent = if self.current_procedure_args.iter().any(|p| p == &s.name) {
            Intent::Unspecified
        } else {
            Intent::Local
        };
        let mut dims: Vec<Dimension> = Vec::new();
        for a in &x.attributes {
            match a {
                ast::Attribute::Simple(sa) => match sa {
                    ast::SimpleAttr::Private => s_access = Access::Private,
                    ast::SimpleAttr::Public => s_access = Access::Public,
                    ast::SimpleAttr::Parameter => storage = Storage::Parameter,
                    ast::SimpleAttr::Allocatable => storage = Storage::Allocatable,
                    ast::SimpleAttr::Pointer => is_pointer = true,
                    ast::SimpleAttr::Optional => s_presence = Presence::Optional,
                    // accepted and ignored
                    ast::SimpleAttr::Target => {}
                    ast::SimpleAttr::Save => {
                        return Err(SemanticError::new(
                            ErrorKind::Unsupported,
                            "Attribute type not implemented yet",
                            x.loc,
                        ))
                    }
                },
                ast::Attribute::Intent(i) => {
                    s_intent = match i {
                        ast::IntentAttr::In => Intent::In,
                        ast::IntentAttr::Out => Intent::Out,
                        ast::IntentAttr::InOut => Intent::InOut,
                    };
                }
                ast::Attribute::Dimension(d) => {
                    if !dims.is_empty() {
                        return Err(SemanticError::new(
                            ErrorKind::ShapeOrKind,
                            "Dimensions specified twice",
                            x.loc,
                        ));
                    }
                    dims = self.process_dims(d)?;
                }
                ast::Attribute::Type(_) | ast::Attribute::Namelist(_) => {
                    return Err(SemanticError::new(
                        ErrorKind::Unsupported,
                        "Attribute type not implemented yet",
                        x.loc,
                    ))
                }
            }
        }
        if !s.dims.is_empty() {
            if !dims.is_empty() {
                return Err(SemanticError::new(
                    ErrorKind::ShapeOrKind,
                    "Cannot specify dimensions both ways",
                    x.loc,
                ));
            }
            dims = self.process_dims(&s.dims)?;
        }
        let mut a_kind = 4;
        if let Some(k) = &sym_type.kind {
            let ke = self.lower_expr(k)?;
            a_kind = common::extract_kind(self.arena, &ke, x.loc)?;
        }
        let ty = match &sym_type.base {
            ast::BaseType::Real => {
                if is_pointer {
                    Ttype::RealPointer { kind: a_kind, dims }
                } else {
                    Ttype::Real { kind: a_kind, dims }
                }
            }
            ast::BaseType::Integer => {
                if is_pointer {
                    Ttype::IntegerPointer { kind: a_kind, dims }
                } else {
                    Ttype::Integer { kind: a_kind, dims }
                }
            }
            ast::BaseType::Complex => {
                if is_pointer {
                    Ttype::ComplexPointer { kind: a_kind, dims }
                } else {
                    Ttype::Complex { kind: a_kind, dims }
                }
            }
            ast::BaseType::Logical => Ttype::Logical { kind: 4, dims },
            ast::BaseType::Character => Ttype::Character { kind: 4, dims },
            ast::BaseType::Type(name) => {
                let v = self.arena.resolve(self.current_scope, name).ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::NameResolution,
                        format!("Derived type '{}' not declared", name),
                        x.loc,
                    )
                })?;
                if is_pointer {
                    Ttype::DerivedPointer {
                        derived_type: v,
                        dims,
                    }
                } else {
                    Ttype::Derived {
                        derived_type: v,
                        dims,
                    }
                }
            }
            ast::BaseType::Class(name) => {
                let v = self.arena.resolve(self.current_scope, name).ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::NameResolution,
                        format!("Derived type '{}' not declared", name),
                        x.loc,
                    )
                })?;
                Ttype::Class {
                    class_type: v,
                    dims,
                }
            }
        };
        let init_expr = match &s.initializer {
            Some(e) => {
                let mut ie = self.lower_expr(e)?;
                let init_type = expr_type(self.arena, &ie);
                cast::set_converted_value(x.loc, &mut ie, &init_type, &ty)?;
                Some(ie)
            }
            None => None,
        };
        let v = self.arena.alloc(Symbol::Variable(Variable {
            name: s.name.clone(),
            scope: self.current_scope,
            intent: s_intent,
            init: init_expr,
            storage,
            ty,
            abi: Abi::Source,
            access: s_access,
            presence: s_presence,
            loc: s.loc,
        }));
        self.arena.install(self.current_scope, &s.name, v);
        Ok(())
    }

    fn process_dims(&mut self, dims: &[ast::Dim]) -> Result<Vec<Dimension>> {
        let mut out = Vec::with_capacity(dims.len());
        for d in dims {
            let start = match &d.start {
                Some(e) => Some(self.lower_expr(e)?),
                None => None,
            };
            let end = match &d.end {
                Some(e) => Some(self.lower_expr(e)?),
                None => None,
            };
            out.push(Dimension { start, end });
        }
        Ok(out)
    }

    fn visit_derived_type(&mut self, x: &ast::DerivedTypeDecl) -> Result<()> {
        let parent_scope = self.current_scope;
        self.current_scope = self.arena.new_scope(Some(parent_scope));
        for item in &x.items {
            self.visit_declaration(item)?;
        }
        for p in &x.procs {
            self.class_procedures
                .entry(x.name.clone())
                .or_default()
                .push((p.name.clone(), p.proc.clone()));
        }
        let member_scope = self.current_scope;
        self.current_scope = parent_scope;
        if self.arena.get(parent_scope, &x.name).is_some() {
            return Err(SemanticError::new(
                ErrorKind::Redeclaration,
                "DerivedType already defined",
                x.loc,
            ));
        }
        let id = self.arena.alloc(Symbol::DerivedType(DerivedType {
            name: x.name.clone(),
            symtab: member_scope,
            abi: Abi::Source,
            access: self.dflt_access,
            loc: x.loc,
        }));
        self.arena.install(parent_scope, &x.name, id);
        Ok(())
    }

    fn visit_interface(&mut self, x: &ast::InterfaceDecl) -> Result<()> {
        match &x.header {
            ast::InterfaceHeader::Name(generic_name) => {
                let mut proc_names = Vec::new();
                for item in &x.items {
                    match item {
                        ast::InterfaceItem::ModuleProcedures(names) => {
                            proc_names.extend(names.iter().cloned());
                        }
                        ast::InterfaceItem::Proc(_) => {
                            return Err(SemanticError::new(
                                ErrorKind::Unsupported,
                                "Interface procedure type not implemented yet",
                                x.loc,
                            ))
                        }
                    }
                }
                self.generic_procedures
                    .insert(generic_name.clone(), proc_names);
            }
            ast::InterfaceHeader::Anonymous => {
                for item in &x.items {
                    match item {
                        ast::InterfaceItem::Proc(u) => {
                            self.is_interface = true;
                            let r = self.visit_program_unit(u);
                            self.is_interface = false;
                            r?;
                        }
                        ast::InterfaceItem::ModuleProcedures(_) => {
                            return Err(SemanticError::new(
                                ErrorKind::Unsupported,
                                "Interface type not implemented yet",
                                x.loc,
                            ))
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Interface blocks collected during the scope walk become generic
    /// procedure entries once all candidates are declared.
    fn add_generic_procedures(&mut self) -> Result<()> {
        let gps = std::mem::take(&mut self.generic_procedures);
        for (name, proc_names) in gps {
            let mut symbols = Vec::with_capacity(proc_names.len());
            for pname in &proc_names {
                let s = self
                    .arena
                    .resolve(self.current_scope, pname)
                    .ok_or_else(|| {
                        SemanticError::new(
                            ErrorKind::NameResolution,
                            format!("Symbol '{}' not declared", pname),
                            Location::default(),
                        )
                    })?;
                symbols.push(s);
            }
            let id = self.arena.alloc(Symbol::GenericProcedure(GenericProcedure {
                name: name.clone(),
                scope: self.current_scope,
                procs: symbols,
                access: Access::Public,
                loc: Location::default(),
            }));
            self.arena.install(self.current_scope, &name, id);
        }
        Ok(())
    }

    fn add_class_procedures(&mut self) -> Result<()> {
        let cps = std::mem::take(&mut self.class_procedures);
        for (dt_name, procs) in cps {
            let dt_sym = self
                .arena
                .get(self.current_scope, &dt_name)
                .ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::Internal,
                        format!("derived type '{}' vanished from its scope", dt_name),
                        Location::default(),
                    )
                })?;
            let member_scope = match self.arena.symbol(dt_sym) {
                Symbol::DerivedType(d) => d.symtab,
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::Internal,
                        format!("'{}' is not a derived type", dt_name),
                        Location::default(),
                    ))
                }
            };
            for (local, pname) in procs {
                let proc_sym = self
                    .arena
                    .resolve(self.current_scope, &pname)
                    .ok_or_else(|| {
                        SemanticError::new(
                            ErrorKind::NameResolution,
                            format!("Symbol '{}' not declared", pname),
                            Location::default(),
                        )
                    })?;
                let id = self.arena.alloc(Symbol::ClassProcedure(crate::asr::ClassProcedure {
                    name: local.clone(),
                    proc_name: pname.clone(),
                    proc: proc_sym,
                    abi: Abi::Source,
                    loc: Location::default(),
                }));
                self.arena.install(member_scope, &local, id);
            }
        }
        Ok(())
    }

    fn visit_use(&mut self, x: &ast::Use) -> Result<()> {
        if !self.current_module_dependencies.contains(&x.module) {
            self.current_module_dependencies.push(x.module.clone());
        }
        let parent = self
            .arena
            .scope(self.current_scope)
            .parent
            .unwrap_or(self.current_scope);
        let t = match self.arena.resolve(parent, &x.module) {
            Some(t) => t,
            None => self
                .loader
                .load_module(self.arena, parent, &x.module, x.loc, false)?,
        };
        let (m_symtab, m_name) = match self.arena.symbol(t) {
            Symbol::Module(m) => (m.symtab, m.name.clone()),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NameResolution,
                    format!("'{}' must be a module", x.module),
                    x.loc,
                ))
            }
        };
        log::debug!("importing from module '{}'", m_name);
        if x.symbols.is_empty() {
            // use m: every declaration comes across
            let entries: Vec<(String, SymbolId)> = self
                .arena
                .scope(m_symtab)
                .symbols
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            for (name, item) in entries {
                self.import_symbol(&name, item, &m_name, x.loc)?;
            }
        } else {
            // use m, only: a, b => c
            for us in &x.symbols {
                let local = us.rename.clone().unwrap_or_else(|| us.sym.clone());
                let t = self.arena.get(m_symtab, &us.sym).ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::NameResolution,
                        format!(
                            "The symbol '{}' not found in the module '{}'",
                            us.sym, x.module
                        ),
                        x.loc,
                    )
                })?;
                self.import_symbol(&local, t, &m_name, x.loc)?;
            }
        }
        Ok(())
    }

    /// Installs an external-symbol alias for `t` under `local`. An alias
    /// of an alias is collapsed so chains never form.
    fn import_symbol(
        &mut self,
        local: &str,
        t: SymbolId,
        module_name: &str,
        loc: Location,
    ) -> Result<()> {
        let (external, original_name, src_module, access) = match self.arena.symbol(t) {
            Symbol::External(es) => (
                es.external,
                es.original_name.clone(),
                es.module_name.clone(),
                es.access,
            ),
            Symbol::Module(_) | Symbol::Program(_) | Symbol::ClassProcedure(_) => {
                return Err(SemanticError::new(
                    ErrorKind::Internal,
                    format!("'{}' is not supported yet for declaring with use.", local),
                    loc,
                ))
            }
            _ => (
                t,
                self.arena.symbol_name(t).to_string(),
                module_name.to_string(),
                self.dflt_access,
            ),
        };
        // a collapsed re-export is owned by its source module, which
        // must appear in the dependency list too
        if !self.current_module_dependencies.contains(&src_module) {
            self.current_module_dependencies.push(src_module.clone());
        }
        if let Some(prev) = self.arena.get(self.current_scope, local) {
            // the same entity arriving through two import paths is fine
            if let Symbol::External(es) = self.arena.symbol(prev) {
                if es.external == external {
                    return Ok(());
                }
            }
            if !self.may_shadow(prev) {
                let what = match self.arena.symbol(t) {
                    Symbol::Subroutine(_) => "Subroutine",
                    Symbol::Function(_) => "Function",
                    Symbol::Variable(_) => "Variable",
                    Symbol::DerivedType(_) => "Derived type",
                    _ => "Symbol",
                };
                return Err(SemanticError::new(
                    ErrorKind::Redeclaration,
                    format!("{} already defined", what),
                    loc,
                ));
            }
        }
        let id = self.arena.alloc(Symbol::External(crate::asr::ExternalSymbol {
            name: local.to_string(),
            scope: self.current_scope,
            external,
            module_name: src_module,
            original_name,
            access,
            loc,
        }));
        self.arena.install(self.current_scope, local, id);
        Ok(())
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

    /// Expression lowering for the declarative contexts this pass sees:
    /// kind arguments, initializers, and dimension bounds.
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
            ast::Expr::Name { id, members, loc } => {
                if members.is_empty() {
                    self.resolve_variable(id, *loc)
                } else {
                    Err(SemanticError::new(
                        ErrorKind::Unsupported,
                        "Derived-type references are not supported in declarations",
                        *loc,
                    ))
                }
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
            ast::Expr::FuncCallOrArray { func, args, loc } => {
                self.lower_func_call(func, args, *loc)
            }
            ast::Expr::ArrayInitializer { loc, .. } => Err(SemanticError::new(
                ErrorKind::Unsupported,
                "Array initializers are not supported in this context yet",
                *loc,
            )),
        }
    }

    /// A call in a declarative context, e.g. `kind(0.d0)` inside a kind
    /// argument. Unknown names fall back to the intrinsic registry.
    fn lower_func_call(
        &mut self,
        func: &str,
        args: &[ast::FnArg],
        loc: Location,
    ) -> Result<Expr> {
        let v = match self.arena.resolve(self.current_scope, func) {
            Some(v) => v,
            None => {
                let remote_sym = func.to_lowercase();
                let module_name = intrinsics::intrinsic_module(&remote_sym).ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::NameResolution,
                        format!(
                            "Function '{}' not found or not implemented yet (if it is intrinsic)",
                            func
                        ),
                        loc,
                    )
                })?;
                let parent = self
                    .arena
                    .scope(self.current_scope)
                    .parent
                    .unwrap_or(self.current_scope);
                let m = self
                    .loader
                    .load_module(self.arena, parent, module_name, loc, true)?;
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
                let alias = self.arena.alloc(Symbol::External(crate::asr::ExternalSymbol {
                    name: t_name.clone(),
                    scope: self.current_scope,
                    external: t,
                    module_name: module_name.to_string(),
                    original_name: t_name.clone(),
                    access: Access::Private,
                    loc,
                }));
                self.arena.install(self.current_scope, &t_name, alias);
                if !self
                    .current_module_dependencies
                    .contains(&module_name.to_string())
                {
                    self.current_module_dependencies
                        .push(module_name.to_string());
                }
                alias
            }
        };
        let mut lowered = Vec::with_capacity(args.len());
        for a in args {
            let e = a.end.as_ref().ok_or_else(|| {
                SemanticError::new(ErrorKind::Internal, "argument expression missing", loc)
            })?;
            lowered.push(self.lower_expr(e)?);
        }
        let under = self.arena.past_external(v);
        let ty = match self.arena.symbol(under) {
            Symbol::Function(f) => match self.arena.symbol(self.arena.past_external(f.return_var))
            {
                Symbol::Variable(rv) => rv.ty.clone(),
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::Internal,
                        format!("function '{}' has no return variable", func),
                        loc,
                    ))
                }
            },
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NameResolution,
                    format!(
                        "Function '{}' not found or not implemented yet (if it is intrinsic)",
                        func
                    ),
                    loc,
                ))
            }
        };
        Ok(Expr::FunctionCall {
            sym: v,
            args: lowered,
            ty,
            value: None,
            loc,
        })
    }
}
