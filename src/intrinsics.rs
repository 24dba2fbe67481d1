//! Intrinsic-procedure registry and the module-loader contract.
//!
//! The registry maps an intrinsic name to the intrinsic module that owns
//! it; using one of these names without a visible declaration triggers a
//! lazy module load. The loader itself is injected so the core never
//! touches the filesystem; [`IntrinsicModules`] is the in-memory
//! implementation that materializes the intrinsic modules on demand.

use crate::asr::{
    Abi, Access, Arena, Deftype, Function, Intent, Module, Presence, ScopeId, Storage, Symbol,
    SymbolId, Ttype, Variable,
};
use crate::ast::Location;
use crate::errors::{ErrorKind, Result, SemanticError};

/// The module owning an intrinsic procedure, if the name is one.
pub fn intrinsic_module(name: &str) -> Option<&'static str> {
    match name {
        "kind" | "selected_int_kind" | "selected_real_kind" => Some("lfortran_intrinsic_kind"),
        "size" | "lbound" | "ubound" | "min" | "max" | "allocated" | "minval" | "maxval"
        | "real" | "sum" | "abs" => Some("lfortran_intrinsic_array"),
        _ => None,
    }
}

/// Elementary functions registered on demand as `Real(4) -> Real(4)`
/// intrinsics in the global scope.
pub const ELEMENTAL_INTRINSICS: &[&str] = &[
    "sin", "cos", "tan", "sinh", "cosh", "tanh", "asin", "acos", "atan", "asinh", "acosh",
    "atanh",
];

/// Brings a previously compiled module into `parent`. Idempotent:
/// loading an already installed module returns the existing declaration.
pub trait ModuleLoader {
    fn load_module(
        &mut self,
        arena: &mut Arena,
        parent: ScopeId,
        name: &str,
        loc: Location,
        intrinsic: bool,
    ) -> Result<SymbolId>;
}

/// In-memory loader knowing only the intrinsic modules.
pub struct IntrinsicModules;

impl ModuleLoader for IntrinsicModules {
    fn load_module(
        &mut self,
        arena: &mut Arena,
        parent: ScopeId,
        name: &str,
        loc: Location,
        _intrinsic: bool,
    ) -> Result<SymbolId> {
        if let Some(existing) = arena.get(parent, name) {
            return match arena.symbol(existing) {
                Symbol::Module(_) => Ok(existing),
                _ => Err(SemanticError::new(
                    ErrorKind::NameResolution,
                    format!("'{}' must be a module", name),
                    loc,
                )),
            };
        }
        let integer4 = Ttype::integer(4);
        let real4 = Ttype::real(4);
        let logical4 = Ttype::logical(4);
        let module_scope = arena.new_scope(Some(parent));
        match name {
            "lfortran_intrinsic_kind" => {
                for f in ["kind", "selected_int_kind", "selected_real_kind"] {
                    declare_intrinsic_fn(arena, module_scope, f, integer4.clone(), integer4.clone(), loc);
                }
            }
            "lfortran_intrinsic_array" => {
                for f in ["size", "lbound", "ubound", "min", "max"] {
                    declare_intrinsic_fn(arena, module_scope, f, real4.clone(), integer4.clone(), loc);
                }
                declare_intrinsic_fn(arena, module_scope, "allocated", real4.clone(), logical4, loc);
                for f in ["minval", "maxval", "real", "sum", "abs"] {
                    declare_intrinsic_fn(arena, module_scope, f, real4.clone(), real4.clone(), loc);
                }
            }
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NameResolution,
                    format!("Module '{}' not found", name),
                    loc,
                ));
            }
        }
        log::debug!("materialized intrinsic module '{}'", name);
        let id = arena.alloc(Symbol::Module(Module {
            name: name.to_string(),
            symtab: module_scope,
            dependencies: vec![],
            intrinsic: true,
            loc,
        }));
        arena.install(parent, name, id);
        Ok(id)
    }
}

fn declare_intrinsic_fn(
    arena: &mut Arena,
    module_scope: ScopeId,
    name: &str,
    arg_ty: Ttype,
    ret_ty: Ttype,
    loc: Location,
) -> SymbolId {
    let fn_scope = arena.new_scope(Some(module_scope));
    let arg = arena.alloc(Symbol::Variable(Variable {
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
    arena.install(fn_scope, "x", arg);
    let ret = arena.alloc(Symbol::Variable(Variable {
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
    arena.install(fn_scope, name, ret);
    let f = arena.alloc(Symbol::Function(Function {
        name: name.to_string(),
        symtab: fn_scope,
        args: vec![arg],
        body: vec![],
        return_var: ret,
        abi: Abi::Source,
        access: Access::Public,
        deftype: Deftype::Interface,
        loc,
    }));
    arena.install(module_scope, name, f);
    f
}
