//! Typed IR.
//!
//! The output of semantic analysis: a scope graph whose declarations are
//! populated by the symbol-table pass and whose bodies are filled in by
//! the body pass. Everything lives in one [`Arena`] per translation unit;
//! scopes and declarations refer to each other through [`ScopeId`] and
//! [`SymbolId`] indices, so parent/child links stay weak and the whole
//! graph is dropped together.

use std::collections::BTreeMap;

use crate::ast::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

/// A lexical lookup environment. The map is ordered so scope walks are
/// deterministic. The scope's arena index is its stable identity.
#[derive(Debug, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub symbols: BTreeMap<String, SymbolId>,
}

/// The translation-unit arena. Declarations are created by pass 1 and are
/// never removed; pass 2 only attaches bodies and adds alias entries.
#[derive(Debug, Default)]
pub struct Arena {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            symbols: BTreeMap::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn alloc(&mut self, sym: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(sym);
        id
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    /// Installs `sym` under `name`, replacing any previous entry. The
    /// redeclaration policy is enforced by the callers, not here.
    pub fn install(&mut self, scope: ScopeId, name: &str, sym: SymbolId) {
        self.scope_mut(scope).symbols.insert(name.to_string(), sym);
    }

    /// Local (single-scope) lookup.
    pub fn get(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scope(scope).symbols.get(name).copied()
    }

    /// Lexical lookup: walk parent scopes until the name is found.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if let Some(id) = self.get(s, name) {
                return Some(id);
            }
            cur = self.scope(s).parent;
        }
        None
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        match self.symbol(id) {
            Symbol::Variable(v) => &v.name,
            Symbol::Subroutine(s) => &s.name,
            Symbol::Function(f) => &f.name,
            Symbol::Module(m) => &m.name,
            Symbol::Program(p) => &p.name,
            Symbol::DerivedType(d) => &d.name,
            Symbol::GenericProcedure(g) => &g.name,
            Symbol::ClassProcedure(c) => &c.name,
            Symbol::External(e) => &e.name,
        }
    }

    /// Follows an external-symbol alias to the underlying declaration.
    /// Aliases never chain, so one hop suffices.
    pub fn past_external(&self, id: SymbolId) -> SymbolId {
        match self.symbol(id) {
            Symbol::External(e) => e.external,
            _ => id,
        }
    }

    /// True when `scope` equals `ancestor` or is nested inside it.
    pub fn scope_contains(&self, ancestor: ScopeId, scope: ScopeId) -> bool {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if s == ancestor {
                return true;
            }
            cur = self.scope(s).parent;
        }
        false
    }

    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(i, s)| (ScopeId(i as u32), s))
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Unspecified,
    In,
    Out,
    InOut,
    Local,
    ReturnVar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Default,
    Parameter,
    Allocatable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    Source,
    Intrinsic,
    Interactive,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deftype {
    Implementation,
    Interface,
}

#[derive(Debug)]
pub enum Symbol {
    Variable(Variable),
    Subroutine(Subroutine),
    Function(Function),
    Module(Module),
    Program(Program),
    DerivedType(DerivedType),
    GenericProcedure(GenericProcedure),
    ClassProcedure(ClassProcedure),
    External(ExternalSymbol),
}

#[derive(Debug)]
pub struct Variable {
    pub name: String,
    /// The scope the declaration lives in.
    pub scope: ScopeId,
    pub intent: Intent,
    pub init: Option<Expr>,
    pub storage: Storage,
    pub ty: Ttype,
    pub abi: Abi,
    pub access: Access,
    pub presence: Presence,
    pub loc: Location,
}

#[derive(Debug)]
pub struct Subroutine {
    pub name: String,
    /// The subroutine's own symbol table.
    pub symtab: ScopeId,
    pub args: Vec<SymbolId>,
    /// Empty after pass 1; filled by pass 2.
    pub body: Vec<Stmt>,
    pub abi: Abi,
    pub access: Access,
    pub deftype: Deftype,
    pub loc: Location,
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub symtab: ScopeId,
    pub args: Vec<SymbolId>,
    pub body: Vec<Stmt>,
    pub return_var: SymbolId,
    pub abi: Abi,
    pub access: Access,
    pub deftype: Deftype,
    pub loc: Location,
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub symtab: ScopeId,
    /// Names of every module this one imports at least one symbol from.
    pub dependencies: Vec<String>,
    pub intrinsic: bool,
    pub loc: Location,
}

#[derive(Debug)]
pub struct Program {
    pub name: String,
    pub symtab: ScopeId,
    pub dependencies: Vec<String>,
    pub body: Vec<Stmt>,
    pub loc: Location,
}

#[derive(Debug)]
pub struct DerivedType {
    pub name: String,
    /// Member scope holding the fields and class procedures.
    pub symtab: ScopeId,
    pub abi: Abi,
    pub access: Access,
    pub loc: Location,
}

#[derive(Debug)]
pub struct GenericProcedure {
    pub name: String,
    pub scope: ScopeId,
    /// Candidates in declaration order; never empty.
    pub procs: Vec<SymbolId>,
    pub access: Access,
    pub loc: Location,
}

#[derive(Debug)]
pub struct ClassProcedure {
    pub name: String,
    pub proc_name: String,
    pub proc: SymbolId,
    pub abi: Abi,
    pub loc: Location,
}

/// An alias that makes a declaration owned by another module visible in
/// the importing scope. `external` always points at a non-alias.
#[derive(Debug)]
pub struct ExternalSymbol {
    pub name: String,
    pub scope: ScopeId,
    pub external: SymbolId,
    pub module_name: String,
    pub original_name: String,
    pub access: Access,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dimension {
    pub start: Option<Expr>,
    pub end: Option<Expr>,
}

/// Base-type groups used by the implicit-cast rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeBase {
    Integer,
    Real,
    Complex,
    Character,
    Logical,
    Derived,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ttype {
    Integer { kind: i64, dims: Vec<Dimension> },
    Real { kind: i64, dims: Vec<Dimension> },
    Complex { kind: i64, dims: Vec<Dimension> },
    Character { kind: i64, dims: Vec<Dimension> },
    Logical { kind: i64, dims: Vec<Dimension> },
    Derived { derived_type: SymbolId, dims: Vec<Dimension> },
    Class { class_type: SymbolId, dims: Vec<Dimension> },
    IntegerPointer { kind: i64, dims: Vec<Dimension> },
    RealPointer { kind: i64, dims: Vec<Dimension> },
    ComplexPointer { kind: i64, dims: Vec<Dimension> },
    CharacterPointer { kind: i64, dims: Vec<Dimension> },
    LogicalPointer { kind: i64, dims: Vec<Dimension> },
    DerivedPointer { derived_type: SymbolId, dims: Vec<Dimension> },
}

impl Ttype {
    pub fn integer(kind: i64) -> Ttype {
        Ttype::Integer { kind, dims: vec![] }
    }
    pub fn real(kind: i64) -> Ttype {
        Ttype::Real { kind, dims: vec![] }
    }
    pub fn complex(kind: i64) -> Ttype {
        Ttype::Complex { kind, dims: vec![] }
    }
    pub fn character(kind: i64) -> Ttype {
        Ttype::Character { kind, dims: vec![] }
    }
    pub fn logical(kind: i64) -> Ttype {
        Ttype::Logical { kind, dims: vec![] }
    }

    pub fn base(&self) -> TypeBase {
        match self {
            Ttype::Integer { .. } | Ttype::IntegerPointer { .. } => TypeBase::Integer,
            Ttype::Real { .. } | Ttype::RealPointer { .. } => TypeBase::Real,
            Ttype::Complex { .. } | Ttype::ComplexPointer { .. } => TypeBase::Complex,
            Ttype::Character { .. } | Ttype::CharacterPointer { .. } => TypeBase::Character,
            Ttype::Logical { .. } | Ttype::LogicalPointer { .. } => TypeBase::Logical,
            Ttype::Derived { .. } | Ttype::DerivedPointer { .. } | Ttype::Class { .. } => {
                TypeBase::Derived
            }
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            Ttype::IntegerPointer { .. }
                | Ttype::RealPointer { .. }
                | Ttype::ComplexPointer { .. }
                | Ttype::CharacterPointer { .. }
                | Ttype::LogicalPointer { .. }
                | Ttype::DerivedPointer { .. }
        )
    }

    /// Row/column index into the cast rule table: the six base types
    /// followed by their pointer companions.
    pub fn type_index(&self) -> usize {
        let base = match self.base() {
            TypeBase::Integer => 0,
            TypeBase::Real => 1,
            TypeBase::Complex => 2,
            TypeBase::Character => 3,
            TypeBase::Logical => 4,
            TypeBase::Derived => 5,
        };
        if self.is_pointer() {
            base + 6
        } else {
            base
        }
    }

    pub fn kind(&self) -> i64 {
        match self {
            Ttype::Integer { kind, .. }
            | Ttype::Real { kind, .. }
            | Ttype::Complex { kind, .. }
            | Ttype::Character { kind, .. }
            | Ttype::Logical { kind, .. }
            | Ttype::IntegerPointer { kind, .. }
            | Ttype::RealPointer { kind, .. }
            | Ttype::ComplexPointer { kind, .. }
            | Ttype::CharacterPointer { kind, .. }
            | Ttype::LogicalPointer { kind, .. } => *kind,
            Ttype::Derived { .. } | Ttype::DerivedPointer { .. } | Ttype::Class { .. } => 4,
        }
    }

    pub fn dims(&self) -> &[Dimension] {
        match self {
            Ttype::Integer { dims, .. }
            | Ttype::Real { dims, .. }
            | Ttype::Complex { dims, .. }
            | Ttype::Character { dims, .. }
            | Ttype::Logical { dims, .. }
            | Ttype::Derived { dims, .. }
            | Ttype::Class { dims, .. }
            | Ttype::IntegerPointer { dims, .. }
            | Ttype::RealPointer { dims, .. }
            | Ttype::ComplexPointer { dims, .. }
            | Ttype::CharacterPointer { dims, .. }
            | Ttype::LogicalPointer { dims, .. }
            | Ttype::DerivedPointer { dims, .. } => dims,
        }
    }

    pub fn is_array(&self) -> bool {
        !self.dims().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinopType {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpopType {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolopType {
    And,
    Or,
    Eqv,
    NEqv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StropType {
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryopType {
    Not,
    USub,
    UAdd,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    IntegerToReal,
    IntegerToInteger,
    RealToInteger,
    RealToComplex,
    IntegerToComplex,
    IntegerToLogical,
    ComplexToComplex,
    RealToReal,
}

/// An index in an array subscript; plain indexing uses only `right`,
/// sections use the full triplet.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayIndex {
    pub left: Option<Expr>,
    pub right: Option<Expr>,
    pub step: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var {
        sym: SymbolId,
        loc: Location,
    },
    ArrayRef {
        sym: SymbolId,
        args: Vec<ArrayIndex>,
        ty: Ttype,
        loc: Location,
    },
    DerivedRef {
        base: Box<Expr>,
        member: SymbolId,
        ty: Ttype,
        loc: Location,
    },
    ConstantInteger {
        n: i64,
        ty: Ttype,
        loc: Location,
    },
    ConstantReal {
        r: f64,
        ty: Ttype,
        loc: Location,
    },
    ConstantComplex {
        re: Box<Expr>,
        im: Box<Expr>,
        ty: Ttype,
        loc: Location,
    },
    ConstantString {
        s: String,
        ty: Ttype,
        loc: Location,
    },
    ConstantLogical {
        b: bool,
        ty: Ttype,
        loc: Location,
    },
    ConstantArray {
        elems: Vec<Expr>,
        ty: Ttype,
        loc: Location,
    },
    UnaryOp {
        op: UnaryopType,
        operand: Box<Expr>,
        ty: Ttype,
        loc: Location,
    },
    BinOp {
        left: Box<Expr>,
        op: BinopType,
        right: Box<Expr>,
        ty: Ttype,
        /// Folded constant, when both operands folded.
        value: Option<Box<Expr>>,
        loc: Location,
    },
    Compare {
        left: Box<Expr>,
        op: CmpopType,
        right: Box<Expr>,
        ty: Ttype,
        loc: Location,
    },
    BoolOp {
        left: Box<Expr>,
        op: BoolopType,
        right: Box<Expr>,
        ty: Ttype,
        loc: Location,
    },
    StrOp {
        left: Box<Expr>,
        op: StropType,
        right: Box<Expr>,
        ty: Ttype,
        loc: Location,
    },
    ImplicitCast {
        arg: Box<Expr>,
        cast_kind: CastKind,
        ty: Ttype,
        value: Option<Box<Expr>>,
        loc: Location,
    },
    FunctionCall {
        sym: SymbolId,
        args: Vec<Expr>,
        ty: Ttype,
        value: Option<Box<Expr>>,
        loc: Location,
    },
}

impl Expr {
    pub fn loc(&self) -> Location {
        match self {
            Expr::Var { loc, .. }
            | Expr::ArrayRef { loc, .. }
            | Expr::DerivedRef { loc, .. }
            | Expr::ConstantInteger { loc, .. }
            | Expr::ConstantReal { loc, .. }
            | Expr::ConstantComplex { loc, .. }
            | Expr::ConstantString { loc, .. }
            | Expr::ConstantLogical { loc, .. }
            | Expr::ConstantArray { loc, .. }
            | Expr::UnaryOp { loc, .. }
            | Expr::BinOp { loc, .. }
            | Expr::Compare { loc, .. }
            | Expr::BoolOp { loc, .. }
            | Expr::StrOp { loc, .. }
            | Expr::ImplicitCast { loc, .. }
            | Expr::FunctionCall { loc, .. } => *loc,
        }
    }
}

/// The type an expression evaluates to. Variable references read their
/// declaration through the arena (and through external aliases).
pub fn expr_type(arena: &Arena, e: &Expr) -> Ttype {
    match e {
        Expr::Var { sym, .. } => match arena.symbol(arena.past_external(*sym)) {
            Symbol::Variable(v) => v.ty.clone(),
            // a name always resolves to a variable by the time it is
            // wrapped in a Var node
            _ => Ttype::integer(4),
        },
        Expr::ArrayRef { ty, .. }
        | Expr::DerivedRef { ty, .. }
        | Expr::ConstantInteger { ty, .. }
        | Expr::ConstantReal { ty, .. }
        | Expr::ConstantComplex { ty, .. }
        | Expr::ConstantString { ty, .. }
        | Expr::ConstantLogical { ty, .. }
        | Expr::ConstantArray { ty, .. }
        | Expr::UnaryOp { ty, .. }
        | Expr::BinOp { ty, .. }
        | Expr::Compare { ty, .. }
        | Expr::BoolOp { ty, .. }
        | Expr::StrOp { ty, .. }
        | Expr::ImplicitCast { ty, .. }
        | Expr::FunctionCall { ty, .. } => ty.clone(),
    }
}

/// The compile-time value of an expression, when known. Constants are
/// their own value; operator nodes carry an optional folded value.
pub fn expr_value<'a>(e: &'a Expr) -> Option<&'a Expr> {
    match e {
        Expr::ConstantInteger { .. }
        | Expr::ConstantReal { .. }
        | Expr::ConstantComplex { .. }
        | Expr::ConstantString { .. }
        | Expr::ConstantLogical { .. }
        | Expr::ConstantArray { .. } => Some(e),
        Expr::BinOp { value, .. }
        | Expr::ImplicitCast { value, .. }
        | Expr::FunctionCall { value, .. } => value.as_deref(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocArg {
    pub sym: SymbolId,
    pub dims: Vec<Dimension>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoLoopHead {
    pub var: Expr,
    pub start: Expr,
    pub end: Expr,
    pub increment: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseStmt {
    Values {
        tests: Vec<Expr>,
        body: Vec<Stmt>,
        loc: Location,
    },
    Range {
        start: Option<Expr>,
        end: Option<Expr>,
        body: Vec<Stmt>,
        loc: Location,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assignment {
        target: Expr,
        value: Expr,
        loc: Location,
    },
    Associate {
        target: Expr,
        value: Expr,
        loc: Location,
    },
    SubroutineCall {
        /// The resolved callee (possibly an external alias).
        sym: SymbolId,
        /// The generic or class procedure the call was written against.
        original: Option<SymbolId>,
        args: Vec<Expr>,
        loc: Location,
    },
    Allocate {
        args: Vec<AllocArg>,
        stat: Option<Expr>,
        loc: Location,
    },
    ExplicitDeallocate {
        syms: Vec<SymbolId>,
        loc: Location,
    },
    /// Compiler-inserted deallocation of allocatables going out of scope
    /// (or being re-bound through an intent(out) argument). Deallocates
    /// whatever in the list is currently allocated.
    ImplicitDeallocate {
        syms: Vec<SymbolId>,
        loc: Location,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        loc: Location,
    },
    WhileLoop {
        test: Expr,
        body: Vec<Stmt>,
        loc: Location,
    },
    DoLoop {
        head: DoLoopHead,
        body: Vec<Stmt>,
        loc: Location,
    },
    DoConcurrentLoop {
        head: DoLoopHead,
        body: Vec<Stmt>,
        loc: Location,
    },
    Select {
        test: Expr,
        cases: Vec<CaseStmt>,
        default: Vec<Stmt>,
        loc: Location,
    },
    Return {
        loc: Location,
    },
    Exit {
        loc: Location,
    },
    Cycle {
        loc: Location,
    },
    Stop {
        code: Option<Expr>,
        loc: Location,
    },
    ErrorStop {
        code: Option<Expr>,
        loc: Location,
    },
    Print {
        values: Vec<Expr>,
        loc: Location,
    },
    Write {
        unit: Option<Expr>,
        fmt: Option<Expr>,
        iomsg: Option<Expr>,
        iostat: Option<Expr>,
        id: Option<Expr>,
        values: Vec<Expr>,
        loc: Location,
    },
    Read {
        unit: Option<Expr>,
        fmt: Option<Expr>,
        iomsg: Option<Expr>,
        iostat: Option<Expr>,
        id: Option<Expr>,
        values: Vec<Expr>,
        loc: Location,
    },
    Open {
        label: i64,
        unit: Expr,
        file: Option<Expr>,
        status: Option<Expr>,
        loc: Location,
    },
    Close {
        label: i64,
        unit: Expr,
        iostat: Option<Expr>,
        iomsg: Option<Expr>,
        err: Option<Expr>,
        status: Option<Expr>,
        loc: Location,
    },
}

/// A lowered top-level item (interactive input).
#[derive(Debug)]
pub enum UnitItem {
    Stmt(Stmt),
    Expr(Expr),
}

/// The result of semantic analysis for one translation unit.
#[derive(Debug)]
pub struct TranslationUnit {
    pub global_scope: ScopeId,
    pub items: Vec<UnitItem>,
    pub loc: Location,
}
