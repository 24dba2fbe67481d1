//! Input parse tree.
//!
//! This is the tree handed over by the front-end's parser. The semantic
//! passes never mutate it; they walk it twice and produce the typed IR in
//! [`crate::asr`]. Every node carries a [`Location`]; the file name is
//! carried alongside the translation unit by the caller.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub first_line: u32,
    pub first_column: u32,
    pub last_line: u32,
    pub last_column: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub items: Vec<UnitItem>,
    pub loc: Location,
}

/// A top-level item. Bare statements and expressions appear when the
/// front-end is driven interactively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UnitItem {
    Module(Module),
    Program(Program),
    Subroutine(Subroutine),
    Function(Function),
    Stmt(Stmt),
    Expr(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub uses: Vec<Use>,
    pub decls: Vec<Decl>,
    pub contains: Vec<ProgramUnit>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub uses: Vec<Use>,
    pub decls: Vec<Decl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<ProgramUnit>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgramUnit {
    Subroutine(Subroutine),
    Function(Function),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subroutine {
    pub name: String,
    pub args: Vec<String>,
    pub decls: Vec<Decl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<ProgramUnit>,
    pub loc: Location,
}

/// `attributes` holds the function prefix; at most one entry may be a
/// type attribute (the declared return type). `return_name` is the
/// `result(name)` clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub args: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub return_name: Option<String>,
    pub decls: Vec<Decl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<ProgramUnit>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Use {
    pub module: String,
    pub symbols: Vec<UseSymbol>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseSymbol {
    pub sym: String,
    pub rename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decl {
    Declaration(Declaration),
    DerivedType(DerivedTypeDecl),
    Interface(InterfaceDecl),
}

/// `vartype` is `None` for attribute-only lines (`private`,
/// `public :: x`, `optional :: y`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declaration {
    pub vartype: Option<AttrType>,
    pub attributes: Vec<Attribute>,
    pub syms: Vec<VarSym>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrType {
    pub base: BaseType,
    pub kind: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BaseType {
    Integer,
    Real,
    Complex,
    Character,
    Logical,
    Type(String),
    Class(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Attribute {
    Simple(SimpleAttr),
    Intent(IntentAttr),
    Dimension(Vec<Dim>),
    Type(AttrType),
    Namelist(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimpleAttr {
    Private,
    Public,
    Parameter,
    Allocatable,
    Pointer,
    Optional,
    Target,
    Save,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentAttr {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dim {
    pub start: Option<Expr>,
    pub end: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarSym {
    pub name: String,
    pub dims: Vec<Dim>,
    pub initializer: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedTypeDecl {
    pub name: String,
    pub items: Vec<Declaration>,
    pub procs: Vec<BoundProc>,
    pub loc: Location,
}

/// A type-bound procedure: `procedure :: name => proc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundProc {
    pub name: String,
    pub proc: String,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub header: InterfaceHeader,
    pub items: Vec<InterfaceItem>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InterfaceHeader {
    Name(String),
    Anonymous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InterfaceItem {
    ModuleProcedures(Vec<String>),
    Proc(ProgramUnit),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Assignment {
        target: Expr,
        value: Expr,
        loc: Location,
    },
    // pointer association: p => t
    Associate {
        target: Expr,
        value: Expr,
        loc: Location,
    },
    SubroutineCall {
        name: String,
        // the object for a type-bound call: call obj%method(...)
        base: Option<String>,
        args: Vec<FnArg>,
        loc: Location,
    },
    Allocate {
        args: Vec<FnArg>,
        keywords: Vec<Keyword>,
        loc: Location,
    },
    Deallocate {
        args: Vec<FnArg>,
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
        var: Option<String>,
        start: Option<Expr>,
        end: Option<Expr>,
        increment: Option<Expr>,
        body: Vec<Stmt>,
        loc: Location,
    },
    DoConcurrentLoop {
        controls: Vec<ConcurrentControl>,
        body: Vec<Stmt>,
        loc: Location,
    },
    Select {
        test: Expr,
        body: Vec<CaseStmt>,
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
    Continue {
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
        args: Vec<ArgStar>,
        kwargs: Vec<Keyword>,
        values: Vec<Expr>,
        loc: Location,
    },
    Read {
        args: Vec<ArgStar>,
        kwargs: Vec<Keyword>,
        values: Vec<Expr>,
        loc: Location,
    },
    Open {
        label: i64,
        args: Vec<Expr>,
        kwargs: Vec<Keyword>,
        loc: Location,
    },
    Close {
        label: i64,
        args: Vec<Expr>,
        kwargs: Vec<Keyword>,
        loc: Location,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrentControl {
    pub var: Option<String>,
    pub start: Option<Expr>,
    pub end: Option<Expr>,
    pub increment: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaseStmt {
    Case {
        conds: Vec<CaseCond>,
        body: Vec<Stmt>,
        loc: Location,
    },
    Default {
        body: Vec<Stmt>,
        loc: Location,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaseCond {
    Expr(Expr),
    Range(Option<Expr>, Option<Expr>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub arg: String,
    pub value: Expr,
    pub loc: Location,
}

/// A positional argument of read/write that may be `*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgStar {
    pub value: Option<Expr>,
}

/// One argument of a call-or-subscript expression. A plain argument has
/// only `end` set; a section uses the full `start:end:step` triplet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FnArg {
    pub start: Option<Expr>,
    pub end: Option<Expr>,
    pub step: Option<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    /// A possibly qualified name: `id` then `%`-separated members in
    /// source order (`obj%f1%f2` has `id = "obj"`, `members = [f1, f2]`).
    Name {
        id: String,
        members: Vec<String>,
        loc: Location,
    },
    /// A call-shaped expression; resolves to a function call or an array
    /// subscript depending on what the name turns out to be.
    FuncCallOrArray {
        func: String,
        args: Vec<FnArg>,
        loc: Location,
    },
    Num {
        n: i64,
        loc: Location,
    },
    /// The literal spelling is kept so the kind suffix can be read off.
    Real {
        n: String,
        loc: Location,
    },
    Complex {
        re: Box<Expr>,
        im: Box<Expr>,
        loc: Location,
    },
    Str {
        s: String,
        loc: Location,
    },
    Logical {
        b: bool,
        loc: Location,
    },
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: Location,
    },
    BoolOp {
        op: BoolOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: Location,
    },
    Compare {
        op: CmpOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: Location,
    },
    StrOp {
        op: StrOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: Location,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
        loc: Location,
    },
    ArrayInitializer {
        args: Vec<Expr>,
        loc: Location,
    },
    Parenthesis {
        operand: Box<Expr>,
        loc: Location,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOpKind {
    And,
    Or,
    Eqv,
    NEqv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrOpKind {
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Not,
    USub,
    UAdd,
    Invert,
}

impl Expr {
    pub fn num(n: i64) -> Expr {
        Expr::Num {
            n,
            loc: Location::default(),
        }
    }
    pub fn real(n: &str) -> Expr {
        Expr::Real {
            n: n.to_string(),
            loc: Location::default(),
        }
    }
    pub fn str_lit(s: &str) -> Expr {
        Expr::Str {
            s: s.to_string(),
            loc: Location::default(),
        }
    }
    pub fn logical(b: bool) -> Expr {
        Expr::Logical {
            b,
            loc: Location::default(),
        }
    }
    pub fn name(id: &str) -> Expr {
        Expr::Name {
            id: id.to_string(),
            members: vec![],
            loc: Location::default(),
        }
    }

    fn bin(op: BinOpKind, l: Expr, r: Expr) -> Expr {
        Expr::BinOp {
            op,
            left: Box::new(l),
            right: Box::new(r),
            loc: Location::default(),
        }
    }
    pub fn add(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOpKind::Add, l, r)
    }
    pub fn sub(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOpKind::Sub, l, r)
    }
    pub fn mul(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOpKind::Mul, l, r)
    }
    pub fn div(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOpKind::Div, l, r)
    }
    pub fn pow(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOpKind::Pow, l, r)
    }

    fn cmp(op: CmpOpKind, l: Expr, r: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(l),
            right: Box::new(r),
            loc: Location::default(),
        }
    }
    pub fn eq(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOpKind::Eq, l, r)
    }
    pub fn ne(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOpKind::NotEq, l, r)
    }
    pub fn lt(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOpKind::Lt, l, r)
    }
    pub fn gt(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOpKind::Gt, l, r)
    }

    pub fn and(l: Expr, r: Expr) -> Expr {
        Expr::BoolOp {
            op: BoolOpKind::And,
            left: Box::new(l),
            right: Box::new(r),
            loc: Location::default(),
        }
    }
    pub fn or(l: Expr, r: Expr) -> Expr {
        Expr::BoolOp {
            op: BoolOpKind::Or,
            left: Box::new(l),
            right: Box::new(r),
            loc: Location::default(),
        }
    }
    pub fn concat(l: Expr, r: Expr) -> Expr {
        Expr::StrOp {
            op: StrOpKind::Concat,
            left: Box::new(l),
            right: Box::new(r),
            loc: Location::default(),
        }
    }
    pub fn neg(e: Expr) -> Expr {
        Expr::UnaryOp {
            op: UnaryOpKind::USub,
            operand: Box::new(e),
            loc: Location::default(),
        }
    }
    pub fn not(e: Expr) -> Expr {
        Expr::UnaryOp {
            op: UnaryOpKind::Not,
            operand: Box::new(e),
            loc: Location::default(),
        }
    }
    pub fn call(func: &str, args: Vec<Expr>) -> Expr {
        Expr::FuncCallOrArray {
            func: func.to_string(),
            args: args.into_iter().map(FnArg::plain).collect(),
            loc: Location::default(),
        }
    }
}

impl FnArg {
    pub fn plain(e: Expr) -> FnArg {
        FnArg {
            start: None,
            end: Some(e),
            step: None,
        }
    }
}
