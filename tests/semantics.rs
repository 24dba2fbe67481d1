//! End-to-end semantic-analysis scenarios: parse trees built by hand go
//! through both passes and the verifier, and the typed IR is inspected.

use fortsema::asr::{
    self, expr_value, Arena, CastKind, Expr, Intent, Stmt, Symbol, SymbolId, Ttype,
};
use fortsema::ast::{
    self, AttrType, Attribute, BaseType, Decl, Declaration, Dim, Expr as AstExpr, FnArg,
    Function, IntentAttr, InterfaceDecl, InterfaceHeader, InterfaceItem, Keyword, Location,
    Module, Program, ProgramUnit, SimpleAttr, Stmt as AstStmt, Subroutine, TranslationUnit,
    UnitItem, Use, UseSymbol, VarSym,
};
use fortsema::errors::SemanticError;
use fortsema::intrinsics::IntrinsicModules;

fn loc() -> Location {
    Location::default()
}

fn var_sym(name: &str) -> VarSym {
    VarSym {
        name: name.to_string(),
        dims: vec![],
        initializer: None,
        loc: loc(),
    }
}

fn typed_decl(base: BaseType, attributes: Vec<Attribute>, syms: Vec<VarSym>) -> Decl {
    Decl::Declaration(Declaration {
        vartype: Some(AttrType {
            base,
            kind: None,
            loc: loc(),
        }),
        attributes,
        syms,
        loc: loc(),
    })
}

fn simple_decl(base: BaseType, names: &[&str]) -> Decl {
    typed_decl(base, vec![], names.iter().map(|n| var_sym(n)).collect())
}

/// `<base>, allocatable :: <name>(:)`
fn allocatable_decl(base: BaseType, name: &str) -> Decl {
    let mut s = var_sym(name);
    s.dims = vec![Dim {
        start: None,
        end: None,
        loc: loc(),
    }];
    typed_decl(base, vec![Attribute::Simple(SimpleAttr::Allocatable)], vec![s])
}

fn assign(name: &str, value: AstExpr) -> AstStmt {
    AstStmt::Assignment {
        target: AstExpr::name(name),
        value,
        loc: loc(),
    }
}

fn program(name: &str, decls: Vec<Decl>, body: Vec<AstStmt>) -> Program {
    Program {
        name: name.to_string(),
        uses: vec![],
        decls,
        body,
        contains: vec![],
        loc: loc(),
    }
}

fn unit(items: Vec<UnitItem>) -> TranslationUnit {
    TranslationUnit { items, loc: loc() }
}

fn analyze(u: &TranslationUnit) -> (Arena, Result<asr::TranslationUnit, SemanticError>) {
    let mut arena = Arena::new();
    let mut loader = IntrinsicModules;
    let r = fortsema::ast_to_asr(&mut arena, u, &mut loader);
    (arena, r)
}

fn program_body<'a>(arena: &'a Arena, tu: &asr::TranslationUnit, name: &str) -> &'a [Stmt] {
    let id = arena.get(tu.global_scope, name).expect("program missing");
    match arena.symbol(id) {
        Symbol::Program(p) => &p.body,
        other => panic!("'{}' is not a program: {:?}", name, other),
    }
}

fn lookup_variable<'a>(arena: &'a Arena, scope: asr::ScopeId, name: &str) -> &'a asr::Variable {
    let id = arena.resolve(scope, name).expect("variable missing");
    match arena.symbol(arena.past_external(id)) {
        Symbol::Variable(v) => v,
        other => panic!("'{}' is not a variable: {:?}", name, other),
    }
}

#[test]
fn integer_constant_folding() {
    // program p; integer :: x; x = 2 + 3*4; end program
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Integer, &["x"])],
        vec![assign(
            "x",
            AstExpr::add(AstExpr::num(2), AstExpr::mul(AstExpr::num(3), AstExpr::num(4))),
        )],
    ))]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::Assignment { target, value, .. } = &body[0] else {
        panic!("expected an assignment, got {:?}", body[0]);
    };
    match expr_value(value) {
        Some(Expr::ConstantInteger { n, .. }) => assert_eq!(*n, 14),
        other => panic!("RHS did not fold: {:?}", other),
    }
    let Expr::Var { sym, .. } = target else {
        panic!("LHS is not a variable")
    };
    match arena.symbol(*sym) {
        Symbol::Variable(v) => assert_eq!(v.ty, Ttype::integer(4)),
        other => panic!("unexpected target symbol {:?}", other),
    }
}

#[test]
fn integer_operand_promoted_to_real() {
    // real :: r; r = 1 + 2.0
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Real, &["r"])],
        vec![assign("r", AstExpr::add(AstExpr::num(1), AstExpr::real("2.0")))],
    ))]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::Assignment { value, .. } = &body[0] else {
        panic!("expected an assignment");
    };
    let Expr::BinOp {
        left, right, ty, ..
    } = value
    else {
        panic!("expected a binary op, got {:?}", value);
    };
    assert_eq!(*ty, Ttype::real(4));
    match left.as_ref() {
        Expr::ImplicitCast { cast_kind, ty, .. } => {
            assert_eq!(*cast_kind, CastKind::IntegerToReal);
            assert_eq!(*ty, Ttype::real(4));
        }
        other => panic!("expected a cast around the literal 1, got {:?}", other),
    }
    assert_eq!(asr::expr_type(&arena, left).base(), asr::expr_type(&arena, right).base());
}

fn one_arg_subroutine(name: &str, base: BaseType) -> ProgramUnit {
    ProgramUnit::Subroutine(Subroutine {
        name: name.to_string(),
        args: vec!["x".to_string()],
        decls: vec![typed_decl(
            base,
            vec![Attribute::Intent(IntentAttr::In)],
            vec![var_sym("x")],
        )],
        body: vec![],
        contains: vec![],
        loc: loc(),
    })
}

fn generic_program(call_arg: AstExpr) -> TranslationUnit {
    let interface = Decl::Interface(InterfaceDecl {
        header: InterfaceHeader::Name("g".to_string()),
        items: vec![InterfaceItem::ModuleProcedures(vec![
            "gi".to_string(),
            "gr".to_string(),
        ])],
        loc: loc(),
    });
    let mut p = program(
        "p",
        vec![interface],
        vec![AstStmt::SubroutineCall {
            name: "g".to_string(),
            base: None,
            args: vec![FnArg::plain(call_arg)],
            loc: loc(),
        }],
    );
    p.contains = vec![
        one_arg_subroutine("gi", BaseType::Integer),
        one_arg_subroutine("gr", BaseType::Real),
    ];
    unit(vec![UnitItem::Program(p)])
}

#[test]
fn generic_call_dispatches_on_argument_type() {
    let (arena, tu) = analyze(&generic_program(AstExpr::real("1.0")));
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::SubroutineCall { sym, original, .. } = &body[0] else {
        panic!("expected a call, got {:?}", body[0]);
    };
    assert_eq!(arena.symbol_name(*sym), "gr");
    let original = original.expect("generic origin not recorded");
    assert!(matches!(
        arena.symbol(original),
        Symbol::GenericProcedure(_)
    ));

    let (arena, tu) = analyze(&generic_program(AstExpr::num(1)));
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::SubroutineCall { sym, .. } = &body[0] else {
        panic!("expected a call");
    };
    assert_eq!(arena.symbol_name(*sym), "gi");
}

#[test]
fn generic_call_without_match_is_rejected() {
    let (_, tu) = analyze(&generic_program(AstExpr::str_lit("s")));
    let err = tu.expect_err("expected overload resolution to fail");
    assert_eq!(err.message, "Arguments do not match");
}

#[test]
fn use_with_rename_creates_external_symbol() {
    // module m: integer :: bar.  module n: use m, only: foo => bar
    let m = Module {
        name: "m".to_string(),
        uses: vec![],
        decls: vec![simple_decl(BaseType::Integer, &["bar"])],
        contains: vec![],
        loc: loc(),
    };
    let n = Module {
        name: "n".to_string(),
        uses: vec![Use {
            module: "m".to_string(),
            symbols: vec![UseSymbol {
                sym: "bar".to_string(),
                rename: Some("foo".to_string()),
            }],
            loc: loc(),
        }],
        decls: vec![],
        contains: vec![],
        loc: loc(),
    };
    let u = unit(vec![UnitItem::Module(m), UnitItem::Module(n)]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");

    let m_id = arena.get(tu.global_scope, "m").unwrap();
    let n_id = arena.get(tu.global_scope, "n").unwrap();
    let (m_symtab, n_symtab, n_deps) = match (arena.symbol(m_id), arena.symbol(n_id)) {
        (Symbol::Module(m), Symbol::Module(n)) => {
            (m.symtab, n.symtab, n.dependencies.clone())
        }
        _ => panic!("modules missing"),
    };
    assert_eq!(n_deps, vec!["m".to_string()]);
    let foo = arena.get(n_symtab, "foo").expect("alias missing");
    match arena.symbol(foo) {
        Symbol::External(e) => {
            assert_eq!(e.original_name, "bar");
            assert_eq!(e.module_name, "m");
            assert_eq!(Some(e.external), arena.get(m_symtab, "bar"));
        }
        other => panic!("'foo' is not an external symbol: {:?}", other),
    }
}

#[test]
fn allocatable_local_gets_implicit_deallocate() {
    // subroutine s: integer, allocatable :: a(:)  (no explicit deallocate)
    let s = Subroutine {
        name: "s".to_string(),
        args: vec![],
        decls: vec![allocatable_decl(BaseType::Integer, "a")],
        body: vec![],
        contains: vec![],
        loc: loc(),
    };
    let u = unit(vec![UnitItem::Subroutine(s)]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let s_id = arena.get(tu.global_scope, "s").unwrap();
    let (symtab, body) = match arena.symbol(s_id) {
        Symbol::Subroutine(s) => (s.symtab, &s.body),
        _ => panic!("subroutine missing"),
    };
    assert_eq!(body.len(), 1);
    let Stmt::ImplicitDeallocate { syms, .. } = &body[0] else {
        panic!("body does not end in an implicit deallocate: {:?}", body[0]);
    };
    let a = arena.get(symtab, "a").unwrap();
    assert_eq!(syms, &vec![a]);
}

#[test]
fn intent_out_allocatable_argument_deallocated_before_call() {
    let sink = Subroutine {
        name: "sink".to_string(),
        args: vec!["a".to_string()],
        decls: vec![{
            let mut s = var_sym("a");
            s.dims = vec![Dim {
                start: None,
                end: None,
                loc: loc(),
            }];
            typed_decl(
                BaseType::Integer,
                vec![
                    Attribute::Simple(SimpleAttr::Allocatable),
                    Attribute::Intent(IntentAttr::Out),
                ],
                vec![s],
            )
        }],
        body: vec![],
        contains: vec![],
        loc: loc(),
    };
    let p = program(
        "p",
        vec![allocatable_decl(BaseType::Integer, "x")],
        vec![AstStmt::SubroutineCall {
            name: "sink".to_string(),
            base: None,
            args: vec![FnArg::plain(AstExpr::name("x"))],
            loc: loc(),
        }],
    );
    let u = unit(vec![UnitItem::Subroutine(sink), UnitItem::Program(p)]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    assert_eq!(body.len(), 3);
    assert!(matches!(body[0], Stmt::ImplicitDeallocate { .. }));
    assert!(matches!(body[1], Stmt::SubroutineCall { .. }));
    assert!(matches!(body[2], Stmt::ImplicitDeallocate { .. }));
}

#[test]
fn cross_module_field_access_shares_one_alias() {
    // module m: type t (integer :: x); type(t) :: obj
    // program p: use m, only: obj; y = obj%x, twice
    let t = Decl::DerivedType(ast::DerivedTypeDecl {
        name: "t".to_string(),
        items: vec![Declaration {
            vartype: Some(AttrType {
                base: BaseType::Integer,
                kind: None,
                loc: loc(),
            }),
            attributes: vec![],
            syms: vec![var_sym("x")],
            loc: loc(),
        }],
        procs: vec![],
        loc: loc(),
    });
    let m = Module {
        name: "m".to_string(),
        uses: vec![],
        decls: vec![t, simple_decl(BaseType::Type("t".to_string()), &["obj"])],
        contains: vec![],
        loc: loc(),
    };
    let field_ref = AstExpr::Name {
        id: "obj".to_string(),
        members: vec!["x".to_string()],
        loc: loc(),
    };
    let mut p = program(
        "p",
        vec![simple_decl(BaseType::Integer, &["y"])],
        vec![
            assign("y", field_ref.clone()),
            assign("y", field_ref),
        ],
    );
    p.uses = vec![Use {
        module: "m".to_string(),
        symbols: vec![UseSymbol {
            sym: "obj".to_string(),
            rename: None,
        }],
        loc: loc(),
    }];
    let u = unit(vec![UnitItem::Module(m), UnitItem::Program(p)]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let p_id = arena.get(tu.global_scope, "p").unwrap();
    let p_symtab = match arena.symbol(p_id) {
        Symbol::Program(p) => p.symtab,
        _ => panic!("program missing"),
    };
    let alias = arena.get(p_symtab, "1_m_t").expect("mangled alias missing");
    match arena.symbol(alias) {
        Symbol::External(e) => {
            assert_eq!(e.original_name, "t");
            assert_eq!(e.module_name, "m");
        }
        other => panic!("'1_m_t' is not an external symbol: {:?}", other),
    }
    let mangled: Vec<&String> = arena
        .scope(p_symtab)
        .symbols
        .keys()
        .filter(|k| k.starts_with("1_"))
        .collect();
    assert_eq!(mangled.len(), 1, "a second access must reuse the alias");
}

#[test]
fn lazy_intrinsic_import_updates_module_dependencies() {
    // module mm contains a function whose body calls abs()
    let af = ProgramUnit::Function(Function {
        name: "af".to_string(),
        args: vec![],
        attributes: vec![Attribute::Type(AttrType {
            base: BaseType::Real,
            kind: None,
            loc: loc(),
        })],
        return_name: None,
        decls: vec![],
        body: vec![assign("af", AstExpr::call("abs", vec![AstExpr::real("2.0")]))],
        contains: vec![],
        loc: loc(),
    });
    let mm = Module {
        name: "mm".to_string(),
        uses: vec![],
        decls: vec![],
        contains: vec![af],
        loc: loc(),
    };
    let (arena, tu) = analyze(&unit(vec![UnitItem::Module(mm)]));
    let tu = tu.expect("analysis failed");
    let mm_id = arena.get(tu.global_scope, "mm").unwrap();
    match arena.symbol(mm_id) {
        Symbol::Module(m) => {
            assert!(m
                .dependencies
                .contains(&"lfortran_intrinsic_array".to_string()));
        }
        _ => panic!("module missing"),
    }
    // the intrinsic module itself landed in the global scope
    assert!(arena.get(tu.global_scope, "lfortran_intrinsic_array").is_some());
}

#[test]
fn elementary_intrinsic_synthesized_in_global_scope() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Real, &["r"])],
        vec![assign("r", AstExpr::call("sin", vec![AstExpr::name("r")]))],
    ))]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let sin = arena.get(tu.global_scope, "sin").expect("sin missing");
    match arena.symbol(sin) {
        Symbol::Function(f) => {
            assert_eq!(f.abi, asr::Abi::Intrinsic);
            match arena.symbol(f.return_var) {
                Symbol::Variable(v) => assert_eq!(v.ty, Ttype::real(4)),
                _ => panic!("return variable missing"),
            }
        }
        other => panic!("'sin' is not a function: {:?}", other),
    }
}

#[test]
fn use_without_only_imports_every_declaration() {
    let m = Module {
        name: "m2".to_string(),
        uses: vec![],
        decls: vec![simple_decl(BaseType::Integer, &["a", "b"])],
        contains: vec![],
        loc: loc(),
    };
    let mut p = program(
        "p",
        vec![],
        vec![assign("a", AstExpr::name("b"))],
    );
    p.uses = vec![Use {
        module: "m2".to_string(),
        symbols: vec![],
        loc: loc(),
    }];
    let u = unit(vec![UnitItem::Module(m), UnitItem::Program(p)]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let p_id = arena.get(tu.global_scope, "p").unwrap();
    let p_symtab = match arena.symbol(p_id) {
        Symbol::Program(p) => p.symtab,
        _ => panic!("program missing"),
    };
    assert!(matches!(
        arena.symbol(arena.get(p_symtab, "a").unwrap()),
        Symbol::External(_)
    ));
    assert!(matches!(
        arena.symbol(arena.get(p_symtab, "b").unwrap()),
        Symbol::External(_)
    ));
}

#[test]
fn kind_argument_reads_integer_parameters() {
    // integer, parameter :: dp = 8; real(dp) :: x; x = 1.0
    let dp = typed_decl(
        BaseType::Integer,
        vec![Attribute::Simple(SimpleAttr::Parameter)],
        vec![{
            let mut s = var_sym("dp");
            s.initializer = Some(AstExpr::num(8));
            s
        }],
    );
    let x = Decl::Declaration(Declaration {
        vartype: Some(AttrType {
            base: BaseType::Real,
            kind: Some(AstExpr::name("dp")),
            loc: loc(),
        }),
        attributes: vec![],
        syms: vec![var_sym("x")],
        loc: loc(),
    });
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![dp, x],
        vec![assign("x", AstExpr::real("1.0"))],
    ))]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let p_id = arena.get(tu.global_scope, "p").unwrap();
    let p_symtab = match arena.symbol(p_id) {
        Symbol::Program(p) => p.symtab,
        _ => panic!("program missing"),
    };
    assert_eq!(lookup_variable(&arena, p_symtab, "x").ty, Ttype::real(8));
    // the kind-4 literal is widened on assignment
    let body = program_body(&arena, &tu, "p");
    let Stmt::Assignment { value, .. } = &body[0] else {
        panic!("expected an assignment");
    };
    match value {
        Expr::ImplicitCast { cast_kind, .. } => {
            assert_eq!(*cast_kind, CastKind::RealToReal)
        }
        other => panic!("expected a kind cast, got {:?}", other),
    }
}

#[test]
fn redeclaration_in_one_scope_is_rejected() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![
            simple_decl(BaseType::Integer, &["x"]),
            simple_decl(BaseType::Real, &["x"]),
        ],
        vec![],
    ))]);
    let (_, tu) = analyze(&u);
    let err = tu.expect_err("expected a redeclaration error");
    assert_eq!(err.message, "Symbol already declared");
}

#[test]
fn comparing_logicals_with_lt_is_rejected() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Logical, &["a", "b"])],
        vec![AstStmt::If {
            test: AstExpr::lt(AstExpr::name("a"), AstExpr::name("b")),
            body: vec![],
            orelse: vec![],
            loc: loc(),
        }],
    ))]);
    let (_, tu) = analyze(&u);
    let err = tu.expect_err("expected a compare error");
    assert_eq!(
        err.message,
        "Compare: only Integer or Real can be on the LHS and RHS. \
         If operator is .eq. or .neq. then Complex type is also acceptable"
    );
}

#[test]
fn function_prefix_type_creates_return_variable() {
    let f = Function {
        name: "f".to_string(),
        args: vec![],
        attributes: vec![Attribute::Type(AttrType {
            base: BaseType::Integer,
            kind: None,
            loc: loc(),
        })],
        return_name: None,
        decls: vec![],
        body: vec![assign("f", AstExpr::num(1))],
        contains: vec![],
        loc: loc(),
    };
    let (arena, tu) = analyze(&unit(vec![UnitItem::Function(f)]));
    let tu = tu.expect("analysis failed");
    let f_id = arena.get(tu.global_scope, "f").unwrap();
    match arena.symbol(f_id) {
        Symbol::Function(f) => match arena.symbol(f.return_var) {
            Symbol::Variable(v) => {
                assert_eq!(v.intent, Intent::ReturnVar);
                assert_eq!(v.ty, Ttype::integer(4));
            }
            _ => panic!("return variable missing"),
        },
        _ => panic!("function missing"),
    }
}

#[test]
fn declaring_the_return_type_twice_is_rejected() {
    let f = Function {
        name: "f".to_string(),
        args: vec![],
        attributes: vec![Attribute::Type(AttrType {
            base: BaseType::Integer,
            kind: None,
            loc: loc(),
        })],
        return_name: None,
        decls: vec![simple_decl(BaseType::Integer, &["f"])],
        body: vec![],
        contains: vec![],
        loc: loc(),
    };
    let (_, tu) = analyze(&unit(vec![UnitItem::Function(f)]));
    let err = tu.expect_err("expected an error");
    assert_eq!(err.message, "Cannot specify the return type twice");
}

#[test]
fn result_clause_promotes_local_to_return_variable() {
    let f = Function {
        name: "f".to_string(),
        args: vec![],
        attributes: vec![],
        return_name: Some("res".to_string()),
        decls: vec![simple_decl(BaseType::Real, &["res"])],
        body: vec![assign("res", AstExpr::real("1.0"))],
        contains: vec![],
        loc: loc(),
    };
    let (arena, tu) = analyze(&unit(vec![UnitItem::Function(f)]));
    let tu = tu.expect("analysis failed");
    let f_id = arena.get(tu.global_scope, "f").unwrap();
    match arena.symbol(f_id) {
        Symbol::Function(f) => {
            assert_eq!(arena.symbol_name(f.return_var), "res");
            match arena.symbol(f.return_var) {
                Symbol::Variable(v) => assert_eq!(v.intent, Intent::ReturnVar),
                _ => panic!("return variable missing"),
            }
        }
        _ => panic!("function missing"),
    }
}

#[test]
fn allocate_defaults_missing_lower_bounds() {
    // allocate(a(5), stat=ierr)
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![
            allocatable_decl(BaseType::Integer, "a"),
            simple_decl(BaseType::Integer, &["ierr"]),
        ],
        vec![AstStmt::Allocate {
            args: vec![FnArg::plain(AstExpr::call("a", vec![AstExpr::num(5)]))],
            keywords: vec![Keyword {
                arg: "stat".to_string(),
                value: AstExpr::name("ierr"),
                loc: loc(),
            }],
            loc: loc(),
        }],
    ))]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::Allocate { args, stat, .. } = &body[0] else {
        panic!("expected an allocate, got {:?}", body[0]);
    };
    assert!(stat.is_some());
    assert_eq!(args.len(), 1);
    let dims = &args[0].dims;
    assert_eq!(dims.len(), 1);
    match &dims[0].start {
        Some(Expr::ConstantInteger { n: 1, .. }) => {}
        other => panic!("lower bound did not default to 1: {:?}", other),
    }
    match &dims[0].end {
        Some(Expr::ConstantInteger { n: 5, .. }) => {}
        other => panic!("upper bound wrong: {:?}", other),
    }
}

#[test]
fn deallocating_a_plain_variable_is_rejected() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Integer, &["x"])],
        vec![AstStmt::Deallocate {
            args: vec![FnArg::plain(AstExpr::name("x"))],
            loc: loc(),
        }],
    ))]);
    let (_, tu) = analyze(&u);
    let err = tu.expect_err("expected an error");
    assert_eq!(
        err.message,
        "Only an allocatable variable symbol can be deallocated."
    );
}

#[test]
fn select_case_selector_must_be_integer() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Real, &["r"])],
        vec![AstStmt::Select {
            test: AstExpr::name("r"),
            body: vec![],
            loc: loc(),
        }],
    ))]);
    let (_, tu) = analyze(&u);
    let err = tu.expect_err("expected an error");
    assert_eq!(err.message, "Expression in Case selector can only be an Integer");
}

#[test]
fn select_case_lowers_values_ranges_and_default() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Integer, &["n", "x"])],
        vec![AstStmt::Select {
            test: AstExpr::name("n"),
            body: vec![
                ast::CaseStmt::Case {
                    conds: vec![
                        ast::CaseCond::Expr(AstExpr::num(1)),
                        ast::CaseCond::Expr(AstExpr::num(2)),
                    ],
                    body: vec![assign("x", AstExpr::num(1))],
                    loc: loc(),
                },
                ast::CaseStmt::Case {
                    conds: vec![ast::CaseCond::Range(
                        Some(AstExpr::num(3)),
                        Some(AstExpr::num(9)),
                    )],
                    body: vec![assign("x", AstExpr::num(2))],
                    loc: loc(),
                },
                ast::CaseStmt::Default {
                    body: vec![assign("x", AstExpr::num(3))],
                    loc: loc(),
                },
            ],
            loc: loc(),
        }],
    ))]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::Select { cases, default, .. } = &body[0] else {
        panic!("expected a select, got {:?}", body[0]);
    };
    assert_eq!(cases.len(), 2);
    assert!(matches!(&cases[0], asr::CaseStmt::Values { tests, .. } if tests.len() == 2));
    assert!(matches!(&cases[1], asr::CaseStmt::Range { .. }));
    assert_eq!(default.len(), 1);
}

#[test]
fn pointer_association_requires_matching_base_types() {
    let ok = unit(vec![UnitItem::Program(program(
        "p",
        vec![
            typed_decl(
                BaseType::Integer,
                vec![Attribute::Simple(SimpleAttr::Pointer)],
                vec![var_sym("q")],
            ),
            simple_decl(BaseType::Integer, &["t"]),
        ],
        vec![AstStmt::Associate {
            target: AstExpr::name("q"),
            value: AstExpr::name("t"),
            loc: loc(),
        }],
    ))]);
    let (arena, tu) = analyze(&ok);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    assert!(matches!(body[0], Stmt::Associate { .. }));

    let bad = unit(vec![UnitItem::Program(program(
        "p",
        vec![
            typed_decl(
                BaseType::Real,
                vec![Attribute::Simple(SimpleAttr::Pointer)],
                vec![var_sym("q")],
            ),
            simple_decl(BaseType::Integer, &["t"]),
        ],
        vec![AstStmt::Associate {
            target: AstExpr::name("q"),
            value: AstExpr::name("t"),
            loc: loc(),
        }],
    ))]);
    let (_, tu) = analyze(&bad);
    let err = tu.expect_err("expected an error");
    assert_eq!(err.message, "Pointer and target must have the same base type");
}

#[test]
fn assigning_integer_to_character_is_rejected() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Character, &["c"])],
        vec![assign("c", AstExpr::num(1))],
    ))]);
    let (_, tu) = analyze(&u);
    let err = tu.expect_err("expected an error");
    assert_eq!(
        err.message,
        "Only Character Pointer can be assigned to Character"
    );
}

#[test]
fn unknown_module_is_reported_by_the_loader() {
    let mut p = program("p", vec![], vec![]);
    p.uses = vec![Use {
        module: "nosuch".to_string(),
        symbols: vec![],
        loc: loc(),
    }];
    let (_, tu) = analyze(&unit(vec![UnitItem::Program(p)]));
    let err = tu.expect_err("expected an error");
    assert_eq!(err.message, "Module 'nosuch' not found");
}

#[test]
fn undeclared_name_is_reported() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Integer, &["x"])],
        vec![assign("x", AstExpr::name("nope"))],
    ))]);
    let (_, tu) = analyze(&u);
    let err = tu.expect_err("expected an error");
    assert_eq!(err.message, "Variable 'nope' not declared");
}

#[test]
fn concatenation_produces_a_character_node() {
    let u = unit(vec![UnitItem::Program(program(
        "p",
        vec![simple_decl(BaseType::Character, &["c"])],
        vec![assign(
            "c",
            AstExpr::concat(AstExpr::str_lit("a"), AstExpr::str_lit("b")),
        )],
    ))]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::Assignment { value, .. } = &body[0] else {
        panic!("expected an assignment");
    };
    let Expr::StrOp { ty, .. } = value else {
        panic!("expected a concatenation, got {:?}", value);
    };
    assert_eq!(ty.base(), asr::TypeBase::Character);
}

#[test]
fn type_bound_procedure_resolves_through_member_scope() {
    // module m: type t with procedure :: go => impl; subroutine impl
    // program: use m, only: obj; call obj%go()
    let t = Decl::DerivedType(ast::DerivedTypeDecl {
        name: "t".to_string(),
        items: vec![Declaration {
            vartype: Some(AttrType {
                base: BaseType::Integer,
                kind: None,
                loc: loc(),
            }),
            attributes: vec![],
            syms: vec![var_sym("x")],
            loc: loc(),
        }],
        procs: vec![ast::BoundProc {
            name: "go".to_string(),
            proc: "impl".to_string(),
            loc: loc(),
        }],
        loc: loc(),
    });
    let impl_sub = ProgramUnit::Subroutine(Subroutine {
        name: "impl".to_string(),
        args: vec![],
        decls: vec![],
        body: vec![],
        contains: vec![],
        loc: loc(),
    });
    let m = Module {
        name: "m".to_string(),
        uses: vec![],
        decls: vec![t, simple_decl(BaseType::Type("t".to_string()), &["obj"])],
        contains: vec![impl_sub],
        loc: loc(),
    };
    let mut p = program(
        "p",
        vec![],
        vec![AstStmt::SubroutineCall {
            name: "go".to_string(),
            base: Some("obj".to_string()),
            args: vec![],
            loc: loc(),
        }],
    );
    p.uses = vec![Use {
        module: "m".to_string(),
        symbols: vec![UseSymbol {
            sym: "obj".to_string(),
            rename: None,
        }],
        loc: loc(),
    }];
    let u = unit(vec![UnitItem::Module(m), UnitItem::Program(p)]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    let body = program_body(&arena, &tu, "p");
    let Stmt::SubroutineCall { sym, original, .. } = &body[0] else {
        panic!("expected a call, got {:?}", body[0]);
    };
    assert_eq!(arena.symbol_name(*sym), "impl");
    let original = original.expect("class-procedure origin missing");
    assert!(matches!(arena.symbol(original), Symbol::ClassProcedure(_)));
}

/// External-symbol aliases never chain, whatever path created them.
fn assert_no_external_chains(arena: &Arena) {
    for (_, sym) in arena.symbols() {
        if let Symbol::External(e) = sym {
            assert!(
                !matches!(arena.symbol(e.external), Symbol::External(_)),
                "external symbol '{}' chains",
                e.name
            );
        }
    }
}

#[test]
fn reexported_symbols_collapse_to_the_owning_declaration() {
    // module a: integer :: v.  module b: use a (re-exports v).
    // module c: use b, only: v  -- the alias must point straight at a's v
    let a = Module {
        name: "a".to_string(),
        uses: vec![],
        decls: vec![simple_decl(BaseType::Integer, &["v"])],
        contains: vec![],
        loc: loc(),
    };
    let b = Module {
        name: "b".to_string(),
        uses: vec![Use {
            module: "a".to_string(),
            symbols: vec![],
            loc: loc(),
        }],
        decls: vec![],
        contains: vec![],
        loc: loc(),
    };
    let c = Module {
        name: "c".to_string(),
        uses: vec![Use {
            module: "b".to_string(),
            symbols: vec![UseSymbol {
                sym: "v".to_string(),
                rename: None,
            }],
            loc: loc(),
        }],
        decls: vec![],
        contains: vec![],
        loc: loc(),
    };
    let u = unit(vec![
        UnitItem::Module(a),
        UnitItem::Module(b),
        UnitItem::Module(c),
    ]);
    let (arena, tu) = analyze(&u);
    let tu = tu.expect("analysis failed");
    assert_no_external_chains(&arena);
    let a_id = arena.get(tu.global_scope, "a").unwrap();
    let c_id = arena.get(tu.global_scope, "c").unwrap();
    let (a_symtab, c_symtab) = match (arena.symbol(a_id), arena.symbol(c_id)) {
        (Symbol::Module(a), Symbol::Module(c)) => (a.symtab, c.symtab),
        _ => panic!("modules missing"),
    };
    let v_decl: SymbolId = arena.get(a_symtab, "v").unwrap();
    match arena.symbol(arena.get(c_symtab, "v").unwrap()) {
        Symbol::External(e) => assert_eq!(e.external, v_decl),
        other => panic!("'v' in c is not an external symbol: {:?}", other),
    }
}
