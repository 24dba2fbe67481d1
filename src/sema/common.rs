//! Operator and constant lowering shared by the two passes.
//!
//! Both visitors meet constants and operators (pass 1 in kind arguments
//! and initializers, pass 2 everywhere), so the node construction lives
//! here. Operand coercion goes through the cast engine; integer
//! arithmetic over two folded operands is evaluated at compile time.

use crate::asr::{
    expr_type, expr_value, Arena, BinopType, BoolopType, CmpopType, Expr, StropType, Symbol,
    Ttype, TypeBase, UnaryopType,
};
use crate::ast;
use crate::ast::Location;
use crate::errors::{ErrorKind, Result, SemanticError};

use super::cast;

pub fn integer_constant(n: i64, loc: Location) -> Expr {
    Expr::ConstantInteger {
        n,
        ty: Ttype::integer(4),
        loc,
    }
}

/// The literal spelling decides the kind: a `d` exponent or an `_8`
/// suffix selects kind 8.
pub fn real_constant(spelling: &str, loc: Location) -> Expr {
    let kind = if spelling.contains('d') || spelling.contains('D') || spelling.ends_with("_8") {
        8
    } else {
        4
    };
    let mut text = spelling.replace(['d', 'D'], "e");
    if let Some(pos) = text.find('_') {
        text.truncate(pos);
    }
    let r = text.parse::<f64>().unwrap_or(0.0);
    Expr::ConstantReal {
        r,
        ty: Ttype::real(kind),
        loc,
    }
}

pub fn string_constant(s: &str, loc: Location) -> Expr {
    Expr::ConstantString {
        s: s.to_string(),
        ty: Ttype::character(8),
        loc,
    }
}

pub fn logical_constant(b: bool, loc: Location) -> Expr {
    Expr::ConstantLogical {
        b,
        ty: Ttype::logical(4),
        loc,
    }
}

/// The constant's kind is the wider of the two parts.
pub fn complex_constant(arena: &Arena, re: Expr, im: Expr, loc: Location) -> Expr {
    let re_kind = expr_type(arena, &re).kind();
    let im_kind = expr_type(arena, &im).kind();
    Expr::ConstantComplex {
        re: Box::new(re),
        im: Box::new(im),
        ty: Ttype::complex(re_kind.max(im_kind)),
        loc,
    }
}

fn int_value(e: &Expr) -> Option<i64> {
    match expr_value(e) {
        Some(Expr::ConstantInteger { n, .. }) => Some(*n),
        _ => None,
    }
}

pub fn make_binop(
    arena: &Arena,
    loc: Location,
    op: ast::BinOpKind,
    mut left: Expr,
    mut right: Expr,
) -> Result<Expr> {
    let op = match op {
        ast::BinOpKind::Add => BinopType::Add,
        ast::BinOpKind::Sub => BinopType::Sub,
        ast::BinOpKind::Mul => BinopType::Mul,
        ast::BinOpKind::Div => BinopType::Div,
        ast::BinOpKind::Pow => BinopType::Pow,
    };
    let dest_type = cast::coerce_operands(arena, loc, &mut left, &mut right)?;
    let mut value = None;
    if dest_type.base() == TypeBase::Integer {
        if let (Some(lv), Some(rv)) = (int_value(&left), int_value(&right)) {
            let folded = match op {
                BinopType::Add => lv.checked_add(rv),
                BinopType::Sub => lv.checked_sub(rv),
                BinopType::Mul => lv.checked_mul(rv),
                BinopType::Div => {
                    if rv != 0 {
                        lv.checked_div(rv)
                    } else {
                        None
                    }
                }
                BinopType::Pow => {
                    if (0..=u32::MAX as i64).contains(&rv) {
                        lv.checked_pow(rv as u32)
                    } else {
                        None
                    }
                }
            };
            if let Some(n) = folded {
                value = Some(Box::new(Expr::ConstantInteger {
                    n,
                    ty: dest_type.clone(),
                    loc,
                }));
            }
        }
    }
    Ok(Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty: dest_type,
        value,
        loc,
    })
}

pub fn make_compare(
    arena: &Arena,
    loc: Location,
    op: ast::CmpOpKind,
    mut left: Expr,
    mut right: Expr,
) -> Result<Expr> {
    let left_type = expr_type(arena, &left);
    let right_type = expr_type(arena, &right);
    let numeric = |t: &Ttype| matches!(t.base(), TypeBase::Integer | TypeBase::Real);
    let eq_like = matches!(op, ast::CmpOpKind::Eq | ast::CmpOpKind::NotEq);
    if !numeric(&left_type)
        && !numeric(&right_type)
        && ((left_type.base() != TypeBase::Complex || right_type.base() != TypeBase::Complex)
            && !eq_like)
    {
        return Err(SemanticError::new(
            ErrorKind::TypeMismatch,
            "Compare: only Integer or Real can be on the LHS and RHS. \
             If operator is .eq. or .neq. then Complex type is also acceptable",
            loc,
        ));
    }
    cast::coerce_operands(arena, loc, &mut left, &mut right)?;
    let op = match op {
        ast::CmpOpKind::Eq => CmpopType::Eq,
        ast::CmpOpKind::NotEq => CmpopType::NotEq,
        ast::CmpOpKind::Lt => CmpopType::Lt,
        ast::CmpOpKind::LtE => CmpopType::LtE,
        ast::CmpOpKind::Gt => CmpopType::Gt,
        ast::CmpOpKind::GtE => CmpopType::GtE,
    };
    Ok(Expr::Compare {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty: Ttype::logical(4),
        loc,
    })
}

pub fn make_boolop(
    arena: &Arena,
    loc: Location,
    op: ast::BoolOpKind,
    mut left: Expr,
    mut right: Expr,
) -> Result<Expr> {
    let op = match op {
        ast::BoolOpKind::And => BoolopType::And,
        ast::BoolOpKind::Or => BoolopType::Or,
        ast::BoolOpKind::Eqv => BoolopType::Eqv,
        ast::BoolOpKind::NEqv => BoolopType::NEqv,
    };
    let dest_type = cast::coerce_operands(arena, loc, &mut left, &mut right)?;
    Ok(Expr::BoolOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty: dest_type,
        loc,
    })
}

pub fn make_strop(
    arena: &Arena,
    loc: Location,
    op: ast::StrOpKind,
    mut left: Expr,
    mut right: Expr,
) -> Result<Expr> {
    let op = match op {
        ast::StrOpKind::Concat => StropType::Concat,
    };
    let dest_type = cast::coerce_operands(arena, loc, &mut left, &mut right)?;
    Ok(Expr::StrOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty: dest_type,
        loc,
    })
}

pub fn make_unaryop(
    arena: &Arena,
    loc: Location,
    op: ast::UnaryOpKind,
    operand: Expr,
) -> Result<Expr> {
    let op = match op {
        ast::UnaryOpKind::Not => UnaryopType::Not,
        ast::UnaryOpKind::USub => UnaryopType::USub,
        ast::UnaryOpKind::UAdd => UnaryopType::UAdd,
        ast::UnaryOpKind::Invert => UnaryopType::Invert,
    };
    let ty = expr_type(arena, &operand);
    Ok(Expr::UnaryOp {
        op,
        operand: Box::new(operand),
        ty,
        loc,
    })
}

/// Evaluates a kind argument. Constants fold directly; a reference to an
/// integer `parameter` with a constant initializer reads through the
/// declaration. Anything else is rejected.
pub fn extract_kind(arena: &Arena, e: &Expr, loc: Location) -> Result<i64> {
    if let Some(Expr::ConstantInteger { n, .. }) = expr_value(e) {
        return Ok(*n);
    }
    if let Expr::Var { sym, .. } = e {
        if let Symbol::Variable(v) = arena.symbol(arena.past_external(*sym)) {
            if v.storage == crate::asr::Storage::Parameter {
                if let Some(init) = &v.init {
                    if let Some(Expr::ConstantInteger { n, .. }) = expr_value(init) {
                        return Ok(*n);
                    }
                }
            }
        }
    }
    Err(SemanticError::new(
        ErrorKind::ShapeOrKind,
        "Kind must be a constant integer expression",
        loc,
    ))
}

/// Overload-resolution equality: pointwise on base type and kind. Array
/// shape and intent are not compared.
pub fn types_equal(a: &Ttype, b: &Ttype) -> bool {
    a.base() == b.base() && a.kind() == b.kind()
}
