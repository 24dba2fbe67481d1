//! Implicit-cast rule engine.
//!
//! Table-driven: rows are the six base types, columns the twelve concrete
//! types (base types followed by their pointer companions). A cell either
//! names the cast to insert, says the pair is compatible as-is, or is a
//! type error. Kind differences within one base type insert a same-base
//! kind cast; pointer sources are normalised to their base before the
//! kind comparison.

use crate::asr::{expr_type, Arena, CastKind, Expr, Ttype};
use crate::ast::Location;
use crate::errors::{ErrorKind, Result, SemanticError};

#[derive(Debug, Clone, Copy)]
enum Cell {
    /// Compatible without a conversion.
    Keep,
    Cast(CastKind),
    Error,
}

use CastKind::*;
use Cell::{Cast, Error, Keep};

const NUM_TYPES: usize = 12;

#[rustfmt::skip]
const RULE_MAP: [[Cell; NUM_TYPES]; NUM_TYPES / 2] = [
    // src: Integer
    [Cast(IntegerToInteger), Cast(IntegerToReal), Cast(IntegerToComplex), Error, Cast(IntegerToLogical), Error,
     Cast(IntegerToInteger), Cast(IntegerToReal), Cast(IntegerToComplex), Error, Cast(IntegerToLogical), Error],
    // src: Real
    [Cast(RealToInteger), Cast(RealToReal), Cast(RealToComplex), Keep, Keep, Keep,
     Cast(RealToInteger), Cast(RealToReal), Cast(RealToComplex), Keep, Keep, Keep],
    // src: Complex
    [Keep, Keep, Cast(ComplexToComplex), Keep, Keep, Keep,
     Keep, Keep, Cast(ComplexToComplex), Keep, Keep, Keep],
    // src: Character
    [Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep],
    // src: Logical
    [Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep],
    // src: Derived
    [Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep, Keep],
];

/// [destination name, types allowed on the right of an assignment to it]
const TYPE_NAMES: [[&str; 2]; NUM_TYPES] = [
    ["Integer", "Integer Pointer"],
    ["Real", "Integer or Real or Real Pointer"],
    ["Complex", "Integer, Real or Complex or Complex Pointer"],
    ["Character", "Character Pointer"],
    ["Logical", "Integer or Logical Pointer"],
    ["Derived", "Derived Pointer"],
    ["Integer Pointer", "Integer"],
    ["Real Pointer", "Integer"],
    ["Complex Pointer", "Integer"],
    ["Character Pointer", "Integer"],
    ["Logical Pointer", "Integer"],
    ["Derived Pointer", "Integer"],
];

/// Conversion priority per base type; the lower-priority operand of a
/// binary operation is cast toward the higher. Character, Logical and
/// Derived take no part in candidate selection.
const TYPE_PRIORITY: [i32; NUM_TYPES / 2] = [4, 5, 6, -1, -1, -1];

/// Wraps `convert_can` in an implicit cast to `dest_type` if the rule
/// table asks for one; errors when the pair is illegal.
pub fn set_converted_value(
    loc: Location,
    convert_can: &mut Expr,
    source_type: &Ttype,
    dest_type: &Ttype,
) -> Result<()> {
    let mut source = source_type;
    let mut dest = dest_type;
    if source.type_index() % 6 == dest.type_index() % 6 {
        // reading through a pointer yields its base
        if source.is_pointer() && !dest.is_pointer() {
            std::mem::swap(&mut source, &mut dest);
        }
        if source.kind() == dest.kind() {
            return Ok(());
        }
    }
    match RULE_MAP[source.type_index() % 6][dest.type_index()] {
        Cell::Keep => Ok(()),
        Cell::Error => {
            let allowed = TYPE_NAMES[dest.type_index()][1];
            let dest_name = TYPE_NAMES[dest.type_index()][0];
            Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                format!("Only {} can be assigned to {}", allowed, dest_name),
                loc,
            ))
        }
        Cell::Cast(cast_kind) => {
            let inner = std::mem::replace(
                convert_can,
                Expr::ConstantInteger {
                    n: 0,
                    ty: Ttype::integer(4),
                    loc,
                },
            );
            *convert_can = Expr::ImplicitCast {
                arg: Box::new(inner),
                cast_kind,
                ty: dest.clone(),
                value: None,
                loc,
            };
            Ok(())
        }
    }
}

/// Binary mode: picks the conversion candidate by type priority, casts it
/// toward the other operand, and returns the common type.
pub fn coerce_operands(
    arena: &Arena,
    loc: Location,
    left: &mut Expr,
    right: &mut Expr,
) -> Result<Ttype> {
    let left_type = expr_type(arena, left);
    let right_type = expr_type(arena, right);
    let left_p = TYPE_PRIORITY[left_type.type_index() % 6];
    let right_p = TYPE_PRIORITY[right_type.type_index() % 6];
    if left_p >= right_p {
        set_converted_value(loc, right, &right_type, &left_type)?;
        Ok(left_type)
    } else {
        set_converted_value(loc, left, &left_type, &right_type)?;
        Ok(right_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_lit(n: i64, kind: i64) -> Expr {
        Expr::ConstantInteger {
            n,
            ty: Ttype::integer(kind),
            loc: Location::default(),
        }
    }

    fn real_lit(r: f64) -> Expr {
        Expr::ConstantReal {
            r,
            ty: Ttype::real(4),
            loc: Location::default(),
        }
    }

    #[test]
    fn integer_promotes_to_real() {
        let arena = Arena::new();
        let mut left = int_lit(1, 4);
        let mut right = real_lit(2.0);
        let dest = coerce_operands(&arena, Location::default(), &mut left, &mut right).unwrap();
        assert_eq!(dest, Ttype::real(4));
        match &left {
            Expr::ImplicitCast { cast_kind, ty, .. } => {
                assert_eq!(*cast_kind, CastKind::IntegerToReal);
                assert_eq!(*ty, Ttype::real(4));
            }
            other => panic!("expected a cast around the integer, got {:?}", other),
        }
        assert!(matches!(right, Expr::ConstantReal { .. }));
    }

    #[test]
    fn equal_types_need_no_cast() {
        let arena = Arena::new();
        let mut left = int_lit(1, 4);
        let mut right = int_lit(2, 4);
        let dest = coerce_operands(&arena, Location::default(), &mut left, &mut right).unwrap();
        assert_eq!(dest, Ttype::integer(4));
        assert!(matches!(left, Expr::ConstantInteger { .. }));
        assert!(matches!(right, Expr::ConstantInteger { .. }));
    }

    #[test]
    fn kind_difference_inserts_same_base_cast() {
        let mut e = int_lit(7, 8);
        set_converted_value(
            Location::default(),
            &mut e,
            &Ttype::integer(8),
            &Ttype::integer(4),
        )
        .unwrap();
        match &e {
            Expr::ImplicitCast { cast_kind, .. } => {
                assert_eq!(*cast_kind, CastKind::IntegerToInteger)
            }
            other => panic!("expected a kind cast, got {:?}", other),
        }
    }

    #[test]
    fn integer_to_character_is_an_error() {
        let mut e = int_lit(1, 4);
        let err = set_converted_value(
            Location::default(),
            &mut e,
            &Ttype::integer(4),
            &Ttype::character(4),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert_eq!(
            err.message,
            "Only Character Pointer can be assigned to Character"
        );
    }

    #[test]
    fn pointer_source_matches_its_base() {
        // an integer pointer read against a plain integer of the same
        // kind needs no conversion
        let mut e = Expr::ConstantInteger {
            n: 0,
            ty: Ttype::IntegerPointer {
                kind: 4,
                dims: vec![],
            },
            loc: Location::default(),
        };
        set_converted_value(
            Location::default(),
            &mut e,
            &Ttype::IntegerPointer {
                kind: 4,
                dims: vec![],
            },
            &Ttype::integer(4),
        )
        .unwrap();
        assert!(matches!(e, Expr::ConstantInteger { .. }));
    }
}
