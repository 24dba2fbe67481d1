//! Two-pass semantic lowering.
//!
//! Pass 1 ([`symtab`]) builds the scope graph and every declaration,
//! resolving `use` imports along the way. Pass 2 ([`body`]) walks the
//! same tree again and lowers executable statements and expressions,
//! typing every node and inserting implicit casts via [`cast`]. The
//! verifier runs last; its failure is a bug, not a user error.

pub mod body;
pub mod cast;
pub mod common;
pub mod symtab;

use crate::asr::{Arena, TranslationUnit};
use crate::ast;
use crate::errors::Result;
use crate::intrinsics::ModuleLoader;
use crate::verify;

pub fn ast_to_asr(
    arena: &mut Arena,
    unit: &ast::TranslationUnit,
    loader: &mut dyn ModuleLoader,
) -> Result<TranslationUnit> {
    let mut tu = symtab::build_symbol_table(arena, unit, loader)?;
    body::lower_bodies(arena, unit, loader, &mut tu)?;
    verify::verify(arena, &tu)?;
    Ok(tu)
}
