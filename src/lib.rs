//! minic — the middle and back end of an educational compiler that
//! translates a small C-like imperative language into MIPS32 assembly.
//!
//! The crate consumes an AST built by an external parser and runs a
//! strictly linear pipeline:
//!
//! 1. [`lower`] — walk the AST, producing three-address code and filling
//!    the scope-aware [`symtab::SymbolTable`];
//! 2. [`opt`] — constant folding, copy propagation and dead-temporary
//!    elimination over the TAC list;
//! 3. [`codegen`] — translate the optimized list into assembly text, one
//!    stack frame, scratch-register discipline per instruction.
//!
//! All state lives in values threaded through these calls, so separate
//! compilations are independent and may run on different threads.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lower;
pub mod opt;
pub mod symtab;
pub mod tac;
pub mod types;

pub use error::CompileError;

use std::io::Write;
use std::path::Path;

use ast::Node;
use symtab::SymbolTable;

/// Compile a program, writing MIPS assembly to `out`.
pub fn compile<'a>(root: &'a Node<'a>, out: &mut impl Write) -> Result<(), CompileError> {
    let mut symtab = SymbolTable::new();
    let tac = lower::lower(root, &mut symtab)?;
    let optimized = opt::optimize(&tac);
    codegen::generate(&optimized, &symtab, out)
}

/// Compile a program into an assembly file at `path`.
///
/// Failure to create the file is fatal, like every other error here.
pub fn compile_to_file<'a>(
    root: &'a Node<'a>,
    path: impl AsRef<Path>,
) -> Result<(), CompileError> {
    let file = std::fs::File::create(path)?;
    let mut out = std::io::BufWriter::new(file);
    compile(root, &mut out)?;
    out.flush()?;
    Ok(())
}
