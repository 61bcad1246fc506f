//! AST → TAC lowering.
//!
//! Walks the syntax tree once, emitting a linear instruction sequence.
//! Expression lowering returns the operand holding the value (a literal,
//! a variable, or a fresh temporary); statement lowering emits as a side
//! effect. This is also where the type-aware part of the pipeline lives:
//! mixed int/float arithmetic promotes to float, and assignments across a
//! type boundary get an explicit conversion instruction, so every later
//! phase can treat operands as already-typed.

mod lower;

#[cfg(test)]
mod lower_test;

pub use lower::lower;
