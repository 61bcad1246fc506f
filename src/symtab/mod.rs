//! Scope-aware symbol table.
//!
//! Maps identifiers to (scalar type, stack offset, array length) through a
//! stack of scopes: one root `global` scope plus one frame per function.
//! Offsets are allocated from a single flat counter shared across scopes,
//! so every symbol in the program occupies a disjoint slice of one stack
//! frame — this keeps code generation trivial at the cost of frames never
//! sharing space.
//!
//! Frames are never destroyed: `pop_scope` only shortens the active
//! lookup chain, and the symbol records themselves stay addressable by
//! [`SymbolId`] for the rest of the compilation, which is how the code
//! generator resolves operands long after their scope has been exited.

mod table;


pub use table::{ScopeId, Symbol, SymbolId, SymbolTable};
