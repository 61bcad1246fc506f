//! Three-address code: the intermediate representation between the AST
//! and MIPS assembly.
//!
//! Each instruction has an opcode, up to two source operands, an optional
//! destination and (for calls only) a parameter count. Operands are a
//! tagged enum — literals, symbol references, temporaries, labels — so no
//! phase ever re-parses text to decide what an operand is; the textual
//! forms `t3` / `L0` exist only in `Display` output.
//!
//! Temporaries are single-assignment: a `TempId` names the result of
//! exactly one instruction. User variables may be reassigned freely.

mod instr;

pub use instr::{Instr, Label, Opcode, Operand, TacProgram, TempId};
