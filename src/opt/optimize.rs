//! Constant folding, copy propagation and dead-temporary elimination.

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::symtab::SymbolId;
use crate::tac::{Instr, Opcode, Operand, TacProgram, TempId};

/// Optimize a program, producing a new list. The input is left untouched.
///
/// Properties the pass maintains:
/// - retained instructions keep their relative order;
/// - every temporary still referenced has its single defining
///   instruction still in the list;
/// - observable behavior (I/O order and values, final variable states) is
///   unchanged;
/// - the pass is idempotent.
pub fn optimize<'a>(program: &TacProgram<'a>) -> TacProgram<'a> {
    let mut out = TacProgram::with_counters(program.temp_count(), program.label_count());
    let mut values: PropagationTable<'a> = HashMap::new();

    for instr in &program.instrs {
        let rewritten = match instr.op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                fold_int_arith(instr, &mut values)
            }

            Opcode::Assign => {
                let value = substitute(&values, instr.arg1);
                if let (Some(dest), Some(value)) = (instr.result, value) {
                    record(&mut values, dest, value);
                }
                Instr::new(Opcode::Assign, value, None, instr.result)
            }

            Opcode::Print | Opcode::FPrint | Opcode::Write => {
                Instr::new(instr.op, substitute(&values, instr.arg1), None, None)
            }

            // Labels are the join points of this IR: no fact recorded on
            // one path may survive past them.
            Opcode::Label | Opcode::FuncBegin | Opcode::FuncEnd => {
                values.clear();
                instr.clone()
            }

            // Array ops, control flow, relational, logical, conversions,
            // functions, returns: copied through untouched.
            _ => instr.clone(),
        };
        out.push(rewritten);
    }

    sweep_dead_temps(&mut out);
    debug!(
        before = program.instrs.len(),
        after = out.instrs.len(),
        "optimization complete"
    );
    out
}

/// Currently-known value of a variable or temporary.
type PropagationTable<'a> = HashMap<Name, Operand<'a>>;

/// A propagation-table key: anything that can be (re)defined.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Name {
    Var(SymbolId),
    Temp(TempId),
}

impl Name {
    fn of(operand: &Operand<'_>) -> Option<Name> {
        match operand {
            Operand::Var(id) => Some(Name::Var(*id)),
            Operand::Temp(id) => Some(Name::Temp(*id)),
            _ => None,
        }
    }
}

/// Run one operand through the table (a single substitution step).
fn substitute<'a>(values: &PropagationTable<'a>, operand: Option<Operand<'a>>) -> Option<Operand<'a>> {
    let operand = operand?;
    Some(
        Name::of(&operand)
            .and_then(|name| values.get(&name))
            .copied()
            .unwrap_or(operand),
    )
}

/// Record `dest -> value`, first killing entries that mention the name
/// being redefined (their recorded copies just went stale).
fn record<'a>(values: &mut PropagationTable<'a>, dest: Operand<'a>, value: Operand<'a>) {
    let Some(name) = Name::of(&dest) else { return };
    values.retain(|_, known| Name::of(known) != Some(name));
    values.insert(name, value);
}

/// Substitute both operands of an integer arithmetic instruction and fold
/// it to an ASSIGN when both come out as literals. Folding wraps at 32
/// bits, the same result the target's `add`/`sub`/`mult` registers hold.
/// Division by a literal zero is never folded; the instruction stays for
/// the simulator to trap.
fn fold_int_arith<'a>(instr: &Instr<'a>, values: &mut PropagationTable<'a>) -> Instr<'a> {
    let lhs = substitute(values, instr.arg1);
    let rhs = substitute(values, instr.arg2);

    if let (Some(Operand::Int(a)), Some(Operand::Int(b)), Some(dest)) = (lhs, rhs, instr.result) {
        let folded = match instr.op {
            Opcode::Add => Some(a.wrapping_add(b)),
            Opcode::Sub => Some(a.wrapping_sub(b)),
            Opcode::Mul => Some(a.wrapping_mul(b)),
            Opcode::Div if b != 0 => Some(a.wrapping_div(b)),
            _ => None,
        };
        if let Some(value) = folded {
            let literal = Operand::Int(value);
            record(values, dest, literal);
            return Instr::new(Opcode::Assign, Some(literal), None, Some(dest));
        }
    }

    Instr::new(instr.op, lhs, rhs, instr.result)
}

/// Opcodes whose only effect is writing their result.
fn is_pure_def(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::FAdd
            | Opcode::FSub
            | Opcode::FMul
            | Opcode::FDiv
            | Opcode::Assign
            | Opcode::IntToFloat
            | Opcode::FloatToInt
            | Opcode::Load
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::And
            | Opcode::Or
            | Opcode::Not
    )
}

/// Remove pure instructions whose result is a temporary nothing reads.
///
/// User variables are never removed. A CALL with a dead result keeps the
/// call (its side effects are observable) and just drops the result, so
/// the "no dead temporary remains defined" property still holds.
fn sweep_dead_temps(program: &mut TacProgram<'_>) {
    let mut used: HashSet<TempId> = HashSet::new();
    for instr in &program.instrs {
        for operand in instr.args() {
            if let Operand::Temp(id) = operand {
                used.insert(*id);
            }
        }
    }

    program.instrs.retain_mut(|instr| {
        let Some(Operand::Temp(id)) = instr.result else {
            return true;
        };
        if used.contains(&id) {
            return true;
        }
        if instr.op == Opcode::Call {
            instr.result = None;
            return true;
        }
        !is_pure_def(instr.op)
    });
}
