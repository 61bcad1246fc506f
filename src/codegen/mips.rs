//! MIPS32 emission.

use std::io::Write;

use hashbrown::HashMap;
use tracing::debug;

use crate::error::CompileError;
use crate::symtab::SymbolTable;
use crate::tac::{Instr, Opcode, Operand, TacProgram, TempId};
use crate::types::Ty;

use super::regs::{FloatReg, IntReg, RegAlloc};

/// Extra bytes below the declared frame, kept free as a safety margin.
const FRAME_PAD: i32 = 8;

/// Translate an optimized TAC program to MIPS32 assembly text.
///
/// `symtab` must be the table the program was lowered against: operand
/// symbol ids index into it for offsets and types.
pub fn generate<'a, W: Write>(
    program: &TacProgram<'a>,
    symtab: &SymbolTable<'a>,
    out: &mut W,
) -> Result<(), CompileError> {
    let (floats, temps, stack_size) = prescan(program, symtab);
    debug!(
        stack_size,
        float_literals = floats.values.len(),
        temp_slots = temps.len(),
        "codegen pre-scan complete"
    );
    let mut emitter = Emitter {
        symtab,
        out,
        regs: RegAlloc::new(),
        floats,
        temps,
        stack_size,
        write_labels: 0,
    };
    emitter.emit_program(program)
}

/// Float literals destined for the `.data` section, deduplicated by bit
/// pattern and labeled `fl0`, `fl1`, .. in discovery order.
struct FloatTable {
    index: HashMap<u64, u32>,
    values: Vec<f64>,
}

impl FloatTable {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            values: Vec::new(),
        }
    }

    fn intern(&mut self, value: f64) {
        self.index.entry(value.to_bits()).or_insert_with(|| {
            let label = self.values.len() as u32;
            self.values.push(value);
            label
        });
    }

    fn label_of(&self, value: f64) -> Option<u32> {
        self.index.get(&value.to_bits()).copied()
    }
}

/// Stack slots for temporaries, placed above the declared variables.
type TempSlots = HashMap<TempId, (i32, Ty)>;

/// One pass over the program: intern float literals and give every
/// defining temporary a typed 4-byte slot. Returns the total frame size.
fn prescan<'a>(
    program: &TacProgram<'a>,
    symtab: &SymbolTable<'a>,
) -> (FloatTable, TempSlots, i32) {
    let mut floats = FloatTable::new();
    let mut temps = TempSlots::new();
    let mut next_offset = symtab.frame_size();

    for instr in &program.instrs {
        for operand in instr.args() {
            if let Operand::Float(value) = operand {
                floats.intern(*value);
            }
        }
        if let Some(Operand::Temp(id)) = instr.result {
            temps.entry(id).or_insert_with(|| {
                let offset = next_offset;
                next_offset += 4;
                (offset, temp_ty(instr, symtab))
            });
        }
    }

    let mut stack_size = next_offset;
    if stack_size % 4 != 0 {
        stack_size += 4 - stack_size % 4;
    }
    stack_size += FRAME_PAD;
    (floats, temps, stack_size)
}

/// The type of a temporary, read off its defining instruction.
fn temp_ty(instr: &Instr<'_>, symtab: &SymbolTable<'_>) -> Ty {
    match instr.op {
        Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv | Opcode::IntToFloat => {
            Ty::Float
        }
        // An array load produces the array's element type.
        Opcode::Load => match instr.arg1 {
            Some(Operand::Var(id)) => symtab.symbol(id).ty,
            _ => Ty::Int,
        },
        _ => Ty::Int,
    }
}

struct Emitter<'a, 'g, W: Write> {
    symtab: &'g SymbolTable<'a>,
    out: &'g mut W,
    regs: RegAlloc,
    floats: FloatTable,
    temps: TempSlots,
    stack_size: i32,
    /// Counter for the local labels of WRITE's character/integer branch.
    write_labels: u32,
}

impl<'a, W: Write> Emitter<'a, '_, W> {
    fn emit_program(&mut self, program: &TacProgram<'a>) -> Result<(), CompileError> {
        writeln!(self.out, ".data")?;
        writeln!(self.out, "newline: .asciiz \"\\n\"")?;
        for (label, value) in self.floats.values.iter().enumerate() {
            writeln!(self.out, "fl{label}: .float {value:.6}")?;
        }
        writeln!(self.out)?;
        writeln!(self.out, ".text")?;
        writeln!(self.out, ".globl main")?;
        writeln!(self.out, "main:")?;
        writeln!(self.out, "    # Allocate one frame for the whole program")?;
        writeln!(self.out, "    addi $sp, $sp, -{}", self.stack_size)?;

        for instr in &program.instrs {
            // Scratch registers never survive a TAC instruction.
            self.regs.reset();
            self.emit_instr(instr)?;
        }

        writeln!(self.out)?;
        writeln!(self.out, "    # Exit program")?;
        writeln!(self.out, "    addi $sp, $sp, {}", self.stack_size)?;
        writeln!(self.out, "    li $v0, 10")?;
        writeln!(self.out, "    syscall")?;
        Ok(())
    }

    fn emit_instr(&mut self, instr: &Instr<'a>) -> Result<(), CompileError> {
        match instr.op {
            // Declarations were consumed by the pre-scan; leave a marker.
            Opcode::Decl | Opcode::DeclFloat | Opcode::DeclArray => {
                let name = match instr.result {
                    Some(Operand::Var(id)) => self.symtab.symbol(id).name,
                    _ => "?",
                };
                writeln!(self.out, "    # (declaration: {name})")?;
            }

            Opcode::Add
            | Opcode::Sub
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Gt
            | Opcode::Ge => {
                let (Some(a), Some(b), Some(dest)) =
                    (instr.arg1.as_ref(), instr.arg2.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let r1 = self.load_int(a)?;
                let r2 = self.load_int(b)?;
                let rd = self.regs.next_int();
                let mnemonic = match instr.op {
                    Opcode::Add => "add",
                    Opcode::Sub => "sub",
                    Opcode::Eq => "seq",
                    Opcode::Ne => "sne",
                    Opcode::Lt => "slt",
                    Opcode::Le => "sle",
                    Opcode::Gt => "sgt",
                    _ => "sge",
                };
                writeln!(self.out, "    {mnemonic} {rd}, {r1}, {r2}")?;
                self.store_int(rd, dest)?;
            }

            Opcode::Mul | Opcode::Div => {
                let (Some(a), Some(b), Some(dest)) =
                    (instr.arg1.as_ref(), instr.arg2.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let r1 = self.load_int(a)?;
                let r2 = self.load_int(b)?;
                let rd = self.regs.next_int();
                let mnemonic = if instr.op == Opcode::Mul { "mult" } else { "div" };
                writeln!(self.out, "    {mnemonic} {r1}, {r2}")?;
                writeln!(self.out, "    mflo {rd}")?;
                self.store_int(rd, dest)?;
            }

            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                let (Some(a), Some(b), Some(dest)) =
                    (instr.arg1.as_ref(), instr.arg2.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let r1 = self.load_float(a)?;
                let r2 = self.load_float(b)?;
                let rd = self.regs.next_float();
                let mnemonic = match instr.op {
                    Opcode::FAdd => "add.s",
                    Opcode::FSub => "sub.s",
                    Opcode::FMul => "mul.s",
                    _ => "div.s",
                };
                writeln!(self.out, "    {mnemonic} {rd}, {r1}, {r2}")?;
                self.store_float_reg(rd, dest)?;
            }

            Opcode::IntToFloat => {
                let (Some(value), Some(dest)) = (instr.arg1.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let r1 = self.load_int(value)?;
                let rd = self.regs.next_float();
                writeln!(self.out, "    mtc1 {r1}, {rd}")?;
                writeln!(self.out, "    cvt.s.w {rd}, {rd}")?;
                self.store_float_reg(rd, dest)?;
            }

            Opcode::FloatToInt => {
                let (Some(value), Some(dest)) = (instr.arg1.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let r1 = self.load_float(value)?;
                let rd = self.regs.next_int();
                let scratch = self.regs.next_float();
                writeln!(self.out, "    trunc.w.s {scratch}, {r1}")?;
                writeln!(self.out, "    mfc1 {rd}, {scratch}")?;
                self.store_int(rd, dest)?;
            }

            Opcode::Assign => {
                let (Some(value), Some(dest)) = (instr.arg1.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let (_, dest_ty) = self.slot(dest)?;
                if dest_ty.is_float() {
                    let r = self.load_float(value)?;
                    self.store_float_reg(r, dest)?;
                } else {
                    let r = self.load_int(value)?;
                    self.store_int(r, dest)?;
                }
            }

            Opcode::Print => {
                let Some(value) = instr.arg1.as_ref() else {
                    return Err(malformed(instr));
                };
                let r = self.load_int(value)?;
                writeln!(self.out, "    move $a0, {r}")?;
                writeln!(self.out, "    li $v0, 1")?;
                writeln!(self.out, "    syscall")?;
                self.emit_newline()?;
            }

            Opcode::FPrint => {
                let Some(value) = instr.arg1.as_ref() else {
                    return Err(malformed(instr));
                };
                let r = self.load_float(value)?;
                writeln!(self.out, "    mov.s $f12, {r}")?;
                writeln!(self.out, "    li $v0, 2")?;
                writeln!(self.out, "    syscall")?;
                self.emit_newline()?;
            }

            // Values below 256 print as a character, everything else as
            // an integer; decided at runtime, no trailing newline.
            Opcode::Write => {
                let Some(value) = instr.arg1.as_ref() else {
                    return Err(malformed(instr));
                };
                let r = self.load_int(value)?;
                let n = self.write_labels;
                self.write_labels += 1;
                writeln!(self.out, "    move $a0, {r}")?;
                writeln!(self.out, "    li $t9, 256")?;
                writeln!(self.out, "    blt $a0, $t9, write_char_{n}")?;
                writeln!(self.out, "    li $v0, 1")?;
                writeln!(self.out, "    syscall")?;
                writeln!(self.out, "    j write_done_{n}")?;
                writeln!(self.out, "write_char_{n}:")?;
                writeln!(self.out, "    li $v0, 11")?;
                writeln!(self.out, "    syscall")?;
                writeln!(self.out, "write_done_{n}:")?;
            }

            Opcode::WriteLn => {
                self.emit_newline()?;
            }

            Opcode::And | Opcode::Or => {
                let (Some(a), Some(b), Some(dest)) =
                    (instr.arg1.as_ref(), instr.arg2.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let r1 = self.load_int(a)?;
                let r2 = self.load_int(b)?;
                let rd = self.regs.next_int();
                let mnemonic = if instr.op == Opcode::And { "and" } else { "or" };
                writeln!(self.out, "    {mnemonic} {rd}, {r1}, {r2}")?;
                // Normalize to a 0/1 boolean.
                writeln!(self.out, "    sltu {rd}, $zero, {rd}")?;
                self.store_int(rd, dest)?;
            }

            Opcode::Not => {
                let (Some(value), Some(dest)) = (instr.arg1.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let r1 = self.load_int(value)?;
                let rd = self.regs.next_int();
                writeln!(self.out, "    seq {rd}, {r1}, $zero")?;
                self.store_int(rd, dest)?;
            }

            Opcode::IfFalse => {
                let Some(cond) = instr.arg1.as_ref() else {
                    return Err(malformed(instr));
                };
                let r = self.load_int(cond)?;
                let target = branch_target(instr.result.as_ref())?;
                writeln!(self.out, "    beqz {r}, {target}")?;
            }

            Opcode::Goto => {
                let target = branch_target(instr.result.as_ref())?;
                writeln!(self.out, "    j {target}")?;
            }

            Opcode::Label => {
                let target = branch_target(instr.result.as_ref())?;
                writeln!(self.out, "{target}:")?;
            }

            Opcode::Store => {
                let (Some(index), Some(value), Some(array)) =
                    (instr.arg1.as_ref(), instr.arg2.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let (addr, elem_ty) = self.element_address(array, index)?;
                if elem_ty.is_float() {
                    let v = self.load_float(value)?;
                    writeln!(self.out, "    s.s {v}, 0({addr})")?;
                } else {
                    let v = self.load_int(value)?;
                    writeln!(self.out, "    sw {v}, 0({addr})")?;
                }
            }

            Opcode::Load => {
                let (Some(array), Some(index), Some(dest)) =
                    (instr.arg1.as_ref(), instr.arg2.as_ref(), instr.result.as_ref())
                else {
                    return Err(malformed(instr));
                };
                let (addr, elem_ty) = self.element_address(array, index)?;
                if elem_ty.is_float() {
                    let rd = self.regs.next_float();
                    writeln!(self.out, "    l.s {rd}, 0({addr})")?;
                    self.store_float_reg(rd, dest)?;
                } else {
                    let rd = self.regs.next_int();
                    writeln!(self.out, "    lw {rd}, 0({addr})")?;
                    self.store_int(rd, dest)?;
                }
            }

            Opcode::FuncBegin => {
                let name = func_name(instr)?;
                writeln!(self.out)?;
                writeln!(self.out, "# Function: {name}")?;
                writeln!(
                    self.out,
                    "# (function frame management is simplified: offsets stay $sp-relative)"
                )?;
            }

            Opcode::FuncEnd => {
                let name = func_name(instr)?;
                writeln!(self.out, "# End of function {name}")?;
                writeln!(self.out)?;
            }

            Opcode::Param => {
                let Some(value) = instr.arg1.as_ref() else {
                    return Err(malformed(instr));
                };
                if self.operand_ty(value).is_float() {
                    let r = self.load_float(value)?;
                    writeln!(self.out, "    addi $sp, $sp, -4")?;
                    writeln!(self.out, "    s.s {r}, 0($sp)")?;
                } else {
                    let r = self.load_int(value)?;
                    writeln!(self.out, "    addi $sp, $sp, -4")?;
                    writeln!(self.out, "    sw {r}, 0($sp)")?;
                }
            }

            Opcode::Call => {
                let Some(Operand::Func(name)) = instr.arg1 else {
                    return Err(malformed(instr));
                };
                writeln!(self.out, "    # save return address")?;
                writeln!(self.out, "    addi $sp, $sp, -4")?;
                writeln!(self.out, "    sw $ra, 0($sp)")?;
                writeln!(self.out, "    jal {name}")?;
                writeln!(self.out, "    lw $ra, 0($sp)")?;
                writeln!(self.out, "    addi $sp, $sp, 4")?;
                writeln!(self.out, "    # pop {} argument bytes", instr.param_count * 4)?;
                writeln!(self.out, "    addi $sp, $sp, {}", instr.param_count * 4)?;
                if let Some(dest) = instr.result.as_ref() {
                    let (offset, _) = self.slot(dest)?;
                    writeln!(self.out, "    sw $v0, {offset}($sp)")?;
                }
            }

            Opcode::Return => {
                if let Some(value) = instr.arg1.as_ref() {
                    // Return values travel through $v0 as words.
                    let r = self.load_int(value)?;
                    writeln!(self.out, "    move $v0, {r}")?;
                }
                writeln!(self.out, "    jr $ra")?;
            }
        }
        Ok(())
    }

    /// Scale the index by the word size and add it to the array's base.
    /// Returns the register holding the element address.
    fn element_address(
        &mut self,
        array: &Operand<'a>,
        index: &Operand<'a>,
    ) -> Result<(IntReg, Ty), CompileError> {
        let idx = self.load_int(index)?;
        let scaled = self.regs.next_int();
        writeln!(self.out, "    sll {scaled}, {idx}, 2")?;
        let (base_offset, elem_ty) = self.slot(array)?;
        let base = self.regs.next_int();
        writeln!(self.out, "    addi {base}, $sp, {base_offset}")?;
        let addr = self.regs.next_int();
        writeln!(self.out, "    add {addr}, {base}, {scaled}")?;
        Ok((addr, elem_ty))
    }

    fn emit_newline(&mut self) -> Result<(), CompileError> {
        writeln!(self.out, "    la $a0, newline")?;
        writeln!(self.out, "    li $v0, 4")?;
        writeln!(self.out, "    syscall")?;
        Ok(())
    }

    /// Load an integer-valued operand into a fresh scratch register.
    fn load_int(&mut self, operand: &Operand<'a>) -> Result<IntReg, CompileError> {
        let reg = self.regs.next_int();
        match *operand {
            Operand::Int(value) => writeln!(self.out, "    li {reg}, {value}")?,
            // A float literal reaching an integer context truncates.
            Operand::Float(value) => writeln!(self.out, "    li {reg}, {}", value as i32)?,
            Operand::Var(_) | Operand::Temp(_) => {
                let (offset, _) = self.slot(operand)?;
                writeln!(self.out, "    lw {reg}, {offset}($sp)")?;
            }
            Operand::Label(_) | Operand::Func(_) => {
                return Err(CompileError::Internal(format!(
                    "{operand:?} used as an integer value"
                )));
            }
        }
        Ok(reg)
    }

    /// Load a float-valued operand into a fresh scratch register.
    fn load_float(&mut self, operand: &Operand<'a>) -> Result<FloatReg, CompileError> {
        let reg = self.regs.next_float();
        match *operand {
            Operand::Float(value) => {
                let label = self.floats.label_of(value).ok_or_else(|| {
                    CompileError::Internal(format!(
                        "float literal {value} missing from the data section"
                    ))
                })?;
                writeln!(self.out, "    l.s {reg}, fl{label}")?;
            }
            Operand::Var(_) | Operand::Temp(_) => {
                let (offset, _) = self.slot(operand)?;
                writeln!(self.out, "    l.s {reg}, {offset}($sp)")?;
            }
            _ => {
                return Err(CompileError::Internal(format!(
                    "{operand:?} used as a float value"
                )));
            }
        }
        Ok(reg)
    }

    fn store_int(&mut self, reg: IntReg, dest: &Operand<'a>) -> Result<(), CompileError> {
        let (offset, _) = self.slot(dest)?;
        writeln!(self.out, "    sw {reg}, {offset}($sp)")?;
        Ok(())
    }

    fn store_float_reg(&mut self, reg: FloatReg, dest: &Operand<'a>) -> Result<(), CompileError> {
        let (offset, _) = self.slot(dest)?;
        writeln!(self.out, "    s.s {reg}, {offset}($sp)")?;
        Ok(())
    }

    /// Frame slot of a variable or temporary: (byte offset, type).
    fn slot(&self, operand: &Operand<'a>) -> Result<(i32, Ty), CompileError> {
        match operand {
            Operand::Var(id) => {
                let symbol = self.symtab.symbol(*id);
                Ok((symbol.offset, symbol.ty))
            }
            Operand::Temp(id) => self.temps.get(id).copied().ok_or_else(|| {
                CompileError::Internal(format!("temporary {id} has no stack slot"))
            }),
            _ => Err(CompileError::Internal(format!(
                "operand {operand:?} has no stack slot"
            ))),
        }
    }

    /// Best-effort static type of an operand, for PARAM dispatch.
    fn operand_ty(&self, operand: &Operand<'a>) -> Ty {
        match operand {
            Operand::Float(_) => Ty::Float,
            Operand::Var(id) => self.symtab.symbol(*id).ty,
            Operand::Temp(id) => self.temps.get(id).map(|(_, ty)| *ty).unwrap_or(Ty::Int),
            _ => Ty::Int,
        }
    }
}

fn branch_target(operand: Option<&Operand<'_>>) -> Result<String, CompileError> {
    match operand {
        Some(Operand::Label(label)) => Ok(label.to_string()),
        Some(Operand::Func(name)) => Ok((*name).to_string()),
        other => Err(CompileError::Internal(format!(
            "jump without a label target: {other:?}"
        ))),
    }
}

fn func_name<'a>(instr: &Instr<'a>) -> Result<&'a str, CompileError> {
    match instr.result {
        Some(Operand::Func(name)) => Ok(name),
        _ => Err(malformed(instr)),
    }
}

fn malformed(instr: &Instr<'_>) -> CompileError {
    CompileError::Internal(format!("malformed {:?} instruction", instr.op))
}
