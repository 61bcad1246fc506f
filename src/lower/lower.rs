//! Lowering implementation.

use tracing::debug;

use crate::ast::{BinOp, LogicOp, Node, RelOp, UnaryOp};
use crate::error::CompileError;
use crate::symtab::{SymbolId, SymbolTable};
use crate::tac::{Instr, Opcode, Operand, TacProgram};
use crate::types::Ty;

/// Lower a whole program into a fresh TAC list.
///
/// Declarations encountered along the way are registered into `symtab`;
/// the table must be threaded on to the code generator afterwards so the
/// operands' symbol ids stay meaningful.
pub fn lower<'a>(
    root: &'a Node<'a>,
    symtab: &mut SymbolTable<'a>,
) -> Result<TacProgram<'a>, CompileError> {
    let mut lowerer = Lowerer {
        symtab,
        tac: TacProgram::new(),
    };
    lowerer.stmt(root)?;
    debug!(
        instrs = lowerer.tac.instrs.len(),
        temps = lowerer.tac.temp_count(),
        labels = lowerer.tac.label_count(),
        "lowering complete"
    );
    Ok(lowerer.tac)
}

struct Lowerer<'a, 's> {
    symtab: &'s mut SymbolTable<'a>,
    tac: TacProgram<'a>,
}

impl<'a> Lowerer<'a, '_> {
    fn emit(&mut self, instr: Instr<'a>) {
        self.tac.push(instr);
    }

    fn resolve(&self, name: &str) -> Result<SymbolId, CompileError> {
        self.symtab
            .lookup(name)
            .ok_or_else(|| CompileError::Undeclared {
                name: name.to_string(),
            })
    }

    /// The type an expression will evaluate to, mirroring `expr` below.
    ///
    /// Function calls are assumed to return int: return types are not
    /// tracked in the symbol table. Relational and logical operators
    /// always produce an int 0/1.
    fn expr_type(&self, node: &Node<'a>) -> Result<Ty, CompileError> {
        match node {
            Node::Num(_) => Ok(Ty::Int),
            Node::FloatNum(_) => Ok(Ty::Float),
            Node::Var(name) => {
                let id = self.resolve(name)?;
                Ok(self.symtab.symbol(id).ty)
            }
            Node::BinOp { left, right, .. } => {
                Ok(Ty::unify(self.expr_type(left)?, self.expr_type(right)?))
            }
            Node::ArrayAccess { name, .. } => {
                let id = self.resolve(name)?;
                Ok(self.symtab.symbol(id).ty)
            }
            _ => Ok(Ty::Int),
        }
    }

    /// Lower an expression; returns the operand naming its value.
    fn expr(&mut self, node: &'a Node<'a>) -> Result<Operand<'a>, CompileError> {
        match node {
            Node::Num(value) => Ok(Operand::Int(*value)),
            Node::FloatNum(value) => Ok(Operand::Float(*value)),
            Node::Var(name) => Ok(Operand::Var(self.resolve(name)?)),

            Node::BinOp { op, left, right } => {
                let left_ty = self.expr_type(left)?;
                let right_ty = self.expr_type(right)?;
                let mut lhs = self.expr(left)?;
                let mut rhs = self.expr(right)?;

                let opcode = if Ty::unify(left_ty, right_ty).is_float() {
                    // Promote whichever side is still an int.
                    if left_ty == Ty::Int {
                        lhs = self.widen(lhs);
                    }
                    if right_ty == Ty::Int {
                        rhs = self.widen(rhs);
                    }
                    match op {
                        BinOp::Add => Opcode::FAdd,
                        BinOp::Sub => Opcode::FSub,
                        BinOp::Mul => Opcode::FMul,
                        BinOp::Div => Opcode::FDiv,
                    }
                } else {
                    match op {
                        BinOp::Add => Opcode::Add,
                        BinOp::Sub => Opcode::Sub,
                        BinOp::Mul => Opcode::Mul,
                        BinOp::Div => Opcode::Div,
                    }
                };
                let result = Operand::Temp(self.tac.new_temp());
                self.emit(Instr::new(opcode, Some(lhs), Some(rhs), Some(result)));
                Ok(result)
            }

            Node::RelOp { op, left, right } => {
                let lhs = self.expr(left)?;
                let rhs = self.expr(right)?;
                let opcode = match op {
                    RelOp::Eq => Opcode::Eq,
                    RelOp::Ne => Opcode::Ne,
                    RelOp::Lt => Opcode::Lt,
                    RelOp::Le => Opcode::Le,
                    RelOp::Gt => Opcode::Gt,
                    RelOp::Ge => Opcode::Ge,
                };
                let result = Operand::Temp(self.tac.new_temp());
                self.emit(Instr::new(opcode, Some(lhs), Some(rhs), Some(result)));
                Ok(result)
            }

            Node::LogicOp { op, left, right } => {
                let lhs = self.expr(left)?;
                let rhs = self.expr(right)?;
                let opcode = match op {
                    LogicOp::And => Opcode::And,
                    LogicOp::Or => Opcode::Or,
                };
                let result = Operand::Temp(self.tac.new_temp());
                self.emit(Instr::new(opcode, Some(lhs), Some(rhs), Some(result)));
                Ok(result)
            }

            Node::UnaryOp { op, operand } => {
                let value = self.expr(operand)?;
                let result = Operand::Temp(self.tac.new_temp());
                match op {
                    UnaryOp::Not => {
                        self.emit(Instr::new(Opcode::Not, Some(value), None, Some(result)));
                    }
                }
                Ok(result)
            }

            Node::ArrayAccess { name, index } => {
                let array = Operand::Var(self.resolve(name)?);
                let index = self.expr(index)?;
                let result = Operand::Temp(self.tac.new_temp());
                self.emit(Instr::new(
                    Opcode::Load,
                    Some(array),
                    Some(index),
                    Some(result),
                ));
                Ok(result)
            }

            Node::FuncCall { name, args } => self.call(name, *args),

            _ => Err(CompileError::Internal(format!(
                "statement node in expression position: {node:?}"
            ))),
        }
    }

    /// Emit an INT_TO_FLOAT into a fresh temporary.
    fn widen(&mut self, value: Operand<'a>) -> Operand<'a> {
        let result = Operand::Temp(self.tac.new_temp());
        self.emit(Instr::new(
            Opcode::IntToFloat,
            Some(value),
            None,
            Some(result),
        ));
        result
    }

    /// Insert whatever conversion bridges `from` to `to`, if any.
    fn coerce(&mut self, value: Operand<'a>, from: Ty, to: Ty) -> Operand<'a> {
        match (from, to) {
            (Ty::Int, Ty::Float) => self.widen(value),
            (Ty::Float, Ty::Int) => {
                let result = Operand::Temp(self.tac.new_temp());
                self.emit(Instr::new(
                    Opcode::FloatToInt,
                    Some(value),
                    None,
                    Some(result),
                ));
                result
            }
            _ => value,
        }
    }

    /// Lower a call: arguments in order, one PARAM each, then the CALL.
    fn call(
        &mut self,
        name: &'a str,
        args: Option<&'a Node<'a>>,
    ) -> Result<Operand<'a>, CompileError> {
        let mut count = 0u32;
        let mut cursor = args;
        while let Some(node) = cursor {
            let Node::Arg { expr, next } = node else {
                return Err(CompileError::Internal(
                    "malformed argument list".to_string(),
                ));
            };
            let value = self.expr(expr)?;
            self.emit(Instr::new(Opcode::Param, Some(value), None, None));
            count += 1;
            cursor = *next;
        }
        let result = Operand::Temp(self.tac.new_temp());
        let mut instr = Instr::new(
            Opcode::Call,
            Some(Operand::Func(name)),
            None,
            Some(result),
        );
        instr.param_count = count;
        self.emit(instr);
        Ok(result)
    }

    /// Lower a statement (or statement sequence).
    fn stmt(&mut self, node: &'a Node<'a>) -> Result<(), CompileError> {
        match node {
            Node::Seq { stmt, next } => {
                self.stmt(stmt)?;
                if let Some(next) = next {
                    self.stmt(next)?;
                }
            }

            Node::Decl { ty, name } => {
                let id = self.symtab.declare_var(name, *ty)?;
                let opcode = match ty {
                    Ty::Int => Opcode::Decl,
                    Ty::Float => Opcode::DeclFloat,
                };
                self.emit(Instr::new(opcode, None, None, Some(Operand::Var(id))));
            }

            Node::ArrayDecl { ty, name, len } => {
                let id = self.symtab.declare_array(name, *ty, *len)?;
                self.emit(Instr::new(
                    Opcode::DeclArray,
                    Some(Operand::Int(*len as i32)),
                    None,
                    Some(Operand::Var(id)),
                ));
            }

            Node::Assign { name, value } => {
                let id = self.resolve(name)?;
                let var_ty = self.symtab.symbol(id).ty;
                let value_ty = self.expr_type(value)?;
                let mut rhs = self.expr(value)?;
                rhs = self.coerce(rhs, value_ty, var_ty);
                self.emit(Instr::new(
                    Opcode::Assign,
                    Some(rhs),
                    None,
                    Some(Operand::Var(id)),
                ));
            }

            Node::ArrayAssign { name, index, value } => {
                let id = self.resolve(name)?;
                let elem_ty = self.symtab.symbol(id).ty;
                let index = self.expr(index)?;
                let value_ty = self.expr_type(value)?;
                let mut rhs = self.expr(value)?;
                rhs = self.coerce(rhs, value_ty, elem_ty);
                self.emit(Instr::new(
                    Opcode::Store,
                    Some(index),
                    Some(rhs),
                    Some(Operand::Var(id)),
                ));
            }

            Node::Print(expr) => {
                let ty = self.expr_type(expr)?;
                let value = self.expr(expr)?;
                let opcode = if ty.is_float() {
                    Opcode::FPrint
                } else {
                    Opcode::Print
                };
                self.emit(Instr::new(opcode, Some(value), None, None));
            }

            Node::Write(expr) => {
                let value = self.expr(expr)?;
                self.emit(Instr::new(Opcode::Write, Some(value), None, None));
            }

            Node::WriteLn => {
                self.emit(Instr::new(Opcode::WriteLn, None, None, None));
            }

            Node::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.expr(cond)?;
                match else_branch {
                    Some(else_branch) => {
                        let else_label = self.tac.new_label();
                        let end_label = self.tac.new_label();
                        self.emit(Instr::new(
                            Opcode::IfFalse,
                            Some(cond),
                            None,
                            Some(Operand::Label(else_label)),
                        ));
                        self.stmt(then_branch)?;
                        self.emit(Instr::new(
                            Opcode::Goto,
                            None,
                            None,
                            Some(Operand::Label(end_label)),
                        ));
                        self.emit(Instr::new(
                            Opcode::Label,
                            None,
                            None,
                            Some(Operand::Label(else_label)),
                        ));
                        self.stmt(else_branch)?;
                        self.emit(Instr::new(
                            Opcode::Label,
                            None,
                            None,
                            Some(Operand::Label(end_label)),
                        ));
                    }
                    None => {
                        let end_label = self.tac.new_label();
                        self.emit(Instr::new(
                            Opcode::IfFalse,
                            Some(cond),
                            None,
                            Some(Operand::Label(end_label)),
                        ));
                        self.stmt(then_branch)?;
                        self.emit(Instr::new(
                            Opcode::Label,
                            None,
                            None,
                            Some(Operand::Label(end_label)),
                        ));
                    }
                }
            }

            Node::While { cond, body } => {
                let head = self.tac.new_label();
                let end = self.tac.new_label();
                self.emit(Instr::new(
                    Opcode::Label,
                    None,
                    None,
                    Some(Operand::Label(head)),
                ));
                let cond = self.expr(cond)?;
                self.emit(Instr::new(
                    Opcode::IfFalse,
                    Some(cond),
                    None,
                    Some(Operand::Label(end)),
                ));
                self.stmt(body)?;
                self.emit(Instr::new(
                    Opcode::Goto,
                    None,
                    None,
                    Some(Operand::Label(head)),
                ));
                self.emit(Instr::new(
                    Opcode::Label,
                    None,
                    None,
                    Some(Operand::Label(end)),
                ));
            }

            Node::FuncDecl { name, params, body } => {
                self.emit(Instr::new(
                    Opcode::FuncBegin,
                    None,
                    None,
                    Some(Operand::Func(name)),
                ));
                // The function's entry point is a named label.
                self.emit(Instr::new(
                    Opcode::Label,
                    None,
                    None,
                    Some(Operand::Func(name)),
                ));

                self.symtab.push_scope(name);
                // Parameters become int-typed locals of the function scope;
                // float parameter passing is not wired through the oracle.
                let mut cursor = *params;
                while let Some(node) = cursor {
                    let Node::Param { name, next } = node else {
                        return Err(CompileError::Internal(
                            "malformed parameter list".to_string(),
                        ));
                    };
                    let id = self.symtab.declare_var(name, Ty::Int)?;
                    self.emit(Instr::new(Opcode::Decl, None, None, Some(Operand::Var(id))));
                    cursor = *next;
                }
                if let Some(body) = body {
                    self.stmt(body)?;
                }
                self.symtab.pop_scope();

                self.emit(Instr::new(
                    Opcode::FuncEnd,
                    None,
                    None,
                    Some(Operand::Func(name)),
                ));
            }

            Node::FuncCall { name, args } => {
                // Call in statement position: the result temporary is
                // simply never used.
                self.call(name, *args)?;
            }

            Node::Return(expr) => {
                let value = match expr {
                    Some(expr) => Some(self.expr(expr)?),
                    None => None,
                };
                self.emit(Instr::new(Opcode::Return, value, None, None));
            }

            _ => {
                return Err(CompileError::Internal(format!(
                    "expression node in statement position: {node:?}"
                )));
            }
        }
        Ok(())
    }
}
