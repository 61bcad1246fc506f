//! Tests for AST → TAC lowering.

use bumpalo::Bump;
use pretty_assertions::assert_eq;

use crate::ast::{BinOp, Node, RelOp, UnaryOp};
use crate::error::CompileError;
use crate::lower::lower;
use crate::symtab::SymbolTable;
use crate::tac::{Label, Opcode, Operand, TacProgram, TempId};
use crate::types::Ty;

fn lowered<'a>(root: &'a Node<'a>) -> (TacProgram<'a>, SymbolTable<'a>) {
    let mut symtab = SymbolTable::new();
    let tac = lower(root, &mut symtab).expect("lowering should succeed");
    (tac, symtab)
}

fn opcodes(tac: &TacProgram<'_>) -> Vec<Opcode> {
    tac.instrs.iter().map(|i| i.op).collect()
}

#[test]
fn literals_and_variables_emit_nothing() {
    let arena = Bump::new();
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "x"),
            Node::assign(&arena, "x", Node::num(&arena, 7)),
        ],
    );
    let (tac, _) = lowered(root);

    // Just the declaration and the assignment; the literal is an operand.
    assert_eq!(opcodes(&tac), vec![Opcode::Decl, Opcode::Assign]);
    assert_eq!(tac.instrs[1].arg1, Some(Operand::Int(7)));
}

#[test]
fn integer_arithmetic_uses_fresh_temporaries() {
    let arena = Bump::new();
    // x = 2 + 3 * 4
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "x"),
            Node::assign(
                &arena,
                "x",
                Node::binop(
                    &arena,
                    BinOp::Add,
                    Node::num(&arena, 2),
                    Node::binop(&arena, BinOp::Mul, Node::num(&arena, 3), Node::num(&arena, 4)),
                ),
            ),
        ],
    );
    let (tac, _) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![Opcode::Decl, Opcode::Mul, Opcode::Add, Opcode::Assign]
    );
    // The inner product lands in t0, the sum in t1.
    assert_eq!(tac.instrs[1].result, Some(Operand::Temp(TempId(0))));
    assert_eq!(tac.instrs[2].arg1, Some(Operand::Int(2)));
    assert_eq!(tac.instrs[2].arg2, Some(Operand::Temp(TempId(0))));
    assert_eq!(tac.instrs[2].result, Some(Operand::Temp(TempId(1))));
    assert_eq!(tac.instrs[3].arg1, Some(Operand::Temp(TempId(1))));
}

#[test]
fn mixed_arithmetic_promotes_the_int_side() {
    let arena = Bump::new();
    // int i; float f; f = i + 1.5;
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "i"),
            Node::decl(&arena, Ty::Float, "f"),
            Node::assign(
                &arena,
                "f",
                Node::binop(
                    &arena,
                    BinOp::Add,
                    Node::var(&arena, "i"),
                    Node::float(&arena, 1.5),
                ),
            ),
        ],
    );
    let (tac, symtab) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![
            Opcode::Decl,
            Opcode::DeclFloat,
            Opcode::IntToFloat,
            Opcode::FAdd,
            Opcode::Assign,
        ]
    );
    let i = symtab.lookup("i").unwrap();
    assert_eq!(tac.instrs[2].arg1, Some(Operand::Var(i)));
    assert_eq!(tac.instrs[2].result, Some(Operand::Temp(TempId(0))));
    assert_eq!(tac.instrs[3].arg1, Some(Operand::Temp(TempId(0))));
    assert_eq!(tac.instrs[3].arg2, Some(Operand::Float(1.5)));
    assert_eq!(tac.instrs[3].result, Some(Operand::Temp(TempId(1))));
    assert_eq!(tac.instrs[4].arg1, Some(Operand::Temp(TempId(1))));
}

#[test]
fn assignment_coerces_float_to_int() {
    let arena = Bump::new();
    // float f; int i; i = f;
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Float, "f"),
            Node::decl(&arena, Ty::Int, "i"),
            Node::assign(&arena, "i", Node::var(&arena, "f")),
        ],
    );
    let (tac, _) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![
            Opcode::DeclFloat,
            Opcode::Decl,
            Opcode::FloatToInt,
            Opcode::Assign,
        ]
    );
}

#[test]
fn array_store_coerces_to_the_element_type() {
    let arena = Bump::new();
    // float a[2]; a[0] = 3;
    let root = Node::block(
        &arena,
        &[
            Node::array_decl(&arena, Ty::Float, "a", 2),
            Node::array_assign(&arena, "a", Node::num(&arena, 0), Node::num(&arena, 3)),
        ],
    );
    let (tac, symtab) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![Opcode::DeclArray, Opcode::IntToFloat, Opcode::Store]
    );
    let a = symtab.lookup("a").unwrap();
    let store = &tac.instrs[2];
    assert_eq!(store.arg1, Some(Operand::Int(0)));
    assert_eq!(store.arg2, Some(Operand::Temp(TempId(0))));
    assert_eq!(store.result, Some(Operand::Var(a)));
}

#[test]
fn array_access_emits_a_load() {
    let arena = Bump::new();
    // int a[4]; int x; x = a[0];
    let root = Node::block(
        &arena,
        &[
            Node::array_decl(&arena, Ty::Int, "a", 4),
            Node::decl(&arena, Ty::Int, "x"),
            Node::assign(
                &arena,
                "x",
                Node::array_access(&arena, "a", Node::num(&arena, 0)),
            ),
        ],
    );
    let (tac, symtab) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![Opcode::DeclArray, Opcode::Decl, Opcode::Load, Opcode::Assign]
    );
    let a = symtab.lookup("a").unwrap();
    assert_eq!(tac.instrs[2].arg1, Some(Operand::Var(a)));
    assert_eq!(tac.instrs[2].arg2, Some(Operand::Int(0)));
}

#[test]
fn print_dispatches_on_expression_type() {
    let arena = Bump::new();
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Float, "f"),
            Node::decl(&arena, Ty::Int, "i"),
            Node::print(&arena, Node::var(&arena, "f")),
            Node::print(&arena, Node::var(&arena, "i")),
            Node::write(&arena, Node::var(&arena, "i")),
            Node::writeln(&arena),
        ],
    );
    let (tac, _) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![
            Opcode::DeclFloat,
            Opcode::Decl,
            Opcode::FPrint,
            Opcode::Print,
            Opcode::Write,
            Opcode::WriteLn,
        ]
    );
}

#[test]
fn if_without_else_emits_one_label_and_one_branch() {
    let arena = Bump::new();
    // int a; if (!a) a = 1;
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "a"),
            Node::if_stmt(
                &arena,
                Node::unary(&arena, UnaryOp::Not, Node::var(&arena, "a")),
                Node::assign(&arena, "a", Node::num(&arena, 1)),
                None,
            ),
        ],
    );
    let (tac, _) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![
            Opcode::Decl,
            Opcode::Not,
            Opcode::IfFalse,
            Opcode::Assign,
            Opcode::Label,
        ]
    );
    assert_eq!(tac.instrs[2].result, Some(Operand::Label(Label(0))));
    assert_eq!(tac.instrs[4].result, Some(Operand::Label(Label(0))));
}

#[test]
fn if_else_emits_two_labels_one_branch_one_jump() {
    let arena = Bump::new();
    // int a; int b; int x; if (a < b) x = 1; else x = 2;
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "a"),
            Node::decl(&arena, Ty::Int, "b"),
            Node::decl(&arena, Ty::Int, "x"),
            Node::if_stmt(
                &arena,
                Node::relop(&arena, RelOp::Lt, Node::var(&arena, "a"), Node::var(&arena, "b")),
                Node::assign(&arena, "x", Node::num(&arena, 1)),
                Some(Node::assign(&arena, "x", Node::num(&arena, 2))),
            ),
        ],
    );
    let (tac, _) = lowered(root);

    assert_eq!(
        opcodes(&tac)[3..].to_vec(),
        vec![
            Opcode::Lt,
            Opcode::IfFalse,
            Opcode::Assign,
            Opcode::Goto,
            Opcode::Label,
            Opcode::Assign,
            Opcode::Label,
        ]
    );
    // IF_FALSE targets the else label, GOTO the join label.
    assert_eq!(tac.instrs[4].result, Some(Operand::Label(Label(0))));
    assert_eq!(tac.instrs[6].result, Some(Operand::Label(Label(1))));
    assert_eq!(tac.instrs[7].result, Some(Operand::Label(Label(0))));
    assert_eq!(tac.instrs[9].result, Some(Operand::Label(Label(1))));
}

#[test]
fn while_emits_head_test_shape() {
    let arena = Bump::new();
    // int i; while (i < 10) i = i + 1;
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "i"),
            Node::while_stmt(
                &arena,
                Node::relop(&arena, RelOp::Lt, Node::var(&arena, "i"), Node::num(&arena, 10)),
                Node::assign(
                    &arena,
                    "i",
                    Node::binop(&arena, BinOp::Add, Node::var(&arena, "i"), Node::num(&arena, 1)),
                ),
            ),
        ],
    );
    let (tac, _) = lowered(root);

    assert_eq!(
        opcodes(&tac)[1..].to_vec(),
        vec![
            Opcode::Label,
            Opcode::Lt,
            Opcode::IfFalse,
            Opcode::Add,
            Opcode::Assign,
            Opcode::Goto,
            Opcode::Label,
        ]
    );
    // Head label first, exit label second; the back-edge returns to the head.
    assert_eq!(tac.instrs[1].result, Some(Operand::Label(Label(0))));
    assert_eq!(tac.instrs[3].result, Some(Operand::Label(Label(1))));
    assert_eq!(tac.instrs[6].result, Some(Operand::Label(Label(0))));
    assert_eq!(tac.instrs[7].result, Some(Operand::Label(Label(1))));
}

#[test]
fn function_declaration_and_call_protocol() {
    let arena = Bump::new();
    // func addup(a, b) { return a + b; }  int x; x = addup(1, 2);
    let body = Node::block(
        &arena,
        &[Node::ret(
            &arena,
            Some(Node::binop(
                &arena,
                BinOp::Add,
                Node::var(&arena, "a"),
                Node::var(&arena, "b"),
            )),
        )],
    );
    let root = Node::block(
        &arena,
        &[
            Node::func_decl(&arena, "addup", Node::params(&arena, &["a", "b"]), Some(body)),
            Node::decl(&arena, Ty::Int, "x"),
            Node::assign(
                &arena,
                "x",
                Node::func_call(
                    &arena,
                    "addup",
                    Node::args(&arena, &[Node::num(&arena, 1), Node::num(&arena, 2)]),
                ),
            ),
        ],
    );
    let (tac, _) = lowered(root);

    assert_eq!(
        opcodes(&tac),
        vec![
            Opcode::FuncBegin,
            Opcode::Label,
            Opcode::Decl,
            Opcode::Decl,
            Opcode::Add,
            Opcode::Return,
            Opcode::FuncEnd,
            Opcode::Decl,
            Opcode::Param,
            Opcode::Param,
            Opcode::Call,
            Opcode::Assign,
        ]
    );
    assert_eq!(tac.instrs[1].result, Some(Operand::Func("addup")));
    assert_eq!(tac.instrs[8].arg1, Some(Operand::Int(1)));
    assert_eq!(tac.instrs[9].arg1, Some(Operand::Int(2)));
    let call = &tac.instrs[10];
    assert_eq!(call.arg1, Some(Operand::Func("addup")));
    assert_eq!(call.param_count, 2);
    assert_eq!(call.result, Some(Operand::Temp(TempId(1))));
}

#[test]
fn parameters_shadow_globals_and_bind_by_identity() {
    let arena = Bump::new();
    // int a; func id(a) { return a; }
    let body = Node::block(&arena, &[Node::ret(&arena, Some(Node::var(&arena, "a")))]);
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "a"),
            Node::func_decl(&arena, "id", Node::params(&arena, &["a"]), Some(body)),
        ],
    );
    let (tac, symtab) = lowered(root);

    // The return references the parameter, not the global of the same name.
    let global_a = symtab.lookup("a").unwrap();
    let ret = &tac.instrs[4];
    assert_eq!(ret.op, Opcode::Return);
    let Some(Operand::Var(param_a)) = ret.arg1 else {
        panic!("return should reference a variable, got {:?}", ret.arg1);
    };
    assert_ne!(param_a, global_a);
    assert_ne!(
        symtab.symbol(param_a).offset,
        symtab.symbol(global_a).offset
    );
}

#[test]
fn undeclared_reference_is_fatal() {
    let arena = Bump::new();
    let root = Node::block(
        &arena,
        &[Node::assign(&arena, "x", Node::num(&arena, 1))],
    );
    let mut symtab = SymbolTable::new();

    let err = lower(root, &mut symtab).unwrap_err();
    assert!(matches!(err, CompileError::Undeclared { ref name } if name == "x"));
}

#[test]
fn undeclared_operand_inside_expression_is_fatal() {
    let arena = Bump::new();
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "x"),
            Node::assign(
                &arena,
                "x",
                Node::binop(&arena, BinOp::Add, Node::var(&arena, "y"), Node::num(&arena, 1)),
            ),
        ],
    );
    let mut symtab = SymbolTable::new();

    let err = lower(root, &mut symtab).unwrap_err();
    assert!(matches!(err, CompileError::Undeclared { ref name } if name == "y"));
}

#[test]
fn duplicate_declaration_is_fatal() {
    let arena = Bump::new();
    let root = Node::block(
        &arena,
        &[
            Node::decl(&arena, Ty::Int, "x"),
            Node::decl(&arena, Ty::Float, "x"),
        ],
    );
    let mut symtab = SymbolTable::new();

    let err = lower(root, &mut symtab).unwrap_err();
    assert!(matches!(err, CompileError::DuplicateDeclaration { .. }));
}
