//! IR round-trip: loading, re-serializing and re-loading must agree,
//! across every statement type and element token.

mod common;
use common::*;

use pretty_assertions::assert_eq;

use nic::ir::core::{
    ArgKind, ArgSpec, AssignTarget, CmpOp, Element, FunctionInfo, Hint, Op, ReturnKind, StmtKind,
};
use nic::loader::LoadError;
use nic::{load_program, write_program};

/// One statement of every type, every element token kind, globals of
/// every kind, and a function with full local layout.
const FULL_IR: &str = "15
1 0 1 0 1 0 1
2 1 2
3 2 3 0 0 1 3
4 3 4 2
5 4 5 0 0 0 1 2 5
6 5 6 4
7 6 7
8 10 9
9 7 9 6
10 8 10 0 10
11 9 11 9
12 11 12
13 12 13 0 0 1
14 13 14 3 1 0 -1
15 14 14 1
10
1 1 c0
1 1 c3
1 1 c1
3 11 V0 c2 o*
3 0 aV0[0] f0 o+
1 0 F1
3 0 C0 s0 o:
1 0 p0
3 0 b0 B0 o&
1 0 as0[0]
2
13 0
0 0
1
init-const
1
21
1
7
1
init
1 2
1 2
1 1
1
0 1 0
1 1 1
1 2
1 2
1 1
0
";

#[test]
fn test_full_ir_loads() {
    let program = load_program(FULL_IR).unwrap();
    assert_eq!(program.statements.len(), 15);
    assert_eq!(program.postfix.len(), 10);
    assert_eq!(program.fips.len(), 2);
    assert_eq!(program.string_consts, vec!["init-const".to_string()]);
    assert_eq!(program.global_ints, vec![21]);
    assert_eq!(program.global_bytes, vec![7]);
    assert_eq!(program.global_strings, vec!["init".to_string()]);
    assert_eq!(program.global_int_array_sizes, vec![2]);
    assert_eq!(program.functions.len(), 1);
    assert_eq!(program.functions[0].return_kind, ReturnKind::Int);
}

#[test]
fn test_full_ir_round_trips() {
    let program = load_program(FULL_IR).unwrap();
    let written = write_program(&program);
    let reloaded = load_program(&written).unwrap();
    assert_eq!(program, reloaded);

    // And the writer is a fixed point from here on.
    assert_eq!(written, write_program(&reloaded));
}

#[test]
fn test_full_ir_executes() {
    let program = load_program(FULL_IR).unwrap();
    let (result, vm) = run_vm(program);
    assert_eq!(result.unwrap(), 3);
    // The increment ran once, the expression statement doubled g0.
    assert_eq!(vm.global_int_value(0), Some(42));
    assert!(vm.temps_clean());
}

#[test]
fn test_builder_program_round_trips() {
    let mut b = ProgramBuilder::new();
    b.main_function(1, 0, 1); // function 0
    b.program.global_ints = vec![5];
    b.program.global_strings = vec!["seed".to_string()];

    let _hi = b.str_slot("hi ");
    let name = b.slot(Hint::None, vec![Element::GlobalStringVar(0)]);
    let concat = b.slot(
        Hint::None,
        vec![
            Element::StringConst(0),
            Element::GlobalStringVar(0),
            Element::Operator(Op::Concat),
        ],
    );
    b.assign_stmt(concat, AssignTarget::LocalString(0)); // 0
    let three = b.const_slot(3);
    let fip_call = b.fip(1, vec![three]);
    let call = b.slot(Hint::ExternFuncNoOp, vec![Element::ExternCall(fip_call)]);
    b.assign_stmt(call, AssignTarget::GlobalInt(0)); // 1
    let zero = b.const_slot(0);
    b.stmt(StmtKind::If {
        lhs: name,
        rhs: zero,
        op: CmpOp::Ne,
        false_target: 3,
    }); // 2
    b.bare_return(); // 3

    let n = b.slot(Hint::LocalIntNoOp, vec![Element::LocalIntVar(0)]);
    b.return_value(n); // 4
    b.function(FunctionInfo {
        entry: 4,
        return_kind: ReturnKind::Int,
        args: vec![ArgSpec {
            kind: ArgKind::Int,
            local: 0,
        }],
        local_ints: 1,
        local_bytes: 0,
        local_strings: 0,
        int_array_sizes: vec![],
        byte_array_sizes: vec![],
        string_array_sizes: vec![],
    }); // function 1

    let program = b.finish();
    let reloaded = load_program(&write_program(&program)).unwrap();
    assert_eq!(program, reloaded);
}

#[test]
fn test_branch_target_out_of_bounds_rejected() {
    // The If false-target points past the statement table.
    let bad = FULL_IR.replace("1 0 1 0 1 0 1", "1 0 1 0 1 0 99");
    let err = load_program(&bad).unwrap_err();
    assert!(matches!(
        err,
        LoadError::IndexOutOfRange {
            what: "branch target",
            index: 99,
            ..
        }
    ));
}

#[test]
fn test_postfix_reference_out_of_bounds_rejected() {
    // The Return references postfix slot 77.
    let bad = FULL_IR.replace("15 14 14 1", "15 14 14 77");
    let err = load_program(&bad).unwrap_err();
    assert!(matches!(
        err,
        LoadError::IndexOutOfRange {
            what: "postfix slot",
            index: 77,
            ..
        }
    ));
}

#[test]
fn test_fip_reference_out_of_bounds_rejected() {
    let bad = FULL_IR.replace("3 0 aV0[0] f0 o+", "3 0 aV0[0] f9 o+");
    let err = load_program(&bad).unwrap_err();
    assert!(matches!(
        err,
        LoadError::IndexOutOfRange {
            what: "FIP record",
            index: 9,
            ..
        }
    ));
}

#[test]
fn test_demoted_hint_round_trips_as_general() {
    // Claim GlobalIntOpConstInt on a slot whose second element is a
    // variable: the loader demotes it, and the demotion is what gets
    // written back out.
    let bad_hint = FULL_IR.replace("3 11 V0 c2 o*", "3 11 V0 V0 o*");
    let program = load_program(&bad_hint).unwrap();
    assert_eq!(program.postfix[3].hint, Hint::None);
    let reloaded = load_program(&write_program(&program)).unwrap();
    assert_eq!(program, reloaded);
}

#[test]
fn test_main_index_out_of_bounds_rejected() {
    let bad = FULL_IR.trim_end().strip_suffix('0').unwrap().to_string() + "4\n";
    let err = load_program(&bad).unwrap_err();
    assert!(matches!(
        err,
        LoadError::IndexOutOfRange {
            what: "main function",
            index: 4,
            ..
        }
    ));
}
