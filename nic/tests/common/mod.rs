//! Shared helpers for integration tests.
// Consumed selectively by many integration test files; not every helper
// is referenced in each test target.
#![allow(dead_code)]

use nic::clock::ManualClock;
use nic::ir::core::{
    ArgSpec, AssignTarget, Element, Fip, FunctionInfo, Hint, PostfixSlot, Program, ReturnKind,
    Stmt, StmtKind,
};
use nic::vm::{Vm, VmError};

/// Incremental builder for in-memory programs, so tests read as a list
/// of statements instead of a wall of struct literals.
pub struct ProgramBuilder {
    pub program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            program: Program {
                statements: vec![],
                postfix: vec![],
                fips: vec![],
                string_consts: vec![],
                global_ints: vec![],
                global_bytes: vec![],
                global_strings: vec![],
                global_int_array_sizes: vec![],
                global_byte_array_sizes: vec![],
                global_string_array_sizes: vec![],
                functions: vec![],
                main_function: 0,
            },
        }
    }

    pub fn stmt(&mut self, kind: StmtKind) -> usize {
        let index = self.program.statements.len();
        self.program.statements.push(Stmt {
            line: index as u32 + 1,
            next: index + 1,
            kind,
        });
        index
    }

    /// Statement with an explicit successor.
    pub fn stmt_next(&mut self, kind: StmtKind, next: usize) -> usize {
        let index = self.stmt(kind);
        self.program.statements[index].next = next;
        index
    }

    pub fn set_next(&mut self, stmt: usize, next: usize) {
        self.program.statements[stmt].next = next;
    }

    pub fn slot(&mut self, hint: Hint, elements: Vec<Element>) -> usize {
        self.program.postfix.push(PostfixSlot { hint, elements });
        self.program.postfix.len() - 1
    }

    /// Postfix slot holding a single integer constant.
    pub fn const_slot(&mut self, value: i32) -> usize {
        self.slot(Hint::ConstNoOp, vec![Element::IntConst(value)])
    }

    /// String constant plus a postfix slot referencing it.
    pub fn str_slot(&mut self, text: &str) -> usize {
        let index = self.str_const(text);
        self.slot(Hint::ConstNoOp, vec![Element::StringConst(index)])
    }

    pub fn str_const(&mut self, text: &str) -> usize {
        self.program.string_consts.push(text.to_string());
        self.program.string_consts.len() - 1
    }

    pub fn fip(&mut self, function: usize, argv: Vec<usize>) -> usize {
        self.program.fips.push(Fip { function, argv });
        self.program.fips.len() - 1
    }

    /// FIP + postfix slot for one intrinsic call by name.
    pub fn intrinsic_call(&mut self, name: &str, argv: Vec<usize>) -> usize {
        let index = nic::intrinsics::index_of(name)
            .unwrap_or_else(|| panic!("unknown intrinsic {}", name));
        let fip = self.fip(index, argv);
        self.slot(Hint::InternFuncNoOp, vec![Element::InternCall(fip)])
    }

    /// Statement calling an intrinsic and discarding the result.
    pub fn call_stmt(&mut self, name: &str, argv: Vec<usize>) -> usize {
        let slot = self.intrinsic_call(name, argv);
        self.stmt(StmtKind::Expr { slot, assign: None })
    }

    /// Statement assigning an expression to a target.
    pub fn assign_stmt(&mut self, slot: usize, target: AssignTarget) -> usize {
        self.stmt(StmtKind::Expr {
            slot,
            assign: Some(target),
        })
    }

    pub fn bare_return(&mut self) -> usize {
        let index = self.stmt(StmtKind::Return { slot: None });
        self.program.statements[index].next = index;
        index
    }

    pub fn return_value(&mut self, slot: usize) -> usize {
        let index = self.stmt(StmtKind::Return { slot: Some(slot) });
        self.program.statements[index].next = index;
        index
    }

    pub fn function(&mut self, info: FunctionInfo) -> usize {
        self.program.functions.push(info);
        self.program.functions.len() - 1
    }

    /// The usual `main`: entry 0, void, no arguments.
    pub fn main_function(&mut self, local_ints: usize, local_bytes: usize, local_strings: usize) {
        let index = self.function(FunctionInfo {
            entry: 0,
            return_kind: ReturnKind::Void,
            args: Vec::<ArgSpec>::new(),
            local_ints,
            local_bytes,
            local_strings,
            int_array_sizes: vec![],
            byte_array_sizes: vec![],
            string_array_sizes: vec![],
        });
        self.program.main_function = index;
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

/// Run a program on a manual clock with captured output.
pub fn run_vm(program: Program) -> (Result<i32, VmError>, Vm<ManualClock>) {
    nic::cancel::reset();
    let mut vm = Vm::new(program, ManualClock::new());
    vm.capture_output();
    let result = vm.run_main(&[]);
    (result, vm)
}

/// Run a program that must succeed and return its console output.
pub fn run_output(program: Program) -> String {
    let (result, vm) = run_vm(program);
    result.unwrap_or_else(|e| panic!("script failed: {}", e));
    String::from_utf8(vm.output().to_vec()).expect("non-UTF-8 output")
}

/// Baseline named-pool usage for a program: string constants, global
/// string scalars, and global string array elements.
pub fn baseline_named_slots(program: &Program) -> usize {
    program.string_consts.len()
        + program.global_strings.len()
        + program.global_string_array_sizes.iter().sum::<usize>()
}
