//! Cooperative interruption. Kept in its own test binary because the
//! interruption flag is process-wide.

mod common;
use common::*;

use nic::clock::ManualClock;
use nic::ir::core::StmtKind;
use nic::vm::{Vm, VmError};

#[test]
fn test_interruption_unwinds_and_releases_frames() {
    let mut b = ProgramBuilder::new();
    // An infinite loop; only the interruption flag can stop it.
    b.stmt(StmtKind::Loop); // 0
    b.stmt(StmtKind::EndLoop { head: 0 }); // 1
    b.bare_return(); // 2
    b.main_function(2, 1, 1);

    let program = b.finish();
    let baseline = baseline_named_slots(&program);

    nic::cancel::reset();
    nic::cancel::request();
    let mut vm = Vm::new(program, ManualClock::new());
    vm.capture_output();
    let result = vm.run_main(&[]);
    assert_eq!(result, Err(VmError::Interrupted));

    // Frames released, named pool rewound, alarms cleared.
    assert_eq!(vm.stack_depths(), (0, 0, 0));
    assert_eq!(vm.named_slots_used(), baseline);

    nic::cancel::reset();
    assert!(!nic::cancel::is_requested());
}
