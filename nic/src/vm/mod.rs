//! The NIC virtual machine.
//!
//! One `Vm` executes one loaded [`Program`]: a flat statement table
//! walked by index, with expressions evaluated on demand by the postfix
//! evaluator. Between statements the executor polls the alarm scheduler
//! and the cooperative interruption flag. Execution is strictly
//! single-threaded; call-site return cells and loop scratch are shared
//! per call site, so one `Vm` must never run two scripts at once.

pub mod alarm;
pub mod error;
mod eval;
mod frame;
pub(crate) mod intrinsics_exec;
pub mod strings;

pub use alarm::ALARM_SLOT_COUNT;
pub use error::VmError;
pub use strings::{NamedPool, TempPool, ALLOC_GRANULARITY};

use std::io::Write;

use crate::cancel;
use crate::clock::ClockSource;
use crate::ir::core::{
    ArgKind, AssignTarget, CmpOp, FunctionInfo, Program, ReturnKind, ScalarTarget, Stmt, StmtKind,
};

use alarm::Alarms;
use eval::Eval;
use frame::{build_frame, release_frame, Frame, ScalarStacks, MAX_CALL_DEPTH};
use intrinsics_exec::FileHandle;

/// Per-statement runtime scratch: the cached loop bound and step for
/// `EndFor`, the remaining count for `EndRepeat`. Indexed by statement
/// index and shared by every activation of the statement, like the FIP
/// return cells.
#[derive(Debug, Clone, Copy, Default)]
struct LoopScratch {
    bound: i32,
    step: i32,
}

#[derive(Debug)]
enum OutputMode {
    Stdout,
    Capture(Vec<u8>),
}

/// String-pool and stack statistics, printed by the CLI under `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub named_used: usize,
    pub named_allocated: usize,
    pub named_high_water: usize,
    pub temp_allocated: usize,
    pub temp_all_inactive: bool,
    pub temp_warnings: usize,
    pub int_stack_high: usize,
    pub byte_stack_high: usize,
    pub string_stack_high: usize,
}

/// Binding value for one script-function argument, materialized in the
/// caller's context before the callee frame exists.
#[derive(Debug)]
enum ArgValue {
    Int(i32),
    Byte(u8),
    Str(Vec<u8>),
}

#[derive(Debug)]
pub struct Vm<C: ClockSource> {
    program: Program,
    clock: C,
    pub(crate) named: NamedPool,
    pub(crate) temp: TempPool,
    stacks: ScalarStacks,
    frames: Vec<Frame>,
    global_ints: Vec<i32>,
    global_bytes: Vec<u8>,
    /// Named slot per global string variable.
    global_string_slots: Vec<usize>,
    pub(crate) global_int_arrays: Vec<Vec<i32>>,
    pub(crate) global_byte_arrays: Vec<Vec<u8>>,
    pub(crate) global_string_arrays: Vec<Vec<usize>>,
    /// Named slot per string constant.
    pub(crate) string_consts: Vec<usize>,
    fip_rets: Vec<i32>,
    loop_scratch: Vec<LoopScratch>,
    pub(crate) alarms: Alarms,
    pub(crate) files: Vec<Option<FileHandle>>,
    pub(crate) stopwatch: u64,
    pub(crate) current_line: u32,
    pub(crate) eval_depth: usize,
    temp_warnings: usize,
    output: OutputMode,
    main_ret: i32,
}

impl<C: ClockSource> Vm<C> {
    /// Build a VM for `program`. Allocates named slots for every string
    /// constant, global string variable and global string array element.
    pub fn new(program: Program, clock: C) -> Self {
        let mut named = NamedPool::new();
        let string_consts = program
            .string_consts
            .iter()
            .map(|s| named.new_slot(s.as_bytes()))
            .collect();
        let global_string_slots = program
            .global_strings
            .iter()
            .map(|s| named.new_slot(s.as_bytes()))
            .collect();
        let global_string_arrays = program
            .global_string_array_sizes
            .iter()
            .map(|&size| (0..size).map(|_| named.new_slot(b"")).collect())
            .collect();
        let global_int_arrays = program
            .global_int_array_sizes
            .iter()
            .map(|&size| vec![0i32; size])
            .collect();
        let global_byte_arrays = program
            .global_byte_array_sizes
            .iter()
            .map(|&size| vec![0u8; size])
            .collect();

        let fip_rets = vec![0; program.fips.len()];
        let loop_scratch = vec![LoopScratch::default(); program.statements.len()];
        let global_ints = program.global_ints.clone();
        let global_bytes = program.global_bytes.clone();

        Self {
            program,
            clock,
            named,
            temp: TempPool::new(),
            stacks: ScalarStacks::new(),
            frames: Vec::new(),
            global_ints,
            global_bytes,
            global_string_slots,
            global_int_arrays,
            global_byte_arrays,
            global_string_arrays,
            string_consts,
            fip_rets,
            loop_scratch,
            alarms: Alarms::new(),
            files: Vec::new(),
            stopwatch: 0,
            current_line: 0,
            eval_depth: 0,
            temp_warnings: 0,
            output: OutputMode::Stdout,
            main_ret: 0,
        }
    }

    /// Redirect console output into an internal buffer (for tests and
    /// embedding). Read it back with [`Vm::output`].
    pub fn capture_output(&mut self) {
        self.output = OutputMode::Capture(Vec::new());
    }

    /// Captured console output; empty unless [`Vm::capture_output`] was
    /// called.
    pub fn output(&self) -> &[u8] {
        match &self.output {
            OutputMode::Capture(buf) => buf,
            OutputMode::Stdout => &[],
        }
    }

    pub(crate) fn write_output(&mut self, bytes: &[u8]) {
        match &mut self.output {
            OutputMode::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(bytes);
                let _ = lock.flush();
            }
            OutputMode::Capture(buf) => buf.extend_from_slice(bytes),
        }
    }

    /// Run the program's `main` function with command-line arguments
    /// bound as text. Returns `main`'s integer result (0 for void).
    /// Alarms are cleared on every exit path.
    pub fn run_main(&mut self, args: &[String]) -> Result<i32, VmError> {
        let main_idx = self.program.main_function;
        let func = self
            .program
            .functions
            .get(main_idx)
            .cloned()
            .ok_or(VmError::InvalidFunction { index: main_idx })?;

        let bound = func
            .args
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let text = args.get(i).map(String::as_bytes).unwrap_or(b"");
                match spec.kind {
                    ArgKind::Int => ArgValue::Int(eval::parse_int(text)),
                    ArgKind::Byte => ArgValue::Byte(eval::parse_int(text) as u8),
                    ArgKind::String => ArgValue::Str(text.to_vec()),
                }
            })
            .collect();

        let result = self.invoke(main_idx, &func, None, bound);
        self.alarms.reset_all();
        result?;

        if func.return_kind == ReturnKind::String {
            let slot = self.main_ret as usize;
            if self.main_ret >= 0 && slot < self.temp.allocated() && self.temp.is_active(slot) {
                self.consume_temp(slot);
            }
            return Ok(0);
        }
        Ok(self.main_ret)
    }

    /// Script-to-script call through a FIP record. Arguments are
    /// evaluated and coerced in the caller's frame, then stored into the
    /// callee's locals once its frame exists.
    pub(crate) fn call_function(
        &mut self,
        func_idx: usize,
        fip: Option<usize>,
    ) -> Result<(), VmError> {
        let func = self
            .program
            .functions
            .get(func_idx)
            .cloned()
            .ok_or(VmError::InvalidFunction { index: func_idx })?;

        let mut bound = Vec::with_capacity(func.args.len());
        if let Some(fip) = fip {
            let argc = self.program.fips[fip].argv.len();
            if argc != func.args.len() {
                return Err(VmError::ArgcMismatch {
                    function: func_idx,
                    expected: func.args.len(),
                    got: argc,
                });
            }
            for i in 0..func.args.len() {
                let slot = self.program.fips[fip].argv[i];
                let value = self.eval_postfix(slot)?;
                bound.push(match func.args[i].kind {
                    ArgKind::Int => ArgValue::Int(self.int_value(value)?),
                    ArgKind::Byte => ArgValue::Byte(self.int_value(value)? as u8),
                    ArgKind::String => ArgValue::Str(self.string_value(value)?),
                });
            }
        }

        self.invoke(func_idx, &func, fip, bound)
    }

    /// Push a frame, bind arguments, execute, and release the frame on
    /// every exit path.
    fn invoke(
        &mut self,
        func_idx: usize,
        func: &FunctionInfo,
        fip: Option<usize>,
        bound: Vec<ArgValue>,
    ) -> Result<(), VmError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded {
                depth: self.frames.len(),
            });
        }

        let frame = build_frame(func_idx, func, fip, &mut self.stacks, &mut self.named);
        self.frames.push(frame);

        let result = self
            .bind_arguments(func, bound)
            .and_then(|()| self.run(func.entry));

        if let Some(frame) = self.frames.pop() {
            release_frame(frame, &mut self.stacks, &mut self.named);
        }
        result
    }

    fn bind_arguments(&mut self, func: &FunctionInfo, bound: Vec<ArgValue>) -> Result<(), VmError> {
        for (spec, value) in func.args.iter().zip(bound) {
            match value {
                ArgValue::Int(v) => self.set_local_int(spec.local, v)?,
                ArgValue::Byte(v) => self.set_local_byte(spec.local, v)?,
                ArgValue::Str(bytes) => {
                    let slot = self.local_string_slot(spec.local)?;
                    self.named.set(slot, &bytes);
                }
            }
        }
        Ok(())
    }

    /// The statement loop for one activation. Runs until the function
    /// returns; recursion into callees happens through the postfix
    /// evaluator.
    fn run(&mut self, entry: usize) -> Result<(), VmError> {
        let mut pc = entry;
        loop {
            if cancel::is_requested() {
                return Err(VmError::Interrupted);
            }
            self.poll_alarms()?;

            let stmt: Stmt = *self
                .program
                .statements
                .get(pc)
                .ok_or(VmError::InvalidReference {
                    what: "statement",
                    index: pc,
                })?;
            self.current_line = stmt.line;
            let mut next = stmt.next;

            match stmt.kind {
                StmtKind::If {
                    lhs,
                    rhs,
                    op,
                    false_target,
                } => {
                    if !self.compare(lhs, rhs, op)? {
                        next = false_target;
                    }
                }
                StmtKind::EndIf => {}
                StmtKind::While {
                    lhs,
                    rhs,
                    op,
                    endwhile,
                } => {
                    if !self.compare(lhs, rhs, op)? {
                        next = self.program.statements[endwhile].next;
                    }
                }
                StmtKind::EndWhile { head } => {
                    next = head;
                }
                StmtKind::For {
                    var,
                    start,
                    stop,
                    step,
                    endfor,
                } => {
                    let start_v = {
                        let e = self.eval_postfix(start)?;
                        self.int_value(e)?
                    };
                    let stop_v = {
                        let e = self.eval_postfix(stop)?;
                        self.int_value(e)?
                    };
                    let step_v = match step {
                        Some(slot) => {
                            let e = self.eval_postfix(slot)?;
                            self.int_value(e)?
                        }
                        None => 1,
                    };
                    self.store_scalar(var, start_v)?;
                    self.loop_scratch[endfor] = LoopScratch {
                        bound: stop_v,
                        step: step_v,
                    };
                    if !for_in_range(start_v, stop_v, step_v) {
                        next = self.program.statements[endfor].next;
                    }
                }
                StmtKind::EndFor { head } => {
                    let scratch = self.loop_scratch[pc];
                    let var = match self.program.statements[head].kind {
                        StmtKind::For { var, .. } => var,
                        _ => {
                            return Err(VmError::InternalError(format!(
                                "endfor at {} does not reference a for statement",
                                pc
                            )))
                        }
                    };
                    let v = self.load_scalar(var)?.wrapping_add(scratch.step);
                    self.store_scalar(var, v)?;
                    if for_in_range(v, scratch.bound, scratch.step) {
                        next = self.program.statements[head].next;
                    }
                }
                StmtKind::Loop => {}
                StmtKind::EndLoop { head } => {
                    next = self.program.statements[head].next;
                }
                StmtKind::Repeat { count, endrepeat } => {
                    let k = {
                        let e = self.eval_postfix(count)?;
                        self.int_value(e)?
                    };
                    self.loop_scratch[endrepeat].bound = k;
                    if k <= 0 {
                        next = self.program.statements[endrepeat].next;
                    }
                }
                StmtKind::EndRepeat { head } => {
                    self.loop_scratch[pc].bound -= 1;
                    if self.loop_scratch[pc].bound > 0 {
                        next = self.program.statements[head].next;
                    }
                }
                StmtKind::Break | StmtKind::Continue => {}
                StmtKind::Increment { target, step } => {
                    let v = self.load_scalar(target)?;
                    self.store_scalar(target, v.wrapping_add(step))?;
                }
                StmtKind::Expr { slot, assign } => {
                    let value = self.eval_postfix(slot)?;
                    match assign {
                        Some(target) => self.assign(target, value)?,
                        None => self.discard(value),
                    }
                }
                StmtKind::Return { slot } => {
                    // No hygiene check here: a string return legitimately
                    // leaves its temp slot active for the caller.
                    if let Some(slot) = slot {
                        let value = self.eval_postfix(slot)?;
                        self.store_return(value)?;
                    }
                    return Ok(());
                }
            }

            self.check_temp_hygiene();
            pc = next;
        }
    }

    /// Statement-level comparison. An integer on either side forces an
    /// integer comparison; otherwise both sides materialize to bytes and
    /// compare bytewise.
    fn compare(&mut self, lhs: usize, rhs: usize, op: CmpOp) -> Result<bool, VmError> {
        use std::cmp::Ordering;
        let l = self.eval_postfix(lhs)?;
        let r = self.eval_postfix(rhs)?;
        let ordering = if matches!(l, Eval::IntConst(_)) || matches!(r, Eval::IntConst(_)) {
            let a = self.int_value(l)?;
            let b = self.int_value(r)?;
            a.cmp(&b)
        } else {
            let a = self.string_value(l)?;
            let b = self.string_value(r)?;
            a.cmp(&b)
        };
        Ok(match op {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        })
    }

    fn assign(&mut self, target: AssignTarget, value: Eval) -> Result<(), VmError> {
        match target {
            AssignTarget::LocalInt(i) => {
                let v = self.int_value(value)?;
                self.set_local_int(i, v)
            }
            AssignTarget::GlobalInt(i) => {
                let v = self.int_value(value)?;
                self.set_global_int(i, v)
            }
            AssignTarget::LocalByte(i) => {
                let v = self.int_value(value)? as u8;
                self.set_local_byte(i, v)
            }
            AssignTarget::GlobalByte(i) => {
                let v = self.int_value(value)? as u8;
                self.set_global_byte(i, v)
            }
            AssignTarget::LocalString(i) => {
                let slot = self.local_string_slot(i)?;
                self.store_string(slot, value)
            }
            AssignTarget::GlobalString(i) => {
                let slot = self.global_string_slot(i)?;
                self.store_string(slot, value)
            }
            AssignTarget::LocalIntArray { array, index_slot } => {
                let v = self.int_value(value)?;
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let frame = self.current_frame_mut()?;
                let arr = frame
                    .int_arrays
                    .get_mut(array)
                    .ok_or(VmError::InvalidReference {
                        what: "local int array",
                        index: array,
                    })?;
                let i = eval::check_array_index(index, arr.len(), line)?;
                arr[i] = v;
                Ok(())
            }
            AssignTarget::GlobalIntArray { array, index_slot } => {
                let v = self.int_value(value)?;
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let arr = self
                    .global_int_arrays
                    .get_mut(array)
                    .ok_or(VmError::InvalidReference {
                        what: "global int array",
                        index: array,
                    })?;
                let i = eval::check_array_index(index, arr.len(), line)?;
                arr[i] = v;
                Ok(())
            }
            AssignTarget::LocalByteArray { array, index_slot } => {
                let v = self.int_value(value)? as u8;
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let frame = self.current_frame_mut()?;
                let arr = frame
                    .byte_arrays
                    .get_mut(array)
                    .ok_or(VmError::InvalidReference {
                        what: "local byte array",
                        index: array,
                    })?;
                let i = eval::check_array_index(index, arr.len(), line)?;
                arr[i] = v;
                Ok(())
            }
            AssignTarget::GlobalByteArray { array, index_slot } => {
                let v = self.int_value(value)? as u8;
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let arr = self
                    .global_byte_arrays
                    .get_mut(array)
                    .ok_or(VmError::InvalidReference {
                        what: "global byte array",
                        index: array,
                    })?;
                let i = eval::check_array_index(index, arr.len(), line)?;
                arr[i] = v;
                Ok(())
            }
            AssignTarget::LocalStringArray { array, index_slot } => {
                let slot = self.local_string_array_slot(array, index_slot)?;
                self.store_string(slot, value)
            }
            AssignTarget::GlobalStringArray { array, index_slot } => {
                let slot = self.global_string_array_slot(array, index_slot)?;
                self.store_string(slot, value)
            }
        }
    }

    /// Store a tagged result into a named string slot. A temp source
    /// swaps its storage in instead of copying.
    fn store_string(&mut self, dst: usize, value: Eval) -> Result<(), VmError> {
        if let Eval::TempStringRef(t) = value {
            self.named.swap_from_temp(dst, &mut self.temp, t);
            self.consume_temp(t);
            Ok(())
        } else {
            let bytes = self.string_value(value)?;
            self.named.set(dst, &bytes);
            Ok(())
        }
    }

    /// Drop an unconsumed expression result, releasing a live temp.
    fn discard(&mut self, value: Eval) {
        if let Eval::TempStringRef(t) = value {
            if self.temp.is_active(t) {
                self.temp.deactivate(t);
            }
        }
    }

    /// Coerce a `return` value to the function's declared kind and write
    /// it into the caller's FIP return cell (or the main result).
    fn store_return(&mut self, value: Eval) -> Result<(), VmError> {
        let frame = self.current_frame()?;
        let fip = frame.fip;
        let kind = self.program.functions[frame.func].return_kind;
        let ret = match kind {
            ReturnKind::Void => {
                self.discard(value);
                0
            }
            ReturnKind::Int => self.int_value(value)?,
            ReturnKind::Byte => self.int_value(value)? & 0xff,
            ReturnKind::String => {
                // The temp slot stays active across the return; the
                // caller adopts and eventually consumes it.
                let slot = match value {
                    Eval::TempStringRef(t) => t,
                    other => {
                        let bytes = self.string_value(other)?;
                        self.temp.new_slot(&bytes)
                    }
                };
                slot as i32
            }
        };
        match fip {
            Some(f) => self.fip_rets[f] = ret,
            None => self.main_ret = ret,
        }
        Ok(())
    }

    /// Fire due alarm callbacks in slot order. Skipped while a callback
    /// is already running.
    pub(crate) fn poll_alarms(&mut self) -> Result<(), VmError> {
        if self.alarms.dispatching() {
            return Ok(());
        }
        let mut now = self.clock.now_ms();
        while let Some((slot, func)) = self.alarms.next_due_callback(now) {
            self.alarms.set_dispatching(true);
            let result = self.call_function(func, None);
            self.alarms.set_dispatching(false);
            result?;
            now = self.clock.now_ms();
            self.alarms.restart(slot, now);
        }
        Ok(())
    }

    pub(crate) fn consume_temp(&mut self, slot: usize) {
        if !self.temp.deactivate(slot) {
            self.warn_temp_accounting(slot);
        }
    }

    fn warn_temp_accounting(&mut self, slot: usize) {
        self.temp_warnings += 1;
        if self.temp_warnings == 1 {
            let _ = writeln!(
                std::io::stderr(),
                "[nic] line {}: temp string slot {} consumed while inactive",
                self.current_line,
                slot
            );
        }
    }

    /// Soft invariant: between statements every temp slot is inactive.
    /// Only meaningful at expression depth zero; a callee's statements
    /// may run while the caller's half-evaluated expression holds a live
    /// temp.
    fn check_temp_hygiene(&mut self) {
        if self.eval_depth == 0 && !self.temp.all_inactive() {
            self.temp_warnings += 1;
            if self.temp_warnings == 1 {
                let _ = writeln!(
                    std::io::stderr(),
                    "[nic] line {}: temp string slot left active after statement",
                    self.current_line
                );
            }
        }
    }

    // Frame-relative and global scalar access. Every local access
    // resolves `stack base + offset` against current storage.

    pub(crate) fn current_frame(&self) -> Result<&Frame, VmError> {
        self.frames.last().ok_or(VmError::InvalidReference {
            what: "active frame",
            index: 0,
        })
    }

    pub(crate) fn current_frame_mut(&mut self) -> Result<&mut Frame, VmError> {
        self.frames.last_mut().ok_or(VmError::InvalidReference {
            what: "active frame",
            index: 0,
        })
    }

    pub(crate) fn local_int(&self, i: usize) -> Result<i32, VmError> {
        let base = self.current_frame()?.int_base;
        self.stacks
            .ints
            .get(base + i)
            .copied()
            .ok_or(VmError::InvalidReference {
                what: "local int variable",
                index: i,
            })
    }

    fn set_local_int(&mut self, i: usize, v: i32) -> Result<(), VmError> {
        let base = self.current_frame()?.int_base;
        match self.stacks.ints.get_mut(base + i) {
            Some(cell) => {
                *cell = v;
                Ok(())
            }
            None => Err(VmError::InvalidReference {
                what: "local int variable",
                index: i,
            }),
        }
    }

    pub(crate) fn local_byte(&self, i: usize) -> Result<u8, VmError> {
        let base = self.current_frame()?.byte_base;
        self.stacks
            .bytes
            .get(base + i)
            .copied()
            .ok_or(VmError::InvalidReference {
                what: "local byte variable",
                index: i,
            })
    }

    fn set_local_byte(&mut self, i: usize, v: u8) -> Result<(), VmError> {
        let base = self.current_frame()?.byte_base;
        match self.stacks.bytes.get_mut(base + i) {
            Some(cell) => {
                *cell = v;
                Ok(())
            }
            None => Err(VmError::InvalidReference {
                what: "local byte variable",
                index: i,
            }),
        }
    }

    pub(crate) fn local_string_slot(&self, i: usize) -> Result<usize, VmError> {
        let base = self.current_frame()?.string_base;
        self.stacks
            .strings
            .get(base + i)
            .copied()
            .ok_or(VmError::InvalidReference {
                what: "local string variable",
                index: i,
            })
    }

    pub(crate) fn global_int(&self, i: usize) -> Result<i32, VmError> {
        self.global_ints
            .get(i)
            .copied()
            .ok_or(VmError::InvalidReference {
                what: "global int variable",
                index: i,
            })
    }

    fn set_global_int(&mut self, i: usize, v: i32) -> Result<(), VmError> {
        match self.global_ints.get_mut(i) {
            Some(cell) => {
                *cell = v;
                Ok(())
            }
            None => Err(VmError::InvalidReference {
                what: "global int variable",
                index: i,
            }),
        }
    }

    pub(crate) fn global_byte(&self, i: usize) -> Result<u8, VmError> {
        self.global_bytes
            .get(i)
            .copied()
            .ok_or(VmError::InvalidReference {
                what: "global byte variable",
                index: i,
            })
    }

    fn set_global_byte(&mut self, i: usize, v: u8) -> Result<(), VmError> {
        match self.global_bytes.get_mut(i) {
            Some(cell) => {
                *cell = v;
                Ok(())
            }
            None => Err(VmError::InvalidReference {
                what: "global byte variable",
                index: i,
            }),
        }
    }

    pub(crate) fn global_string_slot(&self, i: usize) -> Result<usize, VmError> {
        self.global_string_slots
            .get(i)
            .copied()
            .ok_or(VmError::InvalidReference {
                what: "global string variable",
                index: i,
            })
    }

    fn load_scalar(&self, target: ScalarTarget) -> Result<i32, VmError> {
        match target {
            ScalarTarget::LocalInt(i) => self.local_int(i),
            ScalarTarget::GlobalInt(i) => self.global_int(i),
            ScalarTarget::LocalByte(i) => Ok(i32::from(self.local_byte(i)?)),
            ScalarTarget::GlobalByte(i) => Ok(i32::from(self.global_byte(i)?)),
        }
    }

    fn store_scalar(&mut self, target: ScalarTarget, v: i32) -> Result<(), VmError> {
        match target {
            ScalarTarget::LocalInt(i) => self.set_local_int(i, v),
            ScalarTarget::GlobalInt(i) => self.set_global_int(i, v),
            ScalarTarget::LocalByte(i) => self.set_local_byte(i, v as u8),
            ScalarTarget::GlobalByte(i) => self.set_global_byte(i, v as u8),
        }
    }

    // Introspection for tests and the CLI.

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn pool_stats(&self) -> PoolStats {
        let (int_high, byte_high, string_high) = self.stacks.high_water();
        PoolStats {
            named_used: self.named.used(),
            named_allocated: self.named.allocated(),
            named_high_water: self.named.high_water(),
            temp_allocated: self.temp.allocated(),
            temp_all_inactive: self.temp.all_inactive(),
            temp_warnings: self.temp_warnings,
            int_stack_high: int_high,
            byte_stack_high: byte_high,
            string_stack_high: string_high,
        }
    }

    /// Current depths of the three scalar stacks.
    pub fn stack_depths(&self) -> (usize, usize, usize) {
        self.stacks.depths()
    }

    /// Named-pool `used` counter.
    pub fn named_slots_used(&self) -> usize {
        self.named.used()
    }

    /// True when every temp string slot is inactive.
    pub fn temps_clean(&self) -> bool {
        self.temp.all_inactive()
    }

    /// Number of global string variables (for tests reading back state).
    pub fn global_string_bytes(&self, i: usize) -> Option<&[u8]> {
        self.global_string_slots
            .get(i)
            .map(|&slot| self.named.bytes(slot))
    }

    pub fn global_int_value(&self, i: usize) -> Option<i32> {
        self.global_ints.get(i).copied()
    }

    pub fn global_byte_value(&self, i: usize) -> Option<u8> {
        self.global_bytes.get(i).copied()
    }
}

/// The `for` continuation predicate: a non-negative step counts up to
/// `stop` inclusive, a negative step counts down to `stop` inclusive.
fn for_in_range(value: i32, stop: i32, step: i32) -> bool {
    if step >= 0 {
        value <= stop
    } else {
        value >= stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_in_range_counting_up() {
        assert!(for_in_range(1, 3, 1));
        assert!(for_in_range(3, 3, 1));
        assert!(!for_in_range(4, 3, 1));
    }

    #[test]
    fn test_for_in_range_counting_down() {
        assert!(for_in_range(3, 1, -1));
        assert!(for_in_range(1, 1, -1));
        assert!(!for_in_range(0, 1, -1));
    }

    #[test]
    fn test_for_in_range_zero_step_counts_up() {
        assert!(for_in_range(1, 3, 0));
        assert!(!for_in_range(4, 3, 0));
    }
}
