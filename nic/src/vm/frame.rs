//! Function activation frames.
//!
//! Local scalars live on three shared per-type stacks; a frame records
//! its base offset into each. Every access goes through
//! `base + index`, resolved against the current stack storage, so stack
//! growth can never invalidate a cached location. Local arrays are owned
//! by the frame and dropped with it; local string scalars and string
//! array elements borrow named string slots which the frame retires on
//! release.

use crate::ir::core::FunctionInfo;

use super::strings::NamedPool;

/// Growth step for the scalar stacks.
const STACK_GRANULARITY: usize = 32;

/// Bound on script call nesting (including alarm callbacks).
pub(crate) const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug)]
pub(crate) struct Frame {
    pub func: usize,
    /// Call-site record to receive the return value; `None` for the
    /// top-level `main` invocation and for alarm callbacks.
    pub fip: Option<usize>,
    pub int_base: usize,
    pub byte_base: usize,
    pub string_base: usize,
    pub int_arrays: Vec<Vec<i32>>,
    pub byte_arrays: Vec<Vec<u8>>,
    pub string_arrays: Vec<Vec<usize>>,
    /// Named slots to retire on release.
    pub named_slots: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ScalarStacks {
    pub ints: Vec<i32>,
    pub bytes: Vec<u8>,
    /// Named-pool slot indices, one per local string scalar.
    pub strings: Vec<usize>,
    int_high: usize,
    byte_high: usize,
    string_high: usize,
}

fn grow<T: Clone + Default>(stack: &mut Vec<T>, n: usize) -> usize {
    let base = stack.len();
    let needed = base + n;
    if stack.capacity() < needed {
        stack.reserve((needed - base).max(STACK_GRANULARITY));
    }
    stack.resize(needed, T::default());
    base
}

impl ScalarStacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depths(&self) -> (usize, usize, usize) {
        (self.ints.len(), self.bytes.len(), self.strings.len())
    }

    pub fn high_water(&self) -> (usize, usize, usize) {
        (self.int_high, self.byte_high, self.string_high)
    }
}

/// Allocate a frame for `func`: bump the scalar stacks, zero-initialize
/// int and byte locals, acquire fresh empty named slots for string
/// locals and string array elements, and allocate the local array
/// tables.
pub(crate) fn build_frame(
    func_idx: usize,
    func: &FunctionInfo,
    fip: Option<usize>,
    stacks: &mut ScalarStacks,
    named: &mut NamedPool,
) -> Frame {
    let int_base = grow(&mut stacks.ints, func.local_ints);
    let byte_base = grow(&mut stacks.bytes, func.local_bytes);
    let string_base = grow(&mut stacks.strings, func.local_strings);
    for i in 0..func.local_strings {
        stacks.strings[string_base + i] = named.new_slot(b"");
    }
    stacks.int_high = stacks.int_high.max(stacks.ints.len());
    stacks.byte_high = stacks.byte_high.max(stacks.bytes.len());
    stacks.string_high = stacks.string_high.max(stacks.strings.len());

    let int_arrays = func
        .int_array_sizes
        .iter()
        .map(|&size| vec![0i32; size])
        .collect();
    let byte_arrays = func
        .byte_array_sizes
        .iter()
        .map(|&size| vec![0u8; size])
        .collect();
    let string_arrays = func
        .string_array_sizes
        .iter()
        .map(|&size| (0..size).map(|_| named.new_slot(b"")).collect())
        .collect();

    Frame {
        func: func_idx,
        fip,
        int_base,
        byte_base,
        string_base,
        int_arrays,
        byte_arrays,
        string_arrays,
        named_slots: func.named_slot_demand(),
    }
}

/// Release a frame: retire its named slots and rewind the scalar stacks.
/// Runs on every unwind path, error or not.
pub(crate) fn release_frame(frame: Frame, stacks: &mut ScalarStacks, named: &mut NamedPool) {
    named.release(frame.named_slots);
    stacks.ints.truncate(frame.int_base);
    stacks.bytes.truncate(frame.byte_base);
    stacks.strings.truncate(frame.string_base);
}
