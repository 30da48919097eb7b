//! Postfix expression evaluation.
//!
//! Every expression evaluates to a tagged [`Eval`] result. Integer-valued
//! operands (constants, int/byte variables, int/byte array elements)
//! collapse to `IntConst` immediately; string-valued operands stay as
//! references into the string pools and coerce lazily, so a string
//! variable used in an integer context parses as decimal and an integer
//! used in a string context formats as decimal.
//!
//! Slots carrying an optimizer hint take a direct path that inspects the
//! first one to three elements without touching the expression stack; the
//! loader has already verified the hint matches the slot shape.

use crate::clock::ClockSource;
use crate::ir::core::{Element, Hint, Op, ReturnKind, EXPR_STACK_CAPACITY};

use super::error::VmError;
use super::Vm;

/// Tagged result of evaluating a postfix slot.
///
/// String array references keep their index postfix slot and evaluate it
/// when the value is actually read or written; byte array references
/// name a whole buffer and only intrinsics accept them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Eval {
    IntConst(i32),
    StringConstRef(usize),
    TempStringRef(usize),
    LocalStringVarRef(usize),
    GlobalStringVarRef(usize),
    LocalStringArrayRef { array: usize, index_slot: usize },
    GlobalStringArrayRef { array: usize, index_slot: usize },
    LocalByteArrayRef(usize),
    GlobalByteArrayRef(usize),
}

/// C `atoi` semantics: optional leading whitespace and sign, then
/// decimal digits up to the first non-digit. Anything else is zero.
pub(crate) fn parse_int(bytes: &[u8]) -> i32 {
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let mut negative = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        negative = bytes[i] == b'-';
        i += 1;
    }
    let mut value: i64 = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        value = value.wrapping_mul(10).wrapping_add(i64::from(bytes[i] - b'0'));
        i += 1;
    }
    if negative {
        value = value.wrapping_neg();
    }
    value as i32
}

pub(crate) fn format_int(value: i32) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Two-operand integer reduction. `<` and `>` are unsigned shifts; a
/// shift count outside 0..32 yields 0.
fn int_op(op: Op, a: i32, b: i32, line: u32) -> Result<i32, VmError> {
    Ok(match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero { line });
            }
            a.wrapping_div(b)
        }
        Op::Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero { line });
            }
            a.wrapping_rem(b)
        }
        Op::Shl => {
            if (0..32).contains(&b) {
                ((a as u32) << b) as i32
            } else {
                0
            }
        }
        Op::Shr => {
            if (0..32).contains(&b) {
                ((a as u32) >> b) as i32
            } else {
                0
            }
        }
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        Op::Concat => {
            return Err(VmError::InternalError(
                "concat reached integer reduction".to_string(),
            ))
        }
    })
}

impl<C: ClockSource> Vm<C> {
    /// Evaluate one postfix slot to a tagged result.
    pub(crate) fn eval_postfix(&mut self, slot: usize) -> Result<Eval, VmError> {
        self.eval_depth += 1;
        let result = self.eval_postfix_inner(slot);
        self.eval_depth -= 1;
        result
    }

    fn eval_postfix_inner(&mut self, slot: usize) -> Result<Eval, VmError> {
        let hint = self.program.postfix[slot].hint;
        match hint {
            Hint::None => self.eval_general(slot),
            Hint::ConstNoOp => match self.program.postfix[slot].elements[0] {
                Element::IntConst(v) => Ok(Eval::IntConst(v)),
                Element::StringConst(i) => Ok(Eval::StringConstRef(i)),
                _ => self.eval_general(slot),
            },
            Hint::LocalIntNoOp => match self.program.postfix[slot].elements[0] {
                Element::LocalIntVar(i) => Ok(Eval::IntConst(self.local_int(i)?)),
                _ => self.eval_general(slot),
            },
            Hint::GlobalIntNoOp => match self.program.postfix[slot].elements[0] {
                Element::GlobalIntVar(i) => Ok(Eval::IntConst(self.global_int(i)?)),
                _ => self.eval_general(slot),
            },
            Hint::LocalByteNoOp => match self.program.postfix[slot].elements[0] {
                Element::LocalByteVar(i) => Ok(Eval::IntConst(i32::from(self.local_byte(i)?))),
                _ => self.eval_general(slot),
            },
            Hint::GlobalByteNoOp => match self.program.postfix[slot].elements[0] {
                Element::GlobalByteVar(i) => Ok(Eval::IntConst(i32::from(self.global_byte(i)?))),
                _ => self.eval_general(slot),
            },
            Hint::InternFuncNoOp => match self.program.postfix[slot].elements[0] {
                Element::InternCall(fip) => self.call_intrinsic_fip(fip),
                _ => self.eval_general(slot),
            },
            Hint::ExternFuncNoOp => match self.program.postfix[slot].elements[0] {
                Element::ExternCall(fip) => self.call_script_fip(fip),
                _ => self.eval_general(slot),
            },
            Hint::LocalIntOpLocalInt
            | Hint::LocalIntOpConstInt
            | Hint::GlobalIntOpGlobalInt
            | Hint::GlobalIntOpConstInt => {
                let (e0, e1, e2) = {
                    let e = &self.program.postfix[slot].elements;
                    (e[0], e[1], e[2])
                };
                let a = match e0 {
                    Element::LocalIntVar(i) => self.local_int(i)?,
                    Element::GlobalIntVar(i) => self.global_int(i)?,
                    _ => return self.eval_general(slot),
                };
                let b = match e1 {
                    Element::IntConst(v) => v,
                    Element::LocalIntVar(i) => self.local_int(i)?,
                    Element::GlobalIntVar(i) => self.global_int(i)?,
                    _ => return self.eval_general(slot),
                };
                match e2 {
                    Element::Operator(op) => {
                        Ok(Eval::IntConst(int_op(op, a, b, self.current_line)?))
                    }
                    _ => self.eval_general(slot),
                }
            }
        }
    }

    fn eval_general(&mut self, slot: usize) -> Result<Eval, VmError> {
        let len = self.program.postfix[slot].elements.len();
        let mut stack = [Eval::IntConst(0); EXPR_STACK_CAPACITY];
        let mut depth = 0usize;

        for i in 0..len {
            let element = self.program.postfix[slot].elements[i];
            match element {
                Element::Operator(op) => {
                    if depth < 2 {
                        return Err(VmError::InternalError(format!(
                            "postfix slot {}: operator with {} operand(s)",
                            slot, depth
                        )));
                    }
                    let rhs = stack[depth - 1];
                    let lhs = stack[depth - 2];
                    depth -= 2;
                    stack[depth] = self.apply_op(op, lhs, rhs)?;
                    depth += 1;
                }
                operand => {
                    if depth == EXPR_STACK_CAPACITY {
                        return Err(VmError::ExprStackOverflow { slot });
                    }
                    stack[depth] = self.eval_operand(operand)?;
                    depth += 1;
                }
            }
        }

        if depth != 1 {
            return Err(VmError::InternalError(format!(
                "postfix slot {}: {} results left on stack",
                slot, depth
            )));
        }
        Ok(stack[0])
    }

    fn eval_operand(&mut self, element: Element) -> Result<Eval, VmError> {
        match element {
            Element::IntConst(v) => Ok(Eval::IntConst(v)),
            Element::StringConst(i) => Ok(Eval::StringConstRef(i)),
            Element::LocalIntVar(i) => Ok(Eval::IntConst(self.local_int(i)?)),
            Element::GlobalIntVar(i) => Ok(Eval::IntConst(self.global_int(i)?)),
            Element::LocalByteVar(i) => Ok(Eval::IntConst(i32::from(self.local_byte(i)?))),
            Element::GlobalByteVar(i) => Ok(Eval::IntConst(i32::from(self.global_byte(i)?))),
            Element::LocalStringVar(i) => Ok(Eval::LocalStringVarRef(i)),
            Element::GlobalStringVar(i) => Ok(Eval::GlobalStringVarRef(i)),
            Element::LocalIntArray { array, index_slot } => {
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let frame = self.current_frame()?;
                let arr = frame.int_arrays.get(array).ok_or(VmError::InvalidReference {
                    what: "local int array",
                    index: array,
                })?;
                let i = check_array_index(index, arr.len(), line)?;
                Ok(Eval::IntConst(arr[i]))
            }
            Element::GlobalIntArray { array, index_slot } => {
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let arr = self
                    .global_int_arrays
                    .get(array)
                    .ok_or(VmError::InvalidReference {
                        what: "global int array",
                        index: array,
                    })?;
                let i = check_array_index(index, arr.len(), line)?;
                Ok(Eval::IntConst(arr[i]))
            }
            Element::LocalByteArray { array, index_slot } => {
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let frame = self.current_frame()?;
                let arr = frame.byte_arrays.get(array).ok_or(VmError::InvalidReference {
                    what: "local byte array",
                    index: array,
                })?;
                let i = check_array_index(index, arr.len(), line)?;
                Ok(Eval::IntConst(i32::from(arr[i])))
            }
            Element::GlobalByteArray { array, index_slot } => {
                let index = self.array_index(index_slot)?;
                let line = self.current_line;
                let arr = self
                    .global_byte_arrays
                    .get(array)
                    .ok_or(VmError::InvalidReference {
                        what: "global byte array",
                        index: array,
                    })?;
                let i = check_array_index(index, arr.len(), line)?;
                Ok(Eval::IntConst(i32::from(arr[i])))
            }
            Element::LocalStringArray { array, index_slot } => {
                Ok(Eval::LocalStringArrayRef { array, index_slot })
            }
            Element::GlobalStringArray { array, index_slot } => {
                Ok(Eval::GlobalStringArrayRef { array, index_slot })
            }
            Element::LocalByteArrayRef(i) => Ok(Eval::LocalByteArrayRef(i)),
            Element::GlobalByteArrayRef(i) => Ok(Eval::GlobalByteArrayRef(i)),
            Element::InternCall(fip) => self.call_intrinsic_fip(fip),
            Element::ExternCall(fip) => self.call_script_fip(fip),
            Element::Operator(_) => Err(VmError::InternalError(
                "operator treated as operand".to_string(),
            )),
        }
    }

    fn apply_op(&mut self, op: Op, lhs: Eval, rhs: Eval) -> Result<Eval, VmError> {
        if op == Op::Concat {
            let dst = match lhs {
                // A temp on the left is grown in place instead of copied.
                Eval::TempStringRef(slot) => slot,
                other => {
                    let bytes = self.string_value(other)?;
                    self.temp.new_slot(&bytes)
                }
            };
            let rhs_bytes = self.string_value(rhs)?;
            self.temp.append(dst, &rhs_bytes);
            Ok(Eval::TempStringRef(dst))
        } else {
            let a = self.int_value(lhs)?;
            let b = self.int_value(rhs)?;
            Ok(Eval::IntConst(int_op(op, a, b, self.current_line)?))
        }
    }

    /// Coerce a tagged result to an integer. Consumes temp references.
    pub(crate) fn int_value(&mut self, value: Eval) -> Result<i32, VmError> {
        match value {
            Eval::IntConst(v) => Ok(v),
            Eval::StringConstRef(i) => Ok(parse_int(self.named.bytes(self.string_consts[i]))),
            Eval::TempStringRef(slot) => {
                let v = parse_int(self.temp.bytes(slot));
                self.consume_temp(slot);
                Ok(v)
            }
            Eval::LocalStringVarRef(i) => {
                let slot = self.local_string_slot(i)?;
                Ok(parse_int(self.named.bytes(slot)))
            }
            Eval::GlobalStringVarRef(i) => {
                let slot = self.global_string_slot(i)?;
                Ok(parse_int(self.named.bytes(slot)))
            }
            Eval::LocalStringArrayRef { array, index_slot } => {
                let slot = self.local_string_array_slot(array, index_slot)?;
                Ok(parse_int(self.named.bytes(slot)))
            }
            Eval::GlobalStringArrayRef { array, index_slot } => {
                let slot = self.global_string_array_slot(array, index_slot)?;
                Ok(parse_int(self.named.bytes(slot)))
            }
            Eval::LocalByteArrayRef(_) | Eval::GlobalByteArrayRef(_) => {
                Err(VmError::BufferInScalarContext {
                    line: self.current_line,
                })
            }
        }
    }

    /// Materialize a tagged result as owned bytes. Integers format as
    /// signed decimal. Consumes temp references.
    pub(crate) fn string_value(&mut self, value: Eval) -> Result<Vec<u8>, VmError> {
        match value {
            Eval::IntConst(v) => Ok(format_int(v)),
            Eval::StringConstRef(i) => Ok(self.named.bytes(self.string_consts[i]).to_vec()),
            Eval::TempStringRef(slot) => {
                let bytes = self.temp.bytes(slot).to_vec();
                self.consume_temp(slot);
                Ok(bytes)
            }
            Eval::LocalStringVarRef(i) => {
                let slot = self.local_string_slot(i)?;
                Ok(self.named.bytes(slot).to_vec())
            }
            Eval::GlobalStringVarRef(i) => {
                let slot = self.global_string_slot(i)?;
                Ok(self.named.bytes(slot).to_vec())
            }
            Eval::LocalStringArrayRef { array, index_slot } => {
                let slot = self.local_string_array_slot(array, index_slot)?;
                Ok(self.named.bytes(slot).to_vec())
            }
            Eval::GlobalStringArrayRef { array, index_slot } => {
                let slot = self.global_string_array_slot(array, index_slot)?;
                Ok(self.named.bytes(slot).to_vec())
            }
            Eval::LocalByteArrayRef(_) | Eval::GlobalByteArrayRef(_) => {
                Err(VmError::BufferInScalarContext {
                    line: self.current_line,
                })
            }
        }
    }

    /// Evaluate an array-index postfix slot to an integer.
    pub(crate) fn array_index(&mut self, index_slot: usize) -> Result<i32, VmError> {
        let value = self.eval_postfix(index_slot)?;
        self.int_value(value)
    }

    /// Resolve a local string array element to its named slot.
    pub(crate) fn local_string_array_slot(
        &mut self,
        array: usize,
        index_slot: usize,
    ) -> Result<usize, VmError> {
        let index = self.array_index(index_slot)?;
        let line = self.current_line;
        let frame = self.current_frame()?;
        let arr = frame
            .string_arrays
            .get(array)
            .ok_or(VmError::InvalidReference {
                what: "local string array",
                index: array,
            })?;
        let i = check_array_index(index, arr.len(), line)?;
        Ok(arr[i])
    }

    /// Resolve a global string array element to its named slot.
    pub(crate) fn global_string_array_slot(
        &mut self,
        array: usize,
        index_slot: usize,
    ) -> Result<usize, VmError> {
        let index = self.array_index(index_slot)?;
        let line = self.current_line;
        let arr = self
            .global_string_arrays
            .get(array)
            .ok_or(VmError::InvalidReference {
                what: "global string array",
                index: array,
            })?;
        let i = check_array_index(index, arr.len(), line)?;
        Ok(arr[i])
    }

    fn call_intrinsic_fip(&mut self, fip: usize) -> Result<Eval, VmError> {
        let index = self.program.fips[fip].function;
        let desc = crate::intrinsics::lookup(index).ok_or(VmError::UnknownIntrinsic { index })?;
        let argc = self.program.fips[fip].argv.len();
        if argc < desc.min_argc || argc > desc.max_argc {
            return Err(VmError::IntrinsicArgcMismatch {
                name: desc.name,
                got: argc,
            });
        }
        let value = self.execute_intrinsic(desc.intrinsic, fip)?;
        let (ret, eval) = match value {
            super::intrinsics_exec::IntrinsicValue::Void => (0, Eval::IntConst(0)),
            super::intrinsics_exec::IntrinsicValue::Int(v) => (v, Eval::IntConst(v)),
            super::intrinsics_exec::IntrinsicValue::Str(slot) => {
                (slot as i32, Eval::TempStringRef(slot))
            }
        };
        self.fip_rets[fip] = ret;
        Ok(eval)
    }

    fn call_script_fip(&mut self, fip: usize) -> Result<Eval, VmError> {
        let func_idx = self.program.fips[fip].function;
        let return_kind = self
            .program
            .functions
            .get(func_idx)
            .map(|f| f.return_kind)
            .ok_or(VmError::InvalidFunction { index: func_idx })?;
        self.call_function(func_idx, Some(fip))?;
        let ret = self.fip_rets[fip];
        Ok(match return_kind {
            ReturnKind::Int => Eval::IntConst(ret),
            ReturnKind::Byte => Eval::IntConst(ret & 0xff),
            ReturnKind::String => {
                // A function that never reached a valued `return` leaves
                // no live temp behind; substitute an empty string.
                let slot = ret as usize;
                if ret >= 0 && slot < self.temp.allocated() && self.temp.is_active(slot) {
                    Eval::TempStringRef(slot)
                } else {
                    Eval::TempStringRef(self.temp.new_slot(b""))
                }
            }
            ReturnKind::Void => Eval::IntConst(0),
        })
    }
}

pub(crate) fn check_array_index(index: i32, size: usize, line: u32) -> Result<usize, VmError> {
    if index < 0 || index as usize >= size {
        Err(VmError::IndexOutOfBounds { line, index, size })
    } else {
        Ok(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_plain_and_signed() {
        assert_eq!(parse_int(b"42"), 42);
        assert_eq!(parse_int(b"-17"), -17);
        assert_eq!(parse_int(b"+8"), 8);
        assert_eq!(parse_int(b"  12"), 12);
    }

    #[test]
    fn test_parse_int_stops_at_non_digit() {
        assert_eq!(parse_int(b"12ab"), 12);
        assert_eq!(parse_int(b"3.7"), 3);
    }

    #[test]
    fn test_parse_int_non_numeric_is_zero() {
        assert_eq!(parse_int(b""), 0);
        assert_eq!(parse_int(b"hello"), 0);
        assert_eq!(parse_int(b"-"), 0);
    }

    #[test]
    fn test_format_int() {
        assert_eq!(format_int(0), b"0".to_vec());
        assert_eq!(format_int(-123), b"-123".to_vec());
    }

    #[test]
    fn test_int_op_division_truncates_toward_zero() {
        assert_eq!(int_op(Op::Div, 7, 2, 0).unwrap(), 3);
        assert_eq!(int_op(Op::Div, -7, 2, 0).unwrap(), -3);
        assert_eq!(int_op(Op::Mod, -7, 2, 0).unwrap(), -1);
    }

    #[test]
    fn test_int_op_division_by_zero() {
        assert!(matches!(
            int_op(Op::Div, 1, 0, 9),
            Err(VmError::DivisionByZero { line: 9 })
        ));
        assert!(matches!(
            int_op(Op::Mod, 1, 0, 9),
            Err(VmError::DivisionByZero { line: 9 })
        ));
    }

    #[test]
    fn test_shifts_are_unsigned() {
        assert_eq!(int_op(Op::Shl, 1, 4, 0).unwrap(), 16);
        assert_eq!(int_op(Op::Shr, -1, 28, 0).unwrap(), 0xf);
        assert_eq!(int_op(Op::Shl, 1, 32, 0).unwrap(), 0);
        assert_eq!(int_op(Op::Shr, 1, -1, 0).unwrap(), 0);
    }

    #[test]
    fn test_check_array_index() {
        assert_eq!(check_array_index(2, 3, 0).unwrap(), 2);
        assert!(matches!(
            check_array_index(3, 3, 7),
            Err(VmError::IndexOutOfBounds {
                line: 7,
                index: 3,
                size: 3,
            })
        ));
        assert!(matches!(
            check_array_index(-1, 3, 7),
            Err(VmError::IndexOutOfBounds { index: -1, .. })
        ));
    }
}
