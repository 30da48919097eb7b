//! In-memory tables for the NIC intermediate representation.
//!
//! The compiler writes a textual IR file (see `loader`); this module holds
//! the typed tables the interpreter executes:
//! - `Stmt`: one record per statement, flat table, control flow by index
//! - `PostfixSlot`: one expression in reverse-Polish form plus an
//!   optimizer hint
//! - `Fip`: a call-site record (callee index + argument postfix slots)
//! - `FunctionInfo`: entry point, return kind, arguments, local layout
//! - `Program`: the aggregate of every table in one IR file
//!
//! All cross references are integer indices into sibling tables, so the
//! tables form an acyclic, arena-friendly graph.

use serde::{Deserialize, Serialize};

/// Capacity of the expression stack used by the postfix evaluator.
///
/// The loader simulates every postfix slot's stack profile and rejects
/// slots that would exceed this bound, so the evaluator never overflows.
pub const EXPR_STACK_CAPACITY: usize = 32;

/// Comparison operators used by `If` and `While` statements.
///
/// Inside expression postfix, `<` and `>` are shift operators; ordering
/// comparison exists only through this statement-level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Eq),
            1 => Some(Self::Ne),
            2 => Some(Self::Lt),
            3 => Some(Self::Le),
            4 => Some(Self::Gt),
            5 => Some(Self::Ge),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Eq => 0,
            Self::Ne => 1,
            Self::Lt => 2,
            Self::Le => 3,
            Self::Gt => 4,
            Self::Ge => 5,
        }
    }
}

/// Binary operators appearing as postfix elements.
///
/// `Shl`/`Shr` are written `<`/`>` in the IR and have unsigned-shift
/// semantics; `Concat` (`:`) is the only operator producing a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Concat,
}

impl Op {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Add),
            '-' => Some(Self::Sub),
            '*' => Some(Self::Mul),
            '/' => Some(Self::Div),
            '%' => Some(Self::Mod),
            '<' => Some(Self::Shl),
            '>' => Some(Self::Shr),
            '&' => Some(Self::And),
            '|' => Some(Self::Or),
            '^' => Some(Self::Xor),
            ':' => Some(Self::Concat),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
            Self::Mod => '%',
            Self::Shl => '<',
            Self::Shr => '>',
            Self::And => '&',
            Self::Or => '|',
            Self::Xor => '^',
            Self::Concat => ':',
        }
    }
}

/// An int or byte scalar, local or global: the targets an `Increment`
/// statement or a `For` loop variable can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarTarget {
    LocalInt(usize),
    GlobalInt(usize),
    LocalByte(usize),
    GlobalByte(usize),
}

impl ScalarTarget {
    pub fn from_code(code: i64, index: usize) -> Option<Self> {
        match code {
            0 => Some(Self::LocalInt(index)),
            1 => Some(Self::GlobalInt(index)),
            2 => Some(Self::LocalByte(index)),
            3 => Some(Self::GlobalByte(index)),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::LocalInt(_) => 0,
            Self::GlobalInt(_) => 1,
            Self::LocalByte(_) => 2,
            Self::GlobalByte(_) => 3,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::LocalInt(i)
            | Self::GlobalInt(i)
            | Self::LocalByte(i)
            | Self::GlobalByte(i) => i,
        }
    }
}

/// Destination of an expression-statement assignment.
///
/// Array-element targets evaluate `index_slot` at assignment time; the
/// resulting index is bounds-checked against the declared array size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignTarget {
    LocalInt(usize),
    GlobalInt(usize),
    LocalByte(usize),
    GlobalByte(usize),
    LocalString(usize),
    GlobalString(usize),
    LocalIntArray { array: usize, index_slot: usize },
    GlobalIntArray { array: usize, index_slot: usize },
    LocalByteArray { array: usize, index_slot: usize },
    GlobalByteArray { array: usize, index_slot: usize },
    LocalStringArray { array: usize, index_slot: usize },
    GlobalStringArray { array: usize, index_slot: usize },
}

impl AssignTarget {
    pub fn from_codes(kind: i64, index: usize, index_slot: i64) -> Option<Self> {
        let slot = index_slot as usize;
        match kind {
            0 => Some(Self::LocalInt(index)),
            1 => Some(Self::GlobalInt(index)),
            2 => Some(Self::LocalByte(index)),
            3 => Some(Self::GlobalByte(index)),
            4 => Some(Self::LocalString(index)),
            5 => Some(Self::GlobalString(index)),
            6 => Some(Self::LocalIntArray { array: index, index_slot: slot }),
            7 => Some(Self::GlobalIntArray { array: index, index_slot: slot }),
            8 => Some(Self::LocalByteArray { array: index, index_slot: slot }),
            9 => Some(Self::GlobalByteArray { array: index, index_slot: slot }),
            10 => Some(Self::LocalStringArray { array: index, index_slot: slot }),
            11 => Some(Self::GlobalStringArray { array: index, index_slot: slot }),
            _ => None,
        }
    }

    /// `(kind-code, index, index-slot)` with `index-slot = -1` for scalars.
    pub fn codes(self) -> (i64, usize, i64) {
        match self {
            Self::LocalInt(i) => (0, i, -1),
            Self::GlobalInt(i) => (1, i, -1),
            Self::LocalByte(i) => (2, i, -1),
            Self::GlobalByte(i) => (3, i, -1),
            Self::LocalString(i) => (4, i, -1),
            Self::GlobalString(i) => (5, i, -1),
            Self::LocalIntArray { array, index_slot } => (6, array, index_slot as i64),
            Self::GlobalIntArray { array, index_slot } => (7, array, index_slot as i64),
            Self::LocalByteArray { array, index_slot } => (8, array, index_slot as i64),
            Self::GlobalByteArray { array, index_slot } => (9, array, index_slot as i64),
            Self::LocalStringArray { array, index_slot } => (10, array, index_slot as i64),
            Self::GlobalStringArray { array, index_slot } => (11, array, index_slot as i64),
        }
    }

    /// The index postfix slot for array-element targets.
    pub fn index_slot(self) -> Option<usize> {
        match self {
            Self::LocalIntArray { index_slot, .. }
            | Self::GlobalIntArray { index_slot, .. }
            | Self::LocalByteArray { index_slot, .. }
            | Self::GlobalByteArray { index_slot, .. }
            | Self::LocalStringArray { index_slot, .. }
            | Self::GlobalStringArray { index_slot, .. } => Some(index_slot),
            _ => None,
        }
    }
}

/// Statement variants. The numeric type codes in the IR file are stable
/// and shared with the compiler:
/// `If=0 EndIf=1 While=2 EndWhile=3 For=4 EndFor=5 Loop=6 EndLoop=7
/// Repeat=8 EndRepeat=9 Break=10 Continue=11 Increment=12
/// InternFunction=13 Return=14`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    If {
        lhs: usize,
        rhs: usize,
        op: CmpOp,
        false_target: usize,
    },
    EndIf,
    While {
        lhs: usize,
        rhs: usize,
        op: CmpOp,
        endwhile: usize,
    },
    EndWhile {
        head: usize,
    },
    For {
        var: ScalarTarget,
        start: usize,
        stop: usize,
        step: Option<usize>,
        endfor: usize,
    },
    EndFor {
        head: usize,
    },
    Loop,
    EndLoop {
        head: usize,
    },
    Repeat {
        count: usize,
        endrepeat: usize,
    },
    EndRepeat {
        head: usize,
    },
    Break,
    Continue,
    Increment {
        target: ScalarTarget,
        step: i32,
    },
    /// An expression statement: evaluate `slot`, optionally assign.
    Expr {
        slot: usize,
        assign: Option<AssignTarget>,
    },
    Return {
        slot: Option<usize>,
    },
}

impl StmtKind {
    pub fn type_code(&self) -> i64 {
        match self {
            Self::If { .. } => 0,
            Self::EndIf => 1,
            Self::While { .. } => 2,
            Self::EndWhile { .. } => 3,
            Self::For { .. } => 4,
            Self::EndFor { .. } => 5,
            Self::Loop => 6,
            Self::EndLoop { .. } => 7,
            Self::Repeat { .. } => 8,
            Self::EndRepeat { .. } => 9,
            Self::Break => 10,
            Self::Continue => 11,
            Self::Increment { .. } => 12,
            Self::Expr { .. } => 13,
            Self::Return { .. } => 14,
        }
    }
}

/// One statement record. `next` is the default successor index; branch
/// statements carry their other targets in the variant payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// Source line in the original script, for diagnostics.
    pub line: u32,
    pub next: usize,
    pub kind: StmtKind,
}

/// Optimizer hints attached to postfix slots. `*NoOp` forms name a
/// single-element slot; the `*Op*` forms name a two-operand integer
/// expression. The loader validates the element shape against the hint
/// and demotes mismatches to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hint {
    None,
    ConstNoOp,
    LocalIntNoOp,
    GlobalIntNoOp,
    LocalByteNoOp,
    GlobalByteNoOp,
    InternFuncNoOp,
    ExternFuncNoOp,
    LocalIntOpLocalInt,
    LocalIntOpConstInt,
    GlobalIntOpGlobalInt,
    GlobalIntOpConstInt,
}

impl Hint {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::ConstNoOp),
            2 => Some(Self::LocalIntNoOp),
            3 => Some(Self::GlobalIntNoOp),
            4 => Some(Self::LocalByteNoOp),
            5 => Some(Self::GlobalByteNoOp),
            6 => Some(Self::InternFuncNoOp),
            7 => Some(Self::ExternFuncNoOp),
            8 => Some(Self::LocalIntOpLocalInt),
            9 => Some(Self::LocalIntOpConstInt),
            10 => Some(Self::GlobalIntOpGlobalInt),
            11 => Some(Self::GlobalIntOpConstInt),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::ConstNoOp => 1,
            Self::LocalIntNoOp => 2,
            Self::GlobalIntNoOp => 3,
            Self::LocalByteNoOp => 4,
            Self::GlobalByteNoOp => 5,
            Self::InternFuncNoOp => 6,
            Self::ExternFuncNoOp => 7,
            Self::LocalIntOpLocalInt => 8,
            Self::LocalIntOpConstInt => 9,
            Self::GlobalIntOpGlobalInt => 10,
            Self::GlobalIntOpConstInt => 11,
        }
    }
}

/// One element of a postfix expression.
///
/// Array elements carry the postfix slot that computes their index;
/// `InternCall`/`ExternCall` reference a shared `Fip` record by index.
/// `LocalByteArrayRef`/`GlobalByteArrayRef` denote a whole byte array
/// passed as a buffer argument to an intrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Element {
    IntConst(i32),
    StringConst(usize),
    LocalIntVar(usize),
    GlobalIntVar(usize),
    LocalByteVar(usize),
    GlobalByteVar(usize),
    LocalStringVar(usize),
    GlobalStringVar(usize),
    LocalIntArray { array: usize, index_slot: usize },
    GlobalIntArray { array: usize, index_slot: usize },
    LocalByteArray { array: usize, index_slot: usize },
    GlobalByteArray { array: usize, index_slot: usize },
    LocalStringArray { array: usize, index_slot: usize },
    GlobalStringArray { array: usize, index_slot: usize },
    LocalByteArrayRef(usize),
    GlobalByteArrayRef(usize),
    InternCall(usize),
    ExternCall(usize),
    Operator(Op),
}

impl Element {
    /// True for elements that push one operand (everything but operators).
    pub fn is_operand(&self) -> bool {
        !matches!(self, Self::Operator(_))
    }
}

/// One expression in reverse-Polish form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostfixSlot {
    pub hint: Hint,
    pub elements: Vec<Element>,
}

/// A call-site record ("function invocation parameters"): the callee
/// index and one postfix slot per argument.
///
/// For `InternCall` elements the callee index names an intrinsic; for
/// `ExternCall` elements it names a script function. The record itself
/// is immutable after load; the per-call return cell lives in a runtime
/// side table inside the VM, one cell per FIP record. Because that cell
/// is shared by every activation of the call site, the interpreter is
/// not re-entrant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fip {
    pub function: usize,
    pub argv: Vec<usize>,
}

/// Return kind of a script function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
    Void,
    Int,
    Byte,
    String,
}

impl ReturnKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Void),
            1 => Some(Self::Int),
            2 => Some(Self::Byte),
            3 => Some(Self::String),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Void => 0,
            Self::Int => 1,
            Self::Byte => 2,
            Self::String => 3,
        }
    }
}

/// Declared kind of a script-function argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgKind {
    Int,
    Byte,
    String,
}

impl ArgKind {
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'i' => Some(Self::Int),
            'b' => Some(Self::Byte),
            's' => Some(Self::String),
            _ => None,
        }
    }

    pub fn tag(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Byte => 'b',
            Self::String => 's',
        }
    }
}

/// One declared argument: its kind and the local variable it binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub kind: ArgKind,
    pub local: usize,
}

/// Function record: entry statement, return kind, arguments, and the
/// local frame layout (scalar counts per kind, array sizes per kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub entry: usize,
    pub return_kind: ReturnKind,
    pub args: Vec<ArgSpec>,
    pub local_ints: usize,
    pub local_bytes: usize,
    pub local_strings: usize,
    pub int_array_sizes: Vec<usize>,
    pub byte_array_sizes: Vec<usize>,
    pub string_array_sizes: Vec<usize>,
}

impl FunctionInfo {
    /// Named string slots this function acquires on entry: one per local
    /// string scalar plus one per string array element.
    pub fn named_slot_demand(&self) -> usize {
        self.local_strings + self.string_array_sizes.iter().sum::<usize>()
    }
}

/// Everything one IR file loads into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub postfix: Vec<PostfixSlot>,
    pub fips: Vec<Fip>,
    pub string_consts: Vec<String>,
    pub global_ints: Vec<i32>,
    pub global_bytes: Vec<u8>,
    pub global_strings: Vec<String>,
    pub global_int_array_sizes: Vec<usize>,
    pub global_byte_array_sizes: Vec<usize>,
    pub global_string_array_sizes: Vec<usize>,
    pub functions: Vec<FunctionInfo>,
    pub main_function: usize,
}
