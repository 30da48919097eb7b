//! Textual IR reader and writer.
//!
//! The compiler emits one IR file per script: a line-oriented, strictly
//! ordered sequence of sections (statements, postfix slots, FIP records,
//! string constants, global scalars, global arrays, functions, main
//! index). `load_program` parses the text into [`Program`] tables and
//! validates the structure; `write_program` is the exact inverse, so a
//! loaded program serializes back to an equivalent file.
//!
//! Validation performed at load time, before anything executes:
//! - every statement successor and branch target is an in-bounds
//!   statement index
//! - every postfix-slot, FIP, string-constant and global-variable
//!   reference is in bounds
//! - every postfix slot is balanced (exactly one result) and its peak
//!   stack depth fits the evaluator's fixed capacity
//! - every optimizer hint matches the shape of its slot; mismatched
//!   hints are demoted to the general path rather than trusted

use std::fmt;

use crate::ir::core::{
    ArgKind, ArgSpec, AssignTarget, CmpOp, Element, Fip, FunctionInfo, Hint, Op, PostfixSlot,
    Program, ReturnKind, ScalarTarget, Stmt, StmtKind, EXPR_STACK_CAPACITY,
};

/// Errors produced while loading an IR file. Nothing is persisted when a
/// load fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    UnexpectedEof {
        line: usize,
    },
    ExpectedInt {
        line: usize,
        token: String,
    },
    NegativeCount {
        line: usize,
        value: i64,
    },
    ByteOutOfRange {
        line: usize,
        value: i64,
    },
    UnknownStatementType {
        line: usize,
        code: i64,
    },
    UnknownComparison {
        line: usize,
        code: i64,
    },
    UnknownHint {
        line: usize,
        code: i64,
    },
    UnknownReturnKind {
        line: usize,
        code: i64,
    },
    UnknownArgKind {
        line: usize,
        token: String,
    },
    UnknownTarget {
        line: usize,
        code: i64,
    },
    BadElementToken {
        line: usize,
        token: String,
    },
    TrailingTokens {
        line: usize,
        token: String,
    },
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        limit: usize,
    },
    ExprTooDeep {
        slot: usize,
        depth: usize,
    },
    UnbalancedExpr {
        slot: usize,
    },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::UnexpectedEof { line } => {
                write!(f, "line {}: unexpected end of IR file", line)
            }
            LoadError::ExpectedInt { line, token } => {
                write!(f, "line {}: expected integer, got '{}'", line, token)
            }
            LoadError::NegativeCount { line, value } => {
                write!(f, "line {}: negative count {}", line, value)
            }
            LoadError::ByteOutOfRange { line, value } => {
                write!(f, "line {}: byte value {} out of range", line, value)
            }
            LoadError::UnknownStatementType { line, code } => {
                write!(f, "line {}: unknown statement type {}", line, code)
            }
            LoadError::UnknownComparison { line, code } => {
                write!(f, "line {}: unknown comparison operator {}", line, code)
            }
            LoadError::UnknownHint { line, code } => {
                write!(f, "line {}: unknown hint code {}", line, code)
            }
            LoadError::UnknownReturnKind { line, code } => {
                write!(f, "line {}: unknown return kind {}", line, code)
            }
            LoadError::UnknownArgKind { line, token } => {
                write!(f, "line {}: unknown argument kind '{}'", line, token)
            }
            LoadError::UnknownTarget { line, code } => {
                write!(f, "line {}: unknown assignment target kind {}", line, code)
            }
            LoadError::BadElementToken { line, token } => {
                write!(f, "line {}: bad postfix element token '{}'", line, token)
            }
            LoadError::TrailingTokens { line, token } => {
                write!(f, "line {}: trailing token '{}'", line, token)
            }
            LoadError::IndexOutOfRange { what, index, limit } => {
                write!(f, "{} index {} out of range (limit {})", what, index, limit)
            }
            LoadError::ExprTooDeep { slot, depth } => {
                write!(
                    f,
                    "postfix slot {}: stack depth {} exceeds capacity {}",
                    slot, depth, EXPR_STACK_CAPACITY
                )
            }
            LoadError::UnbalancedExpr { slot } => {
                write!(f, "postfix slot {}: unbalanced expression", slot)
            }
        }
    }
}

impl std::error::Error for LoadError {}

struct Reader<'a> {
    lines: std::str::Lines<'a>,
    line_no: usize,
}

impl<'a> Reader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            line_no: 0,
        }
    }

    /// Next line, verbatim apart from a trailing CR. Used for string
    /// constant sections where leading whitespace is significant.
    fn raw_line(&mut self) -> Result<&'a str, LoadError> {
        self.line_no += 1;
        self.lines
            .next()
            .ok_or(LoadError::UnexpectedEof { line: self.line_no })
    }

    fn tokens(&mut self) -> Result<TokenLine<'a>, LoadError> {
        let line = self.raw_line()?;
        Ok(TokenLine {
            line_no: self.line_no,
            iter: line.split_whitespace(),
        })
    }

    /// A line holding a single non-negative count.
    fn count(&mut self) -> Result<usize, LoadError> {
        let mut t = self.tokens()?;
        let n = t.count_value()?;
        t.finish()?;
        Ok(n)
    }
}

struct TokenLine<'a> {
    line_no: usize,
    iter: std::str::SplitWhitespace<'a>,
}

impl<'a> TokenLine<'a> {
    fn token(&mut self) -> Result<&'a str, LoadError> {
        self.iter
            .next()
            .ok_or(LoadError::UnexpectedEof { line: self.line_no })
    }

    fn int(&mut self) -> Result<i64, LoadError> {
        let token = self.token()?;
        token.parse::<i64>().map_err(|_| LoadError::ExpectedInt {
            line: self.line_no,
            token: token.to_string(),
        })
    }

    fn count_value(&mut self) -> Result<usize, LoadError> {
        let v = self.int()?;
        if v < 0 {
            return Err(LoadError::NegativeCount {
                line: self.line_no,
                value: v,
            });
        }
        Ok(v as usize)
    }

    fn index(&mut self) -> Result<usize, LoadError> {
        self.count_value()
    }

    /// `-1` means absent.
    fn opt_index(&mut self) -> Result<Option<usize>, LoadError> {
        let v = self.int()?;
        if v < 0 {
            Ok(None)
        } else {
            Ok(Some(v as usize))
        }
    }

    fn byte(&mut self) -> Result<u8, LoadError> {
        let v = self.int()?;
        if !(0..=255).contains(&v) {
            return Err(LoadError::ByteOutOfRange {
                line: self.line_no,
                value: v,
            });
        }
        Ok(v as u8)
    }

    fn finish(mut self) -> Result<(), LoadError> {
        match self.iter.next() {
            Some(tok) => Err(LoadError::TrailingTokens {
                line: self.line_no,
                token: tok.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Parse one IR file. Returns the fully validated program tables.
pub fn load_program(source: &str) -> Result<Program, LoadError> {
    let mut r = Reader::new(source);

    let n_statements = r.count()?;
    let mut statements = Vec::with_capacity(n_statements);
    for _ in 0..n_statements {
        statements.push(read_statement(&mut r)?);
    }

    let n_postfix = r.count()?;
    let mut postfix = Vec::with_capacity(n_postfix);
    for _ in 0..n_postfix {
        postfix.push(read_postfix_slot(&mut r)?);
    }

    let n_fips = r.count()?;
    let mut fips = Vec::with_capacity(n_fips);
    for _ in 0..n_fips {
        let mut t = r.tokens()?;
        let function = t.index()?;
        let argc = t.count_value()?;
        let mut argv = Vec::with_capacity(argc);
        for _ in 0..argc {
            argv.push(t.index()?);
        }
        t.finish()?;
        fips.push(Fip { function, argv });
    }

    let n_consts = r.count()?;
    let mut string_consts = Vec::with_capacity(n_consts);
    for _ in 0..n_consts {
        string_consts.push(r.raw_line()?.to_string());
    }

    let n_global_ints = r.count()?;
    let mut global_ints = Vec::with_capacity(n_global_ints);
    for _ in 0..n_global_ints {
        let mut t = r.tokens()?;
        global_ints.push(t.int()? as i32);
        t.finish()?;
    }

    let n_global_bytes = r.count()?;
    let mut global_bytes = Vec::with_capacity(n_global_bytes);
    for _ in 0..n_global_bytes {
        let mut t = r.tokens()?;
        global_bytes.push(t.byte()?);
        t.finish()?;
    }

    let n_global_strings = r.count()?;
    let mut global_strings = Vec::with_capacity(n_global_strings);
    for _ in 0..n_global_strings {
        global_strings.push(r.raw_line()?.to_string());
    }

    let global_int_array_sizes = read_size_list(&mut r)?;
    let global_byte_array_sizes = read_size_list(&mut r)?;
    let global_string_array_sizes = read_size_list(&mut r)?;

    let n_functions = r.count()?;
    let mut functions = Vec::with_capacity(n_functions);
    for _ in 0..n_functions {
        functions.push(read_function(&mut r)?);
    }

    let main_function = r.count()?;

    let mut program = Program {
        statements,
        postfix,
        fips,
        string_consts,
        global_ints,
        global_bytes,
        global_strings,
        global_int_array_sizes,
        global_byte_array_sizes,
        global_string_array_sizes,
        functions,
        main_function,
    };

    validate(&mut program)?;
    Ok(program)
}

fn read_size_list(r: &mut Reader<'_>) -> Result<Vec<usize>, LoadError> {
    let mut t = r.tokens()?;
    let n = t.count_value()?;
    let mut sizes = Vec::with_capacity(n);
    for _ in 0..n {
        sizes.push(t.index()?);
    }
    t.finish()?;
    Ok(sizes)
}

fn read_statement(r: &mut Reader<'_>) -> Result<Stmt, LoadError> {
    let mut t = r.tokens()?;
    let line = t.int()? as u32;
    let type_code = t.int()?;
    let next = t.index()?;
    let line_no = t.line_no;

    let kind = match type_code {
        0 => {
            let lhs = t.index()?;
            let rhs = t.index()?;
            let code = t.int()?;
            let op = CmpOp::from_code(code)
                .ok_or(LoadError::UnknownComparison { line: line_no, code })?;
            let false_target = t.index()?;
            StmtKind::If {
                lhs,
                rhs,
                op,
                false_target,
            }
        }
        1 => StmtKind::EndIf,
        2 => {
            let lhs = t.index()?;
            let rhs = t.index()?;
            let code = t.int()?;
            let op = CmpOp::from_code(code)
                .ok_or(LoadError::UnknownComparison { line: line_no, code })?;
            let endwhile = t.index()?;
            StmtKind::While {
                lhs,
                rhs,
                op,
                endwhile,
            }
        }
        3 => StmtKind::EndWhile { head: t.index()? },
        4 => {
            let scope = t.int()?;
            let var_idx = t.index()?;
            let var = match scope {
                0 => ScalarTarget::LocalInt(var_idx),
                1 => ScalarTarget::GlobalInt(var_idx),
                _ => {
                    return Err(LoadError::UnknownTarget {
                        line: line_no,
                        code: scope,
                    })
                }
            };
            let start = t.index()?;
            let stop = t.index()?;
            let step = t.opt_index()?;
            let endfor = t.index()?;
            StmtKind::For {
                var,
                start,
                stop,
                step,
                endfor,
            }
        }
        5 => StmtKind::EndFor { head: t.index()? },
        6 => StmtKind::Loop,
        7 => StmtKind::EndLoop { head: t.index()? },
        8 => {
            let count = t.index()?;
            let endrepeat = t.index()?;
            StmtKind::Repeat { count, endrepeat }
        }
        9 => StmtKind::EndRepeat { head: t.index()? },
        10 => StmtKind::Break,
        11 => StmtKind::Continue,
        12 => {
            let code = t.int()?;
            let var_idx = t.index()?;
            let target = ScalarTarget::from_code(code, var_idx).ok_or(LoadError::UnknownTarget {
                line: line_no,
                code,
            })?;
            let step = t.int()? as i32;
            StmtKind::Increment { target, step }
        }
        13 => {
            let slot = t.index()?;
            let kind = t.int()?;
            let assign = if kind < 0 {
                // Two filler fields keep the record width fixed.
                t.int()?;
                t.int()?;
                None
            } else {
                let index = t.index()?;
                let index_slot = t.int()?;
                Some(
                    AssignTarget::from_codes(kind, index, index_slot).ok_or(
                        LoadError::UnknownTarget {
                            line: line_no,
                            code: kind,
                        },
                    )?,
                )
            };
            StmtKind::Expr { slot, assign }
        }
        14 => StmtKind::Return {
            slot: t.opt_index()?,
        },
        code => {
            return Err(LoadError::UnknownStatementType {
                line: line_no,
                code,
            })
        }
    };

    t.finish()?;
    Ok(Stmt { line, next, kind })
}

fn read_postfix_slot(r: &mut Reader<'_>) -> Result<PostfixSlot, LoadError> {
    let mut t = r.tokens()?;
    let depth = t.count_value()?;
    let code = t.int()?;
    let hint = Hint::from_code(code).ok_or(LoadError::UnknownHint {
        line: t.line_no,
        code,
    })?;
    let mut elements = Vec::with_capacity(depth);
    for _ in 0..depth {
        let token = t.token()?;
        elements.push(parse_element(t.line_no, token)?);
    }
    t.finish()?;
    Ok(PostfixSlot { hint, elements })
}

fn parse_element(line: usize, token: &str) -> Result<Element, LoadError> {
    let bad = || LoadError::BadElementToken {
        line,
        token: token.to_string(),
    };
    let mut chars = token.chars();
    let tag = chars.next().ok_or_else(bad)?;
    let rest = chars.as_str();

    let parse_usize = |s: &str| s.parse::<usize>().map_err(|_| bad());

    match tag {
        'o' => {
            let mut ops = rest.chars();
            let c = ops.next().ok_or_else(|| bad())?;
            if ops.next().is_some() {
                return Err(bad());
            }
            Op::from_char(c).map(Element::Operator).ok_or_else(|| bad())
        }
        'c' => rest.parse::<i32>().map(Element::IntConst).map_err(|_| bad()),
        'C' => parse_usize(rest).map(Element::StringConst),
        'v' => parse_usize(rest).map(Element::LocalIntVar),
        'V' => parse_usize(rest).map(Element::GlobalIntVar),
        'b' => parse_usize(rest).map(Element::LocalByteVar),
        'B' => parse_usize(rest).map(Element::GlobalByteVar),
        's' => parse_usize(rest).map(Element::LocalStringVar),
        'S' => parse_usize(rest).map(Element::GlobalStringVar),
        'p' => parse_usize(rest).map(Element::LocalByteArrayRef),
        'P' => parse_usize(rest).map(Element::GlobalByteArrayRef),
        'f' => parse_usize(rest).map(Element::InternCall),
        'F' => parse_usize(rest).map(Element::ExternCall),
        'a' => {
            // a<t><array>[<index-slot>]
            let mut inner = rest.chars();
            let t = inner.next().ok_or_else(|| bad())?;
            let body = inner.as_str();
            let open = body.find('[').ok_or_else(|| bad())?;
            if !body.ends_with(']') {
                return Err(bad());
            }
            let array = parse_usize(&body[..open])?;
            let index_slot = parse_usize(&body[open + 1..body.len() - 1])?;
            match t {
                'v' => Ok(Element::LocalIntArray { array, index_slot }),
                'V' => Ok(Element::GlobalIntArray { array, index_slot }),
                'b' => Ok(Element::LocalByteArray { array, index_slot }),
                'B' => Ok(Element::GlobalByteArray { array, index_slot }),
                's' => Ok(Element::LocalStringArray { array, index_slot }),
                'S' => Ok(Element::GlobalStringArray { array, index_slot }),
                _ => Err(bad()),
            }
        }
        _ => Err(bad()),
    }
}

fn read_function(r: &mut Reader<'_>) -> Result<FunctionInfo, LoadError> {
    let mut t = r.tokens()?;
    let entry = t.index()?;
    let code = t.int()?;
    let return_kind = ReturnKind::from_code(code).ok_or(LoadError::UnknownReturnKind {
        line: t.line_no,
        code,
    })?;
    let argc = t.count_value()?;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        let token = t.token()?;
        let mut chars = token.chars();
        let tag = chars.next().ok_or(LoadError::UnknownArgKind {
            line: t.line_no,
            token: token.to_string(),
        })?;
        let kind = ArgKind::from_tag(tag).ok_or(LoadError::UnknownArgKind {
            line: t.line_no,
            token: token.to_string(),
        })?;
        let local = chars
            .as_str()
            .parse::<usize>()
            .map_err(|_| LoadError::UnknownArgKind {
                line: t.line_no,
                token: token.to_string(),
            })?;
        args.push(ArgSpec { kind, local });
    }
    t.finish()?;

    let mut t = r.tokens()?;
    let local_ints = t.count_value()?;
    let local_bytes = t.count_value()?;
    let local_strings = t.count_value()?;
    t.finish()?;

    let int_array_sizes = read_size_list(r)?;
    let byte_array_sizes = read_size_list(r)?;
    let string_array_sizes = read_size_list(r)?;

    Ok(FunctionInfo {
        entry,
        return_kind,
        args,
        local_ints,
        local_bytes,
        local_strings,
        int_array_sizes,
        byte_array_sizes,
        string_array_sizes,
    })
}

fn check_index(what: &'static str, index: usize, limit: usize) -> Result<(), LoadError> {
    if index < limit {
        Ok(())
    } else {
        Err(LoadError::IndexOutOfRange { what, index, limit })
    }
}

/// Structural validation over the parsed tables, plus hint demotion.
fn validate(program: &mut Program) -> Result<(), LoadError> {
    let n_stmt = program.statements.len();
    let n_post = program.postfix.len();
    let n_fips = program.fips.len();

    for stmt in &program.statements {
        check_index("statement successor", stmt.next, n_stmt)?;
        match &stmt.kind {
            StmtKind::If {
                lhs,
                rhs,
                false_target,
                ..
            } => {
                check_index("postfix slot", *lhs, n_post)?;
                check_index("postfix slot", *rhs, n_post)?;
                check_index("branch target", *false_target, n_stmt)?;
            }
            StmtKind::While {
                lhs, rhs, endwhile, ..
            } => {
                check_index("postfix slot", *lhs, n_post)?;
                check_index("postfix slot", *rhs, n_post)?;
                check_index("branch target", *endwhile, n_stmt)?;
            }
            StmtKind::EndWhile { head }
            | StmtKind::EndFor { head }
            | StmtKind::EndLoop { head }
            | StmtKind::EndRepeat { head } => {
                check_index("branch target", *head, n_stmt)?;
            }
            StmtKind::For {
                start,
                stop,
                step,
                endfor,
                ..
            } => {
                check_index("postfix slot", *start, n_post)?;
                check_index("postfix slot", *stop, n_post)?;
                if let Some(step) = step {
                    check_index("postfix slot", *step, n_post)?;
                }
                check_index("branch target", *endfor, n_stmt)?;
            }
            StmtKind::Repeat { count, endrepeat } => {
                check_index("postfix slot", *count, n_post)?;
                check_index("branch target", *endrepeat, n_stmt)?;
            }
            StmtKind::Expr { slot, assign } => {
                check_index("postfix slot", *slot, n_post)?;
                if let Some(target) = assign {
                    if let Some(index_slot) = target.index_slot() {
                        check_index("postfix slot", index_slot, n_post)?;
                    }
                }
            }
            StmtKind::Return { slot: Some(slot) } => {
                check_index("postfix slot", *slot, n_post)?;
            }
            _ => {}
        }
    }

    for fip in &program.fips {
        for &slot in &fip.argv {
            check_index("postfix slot", slot, n_post)?;
        }
    }

    for (slot_idx, slot) in program.postfix.iter().enumerate() {
        let mut depth: usize = 0;
        let mut peak: usize = 0;
        for element in &slot.elements {
            match element {
                Element::StringConst(i) => {
                    check_index("string constant", *i, program.string_consts.len())?;
                }
                Element::GlobalIntVar(i) => {
                    check_index("global int variable", *i, program.global_ints.len())?;
                }
                Element::GlobalByteVar(i) => {
                    check_index("global byte variable", *i, program.global_bytes.len())?;
                }
                Element::GlobalStringVar(i) => {
                    check_index("global string variable", *i, program.global_strings.len())?;
                }
                Element::GlobalIntArray { array, index_slot } => {
                    check_index("global int array", *array, program.global_int_array_sizes.len())?;
                    check_index("postfix slot", *index_slot, n_post)?;
                }
                Element::GlobalByteArray { array, index_slot } => {
                    check_index(
                        "global byte array",
                        *array,
                        program.global_byte_array_sizes.len(),
                    )?;
                    check_index("postfix slot", *index_slot, n_post)?;
                }
                Element::GlobalStringArray { array, index_slot } => {
                    check_index(
                        "global string array",
                        *array,
                        program.global_string_array_sizes.len(),
                    )?;
                    check_index("postfix slot", *index_slot, n_post)?;
                }
                Element::LocalIntArray { index_slot, .. }
                | Element::LocalByteArray { index_slot, .. }
                | Element::LocalStringArray { index_slot, .. } => {
                    check_index("postfix slot", *index_slot, n_post)?;
                }
                Element::GlobalByteArrayRef(i) => {
                    check_index("global byte array", *i, program.global_byte_array_sizes.len())?;
                }
                Element::InternCall(fip) | Element::ExternCall(fip) => {
                    check_index("FIP record", *fip, n_fips)?;
                }
                _ => {}
            }

            if element.is_operand() {
                depth += 1;
                peak = peak.max(depth);
            } else {
                if depth < 2 {
                    return Err(LoadError::UnbalancedExpr { slot: slot_idx });
                }
                depth -= 1;
            }
        }
        if depth != 1 {
            return Err(LoadError::UnbalancedExpr { slot: slot_idx });
        }
        if peak > EXPR_STACK_CAPACITY {
            return Err(LoadError::ExprTooDeep {
                slot: slot_idx,
                depth: peak,
            });
        }
    }

    for function in &program.functions {
        check_index("function entry", function.entry, n_stmt)?;
        for arg in &function.args {
            let limit = match arg.kind {
                ArgKind::Int => function.local_ints,
                ArgKind::Byte => function.local_bytes,
                ArgKind::String => function.local_strings,
            };
            check_index("argument local", arg.local, limit)?;
        }
    }

    check_index("main function", program.main_function, program.functions.len())?;

    // Hints come from the compiler but are not trusted: a slot whose
    // shape does not match its hint falls back to the general evaluator.
    for slot in &mut program.postfix {
        if !hint_matches(slot) {
            slot.hint = Hint::None;
        }
    }

    Ok(())
}

fn hint_matches(slot: &PostfixSlot) -> bool {
    let e = &slot.elements;
    let int_op = |element: &Element| {
        matches!(element, Element::Operator(op) if *op != Op::Concat)
    };
    match slot.hint {
        Hint::None => true,
        Hint::ConstNoOp => {
            e.len() == 1 && matches!(e[0], Element::IntConst(_) | Element::StringConst(_))
        }
        Hint::LocalIntNoOp => e.len() == 1 && matches!(e[0], Element::LocalIntVar(_)),
        Hint::GlobalIntNoOp => e.len() == 1 && matches!(e[0], Element::GlobalIntVar(_)),
        Hint::LocalByteNoOp => e.len() == 1 && matches!(e[0], Element::LocalByteVar(_)),
        Hint::GlobalByteNoOp => e.len() == 1 && matches!(e[0], Element::GlobalByteVar(_)),
        Hint::InternFuncNoOp => e.len() == 1 && matches!(e[0], Element::InternCall(_)),
        Hint::ExternFuncNoOp => e.len() == 1 && matches!(e[0], Element::ExternCall(_)),
        Hint::LocalIntOpLocalInt => {
            e.len() == 3
                && matches!(e[0], Element::LocalIntVar(_))
                && matches!(e[1], Element::LocalIntVar(_))
                && int_op(&e[2])
        }
        Hint::LocalIntOpConstInt => {
            e.len() == 3
                && matches!(e[0], Element::LocalIntVar(_))
                && matches!(e[1], Element::IntConst(_))
                && int_op(&e[2])
        }
        Hint::GlobalIntOpGlobalInt => {
            e.len() == 3
                && matches!(e[0], Element::GlobalIntVar(_))
                && matches!(e[1], Element::GlobalIntVar(_))
                && int_op(&e[2])
        }
        Hint::GlobalIntOpConstInt => {
            e.len() == 3
                && matches!(e[0], Element::GlobalIntVar(_))
                && matches!(e[1], Element::IntConst(_))
                && int_op(&e[2])
        }
    }
}

/// Serialize program tables back to the textual IR form.
///
/// `load_program(&write_program(p))` reproduces `p` exactly for any
/// program that came out of `load_program`.
pub fn write_program(program: &Program) -> String {
    let mut out = String::new();
    use std::fmt::Write;

    let _ = writeln!(out, "{}", program.statements.len());
    for stmt in &program.statements {
        let _ = write!(out, "{} {} {}", stmt.line, stmt.kind.type_code(), stmt.next);
        match &stmt.kind {
            StmtKind::If {
                lhs,
                rhs,
                op,
                false_target,
            } => {
                let _ = write!(out, " {} {} {} {}", lhs, rhs, op.code(), false_target);
            }
            StmtKind::While {
                lhs,
                rhs,
                op,
                endwhile,
            } => {
                let _ = write!(out, " {} {} {} {}", lhs, rhs, op.code(), endwhile);
            }
            StmtKind::EndWhile { head }
            | StmtKind::EndFor { head }
            | StmtKind::EndLoop { head }
            | StmtKind::EndRepeat { head } => {
                let _ = write!(out, " {}", head);
            }
            StmtKind::For {
                var,
                start,
                stop,
                step,
                endfor,
            } => {
                let scope = match var {
                    ScalarTarget::LocalInt(_) => 0,
                    _ => 1,
                };
                let step = step.map(|s| s as i64).unwrap_or(-1);
                let _ = write!(
                    out,
                    " {} {} {} {} {} {}",
                    scope,
                    var.index(),
                    start,
                    stop,
                    step,
                    endfor
                );
            }
            StmtKind::Repeat { count, endrepeat } => {
                let _ = write!(out, " {} {}", count, endrepeat);
            }
            StmtKind::Increment { target, step } => {
                let _ = write!(out, " {} {} {}", target.code(), target.index(), step);
            }
            StmtKind::Expr { slot, assign } => {
                let (kind, index, index_slot) = match assign {
                    Some(target) => target.codes(),
                    None => (-1, 0, -1),
                };
                let _ = write!(out, " {} {} {} {}", slot, kind, index, index_slot);
            }
            StmtKind::Return { slot } => {
                let slot = slot.map(|s| s as i64).unwrap_or(-1);
                let _ = write!(out, " {}", slot);
            }
            StmtKind::EndIf | StmtKind::Loop | StmtKind::Break | StmtKind::Continue => {}
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{}", program.postfix.len());
    for slot in &program.postfix {
        let _ = write!(out, "{} {}", slot.elements.len(), slot.hint.code());
        for element in &slot.elements {
            out.push(' ');
            write_element(&mut out, element);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{}", program.fips.len());
    for fip in &program.fips {
        let _ = write!(out, "{} {}", fip.function, fip.argv.len());
        for slot in &fip.argv {
            let _ = write!(out, " {}", slot);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{}", program.string_consts.len());
    for s in &program.string_consts {
        let _ = writeln!(out, "{}", s);
    }

    let _ = writeln!(out, "{}", program.global_ints.len());
    for v in &program.global_ints {
        let _ = writeln!(out, "{}", v);
    }
    let _ = writeln!(out, "{}", program.global_bytes.len());
    for v in &program.global_bytes {
        let _ = writeln!(out, "{}", v);
    }
    let _ = writeln!(out, "{}", program.global_strings.len());
    for s in &program.global_strings {
        let _ = writeln!(out, "{}", s);
    }

    for sizes in [
        &program.global_int_array_sizes,
        &program.global_byte_array_sizes,
        &program.global_string_array_sizes,
    ] {
        write_size_list(&mut out, sizes);
    }

    let _ = writeln!(out, "{}", program.functions.len());
    for function in &program.functions {
        let _ = write!(
            out,
            "{} {} {}",
            function.entry,
            function.return_kind.code(),
            function.args.len()
        );
        for arg in &function.args {
            let _ = write!(out, " {}{}", arg.kind.tag(), arg.local);
        }
        out.push('\n');
        let _ = writeln!(
            out,
            "{} {} {}",
            function.local_ints, function.local_bytes, function.local_strings
        );
        write_size_list(&mut out, &function.int_array_sizes);
        write_size_list(&mut out, &function.byte_array_sizes);
        write_size_list(&mut out, &function.string_array_sizes);
    }

    let _ = writeln!(out, "{}", program.main_function);
    out
}

fn write_size_list(out: &mut String, sizes: &[usize]) {
    use std::fmt::Write;
    let _ = write!(out, "{}", sizes.len());
    for size in sizes {
        let _ = write!(out, " {}", size);
    }
    out.push('\n');
}

fn write_element(out: &mut String, element: &Element) {
    use std::fmt::Write;
    let _ = match element {
        Element::IntConst(v) => write!(out, "c{}", v),
        Element::StringConst(i) => write!(out, "C{}", i),
        Element::LocalIntVar(i) => write!(out, "v{}", i),
        Element::GlobalIntVar(i) => write!(out, "V{}", i),
        Element::LocalByteVar(i) => write!(out, "b{}", i),
        Element::GlobalByteVar(i) => write!(out, "B{}", i),
        Element::LocalStringVar(i) => write!(out, "s{}", i),
        Element::GlobalStringVar(i) => write!(out, "S{}", i),
        Element::LocalIntArray { array, index_slot } => write!(out, "av{}[{}]", array, index_slot),
        Element::GlobalIntArray { array, index_slot } => write!(out, "aV{}[{}]", array, index_slot),
        Element::LocalByteArray { array, index_slot } => write!(out, "ab{}[{}]", array, index_slot),
        Element::GlobalByteArray { array, index_slot } => {
            write!(out, "aB{}[{}]", array, index_slot)
        }
        Element::LocalStringArray { array, index_slot } => {
            write!(out, "as{}[{}]", array, index_slot)
        }
        Element::GlobalStringArray { array, index_slot } => {
            write!(out, "aS{}[{}]", array, index_slot)
        }
        Element::LocalByteArrayRef(i) => write!(out, "p{}", i),
        Element::GlobalByteArrayRef(i) => write!(out, "P{}", i),
        Element::InternCall(i) => write!(out, "f{}", i),
        Element::ExternCall(i) => write!(out, "F{}", i),
        Element::Operator(op) => write!(out, "o{}", op.to_char()),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smallest valid program: `main` is a single bare `return`.
    fn minimal_ir() -> String {
        [
            "1",           // statements
            "1 14 0 -1",   // return, no slot
            "0",           // postfix slots
            "0",           // fips
            "0",           // string constants
            "0",           // global ints
            "0",           // global bytes
            "0",           // global strings
            "0",           // global int arrays
            "0",           // global byte arrays
            "0",           // global string arrays
            "1",           // functions
            "0 0 0",       // entry 0, void, no args
            "0 0 0",       // no local scalars
            "0",
            "0",
            "0",
            "0",           // main function index
            "",
        ]
        .join("\n")
    }

    #[test]
    fn test_load_minimal_program() {
        let program = load_program(&minimal_ir()).unwrap();
        assert_eq!(program.statements.len(), 1);
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.main_function, 0);
        assert!(matches!(
            program.statements[0].kind,
            StmtKind::Return { slot: None }
        ));
    }

    #[test]
    fn test_minimal_round_trip() {
        let program = load_program(&minimal_ir()).unwrap();
        let written = write_program(&program);
        let reloaded = load_program(&written).unwrap();
        assert_eq!(program, reloaded);
    }

    #[test]
    fn test_element_tokens_round_trip() {
        let elements = vec![
            Element::IntConst(-42),
            Element::StringConst(3),
            Element::LocalIntVar(0),
            Element::GlobalIntVar(1),
            Element::LocalByteVar(2),
            Element::GlobalByteVar(3),
            Element::LocalStringVar(4),
            Element::GlobalStringVar(5),
            Element::LocalIntArray { array: 1, index_slot: 2 },
            Element::GlobalStringArray { array: 0, index_slot: 9 },
            Element::LocalByteArrayRef(1),
            Element::GlobalByteArrayRef(0),
            Element::InternCall(7),
            Element::ExternCall(8),
            Element::Operator(Op::Concat),
        ];
        for element in elements {
            let mut s = String::new();
            write_element(&mut s, &element);
            let parsed = parse_element(1, &s).unwrap();
            assert_eq!(parsed, element);
        }
    }

    #[test]
    fn test_bad_element_token() {
        assert!(matches!(
            parse_element(5, "x17"),
            Err(LoadError::BadElementToken { line: 5, .. })
        ));
        assert!(matches!(
            parse_element(5, "av3"),
            Err(LoadError::BadElementToken { .. })
        ));
        assert!(matches!(
            parse_element(5, "o?"),
            Err(LoadError::BadElementToken { .. })
        ));
    }

    #[test]
    fn test_truncated_file() {
        let err = load_program("3\n1 14 0 -1\n").unwrap_err();
        assert!(matches!(err, LoadError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_non_integer_token() {
        let err = load_program("x\n").unwrap_err();
        assert!(matches!(err, LoadError::ExpectedInt { line: 1, .. }));
    }

    #[test]
    fn test_unknown_statement_type() {
        let src = minimal_ir().replace("1 14 0 -1", "1 99 0 -1");
        let err = load_program(&src).unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnknownStatementType { code: 99, .. }
        ));
    }

    #[test]
    fn test_successor_out_of_range_rejected() {
        let src = minimal_ir().replace("1 14 0 -1", "1 1 7");
        let err = load_program(&src).unwrap_err();
        assert!(matches!(
            err,
            LoadError::IndexOutOfRange {
                what: "statement successor",
                index: 7,
                limit: 1,
            }
        ));
    }

    fn ir_with_postfix(postfix_lines: &[&str]) -> String {
        let mut lines = vec![
            "1".to_string(),
            "1 14 0 -1".to_string(),
            postfix_lines.len().to_string(),
        ];
        lines.extend(postfix_lines.iter().map(|s| s.to_string()));
        lines.extend(
            [
                "0", "0", "0", "0", "0", "0", "0", "0", "1", "0 0 0", "0 0 0", "0", "0", "0",
                "0", "",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        lines.join("\n")
    }

    #[test]
    fn test_expression_depth_limit_enforced() {
        // 32 operands folded by 31 operators: peak depth 32, accepted.
        let mut ok = vec!["c1".to_string(); 32];
        ok.extend(std::iter::repeat("o+".to_string()).take(31));
        let line = format!("63 0 {}", ok.join(" "));
        assert!(load_program(&ir_with_postfix(&[&line])).is_ok());

        // 33 operands: peak depth 33, rejected at load time.
        let mut too_deep = vec!["c1".to_string(); 33];
        too_deep.extend(std::iter::repeat("o+".to_string()).take(32));
        let line = format!("65 0 {}", too_deep.join(" "));
        let err = load_program(&ir_with_postfix(&[&line])).unwrap_err();
        assert!(matches!(err, LoadError::ExprTooDeep { slot: 0, depth: 33 }));
    }

    #[test]
    fn test_unbalanced_expression_rejected() {
        let err = load_program(&ir_with_postfix(&["2 0 c1 o+"])).unwrap_err();
        assert!(matches!(err, LoadError::UnbalancedExpr { slot: 0 }));

        let err = load_program(&ir_with_postfix(&["2 0 c1 c2"])).unwrap_err();
        assert!(matches!(err, LoadError::UnbalancedExpr { slot: 0 }));
    }

    #[test]
    fn test_hint_demoted_on_shape_mismatch() {
        // Hint 2 claims "single local int variable" but the slot holds a
        // constant; the loader must fall back to the general path.
        let program = load_program(&ir_with_postfix(&["1 2 c5"])).unwrap();
        assert_eq!(program.postfix[0].hint, Hint::None);

        let program = load_program(&ir_with_postfix(&["1 2 v0"])).unwrap();
        assert_eq!(program.postfix[0].hint, Hint::LocalIntNoOp);
    }

    #[test]
    fn test_concat_never_matches_int_op_hint() {
        let program = load_program(&ir_with_postfix(&["3 8 v0 v1 o:"])).unwrap();
        assert_eq!(program.postfix[0].hint, Hint::None);

        let program = load_program(&ir_with_postfix(&["3 8 v0 v1 o+"])).unwrap();
        assert_eq!(program.postfix[0].hint, Hint::LocalIntOpLocalInt);
    }

    #[test]
    fn test_string_constants_kept_verbatim() {
        let src = [
            "1",
            "1 13 0 0 -1 0 -1",
            "1",
            "1 1 C0",
            "0",
            "1",
            "  padded  ",
            "0",
            "0",
            "0",
            "0",
            "0",
            "0",
            "1",
            "0 0 0",
            "0 0 0",
            "0",
            "0",
            "0",
            "0",
            "",
        ]
        .join("\n");
        let program = load_program(&src).unwrap();
        assert_eq!(program.string_consts[0], "  padded  ");
        let reloaded = load_program(&write_program(&program)).unwrap();
        assert_eq!(program, reloaded);
    }
}
