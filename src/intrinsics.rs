//! Built-in operations registry.
//!
//! Intrinsics are named with a leading `.` in source and are only legal as
//! the immediate callee of a call; they never become first-class values.
//! Each registry entry carries a fixed tuple of expected operand variants,
//! validated centrally by the dispatcher before the implementation runs, so
//! every arity or type mismatch surfaces as the same "type error on
//! intrinsic call".
//!
//! Typing is strict: no coercion between Integers and Strings, no
//! truthiness. Arithmetic uses checked `i64` operations, so overflow, zero
//! division, and zero modulus are runtime errors rather than wrapping or
//! panicking.
//!
//! Implementations receive borrowed heap cells and return an owned value
//! that the evaluator moves into a fresh cell. Intrinsics never see the
//! stack and never allocate.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::LazyLock;

use crate::heap::Value;

/// Expected operand variant for one parameter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Any,
    Integer,
    Str,
}

/// Host streams threaded through `.get` and `.put`.
pub struct Io<'a> {
    pub input: &'a mut dyn BufRead,
    pub output: &'a mut dyn Write,
}

/// Canonical implementation signature. The returned value borrows nothing
/// from the arguments' heap, so the evaluator can move it into a new cell.
pub type IntrinsicFn =
    for<'ast> fn(&mut Io<'_>, &[&Value<'ast>]) -> Result<Value<'ast>, String>;

pub struct Intrinsic {
    pub name: &'static str,
    pub operands: &'static [Operand],
    pub run: IntrinsicFn,
}

const TYPE_ERROR: &str = "type error on intrinsic call";

impl Intrinsic {
    /// Validate argument count and variants against the operand tuple.
    pub fn check_operands(&self, args: &[&Value<'_>]) -> Result<(), String> {
        if args.len() != self.operands.len() {
            return Err(TYPE_ERROR.to_owned());
        }
        for (expected, value) in self.operands.iter().zip(args) {
            let ok = match expected {
                Operand::Any => true,
                Operand::Integer => matches!(value, Value::Integer(_)),
                Operand::Str => matches!(value, Value::Str(_)),
            };
            if !ok {
                return Err(TYPE_ERROR.to_owned());
            }
        }
        Ok(())
    }
}

//
// Implementations
//

fn void<'ast>(_io: &mut Io<'_>, _args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    Ok(Value::Void)
}

fn add<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Integer(a), Value::Integer(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    a.checked_add(*b)
        .map(Value::Integer)
        .ok_or_else(|| "integer overflow in addition".to_owned())
}

fn sub<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Integer(a), Value::Integer(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    a.checked_sub(*b)
        .map(Value::Integer)
        .ok_or_else(|| "integer overflow in subtraction".to_owned())
}

fn mul<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Integer(a), Value::Integer(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    a.checked_mul(*b)
        .map(Value::Integer)
        .ok_or_else(|| "integer overflow in multiplication".to_owned())
}

fn div<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Integer(a), Value::Integer(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    if *b == 0 {
        return Err("division by zero".to_owned());
    }
    a.checked_div(*b)
        .map(Value::Integer)
        .ok_or_else(|| "integer overflow in division".to_owned())
}

fn rem<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Integer(a), Value::Integer(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    if *b == 0 {
        return Err("modulus by zero".to_owned());
    }
    a.checked_rem(*b)
        .map(Value::Integer)
        .ok_or_else(|| "integer overflow in modulus".to_owned())
}

fn lt<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Integer(a), Value::Integer(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    Ok(Value::Integer(i64::from(a < b)))
}

fn str_len<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let Value::Str(s) = args[0] else {
        return Err(TYPE_ERROR.to_owned());
    };
    Ok(Value::Integer(s.len() as i64))
}

/// Byte substring `[lo, hi)`; bounds must be in range and in order.
fn str_sub<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Str(s), Value::Integer(lo), Value::Integer(hi)) = (args[0], args[1], args[2])
    else {
        return Err(TYPE_ERROR.to_owned());
    };
    let out_of_range = || "substring bounds out of range".to_owned();
    let lo = usize::try_from(*lo).map_err(|_| out_of_range())?;
    let hi = usize::try_from(*hi).map_err(|_| out_of_range())?;
    if lo > hi {
        return Err(out_of_range());
    }
    s.get(lo..hi)
        .map(|sub| Value::Str(sub.to_owned()))
        .ok_or_else(out_of_range)
}

fn str_concat<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Str(a), Value::Str(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    let mut out = String::with_capacity(a.len() + b.len());
    out.push_str(a);
    out.push_str(b);
    Ok(Value::Str(out))
}

fn str_lt<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let (Value::Str(a), Value::Str(b)) = (args[0], args[1]) else {
        return Err(TYPE_ERROR.to_owned());
    };
    Ok(Value::Integer(i64::from(a < b)))
}

fn int_to_str<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let Value::Integer(i) = args[0] else {
        return Err(TYPE_ERROR.to_owned());
    };
    Ok(Value::Str(i.to_string()))
}

fn str_to_int<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let Value::Str(s) = args[0] else {
        return Err(TYPE_ERROR.to_owned());
    };
    s.parse::<i64>()
        .map(Value::Integer)
        .map_err(|_| "string does not denote an integer".to_owned())
}

fn is_void<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    Ok(Value::Integer(i64::from(matches!(args[0], Value::Void))))
}

fn is_integer<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    Ok(Value::Integer(i64::from(matches!(
        args[0],
        Value::Integer(_)
    ))))
}

fn is_str<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    Ok(Value::Integer(i64::from(matches!(args[0], Value::Str(_)))))
}

fn is_closure<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    Ok(Value::Integer(i64::from(matches!(
        args[0],
        Value::Closure(_)
    ))))
}

fn type_label<'ast>(_io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    Ok(Value::Integer(args[0].type_label()))
}

/// Read one line of standard input as an Integer.
fn get<'ast>(io: &mut Io<'_>, _args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let mut line = String::new();
    io.input
        .read_line(&mut line)
        .map_err(|_| "cannot read from standard input".to_owned())?;
    line.trim()
        .parse::<i64>()
        .map(Value::Integer)
        .map_err(|_| "invalid integer on standard input".to_owned())
}

/// Print an Integer followed by a newline.
fn put<'ast>(io: &mut Io<'_>, args: &[&Value<'ast>]) -> Result<Value<'ast>, String> {
    let Value::Integer(i) = args[0] else {
        return Err(TYPE_ERROR.to_owned());
    };
    writeln!(io.output, "{i}")
        .and_then(|()| io.output.flush())
        .map_err(|_| "cannot write to standard output".to_owned())?;
    Ok(Value::Void)
}

/// The registry, kept as one contiguous table for ease of auditing.
static INTRINSICS: &[Intrinsic] = &[
    Intrinsic {
        name: ".void",
        operands: &[],
        run: void,
    },
    Intrinsic {
        name: ".+",
        operands: &[Operand::Integer, Operand::Integer],
        run: add,
    },
    Intrinsic {
        name: ".-",
        operands: &[Operand::Integer, Operand::Integer],
        run: sub,
    },
    Intrinsic {
        name: ".*",
        operands: &[Operand::Integer, Operand::Integer],
        run: mul,
    },
    Intrinsic {
        name: "./",
        operands: &[Operand::Integer, Operand::Integer],
        run: div,
    },
    Intrinsic {
        name: ".%",
        operands: &[Operand::Integer, Operand::Integer],
        run: rem,
    },
    Intrinsic {
        name: ".<",
        operands: &[Operand::Integer, Operand::Integer],
        run: lt,
    },
    Intrinsic {
        name: ".slen",
        operands: &[Operand::Str],
        run: str_len,
    },
    Intrinsic {
        name: ".ssub",
        operands: &[Operand::Str, Operand::Integer, Operand::Integer],
        run: str_sub,
    },
    Intrinsic {
        name: ".s+",
        operands: &[Operand::Str, Operand::Str],
        run: str_concat,
    },
    Intrinsic {
        name: ".s<",
        operands: &[Operand::Str, Operand::Str],
        run: str_lt,
    },
    Intrinsic {
        name: ".i->s",
        operands: &[Operand::Integer],
        run: int_to_str,
    },
    Intrinsic {
        name: ".s->i",
        operands: &[Operand::Str],
        run: str_to_int,
    },
    Intrinsic {
        name: ".v?",
        operands: &[Operand::Any],
        run: is_void,
    },
    Intrinsic {
        name: ".i?",
        operands: &[Operand::Any],
        run: is_integer,
    },
    Intrinsic {
        name: ".s?",
        operands: &[Operand::Any],
        run: is_str,
    },
    Intrinsic {
        name: ".c?",
        operands: &[Operand::Any],
        run: is_closure,
    },
    Intrinsic {
        name: ".type",
        operands: &[Operand::Any],
        run: type_label,
    },
    Intrinsic {
        name: ".get",
        operands: &[],
        run: get,
    },
    Intrinsic {
        name: ".put",
        operands: &[Operand::Integer],
        run: put,
    },
];

static BY_NAME: LazyLock<HashMap<&'static str, &'static Intrinsic>> =
    LazyLock::new(|| INTRINSICS.iter().map(|i| (i.name, i)).collect());

/// Look up an intrinsic by its source name (including the leading `.`).
pub fn find(name: &str) -> Option<&'static Intrinsic> {
    BY_NAME.get(name).copied()
}
