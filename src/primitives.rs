//! # Primitive Operators
//!
//! The core arithmetic, comparison, and stack-control operators (spec
//! §4.2's operator row, §4.6's contract): `+ - * / % < > = # ( )` and the
//! reserved words `not and or drop swap dup nth save-stack
//! stack-to-array`. Each is a bare `fn(&mut Stack, &RunContext)`, pushed
//! as a `Value::Primitive` by the parser and invoked inline by the run
//! loop — exactly the shape a `require`d library's own primitives take
//! (spec §6), so user code cannot tell the difference between a core
//! operator and a library one.
//!
//! Binary numeric operators "pop one slot and rewrite the other" in
//! place (spec §4.6) to avoid an extra push/pop pair; this module
//! follows that contract throughout rather than the more obvious
//! pop-pop-push shape.

use crate::error::BangError;
use crate::interp::RunContext;
use crate::stack::Stack;
use crate::value::{ArrayValue, Value};

pub fn lookup(name: &str) -> Option<crate::value::PrimitiveFn> {
    let f: crate::value::PrimitiveFn = match name {
        "+" => add,
        "-" => sub,
        "*" => mul,
        "/" => div,
        "%" => rem,
        "<" => lt,
        ">" => gt,
        "=" => eq,
        "#" => count,
        "(" => begin_bound,
        ")" => end_bound,
        "not" => not,
        "and" => and,
        "or" => or,
        "drop" => drop_top,
        "swap" => swap,
        "dup" => dup,
        "nth" => nth,
        "save-stack" => save_stack,
        "stack-to-array" => stack_to_array,
        _ => return None,
    };
    Some(f)
}

fn binary_numeric(stack: &mut Stack, f: impl Fn(f64, f64) -> f64) -> Result<(), BangError> {
    let b = stack.pop()?.as_num()?;
    let a = stack.top_mut()?;
    let av = a.as_num()?;
    *a = Value::Num(f(av, b));
    Ok(())
}

fn binary_compare(stack: &mut Stack, f: impl Fn(f64, f64) -> bool) -> Result<(), BangError> {
    let b = stack.pop()?.as_num()?;
    let a = stack.top_mut()?;
    let av = a.as_num()?;
    *a = Value::Bool(f(av, b));
    Ok(())
}

fn add(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    binary_numeric(s, |a, b| a + b)
}
fn sub(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    binary_numeric(s, |a, b| a - b)
}
fn mul(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    binary_numeric(s, |a, b| a * b)
}
fn div(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let b = s.pop()?.as_num()?;
    if b == 0.0 {
        return Err(BangError::runtime("", "division by zero"));
    }
    let a = s.top_mut()?;
    let av = a.as_num()?;
    *a = Value::Num(av / b);
    Ok(())
}
fn rem(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let b = s.pop()?.as_num()?;
    if b == 0.0 {
        return Err(BangError::runtime("", "division by zero"));
    }
    let a = s.top_mut()?;
    let av = a.as_num()?;
    *a = Value::Num(av % b);
    Ok(())
}
fn lt(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    binary_compare(s, |a, b| a < b)
}
fn gt(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    binary_compare(s, |a, b| a > b)
}

/// `=` is the one comparison that isn't purely numeric: it compares
/// strings and booleans too, matching `bangstring`'s own equality
/// (hash, then length, then bytes — spec §3) for `Str` operands.
fn eq(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let b = s.pop()?;
    let a = s.pop()?;
    let result = values_equal(&a, &b);
    s.push(Value::Bool(result));
    Ok(())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Uninitialized, Value::Uninitialized) => true,
        _ => false,
    }
}

fn count(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    s.push(Value::Num(s.len() as f64));
    Ok(())
}

fn begin_bound(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    s.begin_bound();
    Ok(())
}
fn end_bound(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    s.end_bound();
    Ok(())
}

fn not(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let a = s.top_mut()?;
    let b = a.as_bool();
    *a = Value::Bool(!b);
    Ok(())
}
fn and(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let b = s.pop()?.as_bool();
    let a = s.top_mut()?;
    let av = a.as_bool();
    *a = Value::Bool(av && b);
    Ok(())
}
fn or(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let b = s.pop()?.as_bool();
    let a = s.top_mut()?;
    let av = a.as_bool();
    *a = Value::Bool(av || b);
    Ok(())
}

fn drop_top(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    s.pop()?;
    Ok(())
}

fn swap(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let b = s.pop()?;
    let a = s.pop()?;
    s.push(b);
    s.push(a);
    Ok(())
}

fn dup(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let v = s.top()?.clone();
    s.push(v);
    Ok(())
}

/// `n nth` — push a copy of the value `n` slots below the top, without
/// disturbing the stack otherwise (spec §3's `Stack::nth`).
fn nth(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let idx = s.pop()?.as_num()?;
    if idx < 0.0 {
        return Err(BangError::runtime("", "nth: negative index"));
    }
    let v = s.nth(idx as usize)?.clone();
    s.push(v);
    Ok(())
}

/// Non-destructive snapshot of everything visible above the topmost
/// bound mark into a library-style array object (spec §6's reserved
/// word list; see `value::ArrayValue`).
fn save_stack(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let mut values = Vec::with_capacity(s.len());
    for i in (0..s.len()).rev() {
        values.push(s.nth(i)?.clone());
    }
    s.push(Value::Fun(std::rc::Rc::new(ArrayValue::new(values))));
    Ok(())
}

/// Destructive version of `save-stack`: drains everything visible above
/// the topmost bound mark into the array, leaving the stack (within that
/// bound) holding only the new array.
fn stack_to_array(s: &mut Stack, _c: &RunContext) -> Result<(), BangError> {
    let mut values = Vec::new();
    s.give_to(&mut values);
    s.push(Value::Fun(std::rc::Rc::new(ArrayValue::new(values))));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{ExecEnv, Thread};
    use std::cell::Cell;
    use std::rc::Rc;

    fn ctx() -> RunContext {
        RunContext {
            where_: Rc::from(""),
            thread: Thread::new(),
            env: Rc::new(ExecEnv::new(std::path::PathBuf::from("."))),
            yield_flag: Rc::new(Cell::new(false)),
        }
    }

    #[test]
    fn add_rewrites_top_in_place() {
        let mut s = Stack::new();
        s.push(Value::Num(2.0));
        s.push(Value::Num(3.0));
        add(&mut s, &ctx()).unwrap();
        assert_eq!(s.len(), 1);
        match s.top().unwrap() {
            Value::Num(n) => assert_eq!(*n, 5.0),
            _ => panic!("expected Num"),
        }
    }

    #[test]
    fn div_by_zero_errors() {
        let mut s = Stack::new();
        s.push(Value::Num(1.0));
        s.push(Value::Num(0.0));
        assert!(div(&mut s, &ctx()).is_err());
    }

    #[test]
    fn equality_compares_strings_by_value() {
        let mut s = Stack::new();
        s.push(Value::Str("abc".into()));
        s.push(Value::Str("abc".into()));
        eq(&mut s, &ctx()).unwrap();
        assert!(matches!(s.top().unwrap(), Value::Bool(true)));
    }

    #[test]
    fn swap_exchanges_top_two() {
        let mut s = Stack::new();
        s.push(Value::Num(1.0));
        s.push(Value::Num(2.0));
        swap(&mut s, &ctx()).unwrap();
        match s.top().unwrap() {
            Value::Num(n) => assert_eq!(*n, 1.0),
            _ => panic!(),
        }
    }

    #[test]
    fn nth_reads_without_popping() {
        let mut s = Stack::new();
        s.push(Value::Num(10.0));
        s.push(Value::Num(20.0));
        s.push(Value::Num(1.0)); // index argument
        nth(&mut s, &ctx()).unwrap();
        assert_eq!(s.len(), 3);
        match s.top().unwrap() {
            Value::Num(n) => assert_eq!(*n, 10.0),
            _ => panic!(),
        }
    }
}
