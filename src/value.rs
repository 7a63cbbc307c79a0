//! # Value Representation for the Bang! Interpreter
//!
//! This module defines [`Value`], the tagged runtime type that lives on the
//! operand stack, in upvalue frames, and as a `BoundProgram`'s captured
//! environment slots.
//!
//! ## Variants
//! - `Uninitialized` — the default/never-observed slot state.
//! - `Bool(bool)` — boolean truth value.
//! - `Num(f64)` — IEEE-754 double; Bang! has one numeric type.
//! - `Str(BangString)` — immutable, reference-counted, pre-hashed string.
//! - `Fun(Rc<dyn NativeFunction>)` — any native callable beyond a bare
//!   function pointer (library objects that also support `indexOperator`/
//!   `customOperator`); not exercised by the `math`/`string` demo
//!   libraries in this crate, which push plain [`Primitive`]s, but kept in
//!   the type for fidelity to the source language's value model.
//! - `BoundFun(Rc<BoundProgram>)` — a user-defined closure: an AST program
//!   plus the upvalue chain captured when it was pushed.
//! - `Primitive(PrimitiveFn)` — a bare host function pointer (arithmetic
//!   operators, library `lookup` functions).
//! - `Thread(Rc<RefCell<Thread>>)` — a coroutine handle.
//!
//! ## Coercion rules
//! - `as_num`: `Num` → itself; `Bool` → 1.0/0.0; everything else is a
//!   `TypeError`. Matches the primitive operator contract (spec §4.6):
//!   Bang! does not implicitly stringify or numify composite values.
//! - `as_bool`: `Bool` → itself; `Num` → nonzero; `Str` → non-empty;
//!   callables/threads/uninitialized → always `true` (there is no falsy
//!   "empty function").
//! - String equality compares cached hash, then length, then bytes — the
//!   same short-circuit order as the C++ `bangstring::operator==`.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::ast::Program;
use crate::error::BangError;
use crate::interp::RunContext;
use crate::stack::Stack;
use crate::upvalue::Upvalue;

/// A bare host function taking the operand stack and the current run
/// context. Used for primitive operators and for library `lookup`
/// dispatch tables (`mathlib`/`stringlib` style).
pub type PrimitiveFn = fn(&mut Stack, &RunContext) -> Result<(), BangError>;

/// Trait for native callables richer than a single function pointer:
/// library objects that also implement an index operator (`obj[k]`) or a
/// custom named operator (`obj/op`). Mirrors the C++ `Function` base class.
pub trait NativeFunction {
    fn apply(&self, stack: &mut Stack, ctx: &RunContext) -> Result<(), BangError>;

    fn index_operator(
        &self,
        _index: &Value,
        _stack: &mut Stack,
        _ctx: &RunContext,
    ) -> Result<(), BangError> {
        Err(BangError::runtime("", "value does not support indexing"))
    }

    fn custom_operator(&self, op: &str, _stack: &mut Stack) -> Result<(), BangError> {
        Err(BangError::runtime("", format!("no such operator '{}'", op)))
    }
}

/// A closure: an AST program paired with the upvalue chain in effect when
/// the enclosing `fun`/`def` literal was executed. Immutable after
/// construction (spec §3's `BoundProgram`).
pub struct BoundProgram {
    pub program: Rc<Program>,
    pub upvalues: Option<Rc<Upvalue>>,
}

/// Jenkins one-at-a-time hash, sampling at most the first 32 bytes (spec
/// §3, §9: "string hashing samples ≤32 bytes").
fn jenkins_one_at_a_time(bytes: &[u8]) -> u32 {
    let sample = &bytes[..bytes.len().min(32)];
    let mut hash: u32 = 0;
    for &b in sample {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}

/// An immutable, reference-counted, pre-hashed string.
#[derive(Clone)]
pub struct BangString {
    data: Rc<str>,
    hash: u32,
}

impl BangString {
    pub fn new(s: impl Into<Rc<str>>) -> Self {
        let data: Rc<str> = s.into();
        let hash = jenkins_one_at_a_time(data.as_bytes());
        BangString { data, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }
}

impl PartialEq for BangString {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.data.len() == other.data.len() && self.data == other.data
    }
}
impl Eq for BangString {}

impl Hash for BangString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl fmt::Display for BangString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl From<&str> for BangString {
    fn from(s: &str) -> Self {
        BangString::new(s)
    }
}
impl From<String> for BangString {
    fn from(s: String) -> Self {
        BangString::new(s)
    }
}

/// A compile-time-resolved depth into an upvalue chain (spec GLOSSARY).
/// `NO_PARENT` marks "no enclosing binder found" — e.g. a top-level
/// `require`d program, which runs with an empty upvalue chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct NthParent(pub u32);

impl NthParent {
    pub const NO_PARENT: NthParent = NthParent(u32::MAX);

    pub fn succ(self) -> NthParent {
        NthParent(self.0 + 1)
    }

    pub fn pred(self) -> NthParent {
        NthParent(self.0 - 1)
    }

    pub fn is_no_parent(self) -> bool {
        self == Self::NO_PARENT
    }
}

/// The universal runtime value. See the module documentation for the
/// coercion rules implemented below.
#[derive(Clone)]
pub enum Value {
    Uninitialized,
    Bool(bool),
    Num(f64),
    Str(BangString),
    Fun(Rc<dyn NativeFunction>),
    BoundFun(Rc<BoundProgram>),
    Primitive(PrimitiveFn),
    Thread(Rc<RefCell<crate::interp::Thread>>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Uninitialized => "uninitialized",
            Value::Bool(_) => "bool",
            Value::Num(_) => "num",
            Value::Str(_) => "string",
            Value::Fun(_) => "function",
            Value::BoundFun(_) => "function",
            Value::Primitive(_) => "function",
            Value::Thread(_) => "thread",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Fun(_) | Value::BoundFun(_) | Value::Primitive(_)
        )
    }

    /// Numeric coercion. Unlike `as_bool`, Bang! does not stringify numbers
    /// implicitly: only `Num` and `Bool` convert.
    pub fn as_num(&self) -> Result<f64, BangError> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(BangError::runtime(
                "",
                format!("expected a number, found {}", other.type_name()),
            )),
        }
    }

    pub fn as_str(&self) -> Result<&BangString, BangError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(BangError::runtime(
                "",
                format!("expected a string, found {}", other.type_name()),
            )),
        }
    }

    /// Truthiness used by `?` (ConditionalApply) and `not`/`and`/`or`.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.as_str().is_empty(),
            Value::Uninitialized => false,
            Value::Fun(_) | Value::BoundFun(_) | Value::Primitive(_) | Value::Thread(_) => true,
        }
    }
}

/// Backing object for `save-stack`/`stack-to-array`: there is no dedicated
/// Array variant in the value model, so both reserved words produce a
/// `NativeFunction` that supports indexing and reports its length through
/// the index operator's own error path when out of range. Grounded on the
/// C++ `bangarray`'s role as "just another `Function` subclass with
/// `indexOperator`".
pub struct ArrayValue {
    items: Vec<Value>,
}

impl ArrayValue {
    pub fn new(items: Vec<Value>) -> Self {
        ArrayValue { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl NativeFunction for ArrayValue {
    /// Applying an array pushes its own length, matching the "apply to
    /// query size" convention the `#`-via-bound-mark idiom already uses
    /// elsewhere for stack-shaped objects.
    fn apply(&self, stack: &mut Stack, _ctx: &RunContext) -> Result<(), BangError> {
        stack.push(Value::Num(self.items.len() as f64));
        Ok(())
    }

    fn index_operator(
        &self,
        index: &Value,
        stack: &mut Stack,
        _ctx: &RunContext,
    ) -> Result<(), BangError> {
        let i = index.as_num()?;
        if i < 0.0 || i as usize >= self.items.len() {
            return Err(BangError::runtime("", "array index out of bounds"));
        }
        stack.push(self.items[i as usize].clone());
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uninitialized => write!(f, "<uninitialized>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Num(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Fun(_) => write!(f, "<function>"),
            Value::BoundFun(_) => write!(f, "<function>"),
            Value::Primitive(_) => write!(f, "<primitive>"),
            Value::Thread(_) => write!(f, "<thread>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_equality_is_hash_len_bytes() {
        let a = BangString::new("hello");
        let b = BangString::new("hello");
        let c = BangString::new("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn nth_parent_no_parent_sentinel() {
        assert!(NthParent::NO_PARENT.is_no_parent());
        assert!(!NthParent(0).is_no_parent());
        assert_eq!(NthParent(2).pred(), NthParent(1));
    }

    #[test]
    fn as_bool_truthiness() {
        assert!(!Value::Bool(false).as_bool());
        assert!(!Value::Num(0.0).as_bool());
        assert!(!Value::Str(BangString::new("")).as_bool());
        assert!(Value::Num(1.0).as_bool());
        assert!(Value::Str(BangString::new("x")).as_bool());
    }

    #[test]
    fn as_num_rejects_strings() {
        assert!(Value::Str(BangString::new("5")).as_num().is_err());
        assert_eq!(Value::Bool(true).as_num().unwrap(), 1.0);
    }
}
