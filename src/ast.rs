//! # Abstract Syntax Tree
//!
//! A [`Program`] is an ordered sequence of [`Node`]s (spec §4.3). Each node
//! carries a free-text `where_` string used only for error reporting; the
//! payload lives in [`Tag`].
//!
//! Binder identity (spec §9 "Recursive self-reference") is tracked with a
//! process-wide monotonic id, assigned once per `CloseValue`/`PushFun` site
//! at parse time. Two upvalue frames created by executing the *same* AST
//! node share this id even across different calls; [`crate::upvalue::lexical_match`]
//! uses that to re-root a self-recursive closure without deepening the
//! chain on every call (spec §4.5).

use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::value::{NthParent, PrimitiveFn, Value};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Allocate a fresh binder id, unique for the lifetime of the process.
pub fn next_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One AST instruction (spec §4.3's tag + payload), plus its source
/// location for error reporting.
pub struct Node {
    pub tag: Tag,
    pub where_: Rc<str>,
}

impl Node {
    pub fn new(tag: Tag, where_: impl Into<Rc<str>>) -> Self {
        Node { tag, where_: where_.into() }
    }

    /// Is this instruction shaped like an apply? Only the *last*
    /// instruction of a program is ever considered for the TCO rewrite
    /// (spec §4.4).
    pub fn is_tailable(&self) -> bool {
        matches!(
            self.tag,
            Tag::Apply | Tag::ConditionalApply | Tag::ApplyUpval(..)
        )
    }

    /// Rewrite an apply-shaped tail instruction into its TCO form
    /// (spec §4.3's `convert_to_tail_call`). A no-op on anything else.
    pub fn convert_to_tail_call(&mut self) {
        self.tag = match std::mem::replace(&mut self.tag, Tag::NoOp) {
            Tag::Apply => Tag::TailApply,
            Tag::ConditionalApply => Tag::TailConditionalApply,
            Tag::ApplyUpval(name, n) => Tag::TailApplyUpval(name, n),
            other => other,
        };
    }
}

/// Instruction payload (spec §4.3 table).
pub enum Tag {
    PushLiteral(Value),
    PushPrimitive(PrimitiveFn, &'static str),
    ApplyPrimitive(PrimitiveFn, &'static str),
    PushUpval(Rc<str>, NthParent),
    ApplyUpval(Rc<str>, NthParent),
    TailApplyUpval(Rc<str>, NthParent),
    PushUpvalByName,
    /// Bind the current upvalue chain into a fresh `BoundProgram` and push
    /// it. `binder_id` is the id of the `CloseValue` that opens `program`
    /// when a parameter is present.
    PushFun { program: Rc<Program>, param: Option<Rc<str>>, binder_id: u32 },
    /// Like `PushFun`, but for a `def`-introduced self-reference: reuses
    /// the defining function's own (possibly not-yet-fully-built, hence
    /// `Weak`) program and re-roots the chain via
    /// [`crate::upvalue::lexical_match`] on `binder_id` instead of
    /// capturing the current chain outright (spec §4.5, §9).
    PushFunctionRec { program: Weak<Program>, param: Option<Rc<str>>, binder_id: u32 },
    Apply,
    TailApply,
    ConditionalApply,
    TailConditionalApply,
    Require,
    CloseValue(Rc<str>, u32),
    BreakProg,
    /// REPL-only: ask the parsing context for the next program and
    /// tail-jump into it; in file mode the parser emits `BreakProg`
    /// instead (spec §4.5, §4.8).
    EofMarker,
    NoOp,
}

/// An ordered sequence of instructions (spec §3's "AST program"). Plain
/// owned data until it is wrapped in `Rc`/`Rc::new_cyclic` by the parser
/// or by `Require`; immutable thereafter.
pub struct Program {
    pub instrs: Vec<Node>,
}

impl Program {
    pub fn new(instrs: Vec<Node>) -> Self {
        Program { instrs }
    }
}
