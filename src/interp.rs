//! # Instruction Dispatch Loop
//!
//! [`run_program`] drives a [`Program`]'s instructions against a
//! [`Thread`]'s operand stack and run-frame chain (spec §4.5, §9). The
//! frame chain lives on [`Thread`] as an explicit `Vec<RunFrame>` rather
//! than being implicit in Rust's call stack (spec §3's
//! `RunContext { thread, prev, current_instruction_cursor, upvalues }`
//! linked list): a non-tail apply to a `BoundFun` pushes a new `RunFrame`
//! and keeps driving the *same* loop, a tail apply rewrites the current
//! frame in place, and falling off the end of a frame pops it and resumes
//! driving whatever frame is now on top (the "caller"). This single
//! iterative driver is what lets a suspended coroutine (spec §4.8) be
//! resumed later: the whole call chain a `yield` suspended mid-way
//! through lives in `thread.frames`, not on the host (Rust) call stack,
//! so nothing needs to be captured or unwound to pick it back up.
//!
//! Host-stack depth for *this crate* therefore depends only on how deep a
//! single primitive's own Rust implementation recurses (none do) — ordinary
//! non-tail Bang! recursion costs `Vec` growth, not Rust stack growth,
//! and tail recursion costs neither (spec §8's O(1) host-stack guarantee
//! extends naturally to this design, rather than being a special case
//! limited to self-tail-calls).

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::{Program, Tag};
use crate::error::BangError;
use crate::library::LibraryTable;
use crate::stack::Stack;
use crate::upvalue::{lexical_match, BinderTag, Upvalue};
use crate::value::{BoundProgram, NthParent, Value};

/// One activation of a `Program` on a [`Thread`]'s frame chain.
pub struct RunFrame {
    pub program: Rc<Program>,
    pub pc: usize,
    pub upvalues: Option<Rc<Upvalue>>,
}

/// A coroutine context: its own operand stack and frame chain, plus a
/// link to whoever `resume`d it (spec §2's "Thread", §4.8, §5). The
/// interpreter's main thread is a `Thread` like any other, with
/// `caller: None` — which is also what makes `yield` on the main thread a
/// runtime error rather than a silent no-op (there is nobody to yield to).
pub struct Thread {
    pub stack: Stack,
    pub frames: Vec<RunFrame>,
    pub caller: Option<Rc<RefCell<Thread>>>,
    /// Set once this thread's body has been handed its first `resume`
    /// argument and started; distinguishes "first resume" (which must
    /// consume `start_callable`) from "later resume" (which continues an
    /// already-suspended frame chain).
    pub started: bool,
    /// Set once the thread's body has run to completion (fallen off the
    /// end, or hit `BreakProg`/`EofMarker` with no more frames). A
    /// finished thread cannot be resumed again.
    pub finished: bool,
    /// The closure `spawn` was given, held until the first `resume`
    /// actually starts the thread running.
    pub start_callable: Option<Value>,
}

impl Thread {
    pub fn new() -> Rc<RefCell<Thread>> {
        Rc::new(RefCell::new(Thread {
            stack: Stack::new(),
            frames: Vec::new(),
            caller: None,
            started: false,
            finished: false,
            start_callable: None,
        }))
    }

    /// A freshly spawned coroutine thread (spec §4.8's `spawn`), linked
    /// back to whoever spawned it.
    pub fn spawn_child(caller: &Rc<RefCell<Thread>>) -> Rc<RefCell<Thread>> {
        Rc::new(RefCell::new(Thread {
            stack: Stack::new(),
            frames: Vec::new(),
            caller: Some(caller.clone()),
            started: false,
            finished: false,
            start_callable: None,
        }))
    }
}

/// Everything a primitive operator or library `bang_open` function needs
/// beyond the operand stack it's handed directly: the AST location of
/// the instruction that invoked it (for error messages), the thread it's
/// running on (for anything that inspects or creates coroutines), the
/// shared execution environment (so a primitive like `resume` can drive
/// another thread's `run_program`/`resume_program` itself), and a
/// per-call yield flag a primitive can set to suspend the thread it's
/// running on (spec §4.8's `Yield`).
pub struct RunContext {
    pub where_: Rc<str>,
    pub thread: Rc<RefCell<Thread>>,
    pub env: Rc<ExecEnv>,
    pub yield_flag: Rc<Cell<bool>>,
}

/// Resources shared across every `run_program` call in one interpreter
/// invocation: the directory `require` resolves relative paths against,
/// and the statically registered library table (spec §6, §4.13).
pub struct ExecEnv {
    pub base_dir: PathBuf,
    pub libraries: LibraryTable,
}

impl ExecEnv {
    pub fn new(base_dir: PathBuf) -> Self {
        ExecEnv { base_dir, libraries: LibraryTable::with_builtins() }
    }
}

/// What a drive loop stopped for: the thread's frame chain ran all the
/// way out (with the completed top-level frame's final upvalue chain, so
/// a REPL can thread bindings from one prompt to the next), or a `yield`
/// suspended it mid-chain, leaving `thread.frames` intact for a later
/// [`resume_program`] call.
pub enum RunOutcome {
    Completed(Option<Rc<Upvalue>>),
    Yielded,
}

/// Push `program` as a new frame on `thread` and drive it (plus anything
/// it calls) to completion or suspension (spec §4.5's `RunProgram`).
pub fn run_program(
    thread: &Rc<RefCell<Thread>>,
    program: Rc<Program>,
    upvalues: Option<Rc<Upvalue>>,
    env: &Rc<ExecEnv>,
) -> Result<RunOutcome, BangError> {
    thread.borrow_mut().frames.push(RunFrame { program, pc: 0, upvalues });
    drive(thread, env)
}

/// Continue driving a thread whose frame chain was left suspended by a
/// prior `Yield` (spec §4.8: "a subsequent call into the suspended
/// thread resumes at the yield point"). `thread.frames` already holds
/// the exact point execution stopped at; this just keeps driving it.
pub fn resume_program(thread: &Rc<RefCell<Thread>>, env: &Rc<ExecEnv>) -> Result<RunOutcome, BangError> {
    debug_assert!(!thread.borrow().frames.is_empty(), "resume_program: nothing to resume");
    drive(thread, env)
}

enum Control {
    Continue,
    Break,
    Yield,
}

/// The core loop: repeatedly inspect the top frame on `thread.frames`,
/// execute its current instruction, and either keep going, pop a
/// completed frame (resuming the caller frame beneath it, if any), or
/// stop for a suspension. A non-tail apply to a `BoundFun` *pushes* a
/// frame instead of recursing into this function again — that's what
/// keeps the whole call chain addressable through `thread.frames` alone,
/// which `Yield`/`resume` depend on.
fn drive(thread: &Rc<RefCell<Thread>>, env: &Rc<ExecEnv>) -> Result<RunOutcome, BangError> {
    loop {
        let (done, where_) = {
            let t = thread.borrow();
            let frame = t.frames.last().expect("drive: frame chain vanished");
            if frame.pc >= frame.program.instrs.len() {
                (true, None)
            } else {
                (false, Some(frame.program.instrs[frame.pc].where_.clone()))
            }
        };

        if done {
            match pop_and_resume_caller(thread) {
                Some(final_upvalues) => return Ok(RunOutcome::Completed(final_upvalues)),
                None => continue,
            }
        }

        let where_ = where_.unwrap();
        match step(thread, env, &where_) {
            Ok(Control::Continue) => continue,
            Ok(Control::Break) => match pop_and_resume_caller(thread) {
                Some(final_upvalues) => return Ok(RunOutcome::Completed(final_upvalues)),
                None => continue,
            },
            Ok(Control::Yield) => return Ok(RunOutcome::Yielded),
            Err(e) => {
                // Unwind every frame this `drive` call pushed; the error
                // propagates to whatever (host or `resume`) called us.
                thread.borrow_mut().frames.clear();
                return Err(e.with_where(&where_));
            }
        }
    }
}

/// Pop the completed top frame. If a caller frame remains beneath it,
/// advance past its (now-returned-from) apply instruction and report
/// "keep driving" (`None`); otherwise report the popped frame's final
/// upvalue chain as the whole drive's result (`Some`).
fn pop_and_resume_caller(thread: &Rc<RefCell<Thread>>) -> Option<Option<Rc<Upvalue>>> {
    let mut t = thread.borrow_mut();
    let finished = t.frames.pop().expect("pop_and_resume_caller: no frame to pop");
    if let Some(parent) = t.frames.last_mut() {
        parent.pc += 1;
        None
    } else {
        Some(finished.upvalues)
    }
}

/// Execute the instruction at the current (top) frame's cursor, mutating
/// that frame or pushing a new one as needed.
fn step(thread: &Rc<RefCell<Thread>>, env: &Rc<ExecEnv>, where_: &Rc<str>) -> Result<Control, BangError> {
    // Pull out just enough of the current instruction to decide what to
    // do; the borrow ends before any further mutation.
    enum Decision {
        PushLiteral(Value),
        PushPrimitive(crate::value::PrimitiveFn, &'static str),
        ApplyPrimitive(crate::value::PrimitiveFn, &'static str),
        PushUpval(NthParent),
        ApplyUpval(NthParent, bool),
        PushUpvalByName,
        PushFun { program: Rc<Program>, param: Option<Rc<str>>, binder_id: u32 },
        PushFunctionRec { program: std::rc::Weak<Program>, param: Option<Rc<str>>, binder_id: u32 },
        Apply(bool),
        ConditionalApply(bool),
        Require,
        CloseValue(Rc<str>, u32),
        BreakProg,
        EofMarker,
        NoOp,
    }

    let decision = {
        let t = thread.borrow();
        let frame = t.frames.last().unwrap();
        match &frame.program.instrs[frame.pc].tag {
            Tag::PushLiteral(v) => Decision::PushLiteral(v.clone()),
            Tag::PushPrimitive(f, n) => Decision::PushPrimitive(*f, *n),
            Tag::ApplyPrimitive(f, n) => Decision::ApplyPrimitive(*f, *n),
            Tag::PushUpval(_, n) => Decision::PushUpval(*n),
            Tag::ApplyUpval(_, n) => Decision::ApplyUpval(*n, false),
            Tag::TailApplyUpval(_, n) => Decision::ApplyUpval(*n, true),
            Tag::PushUpvalByName => Decision::PushUpvalByName,
            Tag::PushFun { program, param, binder_id } => {
                Decision::PushFun { program: program.clone(), param: param.clone(), binder_id: *binder_id }
            }
            Tag::PushFunctionRec { program, param, binder_id } => Decision::PushFunctionRec {
                program: program.clone(),
                param: param.clone(),
                binder_id: *binder_id,
            },
            Tag::Apply => Decision::Apply(false),
            Tag::TailApply => Decision::Apply(true),
            Tag::ConditionalApply => Decision::ConditionalApply(false),
            Tag::TailConditionalApply => Decision::ConditionalApply(true),
            Tag::Require => Decision::Require,
            Tag::CloseValue(name, id) => Decision::CloseValue(name.clone(), *id),
            Tag::BreakProg => Decision::BreakProg,
            Tag::EofMarker => Decision::EofMarker,
            Tag::NoOp => Decision::NoOp,
        }
    };

    match decision {
        Decision::PushLiteral(v) => {
            let mut t = thread.borrow_mut();
            t.stack.push(v);
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::PushPrimitive(f, _name) => {
            let mut t = thread.borrow_mut();
            t.stack.push(Value::Primitive(f));
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::ApplyPrimitive(f, _name) => {
            let yielded = call_primitive(thread, env, f, where_)?;
            advance(&mut thread.borrow_mut());
            Ok(if yielded { Control::Yield } else { Control::Continue })
        }
        Decision::PushUpval(n) => {
            let mut t = thread.borrow_mut();
            let chain = t.frames.last().unwrap().upvalues.clone();
            let chain = chain.expect("PushUpval with no upvalue chain");
            let v = chain.get(n).clone();
            t.stack.push(v);
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::ApplyUpval(n, tail) => {
            let chain = thread.borrow().frames.last().unwrap().upvalues.clone();
            let v = chain.expect("ApplyUpval with no upvalue chain").get(n).clone();
            apply_value(thread, env, v, tail, where_)
        }
        Decision::PushUpvalByName => {
            let mut t = thread.borrow_mut();
            let name = t.stack.pop()?;
            let name = name.as_str()?.as_str().to_string();
            let chain = t.frames.last().unwrap().upvalues.clone();
            let v = chain
                .as_ref()
                .and_then(|c| c.find_by_name(&name))
                .cloned()
                .ok_or_else(|| BangError::runtime("", format!("no such binding: {}", name)))?;
            t.stack.push(v);
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::PushFun { program, param, binder_id: _ } => {
            let mut t = thread.borrow_mut();
            let chain = t.frames.last().unwrap().upvalues.clone();
            let _ = param;
            let bound = BoundProgram { program, upvalues: chain };
            t.stack.push(Value::BoundFun(Rc::new(bound)));
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::PushFunctionRec { program, param, binder_id } => {
            let program = program.upgrade().expect("PushFunctionRec: defining program dropped");
            let mut t = thread.borrow_mut();
            let current = t.frames.last().unwrap().upvalues.clone();
            let rooted = lexical_match(current.clone(), binder_id).or(current);
            let _ = param;
            let bound = BoundProgram { program, upvalues: rooted };
            t.stack.push(Value::BoundFun(Rc::new(bound)));
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::Apply(tail) => {
            let callee = thread.borrow_mut().stack.pop()?;
            apply_value(thread, env, callee, tail, where_)
        }
        Decision::ConditionalApply(tail) => {
            let (cond, callee) = {
                let mut t = thread.borrow_mut();
                let callee = t.stack.pop()?;
                let cond = t.stack.pop()?;
                (cond, callee)
            };
            if cond.as_bool() {
                apply_value(thread, env, callee, tail, where_)
            } else {
                advance(&mut thread.borrow_mut());
                Ok(Control::Continue)
            }
        }
        Decision::Require => {
            let filename = {
                let mut t = thread.borrow_mut();
                t.stack.pop()?.as_str()?.as_str().to_string()
            };
            let value = if let Some(open_fn) = env.libraries.get(&filename) {
                log::debug!("require '{}' resolved against the built-in library table", filename);
                Value::Primitive(open_fn)
            } else {
                let path = resolve_require_path(&env.base_dir, &filename);
                log::debug!("require '{}' resolved to file {}", filename, path.display());
                let src = std::fs::read_to_string(&path)?;
                let mut program = crate::parser::parse_toplevel(&src, path.display().to_string())?;
                crate::optimizer::optimize(&mut program);
                Value::BoundFun(Rc::new(BoundProgram {
                    program: Rc::new(program),
                    upvalues: None,
                }))
            };
            let mut t = thread.borrow_mut();
            t.stack.push(value);
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::CloseValue(name, id) => {
            let mut t = thread.borrow_mut();
            let value = t.stack.pop()?;
            let parent = t.frames.last().unwrap().upvalues.clone();
            let frame = Upvalue::new(BinderTag { name, id }, parent, value);
            t.frames.last_mut().unwrap().upvalues = Some(frame);
            advance(&mut t);
            Ok(Control::Continue)
        }
        Decision::BreakProg => Ok(Control::Break),
        Decision::EofMarker => Ok(Control::Break),
        Decision::NoOp => {
            advance(&mut thread.borrow_mut());
            Ok(Control::Continue)
        }
    }
}

fn advance(t: &mut Thread) {
    t.frames.last_mut().unwrap().pc += 1;
}

/// Call a primitive against the current frame's thread/stack, reporting
/// whether it asked to suspend the thread via `RunContext::yield_flag`
/// (spec §4.8's `Yield`). Used by both the fused `ApplyPrimitive` form
/// and `apply_value`'s `Value::Primitive` case.
fn call_primitive(
    thread: &Rc<RefCell<Thread>>,
    env: &Rc<ExecEnv>,
    f: crate::value::PrimitiveFn,
    where_: &Rc<str>,
) -> Result<bool, BangError> {
    let yield_flag = Rc::new(Cell::new(false));
    let ctx = RunContext {
        where_: where_.clone(),
        thread: thread.clone(),
        env: env.clone(),
        yield_flag: yield_flag.clone(),
    };
    {
        let mut t = thread.borrow_mut();
        f(&mut t.stack, &ctx)?;
    }
    Ok(yield_flag.get())
}

/// Apply any callable `Value` (spec §4.5 step 3). A tail-marked apply to
/// a `BoundFun` mutates the current frame in place; any other apply to a
/// `BoundFun` pushes a new frame onto `thread.frames` and lets the outer
/// `drive` loop pick it up next iteration.
fn apply_value(
    thread: &Rc<RefCell<Thread>>,
    env: &Rc<ExecEnv>,
    callee: Value,
    tail: bool,
    where_: &Rc<str>,
) -> Result<Control, BangError> {
    match callee {
        Value::Primitive(f) => {
            let yielded = call_primitive(thread, env, f, where_)?;
            advance(&mut thread.borrow_mut());
            Ok(if yielded { Control::Yield } else { Control::Continue })
        }
        Value::Fun(obj) => {
            let ctx = RunContext {
                where_: where_.clone(),
                thread: thread.clone(),
                env: env.clone(),
                yield_flag: Rc::new(Cell::new(false)),
            };
            {
                let mut t = thread.borrow_mut();
                obj.apply(&mut t.stack, &ctx)?;
            }
            advance(&mut thread.borrow_mut());
            Ok(Control::Continue)
        }
        Value::BoundFun(bound) => {
            if tail {
                log::debug!("tail call at {}: reusing run frame in place", where_);
                let mut t = thread.borrow_mut();
                let frame = t.frames.last_mut().unwrap();
                frame.program = bound.program.clone();
                frame.pc = 0;
                frame.upvalues = bound.upvalues.clone();
            } else {
                thread.borrow_mut().frames.push(RunFrame {
                    program: bound.program.clone(),
                    pc: 0,
                    upvalues: bound.upvalues.clone(),
                });
            }
            Ok(Control::Continue)
        }
        other => Err(BangError::runtime(
            "",
            format!("attempt to apply a non-callable value ({})", other.type_name()),
        )),
    }
}

fn resolve_require_path(base_dir: &Path, name: &str) -> PathBuf {
    let mut p = PathBuf::from(name);
    if p.extension().is_none() {
        p.set_extension("bang");
    }
    if p.is_relative() {
        base_dir.join(p)
    } else {
        p
    }
}
