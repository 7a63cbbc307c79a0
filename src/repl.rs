//! # Interactive REPL
//!
//! Grounded on the original `bangmain.cpp`'s in-process prompt loop
//! (`RegurgeStdinRepl`, `BangmainParsingContext`), not on a subprocess
//! re-spawn: Bang!'s closures and upvalue chains need to persist across
//! prompts (spec.md §4.5/§4.8), which a "write to a temp file and re-exec
//! the binary" strategy cannot give you. See `DESIGN.md` for the
//! grounding decision this revises.
//!
//! [`RegurgeStdinRepl`] is a [`CharSource`] that transparently fetches a
//! new line from stdin (printing a prompt) whenever its current line is
//! exhausted, so a `{ ... }` block or a `def ... ; ... ;` spanning several
//! physical lines parses exactly as it would from a file — the parser
//! never sees an artificial end-of-input mid-production. [`run_repl`]
//! instead parses and runs one top-level item at a time
//! ([`Parser::parse_item_or_eof`]), threading the resulting upvalue chain
//! from one prompt into the next so bindings introduced by an earlier
//! prompt resolve in a later one (spec.md §4.3's `EofMarker`, §4.12).

use std::cell::Cell;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::rc::Rc;

use log::{trace, warn};

use crate::ast::Program;
use crate::interp::{run_program, ExecEnv, RunOutcome, Thread};
use crate::lexer::{CharSource, CharStream};
use crate::optimizer::optimize;
use crate::parser::Parser;
use crate::upvalue::Upvalue;
use crate::BANG_VERSION;

/// A `CharSource` over stdin, one line at a time. The REPL prints a fresh
/// `>>> ` prompt for the first physical line of each top-level item, and
/// `... ` for every further line that same item's parse needs (a `{ ... }`
/// block or `def ... ;` spanning several lines). `at_item_start` is shared
/// with `run_repl`, which re-arms it to `true` before parsing each new
/// item — the flag isn't owned end-to-end by this struct because only the
/// REPL driver loop knows when one top-level item ends and the next begins.
struct RegurgeStdinRepl {
    pending: Vec<char>,
    at_item_start: Rc<Cell<bool>>,
    exhausted: bool,
}

impl RegurgeStdinRepl {
    fn new(at_item_start: Rc<Cell<bool>>) -> Self {
        RegurgeStdinRepl { pending: Vec::new(), at_item_start, exhausted: false }
    }
}

impl CharSource for RegurgeStdinRepl {
    fn next_char(&mut self) -> Option<char> {
        loop {
            if let Some(c) = self.pending.pop() {
                return Some(c);
            }
            if self.exhausted {
                return None;
            }
            let prompt = if self.at_item_start.get() { ">>> " } else { "... " };
            print!("{}", prompt);
            let _ = io::stdout().flush();

            let mut line = String::new();
            let n = io::stdin().lock().read_line(&mut line).unwrap_or(0);
            if n == 0 {
                self.exhausted = true;
                return None;
            }
            self.at_item_start.set(false);
            // Feed characters back in forward order; `pending` is popped
            // from the tail, so push in reverse.
            self.pending.extend(line.chars().rev());
        }
    }
}

/// Run the interactive prompt until the user ends the session (Ctrl-D).
pub fn run_repl(base_dir: PathBuf) {
    eprintln!("Bang! v{} - Welcome!", BANG_VERSION);

    let at_item_start = Rc::new(Cell::new(true));
    let stream = CharStream::new(Box::new(RegurgeStdinRepl::new(at_item_start.clone())), "<repl>");
    let mut parser = Parser::new_interactive(stream);
    let thread = Thread::new();
    let env = Rc::new(ExecEnv::new(base_dir));
    let mut upvalues: Option<Rc<Upvalue>> = None;

    loop {
        trace!("repl: awaiting next top-level item");
        at_item_start.set(true);
        let item = match parser.parse_item_or_eof() {
            Ok(None) => break,
            Ok(Some(instrs)) => instrs,
            Err(e) => {
                eprintln!("{}", e);
                warn!("repl parse error: {}", e);
                continue;
            }
        };

        let mut program = Program::new(item);
        optimize(&mut program);
        trace!("repl: evaluating parsed item");

        match run_program(&thread, Rc::new(program), upvalues.clone(), &env) {
            Ok(RunOutcome::Completed(next_upvalues)) => {
                upvalues = next_upvalues;
                if let Ok(top) = thread.borrow().stack.top() {
                    println!("{}", top);
                }
            }
            Ok(RunOutcome::Yielded) => {
                // The main thread has no caller to resume it, so `yield`
                // itself refuses to suspend it (see `coroutine::do_yield`);
                // this arm only exists because `run_program`'s return type
                // always carries the possibility.
                warn!("repl: top-level item suspended unexpectedly");
            }
            Err(e) => {
                eprintln!("{}", e);
                warn!("repl runtime error: {}", e);
            }
        }
    }

    eprintln!("toodaloo!");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regurg_stdin_repl_reports_exhaustion_without_stdin() {
        // No stdin content is read in this test path: pending starts
        // empty and `exhausted` is only set after a failed real read, so
        // this just exercises the struct's initial state wiring.
        let source = RegurgeStdinRepl::new(Rc::new(Cell::new(true)));
        assert!(source.pending.is_empty());
        assert!(source.at_item_start.get());
    }
}
