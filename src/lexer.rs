//! # Character Stream With Regurgitation
//!
//! [`CharStream`] is a pull-based character source over any [`CharSource`]
//! (a file's full text, or one REPL line at a time — see `repl.rs`) that
//! supports unlimited push-back of already-consumed characters. This is
//! the substrate the recursive-descent parser backtracks over.
//!
//! [`StreamMark`] is the backtracking primitive (spec §4.1): constructing
//! one records every character read through it; dropping it without a
//! prior [`StreamMark::accept`] regurgitates those characters in reverse,
//! restoring the stream to its pre-construction state. Marks nest — an
//! inner mark's unconsumed reads are also removed from any enclosing
//! mark's record, because every read is logged once to a single shared
//! buffer shared by all active marks, rather than duplicated per level;
//! that buffer is exactly equivalent to the C++ original's per-mark
//! `consumed_` buffers chained through `regurg`, with fewer moving parts.
//!
//! Constructing a mark, consuming K characters, and dropping without
//! `accept()` leaves the stream in its pre-construction state — this is
//! the load-bearing invariant the whole parser depends on.

use crate::error::ParseSignal;

/// A raw source of characters, without any push-back of its own.
pub trait CharSource {
    /// Returns the next character, or `None` at end of input.
    fn next_char(&mut self) -> Option<char>;
}

/// A `CharSource` over an entire in-memory string (a loaded file, or a
/// `require`d module's text).
pub struct StringSource {
    chars: Vec<char>,
    pos: usize,
}

impl StringSource {
    pub fn new(text: &str) -> Self {
        StringSource { chars: text.chars().collect(), pos: 0 }
    }
}

impl CharSource for StringSource {
    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }
}

pub struct CharStream {
    source: Box<dyn CharSource>,
    /// Characters explicitly regurgitated, read back before consulting
    /// `source` again. Acts as a stack: the last char pushed is the next
    /// one returned.
    base_pushback: Vec<char>,
    /// Every character consumed since the outermost currently-active
    /// mark was opened. Shared across all nested marks; an inner mark's
    /// undo pops from the tail of this log and therefore also "un-counts"
    /// it for any enclosing mark, matching the chained-regurg behavior of
    /// the original per-level buffers.
    log: Vec<char>,
    active_marks: u32,
    line: usize,
    col: usize,
    name: String,
}

impl CharStream {
    pub fn new(source: Box<dyn CharSource>, name: impl Into<String>) -> Self {
        CharStream {
            source,
            base_pushback: Vec::new(),
            log: Vec::new(),
            active_marks: 0,
            line: 1,
            col: 0,
            name: name.into(),
        }
    }

    pub fn from_str(text: &str, name: impl Into<String>) -> Self {
        CharStream::new(Box::new(StringSource::new(text)), name)
    }

    /// Read the next character, logging it for any active marks.
    /// Returns `Err(ParseSignal::EndOfFile)` on exhaustion.
    pub fn getc(&mut self) -> Result<char, ParseSignal> {
        let c = if let Some(c) = self.base_pushback.pop() {
            c
        } else {
            self.source.next_char().ok_or(ParseSignal::EndOfFile)?
        };
        if self.active_marks > 0 {
            self.log.push(c);
        }
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Ok(c)
    }

    /// Push a character back onto the head of the stream; the next
    /// `getc` returns it. Used when a production peeks one character too
    /// far and must undo that single read outside of full mark unwind.
    pub fn regurg(&mut self, c: char) {
        if self.active_marks > 0 {
            self.log.pop();
        }
        self.base_pushback.push(c);
    }

    /// A short human-readable location, for parse error messages.
    pub fn say_where(&self) -> String {
        format!("{}:{}:{}", self.name, self.line, self.col)
    }

    fn begin_mark(&mut self) -> usize {
        self.active_marks += 1;
        self.log.len()
    }

    fn end_mark(&mut self, start_len: usize, accepted: bool) {
        if !accepted {
            while self.log.len() > start_len {
                let c = self.log.pop().expect("mark start_len exceeds log length");
                self.base_pushback.push(c);
            }
        }
        self.active_marks -= 1;
        if self.active_marks == 0 {
            self.log.clear();
        }
    }
}

/// RAII backtracking scope. See module documentation.
pub struct StreamMark<'a> {
    stream: &'a mut CharStream,
    start_len: usize,
    accepted: bool,
}

impl<'a> StreamMark<'a> {
    pub fn new(stream: &'a mut CharStream) -> Self {
        let start_len = stream.begin_mark();
        StreamMark { stream, start_len, accepted: false }
    }

    pub fn getc(&mut self) -> Result<char, ParseSignal> {
        self.stream.getc()
    }

    pub fn regurg(&mut self, c: char) {
        self.stream.regurg(c)
    }

    pub fn say_where(&self) -> String {
        self.stream.say_where()
    }

    /// Open a nested mark borrowing this one as its source stream.
    pub fn nested(&mut self) -> StreamMark<'_> {
        StreamMark::new(self.stream)
    }

    /// Commit: the characters read through this mark stay consumed.
    pub fn accept(&mut self) {
        self.accepted = true;
    }
}

impl<'a> Drop for StreamMark<'a> {
    fn drop(&mut self) {
        self.stream.end_mark(self.start_len, self.accepted);
    }
}

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_dropped_without_accept_restores_stream() {
        let mut stream = CharStream::from_str("abc", "test");
        {
            let mut mark = StreamMark::new(&mut stream);
            assert_eq!(mark.getc().unwrap(), 'a');
            assert_eq!(mark.getc().unwrap(), 'b');
            // dropped here without accept()
        }
        assert_eq!(stream.getc().unwrap(), 'a');
        assert_eq!(stream.getc().unwrap(), 'b');
        assert_eq!(stream.getc().unwrap(), 'c');
    }

    #[test]
    fn mark_accepted_consumes_permanently() {
        let mut stream = CharStream::from_str("abc", "test");
        {
            let mut mark = StreamMark::new(&mut stream);
            assert_eq!(mark.getc().unwrap(), 'a');
            mark.accept();
        }
        assert_eq!(stream.getc().unwrap(), 'b');
    }

    #[test]
    fn nested_mark_unwind_also_restores_outer_record() {
        let mut stream = CharStream::from_str("abcd", "test");
        {
            let mut outer = StreamMark::new(&mut stream);
            assert_eq!(outer.getc().unwrap(), 'a');
            {
                let mut inner = outer.nested();
                assert_eq!(inner.getc().unwrap(), 'b');
                assert_eq!(inner.getc().unwrap(), 'c');
                // inner dropped without accept: 'b','c' regurgitated
            }
            // outer should now see 'b' again
            assert_eq!(outer.getc().unwrap(), 'b');
            outer.accept();
        }
        assert_eq!(stream.getc().unwrap(), 'c');
        assert_eq!(stream.getc().unwrap(), 'd');
    }

    #[test]
    fn end_of_file_signal() {
        let mut stream = CharStream::from_str("a", "test");
        assert_eq!(stream.getc().unwrap(), 'a');
        assert!(matches!(stream.getc(), Err(ParseSignal::EndOfFile)));
    }
}
