//! # Recursive-Descent Parser
//!
//! Turns a character stream into an [`ast::Program`] (spec §4.2). Each
//! production opens a [`StreamMark`] over the current stream, tries to
//! match, and either accepts (keeping what it consumed) or lets the mark
//! unwind on drop — this is the backtracking substrate `lexer.rs`
//! provides, used here exactly as intended rather than re-implemented.
//!
//! Name resolution happens at parse time: `scopes` tracks the chain of
//! enclosing binders (one entry per `fun`/`def` parameter, innermost
//! last) so a plain identifier reference resolves to a `NthParent` depth
//! instead of a name lookup; `rec_frames` separately tracks `def` bodies
//! currently being parsed, so a self-reference inside one compiles to
//! `PushFunctionRec` instead of an ordinary upvalue read (spec §4.2's
//! "linked list of `(defining_fun, binding_fun)` frames").

use std::rc::{Rc, Weak};

use crate::ast::{next_id, Node, Program, Tag};
use crate::error::BangError;
use crate::lexer::{is_ident_continue, is_ident_start, CharStream, StreamMark};
use crate::primitives;
use crate::value::{NthParent, Value};

/// One lexically enclosing binder, visible while parsing its body.
struct Scope {
    name: Rc<str>,
    id: u32,
}

/// One `def` body currently being parsed, for name-based recursion.
struct RecFrame {
    name: Rc<str>,
    binder_id: u32,
    program: Weak<Program>,
}

pub struct Parser {
    stream: CharStream,
    scopes: Vec<Scope>,
    rec_frames: Vec<RecFrame>,
}

/// Parse a complete top-level program from source text (spec §4.2's
/// driver loop: productions tried in order until end of input).
pub fn parse_toplevel(src: &str, name: impl Into<String>) -> Result<Program, BangError> {
    let mut parser = Parser {
        stream: CharStream::from_str(src, name),
        scopes: Vec::new(),
        rec_frames: Vec::new(),
    };
    let instrs = parser.parse_body(Terminator::Eof)?;
    Ok(Program::new(instrs))
}

#[derive(Clone, Copy, PartialEq)]
enum Terminator {
    Semicolon,
    CloseBrace,
    Eof,
}

/// A single lexical token, stripped of whitespace and comments.
enum Lexeme {
    Word(String),
    Number(f64),
    Str(String),
    Op(char),
    Eof,
}

impl Parser {
    /// Build a parser driven by an interactive source (spec §4.12's REPL
    /// grounding). Scopes and recursion frames persist across repeated
    /// [`Parser::parse_item_or_eof`] calls, so a `def` parsed at one
    /// prompt stays resolvable by name at a later one, exactly as if the
    /// whole session were one continuous top-level body.
    pub fn new_interactive(stream: CharStream) -> Self {
        Parser { stream, scopes: Vec::new(), rec_frames: Vec::new() }
    }

    /// Parse exactly one top-level production (spec §4.2's table), for
    /// the REPL driver. `Ok(None)` means the underlying character source
    /// is genuinely exhausted (the interactive session ended); otherwise
    /// the returned instructions end with an `EofMarker` rather than
    /// falling off the end of a whole-file `Program`, so the run loop's
    /// completion path is the same one `BreakProg` takes in file mode
    /// (spec §4.3, §4.12).
    pub fn parse_item_or_eof(&mut self) -> Result<Option<Vec<Node>>, BangError> {
        let where_ = self.stream.say_where();
        let lex = self.next_lexeme()?;
        if matches!(lex, Lexeme::Eof) {
            return Ok(None);
        }
        let mut instrs = self.parse_item(lex, where_.clone())?;
        instrs.push(Node::new(Tag::EofMarker, where_));
        Ok(Some(instrs))
    }

    /// Parse instructions until `term` is consumed (or, for `Eof`, until
    /// the stream is exhausted). The terminator token itself is eaten
    /// except at `Eof`, where there's nothing to eat.
    fn parse_body(&mut self, term: Terminator) -> Result<Vec<Node>, BangError> {
        let mut instrs = Vec::new();
        loop {
            let where_ = self.stream.say_where();
            let lex = self.next_lexeme()?;
            match (&lex, term) {
                (Lexeme::Eof, Terminator::Eof) => break,
                (Lexeme::Eof, _) => {
                    return Err(BangError::parse_fail(where_, "unexpected end of file"))
                }
                (Lexeme::Op(';'), Terminator::Semicolon) => break,
                (Lexeme::Op('}'), Terminator::CloseBrace) => break,
                _ => {}
            }
            instrs.extend(self.parse_item(lex, where_)?);
        }
        Ok(instrs)
    }

    fn parse_item(&mut self, lex: Lexeme, where_: String) -> Result<Vec<Node>, BangError> {
        match lex {
            Lexeme::Str(s) => Ok(vec![Node::new(Tag::PushLiteral(Value::Str(s.into())), where_)]),
            Lexeme::Number(n) => Ok(vec![Node::new(Tag::PushLiteral(Value::Num(n)), where_)]),
            Lexeme::Word(w) => self.parse_word(w, where_),
            Lexeme::Op('!') => Ok(vec![Node::new(Tag::Apply, where_)]),
            Lexeme::Op('?') => Ok(vec![Node::new(Tag::ConditionalApply, where_)]),
            Lexeme::Op('.') => self.parse_dot(where_),
            Lexeme::Op('{') => self.parse_block(where_),
            Lexeme::Op(c @ ('+' | '-' | '*' | '/' | '%' | '<' | '>' | '=' | '#' | '(' | ')')) => {
                // Single-character operator primitives auto-apply (unlike
                // the reserved-word primitives below, which are left on
                // the stack for the caller to `!` explicitly).
                let prim = self.push_primitive(op_name(c), where_.clone());
                Ok(vec![prim, Node::new(Tag::Apply, where_)])
            }
            Lexeme::Op(c) => Err(BangError::parse_fail(where_, format!("unexpected character '{}'", c))),
            Lexeme::Eof => unreachable!("Eof handled by caller"),
        }
    }

    fn parse_word(&mut self, w: String, where_: String) -> Result<Vec<Node>, BangError> {
        match w.as_str() {
            "true" => Ok(vec![Node::new(Tag::PushLiteral(Value::Bool(true)), where_)]),
            "false" => Ok(vec![Node::new(Tag::PushLiteral(Value::Bool(false)), where_)]),
            "fun" => self.parse_fun(where_, false),
            "fun!" => self.parse_fun(where_, true),
            "as" => self.parse_fun(where_, false),
            "def" => self.parse_def(where_),
            "require" => Ok(vec![Node::new(Tag::Require, where_)]),
            "lookup" => Ok(vec![Node::new(Tag::PushUpvalByName, where_)]),
            "not" => Ok(vec![self.push_primitive("not", where_)]),
            "and" => Ok(vec![self.push_primitive("and", where_)]),
            "or" => Ok(vec![self.push_primitive("or", where_)]),
            "drop" => Ok(vec![self.push_primitive("drop", where_)]),
            "swap" => Ok(vec![self.push_primitive("swap", where_)]),
            "dup" => Ok(vec![self.push_primitive("dup", where_)]),
            "nth" => Ok(vec![self.push_primitive("nth", where_)]),
            "save-stack" => Ok(vec![self.push_primitive("save-stack", where_)]),
            "stack-to-array" => Ok(vec![self.push_primitive("stack-to-array", where_)]),
            _ => self.resolve_identifier(&w, where_),
        }
    }

    fn push_primitive(&self, name: &'static str, where_: String) -> Node {
        let f = primitives::lookup(name).unwrap_or_else(|| panic!("no such primitive '{}'", name));
        Node::new(Tag::PushPrimitive(f, name), where_)
    }

    /// `.ident` — spec §4.2: `PushLiteral(Str "ident"), Swap, Apply`.
    fn parse_dot(&mut self, where_: String) -> Result<Vec<Node>, BangError> {
        let mark = StreamMark::new(&mut self.stream);
        let word = read_ident(mark)?.ok_or_else(|| {
            BangError::parse_fail(where_.clone(), "expected identifier after '.'")
        })?;
        let swap = primitives::lookup("swap").expect("swap is always registered");
        Ok(vec![
            Node::new(Tag::PushLiteral(Value::Str(word.into())), where_.clone()),
            Node::new(Tag::ApplyPrimitive(swap, "swap"), where_.clone()),
            Node::new(Tag::Apply, where_),
        ])
    }

    /// A bare `{ ... }` block: an anonymous, zero-parameter function
    /// literal, immediately left on the stack (not auto-applied) — the
    /// caller decides whether/when to `!` it (e.g. the two branches of
    /// `cond ? !`).
    fn parse_block(&mut self, where_: String) -> Result<Vec<Node>, BangError> {
        let instrs = self.parse_body(Terminator::CloseBrace)?;
        let program = Rc::new(Program::new(instrs));
        Ok(vec![Node::new(
            Tag::PushFun { program, param: None, binder_id: next_id() },
            where_,
        )])
    }

    /// `fun <param>? = body ;` (and `fun! .../`as .../...`, identical
    /// except `fun!` also applies immediately). The teacher reserves
    /// `as` as a second spelling of `fun` (spec §4.2 lists `fun` / `fun!`
    /// / `as` together as one production); this crate treats all three
    /// uniformly, recorded as an Open Question resolution in DESIGN.md.
    fn parse_fun(&mut self, where_: String, auto_apply: bool) -> Result<Vec<Node>, BangError> {
        let param = {
            let mark = StreamMark::new(&mut self.stream);
            read_ident(mark)?
        };
        self.expect_op('=')?;
        let binder_id = next_id();
        let param_rc: Option<Rc<str>> = param.map(Rc::from);
        if let Some(p) = &param_rc {
            self.scopes.push(Scope { name: p.clone(), id: binder_id });
        }
        let mut instrs = Vec::new();
        if let Some(p) = &param_rc {
            instrs.push(Node::new(Tag::CloseValue(p.clone(), binder_id), where_.clone()));
        }
        let body = self.parse_body(Terminator::Semicolon)?;
        instrs.extend(body);
        if param_rc.is_some() {
            self.scopes.pop();
        }
        let program = Rc::new(Program::new(instrs));
        let mut out = vec![Node::new(
            Tag::PushFun { program, param: param_rc, binder_id },
            where_.clone(),
        )];
        if auto_apply {
            out.push(Node::new(Tag::Apply, where_));
        }
        Ok(out)
    }

    /// `def :name arg = body ; rest` — see module docs and `interp.rs`
    /// for how `binder_id` doubles as the `lexical_match` key that keeps
    /// tail-recursive `def`s from growing their upvalue chain forever.
    fn parse_def(&mut self, where_: String) -> Result<Vec<Node>, BangError> {
        self.expect_op(':')?;
        let name = {
            let mark = StreamMark::new(&mut self.stream);
            read_ident(mark)?.ok_or_else(|| {
                BangError::parse_fail(where_.clone(), "expected a name after 'def :'")
            })?
        };
        let name: Rc<str> = Rc::from(name);
        let arg = {
            let mark = StreamMark::new(&mut self.stream);
            read_ident(mark)?
        };
        self.expect_op('=')?;

        let arg_binder_id = next_id();
        let arg_rc: Option<Rc<str>> = arg.map(Rc::from);

        // Build the body as a self-referential Rc so identifiers inside
        // it that name the def can point back at it via a Weak handle
        // (spec §9: "a weak-or-positional reference to the defining
        // program, not a strong field").
        let body_rc: Result<Rc<Program>, BangError> = {
            let mut build_err: Option<BangError> = None;
            let rc = Rc::new_cyclic(|weak: &Weak<Program>| {
                if let Some(a) = &arg_rc {
                    self.scopes.push(Scope { name: a.clone(), id: arg_binder_id });
                }
                self.rec_frames.push(RecFrame {
                    name: name.clone(),
                    binder_id: arg_binder_id,
                    program: weak.clone(),
                });
                let mut instrs = Vec::new();
                if let Some(a) = &arg_rc {
                    instrs.push(Node::new(Tag::CloseValue(a.clone(), arg_binder_id), where_.clone()));
                }
                match self.parse_body(Terminator::Semicolon) {
                    Ok(body) => instrs.extend(body),
                    Err(e) => build_err = Some(e),
                }
                self.rec_frames.pop();
                if arg_rc.is_some() {
                    self.scopes.pop();
                }
                let mut program = Program::new(instrs);
                crate::optimizer::optimize(&mut program);
                program
            });
            match build_err {
                Some(e) => Err(e),
                None => Ok(rc),
            }
        };
        let body_rc = body_rc?;

        // `rest` sees `name` as an ordinary upvalue binding (the def's
        // own closure, just pushed).
        let name_binder_id = next_id();
        self.scopes.push(Scope { name: name.clone(), id: name_binder_id });
        let rest_body = self.parse_body(Terminator::Semicolon);
        self.scopes.pop();
        let rest_body = rest_body?;

        let mut rest_instrs = vec![Node::new(
            Tag::CloseValue(name.clone(), name_binder_id),
            where_.clone(),
        )];
        rest_instrs.extend(rest_body);
        let rest_program = Rc::new(Program::new(rest_instrs));

        Ok(vec![
            Node::new(
                Tag::PushFun { program: body_rc, param: arg_rc, binder_id: arg_binder_id },
                where_.clone(),
            ),
            Node::new(
                Tag::PushFun {
                    program: rest_program,
                    param: Some(name.clone()),
                    binder_id: name_binder_id,
                },
                where_.clone(),
            ),
            Node::new(Tag::Apply, where_),
        ])
    }

    /// Plain identifier fallback (spec §4.2's last row): resolves via the
    /// `def`-recursion frames first, then ordinary lexical scope, else a
    /// parse-time "unbound identifier" error.
    fn resolve_identifier(&self, name: &str, where_: String) -> Result<Vec<Node>, BangError> {
        for rec in self.rec_frames.iter().rev() {
            if rec.name.as_ref() == name {
                return Ok(vec![Node::new(
                    Tag::PushFunctionRec {
                        program: rec.program.clone(),
                        param: None,
                        binder_id: rec.binder_id,
                    },
                    where_,
                )]);
            }
        }
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.name.as_ref() == name {
                return Ok(vec![Node::new(
                    Tag::PushUpval(scope.name.clone(), NthParent(depth as u32)),
                    where_,
                )]);
            }
        }
        Err(BangError::parse_fail(where_, format!("unbound identifier '{}'", name)))
    }

    fn expect_op(&mut self, expected: char) -> Result<(), BangError> {
        let where_ = self.stream.say_where();
        match self.next_lexeme()? {
            Lexeme::Op(c) if c == expected => Ok(()),
            _ => Err(BangError::parse_fail(where_, format!("expected '{}'", expected))),
        }
    }

    fn next_lexeme(&mut self) -> Result<Lexeme, BangError> {
        loop {
            let c = match self.stream.getc() {
                Ok(c) => c,
                Err(_) => return Ok(Lexeme::Eof),
            };
            if c.is_whitespace() {
                continue;
            }
            if c == '-' {
                match self.stream.getc() {
                    Ok('-') => {
                        loop {
                            match self.stream.getc() {
                                Ok('\n') | Err(_) => break,
                                _ => {}
                            }
                        }
                        continue;
                    }
                    Ok(c2) => {
                        self.stream.regurg(c2);
                        return Ok(Lexeme::Op('-'));
                    }
                    Err(_) => return Ok(Lexeme::Op('-')),
                }
            }
            if c == '\'' || c == '"' {
                let mut s = String::new();
                loop {
                    match self.stream.getc() {
                        Ok(d) if d == c => break,
                        Ok(d) => s.push(d),
                        Err(_) => {
                            return Err(BangError::parse_fail(
                                self.stream.say_where(),
                                "unterminated string literal",
                            ))
                        }
                    }
                }
                return Ok(Lexeme::Str(s));
            }
            if c.is_ascii_digit() {
                let mut s = String::new();
                s.push(c);
                let mut seen_dot = false;
                loop {
                    match self.stream.getc() {
                        Ok(d) if d.is_ascii_digit() => s.push(d),
                        Ok('.') if !seen_dot => {
                            seen_dot = true;
                            s.push('.');
                        }
                        Ok(d) => {
                            self.stream.regurg(d);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                let n: f64 = s.parse().map_err(|_| {
                    BangError::parse_fail(self.stream.say_where(), format!("bad number literal '{}'", s))
                })?;
                return Ok(Lexeme::Number(n));
            }
            if is_ident_start(c) {
                let mut s = String::new();
                s.push(c);
                loop {
                    match self.stream.getc() {
                        Ok(d) if is_ident_continue(d) => s.push(d),
                        Ok('-') => {
                            match self.stream.getc() {
                                Ok(d2) if d2.is_ascii_alphabetic() => {
                                    s.push('-');
                                    s.push(d2);
                                }
                                Ok(d2) => {
                                    self.stream.regurg(d2);
                                    self.stream.regurg('-');
                                    break;
                                }
                                Err(_) => {
                                    self.stream.regurg('-');
                                    break;
                                }
                            }
                        }
                        Ok(d) => {
                            self.stream.regurg(d);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                if s == "fun" {
                    // Peek for the `!` spelling, `fun!`.
                    match self.stream.getc() {
                        Ok('!') => return Ok(Lexeme::Word("fun!".to_string())),
                        Ok(d) => {
                            self.stream.regurg(d);
                            return Ok(Lexeme::Word(s));
                        }
                        Err(_) => return Ok(Lexeme::Word(s)),
                    }
                }
                return Ok(Lexeme::Word(s));
            }
            return Ok(Lexeme::Op(c));
        }
    }
}

fn op_name(c: char) -> &'static str {
    match c {
        '+' => "+",
        '-' => "-",
        '*' => "*",
        '/' => "/",
        '%' => "%",
        '<' => "<",
        '>' => ">",
        '=' => "=",
        '#' => "#",
        '(' => "(",
        ')' => ")",
        _ => unreachable!("op_name called with non-operator char"),
    }
}

/// Read a single identifier (used for `fun`/`def` parameter names, and
/// the `.ident` production), backtracking cleanly if none is present.
fn read_ident(mut mark: StreamMark<'_>) -> Result<Option<String>, BangError> {
    let c = match mark.getc() {
        Ok(c) => c,
        Err(_) => return Ok(None),
    };
    if !is_ident_start(c) {
        return Ok(None);
    }
    let mut s = String::new();
    s.push(c);
    loop {
        match mark.getc() {
            Ok(d) if is_ident_continue(d) => s.push(d),
            Ok(d) => {
                mark.regurg(d);
                break;
            }
            Err(_) => break,
        }
    }
    mark.accept();
    Ok(Some(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_toplevel(src, "test").unwrap()
    }

    #[test]
    fn parses_number_literal() {
        let p = parse("42");
        assert_eq!(p.instrs.len(), 1);
        assert!(matches!(p.instrs[0].tag, Tag::PushLiteral(Value::Num(n)) if n == 42.0));
    }

    #[test]
    fn parses_string_literal_either_quote() {
        let p = parse("'hi' \"there\"");
        assert_eq!(p.instrs.len(), 2);
    }

    #[test]
    fn comments_are_discarded() {
        let p = parse("-- a comment\n5");
        assert_eq!(p.instrs.len(), 1);
    }

    #[test]
    fn unbound_identifier_is_a_parse_error() {
        assert!(parse_toplevel("nope", "test").is_err());
    }

    #[test]
    fn fun_binds_its_parameter() {
        let p = parse("fun x = x ;");
        assert_eq!(p.instrs.len(), 1);
        match &p.instrs[0].tag {
            Tag::PushFun { program, .. } => {
                assert!(matches!(program.instrs[0].tag, Tag::CloseValue(..)));
            }
            _ => panic!("expected PushFun"),
        }
    }

    #[test]
    fn def_compiles_to_two_pushfuns_and_an_apply() {
        let p = parse("def :f n = n ; 1 f !");
        assert!(matches!(p.instrs[0].tag, Tag::PushFun { .. }));
        assert!(matches!(p.instrs[1].tag, Tag::PushFun { .. }));
        assert!(matches!(p.instrs[2].tag, Tag::Apply));
    }

    #[test]
    fn fun_bang_auto_applies() {
        // Plain `fun x = x ;` just pushes a closure; `fun!` pushes and
        // immediately applies it, so it compiles to one extra `Apply`.
        let plain = parse("fun x = x ;");
        let banged = parse("fun! x = x ;");
        assert_eq!(plain.instrs.len(), 1);
        assert_eq!(banged.instrs.len(), 2);
        assert!(matches!(banged.instrs[1].tag, Tag::Apply));
    }

    #[test]
    fn as_is_an_alias_for_fun() {
        let fun_form = parse("fun x = x ;");
        let as_form = parse("as x = x ;");
        assert_eq!(fun_form.instrs.len(), as_form.instrs.len());
        assert!(matches!(as_form.instrs[0].tag, Tag::PushFun { .. }));
    }

    #[test]
    fn dot_member_access_desugars_to_push_swap_apply() {
        // `.ident` always compiles to PushLiteral(Str) / ApplyPrimitive
        // (swap) / Apply, assuming something callable already sits on the
        // stack from whatever came before the dot (spec §4.2's table).
        let p = parse("123 .foo");
        assert_eq!(p.instrs.len(), 4);
        assert!(matches!(p.instrs[0].tag, Tag::PushLiteral(Value::Num(n)) if n == 123.0));
        assert!(matches!(p.instrs[1].tag, Tag::PushLiteral(Value::Str(ref s)) if s.as_str() == "foo"));
        assert!(matches!(p.instrs[2].tag, Tag::ApplyPrimitive(_, "swap")));
        assert!(matches!(p.instrs[3].tag, Tag::Apply));
    }
}
