//! # Peephole Optimizer
//!
//! A single left-to-right pass over a freshly parsed [`Program`] (spec
//! §4.4). Fuses `(PushPrimitive, Apply)` and `(PushUpval, Apply)` pairs
//! into their single-instruction `Apply*` forms, sweeps the `NoOp`s that
//! fusion leaves behind, then rewrites the program's final instruction
//! into its tail-call form if it is apply-shaped.
//!
//! Purely a performance pass: skipping it changes nothing observable
//! except host-stack growth on tail-recursive programs (spec §4.4,
//! "correctness does not depend on it, only steady-state performance").

use crate::ast::{Node, Program, Tag};

pub fn optimize(program: &mut Program) {
    fuse_adjacent(&mut program.instrs);
    remove_noops(&mut program.instrs);
    if let Some(last) = program.instrs.last_mut() {
        if last.is_tailable() {
            last.convert_to_tail_call();
        }
    }
}

fn fuse_adjacent(instrs: &mut [Node]) {
    for i in 0..instrs.len().saturating_sub(1) {
        let fuse_to = match &instrs[i].tag {
            Tag::PushPrimitive(f, name) => Some(Tag::ApplyPrimitive(*f, name)),
            Tag::PushUpval(name, n) => Some(Tag::ApplyUpval(name.clone(), *n)),
            _ => None,
        };
        let Some(fused) = fuse_to else { continue };
        if matches!(instrs[i + 1].tag, Tag::Apply) {
            instrs[i].tag = fused;
            instrs[i + 1].tag = Tag::NoOp;
        }
    }
}

fn remove_noops(instrs: &mut Vec<Node>) {
    instrs.retain(|n| !matches!(n.tag, Tag::NoOp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{NthParent, Value};

    fn n(tag: Tag) -> Node {
        Node::new(tag, "test")
    }

    fn dummy_primitive(_s: &mut crate::stack::Stack, _c: &crate::interp::RunContext) -> Result<(), crate::error::BangError> {
        Ok(())
    }

    #[test]
    fn fuses_push_primitive_apply() {
        let mut p = Program::new(vec![
            n(Tag::PushPrimitive(dummy_primitive, "dummy")),
            n(Tag::Apply),
        ]);
        optimize(&mut p);
        assert_eq!(p.instrs.len(), 1);
        // last instruction is also apply-shaped but ApplyPrimitive isn't
        // rewritten into a tail form (spec: only Apply/ConditionalApply/
        // ApplyUpval are tailable).
        assert!(matches!(p.instrs[0].tag, Tag::ApplyPrimitive(..)));
    }

    #[test]
    fn fuses_push_upval_apply() {
        let mut p = Program::new(vec![
            n(Tag::PushUpval("x".into(), NthParent(0))),
            n(Tag::Apply),
        ]);
        optimize(&mut p);
        assert_eq!(p.instrs.len(), 1);
        assert!(matches!(p.instrs[0].tag, Tag::TailApplyUpval(..)));
    }

    #[test]
    fn last_apply_becomes_tail_call() {
        let mut p = Program::new(vec![
            n(Tag::PushLiteral(Value::Num(1.0))),
            n(Tag::Apply),
        ]);
        optimize(&mut p);
        assert!(matches!(p.instrs.last().unwrap().tag, Tag::TailApply));
    }

    #[test]
    fn unrelated_pairs_are_not_fused() {
        let mut p = Program::new(vec![
            n(Tag::PushLiteral(Value::Num(1.0))),
            n(Tag::PushLiteral(Value::Num(2.0))),
        ]);
        optimize(&mut p);
        assert_eq!(p.instrs.len(), 2);
    }
}
