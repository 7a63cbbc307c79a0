//! # Lexical Upvalue Chain
//!
//! An [`Upvalue`] chain is a singly linked, reference-counted, immutable-
//! after-construction list of bound values — the environment a closure
//! captures when it is pushed (spec §3). Each frame is tagged with a
//! [`BinderTag`] identifying *which* binder introduced it: a name (for
//! `PushUpvalByName` / name-based `FindBinding` during parsing) and a
//! numeric id unique to the AST node that created the frame (for
//! [`lexical_match`], which backs name-based recursion).
//!
//! Two lookup paths exist, matching the C++ `Upvalue::getUpValue`
//! overloads:
//! - positional, via [`Upvalue::nth`] — resolved at parse time to a
//!   `NthParent(k)` and walked in O(k) at run time;
//! - by name, via [`Upvalue::find_by_name`] — used only by the `lookup`
//!   keyword (spec §4.2's "experimental object system" carried over
//!   verbatim) since it is O(chain length) and not needed for ordinary
//!   variable references.

use std::rc::Rc;

use crate::value::{NthParent, Value};

/// Identifies the binder (a `CloseValue`/parameter bind site) that
/// created an upvalue frame. `id` is assigned once per AST node at parse
/// time and is what makes [`lexical_match`] work: two frames created by
/// the *same* recursive `def`'s `PushFun` share an id even though they
/// are different `Upvalue` instances at run time.
#[derive(Clone)]
pub struct BinderTag {
    pub name: Rc<str>,
    pub id: u32,
}

pub struct Upvalue {
    pub parent: Option<Rc<Upvalue>>,
    pub value: Value,
    binder: BinderTag,
}

impl Upvalue {
    pub fn new(binder: BinderTag, parent: Option<Rc<Upvalue>>, value: Value) -> Rc<Upvalue> {
        Rc::new(Upvalue { parent, value, binder })
    }

    pub fn binds(&self, name: &str) -> bool {
        self.binder.name.as_ref() == name
    }

    pub fn binder_id(&self) -> u32 {
        self.binder.id
    }

    /// Walk `n` parents up from `self` and return the value bound there.
    /// `NthParent(0)` is `self`'s own value.
    pub fn get(self: &Rc<Self>, mut n: NthParent) -> &Value {
        let mut uv: &Rc<Upvalue> = self;
        while n != NthParent(0) {
            uv = uv.parent.as_ref().expect("NthParent exceeds upvalue chain depth");
            n = n.pred();
        }
        &uv.value
    }

    /// Walk `n` parents up from `self` and return that ancestor frame
    /// itself (not just its value) — used by [`lexical_match`].
    pub fn nth_parent(self: &Rc<Self>, mut n: NthParent) -> Option<Rc<Upvalue>> {
        let mut uv = self.clone();
        while n != NthParent(0) {
            uv = uv.parent.clone()?;
            n = n.pred();
        }
        Some(uv)
    }

    /// Dynamic lookup by name, walking from `self` toward the root. This
    /// is the "experimental object system" path (`lookup` keyword); plain
    /// identifier references resolve positionally at parse time instead.
    pub fn find_by_name<'a>(self: &'a Rc<Self>, name: &str) -> Option<&'a Value> {
        let mut uv: &Rc<Upvalue> = self;
        loop {
            if uv.binds(name) {
                return Some(&uv.value);
            }
            uv = uv.parent.as_ref()?;
        }
    }
}

/// Name-based recursion support (spec §4.5 "Name-based recursion").
///
/// Climbs `start` looking for the first frame whose binder id matches
/// `target_id`, then keeps climbing while the *next* parent also matches
/// — so a recursive call roots its new closure at the **highest**
/// matching ancestor rather than the nearest one. This is what keeps the
/// upvalue chain from deepening by one frame on every recursive call,
/// matching `FunctionClosure::lexicalMatch` in the C++ original.
pub fn lexical_match(start: Option<Rc<Upvalue>>, target_id: u32) -> Option<Rc<Upvalue>> {
    let mut found: Option<Rc<Upvalue>> = None;
    let mut cursor = start;
    while let Some(uv) = cursor {
        if uv.binder_id() == target_id {
            found = Some(uv.clone());
            cursor = uv.parent.clone();
        } else if found.is_some() {
            break;
        } else {
            cursor = uv.parent.clone();
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, id: u32) -> BinderTag {
        BinderTag { name: Rc::from(name), id }
    }

    #[test]
    fn positional_lookup_walks_expected_depth() {
        let root = Upvalue::new(tag("a", 0), None, Value::Num(1.0));
        let mid = Upvalue::new(tag("b", 1), Some(root), Value::Num(2.0));
        let top = Upvalue::new(tag("c", 2), Some(mid), Value::Num(3.0));
        match top.get(NthParent(0)) {
            Value::Num(n) => assert_eq!(*n, 3.0),
            _ => panic!("expected Num(3.0)"),
        }
        match top.get(NthParent(2)) {
            Value::Num(n) => assert_eq!(*n, 1.0),
            _ => panic!("expected Num(1.0)"),
        }
    }

    #[test]
    fn name_lookup_finds_enclosing_binding() {
        let root = Upvalue::new(tag("x", 0), None, Value::Num(42.0));
        let top = Upvalue::new(tag("y", 1), Some(root), Value::Num(7.0));
        match top.find_by_name("x") {
            Some(Value::Num(n)) => assert_eq!(*n, 42.0),
            _ => panic!("expected to find 'x'"),
        }
        assert!(top.find_by_name("missing").is_none());
    }

    #[test]
    fn lexical_match_roots_at_highest_ancestor() {
        // Two frames created by the "same" def (id 7), simulating nested
        // recursive calls; the match should land on the outermost one.
        let outer = Upvalue::new(tag("n", 7), None, Value::Num(0.0));
        let inner = Upvalue::new(tag("n", 7), Some(outer.clone()), Value::Num(1.0));
        let unrelated = Upvalue::new(tag("m", 9), Some(inner), Value::Num(2.0));
        let matched = lexical_match(Some(unrelated), 7).unwrap();
        assert!(Rc::ptr_eq(&matched, &outer));
    }
}
