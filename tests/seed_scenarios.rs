//! End-to-end scenario tests driving the public `run_source`/`run_file`
//! entry points (spec §8's seed scenarios), rather than interpreter
//! internals. Complements the `#[cfg(test)]` unit tests living alongside
//! each module.

use std::io::Write;
use std::path::Path;

use bang_lang::{run_file, run_source, Value};

fn run(src: &str) -> Value {
    run_source(src, "test", Path::new("."), false)
        .unwrap()
        .expect("program left a value on the stack")
}

#[test]
fn arithmetic_leaves_sum_on_stack() {
    match run("2 3 +") {
        Value::Num(n) => assert_eq!(n, 5.0),
        other => panic!("expected Num(5), got {}", other),
    }
}

#[test]
fn closure_squares_its_argument() {
    match run("fun x = x x * ; 7 !") {
        Value::Num(n) => assert_eq!(n, 49.0),
        other => panic!("expected Num(49), got {}", other),
    }
}

#[test]
fn tail_recursive_factorial_of_five_is_120() {
    let src = "def :fact n = n 0 = ? { 1 } { n fact n 1 - ! * } ! ; 5 fact !";
    match run(src) {
        Value::Num(n) => assert_eq!(n, 120.0),
        other => panic!("expected Num(120), got {}", other),
    }
}

#[test]
fn deep_tail_recursion_runs_in_constant_host_stack() {
    // 500k is well past any host stack depth that ordinary (non-tail)
    // recursion could survive; this only completes if the TCO frame-reuse
    // path is actually taken.
    let src = "def :count n = n 0 = ? { 0 } { n 1 - count! } ! ; 500000 count !";
    match run(src) {
        Value::Num(n) => assert_eq!(n, 0.0),
        other => panic!("expected Num(0), got {}", other),
    }
}

#[test]
fn conditional_apply_picks_the_true_branch() {
    match run("true { 'yes' } { 'no' } ? !") {
        Value::Str(s) => assert_eq!(s.as_str(), "yes"),
        other => panic!("expected Str(\"yes\"), got {}", other),
    }
}

#[test]
fn conditional_apply_picks_the_false_branch() {
    match run("false { 'yes' } { 'no' } ? !") {
        Value::Str(s) => assert_eq!(s.as_str(), "no"),
        other => panic!("expected Str(\"no\"), got {}", other),
    }
}

#[test]
fn string_library_len_via_require() {
    // `'string' require` pops the library name and pushes the built-in's
    // open-function; `!` invokes it, leaving the library's namespace
    // object on the stack. `.len` then resolves `len` against that
    // namespace (spec §6's dotted-lookup idiom) and a final `!` calls it
    // against the string pushed ahead of time.
    let src = "'hello' 'string' require ! .len !";
    match run(src) {
        Value::Num(n) => assert_eq!(n, 5.0),
        other => panic!("expected Num(5), got {}", other),
    }
}

#[test]
fn nested_bound_mark_outer_depth_includes_inner_values() {
    // The inner `( 1 2 3 ) #` is isolated by its own mark and reports 3;
    // once the inner mark releases, the outer mark is still active and
    // its own `#` counts the three pushed values *plus* the inner count
    // that was itself pushed onto the (still-isolated) stack region.
    match run("( ( 1 2 3 ) # ) #") {
        Value::Num(n) => assert_eq!(n, 4.0),
        other => panic!("expected Num(4), got {}", other),
    }
}

#[test]
fn bound_mark_inner_count_is_three() {
    match run("( 1 2 3 ) #") {
        Value::Num(n) => assert_eq!(n, 3.0),
        other => panic!("expected Num(3), got {}", other),
    }
}

#[test]
fn require_loads_a_module_from_a_sibling_file() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let module_path = dir.path().join("greet.bang");
    let mut f = std::fs::File::create(&module_path).expect("create module file");
    writeln!(f, "fun x = x x + ;").unwrap();
    drop(f);

    let main_path = dir.path().join("main.bang");
    // The module's own top-level effect is pushing an unapplied closure;
    // `swap` puts the argument beneath it before the final `!` calls it,
    // matching the calling convention every closure application uses.
    std::fs::write(&main_path, "'greet' require ! 21 swap !").unwrap();

    match run_file(&main_path, false).unwrap() {
        Some(Value::Num(n)) => assert_eq!(n, 42.0),
        other => panic!("expected Num(42), got {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn unbound_identifier_is_reported_as_a_parse_error() {
    let err = run_source("totally_unbound_name", "test", Path::new("."), false).unwrap_err();
    assert!(err.to_string().contains("totally_unbound_name"));
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let err = run_source("1 0 /", "test", Path::new("."), false).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("division"));
}

// Shared coroutine body for the tests below: receives its argument as `x`,
// pushes it (the value a yielding coroutine hands back to its resumer), then
// yields. Once resumed, the resume argument sits on top and is dropped
// before the body finishes by returning `x + 1`.
const COROUTINE_BODY: &str = "fun x = x 'coroutine' require ! .yield ! drop ! x 1 + ;";

#[test]
fn coroutine_yield_reports_suspended_with_handed_back_value() {
    // `resume` always leaves a trailing `Bool` on top: `true` while the
    // coroutine is suspended mid-body, `false` once it has run to
    // completion. The first `resume` here only reaches the `yield`.
    let src = format!("{} 'coroutine' require ! .spawn ! 10 'coroutine' require ! .resume !", COROUTINE_BODY);
    match run(&src) {
        Value::Bool(suspended) => assert!(suspended, "expected the coroutine to still be suspended"),
        other => panic!("expected Bool(true), got {}", other),
    }
}

#[test]
fn coroutine_resume_after_yield_runs_to_completion() {
    // `dup!` keeps a second handle around so the coroutine can be resumed
    // twice: once to reach the `yield`, once to drive it to completion.
    // The intervening `drop!`s discard the first `resume`'s handed-back
    // value and trailing `Bool` before reusing the stack for the second
    // call; the final `drop!` discards the second call's trailing `Bool`
    // so the handed-back `x + 1` is left on top.
    let src = format!(
        "{} 'coroutine' require ! .spawn ! dup ! \
         10 'coroutine' require ! .resume ! drop ! drop ! \
         99 'coroutine' require ! .resume ! drop !",
        COROUTINE_BODY
    );
    match run(&src) {
        Value::Num(n) => assert_eq!(n, 11.0),
        other => panic!("expected Num(11), got {}", other),
    }
}

#[test]
fn resuming_a_finished_coroutine_is_a_runtime_error() {
    // Two `dup!`s keep three handles around for three `resume` calls; the
    // first two drive the coroutine to completion (as in the test above)
    // and the third attempts to resume it again.
    let src = format!(
        "{} 'coroutine' require ! .spawn ! dup ! dup ! \
         10 'coroutine' require ! .resume ! drop ! drop ! \
         99 'coroutine' require ! .resume ! drop ! drop ! \
         0 'coroutine' require ! .resume !",
        COROUTINE_BODY
    );
    let err = run_source(&src, "test", Path::new("."), false).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("finished"));
}
