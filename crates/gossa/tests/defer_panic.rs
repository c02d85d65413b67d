//! Defer ordering, panic propagation, and recover scoping.

use gossa::{ErrorKind, Object, Program};
use pretty_assertions::assert_eq;

#[test]
fn defers_run_last_in_first_out() {
    let program = Program::build(
        "lifo.go",
        r#"package main

var log string

func mark(s string) {
	log = log + s
}

func helper() {
	defer mark("A")
	defer mark("B")
	mark("C")
}

func test() string {
	helper()
	return log
}
"#,
        &[],
    )
    .unwrap();
    assert_eq!(program.run("test", &[]).unwrap(), Object::string("CBA"));
}

#[test]
fn defers_run_in_reverse_under_panic_too() {
    let program = Program::build(
        "lifo_panic.go",
        r#"package main

var log string

func mark(s string) {
	log = log + s
}

func helper() {
	defer mark("A")
	defer mark("B")
	panic("stop")
}

func test() string {
	defer func() {
		recover()
	}()
	helper()
	return "unreachable"
}

func result() string {
	return log
}
"#,
        &[],
    )
    .unwrap();
    // helper's panic unwinds through test's recover; its defers ran B then A
    program.run("test", &[]).unwrap();
    assert_eq!(program.run("result", &[]).unwrap(), Object::string("BA"));
}

#[test]
fn defer_captures_arguments_at_defer_time() {
    let program = Program::build(
        "capture.go",
        r#"package main

var out string

func note(s string) {
	out = out + s
}

func test() {
	x := "a"
	defer note(x)
	x = "b"
	note(x)
}

func result() string {
	return out
}
"#,
        &[],
    )
    .unwrap();
    program.run("test", &[]).unwrap();
    assert_eq!(program.run("result", &[]).unwrap(), Object::string("ba"));
}

#[test]
fn recover_is_scoped_to_the_direct_deferred_call() {
    let program = Program::build(
        "scope.go",
        r#"package main

var trace string

func tryRecover() {
	if recover() == nil {
		trace = trace + "N"
	} else {
		trace = trace + "Y"
	}
}

func test() string {
	defer func() {
		tryRecover()
		if recover() != nil {
			trace = trace + "D"
		}
	}()
	panic("boom")
}

func result() string {
	return trace
}
"#,
        &[],
    )
    .unwrap();
    // the nested call must see nil; the direct recover clears the panic
    program.run("test", &[]).unwrap();
    assert_eq!(program.run("result", &[]).unwrap(), Object::string("ND"));
}

#[test]
fn recover_outside_any_panic_returns_nil() {
    let result = gossa::run(
        r"package main

func test() int {
	r := recover()
	if r == nil {
		return 1
	}
	return 0
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(1));
}

#[test]
fn deferred_function_itself_may_recover() {
    let result = gossa::run(
        r#"package main

func quiet() {
	recover()
}

func test() int {
	defer quiet()
	panic("boom")
	return 9
}
"#,
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(0));
}

#[test]
fn panic_in_a_defer_is_recoverable_by_an_earlier_defer() {
    let program = Program::build(
        "chain.go",
        r#"package main

var order string

func note(s string) {
	order = order + s
}

func helper() {
	defer func() {
		if recover() != nil {
			note("R")
		}
	}()
	defer func() {
		panic("from defer")
	}()
	note("1")
}

func test() string {
	helper()
	return order
}
"#,
        &[],
    )
    .unwrap();
    assert_eq!(program.run("test", &[]).unwrap(), Object::string("1R"));
}

#[test]
fn unrecovered_panic_crosses_frames_and_surfaces_as_an_error() {
    let err = gossa::run(
        r#"package main

func inner() {
	panic("deep failure")
}

func outer() {
	inner()
}

func test() {
	outer()
}
"#,
        "test",
        &[],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(err.message(), "deep failure");
}

#[test]
fn recovered_frame_returns_zero_results() {
    let result = gossa::run(
        r#"package main

func guarded() (int, string) {
	defer func() {
		recover()
	}()
	panic("x")
}

func test() int {
	n, s := guarded()
	return n + len(s)
}
"#,
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(0));
}

#[test]
fn panic_payload_values_round_trip_through_recover() {
    let result = gossa::run(
        r#"package main

func test() int {
	out := 0
	func() {
		defer func() {
			r := recover()
			n, ok := r.(int)
			if ok {
				out = n
			}
		}()
		panic(41)
	}()
	return out + 1
}
"#,
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(42));
}
