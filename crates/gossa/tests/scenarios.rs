//! End-to-end scenarios against the public API: build a program from
//! source, call a named function, check the host value that comes back.

use std::time::{Duration, Instant};

use gossa::{ErrorKind, Object, Program};
use pretty_assertions::assert_eq;

#[test]
fn arithmetic() {
    let result = gossa::run("package main\nfunc test() int { return 1 + 2*3 }\n", "test", &[]).unwrap();
    assert_eq!(result, Object::Int(7));
}

#[test]
fn recursion() {
    let program = Program::build(
        "fib.go",
        r"package main

func fib(i int) int {
	if i < 2 {
		return i
	}
	return fib(i-1) + fib(i-2)
}

func test(n int) int {
	return fib(n)
}
",
        &[],
    )
    .unwrap();
    assert_eq!(program.run("test", &[Object::Int(10)]).unwrap(), Object::Int(55));
    assert_eq!(program.run("test", &[Object::Int(20)]).unwrap(), Object::Int(6765));
}

#[test]
fn defer_runs_in_reverse_order() {
    let program = Program::build(
        "defer.go",
        r#"package main

func test() {
	defer print("A")
	defer print("B")
	print("C")
}
"#,
        &[],
    )
    .unwrap();
    let (ctx, result) = program.run_with_context("test", &[]);
    result.unwrap();
    let output = ctx.output();
    let c = output.find("] C").expect("C printed");
    let b = output.find("] B").expect("B printed");
    let a = output.find("] A").expect("A printed");
    assert!(c < b && b < a, "expected C before B before A in {output:?}");
}

#[test]
fn recover_stops_the_panic() {
    let result = gossa::run(
        r#"package main

func test() int {
	defer func() {
		recover()
	}()
	panic("x")
	return 0
}
"#,
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(0));
}

#[test]
fn buffered_channel_send_and_receive() {
    let result = gossa::run(
        r"package main

func test() int {
	c := make(chan int, 1)
	c <- 5
	return <-c
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(5));
}

#[test]
fn cross_package_import() {
    let pkg1 = r#"package pkg1

func F() string {
	return "hello"
}
"#;
    let pkg2 = r#"package pkg2

const S = "world"
"#;
    let main = r#"package main

import "pkg1"
import "pkg2"

func test() string {
	return "1" + pkg1.F() + pkg2.S
}
"#;
    let program = Program::build("main.go", main, &[pkg1, pkg2]).unwrap();
    assert_eq!(program.run("test", &[]).unwrap(), Object::string("1helloworld"));
}

#[test]
fn unbounded_loop_hits_the_deadline() {
    let program = Program::build(
        "loop.go",
        r"package main

func test() {
	for {
	}
}
",
        &[],
    )
    .unwrap();
    let started = Instant::now();
    let (_ctx, result) = program.run_with_timeout("test", &[], Duration::from_millis(150));
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(
        err.message().contains("context deadline exceeded"),
        "unexpected cause: {}",
        err.message()
    );
    // the loop must stop within one preemption window of the deadline
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn unknown_function_is_a_lookup_error() {
    let program = Program::build("empty.go", "package main\nfunc test() {\n}\n", &[]).unwrap();
    let err = program.run("missing", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert!(err.message().contains("function not found"));
}

#[test]
fn build_errors_carry_a_line() {
    let err = Program::build("bad.go", "package main\nfunc test() int {\n\treturn undeclared\n}\n", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Build);
    assert_eq!(err.line(), Some(3));
}
