//! Tasks, channels, and select.

use gossa::{Object, Program};
use pretty_assertions::assert_eq;

/// Host-side sleep, registered once for tests that need to outwait a
/// detached task.
fn register_sleep() {
    gossa::add_package(
        "testsleep",
        "testsleep",
        vec![gossa::new_function("Ms", &["int"], |args| {
            if let Some(Object::Int(ms)) = args.first() {
                std::thread::sleep(std::time::Duration::from_millis(*ms as u64));
            }
            Ok(Object::Nil)
        })],
    );
}

#[test]
fn unbuffered_channel_synchronises_tasks() {
    let result = gossa::run(
        r"package main

func test() int {
	c := make(chan int)
	go func() {
		c <- 7
	}()
	return <-c
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(7));
}

#[test]
fn many_tasks_feed_one_channel() {
    let result = gossa::run(
        r"package main

func test(n int) int {
	c := make(chan int, 8)
	for i := 0; i < n; i++ {
		go func(v int) {
			c <- v * 2
		}(i)
	}
	sum := 0
	for j := 0; j < n; j++ {
		sum += <-c
	}
	return sum
}
",
        "test",
        &[Object::Int(4)],
    )
    .unwrap();
    assert_eq!(result, Object::Int(12));
}

#[test]
fn receive_from_closed_channel_yields_zero_and_not_ok() {
    let result = gossa::run(
        r"package main

func test() int {
	c := make(chan int, 2)
	c <- 1
	close(c)
	a := <-c
	b, ok := <-c
	if ok {
		return -1
	}
	return a + b
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(1));
}

#[test]
fn range_over_channel_stops_at_close() {
    let result = gossa::run(
        r"package main

func test() int {
	c := make(chan int, 3)
	c <- 1
	c <- 2
	c <- 3
	close(c)
	sum := 0
	for v := range c {
		sum += v
	}
	return sum
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(6));
}

#[test]
fn send_on_closed_channel_panics() {
    let err = gossa::run(
        r"package main

func test() {
	c := make(chan int, 1)
	close(c)
	c <- 1
}
",
        "test",
        &[],
    )
    .unwrap_err();
    assert!(err.message().contains("send on closed channel"));
}

#[test]
fn close_of_closed_channel_panics() {
    let err = gossa::run(
        r"package main

func test() {
	c := make(chan int)
	close(c)
	close(c)
}
",
        "test",
        &[],
    )
    .unwrap_err();
    assert!(err.message().contains("close of closed channel"));
}

#[test]
fn select_takes_the_ready_case() {
    let result = gossa::run(
        r"package main

func test() int {
	a := make(chan int, 1)
	b := make(chan int, 1)
	b <- 9
	select {
	case v := <-a:
		return v
	case v := <-b:
		return v + 1
	}
	return -1
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(10));
}

#[test]
fn select_default_fires_when_nothing_is_ready() {
    let result = gossa::run(
        r"package main

func test() int {
	c := make(chan int)
	select {
	case v := <-c:
		return v
	default:
		return -1
	}
	return -2
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(-1));
}

#[test]
fn select_send_case_completes() {
    let result = gossa::run(
        r"package main

func test() int {
	c := make(chan int, 1)
	select {
	case c <- 5:
		return <-c
	default:
		return -1
	}
	return -2
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(5));
}

#[test]
fn select_comma_ok_observes_close() {
    let result = gossa::run(
        r"package main

func test() int {
	c := make(chan int)
	close(c)
	select {
	case v, ok := <-c:
		if ok {
			return -1
		}
		return v + 10
	}
	return -2
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(10));
}

#[test]
fn task_panic_is_isolated_and_logged() {
    register_sleep();
    let program = Program::build(
        "taskpanic.go",
        r#"package main

func test() int {
	go func() {
		panic("task failed")
	}()
	testsleep.Ms(100)
	return 1
}
"#,
        &[],
    )
    .unwrap();
    let (ctx, result) = program.run_with_context("test", &[]);
    assert_eq!(result.unwrap(), Object::Int(1));
    assert!(
        ctx.output().contains("goroutine panic: task failed"),
        "missing diagnostic in {:?}",
        ctx.output()
    );
}

#[test]
fn tasks_share_program_globals() {
    let result = gossa::run(
        r"package main

var total int

func test() int {
	done := make(chan bool)
	go func() {
		total = 41
		done <- true
	}()
	<-done
	return total + 1
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(42));
}

#[test]
fn pipeline_of_tasks() {
    let result = gossa::run(
        r"package main

func stage(in chan int, out chan int) {
	for v := range in {
		out <- v * 2
	}
	close(out)
}

func test() int {
	a := make(chan int, 4)
	b := make(chan int, 4)
	go stage(a, b)
	a <- 1
	a <- 2
	close(a)
	sum := 0
	for v := range b {
		sum += v
	}
	return sum
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(6));
}

#[test]
fn blocked_receive_respects_the_deadline() {
    let program = Program::build(
        "blocked.go",
        r"package main

func test() int {
	c := make(chan int)
	return <-c
}
",
        &[],
    )
    .unwrap();
    let (_ctx, result) = program.run_with_timeout("test", &[], std::time::Duration::from_millis(100));
    let err = result.unwrap_err();
    assert_eq!(err.kind(), gossa::ErrorKind::Cancelled);
}
