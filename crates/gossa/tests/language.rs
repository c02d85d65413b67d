//! Language-surface coverage: control flow, aggregates, closures,
//! conversions, and the value semantics visible to scripts.

use gossa::{ErrorKind, Object, Program};
use pretty_assertions::assert_eq;

fn run(src: &str, func: &str, args: &[Object]) -> Object {
    gossa::run(src, func, args).unwrap()
}

#[test]
fn for_loop_accumulates() {
    let result = run(
        r"package main

func test(n int) int {
	sum := 0
	for i := 0; i < n; i++ {
		sum += i
	}
	return sum
}
",
        "test",
        &[Object::Int(10)],
    );
    assert_eq!(result, Object::Int(45));
}

#[test]
fn break_and_continue() {
    let result = run(
        r"package main

func test() int {
	sum := 0
	for i := 0; i < 100; i++ {
		if i%2 == 0 {
			continue
		}
		if i > 10 {
			break
		}
		sum += i
	}
	return sum
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(1 + 3 + 5 + 7 + 9));
}

#[test]
fn slices_share_backing_until_regrowth() {
    let result = run(
        r"package main

func test() int {
	s := []int{1, 2, 3}
	s = append(s, 4)
	t := s[1:3]
	t[0] = 9
	total := 0
	for _, v := range s {
		total += v
	}
	return total + len(t) + cap(s)
}
",
        "test",
        &[],
    );
    // s is [1 9 3 4] after writing through the subslice view
    assert_eq!(result, Object::Int(17 + 2 + 4));
}

#[test]
fn copy_builtin_counts_elements() {
    let result = run(
        r"package main

func test() int {
	src := []int{1, 2, 3}
	dst := make([]int, 2)
	n := copy(dst, src)
	return n*100 + dst[0]*10 + dst[1]
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(212));
}

#[test]
fn map_lookup_comma_ok_and_delete() {
    let result = run(
        r#"package main

func test() int {
	m := make(map[string]int)
	m["a"] = 1
	m["b"] = 2
	v, ok := m["c"]
	if ok {
		return -1
	}
	sum := v
	for _, x := range m {
		sum += x
	}
	delete(m, "a")
	return sum + len(m)
}
"#,
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(4));
}

#[test]
fn map_iteration_is_a_snapshot() {
    let result = run(
        r#"package main

func test() int {
	m := map[string]int{"a": 1}
	n := 0
	for range m {
		m["b"] = 2
		n++
	}
	return n
}
"#,
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(1));
}

#[test]
fn nil_map_reads_zero_and_writes_panic() {
    let read = run(
        r#"package main

func test() int {
	var m map[string]int
	return m["a"] + len(m)
}
"#,
        "test",
        &[],
    );
    assert_eq!(read, Object::Int(0));

    let err = gossa::run(
        r#"package main

func test() {
	var m map[string]int
	m["a"] = 1
}
"#,
        "test",
        &[],
    )
    .unwrap_err();
    assert!(err.message().contains("assignment to entry in nil map"));
}

#[test]
fn struct_values_copy_on_assignment() {
    let result = run(
        r"package main

type point struct {
	x, y int
}

func test() int {
	p := point{1, 2}
	p.x = 10
	q := p
	q.y = 5
	pp := &p
	pp.x = 20
	return p.x*1000 + p.y*100 + q.x*10 + q.y
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(20 * 1000 + 2 * 100 + 10 * 10 + 5));
}

#[test]
fn keyed_struct_literals() {
    let result = run(
        r"package main

type rect struct {
	w, h int
}

func test() int {
	r := rect{h: 3, w: 4}
	return r.w*10 + r.h
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(43));
}

#[test]
fn pointers_and_new() {
    let result = run(
        r"package main

func test() int {
	x := 1
	p := &x
	*p = 41
	y := new(int)
	*y = 1
	return x + *y
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(42));
}

#[test]
fn closures_capture_cells() {
    let result = run(
        r"package main

func counter() func() int {
	n := 0
	return func() int {
		n++
		return n
	}
}

func test() int {
	c := counter()
	c()
	c()
	return c()
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(3));
}

#[test]
fn separate_closures_do_not_share_state() {
    let result = run(
        r"package main

func counter() func() int {
	n := 0
	return func() int {
		n++
		return n
	}
}

func test() int {
	a := counter()
	b := counter()
	a()
	a()
	return a()*10 + b()
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(31));
}

#[test]
fn multi_return_and_extract() {
    let result = run(
        r"package main

func divmod(a, b int) (int, int) {
	return a / b, a % b
}

func test() int {
	q, r := divmod(7, 2)
	return q*10 + r
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(31));
}

#[test]
fn short_circuit_evaluation() {
    let program = Program::build(
        "logic.go",
        r"package main

func test(a, b int) bool {
	return a > 0 && b > 0 || a == b
}
",
        &[],
    )
    .unwrap();
    let cases = [
        (1, 2, true),
        (1, -2, false),
        (-3, -3, true),
        (0, 5, false),
    ];
    for (a, b, want) in cases {
        let got = program.run("test", &[Object::Int(a), Object::Int(b)]).unwrap();
        assert_eq!(got, Object::Bool(want), "test({a}, {b})");
    }
}

#[test]
fn string_bytes_and_runes() {
    let result = run(
        r"package main

func test(s string) int {
	b := []byte(s)
	t := string(b)
	if t != s {
		return -1
	}
	n := 0
	for _, r := range s {
		n += int(r)
	}
	return n + len(s) + int(s[0])
}
",
        "test",
        &[Object::string("ab")],
    );
    assert_eq!(result, Object::Int(97 + 98 + 2 + 97));
}

#[test]
fn string_ordering_and_slicing() {
    let result = run(
        r#"package main

func test() bool {
	s := "interpreter"
	return s[5:10] == "prete" && "abc" < "abd"
}
"#,
        "test",
        &[],
    );
    assert_eq!(result, Object::Bool(true));
}

#[test]
fn named_type_conversions() {
    let result = run(
        r"package main

type celsius float64

func test() float64 {
	c := celsius(36.5)
	return float64(c) + 0.5
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Float(37.0));
}

#[test]
fn wide_unsigned_literals() {
    let result = run(
        r"package main

const fnvOffset = 0xcbf29ce484222325

func test() uint64 {
	h := uint64(fnvOffset)
	return h ^ 0xFFFFFFFFFFFFFFFF
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Uint(0xcbf2_9ce4_8422_2325_u64 ^ u64::MAX));
}

#[test]
fn complex_types_are_rejected_at_build() {
    let err = Program::build(
        "cplx.go",
        "package main\n\nvar c complex128\n\nfunc test() {\n}\n",
        &[],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Build);
    assert!(
        err.message().contains("unsupported type: complex128"),
        "unexpected message: {}",
        err.message()
    );
}

#[test]
fn integer_conversions_narrow() {
    let result = run(
        r"package main

func test() int {
	x := 300
	return int(int8(x))
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(44));
}

#[test]
fn type_assertions_with_comma_ok() {
    let program = Program::build(
        "assert.go",
        r"package main

func test(x any) int {
	n, ok := x.(int)
	if ok {
		return n
	}
	s := x.(string)
	return len(s)
}
",
        &[],
    )
    .unwrap();
    assert_eq!(program.run("test", &[Object::Int(5)]).unwrap(), Object::Int(5));
    assert_eq!(program.run("test", &[Object::string("abc")]).unwrap(), Object::Int(3));

    let err = program.run("test", &[Object::Float(1.5)]).unwrap_err();
    assert!(
        err.message().contains("interface conversion") && err.message().contains("float64"),
        "unexpected message: {}",
        err.message()
    );
}

#[test]
fn globals_persist_across_runs_and_init_runs_once() {
    let program = Program::build(
        "globals.go",
        r"package main

var x = 10

func init() {
	x = x + 5
}

func bump() int {
	x++
	return x
}
",
        &[],
    )
    .unwrap();
    assert_eq!(program.run("bump", &[]).unwrap(), Object::Int(16));
    assert_eq!(program.run("bump", &[]).unwrap(), Object::Int(17));
}

#[test]
fn set_global_value_replaces_storage() {
    let program = Program::build(
        "setg.go",
        r"package main

var counter int

func read() int {
	return counter
}
",
        &[],
    )
    .unwrap();
    program.set_global_value("counter", Object::Int(7)).unwrap();
    assert_eq!(program.run("read", &[]).unwrap(), Object::Int(7));
    assert!(program.set_global_value("missing", Object::Int(1)).is_err());
}

#[test]
fn division_by_zero_panics() {
    let program = Program::build(
        "div.go",
        r"package main

func test(n int) int {
	return 10 / n
}
",
        &[],
    )
    .unwrap();
    assert_eq!(program.run("test", &[Object::Int(2)]).unwrap(), Object::Int(5));
    let err = program.run("test", &[Object::Int(0)]).unwrap_err();
    assert!(err.message().contains("integer divide by zero"));
}

#[test]
fn index_out_of_range_panics_with_bounds() {
    let err = gossa::run(
        r"package main

func test(i int) int {
	s := []int{1}
	return s[i]
}
",
        "test",
        &[Object::Int(5)],
    )
    .unwrap_err();
    assert!(err.message().contains("index out of range [5] with length 1"));
}

#[test]
fn call_depth_is_bounded() {
    let err = gossa::run(
        r"package main

func test() int {
	return test()
}
",
        "test",
        &[],
    )
    .unwrap_err();
    assert!(err.message().contains("maximum call depth"));
}

#[test]
fn arrays_have_value_semantics() {
    let result = run(
        r"package main

func test() int {
	var a [3]int
	a[0] = 1
	a[2] = 3
	b := a
	b[0] = 9
	return a[0]*10 + b[0] + a[2]
}
",
        "test",
        &[],
    );
    assert_eq!(result, Object::Int(10 + 9 + 3));
}

#[test]
fn closures_returned_to_the_host_are_callable() {
    let program = Program::build(
        "closure.go",
        r"package main

func test(base int) func(int) int {
	return func(x int) int {
		return base + x
	}
}
",
        &[],
    )
    .unwrap();
    let Object::Closure(adder) = program.run("test", &[Object::Int(40)]).unwrap() else {
        panic!("expected a closure result");
    };
    assert_eq!(adder.call(&[Object::Int(2)]).unwrap(), Object::Int(42));
}
