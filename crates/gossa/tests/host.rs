//! Host integration: the symbol registry, external calls, completion
//! entries, serialisation, and tracing.

use std::sync::Arc;

use gossa::{
    InsertTextRule, KeywordKind, Object, OpaqueObject, Program, RecordingTracer, new_const, new_function, new_type,
    new_var,
};
use pretty_assertions::assert_eq;

#[test]
fn registered_identity_round_trips_primitives() {
    gossa::add_package(
        "identity",
        "identity",
        vec![new_function("Id", &["any"], |args| Ok(args[0].clone()))],
    );
    let program = Program::build(
        "id.go",
        r"package main

func test(x any) any {
	return identity.Id(x)
}
",
        &[],
    )
    .unwrap();
    let values = [
        Object::Int(-3),
        Object::Uint(9),
        Object::Bool(true),
        Object::Float(2.5),
        Object::string("round trip"),
        Object::Nil,
    ];
    for value in values {
        let got = program.run("test", &[value.clone()]).unwrap();
        assert_eq!(got, value);
    }
}

#[test]
fn host_error_strings_become_script_panics() {
    gossa::add_package(
        "failing",
        "failing",
        vec![new_function("Boom", &[], |_| Err("host exploded".to_owned()))],
    );
    let err = gossa::run(
        r"package main

func test() any {
	return failing.Boom()
}
",
        "test",
        &[],
    )
    .unwrap_err();
    assert_eq!(err.message(), "host exploded");
}

#[test]
fn external_variables_are_addressable_from_scripts() {
    gossa::add_package(
        "hostvars",
        "hostvars",
        vec![new_var("Counter", Object::Int(1)), new_const("Limit", Object::Int(10))],
    );
    let program = Program::build(
        "vars.go",
        r"package main

func bump() int {
	hostvars.Counter = hostvars.Counter + 5
	return hostvars.Counter + hostvars.Limit
}
",
        &[],
    )
    .unwrap();
    assert_eq!(program.run("bump", &[]).unwrap(), Object::Int(16));
    // writes go to registry storage, so a second run sees the update
    assert_eq!(program.run("bump", &[]).unwrap(), Object::Int(21));
}

#[test]
fn multi_result_host_functions_unpack() {
    gossa::add_package(
        "divider",
        "divider",
        vec![new_function("DivMod", &["int", "int"], |args| {
            match (&args[0], &args[1]) {
                (Object::Int(a), Object::Int(b)) if *b != 0 => {
                    Ok(Object::Tuple(vec![Object::Int(a / b), Object::Int(a % b)]))
                }
                _ => Err("divide by zero".to_owned()),
            }
        })],
    );
    let result = gossa::run(
        r"package main

func test() int {
	q, r := divider.DivMod(17, 5)
	qi, _ := q.(int)
	ri, _ := r.(int)
	return qi*10 + ri
}
",
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::Int(32));
}

#[test]
fn methods_resolve_on_the_receivers_runtime_type() {
    gossa::add_package(
        "hostnet",
        "hostnet",
        vec![
            new_type(
                "Conn",
                vec![new_function("Echo", &["string"], |args| match &args[1] {
                    Object::String(s) => Ok(Object::string(format!("echo:{s}"))),
                    _ => Err("echo expects a string".to_owned()),
                })],
            ),
            new_function("Dial", &[], |_| {
                Ok(Object::Opaque(OpaqueObject::new("hostnet.Conn", Arc::new(7i32))))
            }),
        ],
    );
    let result = gossa::run(
        r#"package main

func test() any {
	c := hostnet.Dial()
	return c.Echo("hi")
}
"#,
        "test",
        &[],
    )
    .unwrap();
    assert_eq!(result, Object::string("echo:hi"));
}

#[test]
fn unknown_method_panics_with_the_type_name() {
    gossa::add_package(
        "hostempty",
        "hostempty",
        vec![
            new_type("Box", vec![]),
            new_function("New", &[], |_| {
                Ok(Object::Opaque(OpaqueObject::new("hostempty.Box", Arc::new(()))))
            }),
        ],
    );
    let err = gossa::run(
        r"package main

func test() any {
	b := hostempty.New()
	return b.Open()
}
",
        "test",
        &[],
    )
    .unwrap_err();
    assert!(err.message().contains("Open") && err.message().contains("hostempty.Box"));
}

#[test]
fn keywords_flatten_the_registry() {
    gossa::add_package(
        "kwpkg",
        "kwpkg",
        vec![
            new_function("Repeat", &["string", "int"], |_| Ok(Object::Nil)),
            new_var("Level", Object::Int(0)),
            new_const("Max", Object::Int(99)),
        ],
    );
    let entries = gossa::keywords();
    let repeat = entries.iter().find(|k| k.label == "kwpkg.Repeat").unwrap();
    assert_eq!(repeat.kind, KeywordKind::Function);
    assert_eq!(repeat.insert_text, "kwpkg.Repeat(${1:string},${2:int})");
    assert_eq!(repeat.insert_text_rules, InsertTextRule::InsertAsSnippet);

    let level = entries.iter().find(|k| k.label == "kwpkg.Level").unwrap();
    assert_eq!(level.kind, KeywordKind::Variable);
    assert_eq!(level.insert_text_rules, InsertTextRule::None);

    let max = entries.iter().find(|k| k.label == "kwpkg.Max").unwrap();
    assert_eq!(max.kind, KeywordKind::Constant);
}

#[test]
fn explicit_imports_of_registry_packages_work_too() {
    gossa::add_package(
        "host/strings2",
        "strings2",
        vec![new_function("Upper", &["string"], |args| match &args[0] {
            Object::String(s) => Ok(Object::string(s.to_uppercase())),
            _ => Err("expected a string".to_owned()),
        })],
    );
    let program = Program::build(
        "imp.go",
        r#"package main

import "host/strings2"

func test() any {
	return strings2.Upper("loud")
}
"#,
        &[],
    )
    .unwrap();
    assert_eq!(program.run("test", &[]).unwrap(), Object::string("LOUD"));
    assert!(program.imports().iter().any(|p| p == "host/strings2"));
}

#[test]
fn print_lines_are_timestamped_with_file_and_line() {
    let program = Program::build(
        "fmt.go",
        r#"package main

func test() {
	println("hello", 42)
}
"#,
        &[],
    )
    .unwrap();
    let (ctx, result) = program.run_with_context("test", &[]);
    result.unwrap();
    let output = ctx.output();
    assert!(output.starts_with('['), "missing timestamp in {output:?}");
    assert!(output.contains(" fmt.go:4] hello 42"), "unexpected line: {output:?}");
    // [HH:MM:SS ...] with two-digit fields
    let stamp = &output[1..9];
    assert_eq!(stamp.as_bytes()[2], b':');
    assert_eq!(stamp.as_bytes()[5], b':');
}

#[test]
fn dump_and_load_round_trip() {
    let program = Program::build(
        "dump.go",
        r"package main

var base = 40

func test(n int) int {
	return base + n
}
",
        &[],
    )
    .unwrap();
    let image = program.dump().unwrap();
    let restored = Program::load(&image).unwrap();
    assert_eq!(restored.run("test", &[Object::Int(2)]).unwrap(), Object::Int(42));
}

#[test]
fn recording_tracer_observes_instructions() {
    let program = Program::build(
        "traced.go",
        r"package main

func test() int {
	return 40 + 2
}
",
        &[],
    )
    .unwrap();
    let mut tracer = RecordingTracer::new();
    let result = program.run_with_tracer("test", &[], &mut tracer).unwrap();
    assert_eq!(result, Object::Int(42));
    assert!(tracer.events().iter().any(|e| e == "call main.test"));
    assert!(tracer.events().iter().any(|e| e.contains("return")));
}

#[test]
fn parse_func_list_enumerates_exported_functions() {
    let src = r"package main

func init() {
}

func Handler() {
}

func helper() {
}
";
    assert_eq!(gossa::parse_func_list(src, false).unwrap(), vec!["Handler"]);
    assert_eq!(gossa::parse_func_list(src, true).unwrap(), vec!["Handler", "helper"]);
}

#[test]
fn opaque_handles_round_trip_with_identity() {
    gossa::add_package(
        "passthru",
        "passthru",
        vec![new_function("Same", &["any"], |args| Ok(args[0].clone()))],
    );
    let program = Program::build(
        "opaque.go",
        r"package main

func test(h any) any {
	return passthru.Same(h)
}
",
        &[],
    )
    .unwrap();
    let handle = Object::Opaque(OpaqueObject::new("passthru.Token", Arc::new(1234u64)));
    let got = program.run("test", &[handle.clone()]).unwrap();
    assert_eq!(got, handle);
    let Object::Opaque(opaque) = got else { panic!("expected opaque") };
    assert_eq!(opaque.downcast::<u64>().as_deref(), Some(&1234));
}
