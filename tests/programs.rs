use minirv::lang::{
    BinOp, Expr, Lookup, Program, SemanticError, Stmt, Type, TypeRegistry,
};
use minirv::machine::{EmuError, parse_program};
use minirv::{EmuConfig, Error};

fn int(n: i32) -> Expr {
    Expr::int(n)
}

fn var(name: &str) -> Expr {
    Expr::var(name)
}

fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
    Expr::binary(op, l, r)
}

fn field(name: &str) -> Lookup {
    Lookup::field(name)
}

fn at(index: Expr) -> Lookup {
    Lookup::index(index)
}

fn captures(registry: TypeRegistry, body: Vec<Stmt>) -> Vec<i32> {
    let mut program = Program::new(registry, body);
    let outcome = minirv::run(&mut program, EmuConfig::default().with_capture_log())
        .unwrap_or_else(|e| panic!("program failed: {e}"));
    outcome.captures.iter().map(|v| v.to_i32()).collect()
}

fn result(body: Vec<Stmt>) -> Option<i32> {
    let mut program = Program::new(TypeRegistry::new(), body);
    minirv::run(&mut program, EmuConfig::default())
        .unwrap_or_else(|e| panic!("program failed: {e}"))
        .result
        .map(|v| v.to_i32())
}

fn run_err(body: Vec<Stmt>) -> Error {
    let mut program = Program::new(TypeRegistry::new(), body);
    match minirv::run(&mut program, EmuConfig::default()) {
        Ok(outcome) => panic!("expected failure, got {:?}", outcome.result),
        Err(e) => e,
    }
}

#[test]
fn struct_fields_are_addressed_by_offset() {
    let mut reg = TypeRegistry::new();
    let s = reg
        .declare_struct("S", [("a", Type::int()), ("b", Type::char())])
        .unwrap();
    let body = vec![
        Stmt::declare("v", s, Some(Expr::struct_lit(vec![int(1), Expr::char('a')]))),
        Stmt::Debug(Expr::get("v", vec![field("a")])),
        Stmt::Debug(Expr::get("v", vec![field("b")])),
    ];
    assert_eq!(captures(reg, body), [1, 97]);
}

#[test]
fn array_indexing_scales_by_element_size() {
    let elements = (0..5).map(int).collect();
    let body = vec![
        Stmt::declare("a", Type::array(Type::int(), 5), Some(Expr::array_lit(elements))),
        Stmt::Debug(Expr::get("a", vec![at(int(0))])),
        Stmt::Debug(Expr::get("a", vec![at(int(1))])),
        Stmt::Debug(Expr::get("a", vec![at(bin(BinOp::Add, int(1), int(2)))])),
    ];
    assert_eq!(captures(TypeRegistry::new(), body), [0, 1, 3]);
}

#[test]
fn arrays_of_structs() {
    let mut reg = TypeRegistry::new();
    let p = reg
        .declare_struct("P", [("x", Type::int()), ("y", Type::int())])
        .unwrap();
    let pairs = (1..=3)
        .map(|n| Expr::struct_lit(vec![int(n), int(n * 10)]))
        .collect();
    let body = vec![
        Stmt::declare("ps", Type::array(p, 3), Some(Expr::array_lit(pairs))),
        Stmt::set("ps", vec![at(int(1)), field("y")], int(-4)),
        Stmt::Debug(Expr::get("ps", vec![at(int(2)), field("y")])),
        Stmt::Debug(Expr::get("ps", vec![at(int(1)), field("y")])),
        Stmt::Debug(Expr::get("ps", vec![at(int(1)), field("x")])),
    ];
    assert_eq!(captures(reg, body), [30, -4, 2]);
}

#[test]
fn struct_copies_are_independent() {
    let mut reg = TypeRegistry::new();
    let a = reg
        .declare_struct("A", [("x", Type::int()), ("c", Type::char())])
        .unwrap();
    let b = reg
        .declare_struct("B", [("a1", a.clone()), ("a2", a)])
        .unwrap();
    let lit = |x, c| Expr::struct_lit(vec![int(x), Expr::char(c)]);
    let body = vec![
        Stmt::declare("v", b.clone(), Some(Expr::struct_lit(vec![lit(1, 'a'), lit(5, 'b')]))),
        Stmt::declare("w", b, Some(var("v"))),
        Stmt::set("w", vec![field("a1")], lit(2, 'c')),
        Stmt::Debug(Expr::get("v", vec![field("a1"), field("x")])),
        Stmt::Debug(Expr::get("v", vec![field("a1"), field("c")])),
        Stmt::Debug(Expr::get("w", vec![field("a1"), field("x")])),
        Stmt::Debug(Expr::get("w", vec![field("a1"), field("c")])),
        Stmt::Debug(Expr::get("w", vec![field("a2"), field("x")])),
    ];
    assert_eq!(captures(reg, body), [1, 97, 2, 99, 5]);
}

fn sum_to() -> Stmt {
    Stmt::function(
        "f",
        vec![("x", Type::int())],
        Type::int(),
        vec![Stmt::if_else(
            bin(BinOp::Eq, var("x"), int(0)),
            Stmt::Block(vec![Stmt::Return(int(0))]),
            Some(Stmt::Block(vec![Stmt::Return(bin(
                BinOp::Add,
                var("x"),
                Expr::call("f", vec![bin(BinOp::Sub, var("x"), int(1))]),
            ))])),
        )],
    )
}

#[test]
fn recursive_sum() {
    let body = vec![sum_to(), Stmt::Debug(Expr::call("f", vec![int(4)]))];
    assert_eq!(result(body), Some(10));
}

fn fib_native(n: i32) -> i32 {
    if n < 2 { n } else { fib_native(n - 1) + fib_native(n - 2) }
}

#[test]
fn fibonacci_matches_native() {
    let fib = Stmt::function(
        "fib",
        vec![("n", Type::int())],
        Type::int(),
        vec![
            Stmt::if_else(
                bin(BinOp::Lt, var("n"), int(2)),
                Stmt::Return(var("n")),
                None,
            ),
            Stmt::Return(bin(
                BinOp::Add,
                Expr::call("fib", vec![bin(BinOp::Sub, var("n"), int(1))]),
                Expr::call("fib", vec![bin(BinOp::Sub, var("n"), int(2))]),
            )),
        ],
    );
    for n in 0..10 {
        let body = vec![fib.clone(), Stmt::Debug(Expr::call("fib", vec![int(n)]))];
        assert_eq!(result(body), Some(fib_native(n)), "fib({n})");
    }
}

#[test]
fn inner_declarations_do_not_leak() {
    let body = vec![
        Stmt::declare("a", Type::int(), Some(int(1))),
        Stmt::Block(vec![Stmt::declare("a", Type::int(), Some(int(2)))]),
        Stmt::Debug(var("a")),
    ];
    assert_eq!(result(body), Some(1));
}

#[test]
fn type_violations_stop_before_execution() {
    let err = run_err(vec![Stmt::Debug(bin(BinOp::Add, int(1), Expr::str("x")))]);
    assert!(matches!(err, Error::Semantic(SemanticError::BadOperands { .. })));

    let err = run_err(vec![Stmt::function(
        "f",
        vec![],
        Type::char(),
        vec![Stmt::Return(int(1))],
    )]);
    assert!(matches!(err, Error::Semantic(SemanticError::TypeMismatch { .. })));
}

#[test]
fn function_without_return_rejected_at_declaration() {
    let err = run_err(vec![Stmt::function(
        "f",
        vec![],
        Type::int(),
        vec![Stmt::Debug(int(1))],
    )]);
    assert!(matches!(err, Error::Semantic(SemanticError::NoReturn { .. })));
}

fn count_to_five() -> Stmt {
    Stmt::for_loop(
        Stmt::declare("i", Type::int(), Some(int(0))),
        bin(BinOp::Lt, var("i"), int(5)),
        Stmt::set("i", vec![], bin(BinOp::Add, var("i"), int(1))),
        Stmt::Block(vec![Stmt::Debug(var("i"))]),
    )
}

#[test]
fn for_loop_captures_in_order() {
    assert_eq!(captures(TypeRegistry::new(), vec![count_to_five()]), [0, 1, 2, 3, 4]);
}

#[test]
fn break_and_continue_inside_a_function() {
    // skips 3 via continue, stops at 6 via break; locals in the body are freed
    let body = Stmt::Block(vec![
        Stmt::declare("t", Type::int(), Some(var("i"))),
        Stmt::if_else(bin(BinOp::Eq, var("t"), int(3)), Stmt::Continue, None),
        Stmt::if_else(bin(BinOp::Eq, var("t"), int(6)), Stmt::Break, None),
        Stmt::set("s", vec![], bin(BinOp::Add, var("s"), var("t"))),
    ]);
    let g = Stmt::function(
        "g",
        vec![("limit", Type::int())],
        Type::int(),
        vec![
            Stmt::declare("s", Type::int(), Some(int(0))),
            Stmt::for_loop(
                Stmt::declare("i", Type::int(), Some(int(0))),
                bin(BinOp::Lt, var("i"), var("limit")),
                Stmt::set("i", vec![], bin(BinOp::Add, var("i"), int(1))),
                body,
            ),
            Stmt::Return(var("s")),
        ],
    );
    let main = vec![
        Stmt::declare("keep", Type::int(), Some(int(42))),
        g,
        Stmt::Debug(Expr::call("g", vec![int(10)])),
        Stmt::Debug(Expr::call("g", vec![int(3)])),
        Stmt::Debug(var("keep")),
    ];
    assert_eq!(captures(TypeRegistry::new(), main), [12, 3, 42]);
}

#[test]
fn while_without_step_continues_at_condition() {
    let body = vec![
        Stmt::declare("i", Type::int(), Some(int(0))),
        Stmt::declare("odd", Type::int(), Some(int(0))),
        Stmt::while_loop(
            bin(BinOp::Lt, var("i"), int(9)),
            Stmt::Block(vec![
                Stmt::set("i", vec![], bin(BinOp::Add, var("i"), int(1))),
                Stmt::if_else(
                    bin(
                        BinOp::Eq,
                        var("i"),
                        bin(BinOp::Mul, int(2), bin(BinOp::Div, var("i"), int(2))),
                    ),
                    Stmt::Continue,
                    None,
                ),
                Stmt::set("odd", vec![], bin(BinOp::Add, var("odd"), int(1))),
            ]),
        ),
        Stmt::Debug(var("odd")),
    ];
    assert_eq!(result(body), Some(5));
}

#[test]
fn pointers_read_and_write_through() {
    let int_ptr = Type::pointer(Type::int());
    let set_first = Stmt::function(
        "store",
        vec![("p", int_ptr.clone()), ("v", Type::int())],
        Type::int(),
        vec![
            Stmt::set("p", vec![at(int(0))], var("v")),
            Stmt::Return(int(0)),
        ],
    );
    let body = vec![
        Stmt::declare("x", Type::int(), Some(int(5))),
        Stmt::declare("p", int_ptr.clone(), Some(Expr::address_of("x", vec![]))),
        Stmt::Debug(Expr::deref(var("p"))),
        Stmt::declare(
            "a",
            Type::array(Type::int(), 3),
            Some(Expr::array_lit(vec![int(10), int(20), int(30)])),
        ),
        Stmt::declare("q", int_ptr, Some(Expr::address_of("a", vec![at(int(0))]))),
        Stmt::Debug(Expr::deref(bin(BinOp::Add, var("q"), int(2)))),
        Stmt::Debug(Expr::get("q", vec![at(int(1))])),
        Stmt::set("q", vec![at(int(1))], int(99)),
        Stmt::Debug(Expr::get("a", vec![at(int(1))])),
        set_first,
        Stmt::Expr(Expr::call("store", vec![Expr::address_of("x", vec![]), int(7)])),
        Stmt::Debug(var("x")),
    ];
    assert_eq!(captures(TypeRegistry::new(), body), [5, 30, 20, 99, 7]);
}

#[test]
fn address_of_a_function_local() {
    let body = vec![
        Stmt::function(
            "twice",
            vec![("n", Type::int())],
            Type::int(),
            vec![
                Stmt::declare("local", Type::int(), Some(var("n"))),
                Stmt::declare(
                    "p",
                    Type::pointer(Type::int()),
                    Some(Expr::address_of("local", vec![])),
                ),
                Stmt::set("p", vec![at(int(0))], bin(BinOp::Mul, var("n"), int(2))),
                Stmt::Return(var("local")),
            ],
        ),
        Stmt::Debug(Expr::call("twice", vec![int(21)])),
    ];
    assert_eq!(result(body), Some(42));
}

#[test]
fn multi_word_return_values() {
    let mut reg = TypeRegistry::new();
    let p = reg
        .declare_struct("P", [("a", Type::int()), ("b", Type::int())])
        .unwrap();
    let body = vec![
        Stmt::function(
            "mk",
            vec![("a", Type::int())],
            p.clone(),
            vec![Stmt::Return(Expr::struct_lit(vec![
                var("a"),
                bin(BinOp::Mul, var("a"), int(2)),
            ]))],
        ),
        Stmt::declare("r", p, Some(Expr::call("mk", vec![int(3)]))),
        Stmt::Debug(Expr::get("r", vec![field("b")])),
        Stmt::Debug(Expr::get("r", vec![field("a")])),
    ];
    assert_eq!(captures(reg, body), [6, 3]);
}

#[test]
fn functions_see_top_level_variables() {
    let body = vec![
        Stmt::declare("g", Type::int(), Some(int(10))),
        Stmt::function(
            "addg",
            vec![("x", Type::int())],
            Type::int(),
            vec![Stmt::Return(bin(BinOp::Add, var("x"), var("g")))],
        ),
        Stmt::set("g", vec![], int(100)),
        Stmt::Debug(Expr::call("addg", vec![int(5)])),
    ];
    assert_eq!(result(body), Some(105));
}

#[test]
fn literals_and_logic() {
    let body = vec![
        Stmt::declare("s", Type::array(Type::char(), 2), Some(Expr::str("hi"))),
        Stmt::Debug(Expr::get("s", vec![at(int(1))])),
        Stmt::Debug(Expr::bool(true)),
        Stmt::Debug(bin(BinOp::And, Expr::bool(true), Expr::bool(false))),
        Stmt::Debug(bin(BinOp::Or, Expr::bool(false), int(7))),
    ];
    assert_eq!(captures(TypeRegistry::new(), body), [105, 1, 0, 1]);
}

#[test]
fn unreachable_is_harmless_when_skipped_and_fatal_when_hit() {
    let body = vec![
        Stmt::if_else(int(0), Stmt::Unreachable, None),
        Stmt::Debug(int(1)),
    ];
    assert_eq!(result(body), Some(1));

    let err = run_err(vec![Stmt::Unreachable]);
    assert!(matches!(err, Error::Emu(EmuError::Raised { .. })));
}

#[test]
fn listing_reassembles_to_the_same_program() {
    let mut program = Program::new(TypeRegistry::new(), vec![sum_to(), count_to_five()]);
    let code = minirv::compile(&mut program).unwrap();
    let reparsed = parse_program(&code.to_string()).unwrap();
    assert_eq!(reparsed.len(), code.len());
    let config = EmuConfig::default().with_capture_log();
    let direct = minirv::execute(&code, config.clone()).unwrap();
    let again = minirv::execute(&reparsed, config).unwrap();
    assert_eq!(direct.captures, again.captures);
    assert_eq!(direct.steps, again.steps);
}

#[test]
fn empty_program_has_no_result() {
    assert_eq!(result(vec![]), None);
}
