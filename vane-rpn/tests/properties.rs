//! Universal engine properties: overload stability, try idempotence,
//! loop limits and string round-trips.

use std::sync::Arc;

use vane_rpn::prelude::*;
use vane_rpn::Registry;

fn compiler_with(params: Params) -> Compiler {
    Compiler::new(Arc::new(Registry::with_defaults()), params).unwrap()
}

fn evaluate(source: &str) -> Vec<Value> {
    let mut context = Context::new();
    compiler_with(Params::new())
        .compile(source)
        .unwrap()
        .evaluate(&mut context)
        .unwrap()
}

#[test]
fn binary_arithmetic_matches_the_domain() {
    // Long stays long, mixing in a double widens, exact domains stay exact.
    assert_eq!(evaluate("7 2 /"), vec![Value::Long(3)]);
    assert_eq!(evaluate("7 2.0 /"), vec![Value::Double(3.5)]);
    assert_eq!(
        evaluate("\"1/3\" rat \"1/6\" rat +"),
        vec![Value::Rational(num_rational::Rational64::new(1, 2))]
    );
    assert_eq!(
        evaluate("\"9000000000000000000\" bigint \"9000000000000000000\" bigint +"),
        vec![Value::BigInteger("18000000000000000000".parse().unwrap())]
    );
}

#[test]
fn overload_resolution_is_stable() {
    // `+` resolves per the runtime types at the same call site.
    assert_eq!(evaluate("1 2 +"), vec![Value::Long(3)]);
    assert_eq!(evaluate("\"a\" \"b\" +"), vec![Value::from("ab")]);
    assert_eq!(evaluate("1.5 1 +"), vec![Value::Double(2.5)]);

    // Identical programs always take the same overload.
    for _ in 0..32 {
        assert_eq!(evaluate("3 4 eq"), vec![Value::Boolean(false)]);
    }
}

#[test]
fn try_leaves_the_pre_try_stack_intact() {
    // The failing body's pushes are unwound; the handler sees the
    // pre-try stack.
    assert_eq!(
        evaluate("7 try 1 2 3 fail catch depth end"),
        vec![Value::Long(7), Value::Long(1)]
    );
}

#[test]
fn try_with_message_propagates() {
    let mut context = Context::new();
    let error = compiler_with(Params::new())
        .compile("try \"nope\" error catch 1 end")
        .unwrap()
        .execute(&mut context)
        .unwrap_err();
    assert!(!error.is_silent());
}

#[test]
fn while_limit_is_enforced() {
    let mut params = Params::new();
    params.set("LoopLimit", "16");
    let mut context = Context::new();
    context.set_loop_limit(16);
    let error = compiler_with(params)
        .compile("true while true end")
        .unwrap()
        .execute(&mut context)
        .unwrap_err();
    assert_eq!(error.to_string(), "While iterations exceeded 16");
}

#[test]
fn do_limit_is_enforced() {
    let mut context = Context::new();
    context.set_loop_limit(8);
    let error = compiler_with(Params::new())
        .compile("do true end")
        .unwrap()
        .execute(&mut context)
        .unwrap_err();
    assert_eq!(error.to_string(), "Do iterations exceeded 8");
}

#[test]
fn string_round_trips() {
    assert_eq!(evaluate("12 str int"), vec![Value::Long(12)]);
    assert_eq!(evaluate("-3.25 str float"), vec![Value::Double(-3.25)]);
    assert_eq!(evaluate("true str bool"), vec![Value::Boolean(true)]);
    assert_eq!(
        evaluate("\"22/7\" rat str rat"),
        vec![Value::Rational(num_rational::Rational64::new(22, 7))]
    );
}

#[test]
fn null_propagation_is_explicit() {
    assert_eq!(evaluate("null null?"), vec![Value::Boolean(true)]);
    assert_eq!(evaluate("null 3 default"), vec![Value::Long(3)]);

    let mut context = Context::new();
    let error = compiler_with(Params::new())
        .compile("null assert")
        .unwrap()
        .execute(&mut context)
        .unwrap_err();
    assert!(error.is_silent());
}

#[test]
fn unknown_word_fails_at_compile_time() {
    let error = compiler_with(Params::new()).compile("2 3 zorp").unwrap_err();
    assert!(matches!(error, CompileError::UnknownOperation { .. }));
}

#[test]
fn operation_args_failure_names_the_site() {
    // A boolean `not` over a string matches no overload.
    let mut context = Context::new();
    let error = compiler_with(Params::new())
        .compile("\"x\" not")
        .unwrap()
        .execute(&mut context)
        .unwrap_err();
    match error {
        ExecuteError::OperationArgs { name, .. } => assert_eq!(name, "not"),
        other => panic!("unexpected: {other:?}"),
    }
}
