//! End-to-end execution scenarios for the compute engine.

use std::sync::Arc;

use vane_rpn::prelude::*;
use vane_rpn::Registry;

fn compiler() -> Compiler {
    Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap()
}

fn evaluate(source: &str) -> Vec<Value> {
    let mut context = Context::new();
    compiler()
        .compile(source)
        .unwrap()
        .evaluate(&mut context)
        .unwrap()
}

#[test]
fn addition_of_longs() {
    assert_eq!(evaluate("2 3 +"), vec![Value::Long(5)]);
}

#[test]
fn divrem_pushes_remainder_then_quotient() {
    assert_eq!(evaluate("10 3 /%"), vec![Value::Long(1), Value::Long(3)]);
}

#[test]
fn approximate_equality_with_tolerance() {
    assert_eq!(evaluate("12.4 12.5 0.2 eq~"), vec![Value::Boolean(true)]);
    assert_eq!(
        evaluate("12.4 \"12.5\" float 0.2 eq~"),
        vec![Value::Boolean(true)]
    );
}

#[test]
fn marks_do_not_fence_pops() {
    assert_eq!(
        evaluate("1 2 3 [ drop drop ] depth"),
        vec![Value::Long(1), Value::Long(1)]
    );
}

#[test]
fn try_catches_division_by_zero() {
    assert_eq!(
        evaluate("try 1 0 / catch \"div-by-zero\" end"),
        vec![Value::from("div-by-zero")]
    );
}

#[test]
fn do_loop_counts_down() {
    // Three iterations decrement 3 to 0; the comparison consumes the
    // duplicate each round.
    assert_eq!(evaluate("3 do -- dup 0 gt end"), vec![Value::Long(0)]);
}

#[test]
fn result_store_round_trip() {
    let mut context = Context::new();
    compiler()
        .compile("2 3 + $0=")
        .unwrap()
        .execute(&mut context)
        .unwrap();
    assert_eq!(context.result().value(), &Value::Long(5));
}

#[test]
fn inputs_feed_the_stack() {
    let mut context = Context::new();
    context.add_input(PointValue::new(
        PointId::from(1),
        Stamp::from_ticks(0),
        None,
        Value::Long(40),
    ));
    context.add_input(PointValue::new(
        PointId::from(2),
        Stamp::from_ticks(0),
        None,
        Value::Long(2),
    ));
    let stack = compiler()
        .compile("$1 $2 + $# +")
        .unwrap()
        .evaluate(&mut context)
        .unwrap();
    assert_eq!(stack, vec![Value::Long(44)]);
}

#[test]
fn memory_slots_persist_within_execution() {
    assert_eq!(
        evaluate("7 %3= %3 %3 +"),
        vec![Value::Long(14)]
    );
}

#[test]
fn params_are_strings() {
    let mut context = Context::new();
    context.add_param("12");
    let stack = compiler()
        .compile("#1 int 1 +")
        .unwrap()
        .evaluate(&mut context)
        .unwrap();
    assert_eq!(stack, vec![Value::Long(13)]);
}

#[test]
fn macros_expand_before_compilation() {
    let mut params = Params::new();
    params.define_macro("AVG(A,B)", "A B + 2 /");
    let compiler = Compiler::new(Arc::new(Registry::with_defaults()), params).unwrap();
    let mut context = Context::new();
    let stack = compiler
        .compile("avg(10, 20)")
        .unwrap()
        .evaluate(&mut context)
        .unwrap();
    assert_eq!(stack, vec![Value::Long(15)]);
}

#[test]
fn call_compiles_and_runs_source() {
    assert_eq!(evaluate("2 \"3 +\" call"), vec![Value::Long(5)]);
}

#[test]
fn fail_returns_null_nulls_the_result() {
    let mut context = Context::new();
    context.set_fail_returns_null(true);
    context
        .result_mut()
        .set_value(Value::Long(99));
    compiler()
        .compile("fail")
        .unwrap()
        .execute(&mut context)
        .unwrap();
    assert_eq!(context.result().value(), &Value::Null);
}

#[test]
fn conditional_keeps_the_selected_value() {
    assert_eq!(evaluate("10 20 true ?:"), vec![Value::Long(10)]);
    assert_eq!(evaluate("10 20 false ?:"), vec![Value::Long(20)]);
}

#[test]
fn reduce_folds_the_frame() {
    assert_eq!(evaluate("1 2 3 4 reduce + end"), vec![Value::Long(10)]);
    assert_eq!(
        evaluate("1 2 3 4 reduce 2 + end"),
        vec![Value::Long(1), Value::Long(9)]
    );
    // The popped-target variant.
    assert_eq!(
        evaluate("1 2 3 4 2 reduce* + end"),
        vec![Value::Long(1), Value::Long(9)]
    );
}
