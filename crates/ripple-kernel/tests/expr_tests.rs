//! Evaluation semantics: literals, coercion, member access,
//! assignment paths, receiver binding, filter pipes, and the sandbox.

use std::cell::RefCell;
use std::rc::Rc;

use ripple_kernel::{
    Error, EvalError, FuncVal, Scope, SecurityViolation, Value, ValueMap,
};
use rstest::rstest;

fn scope() -> Scope {
    Scope::new_root()
}

fn eval(src: &str) -> Value {
    scope().eval(src).unwrap_or_else(|e| panic!("eval error for {src:?}: {e}"))
}

fn obj(pairs: Vec<(&str, Value)>) -> Value {
    Value::object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<ValueMap>(),
    )
}

/// Read a member off an object/array value (test convenience).
fn member(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(rc) => rc.borrow().get(key).cloned().unwrap_or_default(),
        Value::Array(rc) => key
            .parse::<usize>()
            .ok()
            .and_then(|i| rc.borrow().get(i).cloned())
            .unwrap_or_default(),
        _ => Value::Undefined,
    }
}

// =============================================================================
// LITERALS & ARITHMETIC
// =============================================================================

#[rstest]
#[case("233", Value::Num(233.0))]
#[case("'hi'", Value::str("hi"))]
#[case("true", Value::Bool(true))]
#[case("null", Value::Null)]
#[case("undefined", Value::Undefined)]
#[case("1 + 2 * 3", Value::Num(7.0))]
#[case("(1 + 2) * 3", Value::Num(9.0))]
#[case("10 % 3", Value::Num(1.0))]
#[case("'5' * '2'", Value::Num(10.0))]
#[case("'a' + 'b'", Value::str("ab"))]
#[case("'a' + 1", Value::str("a1"))]
#[case("1 + null", Value::Num(1.0))]
#[case("true + 1", Value::Num(2.0))]
#[case("-'5'", Value::Num(-5.0))]
#[case("+'5'", Value::Num(5.0))]
#[case("!'a'", Value::Bool(false))]
#[case("!!'a'", Value::Bool(true))]
#[case("!0", Value::Bool(true))]
fn eval_scalars(#[case] src: &str, #[case] expected: Value) {
    assert_eq!(eval(src), expected);
}

#[test]
fn eval_undefined_operand_rules() {
    // `+` yields the defined operand; `-` substitutes zero.
    assert_eq!(eval("1 + missing"), Value::Num(1.0));
    assert_eq!(eval("missing + 'a'"), Value::str("a"));
    assert_eq!(eval("missing + missing"), Value::Undefined);
    assert_eq!(eval("missing - 1"), Value::Num(-1.0));
    assert_eq!(eval("1 - missing"), Value::Num(1.0));
    assert_eq!(eval("-missing"), Value::Num(0.0));
    match eval("2 * missing") {
        Value::Num(n) => assert!(n.is_nan()),
        other => panic!("expected NaN, got {other:?}"),
    }
}

#[test]
fn eval_division() {
    assert_eq!(eval("9 / 2"), Value::Num(4.5));
    match eval("0 / 0") {
        Value::Num(n) => assert!(n.is_nan()),
        other => panic!("expected NaN, got {other:?}"),
    }
    match eval("1 / 0") {
        Value::Num(n) => assert!(n.is_infinite()),
        other => panic!("expected Infinity, got {other:?}"),
    }
}

// =============================================================================
// COMPARISON & LOGICAL
// =============================================================================

#[rstest]
#[case("'2' == 2", true)]
#[case("'2' === 2", false)]
#[case("2 === 2", true)]
#[case("null == undefined", true)]
#[case("null === undefined", false)]
#[case("'a' != 'b'", true)]
#[case("'a' !== 'a'", false)]
#[case("1 < '2'", true)]
#[case("'b' > 'a'", true)]
#[case("2 <= 2", true)]
#[case("3 >= 4", false)]
#[case("missing < 1", false)]
fn eval_comparisons(#[case] src: &str, #[case] expected: bool) {
    assert_eq!(eval(src), Value::Bool(expected));
}

#[test]
fn eval_logical_returns_operand_values() {
    assert_eq!(eval("false || 'x'"), Value::str("x"));
    assert_eq!(eval("'x' || boom()"), Value::str("x"));
    assert_eq!(eval("0 && boom()"), Value::Num(0.0));
    assert_eq!(eval("1 && 'y'"), Value::str("y"));
}

#[test]
fn eval_ternary_short_circuits() {
    assert_eq!(eval("true ? 1 : boom()"), Value::Num(1.0));
    assert_eq!(eval("'' ? boom() : 2"), Value::Num(2.0));
}

// =============================================================================
// IDENTIFIERS, MEMBERS, LOCALS
// =============================================================================

#[test]
fn eval_identifier_resolution() {
    let s = scope();
    s.set("name", "Keal");
    assert_eq!(s.eval("name").unwrap(), Value::str("Keal"));
    assert_eq!(s.eval("absent").unwrap(), Value::Undefined);
}

#[test]
fn eval_member_nil_short_circuits() {
    assert_eq!(eval("a.b.c.d"), Value::Undefined);
    assert_eq!(eval("a['b']['c']"), Value::Undefined);
    let s = scope();
    s.set("a", Value::Null);
    assert_eq!(s.eval("a.b").unwrap(), Value::Undefined);
}

#[test]
fn eval_member_nil_short_circuits_before_the_sandbox() {
    // The nil rule is unconditional: a forbidden name never
    // dereferences a nil base, so nothing is there to block.
    assert_eq!(eval("a.constructor"), Value::Undefined);
    assert_eq!(eval("a['constructor']"), Value::Undefined);
    assert_eq!(eval("a.__proto__"), Value::Undefined);
    let s = scope();
    s.set("a", Value::Null);
    assert_eq!(s.eval("a.constructor").unwrap(), Value::Undefined);
}

#[test]
fn eval_member_access_forms() {
    let s = scope();
    s.set("user", obj(vec![("name", Value::str("ann"))]));
    s.set("key", "name");
    assert_eq!(s.eval("user.name").unwrap(), Value::str("ann"));
    assert_eq!(s.eval("user['name']").unwrap(), Value::str("ann"));
    assert_eq!(s.eval("user[key]").unwrap(), Value::str("ann"));

    s.set("list", Value::array(vec![Value::Num(7.0), Value::Num(8.0)]));
    assert_eq!(s.eval("list[1]").unwrap(), Value::Num(8.0));
    assert_eq!(s.eval("list.length").unwrap(), Value::Num(2.0));
    assert_eq!(s.eval("list[9]").unwrap(), Value::Undefined);
    assert_eq!(s.eval("'abc'.length").unwrap(), Value::Num(3.0));
}

#[test]
fn eval_array_and_object_construction() {
    let v = eval("[1, 'x', [true]]");
    assert_eq!(member(&v, "0"), Value::Num(1.0));
    assert_eq!(member(&member(&v, "2"), "0"), Value::Bool(true));

    let v = eval("{a: 1, 'b c': 2, 3: 'three'}");
    assert_eq!(member(&v, "a"), Value::Num(1.0));
    assert_eq!(member(&v, "b c"), Value::Num(2.0));
    assert_eq!(member(&v, "3"), Value::str("three"));
}

#[test]
fn eval_locals_shadow_scope() {
    let s = scope();
    s.set("a", 10.0);
    s.set("b", 2.0);
    let locals = obj(vec![("a", Value::Num(1.0))]);
    assert_eq!(s.eval_with("a + b", &locals).unwrap(), Value::Num(3.0));
    // An own key with an undefined value still shadows.
    let locals = obj(vec![("a", Value::Undefined)]);
    assert_eq!(s.eval_with("a", &locals).unwrap(), Value::Undefined);
}

#[test]
fn eval_this_is_the_scope_data() {
    let s = scope();
    s.set("x", 42.0);
    assert_eq!(s.eval("this.x").unwrap(), Value::Num(42.0));
    s.eval("this.y = 1").unwrap();
    assert_eq!(s.get("y"), Value::Num(1.0));
}

#[test]
fn eval_program_yields_last_expression() {
    let s = scope();
    assert_eq!(s.eval("a = 1; b = 2; a + b").unwrap(), Value::Num(3.0));
    assert_eq!(s.eval("").unwrap(), Value::Undefined);
}

// =============================================================================
// ASSIGNMENT
// =============================================================================

#[test]
fn assignment_creates_intermediate_containers() {
    let s = scope();
    let out = s.eval(r#"a["b"].c.d = 233"#).unwrap();
    assert_eq!(out, Value::Num(233.0));
    let a = s.get("a");
    assert_eq!(member(&member(&member(&a, "b"), "c"), "d"), Value::Num(233.0));
}

#[test]
fn assignment_reads_do_not_fabricate() {
    let s = scope();
    assert_eq!(s.eval("a.b.c").unwrap(), Value::Undefined);
    // A plain read must not have created `a`.
    assert_eq!(s.get("a"), Value::Undefined);
}

#[test]
fn assignment_chains_right_to_left() {
    let s = scope();
    assert_eq!(s.eval("a = b = 5").unwrap(), Value::Num(5.0));
    assert_eq!(s.get("a"), Value::Num(5.0));
    assert_eq!(s.get("b"), Value::Num(5.0));
}

#[test]
fn assignment_into_existing_structures() {
    let s = scope();
    s.set("user", obj(vec![("name", Value::str("ann"))]));
    s.eval("user.name = 'bo'").unwrap();
    assert_eq!(member(&s.get("user"), "name"), Value::str("bo"));

    s.set("list", Value::array(vec![Value::Num(1.0)]));
    s.eval("list[2] = 9").unwrap();
    let list = s.get("list");
    assert_eq!(member(&list, "2"), Value::Num(9.0));
    assert_eq!(member(&list, "1"), Value::Undefined);
}

#[test]
fn assignment_through_locals_owned_names() {
    let s = scope();
    s.set("a", 1.0);
    let locals = obj(vec![("a", Value::Num(0.0))]);
    s.eval_with("a = 9", &locals).unwrap();
    // The locals object took the write; the scope kept its value.
    assert_eq!(member(&locals, "a"), Value::Num(9.0));
    assert_eq!(s.get("a"), Value::Num(1.0));
}

#[test]
fn assignment_into_primitive_fails() {
    let s = scope();
    s.set("n", 5.0);
    let err = s.eval("n.x = 1").unwrap_err();
    assert!(matches!(
        err,
        Error::Eval(EvalError::CannotAssign { .. })
    ));
}

// =============================================================================
// CALLS & RECEIVER BINDING
// =============================================================================

/// A function returning `this.tag`, for receiver observation.
fn tag_reader() -> Value {
    Value::func(FuncVal::new(|this, _| {
        Ok(match this {
            Value::Object(rc) => rc.borrow().get("tag").cloned().unwrap_or_default(),
            _ => Value::Undefined,
        })
    }))
}

#[test]
fn method_call_binds_receiver_to_object() {
    let s = scope();
    s.set(
        "user",
        obj(vec![("tag", Value::str("user-tag")), ("read", tag_reader())]),
    );
    assert_eq!(s.eval("user.read()").unwrap(), Value::str("user-tag"));
    assert_eq!(s.eval("user['read']()").unwrap(), Value::str("user-tag"));
}

#[test]
fn bare_call_binds_receiver_to_owner() {
    let s = scope();
    s.set("tag", "scope-tag");
    s.set("read", tag_reader());
    assert_eq!(s.eval("read()").unwrap(), Value::str("scope-tag"));

    // A locals-owned name binds `this` to the locals object.
    let locals = obj(vec![("tag", Value::str("local-tag")), ("read", tag_reader())]);
    assert_eq!(
        s.eval_with("read()", &locals).unwrap(),
        Value::str("local-tag")
    );
}

#[test]
fn call_arguments_evaluate_in_order() {
    let s = scope();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    s.set(
        "join",
        Value::func(FuncVal::new(move |_, args| {
            log.borrow_mut().extend(args.iter().map(|v| v.to_string()));
            Ok(Value::Num(args.len() as f64))
        })),
    );
    assert_eq!(s.eval("join(1, 'a', true)").unwrap(), Value::Num(3.0));
    assert_eq!(*seen.borrow(), vec!["1", "a", "true"]);
}

#[test]
fn calling_a_non_function_fails() {
    let s = scope();
    s.set("n", 5.0);
    assert!(matches!(
        s.eval("n()").unwrap_err(),
        Error::Eval(EvalError::NotCallable(_))
    ));
    assert!(matches!(
        s.eval("missing()").unwrap_err(),
        Error::Eval(EvalError::NotCallable(_))
    ));
}

#[test]
fn host_function_errors_surface_as_user_errors() {
    let s = scope();
    s.set(
        "fail",
        Value::func(FuncVal::new(|_, _| {
            Err(ripple_kernel::HostError::new("boom"))
        })),
    );
    assert!(matches!(
        s.eval("fail()").unwrap_err(),
        Error::Eval(EvalError::Host(_))
    ));
}

// =============================================================================
// FILTER PIPES
// =============================================================================

#[test]
fn filter_pipe_end_to_end() {
    let s = scope();
    s.set(
        "arr",
        Value::array(vec![
            Value::str("aji"),
            Value::str("buck"),
            Value::str("llaji"),
        ]),
    );
    let out = s.eval(r#"arr | filter:"a""#).unwrap();
    match out {
        Value::Array(rc) => {
            let names: Vec<String> = rc.borrow().iter().map(|v| v.to_string()).collect();
            assert_eq!(names, vec!["aji", "llaji"]);
        }
        other => panic!("expected array, got {other:?}"),
    }
}

#[test]
fn filter_pipe_chains_and_extra_args() {
    let s = scope();
    s.set("word", "keal");
    assert_eq!(
        s.eval("word | uppercase | limitTo:2").unwrap(),
        Value::str("KE")
    );
}

#[test]
fn unknown_filter_is_an_error() {
    assert!(matches!(
        scope().eval("1 | nosuch").unwrap_err(),
        Error::Eval(EvalError::UnknownFilter(name)) if name == "nosuch"
    ));
}

// =============================================================================
// SANDBOX
// =============================================================================

#[test]
fn sandbox_blocks_constructor_escape() {
    let s = scope();
    s.set(
        "fn",
        Value::func(FuncVal::new(|_, _| Ok(Value::Undefined))),
    );
    let err = s.eval(r#"fn.constructor("return window;")()"#).unwrap_err();
    assert!(matches!(
        err,
        Error::Eval(EvalError::Security(SecurityViolation::ForbiddenMember(name))) if name == "constructor"
    ));
}

#[rstest]
#[case("a.constructor")]
#[case("a.__proto__")]
#[case("a.__defineGetter__")]
#[case("a.__defineSetter__")]
#[case("a.__lookupGetter__")]
#[case("a.__lookupSetter__")]
#[case("a['constructor']")]
#[case("a.constructor = 1")]
#[case("constructor")]
fn sandbox_blocks_forbidden_members(#[case] src: &str) {
    let s = scope();
    s.set("a", obj(vec![]));
    assert!(matches!(
        s.eval(src).unwrap_err(),
        Error::Eval(EvalError::Security(SecurityViolation::ForbiddenMember(_)))
    ));
}

#[test]
fn sandbox_blocks_computed_forbidden_member() {
    let s = scope();
    s.set("a", obj(vec![]));
    s.set("key", "__proto__");
    assert!(matches!(
        s.eval("a[key]").unwrap_err(),
        Error::Eval(EvalError::Security(SecurityViolation::ForbiddenMember(_)))
    ));
}

fn window_like() -> Value {
    obj(vec![
        ("setTimeout", Value::Bool(true)),
        ("document", Value::Bool(true)),
        ("location", Value::Bool(true)),
        ("alert", Value::Bool(true)),
    ])
}

#[test]
fn sandbox_blocks_host_global_values() {
    let s = scope();
    s.set("win", window_like());
    assert!(matches!(
        s.eval("win").unwrap_err(),
        Error::Eval(EvalError::Security(SecurityViolation::HostGlobal))
    ));
    // Reached through a member hop, too.
    s.set("holder", obj(vec![("w", window_like())]));
    assert!(matches!(
        s.eval("holder.w").unwrap_err(),
        Error::Eval(EvalError::Security(SecurityViolation::HostGlobal))
    ));
}

#[test]
fn sandbox_blocks_dom_nodes() {
    let s = scope();
    s.set(
        "el",
        obj(vec![
            ("children", Value::array(vec![])),
            ("nodeName", Value::str("DIV")),
        ]),
    );
    assert!(matches!(
        s.eval("el").unwrap_err(),
        Error::Eval(EvalError::Security(SecurityViolation::DomNode))
    ));
}

#[test]
fn sandbox_blocks_reflective_functions() {
    let s = scope();
    s.set(
        "bound",
        Value::func(FuncVal::new(|_, _| Ok(Value::Undefined)).reflective()),
    );
    assert!(matches!(
        s.eval("bound()").unwrap_err(),
        Error::Eval(EvalError::Security(SecurityViolation::ReflectiveCall))
    ));
}

#[test]
fn sandbox_blocks_function_call_results() {
    let s = scope();
    s.set(
        "leak",
        Value::func(FuncVal::new(|_, _| Ok(window_like()))),
    );
    assert!(matches!(
        s.eval("leak()").unwrap_err(),
        Error::Eval(EvalError::Security(SecurityViolation::HostGlobal))
    ));
}

// =============================================================================
// ONE-TIME PREFIX AND CACHING FACADE
// =============================================================================

#[test]
fn one_time_prefix_strips_for_evaluation() {
    let s = scope();
    s.set("v", 7.0);
    assert_eq!(s.eval("::v").unwrap(), Value::Num(7.0));
}

#[test]
fn accessor_assign_capability() {
    let s = scope();
    let acc = s.accessor("a.b").unwrap();
    acc.assign(&s, Value::Num(4.0)).unwrap();
    assert_eq!(member(&s.get("a"), "b"), Value::Num(4.0));
    // Non-assignable expressions refuse.
    let acc = s.accessor("a + 1").unwrap();
    assert!(acc.assign(&s, Value::Num(1.0)).is_err());
}
