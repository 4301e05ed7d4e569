//! JS-style coercions used by the evaluator and the builtin filters.

use ripple_types::Value;

/// Truthiness: false, 0, NaN, empty string, null and undefined are
/// falsy; containers and functions are always truthy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Undefined | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Num(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) | Value::Func(_) => true,
    }
}

/// Numeric coercion. Undefined is NaN; null is 0; strings parse after
/// trimming (empty string is 0); arrays go through their string form
/// (`[] == 0`, `[5] == 5`); objects and functions are NaN.
pub fn to_number(v: &Value) -> f64 {
    match v {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Num(n) => *n,
        Value::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) => {
            let s = v.to_string();
            to_number(&Value::Str(s))
        }
        Value::Object(_) | Value::Func(_) => f64::NAN,
    }
}

/// String coercion — `Value`'s `Display` is already JS-shaped.
pub fn js_string(v: &Value) -> String {
    v.to_string()
}

/// Computed member keys coerce to property-name strings.
pub fn to_prop_key(v: &Value) -> String {
    js_string(v)
}

/// The `==` operator. Same types compare strictly; null and undefined
/// are mutually equal; numbers, strings and booleans cross-coerce;
/// containers compare against primitives through their string form.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Num(_), Value::Num(_))
        | (Value::Str(_), Value::Str(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::Array(_), Value::Array(_))
        | (Value::Object(_), Value::Object(_))
        | (Value::Func(_), Value::Func(_)) => a.strict_eq(b),
        (Value::Num(n), Value::Str(_)) | (Value::Str(_), Value::Num(n)) => {
            let s = if matches!(a, Value::Str(_)) { a } else { b };
            to_number(s) == *n
        }
        (Value::Bool(_), _) => loose_eq(&Value::Num(to_number(a)), b),
        (_, Value::Bool(_)) => loose_eq(a, &Value::Num(to_number(b))),
        (Value::Array(_) | Value::Object(_), _) if !b.is_nil() => {
            loose_eq(&Value::Str(js_string(a)), b)
        }
        (_, Value::Array(_) | Value::Object(_)) if !a.is_nil() => {
            loose_eq(a, &Value::Str(js_string(b)))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!truthy(&Value::Num(0.0)));
        assert!(!truthy(&Value::Num(f64::NAN)));
        assert!(!truthy(&Value::str("")));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&Value::str("0")));
        assert!(truthy(&Value::empty_object()));
        assert!(truthy(&Value::array(vec![])));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(to_number(&Value::Null), 0.0);
        assert!(to_number(&Value::Undefined).is_nan());
        assert_eq!(to_number(&Value::str(" 5 ")), 5.0);
        assert_eq!(to_number(&Value::str("")), 0.0);
        assert!(to_number(&Value::str("x")).is_nan());
        assert_eq!(to_number(&Value::Bool(true)), 1.0);
        assert_eq!(to_number(&Value::array(vec![])), 0.0);
        assert_eq!(to_number(&Value::array(vec![Value::Num(5.0)])), 5.0);
        assert!(to_number(&Value::empty_object()).is_nan());
    }

    #[test]
    fn loose_equality() {
        assert!(loose_eq(&Value::Null, &Value::Undefined));
        assert!(loose_eq(&Value::Num(5.0), &Value::str("5")));
        assert!(loose_eq(&Value::Bool(true), &Value::Num(1.0)));
        assert!(loose_eq(
            &Value::array(vec![Value::Num(5.0)]),
            &Value::Num(5.0)
        ));
        assert!(!loose_eq(&Value::Null, &Value::Num(0.0)));
        assert!(!loose_eq(&Value::str("a"), &Value::Num(0.0)));
    }
}
