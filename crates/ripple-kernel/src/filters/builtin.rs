//! Builtin filters.
//!
//! The load-bearing one is `filter`, the array-selection filter the
//! pipe operator composes with. Its criterion may be a predicate
//! function, a primitive matched against any property, or a pattern
//! object; its comparator may be `true` (deep equality), a custom
//! function, or the default case-insensitive substring match.

use std::rc::Rc;

use ripple_types::{HostError, Value};

use crate::interpreter::coerce::{js_string, to_number, truthy};
use crate::interpreter::{get_member, EvalError};

use super::{Filter, FilterRegistry};

/// Register every builtin.
pub(crate) fn register_builtins(registry: &FilterRegistry) {
    let entries: Vec<(String, Box<dyn FnOnce() -> Filter>)> = vec![
        ("filter".to_string(), Box::new(|| Filter::new(filter_filter))),
        ("uppercase".to_string(), Box::new(|| Filter::new(uppercase))),
        ("lowercase".to_string(), Box::new(|| Filter::new(lowercase))),
        ("limitTo".to_string(), Box::new(|| Filter::new(limit_to))),
        ("json".to_string(), Box::new(|| Filter::new(json_filter))),
    ];
    registry
        .register_many(entries)
        .expect("builtin filter names are valid");
}

type Comparator = dyn Fn(&Value, &Value) -> Result<bool, EvalError>;

/// `array | filter : criterion : comparator?`
fn filter_filter(args: &[Value]) -> Result<Value, EvalError> {
    let input = args.first().cloned().unwrap_or_default();
    let items = match &input {
        Value::Undefined | Value::Null => return Ok(input),
        Value::Array(rc) => rc.borrow().clone(),
        other => {
            return Err(HostError::new(format!(
                "filter: expected an array, got {}",
                other.type_name()
            ))
            .into())
        }
    };
    let criterion = args.get(1).cloned().unwrap_or_default();
    if matches!(criterion, Value::Undefined) {
        return Ok(input);
    }
    let comparator = make_comparator(args.get(2));

    let mut kept = Vec::new();
    match &criterion {
        Value::Func(predicate) => {
            for item in items {
                let verdict = predicate.call(&Value::Undefined, &[item.clone()])?;
                if truthy(&verdict) {
                    kept.push(item);
                }
            }
        }
        _ => {
            // Primitives match against any property; object patterns
            // match key by key. A defined `$` key in a pattern also
            // matches primitives one level down.
            let match_any_prop = !matches!(criterion, Value::Object(_));
            let wildcard_expected = match &criterion {
                Value::Object(rc) => rc.borrow().get("$").filter(|v| v.is_defined()).cloned(),
                _ => None,
            };
            for item in items {
                let matched = match &wildcard_expected {
                    Some(expected) if !matches!(item, Value::Object(_)) => {
                        deep_compare(&item, expected, &comparator, false, false)?
                    }
                    _ => deep_compare(&item, &criterion, &comparator, match_any_prop, false)?,
                };
                if matched {
                    kept.push(item);
                }
            }
        }
    }
    Ok(Value::array(kept))
}

fn make_comparator(spec: Option<&Value>) -> Rc<Comparator> {
    match spec {
        Some(Value::Bool(true)) => Rc::new(|actual, expected| Ok(actual.deep_eq(expected))),
        Some(Value::Func(f)) => {
            let f = f.clone();
            Rc::new(move |actual, expected| {
                let verdict = f.call(&Value::Undefined, &[actual.clone(), expected.clone()])?;
                Ok(truthy(&verdict))
            })
        }
        _ => Rc::new(|actual, expected| Ok(default_compare(actual, expected))),
    }
}

/// Default comparator: undefined never matches, null matches only
/// null, objects never match, anything else by case-insensitive
/// substring containment of the text forms.
fn default_compare(actual: &Value, expected: &Value) -> bool {
    if !actual.is_defined() {
        return false;
    }
    if matches!(actual, Value::Null) || matches!(expected, Value::Null) {
        return matches!(actual, Value::Null) && matches!(expected, Value::Null);
    }
    if matches!(expected, Value::Object(_) | Value::Func(_))
        || matches!(actual, Value::Object(_) | Value::Func(_))
    {
        return false;
    }
    js_string(actual)
        .to_lowercase()
        .contains(&js_string(expected).to_lowercase())
}

/// Structural criterion matching. A `!`-prefixed string criterion
/// negates the rest; arrays match if any element matches; the `$` key
/// of a pattern compares against the item itself and descends with
/// any-property matching enabled.
fn deep_compare(
    actual: &Value,
    expected: &Value,
    comparator: &Rc<Comparator>,
    match_any_prop: bool,
    dont_match_whole: bool,
) -> Result<bool, EvalError> {
    if let Value::Str(s) = expected {
        if let Some(rest) = s.strip_prefix('!') {
            let inner = deep_compare(
                actual,
                &Value::str(rest),
                comparator,
                match_any_prop,
                dont_match_whole,
            )?;
            return Ok(!inner);
        }
    }
    match actual {
        Value::Array(rc) => {
            let items = rc.borrow().clone();
            for item in items {
                if deep_compare(&item, expected, comparator, match_any_prop, false)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Object(rc) => {
            if match_any_prop {
                let entries: Vec<Value> = rc
                    .borrow()
                    .iter()
                    .filter(|(k, _)| !k.starts_with('$'))
                    .map(|(_, v)| v.clone())
                    .collect();
                for value in entries {
                    if deep_compare(&value, expected, comparator, true, true)? {
                        return Ok(true);
                    }
                }
                if dont_match_whole {
                    Ok(false)
                } else {
                    deep_compare(actual, expected, comparator, false, false)
                }
            } else if let Value::Object(pattern) = expected {
                let entries: Vec<(String, Value)> = pattern
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (key, expected_val) in entries {
                    if matches!(expected_val, Value::Undefined | Value::Func(_)) {
                        continue;
                    }
                    let is_wildcard = key == "$";
                    let actual_val = if is_wildcard {
                        actual.clone()
                    } else {
                        get_member(actual, &key)
                    };
                    if !deep_compare(&actual_val, &expected_val, comparator, is_wildcard, is_wildcard)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            } else {
                comparator(actual, expected)
            }
        }
        Value::Func(_) => Ok(false),
        _ => comparator(actual, expected),
    }
}

/// `input | uppercase` — strings map; anything else passes through.
fn uppercase(args: &[Value]) -> Result<Value, EvalError> {
    let input = args.first().cloned().unwrap_or_default();
    Ok(match input {
        Value::Str(s) => Value::Str(s.to_uppercase()),
        other => other,
    })
}

fn lowercase(args: &[Value]) -> Result<Value, EvalError> {
    let input = args.first().cloned().unwrap_or_default();
    Ok(match input {
        Value::Str(s) => Value::Str(s.to_lowercase()),
        other => other,
    })
}

/// `input | limitTo : limit : begin?` — first (or last, for negative
/// limits) elements of an array, characters of a string. A
/// non-numeric limit passes the input through.
fn limit_to(args: &[Value]) -> Result<Value, EvalError> {
    let input = args.first().cloned().unwrap_or_default();
    let limit = to_number(&args.get(1).cloned().unwrap_or_default());
    if limit.is_nan() {
        return Ok(input);
    }
    let begin_raw = to_number(&args.get(2).cloned().unwrap_or_default());
    let begin = if begin_raw.is_nan() {
        0.0
    } else {
        begin_raw.trunc()
    };
    let limit = limit.trunc();
    match &input {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), limit, begin);
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        Value::Num(_) => {
            let chars: Vec<char> = js_string(&input).chars().collect();
            let (start, end) = slice_bounds(chars.len(), limit, begin);
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        Value::Array(rc) => {
            let items = rc.borrow();
            let (start, end) = slice_bounds(items.len(), limit, begin);
            Ok(Value::array(items[start..end].to_vec()))
        }
        _ => Ok(input),
    }
}

fn slice_bounds(len: usize, limit: f64, begin: f64) -> (usize, usize) {
    let len_f = len as f64;
    let begin = if begin < 0.0 {
        (len_f + begin).max(0.0)
    } else {
        begin.min(len_f)
    };
    if limit >= 0.0 {
        (begin as usize, (begin + limit).min(len_f) as usize)
    } else if begin == 0.0 {
        ((len_f + limit).max(0.0) as usize, len)
    } else {
        ((begin + limit).max(0.0) as usize, begin as usize)
    }
}

/// `input | json` — pretty-printed JSON. Undefined stays undefined.
fn json_filter(args: &[Value]) -> Result<Value, EvalError> {
    let input = args.first().cloned().unwrap_or_default();
    if !input.is_defined() {
        return Ok(Value::Undefined);
    }
    let json = input
        .to_json()
        .map_err(|e| HostError::new(e.to_string()))?;
    serde_json::to_string_pretty(&json)
        .map(Value::Str)
        .map_err(|e| EvalError::from(HostError::new(e.to_string())))
}
