//! Conversion between `Value` and `serde_json::Value`.
//!
//! JSON is the interchange format at the embedding boundary: host data
//! comes in as JSON, and the `json` filter renders values back out.
//! Functions serialize as `null`; `Undefined` serializes as `null`
//! (JSON has no missing-value sentinel); non-finite numbers serialize
//! as `null`.

use std::collections::HashSet;
use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number};

use crate::value::{Value, ValueMap};

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Delegate to to_json for a consistent representation: NaN
        // and functions become null; cycles fail.
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(json))
    }
}

/// Error converting a `Value` to JSON.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    /// The value graph contains a cycle.
    #[error("cyclic value cannot be converted to JSON")]
    Cycle,
}

impl Value {
    /// Build a `Value` from parsed JSON. Arrays and objects become
    /// fresh containers.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let converted: ValueMap = map
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect();
                Value::object(converted)
            }
        }
    }

    /// Render as JSON. Fails only on cyclic graphs.
    pub fn to_json(&self) -> Result<serde_json::Value, ConvertError> {
        fn go(v: &Value, seen: &mut HashSet<usize>) -> Result<serde_json::Value, ConvertError> {
            Ok(match v {
                Value::Undefined | Value::Null | Value::Func(_) => serde_json::Value::Null,
                Value::Bool(b) => serde_json::Value::Bool(*b),
                Value::Num(n) => match Number::from_f64(*n) {
                    Some(num) => serde_json::Value::Number(num),
                    None => serde_json::Value::Null,
                },
                Value::Str(s) => serde_json::Value::String(s.clone()),
                Value::Array(rc) => {
                    let key = Rc::as_ptr(rc) as usize;
                    if !seen.insert(key) {
                        return Err(ConvertError::Cycle);
                    }
                    let items = rc
                        .borrow()
                        .iter()
                        .map(|e| go(e, seen))
                        .collect::<Result<Vec<_>, _>>()?;
                    seen.remove(&key);
                    serde_json::Value::Array(items)
                }
                Value::Object(rc) => {
                    let key = Rc::as_ptr(rc) as usize;
                    if !seen.insert(key) {
                        return Err(ConvertError::Cycle);
                    }
                    let mut out = Map::new();
                    for (k, e) in rc.borrow().iter() {
                        out.insert(k.clone(), go(e, seen)?);
                    }
                    seen.remove(&key);
                    serde_json::Value::Object(out)
                }
            })
        }
        go(self, &mut HashSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_scalars() {
        let v = Value::from_json(serde_json::json!({"a": 1, "b": [true, null, "x"]}));
        let back = v.to_json().unwrap();
        assert_eq!(back, serde_json::json!({"a": 1.0, "b": [true, null, "x"]}));
    }

    #[test]
    fn nan_serializes_as_null() {
        assert_eq!(
            Value::Num(f64::NAN).to_json().unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn cycle_is_an_error() {
        let v = Value::empty_object();
        if let Value::Object(rc) = &v {
            rc.borrow_mut().insert("me".into(), v.clone());
        }
        assert_eq!(v.to_json(), Err(ConvertError::Cycle));
    }

    #[test]
    fn shared_subtree_is_not_a_cycle() {
        let shared = Value::array(vec![Value::Num(1.0)]);
        let v = Value::array(vec![shared.clone(), shared]);
        assert!(v.to_json().is_ok());
    }

    #[test]
    fn serde_round_trip() {
        let v = Value::from_json(serde_json::json!({"n": 2.5, "list": [1.0]}));
        let text = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, v);
    }
}
