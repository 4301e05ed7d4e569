//! The dynamic value type observed by watches and produced by
//! expressions.
//!
//! Containers (`Array`, `Object`) have reference semantics: cloning a
//! `Value` clones the handle, not the contents, and identity comparison
//! (`strict_eq`) compares the allocation. Structural comparison and
//! cloning (`deep_eq`, `deep_clone`) carry a visited set so cyclic
//! value graphs terminate.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Property map backing `Value::Object`.
pub type ValueMap = HashMap<String, Value>;

/// Error raised by a host function value.
///
/// Host failures are the "user error" class: the digest catches them
/// at each call site and routes them to the error sink.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(msg: impl Into<String>) -> Self {
        HostError(msg.into())
    }
}

/// A host function callable from expressions.
///
/// The first argument is the receiver (`this`), bound by the caller
/// per the method-call rules. Functions flagged `reflective` model the
/// call/apply/bind class; the sandbox refuses to invoke them.
pub struct FuncVal {
    name: Option<String>,
    reflective: bool,
    f: Box<dyn Fn(&Value, &[Value]) -> Result<Value, HostError>>,
}

impl FuncVal {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, HostError> + 'static,
    {
        FuncVal {
            name: None,
            reflective: false,
            f: Box::new(f),
        }
    }

    /// Attach a display name (used in error messages).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark as a reflective (call/apply/bind class) function.
    pub fn reflective(mut self) -> Self {
        self.reflective = true;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_reflective(&self) -> bool {
        self.reflective
    }

    /// Invoke with the given receiver and arguments.
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, HostError> {
        (self.f)(this, args)
    }
}

impl fmt::Debug for FuncVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncVal")
            .field("name", &self.name)
            .field("reflective", &self.reflective)
            .finish_non_exhaustive()
    }
}

/// A dynamic value.
///
/// `Undefined` is the missing-value sentinel (absent property, missing
/// identifier); `Null` is the explicit null literal. Arrays and
/// objects are shared mutable containers.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ValueMap>>),
    Func(Rc<FuncVal>),
}

impl Value {
    /// Build an array value from elements.
    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    /// Build an object value from a property map.
    pub fn object(map: ValueMap) -> Value {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    /// Build an empty object value.
    pub fn empty_object() -> Value {
        Value::object(ValueMap::new())
    }

    /// Build a function value.
    pub fn func(f: FuncVal) -> Value {
        Value::Func(Rc::new(f))
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    /// True for everything except `Undefined`.
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    /// True for `Undefined` and `Null` (the nil class member access
    /// short-circuits on).
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Func(_) => "function",
        }
    }

    /// Identity equality (`===`): primitives by value, strings by
    /// content, containers and functions by allocation. NaN is not
    /// equal to itself.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The digest comparison for identity watches: `strict_eq` with
    /// NaN equal to NaN, so a NaN-valued watch does not stay dirty
    /// forever.
    pub fn watch_eq(&self, other: &Value) -> bool {
        if let (Value::Num(a), Value::Num(b)) = (self, other) {
            if a.is_nan() && b.is_nan() {
                return true;
            }
        }
        self.strict_eq(other)
    }

    /// Structural equality. Cycle-safe: a pair of containers already
    /// under comparison is assumed equal. Functions compare by
    /// allocation. NaN equals NaN.
    pub fn deep_eq(&self, other: &Value) -> bool {
        fn go(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
            match (a, b) {
                (Value::Num(x), Value::Num(y)) => x == y || (x.is_nan() && y.is_nan()),
                (Value::Array(x), Value::Array(y)) => {
                    if Rc::ptr_eq(x, y) {
                        return true;
                    }
                    let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
                    if !seen.insert(key) {
                        return true;
                    }
                    let (x, y) = (x.borrow(), y.borrow());
                    x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| go(a, b, seen))
                }
                (Value::Object(x), Value::Object(y)) => {
                    if Rc::ptr_eq(x, y) {
                        return true;
                    }
                    let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
                    if !seen.insert(key) {
                        return true;
                    }
                    let (x, y) = (x.borrow(), y.borrow());
                    x.len() == y.len()
                        && x.iter().all(|(k, va)| match y.get(k) {
                            Some(vb) => go(va, vb, seen),
                            None => false,
                        })
                }
                _ => a.strict_eq(b),
            }
        }
        go(self, other, &mut HashSet::new())
    }

    /// Structural clone preserving aliasing and cycles: if the same
    /// container appears twice in the source graph, the clone holds
    /// the same (new) container twice. Functions are cloned by
    /// reference.
    pub fn deep_clone(&self) -> Value {
        fn go(v: &Value, seen: &mut HashMap<usize, Value>) -> Value {
            match v {
                Value::Array(rc) => {
                    let key = Rc::as_ptr(rc) as usize;
                    if let Some(existing) = seen.get(&key) {
                        return existing.clone();
                    }
                    let out = Rc::new(RefCell::new(Vec::new()));
                    seen.insert(key, Value::Array(Rc::clone(&out)));
                    let cloned: Vec<Value> = rc.borrow().iter().map(|e| go(e, seen)).collect();
                    *out.borrow_mut() = cloned;
                    Value::Array(out)
                }
                Value::Object(rc) => {
                    let key = Rc::as_ptr(rc) as usize;
                    if let Some(existing) = seen.get(&key) {
                        return existing.clone();
                    }
                    let out = Rc::new(RefCell::new(ValueMap::new()));
                    seen.insert(key, Value::Object(Rc::clone(&out)));
                    let cloned: ValueMap = rc
                        .borrow()
                        .iter()
                        .map(|(k, e)| (k.clone(), go(e, seen)))
                        .collect();
                    *out.borrow_mut() = cloned;
                    Value::Object(out)
                }
                other => other.clone(),
            }
        }
        go(self, &mut HashMap::new())
    }

    /// Copy the top-level container only; elements keep their
    /// identity. Primitives clone as themselves.
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::Array(rc) => Value::array(rc.borrow().clone()),
            Value::Object(rc) => Value::object(rc.borrow().clone()),
            other => other.clone(),
        }
    }
}

/// Structural equality for test ergonomics. Not cycle-safe; engine
/// code uses `deep_eq`.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            _ => self.strict_eq(other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Num(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}

/// Format a number the way the expression language stringifies it:
/// integral values without a fractional part, `NaN`, `Infinity`.
pub(crate) fn fmt_num(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == n.trunc() && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{}", fmt_num(*n)),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(rc) => {
                // Element-join, nil elements render empty.
                let items = rc.borrow();
                let mut first = true;
                for item in items.iter() {
                    if !first {
                        write!(f, ",")?;
                    }
                    first = false;
                    if !item.is_nil() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Func(fv) => match fv.name() {
                Some(name) => write!(f, "function {name}"),
                None => write!(f, "function"),
            },
        }
    }
}
