//! Tree-walking evaluation of expression ASTs.
//!
//! The evaluator reduces an AST to a `Value` against a `(scope,
//! locals)` pair. Identifier reads check locals first (own-property
//! test), then walk the scope's delegation chain. Member access on nil
//! short-circuits to `Undefined` instead of failing. Assignment
//! resolves its path in create mode, fabricating intermediate objects
//! on the scope; plain reads never fabricate.
//!
//! Sandbox checks run before every dereference and every invocation —
//! see the `sandbox` module.

use ripple_types::{HostError, Value};

use crate::ast::{Ast, BinaryOp, LogicalOp, MemberKey, UnaryOp};
use crate::filters::FilterRegistry;
use crate::scope::Scope;

use super::coerce::{js_string, loose_eq, to_number, to_prop_key, truthy};
use super::sandbox::{
    ensure_safe_function, ensure_safe_member_name, ensure_safe_object, SecurityViolation,
};

/// Errors that can occur during expression evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The sandbox refused a dereference or invocation.
    #[error("security violation: {0}")]
    Security(#[from] SecurityViolation),
    /// A filter pipe named a filter the registry does not know.
    #[error("unknown filter: {0}")]
    UnknownFilter(String),
    /// Call of something that is not a function.
    #[error("{0} is not a function")]
    NotCallable(String),
    /// Assignment into a value that cannot hold the property.
    #[error("cannot assign property {target:?} on a {kind} value")]
    CannotAssign { target: String, kind: &'static str },
    /// A host function or filter failed — the user-error class.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// One evaluation context: the scope, optional locals, and the filter
/// registry for pipe resolution.
pub(crate) struct ExprEval<'a> {
    pub scope: &'a Scope,
    pub locals: Option<&'a Value>,
    pub filters: &'a FilterRegistry,
}

impl<'a> ExprEval<'a> {
    pub fn eval(&self, ast: &Ast) -> Result<Value, EvalError> {
        match ast {
            Ast::Program { body } => {
                let mut last = Value::Undefined;
                for expr in body {
                    last = self.eval(expr)?;
                }
                Ok(last)
            }
            Ast::Literal { value } => Ok(value.clone()),
            Ast::Identifier { name } => {
                ensure_safe_member_name(name)?;
                let value = self
                    .local_get(name)
                    .or_else(|| self.scope.lookup_value(name))
                    .unwrap_or_default();
                ensure_safe_object(&value)?;
                Ok(value)
            }
            Ast::This => Ok(self.scope.props_value()),
            Ast::ArrayLit { elements } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element)?);
                }
                Ok(Value::array(items))
            }
            Ast::ObjectLit { properties } => {
                let mut map = ripple_types::ValueMap::new();
                for prop in properties {
                    map.insert(prop.key.clone(), self.eval(&prop.value)?);
                }
                Ok(Value::object(map))
            }
            Ast::Member { object, key } => {
                // Member access on nil is nil, unconditionally; the
                // name check applies only to a real dereference.
                let obj = self.eval(object)?;
                if obj.is_nil() {
                    return Ok(Value::Undefined);
                }
                let key = self.member_key(key)?;
                ensure_safe_member_name(&key)?;
                let value = get_member(&obj, &key);
                ensure_safe_object(&value)?;
                Ok(value)
            }
            Ast::Call {
                callee,
                args,
                filter: true,
            } => {
                let name = match &**callee {
                    Ast::Identifier { name } => name,
                    _ => return Err(EvalError::NotCallable("filter pipe".to_string())),
                };
                let filter = self
                    .filters
                    .get(name)
                    .ok_or_else(|| EvalError::UnknownFilter(name.clone()))?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                filter.call(&values)
            }
            Ast::Call {
                callee,
                args,
                filter: false,
            } => self.eval_call(callee, args),
            Ast::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value.clone())?;
                Ok(value)
            }
            Ast::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!truthy(&operand)),
                    UnaryOp::Plus => Value::Num(defined_number(&operand)),
                    UnaryOp::Minus => Value::Num(-defined_number(&operand)),
                })
            }
            Ast::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right))
            }
            Ast::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match op {
                    LogicalOp::And => {
                        if truthy(&left) {
                            self.eval(right)
                        } else {
                            Ok(left)
                        }
                    }
                    LogicalOp::Or => {
                        if truthy(&left) {
                            Ok(left)
                        } else {
                            self.eval(right)
                        }
                    }
                }
            }
            Ast::Conditional {
                test,
                then,
                otherwise,
            } => {
                let test = self.eval(test)?;
                if truthy(&test) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    /// Assign `value` through an assignable target (identifier or
    /// member path), creating missing intermediate containers on the
    /// scope.
    pub fn assign(&self, target: &Ast, value: Value) -> Result<(), EvalError> {
        match target {
            Ast::Identifier { name } => {
                ensure_safe_member_name(name)?;
                if let Some(Value::Object(rc)) = self.locals {
                    if rc.borrow().contains_key(name.as_str()) {
                        rc.borrow_mut().insert(name.clone(), value);
                        return Ok(());
                    }
                }
                self.scope.set(name, value);
                Ok(())
            }
            Ast::Member { object, key } => {
                if let MemberKey::Name(name) = key {
                    ensure_safe_member_name(name)?;
                }
                let container = self.eval_for_create(object)?;
                let key = self.member_key(key)?;
                ensure_safe_member_name(&key)?;
                set_member(&container, &key, value)
            }
            other => Err(EvalError::CannotAssign {
                target: format!("{other:?}"),
                kind: "non-assignable",
            }),
        }
    }

    /// Resolve a path for assignment: nil hops become fresh objects
    /// written into their parent. Creation lands on the scope, never
    /// on locals.
    fn eval_for_create(&self, ast: &Ast) -> Result<Value, EvalError> {
        match ast {
            Ast::Identifier { name } => {
                ensure_safe_member_name(name)?;
                if let Some(value) = self.local_get(name) {
                    ensure_safe_object(&value)?;
                    return Ok(value);
                }
                match self.scope.lookup_value(name) {
                    Some(value) if !value.is_nil() => {
                        ensure_safe_object(&value)?;
                        Ok(value)
                    }
                    _ => {
                        let fresh = Value::empty_object();
                        self.scope.set(name, fresh.clone());
                        Ok(fresh)
                    }
                }
            }
            Ast::This => Ok(self.scope.props_value()),
            Ast::Member { object, key } => {
                if let MemberKey::Name(name) = key {
                    ensure_safe_member_name(name)?;
                }
                let parent = self.eval_for_create(object)?;
                let key = self.member_key(key)?;
                ensure_safe_member_name(&key)?;
                let current = get_member(&parent, &key);
                ensure_safe_object(&current)?;
                if current.is_nil() {
                    let fresh = Value::empty_object();
                    set_member(&parent, &key, fresh.clone())?;
                    Ok(fresh)
                } else {
                    Ok(current)
                }
            }
            other => self.eval(other),
        }
    }

    fn eval_call(&self, callee: &Ast, args: &[Ast]) -> Result<Value, EvalError> {
        let (func, receiver, described) = match callee {
            // Method call: the receiver is the object left of the
            // member access.
            Ast::Member { object, key } => {
                if let MemberKey::Name(name) = key {
                    ensure_safe_member_name(name)?;
                }
                let obj = self.eval(object)?;
                let key = self.member_key(key)?;
                ensure_safe_member_name(&key)?;
                if obj.is_nil() {
                    return Err(EvalError::NotCallable(key));
                }
                let func = get_member(&obj, &key);
                ensure_safe_object(&func)?;
                (func, obj, key)
            }
            // Bare call: the receiver is whichever of locals or scope
            // owns the name (scope when neither does).
            Ast::Identifier { name } => {
                ensure_safe_member_name(name)?;
                if let Some(value) = self.local_get(name) {
                    let receiver = self.locals.cloned().unwrap_or_default();
                    (value, receiver, name.clone())
                } else if let Some((value, owner)) = self.scope.lookup_owner(name) {
                    (value, owner, name.clone())
                } else {
                    (Value::Undefined, self.scope.props_value(), name.clone())
                }
            }
            other => {
                let func = self.eval(other)?;
                (func, Value::Undefined, "expression".to_string())
            }
        };
        match func {
            Value::Func(f) => {
                ensure_safe_function(&f)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let out = f.call(&receiver, &values)?;
                ensure_safe_object(&out)?;
                Ok(out)
            }
            _ => Err(EvalError::NotCallable(described)),
        }
    }

    fn member_key(&self, key: &MemberKey) -> Result<String, EvalError> {
        match key {
            MemberKey::Name(name) => Ok(name.clone()),
            MemberKey::Computed(expr) => Ok(to_prop_key(&self.eval(expr)?)),
        }
    }

    /// Own-property read on the locals object. A key present with an
    /// `Undefined` value still counts as owned.
    fn local_get(&self, name: &str) -> Option<Value> {
        match self.locals {
            Some(Value::Object(rc)) => rc.borrow().get(name).cloned(),
            _ => None,
        }
    }
}

/// Property read on any value. Arrays answer `length` and numeric
/// indexes; strings answer `length` and per-character indexes;
/// everything else that is not an object yields `Undefined`.
pub(crate) fn get_member(obj: &Value, key: &str) -> Value {
    match obj {
        Value::Object(rc) => rc.borrow().get(key).cloned().unwrap_or_default(),
        Value::Array(rc) => {
            if key == "length" {
                Value::Num(rc.borrow().len() as f64)
            } else if let Ok(index) = key.parse::<usize>() {
                rc.borrow().get(index).cloned().unwrap_or_default()
            } else {
                Value::Undefined
            }
        }
        Value::Str(s) => {
            if key == "length" {
                Value::Num(s.chars().count() as f64)
            } else if let Ok(index) = key.parse::<usize>() {
                s.chars()
                    .nth(index)
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or_default()
            } else {
                Value::Undefined
            }
        }
        _ => Value::Undefined,
    }
}

/// Property write. Objects take any key; arrays take numeric indexes,
/// growing with `Undefined` holes as needed.
pub(crate) fn set_member(container: &Value, key: &str, value: Value) -> Result<(), EvalError> {
    match container {
        Value::Object(rc) => {
            rc.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(rc) => match key.parse::<usize>() {
            Ok(index) => {
                let mut items = rc.borrow_mut();
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                Ok(())
            }
            Err(_) => Err(EvalError::CannotAssign {
                target: key.to_string(),
                kind: "array",
            }),
        },
        other => Err(EvalError::CannotAssign {
            target: key.to_string(),
            kind: other.type_name(),
        }),
    }
}

/// Unary `+`/`-` and binary `-` treat undefined as 0.
fn defined_number(v: &Value) -> f64 {
    if v.is_defined() {
        to_number(v)
    } else {
        0.0
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => add_values(left, right),
        BinaryOp::Sub => Value::Num(defined_number(left) - defined_number(right)),
        BinaryOp::Mul => Value::Num(to_number(left) * to_number(right)),
        BinaryOp::Div => Value::Num(to_number(left) / to_number(right)),
        BinaryOp::Rem => Value::Num(to_number(left) % to_number(right)),
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            Value::Bool(compare(op, left, right))
        }
    }
}

/// `+`: an undefined operand yields the other operand (both undefined
/// yields undefined); a stringish operand turns the operation into
/// concatenation; otherwise numeric addition.
fn add_values(left: &Value, right: &Value) -> Value {
    match (left.is_defined(), right.is_defined()) {
        (false, false) => Value::Undefined,
        (false, true) => right.clone(),
        (true, false) => left.clone(),
        (true, true) => {
            if stringish(left) || stringish(right) {
                Value::Str(format!("{}{}", js_string(left), js_string(right)))
            } else {
                Value::Num(to_number(left) + to_number(right))
            }
        }
    }
}

fn stringish(v: &Value) -> bool {
    matches!(
        v,
        Value::Str(_) | Value::Array(_) | Value::Object(_) | Value::Func(_)
    )
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Gt => a > b,
            BinaryOp::Le => a <= b,
            BinaryOp::Ge => a >= b,
            _ => unreachable!("compare called with non-relational op"),
        };
    }
    let (a, b) = (to_number(left), to_number(right));
    if a.is_nan() || b.is_nan() {
        return false;
    }
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::Le => a <= b,
        BinaryOp::Ge => a >= b,
        _ => unreachable!("compare called with non-relational op"),
    }
}
