//! The expression sandbox.
//!
//! Two layers keep expressions from reaching the host runtime: a
//! member-name blacklist applied before every dereference, and
//! capability heuristics applied to every dereference result and every
//! invoked function. The heuristics are structural — expressions only
//! see `Value`s, so the dangerous hosts are recognised by the members
//! they expose.

use std::rc::Rc;

use ripple_types::{FuncVal, Value};

/// Member names that may never be dereferenced or assigned.
pub const FORBIDDEN_MEMBERS: [&str; 6] = [
    "constructor",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// A sandbox rejection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SecurityViolation {
    #[error("referencing forbidden member {0:?} in expression")]
    ForbiddenMember(String),
    #[error("referencing the host global in expressions is disallowed")]
    HostGlobal,
    #[error("referencing a self-constructing object in expressions is disallowed")]
    SelfConstructor,
    #[error("referencing the object factory in expressions is disallowed")]
    ObjectFactory,
    #[error("referencing DOM nodes in expressions is disallowed")]
    DomNode,
    #[error("invoking reflective functions in expressions is disallowed")]
    ReflectiveCall,
}

/// Reject blacklisted member names.
pub fn ensure_safe_member_name(name: &str) -> Result<(), SecurityViolation> {
    if FORBIDDEN_MEMBERS.contains(&name) {
        return Err(SecurityViolation::ForbiddenMember(name.to_string()));
    }
    Ok(())
}

/// Reject values that look like escape hatches to the host: the host
/// global (timer + document + location + alert all present), an object
/// that is its own constructor, the object factory (reflective
/// enumeration members), or a DOM node.
pub fn ensure_safe_object(v: &Value) -> Result<(), SecurityViolation> {
    if let Value::Object(rc) = v {
        let map = rc.borrow();
        let has = |key: &str| map.contains_key(key);
        if (has("setTimeout") || has("setInterval"))
            && has("document")
            && has("location")
            && has("alert")
        {
            return Err(SecurityViolation::HostGlobal);
        }
        if let Some(Value::Object(ctor)) = map.get("constructor") {
            if Rc::ptr_eq(ctor, rc) {
                return Err(SecurityViolation::SelfConstructor);
            }
        }
        if matches!(map.get("getOwnPropertyNames"), Some(Value::Func(_)))
            || matches!(map.get("getOwnPropertyDescriptor"), Some(Value::Func(_)))
        {
            return Err(SecurityViolation::ObjectFactory);
        }
        if has("children") && (has("nodeName") || (has("prop") && has("attr") && has("find"))) {
            return Err(SecurityViolation::DomNode);
        }
    }
    Ok(())
}

/// Reject invocation of reflective (call/apply/bind class) functions.
pub fn ensure_safe_function(f: &FuncVal) -> Result<(), SecurityViolation> {
    if f.is_reflective() {
        return Err(SecurityViolation::ReflectiveCall);
    }
    Ok(())
}
