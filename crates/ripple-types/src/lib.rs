//! ripple-types: the dynamic value vocabulary shared across ripple.
//!
//! This crate provides:
//!
//! - **Value**: the dynamic value sum type watched and produced by
//!   expressions (`Undefined`, `Null`, booleans, numbers, strings,
//!   reference-counted arrays/objects, host functions)
//! - **Equality layers**: identity (`strict_eq`), digest comparison
//!   (`watch_eq`), and cycle-safe structural equality (`deep_eq`)
//! - **Cloning**: cycle- and alias-preserving `deep_clone`, container
//!   `shallow_clone`
//! - **Conversion**: `Value` ⇄ `serde_json::Value`

mod convert;
mod value;

pub use convert::ConvertError;
pub use value::{FuncVal, HostError, Value, ValueMap};
