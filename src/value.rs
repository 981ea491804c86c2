//! The values nodes exchange.
//!
//! Every call argument, response body, query and stream tuple is a
//! [`Payload`]: an ordered list of [`Value`]s. The set of value kinds is closed
//! so that a remote interface can be checked against what a network can carry
//! before any call is made.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

pub type Payload = Vec<Value>;

#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[archive(check_bytes)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Unit => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Ints(_) => ValueKind::Ints,
            Value::Floats(_) => ValueKind::Floats,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Value::Floats(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Floats(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ints(v)
    }
}

/// The kind of a [`Value`], and the type name it contributes to operation
/// signatures.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ValueKind {
    Unit,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Ints,
    Floats,
}

impl ValueKind {
    pub const ALL: [ValueKind; 8] = [
        ValueKind::Unit,
        ValueKind::Bool,
        ValueKind::Int,
        ValueKind::Float,
        ValueKind::Text,
        ValueKind::Bytes,
        ValueKind::Ints,
        ValueKind::Floats,
    ];

    /// Canonical parameter type name. These match the names deployed peers
    /// hash into operation ids, so interfaces declared with them interoperate.
    pub fn type_name(self) -> &'static str {
        match self {
            ValueKind::Unit => "void",
            ValueKind::Bool => "boolean",
            ValueKind::Int => "long",
            ValueKind::Float => "double",
            ValueKind::Text => "class java.lang.String",
            ValueKind::Bytes => "class [B",
            ValueKind::Ints => "class [J",
            ValueKind::Floats => "class [D",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_resolve_back_to_kinds() {
        for kind in ValueKind::ALL {
            assert_eq!(ValueKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(ValueKind::from_type_name("class java.lang.Thread"), None);
    }

    #[test]
    fn conversions_pick_the_matching_kind() {
        assert_eq!(Value::from(3i64).kind(), ValueKind::Int);
        assert_eq!(Value::from("x").as_text(), Some("x"));
        assert_eq!(Value::from(vec![1.0, 2.0]).as_floats(), Some(&[1.0, 2.0][..]));
    }
}
