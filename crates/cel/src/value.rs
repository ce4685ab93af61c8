//! The canonical runtime value representation.
//!
//! Values are immutable; containers are reference-counted views so cloning a
//! `Value` never copies the underlying list/map contents. This mirrors the
//! teacher's heap-value separation (`Value` is cheap to copy, the payload it
//! points at is shared), simplified here because CEL has no mutation or
//! cyclic references to track.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::types::CelType;

/// A runtime timestamp: signed seconds since the Unix epoch plus a
/// nanosecond fraction in `[0, 1_000_000_000)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

/// A runtime duration: a signed nanosecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Duration {
    pub nanos: i128,
}

/// A structural hash/equality key for values used as map keys. CEL allows
/// `int`, `uint`, `bool`, and `string` keys; this wrapper is what backs
/// [`CelMap`]'s `IndexMap`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    String(Rc<str>),
}

impl MapKey {
    #[must_use]
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::UInt(u) => Some(Self::UInt(*u)),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::UInt(u) => Value::UInt(*u),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

pub type CelList = Rc<Vec<Value>>;
pub type CelMap = Rc<IndexMap<MapKey, Value>>;

/// A proto-style message value: a nominal type name plus its field values,
/// backed by the narrow [`crate::stdlib::MessageProvider`] adapter rather
/// than reflection.
#[derive(Debug, Clone)]
pub struct Message {
    pub type_name: Rc<str>,
    pub fields: Rc<IndexMap<Rc<str>, Value>>,
}

/// The tagged runtime value union.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    List(CelList),
    Map(CelMap),
    Message(Rc<Message>),
    Timestamp(Timestamp),
    Duration(Duration),
    /// A first-class type value, e.g. the result of `type(x)`.
    Type(CelType),
    Optional(Option<Rc<Value>>),
    /// A set of unresolved attribute paths, propagated when unknown tracking
    /// is enabled (see `crate::interp`).
    Unknown(Rc<Vec<String>>),
}

impl Value {
    #[must_use]
    pub fn optional_some(v: Value) -> Self {
        Self::Optional(Some(Rc::new(v)))
    }

    #[must_use]
    pub fn optional_none() -> Self {
        Self::Optional(None)
    }

    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(items))
    }

    #[must_use]
    pub fn map(entries: IndexMap<MapKey, Value>) -> Self {
        Self::Map(Rc::new(entries))
    }

    #[must_use]
    pub fn type_of(&self) -> CelType {
        match self {
            Self::Null => CelType::Null,
            Self::Bool(_) => CelType::Bool,
            Self::Int(_) => CelType::Int,
            Self::UInt(_) => CelType::UInt,
            Self::Double(_) => CelType::Double,
            Self::String(_) => CelType::String,
            Self::Bytes(_) => CelType::Bytes,
            Self::List(items) => CelType::List(Box::new(
                items.first().map_or(CelType::Dyn, Value::type_of),
            )),
            Self::Map(m) => {
                let (k, v) = m.iter().next().map_or((CelType::Dyn, CelType::Dyn), |(k, v)| (k.to_value().type_of(), v.type_of()));
                CelType::Map(Box::new(k), Box::new(v))
            }
            Self::Message(msg) => CelType::Message(msg.type_name.clone()),
            Self::Timestamp(_) => CelType::Timestamp,
            Self::Duration(_) => CelType::Duration,
            Self::Type(_) => CelType::TypeOf(Box::new(CelType::Dyn)),
            Self::Optional(inner) => CelType::Optional(Box::new(inner.as_ref().map_or(CelType::Dyn, |v| v.type_of()))),
            Self::Unknown(_) => CelType::Dyn,
        }
    }

    #[must_use]
    pub fn is_truthy_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Structural equality: maps compare by key set and pointwise-equal values;
/// lists compare positionally; `NaN == NaN` is `false`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a.seconds == b.seconds && a.nanos == b.nanos,
            (Self::Duration(a), Self::Duration(b)) => a.nanos == b.nanos,
            (Self::List(a), Self::List(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y),
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| bv == v))
            }
            (Self::Optional(a), Self::Optional(b)) => match (a, b) {
                (None, None) => true,
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            (Self::Message(a), Self::Message(b)) => a.type_name == b.type_name && a.fields.len() == b.fields.len()
                && a.fields.iter().all(|(k, v)| b.fields.get(k).is_some_and(|bv| bv == v)),
            (Self::Int(a), Self::UInt(b)) | (Self::UInt(b), Self::Int(a)) => *a >= 0 && (*a as u64) == *b,
            (Self::Int(a), Self::Double(b)) | (Self::Double(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::UInt(a), Self::Double(b)) | (Self::Double(b), Self::UInt(a)) => (*a as f64) == *b,
            _ => false,
        }
    }
}

/// Heterogeneous numeric ordering by mathematical value. Returns `None` for
/// NaN comparisons and type pairs that aren't comparable.
#[must_use]
pub fn partial_cmp_numeric(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.partial_cmp(y),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::UInt(y)) => {
            if *x < 0 {
                Some(Ordering::Less)
            } else {
                (*x as u64).partial_cmp(y)
            }
        }
        (Value::UInt(x), Value::Int(y)) => partial_cmp_numeric(&Value::Int(*y), &Value::UInt(*x)).map(Ordering::reverse),
        (Value::Int(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Double(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::UInt(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Double(x), Value::UInt(y)) => x.partial_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => x.partial_cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.partial_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.partial_cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => (x.seconds, x.nanos).partial_cmp(&(y.seconds, y.nanos)),
        (Value::Duration(x), Value::Duration(y)) => x.nanos.partial_cmp(&y.nanos),
        _ => None,
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}u"),
            Self::Double(d) => write!(f, "{d}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "b\"{}\"", String::from_utf8_lossy(b)),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {v}", k.to_value())?;
                }
                write!(f, "}}")
            }
            Self::Message(msg) => write!(f, "{}{{...}}", msg.type_name),
            Self::Timestamp(ts) => write!(f, "timestamp(seconds={}, nanos={})", ts.seconds, ts.nanos),
            Self::Duration(d) => write!(f, "duration(nanos={})", d.nanos),
            Self::Type(t) => write!(f, "type({t})"),
            Self::Optional(None) => write!(f, "optional.none()"),
            Self::Optional(Some(v)) => write!(f, "optional.of({v})"),
            Self::Unknown(paths) => write!(f, "unknown({paths:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_equality_is_positional() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let c = Value::list(vec![Value::Int(2), Value::Int(1)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn map_equality_ignores_insertion_order() {
        let mut m1 = IndexMap::new();
        m1.insert(MapKey::String(Rc::from("a")), Value::Int(1));
        m1.insert(MapKey::String(Rc::from("b")), Value::Int(2));
        let mut m2 = IndexMap::new();
        m2.insert(MapKey::String(Rc::from("b")), Value::Int(2));
        m2.insert(MapKey::String(Rc::from("a")), Value::Int(1));
        assert_eq!(Value::map(m1), Value::map(m2));
    }

    #[test]
    fn heterogeneous_numeric_equality() {
        assert_eq!(Value::Int(2), Value::UInt(2));
        assert_eq!(Value::Int(2), Value::Double(2.0));
        assert_ne!(Value::Int(-1), Value::UInt(u64::MAX));
    }

    #[test]
    fn nan_is_never_equal_or_ordered() {
        let nan = Value::Double(f64::NAN);
        assert_ne!(nan.clone(), nan.clone());
        assert_eq!(partial_cmp_numeric(&nan, &Value::Double(1.0)), None);
    }
}
