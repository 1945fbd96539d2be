//! Values as the query cache stores them, and the structural sharing rule applied when a fresh
//! value replaces a cached one.
use crate::schema::{schema_equals, to_json, Message, MessageSchema, SchemaError};
use log::trace;
use serde_json::{Number, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Object-safe view of a [`Message`].
pub trait AnyMessage: Debug + Send + Sync {
    fn message_schema(&self) -> &'static MessageSchema;
    fn to_json(&self) -> Result<Value, SchemaError>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Message> AnyMessage for M {
    fn message_schema(&self) -> &'static MessageSchema {
        M::schema()
    }

    fn to_json(&self) -> Result<Value, SchemaError> {
        to_json(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Shared handle to a decoded message, tagged with its schema.
#[derive(Debug, Clone)]
pub struct MessageRef(Arc<dyn AnyMessage>);

impl MessageRef {
    pub fn new<M: Message>(message: M) -> Self {
        Self(Arc::new(message))
    }

    pub fn from_arc<M: Message>(message: Arc<M>) -> Self {
        Self(message)
    }

    pub fn schema(&self) -> &'static MessageSchema {
        self.0.message_schema()
    }

    pub fn downcast<M: Message>(&self) -> Option<Arc<M>> {
        if !self.schema().is(M::schema()) {
            return None;
        }
        self.0.clone().into_any().downcast::<M>().ok()
    }

    pub fn to_json(&self) -> Result<Value, SchemaError> {
        self.0.to_json()
    }

    pub fn ptr_eq(&self, other: &MessageRef) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

/// A cached value. Scalars are plain values; lists, records and messages are shared, so keeping
/// a subtree means keeping its reference.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Number(Number),
    String(Arc<str>),
    List(Arc<Vec<CacheValue>>),
    Record(Arc<BTreeMap<String, CacheValue>>),
    Message(MessageRef),
}

impl CacheValue {
    pub fn message<M: Message>(message: M) -> Self {
        CacheValue::Message(MessageRef::new(message))
    }

    pub fn list(items: Vec<CacheValue>) -> Self {
        CacheValue::List(Arc::new(items))
    }

    pub fn record(fields: BTreeMap<String, CacheValue>) -> Self {
        CacheValue::Record(Arc::new(fields))
    }

    pub fn as_message<M: Message>(&self) -> Option<Arc<M>> {
        match self {
            CacheValue::Message(message) => message.downcast(),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&CacheValue> {
        match self {
            CacheValue::Record(fields) => fields.get(field),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[CacheValue]> {
        match self {
            CacheValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Identity comparison: scalars by value, everything else by reference.
    pub fn is_same(&self, other: &CacheValue) -> bool {
        match (self, other) {
            (CacheValue::Null, CacheValue::Null) => true,
            (CacheValue::Bool(a), CacheValue::Bool(b)) => a == b,
            (CacheValue::Number(a), CacheValue::Number(b)) => a == b,
            (CacheValue::String(a), CacheValue::String(b)) => a == b,
            (CacheValue::List(a), CacheValue::List(b)) => Arc::ptr_eq(a, b),
            (CacheValue::Record(a), CacheValue::Record(b)) => Arc::ptr_eq(a, b),
            (CacheValue::Message(a), CacheValue::Message(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn to_json(&self) -> Result<Value, SchemaError> {
        Ok(match self {
            CacheValue::Null => Value::Null,
            CacheValue::Bool(b) => Value::Bool(*b),
            CacheValue::Number(n) => Value::Number(n.clone()),
            CacheValue::String(s) => Value::String(s.to_string()),
            CacheValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(CacheValue::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            CacheValue::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect::<Result<_, _>>()?,
            ),
            CacheValue::Message(message) => message.to_json()?,
        })
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => CacheValue::Null,
            Value::Bool(b) => CacheValue::Bool(b),
            Value::Number(n) => CacheValue::Number(n),
            Value::String(s) => CacheValue::String(Arc::from(s)),
            Value::Array(items) => {
                CacheValue::list(items.into_iter().map(CacheValue::from).collect())
            }
            Value::Object(fields) => CacheValue::record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, CacheValue::from(v)))
                    .collect(),
            ),
        }
    }
}

fn messages_equal(schema: &MessageSchema, a: &MessageRef, b: &MessageRef) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    match (a.to_json(), b.to_json()) {
        (Ok(a), Ok(b)) => schema_equals(schema, &a, &b),
        _ => false,
    }
}

/// Returns `new`, except that every subtree of it equal to the matching subtree of `old` is
/// replaced by the `old` reference. If nothing changed, the result is `old` itself.
pub fn replace_equal_deep(old: &CacheValue, new: CacheValue) -> CacheValue {
    if old.is_same(&new) {
        return old.clone();
    }
    match (old, new) {
        (CacheValue::List(prev), CacheValue::List(next)) => {
            let mut unchanged = prev.len() == next.len();
            let mut items = Vec::with_capacity(next.len());
            for (i, item) in next.iter().enumerate() {
                let item = match prev.get(i) {
                    Some(prev_item) => {
                        let shared = replace_equal_deep(prev_item, item.clone());
                        unchanged &= prev_item.is_same(&shared);
                        shared
                    }
                    None => item.clone(),
                };
                items.push(item);
            }
            if unchanged {
                old.clone()
            } else {
                CacheValue::list(items)
            }
        }
        (CacheValue::Record(prev), CacheValue::Record(next)) => {
            let mut unchanged = prev.len() == next.len();
            let mut fields = BTreeMap::new();
            for (key, value) in next.iter() {
                let value = match prev.get(key) {
                    Some(prev_value) => {
                        let shared = replace_equal_deep(prev_value, value.clone());
                        unchanged &= prev_value.is_same(&shared);
                        shared
                    }
                    None => {
                        unchanged = false;
                        value.clone()
                    }
                };
                fields.insert(key.clone(), value);
            }
            if unchanged {
                old.clone()
            } else {
                CacheValue::record(fields)
            }
        }
        (CacheValue::Message(prev), CacheValue::Message(next)) => {
            let schema = prev.schema();
            if schema.is(next.schema()) && messages_equal(schema, prev, &next) {
                old.clone()
            } else {
                CacheValue::Message(next)
            }
        }
        (_, new) => new,
    }
}

/// Decides, for one output schema, whether a freshly fetched value replaces the cached one.
#[derive(Debug, Clone, Copy)]
pub struct StructuralSharing {
    schema: &'static MessageSchema,
}

impl StructuralSharing {
    pub fn new(schema: &'static MessageSchema) -> Self {
        Self { schema }
    }

    pub fn for_message<M: Message>() -> Self {
        Self::new(M::schema())
    }

    pub fn schema(&self) -> &'static MessageSchema {
        self.schema
    }

    /// Keeps `old` when both values are messages of this schema and equal under it; any other
    /// pair of values goes through [`replace_equal_deep`].
    pub fn share(&self, old: Option<&CacheValue>, new: CacheValue) -> CacheValue {
        let old = match old {
            Some(old) => old,
            None => return new,
        };
        let schema_equal = match (old, &new) {
            (CacheValue::Message(prev), CacheValue::Message(next))
                if prev.schema().is(self.schema) && next.schema().is(self.schema) =>
            {
                Some(messages_equal(self.schema, prev, next))
            }
            _ => None,
        };
        match schema_equal {
            Some(true) => {
                trace!("StructuralSharing: kept previous {}", self.schema.type_name);
                old.clone()
            }
            Some(false) => new,
            None => replace_equal_deep(old, new),
        }
    }
}
