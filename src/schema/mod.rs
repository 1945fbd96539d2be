//! Message schemas and method descriptors.
//!
//! Generated message types carry their schema through [`Message::schema`], which is the only
//! thing the rest of the crate inspects to decide whether a value "is a message".
mod canonical;

pub use canonical::{canonical_json, schema_equals, to_json, SchemaError};

use crate::util::regex_match_groups;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Debug;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    UInt32,
    SInt32,
    Int64,
    UInt64,
    SInt64,
    Fixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn is_64_bit_integer(&self) -> bool {
        matches!(
            self,
            ScalarType::Int64 | ScalarType::UInt64 | ScalarType::SInt64 | ScalarType::Fixed64
        )
    }
}

#[derive(Debug)]
pub struct EnumSchema {
    pub type_name: &'static str,
    pub values: &'static [(&'static str, i32)],
}

impl EnumSchema {
    pub fn name_of(&self, number: i64) -> Option<&'static str> {
        self.values
            .iter()
            .find(|(_, n)| i64::from(*n) == number)
            .map(|(name, _)| *name)
    }

    pub fn number_of(&self, name: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, number)| *number)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Scalar(ScalarType),
    Enum(&'static EnumSchema),
    Message(&'static MessageSchema),
}

/// How many values a field holds. Map keys are always carried as JSON object keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLabel {
    Singular,
    Repeated,
    Map,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub name: &'static str,
    pub json_name: &'static str,
    pub kind: FieldKind,
    pub label: FieldLabel,
}

impl FieldInfo {
    pub const fn scalar(name: &'static str, json_name: &'static str, scalar: ScalarType) -> Self {
        Self {
            name,
            json_name,
            kind: FieldKind::Scalar(scalar),
            label: FieldLabel::Singular,
        }
    }

    pub const fn with_label(mut self, label: FieldLabel) -> Self {
        self.label = label;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownFields {
    Reject,
    Keep,
}

#[derive(Debug)]
pub struct MessageSchema {
    pub type_name: &'static str,
    pub fields: &'static [FieldInfo],
    pub unknown_fields: UnknownFields,
}

impl MessageSchema {
    /// Looks a field up by its JSON name or, failing that, its declared name.
    pub fn field(&self, name: &str) -> Option<&'static FieldInfo> {
        self.fields
            .iter()
            .find(|f| f.json_name == name)
            .or_else(|| self.fields.iter().find(|f| f.name == name))
    }

    /// Schemas are process-wide constants, so identity is address identity with a name fallback
    /// for schemas that were linked twice.
    pub fn is(&self, other: &MessageSchema) -> bool {
        std::ptr::eq(self, other) || self.type_name == other.type_name
    }
}

pub trait Message:
    Serialize + DeserializeOwned + Default + Clone + Debug + Send + Sync + 'static
{
    fn schema() -> &'static MessageSchema;
}

pub static STRUCT_SCHEMA: MessageSchema = MessageSchema {
    type_name: "google.protobuf.Struct",
    fields: &[],
    unknown_fields: UnknownFields::Keep,
};

/// Open JSON object message, for methods whose schema is only known at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Struct(pub serde_json::Map<String, serde_json::Value>);

impl Message for Struct {
    fn schema() -> &'static MessageSchema {
        &STRUCT_SCHEMA
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BiDiStreaming,
}

lazy_static! {
    static ref METHOD_PATH_REGEX: Regex = Regex::new(
        r"^/?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)/([A-Za-z_][A-Za-z0-9_]*)$"
    )
    .unwrap();
}

pub struct MethodDescriptor<I, O> {
    service: Cow<'static, str>,
    name: Cow<'static, str>,
    kind: MethodKind,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: Message, O: Message> MethodDescriptor<I, O> {
    pub const fn new(service: &'static str, name: &'static str, kind: MethodKind) -> Self {
        Self {
            service: Cow::Borrowed(service),
            name: Cow::Borrowed(name),
            kind,
            _marker: PhantomData,
        }
    }

    /// Builds a unary descriptor from a `package.Service/Method` path.
    pub fn from_path(path: &str) -> Result<Self, SchemaError> {
        let [service, name] = regex_match_groups(&METHOD_PATH_REGEX, path)
            .ok_or_else(|| SchemaError::InvalidMethodPath(path.to_string()))?;
        Ok(Self {
            service: Cow::Owned(service.to_string()),
            name: Cow::Owned(name.to_string()),
            kind: MethodKind::Unary,
            _marker: PhantomData,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn input_schema(&self) -> &'static MessageSchema {
        I::schema()
    }

    pub fn output_schema(&self) -> &'static MessageSchema {
        O::schema()
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }
}

impl<I, O> Clone for MethodDescriptor<I, O> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            name: self.name.clone(),
            kind: self.kind,
            _marker: PhantomData,
        }
    }
}

impl<I, O> Debug for MethodDescriptor<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
