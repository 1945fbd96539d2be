use super::{
    EnumSchema, FieldInfo, FieldKind, FieldLabel, Message, MessageSchema, MethodKind, ScalarType,
    UnknownFields,
};
use serde_json::{Map, Number, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("{type_name}: expected a JSON object, found {found}")]
    NotAnObject {
        type_name: &'static str,
        found: &'static str,
    },
    #[error("{type_name}: unknown field \"{field}\"")]
    UnknownField {
        type_name: &'static str,
        field: String,
    },
    #[error("{type_name}.{field}: {reason}")]
    InvalidField {
        type_name: &'static str,
        field: &'static str,
        reason: String,
    },
    #[error("{type_name}: message could not be serialized: {reason}")]
    NotSerializable {
        type_name: &'static str,
        reason: String,
    },
    #[error("Invalid method path: {0}")]
    InvalidMethodPath(String),
    #[error("{method} is a {kind:?} method, only unary methods can be queried")]
    UnsupportedMethodKind { method: String, kind: MethodKind },
    #[error("{type_name} has no field \"{field}\" to carry the page param")]
    UnknownPageParam {
        type_name: &'static str,
        field: String,
    },
    #[error("{type_name}: page param could not be applied: {reason}")]
    InvalidPageParam {
        type_name: &'static str,
        reason: String,
    },
}

/// Serializes a typed message into plain JSON.
pub fn to_json<M: Message>(message: &M) -> Result<Value, SchemaError> {
    serde_json::to_value(message).map_err(|e| SchemaError::NotSerializable {
        type_name: M::schema().type_name,
        reason: e.to_string(),
    })
}

/// Encodes `value` in the canonical JSON form of `schema`.
///
/// Two values that denote the same message always encode to equal JSON: field names are the JSON
/// names, default-valued fields are dropped, 64-bit integers become decimal strings whether they
/// arrived as numbers or strings, and enums are carried by name.
pub fn canonical_json(schema: &MessageSchema, value: &Value) -> Result<Value, SchemaError> {
    canonical_message(schema, value).map(Value::Object)
}

/// Schema-aware equality. Values that fail to encode are never equal to anything.
pub fn schema_equals(schema: &MessageSchema, a: &Value, b: &Value) -> bool {
    match (canonical_json(schema, a), canonical_json(schema, b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn canonical_message(
    schema: &MessageSchema,
    value: &Value,
) -> Result<Map<String, Value>, SchemaError> {
    let object = match value {
        Value::Null => return Ok(Map::new()),
        Value::Object(object) => object,
        other => {
            return Err(SchemaError::NotAnObject {
                type_name: schema.type_name,
                found: json_type_name(other),
            })
        }
    };

    let mut out = Map::new();
    for (key, field_value) in object {
        if field_value.is_null() {
            continue;
        }
        match schema.field(key) {
            Some(field) => {
                if let Some(encoded) = canonical_field(schema, field, field_value)? {
                    out.insert(field.json_name.to_string(), encoded);
                }
            }
            None if schema.unknown_fields == UnknownFields::Keep => {
                out.insert(key.clone(), field_value.clone());
            }
            None => {
                return Err(SchemaError::UnknownField {
                    type_name: schema.type_name,
                    field: key.clone(),
                })
            }
        }
    }
    Ok(out)
}

fn canonical_field(
    schema: &MessageSchema,
    field: &'static FieldInfo,
    value: &Value,
) -> Result<Option<Value>, SchemaError> {
    match field.label {
        FieldLabel::Singular => canonical_singular(schema, field, value, true),
        FieldLabel::Repeated => {
            let items = value
                .as_array()
                .ok_or_else(|| invalid(schema, field, "expected a list"))?;
            if items.is_empty() {
                return Ok(None);
            }
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                let item = canonical_singular(schema, field, item, false)?;
                encoded.push(item.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(encoded)))
        }
        FieldLabel::Map => {
            let entries = value
                .as_object()
                .ok_or_else(|| invalid(schema, field, "expected a map"))?;
            if entries.is_empty() {
                return Ok(None);
            }
            let mut encoded = Map::new();
            for (key, entry) in entries {
                let entry = canonical_singular(schema, field, entry, false)?.unwrap_or(Value::Null);
                encoded.insert(key.clone(), entry);
            }
            Ok(Some(Value::Object(encoded)))
        }
    }
}

fn canonical_singular(
    schema: &MessageSchema,
    field: &'static FieldInfo,
    value: &Value,
    omit_default: bool,
) -> Result<Option<Value>, SchemaError> {
    let (encoded, is_default) = match field.kind {
        // message fields have presence, so an empty message is still kept
        FieldKind::Message(nested) => {
            return Ok(Some(Value::Object(canonical_message(nested, value)?)))
        }
        FieldKind::Scalar(scalar) => {
            let encoded = canonical_scalar(scalar, value)
                .map_err(|reason| invalid(schema, field, reason))?;
            let is_default = is_default_scalar(scalar, &encoded);
            (encoded, is_default)
        }
        FieldKind::Enum(enum_schema) => canonical_enum(enum_schema, value)
            .map_err(|reason| invalid(schema, field, reason))?,
    };
    if omit_default && is_default {
        Ok(None)
    } else {
        Ok(Some(encoded))
    }
}

fn canonical_scalar(scalar: ScalarType, value: &Value) -> Result<Value, String> {
    match scalar {
        ScalarType::Bool => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| format!("expected a boolean, found {}", json_type_name(value))),
        ScalarType::String | ScalarType::Bytes => value
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| format!("expected a string, found {}", json_type_name(value))),
        ScalarType::Int64 | ScalarType::SInt64 => {
            parse_i64(value).map(|n| Value::String(n.to_string()))
        }
        ScalarType::UInt64 | ScalarType::Fixed64 => {
            parse_u64(value).map(|n| Value::String(n.to_string()))
        }
        ScalarType::Int32 | ScalarType::SInt32 => {
            let n = parse_i64(value)?;
            i32::try_from(n)
                .map(Value::from)
                .map_err(|_| format!("{} is out of range for int32", n))
        }
        ScalarType::UInt32 => {
            let n = parse_u64(value)?;
            u32::try_from(n)
                .map(Value::from)
                .map_err(|_| format!("{} is out of range for uint32", n))
        }
        ScalarType::Double | ScalarType::Float => parse_float(value),
    }
}

fn canonical_enum(enum_schema: &EnumSchema, value: &Value) -> Result<(Value, bool), String> {
    match value {
        Value::Number(_) => {
            let number = parse_i64(value)?;
            let encoded = match enum_schema.name_of(number) {
                Some(name) => Value::String(name.to_string()),
                None => Value::from(number),
            };
            Ok((encoded, number == 0))
        }
        Value::String(name) => match enum_schema.number_of(name) {
            Some(number) => Ok((Value::String(name.clone()), number == 0)),
            None => Err(format!("unknown {} value \"{}\"", enum_schema.type_name, name)),
        },
        other => Err(format!("expected an enum value, found {}", json_type_name(other))),
    }
}

fn parse_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                integral_f64(n)
                    .filter(|f| (I64_MIN_F64..I64_END_F64).contains(f))
                    .map(|f| f as i64)
            })
            .ok_or_else(|| format!("{} is not a signed 64-bit integer", n)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("\"{}\" is not a signed 64-bit integer", s)),
        other => Err(format!("expected an integer, found {}", json_type_name(other))),
    }
}

fn parse_u64(value: &Value) -> Result<u64, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                integral_f64(n)
                    .filter(|f| (0.0..U64_END_F64).contains(f))
                    .map(|f| f as u64)
            })
            .ok_or_else(|| format!("{} is not an unsigned 64-bit integer", n)),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("\"{}\" is not an unsigned 64-bit integer", s)),
        other => Err(format!("expected an integer, found {}", json_type_name(other))),
    }
}

// -2^63, 2^63 and 2^64. The upper bounds are exclusive: `i64::MAX as f64` rounds up to 2^63.
const I64_MIN_F64: f64 = -9_223_372_036_854_775_808.0;
const I64_END_F64: f64 = 9_223_372_036_854_775_808.0;
const U64_END_F64: f64 = 18_446_744_073_709_551_616.0;

fn integral_f64(n: &Number) -> Option<f64> {
    n.as_f64().filter(|f| f.fract() == 0.0)
}

fn parse_float(value: &Value) -> Result<Value, String> {
    let f = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{} is not a number", n))?,
        Value::String(s) if matches!(s.as_str(), "NaN" | "Infinity" | "-Infinity") => {
            return Ok(Value::String(s.clone()))
        }
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("\"{}\" is not a number", s))?,
        other => return Err(format!("expected a number, found {}", json_type_name(other))),
    };
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("{} is not a finite number", f))
}

fn is_default_scalar(scalar: ScalarType, encoded: &Value) -> bool {
    match (scalar, encoded) {
        (_, Value::Bool(b)) => !b,
        (_, Value::Number(n)) => n.as_f64() == Some(0.0),
        (scalar, Value::String(s)) if scalar.is_64_bit_integer() => s == "0",
        (ScalarType::String | ScalarType::Bytes, Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn invalid(
    schema: &MessageSchema,
    field: &'static FieldInfo,
    reason: impl Into<String>,
) -> SchemaError {
    SchemaError::InvalidField {
        type_name: schema.type_name,
        field: field.json_name,
        reason: reason.into(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
