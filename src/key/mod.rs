//! Query keys.
//!
//! A full key is `[service, method, payload]`; the payload names the encoded input and the
//! transport token. Paginated keys also carry their cardinality and page param key. Shorter keys
//! (`[service]`, `[service, method]`, or a payload with only some fields) are partial keys, which
//! [`QueryKey::matches`] uses for bulk invalidation.
mod hash;

pub use hash::{canonical_string, hash_key};

use crate::schema::{
    canonical_json, to_json, Message, MessageSchema, MethodDescriptor, SchemaError, UnknownFields,
};
use crate::skip::QueryInput;
use crate::transport::{Headers, Transport, TransportRegistry, TransportToken};
use log::debug;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Written into paginated keys only; a payload without it is a plain query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Finite,
    Infinite,
}

/// The `input` slot of a key payload. Skipped input is always written as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyInput {
    Skipped,
    Value(Value),
}

impl Serialize for KeyInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KeyInput::Skipped => serializer.serialize_none(),
            KeyInput::Value(value) => value.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<KeyInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_param_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryKey {
    service: String,
    method: Option<String>,
    payload: Option<KeyPayload>,
}

impl QueryKey {
    /// `[service]`: every query of one service.
    pub fn for_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
            method: None,
            payload: None,
        }
    }

    /// `[service, method]`: every query of one method, whatever its input or transport.
    pub fn for_method<I: Message, O: Message>(method: &MethodDescriptor<I, O>) -> Self {
        Self {
            service: method.service().to_string(),
            method: Some(method.name().to_string()),
            payload: None,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn payload(&self) -> Option<&KeyPayload> {
        self.payload.as_ref()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self.payload.as_ref().and_then(|p| p.input.as_ref()),
            Some(KeyInput::Skipped)
        )
    }

    pub fn to_json(&self) -> Value {
        let mut segments = vec![Value::String(self.service.clone())];
        if let Some(method) = &self.method {
            segments.push(Value::String(method.clone()));
            if let Some(payload) = &self.payload {
                segments.push(serde_json::to_value(payload).unwrap_or(Value::Null));
            }
        }
        Value::Array(segments)
    }

    /// True if `self`, read as a partial key, selects `other`: a prefix of its segments, with
    /// every field of a payload present and equal in `other`'s payload.
    pub fn matches(&self, other: &QueryKey) -> bool {
        partial_match(&self.to_json(), &other.to_json())
    }
}

impl Serialize for QueryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 1 + self.method.is_some() as usize + self.payload.is_some() as usize;
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.service)?;
        if let Some(method) = &self.method {
            seq.serialize_element(method)?;
            if let Some(payload) = &self.payload {
                seq.serialize_element(payload)?;
            }
        }
        seq.end()
    }
}

fn partial_match(partial: &Value, full: &Value) -> bool {
    match (partial, full) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() <= b.len() && a.iter().zip(b).all(|(x, y)| partial_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => a
            .iter()
            .all(|(k, v)| b.get(k).map_or(false, |w| partial_match(v, w))),
        (a, b) => a == b,
    }
}

/// Builds keys. Owns the transport registry keys are built against, and the set of header names
/// that are folded into keys (none unless configured).
#[derive(Clone)]
pub struct KeyFactory {
    registry: Arc<TransportRegistry>,
    cache_headers: BTreeSet<String>,
}

impl KeyFactory {
    pub fn new(registry: Arc<TransportRegistry>) -> Self {
        Self {
            registry,
            cache_headers: BTreeSet::new(),
        }
    }

    /// Header names, case-insensitive, whose values should separate otherwise equal keys.
    pub fn with_cache_headers<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.cache_headers
            .extend(names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()));
        self
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    pub fn build_key<I: Message, O: Message>(
        &self,
        method: &MethodDescriptor<I, O>,
        input: &QueryInput<I>,
        transport: &Arc<dyn Transport>,
        headers: &Headers,
    ) -> Result<QueryKey, SchemaError> {
        let input = encode_input(input)?;
        let key = self.full_key(method, input, transport, headers, None, None);
        debug!("Query key: {:?}", key);
        Ok(key)
    }

    /// Key for a paginated query. The field named by `page_param_key` is left out of the encoded
    /// input, since its value changes from page to page.
    pub fn build_infinite_key<I: Message, O: Message>(
        &self,
        method: &MethodDescriptor<I, O>,
        input: &QueryInput<I>,
        transport: &Arc<dyn Transport>,
        page_param_key: &str,
        headers: &Headers,
    ) -> Result<QueryKey, SchemaError> {
        let page_param_key = page_param_name(I::schema(), page_param_key)?;
        let input = match encode_input(input)? {
            KeyInput::Value(Value::Object(mut fields)) => {
                fields.remove(&page_param_key);
                KeyInput::Value(Value::Object(fields))
            }
            other => other,
        };
        let key = self.full_key(
            method,
            input,
            transport,
            headers,
            Some(Cardinality::Infinite),
            Some(page_param_key),
        );
        debug!("Infinite query key: {:?}", key);
        Ok(key)
    }

    /// `[service, method, {transport}]`: every query of one method on one transport.
    pub fn transport_key<I: Message, O: Message>(
        &self,
        method: &MethodDescriptor<I, O>,
        transport: &Arc<dyn Transport>,
    ) -> QueryKey {
        QueryKey {
            payload: Some(KeyPayload {
                transport: Some(self.registry.identity_of(transport)),
                ..KeyPayload::default()
            }),
            ..QueryKey::for_method(method)
        }
    }

    fn full_key<I: Message, O: Message>(
        &self,
        method: &MethodDescriptor<I, O>,
        input: KeyInput,
        transport: &Arc<dyn Transport>,
        headers: &Headers,
        cardinality: Option<Cardinality>,
        page_param_key: Option<String>,
    ) -> QueryKey {
        QueryKey {
            payload: Some(KeyPayload {
                input: Some(input),
                transport: Some(self.registry.identity_of(transport)),
                cardinality,
                page_param_key,
                headers: self.key_headers(headers),
            }),
            ..QueryKey::for_method(method)
        }
    }

    fn key_headers(&self, headers: &Headers) -> Option<BTreeMap<String, Vec<String>>> {
        let mut relevant: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            if self.cache_headers.contains(&name) {
                relevant.entry(name).or_default().push(value.clone());
            }
        }
        for values in relevant.values_mut() {
            values.sort();
        }
        if relevant.is_empty() {
            None
        } else {
            Some(relevant)
        }
    }
}

fn encode_input<I: Message>(input: &QueryInput<I>) -> Result<KeyInput, SchemaError> {
    match input {
        QueryInput::Skip(_) => Ok(KeyInput::Skipped),
        QueryInput::Ready(input) => {
            let value = canonical_json(I::schema(), &to_json(input)?)?;
            Ok(KeyInput::Value(value))
        }
    }
}

/// Resolves the JSON name of the field carrying the page param.
pub(crate) fn page_param_name(schema: &MessageSchema, name: &str) -> Result<String, SchemaError> {
    match schema.field(name) {
        Some(field) => Ok(field.json_name.to_string()),
        None if schema.unknown_fields == UnknownFields::Keep => Ok(name.to_string()),
        None => Err(SchemaError::UnknownPageParam {
            type_name: schema.type_name,
            field: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Struct;
    use crate::skip::SKIP;
    use crate::test_utils::{ListItemsRequest, RecordingTransport, SayRequest, LIST_ITEMS, SAY};
    use serde_json::json;

    fn setup() -> (KeyFactory, Arc<dyn Transport>) {
        let factory = KeyFactory::new(Arc::new(TransportRegistry::new()));
        let transport: Arc<dyn Transport> = Arc::new(RecordingTransport::default());
        (factory, transport)
    }

    fn hi() -> QueryInput<SayRequest> {
        QueryInput::Ready(SayRequest {
            sentence: "hi".to_string(),
        })
    }

    #[test]
    fn test_build_key_shape() {
        let (factory, transport) = setup();
        let key = factory.build_key(&SAY, &hi(), &transport, &Vec::new()).unwrap();
        assert_eq!(
            key.to_json(),
            json!([
                "connectrpc.eliza.v1.ElizaService",
                "Say",
                {"input": {"sentence": "hi"}, "transport": "t1"}
            ])
        );
        assert_eq!(serde_json::to_value(&key).unwrap(), key.to_json());
    }

    #[test]
    fn test_build_key_is_deterministic() {
        let (factory, transport) = setup();
        let first = factory.build_key(&SAY, &hi(), &transport, &Vec::new()).unwrap();
        let second = factory.build_key(&SAY, &hi(), &transport, &Vec::new()).unwrap();
        assert_eq!(first, second);
        assert_eq!(hash_key(&first), hash_key(&second));
    }

    #[test]
    fn test_field_order_does_not_change_key() {
        let (factory, transport) = setup();
        let method = MethodDescriptor::<Struct, Struct>::from_path("acme.v1.Search/Find").unwrap();
        let mut forward = serde_json::Map::new();
        forward.insert("query".to_string(), json!("rust"));
        forward.insert("filters".to_string(), json!({"lang": "en", "year": 2024}));
        let mut backward = serde_json::Map::new();
        backward.insert("filters".to_string(), json!({"year": 2024, "lang": "en"}));
        backward.insert("query".to_string(), json!("rust"));

        let a = factory
            .build_key(&method, &QueryInput::Ready(Struct(forward)), &transport, &Vec::new())
            .unwrap();
        let b = factory
            .build_key(&method, &QueryInput::Ready(Struct(backward)), &transport, &Vec::new())
            .unwrap();
        assert_eq!(hash_key(&a), hash_key(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_int64_input_is_encoded_as_string() {
        let (factory, transport) = setup();
        let input = QueryInput::Ready(ListItemsRequest {
            page: 12345678901234,
            ..ListItemsRequest::default()
        });
        let key = factory.build_key(&LIST_ITEMS, &input, &transport, &Vec::new()).unwrap();
        assert_eq!(
            key.payload().unwrap().input,
            Some(KeyInput::Value(json!({"page": "12345678901234"})))
        );
    }

    #[test]
    fn test_transports_are_discriminated() {
        let (factory, first) = setup();
        let second: Arc<dyn Transport> = Arc::new(RecordingTransport::default());
        let a = factory.build_key(&SAY, &hi(), &first, &Vec::new()).unwrap();
        let b = factory.build_key(&SAY, &hi(), &second, &Vec::new()).unwrap();
        assert_ne!(a, b);
        assert_ne!(hash_key(&a), hash_key(&b));
        assert_eq!(b.payload().unwrap().transport.as_ref().unwrap().as_str(), "t2");
    }

    #[test]
    fn test_skipped_input_uses_null_placeholder() {
        let (factory, transport) = setup();
        let key = factory
            .build_key(&SAY, &QueryInput::from(SKIP), &transport, &Vec::new())
            .unwrap();
        assert!(key.is_skipped());
        assert_eq!(
            key.to_json(),
            json!([
                "connectrpc.eliza.v1.ElizaService",
                "Say",
                {"input": null, "transport": "t1"}
            ])
        );

        let empty = factory
            .build_key(&SAY, &QueryInput::Ready(SayRequest::default()), &transport, &Vec::new())
            .unwrap();
        assert!(!empty.is_skipped());
        assert_ne!(hash_key(&key), hash_key(&empty));
        assert!(QueryKey::for_method(&SAY).matches(&key));
    }

    #[test]
    fn test_partial_keys_are_prefixes() {
        let (factory, transport) = setup();
        let full = factory.build_key(&SAY, &hi(), &transport, &Vec::new()).unwrap();
        let method_key = QueryKey::for_method(&SAY);
        let service_key = QueryKey::for_service("connectrpc.eliza.v1.ElizaService");

        assert!(method_key.matches(&full));
        assert!(service_key.matches(&full));
        assert!(service_key.matches(&method_key));
        assert!(!full.matches(&method_key));
        assert_ne!(method_key, full);

        let method_json = method_key.to_json();
        let full_json = full.to_json();
        assert_eq!(
            method_json.as_array().unwrap()[..],
            full_json.as_array().unwrap()[..2]
        );

        let other_service = QueryKey::for_service("connectrpc.eliza.v1.Other");
        assert!(!other_service.matches(&full));
        let list_input = QueryInput::Ready(ListItemsRequest::default());
        let other_list = factory
            .build_key(&LIST_ITEMS, &list_input, &transport, &Vec::new())
            .unwrap();
        assert!(!method_key.matches(&other_list));
    }

    #[test]
    fn test_transport_key_selects_one_transport() {
        let (factory, first) = setup();
        let second: Arc<dyn Transport> = Arc::new(RecordingTransport::default());
        let on_first = factory.build_key(&SAY, &hi(), &first, &Vec::new()).unwrap();
        let on_second = factory.build_key(&SAY, &hi(), &second, &Vec::new()).unwrap();
        let selector = factory.transport_key(&SAY, &first);
        assert!(selector.matches(&on_first));
        assert!(!selector.matches(&on_second));
    }

    #[test]
    fn test_headers_are_only_folded_in_when_configured() {
        let (factory, transport) = setup();
        let admin = vec![("Authorization".to_string(), "scope-admin".to_string())];
        let user = vec![("authorization".to_string(), "scope-user".to_string())];

        let a = factory.build_key(&SAY, &hi(), &transport, &admin).unwrap();
        let b = factory.build_key(&SAY, &hi(), &transport, &user).unwrap();
        assert_eq!(a, b);

        let factory = factory.with_cache_headers(["authorization"]);
        let a = factory.build_key(&SAY, &hi(), &transport, &admin).unwrap();
        let b = factory.build_key(&SAY, &hi(), &transport, &user).unwrap();
        assert_ne!(hash_key(&a), hash_key(&b));
        assert_eq!(
            a.payload().unwrap().headers.as_ref().unwrap()["authorization"],
            vec!["scope-admin".to_string()]
        );

        let unrelated = vec![("x-request-id".to_string(), "42".to_string())];
        let c = factory.build_key(&SAY, &hi(), &transport, &unrelated).unwrap();
        assert_eq!(c.payload().unwrap().headers, None);
    }

    #[test]
    fn test_infinite_key_omits_page_param() {
        let (factory, transport) = setup();
        let first_page = ListItemsRequest {
            query: "rust".to_string(),
            page: 1,
            ..ListItemsRequest::default()
        };
        let later_page = ListItemsRequest {
            page: 5,
            ..first_page.clone()
        };
        let first_page = QueryInput::Ready(first_page);
        let later_page = QueryInput::Ready(later_page);
        let a = factory
            .build_infinite_key(&LIST_ITEMS, &first_page, &transport, "page", &Vec::new())
            .unwrap();
        let b = factory
            .build_infinite_key(&LIST_ITEMS, &later_page, &transport, "page", &Vec::new())
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.to_json()[2],
            json!({
                "input": {"query": "rust"},
                "transport": "t1",
                "cardinality": "infinite",
                "pageParamKey": "page"
            })
        );

        let plain_input = QueryInput::Ready(ListItemsRequest::default());
        let finite = factory
            .build_key(&LIST_ITEMS, &plain_input, &transport, &Vec::new())
            .unwrap();
        assert_ne!(hash_key(&a), hash_key(&finite));
    }

    #[test]
    fn test_infinite_key_rejects_unknown_page_param() {
        let (factory, transport) = setup();
        let result = factory.build_infinite_key(
            &LIST_ITEMS,
            &QueryInput::Ready(ListItemsRequest::default()),
            &transport,
            "cursor",
            &Vec::new(),
        );
        assert!(matches!(result, Err(SchemaError::UnknownPageParam { .. })));
    }
}
