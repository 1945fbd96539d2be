//! Messages and transports shared by the unit tests.
use crate::schema::{
    EnumSchema, FieldInfo, FieldKind, FieldLabel, Message, MessageSchema, MethodDescriptor,
    MethodKind, ScalarType, UnknownFields,
};
use crate::transport::{Transport, TransportError, TransportResult, UnaryRequest, UnaryResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;

static SAY_REQUEST_SCHEMA: MessageSchema = MessageSchema {
    type_name: "connectrpc.eliza.v1.SayRequest",
    fields: &[FieldInfo::scalar("sentence", "sentence", ScalarType::String)],
    unknown_fields: UnknownFields::Reject,
};

static SAY_RESPONSE_SCHEMA: MessageSchema = MessageSchema {
    type_name: "connectrpc.eliza.v1.SayResponse",
    fields: &[FieldInfo::scalar("sentence", "sentence", ScalarType::String)],
    unknown_fields: UnknownFields::Reject,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SayRequest {
    pub sentence: String,
}

impl Message for SayRequest {
    fn schema() -> &'static MessageSchema {
        &SAY_REQUEST_SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SayResponse {
    pub sentence: String,
}

impl Message for SayResponse {
    fn schema() -> &'static MessageSchema {
        &SAY_RESPONSE_SCHEMA
    }
}

pub static SAY: MethodDescriptor<SayRequest, SayResponse> =
    MethodDescriptor::new("connectrpc.eliza.v1.ElizaService", "Say", MethodKind::Unary);

static ORDER_SCHEMA: EnumSchema = EnumSchema {
    type_name: "acme.items.v1.Order",
    values: &[("ORDER_UNSPECIFIED", 0), ("ORDER_ASC", 1), ("ORDER_DESC", 2)],
};

static FILTER_SCHEMA: MessageSchema = MessageSchema {
    type_name: "acme.items.v1.Filter",
    fields: &[
        FieldInfo::scalar("owner", "owner", ScalarType::String),
        FieldInfo::scalar("min_score", "minScore", ScalarType::Double),
    ],
    unknown_fields: UnknownFields::Reject,
};

static LIST_ITEMS_REQUEST_SCHEMA: MessageSchema = MessageSchema {
    type_name: "acme.items.v1.ListItemsRequest",
    fields: &[
        FieldInfo::scalar("query", "query", ScalarType::String),
        FieldInfo::scalar("page", "page", ScalarType::Int64),
        FieldInfo::scalar("page_size", "pageSize", ScalarType::Int32),
        FieldInfo::scalar("tags", "tags", ScalarType::String).with_label(FieldLabel::Repeated),
        FieldInfo {
            name: "order",
            json_name: "order",
            kind: FieldKind::Enum(&ORDER_SCHEMA),
            label: FieldLabel::Singular,
        },
        FieldInfo {
            name: "filter",
            json_name: "filter",
            kind: FieldKind::Message(&FILTER_SCHEMA),
            label: FieldLabel::Singular,
        },
    ],
    unknown_fields: UnknownFields::Reject,
};

static LIST_ITEMS_RESPONSE_SCHEMA: MessageSchema = MessageSchema {
    type_name: "acme.items.v1.ListItemsResponse",
    fields: &[
        FieldInfo::scalar("items", "items", ScalarType::String).with_label(FieldLabel::Repeated),
        FieldInfo::scalar("next_page", "nextPage", ScalarType::Int64),
    ],
    unknown_fields: UnknownFields::Reject,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Filter {
    pub owner: String,
    pub min_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListItemsRequest {
    pub query: String,
    pub page: i64,
    pub page_size: i32,
    pub tags: Vec<String>,
    pub order: i32,
    pub filter: Option<Filter>,
}

impl Message for ListItemsRequest {
    fn schema() -> &'static MessageSchema {
        &LIST_ITEMS_REQUEST_SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListItemsResponse {
    pub items: Vec<String>,
    pub next_page: i64,
}

impl Message for ListItemsResponse {
    fn schema() -> &'static MessageSchema {
        &LIST_ITEMS_RESPONSE_SCHEMA
    }
}

pub static LIST_ITEMS: MethodDescriptor<ListItemsRequest, ListItemsResponse> =
    MethodDescriptor::new("acme.items.v1.ItemService", "ListItems", MethodKind::Unary);

/// Number of pages [`RecordingTransport`] serves for `ListItems`.
pub const LAST_PAGE: i64 = 3;

/// Answers every call and keeps the requests it was given.
///
/// `Say` echoes the sentence back, `ListItems` serves one item per page up to [`LAST_PAGE`], and
/// any other method echoes its message.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<UnaryRequest>>,
}

impl RecordingTransport {
    pub fn requests(&self) -> Vec<UnaryRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn respond(request: &UnaryRequest) -> Value {
        match request.method.as_str() {
            "Say" => {
                let sentence = request.message["sentence"].as_str().unwrap_or_default();
                json!({ "sentence": format!("echo: {}", sentence) })
            }
            "ListItems" => {
                let page = match &request.message["page"] {
                    Value::String(s) => s.parse().unwrap_or(1),
                    other => other.as_i64().unwrap_or(1),
                }
                .max(1);
                let query = request.message["query"].as_str().unwrap_or_default();
                let next_page = if page < LAST_PAGE { page + 1 } else { 0 };
                json!({ "items": [format!("{}#{}", query, page)], "nextPage": next_page })
            }
            _ => request.message.clone(),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn unary(&self, request: UnaryRequest) -> TransportResult<UnaryResponse> {
        let message = Self::respond(&request);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        Ok(UnaryResponse {
            message,
            headers: Vec::new(),
            trailers: Vec::new(),
        })
    }
}

/// Never answers.
#[derive(Debug, Default)]
pub struct BlockingTransport;

#[async_trait]
impl Transport for BlockingTransport {
    async fn unary(&self, _request: UnaryRequest) -> TransportResult<UnaryResponse> {
        futures::future::pending().await
    }
}

/// Fails every call with `unavailable`.
#[derive(Debug, Default)]
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn unary(&self, _request: UnaryRequest) -> TransportResult<UnaryResponse> {
        Err(TransportError::Remote {
            code: "unavailable".to_string(),
            message: "backend is down".to_string(),
        })
    }
}
