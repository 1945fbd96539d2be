//! Paginated queries. Every page shares one key; the page param is threaded through a single
//! input field, which the key leaves out.
use super::{
    ensure_unary, fetch_call_options, rejected, KeyHashFn, QueryFn, QueryFnContext, QueryFunction,
    QueryFuture,
};
use crate::call::{call_unary, CallOptions, CallResult};
use crate::key::{hash_key, page_param_name, KeyFactory, QueryKey};
use crate::schema::{to_json, Message, MethodDescriptor, SchemaError};
use crate::sharing::{CacheValue, StructuralSharing};
use crate::skip::QueryInput;
use crate::transport::Transport;
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Pages fetched so far, each with the page param it was fetched with.
#[derive(Debug, Clone, Default)]
pub struct InfiniteData {
    pub pages: Vec<CacheValue>,
    pub page_params: Vec<Value>,
}

impl InfiniteData {
    pub fn push(&mut self, page: CacheValue, page_param: Value) {
        self.pages.push(page);
        self.page_params.push(page_param);
    }

    /// As stored in the cache: `{pages, pageParams}`.
    pub fn to_cache_value(&self) -> CacheValue {
        let mut fields = BTreeMap::new();
        fields.insert("pages".to_string(), CacheValue::list(self.pages.clone()));
        fields.insert(
            "pageParams".to_string(),
            CacheValue::list(self.page_params.iter().cloned().map(CacheValue::from).collect()),
        );
        CacheValue::record(fields)
    }

    pub fn from_cache_value(value: &CacheValue) -> Option<Self> {
        let pages = value.get("pages")?.as_list()?.to_vec();
        let page_params = value
            .get("pageParams")?
            .as_list()?
            .iter()
            .map(|param| param.to_json().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { pages, page_params })
    }
}

/// `(last page, all pages) -> next page param`. `None` means there are no more pages.
pub type NextPageParamFn = Arc<dyn Fn(&CacheValue, &[CacheValue]) -> Option<Value> + Send + Sync>;

type TypedNextPageParamFn<O> = Arc<dyn Fn(&O, &[Arc<O>]) -> Option<Value> + Send + Sync>;

pub struct InfiniteOptions<O> {
    pub page_param_key: String,
    pub get_next_page_param: TypedNextPageParamFn<O>,
    pub call_options: CallOptions,
}

impl<O: Message> InfiniteOptions<O> {
    pub fn new<F>(page_param_key: &str, get_next_page_param: F) -> Self
    where
        F: Fn(&O, &[Arc<O>]) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            page_param_key: page_param_key.to_string(),
            get_next_page_param: Arc::new(get_next_page_param),
            call_options: CallOptions::default(),
        }
    }

    pub fn with_call_options(mut self, call_options: CallOptions) -> Self {
        self.call_options = call_options;
        self
    }
}

#[derive(Clone)]
pub struct InfiniteQueryOptions {
    pub query_key: QueryKey,
    pub query_fn: QueryFunction,
    pub initial_page_param: Value,
    pub get_next_page_param: NextPageParamFn,
    pub structural_sharing: StructuralSharing,
    pub query_key_hash_fn: KeyHashFn,
}

impl InfiniteQueryOptions {
    pub fn next_page_param(&self, data: &InfiniteData) -> Option<Value> {
        let last = data.pages.last()?;
        (self.get_next_page_param)(last, &data.pages)
    }
}

impl fmt::Debug for InfiniteQueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQueryOptions")
            .field("query_key", &self.query_key)
            .field("query_fn", &self.query_fn)
            .field("initial_page_param", &self.initial_page_param)
            .field("structural_sharing", &self.structural_sharing)
            .finish()
    }
}

pub fn infinite_query_options<I: Message, O: Message>(
    factory: &KeyFactory,
    method: &MethodDescriptor<I, O>,
    input: QueryInput<I>,
    transport: &Arc<dyn Transport>,
    options: InfiniteOptions<O>,
) -> CallResult<InfiniteQueryOptions> {
    ensure_unary(method)?;
    let InfiniteOptions {
        page_param_key,
        get_next_page_param,
        call_options,
    } = options;
    let query_key = factory.build_infinite_key(
        method,
        &input,
        transport,
        &page_param_key,
        &call_options.headers,
    )?;
    let field = page_param_name(I::schema(), &page_param_key)?;

    let (initial_page_param, query_fn) = match input {
        QueryInput::Skip(token) => (Value::Null, QueryFunction::Skip(token)),
        QueryInput::Ready(input) => {
            let base = to_json(&input)?;
            let initial = base.get(&field).cloned().unwrap_or(Value::Null);
            let transport = transport.clone();
            let method = method.clone();
            let query_fn: QueryFn = Arc::new(move |context: QueryFnContext| -> QueryFuture {
                let page = match page_input::<I>(&base, &field, context.page_param.as_ref()) {
                    Ok(page) => page,
                    Err(e) => return rejected(e.into()),
                };
                let options = fetch_call_options(&call_options, &context);
                match call_unary(&transport, &method, Some(&page), options) {
                    Ok(call) => Box::pin(async move { call.await.map(CacheValue::message) }),
                    Err(e) => rejected(e),
                }
            });
            (initial, QueryFunction::Fetch(query_fn))
        }
    };

    Ok(InfiniteQueryOptions {
        query_key,
        query_fn,
        initial_page_param,
        get_next_page_param: untyped_next_page_param(get_next_page_param),
        structural_sharing: StructuralSharing::for_message::<O>(),
        query_key_hash_fn: hash_key,
    })
}

/// The input for one page: the first-page input with the page param written into `field`.
fn page_input<I: Message>(
    base: &Value,
    field: &str,
    page_param: Option<&Value>,
) -> Result<I, SchemaError> {
    let mut value = base.clone();
    let page_param = page_param.filter(|p| !p.is_null());
    if let (Some(param), Value::Object(fields)) = (page_param, &mut value) {
        debug!("Fetching page with {}={}", field, param);
        fields.insert(field.to_string(), param.clone());
    }
    serde_json::from_value(value).map_err(|e| SchemaError::InvalidPageParam {
        type_name: I::schema().type_name,
        reason: e.to_string(),
    })
}

fn untyped_next_page_param<O: Message>(typed: TypedNextPageParamFn<O>) -> NextPageParamFn {
    Arc::new(move |last: &CacheValue, all: &[CacheValue]| -> Option<Value> {
        let last = last.as_message::<O>()?;
        let all = all
            .iter()
            .map(|page| page.as_message::<O>())
            .collect::<Option<Vec<_>>>()?;
        typed(&*last, &all).filter(|next| !next.is_null())
    })
}
