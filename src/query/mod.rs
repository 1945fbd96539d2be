//! What the query cache is handed for each call: the key, the fetch function (or the skip
//! sentinel), the structural sharing rule and the key hash function.
mod infinite;

pub use infinite::{
    infinite_query_options, InfiniteData, InfiniteOptions, InfiniteQueryOptions, NextPageParamFn,
};

use crate::call::{call_unary, CallError, CallOptions, CallResult};
use crate::key::{hash_key, KeyFactory, QueryKey};
use crate::schema::{Message, MethodDescriptor, MethodKind, SchemaError};
use crate::sharing::{CacheValue, StructuralSharing};
use crate::skip::{QueryInput, SkipToken};
use crate::transport::Transport;
use futures::future::{self, BoxFuture};
use log::warn;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Passed by the cache on every fetch.
#[derive(Debug, Clone, Default)]
pub struct QueryFnContext {
    pub signal: Option<CancellationToken>,
    pub page_param: Option<Value>,
}

pub type QueryFuture = BoxFuture<'static, CallResult<CacheValue>>;

pub type QueryFn = Arc<dyn Fn(QueryFnContext) -> QueryFuture + Send + Sync>;

pub type KeyHashFn = fn(&QueryKey) -> String;

#[derive(Clone)]
pub enum QueryFunction {
    Fetch(QueryFn),
    Skip(SkipToken),
}

impl QueryFunction {
    pub fn is_skip(&self) -> bool {
        matches!(self, QueryFunction::Skip(_))
    }

    /// Starts a fetch, or returns `None` for skipped queries.
    pub fn fetch(&self, context: QueryFnContext) -> Option<QueryFuture> {
        match self {
            QueryFunction::Fetch(query_fn) => Some(query_fn(context)),
            QueryFunction::Skip(_) => None,
        }
    }
}

impl fmt::Debug for QueryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryFunction::Fetch(_) => f.write_str("QueryFunction::Fetch"),
            QueryFunction::Skip(_) => f.write_str("QueryFunction::Skip"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub query_key: QueryKey,
    pub query_fn: QueryFunction,
    pub structural_sharing: StructuralSharing,
    pub query_key_hash_fn: KeyHashFn,
}

pub(crate) fn ensure_unary<I: Message, O: Message>(
    method: &MethodDescriptor<I, O>,
) -> Result<(), SchemaError> {
    if method.kind() == MethodKind::Unary {
        Ok(())
    } else {
        Err(SchemaError::UnsupportedMethodKind {
            method: method.path(),
            kind: method.kind(),
        })
    }
}

/// Call options for one fetch: the cache's signal wins over one given up front.
pub(crate) fn fetch_call_options(base: &CallOptions, context: &QueryFnContext) -> CallOptions {
    CallOptions {
        signal: context.signal.clone().or_else(|| base.signal.clone()),
        ..base.clone()
    }
}

pub(crate) fn rejected<T: Send + 'static>(error: CallError) -> BoxFuture<'static, CallResult<T>> {
    Box::pin(future::ready(Err(error)))
}

pub fn query_options<I: Message, O: Message>(
    factory: &KeyFactory,
    method: &MethodDescriptor<I, O>,
    input: QueryInput<I>,
    transport: &Arc<dyn Transport>,
    call_options: CallOptions,
) -> CallResult<QueryOptions> {
    ensure_unary(method)?;
    let query_key = factory.build_key(method, &input, transport, &call_options.headers)?;

    let query_fn = match input {
        QueryInput::Skip(token) => QueryFunction::Skip(token),
        QueryInput::Ready(input) => {
            let transport = transport.clone();
            let method = method.clone();
            let query_fn: QueryFn = Arc::new(move |context: QueryFnContext| -> QueryFuture {
                let options = fetch_call_options(&call_options, &context);
                match call_unary(&transport, &method, Some(&input), options) {
                    Ok(call) => Box::pin(async move { call.await.map(CacheValue::message) }),
                    Err(e) => rejected(e),
                }
            });
            QueryFunction::Fetch(query_fn)
        }
    };

    Ok(QueryOptions {
        query_key,
        query_fn,
        structural_sharing: StructuralSharing::for_message::<O>(),
        query_key_hash_fn: hash_key,
    })
}

pub type MutationFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, CallResult<O>> + Send + Sync>;

/// One unary call per invocation, with no key and nothing cached.
pub fn mutation_fn<I: Message, O: Message>(
    method: &MethodDescriptor<I, O>,
    transport: &Arc<dyn Transport>,
    call_options: CallOptions,
) -> CallResult<MutationFn<I, O>> {
    ensure_unary(method)?;
    let transport = transport.clone();
    let method = method.clone();
    Ok(Arc::new(move |input: I| {
        match call_unary(&transport, &method, Some(&input), call_options.clone()) {
            Ok(call) => call,
            Err(e) => rejected(e),
        }
    }))
}

/// Lifts a typed updater to cached values. A cached value that is not an `O` is left as it is.
pub fn safe_updater<O, F>(updater: F) -> impl Fn(Option<&CacheValue>) -> Option<CacheValue>
where
    O: Message,
    F: Fn(Option<Arc<O>>) -> Option<O>,
{
    move |previous: Option<&CacheValue>| {
        let typed = match previous {
            None | Some(CacheValue::Null) => None,
            Some(value) => match value.as_message::<O>() {
                Some(message) => Some(message),
                None => {
                    warn!(
                        "Refusing to update cached value that is not a {}",
                        O::schema().type_name
                    );
                    return previous.cloned();
                }
            },
        };
        updater(typed).map(CacheValue::message)
    }
}
