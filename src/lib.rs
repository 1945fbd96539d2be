//! Query keys and fetch functions for caching RPC results.
//!
//! A query is identified by `[service, method, {input, transport, ...}]`. The input is encoded in
//! a canonical form so that equal messages always produce equal keys, the transport is replaced by
//! a stable token, and fresh results are diffed against cached ones so unchanged values keep their
//! references.
pub mod call;
pub mod config;
pub mod key;
pub mod query;
pub mod schema;
pub mod sharing;
pub mod skip;
pub mod transport;
mod util;

#[cfg(test)]
mod test_utils;

pub use call::{call_unary, CallError, CallOptions, CallResult, UnaryCall};
pub use config::{Config, ConfigError};
pub use key::{hash_key, Cardinality, KeyFactory, QueryKey};
pub use query::{
    infinite_query_options, mutation_fn, query_options, safe_updater, InfiniteData,
    InfiniteOptions, InfiniteQueryOptions, QueryFnContext, QueryFunction, QueryOptions,
};
pub use schema::{Message, MessageSchema, MethodDescriptor, MethodKind, SchemaError, Struct};
pub use sharing::{CacheValue, StructuralSharing};
pub use skip::{is_skip, QueryInput, SkipToken, SKIP};
pub use transport::{HttpTransport, Transport, TransportError, TransportRegistry, TransportToken};
