//! Unary call adapter: one method, one input, one network call.
use crate::schema::{canonical_json, to_json, Message, MethodDescriptor, MethodKind, SchemaError};
use crate::transport::{Headers, Transport, TransportError, UnaryRequest};
use futures::future::BoxFuture;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub signal: Option<CancellationToken>,
    pub timeout: Option<Duration>,
    pub headers: Headers,
}

impl CallOptions {
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub type CallResult<T> = Result<T, CallError>;

pub type UnaryCall<O> = BoxFuture<'static, CallResult<O>>;

#[derive(thiserror::Error, Debug)]
pub enum CallError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] SchemaError),
    #[error("Call canceled")]
    Canceled,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, CallError::Canceled)
    }
}

/// Prepares a unary call.
///
/// Input problems are reported here, before anything is dispatched; the returned future performs
/// exactly one transport call and reports cancellation and transport failures. A missing input is
/// replaced by the input type's default message.
pub fn call_unary<I: Message, O: Message>(
    transport: &Arc<dyn Transport>,
    method: &MethodDescriptor<I, O>,
    input: Option<&I>,
    options: CallOptions,
) -> CallResult<UnaryCall<O>> {
    if method.kind() != MethodKind::Unary {
        return Err(SchemaError::UnsupportedMethodKind {
            method: method.path(),
            kind: method.kind(),
        }
        .into());
    }

    let message = match input {
        Some(input) => to_json(input)?,
        None => to_json(&I::default())?,
    };
    canonical_json(I::schema(), &message)?;

    let signal = options.signal.unwrap_or_default();
    let request = UnaryRequest {
        service: method.service().to_string(),
        method: method.name().to_string(),
        signal: signal.clone(),
        timeout: options.timeout,
        headers: options.headers,
        message,
    };
    let transport = transport.clone();

    Ok(Box::pin(async move {
        let path = format!("{}/{}", request.service, request.method);
        if signal.is_cancelled() {
            debug!("Call {} canceled before dispatch", path);
            return Err(CallError::Canceled);
        }

        debug!("Dispatching unary call {}", path);
        let response = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                debug!("Call {} canceled in flight", path);
                return Err(CallError::Canceled);
            }
            response = transport.unary(request) => match response {
                Err(TransportError::Canceled(_)) => {
                    debug!("Call {} canceled by the transport", path);
                    return Err(CallError::Canceled);
                }
                response => response?,
            },
        };

        let output = serde_json::from_value::<O>(response.message).map_err(TransportError::from)?;
        Ok(output)
    }))
}
