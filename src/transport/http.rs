use crate::transport::{
    Headers, Transport, TransportError, TransportResult, UnaryRequest, UnaryResponse,
};
use async_trait::async_trait;
use log::debug;
use reqwest::header::HeaderMap;
use serde::Deserialize;

const TRAILER_PREFIX: &str = "trailer-";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Unary calls as JSON POSTs to `{base_url}/{service}/{method}`, Connect protocol style.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, request: &UnaryRequest) -> TransportResult<reqwest::Request> {
        let url = format!("{}/{}/{}", self.base_url, request.service, request.method);
        debug!("Requesting URL: {}", url);
        let mut builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("connect-protocol-version", "1")
            .json(&request.message);
        if let Some(timeout) = request.timeout {
            builder = builder
                .header("connect-timeout-ms", timeout.as_millis().to_string())
                .timeout(timeout);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.build().map_err(TransportError::from)
    }

    async fn execute(&self, request: reqwest::Request) -> TransportResult<UnaryResponse> {
        let response = self.client.execute(request).await?;
        let status = response.status();
        let (headers, trailers) = split_trailers(response.headers());

        if !status.is_success() {
            let body = response.text().await?;
            let error = serde_json::from_str::<ErrorBody>(&body).unwrap_or(ErrorBody {
                code: String::new(),
                message: body,
            });
            return Err(TransportError::Remote {
                code: if error.code.is_empty() {
                    status.as_u16().to_string()
                } else {
                    error.code
                },
                message: error.message,
            });
        }

        let message = response.json::<serde_json::Value>().await?;
        Ok(UnaryResponse {
            message,
            headers,
            trailers,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn unary(&self, request: UnaryRequest) -> TransportResult<UnaryResponse> {
        let signal = request.signal.clone();
        let http_request = self.build_request(&request)?;
        tokio::select! {
            biased;
            _ = signal.cancelled() => Err(TransportError::Canceled(format!(
                "{}/{}",
                request.service, request.method
            ))),
            response = self.execute(http_request) => response,
        }
    }
}

fn split_trailers(map: &HeaderMap) -> (Headers, Headers) {
    let mut headers = Vec::new();
    let mut trailers = Vec::new();
    for (name, value) in map {
        let value = match value.to_str() {
            Ok(value) => value.to_string(),
            Err(_) => continue,
        };
        match name.as_str().strip_prefix(TRAILER_PREFIX) {
            Some(trailer) => trailers.push((trailer.to_string(), value)),
            None => headers.push((name.as_str().to_string(), value)),
        }
    }
    (headers, trailers)
}
