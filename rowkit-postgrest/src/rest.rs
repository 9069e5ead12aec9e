use http::{Method, StatusCode};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use rowkit_data::DataError;
use serde_json::Value;
use tracing::debug;

use crate::config::{PostgrestConfig, DEFAULT_SCHEMA};
use crate::error::{BackendFailure, TransportErrorExt};
use crate::socket;
use crate::transport::{BoxFuture, ChannelSpec, RawChannel, Response, Transport};
use crate::translate::{Operation, Request};

const APIKEY: HeaderName = HeaderName::from_static("apikey");
const PREFER: HeaderName = HeaderName::from_static("prefer");
const ACCEPT_PROFILE: HeaderName = HeaderName::from_static("accept-profile");
const CONTENT_PROFILE: HeaderName = HeaderName::from_static("content-profile");

/// Live transport: REST over reqwest, realtime over a Phoenix websocket.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: PostgrestConfig,
}

impl HttpTransport {
    pub fn new(config: PostgrestConfig) -> Result<Self, DataError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| e.into_data_error())?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PostgrestConfig {
        &self.config
    }

    fn auth_headers(&self) -> Result<HeaderMap, DataError> {
        let mut headers = HeaderMap::new();
        headers.insert(APIKEY, header_value(&self.config.api_key)?);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", self.config.api_key))?,
        );
        Ok(headers)
    }

    fn headers_for(&self, request: &Request) -> Result<HeaderMap, DataError> {
        let mut headers = self.auth_headers()?;

        let prefer = match &request.operation {
            Operation::Select { count: true, .. } => Some("count=exact"),
            Operation::Select { .. } | Operation::Rpc { .. } => None,
            Operation::Insert { returning, .. }
            | Operation::Update { returning, .. }
            | Operation::Delete { returning } => Some(if returning.is_some() {
                "return=representation,count=exact"
            } else {
                "return=minimal,count=exact"
            }),
        };
        if let Some(prefer) = prefer {
            headers.insert(PREFER, HeaderValue::from_static(prefer));
        }

        if self.config.schema != DEFAULT_SCHEMA {
            let profile = if request.is_write() || matches!(request.operation, Operation::Rpc { .. }) {
                CONTENT_PROFILE
            } else {
                ACCEPT_PROFILE
            };
            headers.insert(profile, header_value(&self.config.schema)?);
        }
        Ok(headers)
    }

    async fn send(&self, request: &Request) -> Result<Response, DataError> {
        let rest_url = self.config.rest_url();
        let (method, url, body) = match &request.operation {
            Operation::Select { head, .. } => {
                let method = if *head { Method::HEAD } else { Method::GET };
                (method, format!("{rest_url}/{}", request.table), None)
            }
            Operation::Insert { body, .. } => {
                (Method::POST, format!("{rest_url}/{}", request.table), Some(body))
            }
            Operation::Update { body, .. } => {
                (Method::PATCH, format!("{rest_url}/{}", request.table), Some(body))
            }
            Operation::Delete { .. } => {
                (Method::DELETE, format!("{rest_url}/{}", request.table), None)
            }
            Operation::Rpc { function, args } => {
                (Method::POST, format!("{rest_url}/rpc/{function}"), Some(args))
            }
        };

        debug!(method = %method, table = %request.table, "Dispatching PostgREST request");

        let mut builder = self
            .client
            .request(method, url)
            .headers(self.headers_for(request)?)
            .query(&request.query_pairs());
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| e.into_data_error())?;
        let status = response.status();
        let count = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let text = response.text().await.map_err(|e| e.into_data_error())?;

        if !status.is_success() {
            return Err(BackendFailure::from_body(status.as_u16(), &text).into());
        }

        let rows = if text.trim().is_empty() || status == StatusCode::NO_CONTENT {
            Vec::new()
        } else {
            rows_from_body(serde_json::from_str(&text)?)
        };
        Ok(Response { rows, count })
    }
}

impl Transport for HttpTransport {
    fn connect(&self) -> BoxFuture<'_, Result<(), DataError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/", self.config.rest_url()))
                .headers(self.auth_headers()?)
                .send()
                .await
                .map_err(|e| e.into_data_error())?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let text = response.text().await.unwrap_or_default();
                Err(BackendFailure::from_body(status.as_u16(), &text).into())
            }
        })
    }

    fn execute<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, DataError>> {
        Box::pin(self.send(request))
    }

    fn open_channel<'a>(&'a self, spec: &'a ChannelSpec) -> BoxFuture<'a, Result<RawChannel, DataError>> {
        Box::pin(socket::open_channel(&self.config, spec))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, DataError> {
    HeaderValue::from_str(value)
        .map_err(|e| DataError::validation(format!("invalid header value: {e}")))
}

/// Total from a `Content-Range` header (`0-9/25`, `*/25`). `*/*` has none.
fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.parse().ok())
}

fn rows_from_body(body: Value) -> Vec<Value> {
    match body {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
