//! Thin HTTP wrapper around reqwest with timeout, abort and error normalization.
//!
//! Every call resolves to either the response body parsed into the caller's
//! schema type or a [`FetchError`]. Retrying is left to the query cache.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  pub method: Method,
  /// JSON body, sent with `Content-Type: application/json`
  pub body: Option<Value>,
  pub headers: Vec<(String, String)>,
  /// Overrides the client's default timeout
  pub timeout: Option<Duration>,
  /// Aborts the request when cancelled
  pub signal: Option<CancellationToken>,
}

impl RequestOptions {
  pub fn method(method: Method) -> Self {
    Self {
      method,
      ..Self::default()
    }
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_signal(mut self, signal: CancellationToken) -> Self {
    self.signal = Some(signal);
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// REST client bound to one API base URL.
#[derive(Clone, Debug)]
pub struct HttpClient {
  client: Client,
  base: Url,
  timeout: Duration,
  token: Option<String>,
}

impl HttpClient {
  /// Deadline applied when a request does not set its own.
  pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

  pub fn new(base_url: &str) -> Result<Self> {
    let mut base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;

    // Joining relative paths keeps any prefix only if the base ends in '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = Client::builder()
      .user_agent(Self::user_agent())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      timeout: Self::DEFAULT_TIMEOUT,
      token: None,
    })
  }

  pub fn user_agent() -> &'static str {
    concat!("natur/", env!("CARGO_PKG_VERSION"))
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Send `Authorization: Bearer <token>` with every request.
  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  pub fn url(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| FetchError::InvalidRequest(format!("bad path '{}': {}", path, e)))
  }

  pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
    self.request(path, RequestOptions::default()).await
  }

  pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, FetchError> {
    self
      .request(path, RequestOptions::method(Method::POST).with_body(body))
      .await
  }

  pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, FetchError> {
    self
      .request(path, RequestOptions::method(Method::PUT).with_body(body))
      .await
  }

  pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
    self
      .request(path, RequestOptions::method(Method::DELETE))
      .await
  }

  /// Issue a request and parse the JSON response into `T`.
  pub async fn request<T: DeserializeOwned>(
    &self,
    path: &str,
    options: RequestOptions,
  ) -> Result<T, FetchError> {
    let url = self.url(path)?;
    let method = options.method.clone();

    let mut req = self
      .client
      .request(method.clone(), url)
      .header(ACCEPT, "application/json");
    if let Some(token) = &self.token {
      req = req.bearer_auth(token);
    }
    for (name, value) in &options.headers {
      req = req.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &options.body {
      let bytes = serde_json::to_vec(body)
        .map_err(|e| FetchError::InvalidRequest(format!("failed to encode request body: {}", e)))?;
      req = req.header(CONTENT_TYPE, "application/json").body(bytes);
    }

    let timeout = options.timeout.unwrap_or(self.timeout);
    let signal = options.signal.unwrap_or_default();
    let started = Instant::now();

    let exchange = async {
      let resp = req.send().await?;
      let status = resp.status();
      let bytes = resp.bytes().await?;
      Ok::<_, reqwest::Error>((status, bytes))
    };

    let (status, bytes) = tokio::select! {
      biased;
      _ = signal.cancelled() => {
        debug!(%method, path, "request cancelled");
        return Err(FetchError::Cancelled);
      }
      res = tokio::time::timeout(timeout, exchange) => match res {
        Err(_) => {
          debug!(%method, path, ?timeout, "request timed out");
          return Err(FetchError::Timeout(timeout));
        }
        Ok(Err(e)) => return Err(classify(e, timeout)),
        Ok(Ok(exchange)) => exchange,
      },
    };

    debug!(
      %method,
      path,
      status = status.as_u16(),
      elapsed_ms = started.elapsed().as_millis() as u64,
      "request completed"
    );

    decode(status, &bytes)
  }
}

fn classify(err: reqwest::Error, timeout: Duration) -> FetchError {
  if err.is_timeout() {
    FetchError::Timeout(timeout)
  } else {
    FetchError::Network(err.to_string())
  }
}

fn decode<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> Result<T, FetchError> {
  if !status.is_success() {
    let body = String::from_utf8_lossy(bytes).into_owned();
    return Err(FetchError::http(status.as_u16(), body));
  }

  // 204 and friends: treat an empty body as JSON null
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return serde_json::from_value(Value::Null).map_err(|e| FetchError::Parse(e.to_string()));
  }

  serde_json::from_slice(bytes).map_err(|e| FetchError::Parse(e.to_string()))
}
