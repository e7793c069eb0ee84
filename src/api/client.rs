use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::error::ApiError;

/// Options for a single request: method, JSON body, query and extra headers.
#[derive(Debug, Clone)]
pub struct RequestOptions {
  pub method: Method,
  pub body: Option<Value>,
  pub query: Vec<(String, String)>,
  pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
  fn default() -> Self {
    Self {
      method: Method::GET,
      body: None,
      query: Vec::new(),
      headers: Vec::new(),
    }
  }
}

impl RequestOptions {
  pub fn get() -> Self {
    Self::default()
  }

  pub fn post(body: Value) -> Self {
    Self {
      method: Method::POST,
      body: Some(body),
      ..Self::default()
    }
  }

  pub fn put(body: Value) -> Self {
    Self {
      method: Method::PUT,
      body: Some(body),
      ..Self::default()
    }
  }

  pub fn delete() -> Self {
    Self {
      method: Method::DELETE,
      ..Self::default()
    }
  }

  pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.query.push((key.into(), value.into()));
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// Thin JSON client for the EMR REST API.
///
/// Every endpoint is resolved under `<base_url>/api/`. Non-2xx responses are
/// turned into [`ApiError::Http`], transport failures into
/// [`ApiError::Network`].
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  api_root: Url,
}

impl ApiClient {
  pub fn new(base_url: &str) -> Result<Self, ApiError> {
    let mut base = Url::parse(base_url)
      .map_err(|e| ApiError::Unexpected(format!("Invalid API base URL {}: {}", base_url, e)))?;

    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let api_root = base
      .join("api/")
      .map_err(|e| ApiError::Unexpected(format!("Invalid API base URL {}: {}", base_url, e)))?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| ApiError::Unexpected(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { http, api_root })
  }

  pub fn api_root(&self) -> &Url {
    &self.api_root
  }

  /// Resolve an endpoint such as `patients/A001` against the API root.
  /// Each path segment is percent-encoded on its own.
  pub fn url_for(&self, endpoint: &str) -> Result<Url, ApiError> {
    let parts: Vec<&str> = endpoint.split('/').filter(|s| !s.is_empty()).collect();
    let mut url = self.api_root.clone();
    if parts.is_empty() {
      return Ok(url);
    }

    url
      .path_segments_mut()
      .map_err(|_| ApiError::Unexpected(format!("Cannot use {} as a base URL", self.api_root)))?
      .pop_if_empty()
      .extend(parts);
    Ok(url)
  }

  /// Issue a request and decode the JSON body into `T`.
  pub async fn request<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    options: RequestOptions,
  ) -> Result<T, ApiError> {
    let response = self.send(endpoint, options).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(format!("{}: {}", endpoint, e)))
  }

  /// Issue a request and discard the body.
  pub async fn request_unit(
    &self,
    endpoint: &str,
    options: RequestOptions,
  ) -> Result<(), ApiError> {
    self.send(endpoint, options).await?;
    Ok(())
  }

  /// Whether the API answered at all. Any HTTP status counts as reachable.
  pub async fn probe(&self) -> bool {
    match self.send("", RequestOptions::get()).await {
      Ok(_) => true,
      Err(err) => !err.is_network(),
    }
  }

  async fn send(
    &self,
    endpoint: &str,
    options: RequestOptions,
  ) -> Result<reqwest::Response, ApiError> {
    let url = self.url_for(endpoint)?;
    debug!(method = %options.method, %url, "api request");

    let mut builder = self
      .http
      .request(options.method, url)
      .header(reqwest::header::ACCEPT, "application/json");

    if !options.query.is_empty() {
      builder = builder.query(&options.query);
    }
    for (name, value) in &options.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &options.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let status_text = status.canonical_reason().unwrap_or("");
    let body = response.bytes().await.unwrap_or_default();
    let err = ApiError::from_response(status.as_u16(), status_text, &body);
    debug!(status = status.as_u16(), error = %err, "api request failed");
    Err(err)
  }
}
