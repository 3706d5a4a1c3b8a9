//! REST client for the admin API: authentication, modules, submodules, users
//! and roles.

use adc_core::{ConfigError, NavModule, NavSubmodule, ResourceError, ResourceLayer, SessionCredential};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod types;

#[cfg(test)]
mod tests;

pub use types::{
    role_name, LoginResponse, ModulePayload, RegisterRequest, Role, SubmodulePayload, User,
    UserPayload,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL of the API, without a trailing slash
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds: 30,
            user_agent: format!("adc-console/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Checks that `raw` is an absolute http(s) URL and strips trailing slashes.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed =
        reqwest::Url::parse(trimmed).map_err(|_| ConfigError::InvalidBaseUrl(raw.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::InvalidBaseUrl(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

fn create_http_client(config: &ApiClientConfig) -> Result<reqwest::Client, ConfigError> {
    let user_agent = reqwest::header::HeaderValue::from_str(&config.user_agent)
        .map_err(|err| ConfigError::Invalid(format!("invalid user agent: {err}")))?;
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(reqwest::header::USER_AGENT, user_agent);

    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|err| ConfigError::Invalid(format!("failed to create http client: {err}")))
}

/// Pulls the message out of `{"detail": ...}` error bodies.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(detail) if !detail.trim().is_empty() => Some(detail.clone()),
        serde_json::Value::String(_) | serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

async fn handle_response_error(
    response: reqwest::Response,
    fallback: &str,
    session_bound: bool,
) -> ResourceError {
    let status = response.status();
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();

    if session_bound && status == StatusCode::UNAUTHORIZED {
        warn!(event = "api_unauthorized", path = %url);
        return ResourceError::Unauthorized;
    }

    let detail = extract_detail(&body).unwrap_or_else(|| fallback.to_string());
    warn!(
        event = "api_request_failed",
        path = %url,
        status = status.as_u16(),
        detail = %detail
    );
    ResourceError::Status {
        status: status.as_u16(),
        detail,
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ResourceError> {
    response
        .json::<T>()
        .await
        .map_err(|err| ResourceError::Decode(err.to_string()))
}

/// Appends `segments` to `base`, percent-encoding each one, so an id can
/// never add path levels or start a query.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ResourceError> {
    if let Some(bad) = segments
        .iter()
        .find(|segment| matches!(segment.trim(), "" | "." | ".."))
    {
        return Err(ResourceError::InvalidPath(format!("{bad:?}")));
    }
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ResourceError::InvalidPath(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    config: ApiClientConfig,
    base: Url,
    token: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("authorized", &self.token.is_some())
            .finish()
    }
}

impl ApiClient {
    pub fn new(mut config: ApiClientConfig) -> Result<Self, ConfigError> {
        config.base_url = normalize_base_url(&config.base_url)?;
        let base = Url::parse(&config.base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(config.base_url.clone()))?;
        let client = create_http_client(&config)?;
        info!(event = "api_client_created", base_url = %config.base_url);
        Ok(Self {
            client,
            config,
            base,
            token: None,
        })
    }

    /// A client that sends `credential` as a bearer token.
    pub fn with_credential(&self, credential: &SessionCredential) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            base: self.base.clone(),
            token: Some(credential.expose().to_string()),
        }
    }

    pub fn without_credential(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            base: self.base.clone(),
            token: None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.token.is_some()
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ResourceError> {
        let url = endpoint(&self.base, segments)?;
        debug!(event = "api_request", method = %method, path = url.path());
        let builder = self.client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        fallback: &str,
        session_bound: bool,
    ) -> Result<reqwest::Response, ResourceError> {
        let response = builder
            .send()
            .await
            .map_err(|err| ResourceError::Transport(err.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(handle_response_error(response, fallback, session_bound).await)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ResourceError> {
        let response = self
            .execute(self.request(Method::GET, segments)?, "Request failed", true)
            .await?;
        decode(response).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<(), ResourceError> {
        self.execute(self.request(method, segments)?.json(body), "Request failed", true)
            .await?;
        Ok(())
    }

    async fn delete(&self, segments: &[&str]) -> Result<(), ResourceError> {
        self.execute(self.request(Method::DELETE, segments)?, "Request failed", true)
            .await?;
        Ok(())
    }

    // Authentication. A 401 here means bad input, not an expired session.

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ResourceError> {
        let builder = self
            .request(Method::POST, &["login"])?
            .form(&[("username", username), ("password", password)]);
        let response = self.execute(builder, "Login Failed", false).await?;
        let login: LoginResponse = decode(response).await?;
        info!(event = "api_login_succeeded", token_type = %login.token_type);
        Ok(login)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ResourceError> {
        let builder = self.request(Method::POST, &["signup"])?.json(request);
        self.execute(builder, "Registration Failed", false).await?;
        info!(event = "api_register_succeeded");
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ResourceError> {
        let builder = self
            .request(Method::POST, &["logout"])?
            .json(&serde_json::json!({}));
        self.execute(builder, "Logout Failed", false).await?;
        Ok(())
    }

    // Modules

    pub async fn get_modules(&self) -> Result<Vec<NavModule>, ResourceError> {
        self.get_json(&["modules"]).await
    }

    pub async fn get_module(&self, id: &str) -> Result<NavModule, ResourceError> {
        self.get_json(&["modules", id]).await
    }

    pub async fn create_module(&self, payload: &ModulePayload) -> Result<(), ResourceError> {
        self.send_json(Method::POST, &["modules"], payload).await
    }

    pub async fn update_module(&self, id: &str, payload: &ModulePayload) -> Result<(), ResourceError> {
        self.send_json(Method::PUT, &["modules", id], payload).await
    }

    pub async fn delete_module(&self, id: &str) -> Result<(), ResourceError> {
        self.delete(&["modules", id]).await
    }

    // Submodules

    pub async fn get_submodules(&self, module_id: &str) -> Result<Vec<NavSubmodule>, ResourceError> {
        self.get_json(&["submodules", module_id]).await
    }

    pub async fn get_submodule(&self, id: &str) -> Result<NavSubmodule, ResourceError> {
        self.get_json(&["submodules", "detail", id]).await
    }

    pub async fn create_submodule(&self, payload: &SubmodulePayload) -> Result<(), ResourceError> {
        self.send_json(Method::POST, &["submodules"], payload).await
    }

    pub async fn update_submodule(
        &self,
        id: &str,
        payload: &SubmodulePayload,
    ) -> Result<(), ResourceError> {
        self.send_json(Method::PUT, &["submodules", id], payload)
            .await
    }

    pub async fn delete_submodule(&self, id: &str) -> Result<(), ResourceError> {
        self.delete(&["submodules", id]).await
    }

    // Users and roles

    pub async fn get_users(&self) -> Result<Vec<User>, ResourceError> {
        self.get_json(&["users"]).await
    }

    pub async fn create_user(&self, payload: &UserPayload) -> Result<(), ResourceError> {
        self.send_json(Method::POST, &["users"], payload).await
    }

    pub async fn update_user(&self, id: &str, payload: &UserPayload) -> Result<(), ResourceError> {
        self.send_json(Method::PUT, &["users", id], payload).await
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ResourceError> {
        self.delete(&["users", id]).await
    }

    pub async fn get_roles(&self) -> Result<Vec<Role>, ResourceError> {
        self.get_json(&["roles"]).await
    }
}

#[async_trait]
impl ResourceLayer for ApiClient {
    async fn list_modules(&self) -> Result<Vec<NavModule>, ResourceError> {
        self.get_modules().await
    }

    async fn list_submodules(&self, module_id: &str) -> Result<Vec<NavSubmodule>, ResourceError> {
        self.get_submodules(module_id).await
    }
}
