// src/lib.rs

//! Rate-limited client for the CRPT "create document" endpoint.
//!
//! Every submission is charged against a shared
//! [`SlidingWindowLimiter`](sliding_window_limiter::sliding_window::SlidingWindowLimiter)
//! before the POST goes out, so the process never exceeds the configured number of
//! requests per window no matter how many tasks submit concurrently.

pub mod document;

use std::env;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request as HttpRequest, Response as HttpResponse, StatusCode, Uri, header};
use reqwest::Client as ReqwestClient;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tower::timeout::{Timeout, error::Elapsed};
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

use sliding_window_limiter::Error as BoxError;
use sliding_window_limiter::sliding_window::reqwest_integration::ReqwestService;
use sliding_window_limiter::sliding_window::{
    Clock, LimiterError, SlidingWindowLimiter, SlidingWindowSettings, SystemClock, WindowUnit,
};

pub use document::{Description, Document, Product};

// --- Constants ---
pub const DEFAULT_CRPT_ENDPOINT: &str = "https://ismp.crpt.ru/api/v3/lk/documents/create";
const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_LIMIT: usize = 10;
const SIGNATURE_HEADER: &str = "Signature";

// --- Configuration Environment Variable Names ---
pub const ENV_CRPT_ENDPOINT: &str = "CRPT_ENDPOINT";
pub const ENV_CRPT_WINDOW_UNIT: &str = "CRPT_WINDOW_UNIT";
pub const ENV_CRPT_REQUEST_LIMIT: &str = "CRPT_REQUEST_LIMIT";
pub const ENV_CRPT_TIMEOUT_SECS: &str = "CRPT_TIMEOUT_SECS";
pub const ENV_CRPT_USER_AGENT: &str = "CRPT_USER_AGENT";

// --- Error Definition ---
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubmitError {
    /// The limiter rejected the configured limit or window.
    #[snafu(display("Invalid rate limit configuration: {source}"))]
    Config { source: LimiterError },

    #[snafu(display("Initialization error: {message}"))]
    Initialization { message: String },

    #[snafu(display("Failed to serialize document: {source}"))]
    Serialization { source: serde_json::Error },

    #[snafu(display("HTTP request construction error: {source}"))]
    RequestBuild { source: http::Error },

    /// The wait for a rate limit slot was cancelled; nothing was sent.
    #[snafu(display("Submission cancelled while waiting for the rate limiter"))]
    Cancelled,

    /// No response was obtained (connection, timeout, I/O).
    #[snafu(display("Transport error: {source}"))]
    Transport { source: BoxError },

    /// The API answered with something other than `200 OK`.
    #[snafu(display("API error (status {status}): {body}"))]
    Api { status: u16, body: String },
}

impl SubmitError {
    pub const fn is_api(&self) -> bool {
        matches!(self, SubmitError::Api { .. })
    }

    pub const fn is_transport(&self) -> bool {
        matches!(self, SubmitError::Transport { .. })
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, SubmitError::Cancelled)
    }

    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            SubmitError::Config { .. } | SubmitError::Initialization { .. }
        )
    }
}

impl From<LimiterError> for SubmitError {
    fn from(error: LimiterError) -> Self {
        match error {
            LimiterError::Cancelled => SubmitError::Cancelled,
            other => SubmitError::Config { source: other },
        }
    }
}

// --- Configuration ---
#[derive(Clone, Debug)]
pub struct CrptClientConfig {
    pub endpoint: String,
    pub window_unit: WindowUnit,
    pub request_limit: usize,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub reqwest_client: Option<ReqwestClient>,
}

impl Default for CrptClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CRPT_ENDPOINT.to_string(),
            window_unit: WindowUnit::Seconds,
            request_limit: DEFAULT_REQUEST_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            reqwest_client: None,
        }
    }
}

impl CrptClientConfig {
    /// At most `request_limit` submissions per one `window_unit`.
    pub fn new(window_unit: WindowUnit, request_limit: usize) -> Self {
        Self {
            window_unit,
            request_limit,
            ..Self::default()
        }
    }

    /// Reads `CRPT_*` variables from the process environment, falling back to the
    /// defaults for unset ones. Malformed values are errors, not silently ignored.
    pub fn from_env() -> Result<Self, SubmitError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SubmitError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup(ENV_CRPT_ENDPOINT) {
            config.endpoint = endpoint;
        }
        if let Some(unit) = lookup(ENV_CRPT_WINDOW_UNIT) {
            config.window_unit = unit.parse::<WindowUnit>().context(ConfigSnafu)?;
        }
        if let Some(limit) = lookup(ENV_CRPT_REQUEST_LIMIT) {
            config.request_limit = parse_var(ENV_CRPT_REQUEST_LIMIT, &limit)?;
        }
        if let Some(secs) = lookup(ENV_CRPT_TIMEOUT_SECS) {
            config.request_timeout = Duration::from_secs(parse_var(ENV_CRPT_TIMEOUT_SECS, &secs)?);
        }
        if let Some(user_agent) = lookup(ENV_CRPT_USER_AGENT) {
            config.user_agent = user_agent;
        }

        Ok(config)
    }

    pub fn limiter_settings(&self) -> SlidingWindowSettings {
        SlidingWindowSettings::from_unit(self.window_unit, self.request_limit)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, SubmitError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| SubmitError::Initialization {
            message: format!("{name}='{value}' is not valid: {e}"),
        })
}

// --- Document Submitter ---

/// Submits documents to the CRPT API, at most `request_limit` per window.
///
/// Cloning is cheap and clones share the limiter, so a submitter can be handed to
/// any number of tasks.
pub struct DocumentSubmitter<S = ReqwestService, C = SystemClock> {
    service: S,
    limiter: Arc<SlidingWindowLimiter<C>>,
    /// Shared configuration for the client.
    pub config: Arc<CrptClientConfig>,
    endpoint: Uri,
}

impl DocumentSubmitter<ReqwestService, SystemClock> {
    /// Creates a submitter with its own limiter and a reqwest transport.
    ///
    /// `request_timeout` bounds every submission, including over a caller-supplied
    /// `reqwest_client`. `user_agent` only applies to the client built here.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Config` for a zero limit and
    /// `SubmitError::Initialization` for a malformed endpoint or a client that
    /// cannot be built.
    pub fn new(config: CrptClientConfig) -> Result<Self, SubmitError> {
        let limiter = Arc::new(SlidingWindowLimiter::new(config.limiter_settings())?);

        let reqwest_client = match config.reqwest_client.clone() {
            Some(client) => client,
            None => ReqwestClient::builder()
                .timeout(config.request_timeout)
                .user_agent(config.user_agent.as_str())
                .build()
                .map_err(|e| SubmitError::Initialization {
                    message: format!("Failed to build reqwest client: {e}"),
                })?,
        };

        Self::with_service(
            config,
            limiter,
            ReqwestService::new_with_client(reqwest_client),
        )
    }
}

impl<S, C> DocumentSubmitter<S, C>
where
    S: Service<HttpRequest<Bytes>, Response = HttpResponse<Bytes>> + Clone,
    S::Error: Into<BoxError>,
    C: Clock,
{
    /// Creates a submitter over any transport service, charging `limiter`.
    ///
    /// Pass the same limiter to several submitters to make them share one budget.
    pub fn with_service(
        config: CrptClientConfig,
        limiter: Arc<SlidingWindowLimiter<C>>,
        service: S,
    ) -> Result<Self, SubmitError> {
        let endpoint: Uri = config
            .endpoint
            .parse()
            .map_err(|e| SubmitError::Initialization {
                message: format!("Invalid endpoint '{}': {e}", config.endpoint),
            })?;

        info!(
            target: "crpt_client",
            endpoint = %endpoint,
            limit = limiter.settings().limit(),
            window_ms = limiter.settings().window().as_millis(),
            "DocumentSubmitter initialized"
        );
        debug!(target: "crpt_client", client_config = ?config, "Full client configuration");

        Ok(Self {
            service,
            limiter,
            config: Arc::new(config),
            endpoint,
        })
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter<C>> {
        &self.limiter
    }

    /// Submits `document` signed with `signature`.
    ///
    /// Waits for a rate limit slot first; the wait can only end in admission.
    ///
    /// # Errors
    ///
    /// `Api` for any status other than 200, `Transport` when no response arrived,
    /// `Serialization`/`RequestBuild` when the request could not be prepared.
    pub async fn submit(&self, document: &Document, signature: &str) -> Result<(), SubmitError> {
        let request = self.build_request(document, signature)?;
        self.limiter.acquire().await;
        self.send(request).await
    }

    /// Like [`submit`](Self::submit), but returns `SubmitError::Cancelled` if `cancel`
    /// fires while waiting for a rate limit slot. Nothing is sent in that case.
    pub async fn submit_with_cancel(
        &self,
        document: &Document,
        signature: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SubmitError> {
        let request = self.build_request(document, signature)?;
        if let Err(error) = self.limiter.acquire_with_cancel(cancel).await {
            warn!(target: "crpt_client", doc_id = %document.doc_id, "Submission cancelled before it was sent");
            return Err(error.into());
        }
        self.send(request).await
    }

    fn build_request(
        &self,
        document: &Document,
        signature: &str,
    ) -> Result<HttpRequest<Bytes>, SubmitError> {
        let body = serde_json::to_vec(document).context(SerializationSnafu)?;
        debug!(
            target: "crpt_client",
            doc_id = %document.doc_id,
            products = document.products.len(),
            body_len = body.len(),
            signature_len = signature.len(),
            "Prepared document submission"
        );

        HttpRequest::post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Bytes::from(body))
            .context(RequestBuildSnafu)
    }

    async fn send(&self, request: HttpRequest<Bytes>) -> Result<(), SubmitError> {
        let timeout = self.config.request_timeout;
        let mut service = Timeout::new(self.service.clone(), timeout);

        let response = service
            .ready()
            .await
            .map_err(|source| SubmitError::Transport { source })?
            .call(request)
            .await
            .map_err(|source| {
                if source.is::<Elapsed>() {
                    error!(target: "crpt_client", timeout_ms = timeout.as_millis(), "Document submission timed out");
                } else {
                    error!(target: "crpt_client", error = %source, "Document submission failed in transport");
                }
                SubmitError::Transport { source }
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            info!(target: "crpt_client", %status, "Document accepted");
            return Ok(());
        }

        let body = String::from_utf8_lossy(response.body()).into_owned();
        warn!(
            target: "crpt_client",
            %status,
            error_body = body.chars().take(200).collect::<String>(),
            "Document rejected by API"
        );
        Err(SubmitError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

impl<S: Clone, C> Clone for DocumentSubmitter<S, C> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            limiter: Arc::clone(&self.limiter),
            config: Arc::clone(&self.config),
            endpoint: self.endpoint.clone(),
        }
    }
}

impl<S, C> Debug for DocumentSubmitter<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSubmitter")
            .field("endpoint", &self.endpoint)
            .field("limiter", &self.limiter)
            // service is not Debug
            .finish_non_exhaustive()
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn defaults_target_the_crpt_endpoint() {
        let config = CrptClientConfig::default();
        assert_eq!(config.endpoint, DEFAULT_CRPT_ENDPOINT);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.window_unit, WindowUnit::Seconds);
    }

    #[test]
    fn config_from_lookup_overrides_defaults() {
        let config = CrptClientConfig::from_lookup(lookup(&[
            (ENV_CRPT_WINDOW_UNIT, "minute"),
            (ENV_CRPT_REQUEST_LIMIT, "25"),
            (ENV_CRPT_TIMEOUT_SECS, "5"),
        ]))
        .unwrap();

        assert_eq!(config.window_unit, WindowUnit::Minutes);
        assert_eq!(config.request_limit, 25);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.endpoint, DEFAULT_CRPT_ENDPOINT);
    }

    #[test]
    fn user_agent_defaults_and_overrides() {
        assert_eq!(CrptClientConfig::default().user_agent, DEFAULT_USER_AGENT);

        let config =
            CrptClientConfig::from_lookup(lookup(&[(ENV_CRPT_USER_AGENT, "acme/2.0")])).unwrap();
        assert_eq!(config.user_agent, "acme/2.0");
    }

    #[cfg(unix)]
    #[test]
    fn from_env_ignores_unrelated_non_utf8_variables() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // SAFETY: no other test reads or writes this variable.
        unsafe {
            env::set_var(
                "CRPT_CLIENT_TEST_NON_UTF8",
                OsStr::from_bytes(&[0xff, 0xfe]),
            );
        }

        let config = CrptClientConfig::from_env();

        unsafe {
            env::remove_var("CRPT_CLIENT_TEST_NON_UTF8");
        }
        assert!(config.is_ok());
    }

    #[test]
    fn malformed_env_values_are_rejected() {
        let err = CrptClientConfig::from_lookup(lookup(&[(ENV_CRPT_REQUEST_LIMIT, "many")]))
            .unwrap_err();
        assert!(err.is_config());

        let err = CrptClientConfig::from_lookup(lookup(&[(ENV_CRPT_WINDOW_UNIT, "fortnight")]))
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Config {
                source: LimiterError::UnknownWindowUnit { .. }
            }
        ));
    }

    #[test]
    fn zero_limit_fails_construction() {
        let err = DocumentSubmitter::new(CrptClientConfig::new(WindowUnit::Seconds, 0)).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Config {
                source: LimiterError::InvalidConfig { .. }
            }
        ));
    }

    #[test]
    fn limiter_errors_map_to_submit_errors() {
        assert!(SubmitError::from(LimiterError::Cancelled).is_cancelled());
        assert!(
            SubmitError::from(LimiterError::InvalidConfig {
                reason: "x".to_string()
            })
            .is_config()
        );
    }
}
