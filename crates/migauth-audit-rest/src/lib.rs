//! This crate provides an [`AuditCollaborator`] for [libmigauth] that consults an external audit
//! and rate-limit service through a JSON HTTP API.
//!
//! Every collaborator operation becomes a `POST <base_url>/<operation>` carrying a JSON object.
//! The answer is taken from the response body with a JSON pointer (the *selector*) and matched
//! against a regular expression. With the defaults a response of `{"result": true}` means yes.
//!
//! The PAM flow is synchronous, so requests are driven on a private current-thread tokio runtime
//! and bounded by a per-request timeout. Do not call into a [`RestCollaborator`] from within an
//! async context.
//!
//! [libmigauth]: https://crates.io/crates/libmigauth

use http_body_util::BodyExt;
use hyper::{Method, Request, Uri, http::uri::InvalidUri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use migauth_core::audit::{AttemptReport, AuditCollaborator, CollaboratorError, ErrorKind};
use migauth_core::secret::Secret;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;

/// The JSON pointer used when none is configured.
pub const DEFAULT_SELECTOR: &str = "/result";
/// The pattern a selected value must match to count as yes.
pub const DEFAULT_REGEX: &str = "^true$";
/// How long a single request may take.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// An [`AuditCollaborator`] that consults a JSON HTTP API.
///
/// Create one with the [`Builder`].
pub struct RestCollaborator {
    base_url: String,
    selector: String,
    regex: Regex,
    timeout: Duration,
    forward_passwords: bool,
    client: Client<HttpsConnector<HttpConnector>, String>,
    runtime: Runtime,
}

/// Used to build the [`RestCollaborator`]
#[derive(Clone, Debug)]
pub struct Builder {
    base_url: String,
    selector: String,
    regex: String,
    timeout: Duration,
    forward_passwords: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            base_url: String::new(),
            selector: DEFAULT_SELECTOR.to_string(),
            regex: DEFAULT_REGEX.to_string(),
            timeout: DEFAULT_TIMEOUT,
            forward_passwords: false,
        }
    }
}

/// The error returned when a [`RestCollaborator`] cannot be built.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The base URL does not parse.
    #[error("invalid base url")]
    Url(#[from] InvalidUri),
    /// The answer pattern does not compile.
    #[error("invalid answer pattern")]
    Regex(#[from] regex::Error),
    /// The private runtime could not be started.
    #[error("could not start runtime")]
    Runtime(#[from] std::io::Error),
}

impl Builder {
    /// Creates a new `Builder` with the default selector, pattern and timeout.
    ///
    /// Only the base URL has to be set:
    ///
    /// ```no_run
    /// # use migauth_audit_rest::Builder;
    /// let collaborator = Builder::new()
    ///     .with_base_url("https://audit.example.org/api/v1".to_string())
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn new() -> Builder {
        Builder::default()
    }

    /// specify the URL the operation names get appended to
    pub fn with_base_url(mut self, s: String) -> Self {
        self.base_url = s;
        self
    }

    /// specify JSON selector to be used to extract the answer from the response
    /// format is serde_json's Value.pointer()
    pub fn with_selector(mut self, s: String) -> Self {
        self.selector = s;
        self
    }

    /// specify the pattern the selected value must match to count as yes
    pub fn with_regex(mut self, s: String) -> Self {
        self.regex = s;
        self
    }

    /// specify how long a single request may take
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends presented passwords to the service's password policy.
    ///
    /// Off by default, in which case the static policy of libmigauth applies.
    pub fn with_password_policy(mut self, enabled: bool) -> Self {
        self.forward_passwords = enabled;
        self
    }

    /// Creates the collaborator.
    pub fn build(self) -> Result<RestCollaborator, BuildError> {
        self.base_url.parse::<Uri>()?;
        let regex = Regex::new(&self.regex)?;
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let client = {
            let _guard = runtime.enter();
            let https = hyper_rustls::HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_or_http()
                .enable_http1()
                .build();
            Client::builder(TokioExecutor::new()).build(https)
        };
        Ok(RestCollaborator {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            selector: self.selector,
            regex,
            timeout: self.timeout,
            forward_passwords: self.forward_passwords,
            client,
            runtime,
        })
    }
}

#[derive(Serialize)]
struct AttemptPayload<'a> {
    username: &'a str,
    address: Option<String>,
    secret_digest: Option<&'a str>,
    mode: Option<String>,
    flags: u32,
    valid_username: bool,
    valid_auth: bool,
    reason: Option<&'a str>,
}

impl<'a> From<&'a AttemptReport> for AttemptPayload<'a> {
    fn from(report: &'a AttemptReport) -> Self {
        AttemptPayload {
            username: &report.username,
            address: report.address.map(|a| a.to_string()),
            secret_digest: report.secret_digest.as_deref(),
            mode: report.mode.map(|m| m.to_string()),
            flags: report.flags.bits(),
            valid_username: report.valid_username(),
            valid_auth: report.valid_auth(),
            reason: report.reason.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct UserPayload<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
}

impl<'a> UserPayload<'a> {
    fn new(username: &'a str, address: Option<IpAddr>) -> Self {
        UserPayload {
            username,
            address: address.map(|a| a.to_string()),
        }
    }
}

#[derive(Serialize)]
struct PasswordPayload {
    password: String,
}

#[derive(Serialize)]
struct EmptyPayload {}

trait TrimQuotes {
    fn trim_quotes(&self) -> &str;
}

impl TrimQuotes for String {
    // Used to trim quotes from a json-string formatted string
    fn trim_quotes(&self) -> &str {
        if self.starts_with('"') && self.ends_with('"') && self.len() > 1 {
            &self[1..self.len() - 1]
        } else {
            self
        }
    }
}

impl RestCollaborator {
    fn url_for(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation)
    }

    fn selected<'v>(&self, body: &'v Value) -> Result<&'v Value, CollaboratorError> {
        body.pointer(&self.selector).ok_or_else(|| {
            CollaboratorError::new(ErrorKind::BadResponse, format!("no value at selector {}", self.selector))
        })
    }

    fn answer(&self, body: &Value) -> Result<bool, CollaboratorError> {
        let selected = self.selected(body)?.to_string();
        Ok(self.regex.is_match(selected.trim_quotes()))
    }

    fn call<P: Serialize>(&self, operation: &str, payload: &P) -> Result<Value, CollaboratorError> {
        let body = serde_json::to_string(payload).map_err(|e| CollaboratorError::new(ErrorKind::Unavailable, e))?;
        let req = Request::builder()
            .method(Method::POST)
            .header("Content-type", "application/json")
            .uri(self.url_for(operation))
            .body(body)
            .map_err(|e| CollaboratorError::new(ErrorKind::Unavailable, e))?;

        self.runtime
            .block_on(async { tokio::time::timeout(self.timeout, self.exchange(req)).await })
            .map_err(|elapsed| CollaboratorError::new(ErrorKind::TimedOut, elapsed))?
    }

    async fn exchange(&self, req: Request<String>) -> Result<Value, CollaboratorError> {
        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| CollaboratorError::new(ErrorKind::Unavailable, e))?;

        let (parts, body) = resp.into_parts();
        let status_context = format!("http status={}", parts.status.as_str());
        if !parts.status.is_success() {
            return Err(CollaboratorError::new(ErrorKind::BadResponse, status_context));
        }
        let body = BodyExt::collect(body)
            .await
            .map_err(|e| CollaboratorError::new(ErrorKind::Unavailable, e))?
            .to_bytes();
        serde_json::from_slice(&body).map_err(|e| CollaboratorError::new(ErrorKind::BadResponse, e))
    }
}

impl AuditCollaborator for RestCollaborator {
    #[tracing_attributes::instrument(skip(self, report), fields(username = %report.username, flags = report.flags.bits()))]
    fn report_attempt(&self, report: &AttemptReport) -> Result<bool, CollaboratorError> {
        let body = self.call("report_attempt", &AttemptPayload::from(report))?;
        self.answer(&body)
    }

    #[tracing_attributes::instrument(skip(self))]
    fn hit_rate_limit(&self, username: &str, address: Option<IpAddr>) -> Result<bool, CollaboratorError> {
        let body = self.call("hit_rate_limit", &UserPayload::new(username, address))?;
        self.answer(&body)
    }

    #[tracing_attributes::instrument(skip(self))]
    fn check_account_accessible(&self, username: &str) -> Result<bool, CollaboratorError> {
        let body = self.call("check_account_accessible", &UserPayload::new(username, None))?;
        self.answer(&body)
    }

    #[tracing_attributes::instrument(skip(self))]
    fn expire_rate_limit(&self) -> Result<usize, CollaboratorError> {
        let body = self.call("expire_rate_limit", &EmptyPayload {})?;
        self.selected(&body)?
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| CollaboratorError::new(ErrorKind::BadResponse, "expired count is not a number"))
    }

    #[tracing_attributes::instrument(skip(self))]
    fn validate_username(&self, username: &str) -> Result<bool, CollaboratorError> {
        let body = self.call("validate_username", &UserPayload::new(username, None))?;
        self.answer(&body)
    }

    #[tracing_attributes::instrument(skip(self, secret))]
    fn validate_password(&self, secret: &Secret) -> Result<bool, CollaboratorError> {
        if !self.forward_passwords {
            return Err(ErrorKind::Unavailable.into());
        }
        let payload = PasswordPayload {
            password: String::from_utf8_lossy(secret.as_bytes()).into_owned(),
        };
        let body = self.call("validate_password", &payload)?;
        self.answer(&body)
    }

    #[tracing_attributes::instrument(skip(self))]
    fn check_twofactor_session(&self, username: &str, address: Option<IpAddr>) -> Result<bool, CollaboratorError> {
        let body = self.call("check_twofactor_session", &UserPayload::new(username, address))?;
        self.answer(&body)
    }

    fn name(&self) -> &str {
        "rest"
    }
}

impl fmt::Debug for RestCollaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestCollaborator")
            .field("base_url", &self.base_url)
            .field("selector", &self.selector)
            .field("regex", &self.regex.as_str())
            .field("timeout", &self.timeout)
            .field("forward_passwords", &self.forward_passwords)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migauth_core::audit::{AttemptFlags, LoginMode};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn collaborator() -> RestCollaborator {
        Builder::new()
            .with_base_url("http://127.0.0.1:9/audit/".to_string())
            .build()
            .unwrap()
    }

    #[test]
    fn operations_are_appended_to_the_base_url() {
        assert_eq!("http://127.0.0.1:9/audit/hit_rate_limit", collaborator().url_for("hit_rate_limit"));
    }

    #[test]
    fn answer_matches_selected_value() {
        let rest = collaborator();
        assert!(rest.answer(&json!({"result": true})).unwrap());
        assert!(rest.answer(&json!({"result": "true"})).unwrap());
        assert!(!rest.answer(&json!({"result": false})).unwrap());
        assert!(!rest.answer(&json!({"result": null})).unwrap());
        assert_eq!(ErrorKind::BadResponse, rest.answer(&json!({"other": true})).unwrap_err().kind());
    }

    #[test]
    fn custom_selector_and_pattern() {
        let rest = Builder::new()
            .with_base_url("http://localhost".to_string())
            .with_selector("/data/verdict".to_string())
            .with_regex("^(allow|yes)$".to_string())
            .build()
            .unwrap();
        assert!(rest.answer(&json!({"data": {"verdict": "allow"}})).unwrap());
        assert!(!rest.answer(&json!({"data": {"verdict": "deny"}})).unwrap());
    }

    #[test]
    fn attempt_payload_carries_digest_not_secret() {
        let report = AttemptReport {
            username: "alice".to_string(),
            address: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            secret_digest: Some(Secret::from("hunter22").report_digest()),
            mode: Some(LoginMode::ShareLink),
            flags: AttemptFlags::AUTHTYPE_PASSWORD | AttemptFlags::AUTHTYPE_ENABLED | AttemptFlags::VALID_AUTH,
            reason: None,
        };
        let payload = serde_json::to_value(AttemptPayload::from(&report)).unwrap();
        assert_eq!(json!("alice"), payload["username"]);
        assert_eq!(json!("10.0.0.7"), payload["address"]);
        assert_eq!(json!("sharelink"), payload["mode"]);
        assert_eq!(json!(0x40a0), payload["flags"]);
        assert_eq!(json!(true), payload["valid_auth"]);
        assert_eq!(json!(true), payload["valid_username"]);
        assert!(!payload.to_string().contains("hunter22"));
    }

    #[test]
    fn user_payload_omits_missing_address() {
        let payload = serde_json::to_value(UserPayload::new("alice", None)).unwrap();
        assert_eq!(json!({"username": "alice"}), payload);
    }

    #[test]
    fn passwords_are_not_forwarded_by_default() {
        let err = collaborator().validate_password(&Secret::from("Correct1")).unwrap_err();
        assert_eq!(ErrorKind::Unavailable, err.kind());
    }

    #[test]
    fn invalid_configuration_is_refused() {
        let bad_regex = Builder::new().with_base_url("http://localhost".to_string()).with_regex("(".to_string());
        assert!(matches!(bad_regex.build(), Err(BuildError::Regex(_))));
        let bad_url = Builder::new().with_base_url("http://exa mple".to_string());
        assert!(matches!(bad_url.build(), Err(BuildError::Url(_))));
    }

    #[test]
    fn debug_lists_configuration() {
        let debug = format!("{:?}", collaborator());
        assert!(debug.contains("base_url: \"http://127.0.0.1:9/audit\""));
        assert!(debug.contains("^true$"));
    }
}
