//! CGI (HTTP) protocol variant
//!
//! Imaging inquiry/command CGI endpoints with HTTP digest authentication
//! (RFC 2617, MD5, qop=auth). The auth header is built by hand against the
//! camera's 401 challenge; the challenge is cached and the nonce count
//! incremented across requests on the pooled connection.

use super::types::{CommandOutcome, CommandResult};
use super::CameraProtocol;
use crate::config_store::{CameraEndpoint, CgiConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Cached digest challenge from the camera's WWW-Authenticate header
#[derive(Debug, Clone)]
struct DigestChallenge {
    realm: String,
    nonce: String,
    qop_auth: bool,
    opaque: Option<String>,
}

/// CGI protocol instance for one camera
pub struct CgiProtocol {
    host: String,
    username: String,
    password: String,
    config: CgiConfig,
    client: Client,
    connected: AtomicBool,
    challenge: RwLock<Option<DigestChallenge>>,
    nonce_count: AtomicU32,
}

impl CgiProtocol {
    /// Create a CGI protocol instance for one camera endpoint
    pub fn new(endpoint: &CameraEndpoint, config: CgiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(config.pool_size)
            .build()
            .unwrap_or_default();

        Self {
            host: endpoint.host(),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            config,
            client,
            connected: AtomicBool::new(false),
            challenge: RwLock::new(None),
            nonce_count: AtomicU32::new(0),
        }
    }

    fn inquiry_url(&self) -> String {
        format!("http://{}/command/inquiry.cgi?inqjs=imaging", self.host)
    }

    fn imaging_url(&self, query: &str) -> String {
        format!("http://{}/command/imaging.cgi?{}", self.host, query)
    }

    /// Send one request, answering a digest challenge when the camera
    /// issues or refreshes one. Returns status and body text.
    async fn execute(
        &self,
        method: Method,
        url: &str,
    ) -> std::result::Result<(StatusCode, String), reqwest::Error> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(challenge) = self.challenge.read().await.clone() {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                self.authorization(&method, url, &challenge),
            );
        }

        let response = request.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Ok((status, body));
        }

        // Challenge (or stale nonce): parse, cache, retry once with auth
        let challenge = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_challenge);

        let Some(challenge) = challenge else {
            return Ok((StatusCode::UNAUTHORIZED, String::new()));
        };

        self.nonce_count.store(0, Ordering::SeqCst);
        *self.challenge.write().await = Some(challenge.clone());

        let response = self
            .client
            .request(method.clone(), url)
            .header(
                reqwest::header::AUTHORIZATION,
                self.authorization(&method, url, &challenge),
            )
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Build the Authorization header for the cached challenge
    fn authorization(&self, method: &Method, url: &str, challenge: &DigestChallenge) -> String {
        let uri = request_uri(url);
        let nc = self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1;
        let cnonce = format!("{:08x}{:08x}", rand::random::<u32>(), rand::random::<u32>());

        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            self.username, challenge.realm, self.password
        ));
        let ha2 = md5_hex(&format!("{}:{}", method.as_str(), uri));

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm=MD5",
            self.username, challenge.realm, challenge.nonce, uri
        );

        if challenge.qop_auth {
            let response = md5_hex(&format!(
                "{}:{}:{:08x}:{}:auth:{}",
                ha1, challenge.nonce, nc, cnonce, ha2
            ));
            header.push_str(&format!(
                ", qop=auth, nc={:08x}, cnonce=\"{}\", response=\"{}\"",
                nc, cnonce, response
            ));
        } else {
            let response = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2));
            header.push_str(&format!(", response=\"{}\"", response));
        }

        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        header
    }

    /// Run the retry loop for one imaging request. Transient failures
    /// (network faults, 5xx) are retried at `retry_delay_ms` spacing;
    /// a definitive refusal surfaces immediately.
    async fn request_with_retries(
        &self,
        method: Method,
        url: &str,
    ) -> std::result::Result<String, CommandOutcome> {
        let mut last_failure = CommandOutcome::Error;

        for attempt in 1..=self.config.max_attempts {
            match self.execute(method.clone(), url).await {
                Ok((status, body)) if status.is_success() => return Ok(body),
                Ok((StatusCode::BAD_REQUEST, _)) => return Err(CommandOutcome::Rejected),
                Ok((StatusCode::UNAUTHORIZED, _)) => {
                    tracing::warn!(host = %self.host, "CGI digest authentication refused");
                    return Err(CommandOutcome::Error);
                }
                Ok((status, _)) => {
                    tracing::debug!(
                        host = %self.host,
                        status = %status,
                        attempt = attempt,
                        "CGI request failed, will retry"
                    );
                    last_failure = CommandOutcome::Error;
                }
                Err(e) if e.is_timeout() => {
                    tracing::debug!(host = %self.host, attempt = attempt, "CGI request timed out");
                    last_failure = CommandOutcome::Timeout;
                }
                Err(e) => {
                    tracing::debug!(host = %self.host, attempt = attempt, error = %e, "CGI transport error");
                    last_failure = CommandOutcome::Error;
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(last_failure)
    }
}

#[async_trait]
impl CameraProtocol for CgiProtocol {
    async fn connect(&self) -> Result<()> {
        // CGI keeps no persistent session; the pool handles connections
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.challenge.write().await = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_parameter(&self, name: &str) -> CommandResult {
        match self.request_with_retries(Method::GET, &self.inquiry_url()).await {
            Ok(body) => match parse_imaging_value(&body, name) {
                Some(value) => CommandResult::read(name, value),
                None => {
                    tracing::warn!(host = %self.host, parameter = %name, "parameter missing from inquiry");
                    CommandResult::failed(name, None, CommandOutcome::Rejected)
                }
            },
            Err(outcome) => CommandResult::failed(name, None, outcome),
        }
    }

    async fn set_parameter(&self, name: &str, value: i64) -> CommandResult {
        let url = self.imaging_url(&format!("{}={}", name, value));
        match self.request_with_retries(Method::POST, &url).await {
            Ok(_) => CommandResult::applied(name, value),
            Err(outcome) => CommandResult::failed(name, Some(value), outcome),
        }
    }

    async fn apply_preset(&self, pairs: &[(String, String)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let url = self.imaging_url(&query);
        self.request_with_retries(Method::POST, &url)
            .await
            .map(|_| ())
            .map_err(|outcome| match outcome {
                CommandOutcome::Timeout => Error::Timeout(format!("preset push to {}", self.host)),
                _ => Error::Connection(format!("preset push to {} failed", self.host)),
            })
    }
}

/// Pull one value out of the inquiry response.
///
/// The camera answers with a JavaScript fragment, one assignment per line:
/// `var ExposureIris="11";`
fn parse_imaging_value(body: &str, name: &str) -> Option<i64> {
    for line in body.lines() {
        if !line.contains("var ") || !line.contains('=') {
            continue;
        }
        let (lhs, rhs) = line.split_once('=')?;
        let param = lhs.replace("var ", "").replace('"', "");
        if param.trim() != name {
            continue;
        }
        let value = rhs.replace('"', "").replace(';', "");
        return value.trim().parse::<i64>().ok();
    }
    None
}

fn request_uri(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Parse a `WWW-Authenticate: Digest ...` challenge header
fn parse_challenge(header: &str) -> Option<DigestChallenge> {
    let rest = header.trim().strip_prefix("Digest ")?;

    let mut realm = None;
    let mut nonce = None;
    let mut qop_auth = false;
    let mut opaque = None;

    for part in rest.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        match key {
            "realm" => realm = Some(value.to_string()),
            "nonce" => nonce = Some(value.to_string()),
            "qop" => qop_auth = value.split(',').any(|q| q.trim() == "auth"),
            "opaque" => opaque = Some(value.to_string()),
            _ => {}
        }
    }

    Some(DigestChallenge {
        realm: realm?,
        nonce: nonce?,
        qop_auth,
        opaque,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_imaging_value() {
        let body = "var ExposureMode=\"manual\";\nvar ExposureIris=\"11\";\nvar ExposureGain=\"3\";";
        assert_eq!(parse_imaging_value(body, "ExposureIris"), Some(11));
        assert_eq!(parse_imaging_value(body, "ExposureGain"), Some(3));
        assert_eq!(parse_imaging_value(body, "ExposureMode"), None); // non-numeric
        assert_eq!(parse_imaging_value(body, "ColorSaturation"), None);
    }

    #[test]
    fn test_parse_challenge() {
        let header =
            "Digest realm=\"camera\", nonce=\"abc123\", qop=\"auth\", opaque=\"xyz\"";
        let challenge = parse_challenge(header).expect("challenge");
        assert_eq!(challenge.realm, "camera");
        assert_eq!(challenge.nonce, "abc123");
        assert!(challenge.qop_auth);
        assert_eq!(challenge.opaque.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_parse_challenge_without_qop() {
        let header = "Digest realm=\"camera\", nonce=\"abc123\"";
        let challenge = parse_challenge(header).expect("challenge");
        assert!(!challenge.qop_auth);
        assert!(challenge.opaque.is_none());
    }

    #[test]
    fn test_request_uri_keeps_query() {
        assert_eq!(
            request_uri("http://192.168.69.51/command/imaging.cgi?ExposureIris=11"),
            "/command/imaging.cgi?ExposureIris=11"
        );
    }
}
