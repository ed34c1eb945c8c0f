//! Blocking HTTP client for the Netatmo Energy API (read-only subset).
//!
//! - Blocking client using `ureq` (no async).
//! - Covers `homesdata`, `homestatus` and `getmeasure`.
//! - Every response is wrapped as `{ "body": ..., "status": ... }`; the `body`
//!   field is unwrapped before decoding the typed payload.
//!
//! Authentication
//! - OAuth2 against the Netatmo token endpoint, using either a password grant or
//!   a refresh token. Access tokens are refreshed automatically before expiry
//!   and once more on a 401/403.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

use crate::measure::{MEASURE_SCALE, MEASURE_TYPES};
use crate::models::netatmo::{HomeId, HomeStatus, HomesData, MeasureRecord, ModuleId};

pub const DEFAULT_BASE_URL: &str = "https://api.netatmo.com";
const OAUTH_TOKEN_PATH: &str = "/oauth2/token";
const API_PATH: &str = "/api";
const OAUTH_SCOPE: &str = "read_thermostat read_station";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("missing access token")]
    MissingAuth,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("json error: {0}")]
    Json(#[from] serde_path_to_error::Error<serde_json::Error>),
    #[error("response has no `body` field")]
    MissingBody,
    #[error("auth error: {0}")]
    Auth(String),
}

impl From<ureq::Error> for ClientError {
    fn from(value: ureq::Error) -> Self {
        ClientError::Transport(value.to_string())
    }
}

/// Read-only view of the vendor API used by the collection pipeline.
pub trait HomesApi {
    /// Static list of homes with their nested rooms and modules.
    fn homes_data(&self) -> Result<HomesData, ClientError>;

    /// Live status of one home.
    fn home_status(&self, home_id: &HomeId) -> Result<HomeStatus, ClientError>;

    /// Raw measurement records for one module.
    fn measure(&self, query: &MeasureQuery<'_>) -> Result<Vec<MeasureRecord>, ClientError>;
}

/// Parameters of one `getmeasure` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureQuery<'a> {
    /// Relay the module reports through, or the module itself for relays.
    pub device_id: &'a str,
    pub module_id: Option<&'a ModuleId>,
    pub date_begin: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Password { username: String, password: String },
    RefreshToken(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub credentials: Credentials,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
struct OAuthToken {
    access_token: String,
    expires_at: Instant,
    refresh_token: Option<String>,
}

#[derive(Debug)]
struct OAuthState {
    token: Option<OAuthToken>,
}

pub struct NetatmoClient {
    agent: ureq::Agent,
    config: ClientConfig,
    oauth: Mutex<OAuthState>,
}

impl NetatmoClient {
    /// Build a client and fetch the initial access token.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.request_timeout))
            .build();
        let agent = ureq::Agent::new_with_config(agent_config);

        let client = NetatmoClient {
            agent,
            config,
            oauth: Mutex::new(OAuthState { token: None }),
        };
        client.refresh_token()?;
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    fn api_url(&self, endpoint: &str) -> String {
        self.url(&format!("{}/{}", API_PATH, endpoint))
    }

    fn request_token(&self, refresh: Option<&str>) -> Result<OAuthToken, ClientError> {
        let cfg = &self.config;
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", cfg.client_id.as_str()),
            ("client_secret", cfg.client_secret.as_str()),
        ];
        let refresh = refresh.or(match &cfg.credentials {
            Credentials::RefreshToken(token) => Some(token.as_str()),
            Credentials::Password { .. } => None,
        });
        match (refresh, &cfg.credentials) {
            (Some(token), _) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", token));
            }
            (None, Credentials::RefreshToken(_)) => return Err(ClientError::MissingAuth),
            (None, Credentials::Password { username, password }) => {
                form.push(("grant_type", "password"));
                form.push(("scope", OAUTH_SCOPE));
                form.push(("username", username.as_str()));
                form.push(("password", password.as_str()));
            }
        }

        let mut resp = self
            .agent
            .post(self.url(OAUTH_TOKEN_PATH))
            .header("Accept", "application/json")
            .send_form(form)?;
        let status = resp.status();
        let text = resp.body_mut().read_to_string()?;
        if !status.is_success() {
            return Err(ClientError::Auth(format!("http {}: {}", status.as_u16(), vendor_error_message(&text))));
        }
        parse_token_response(&text)
    }

    /// Replace the current access token, preferring the refresh grant.
    fn refresh_token(&self) -> Result<(), ClientError> {
        let mut state = self.oauth.lock();
        let refresh = state.token.as_ref().and_then(|t| t.refresh_token.clone());
        let token = match (refresh.as_deref(), &self.config.credentials) {
            // A rejected refresh token is not fatal while the password grant is available.
            (Some(refresh), Credentials::Password { .. }) => match self.request_token(Some(refresh)) {
                Err(ClientError::Auth(e)) => {
                    warn!("Refresh token rejected ({}); falling back to password grant", e);
                    self.request_token(None)?
                }
                other => other?,
            },
            (refresh, _) => self.request_token(refresh)?,
        };
        debug!("Obtained Netatmo access token (expires in {}s)", token.expires_at.saturating_duration_since(Instant::now()).as_secs());
        state.token = Some(token);
        Ok(())
    }

    fn bearer(&self) -> Result<String, ClientError> {
        let needs_refresh = {
            let state = self.oauth.lock();
            state
                .token
                .as_ref()
                .is_none_or(|t| Instant::now() + TOKEN_EXPIRY_MARGIN >= t.expires_at)
        };
        if needs_refresh {
            self.refresh_token()?;
        }
        self.oauth
            .lock()
            .token
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(ClientError::MissingAuth)
    }

    fn send_get(&self, url: &str, query: &[(&str, String)], token: &str) -> Result<http::Response<ureq::Body>, ClientError> {
        let mut req = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", token));
        for (k, v) in query {
            req = req.query(k, v);
        }
        Ok(req.call()?)
    }

    fn get_body<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T, ClientError> {
        let url = self.api_url(endpoint);

        let token = self.bearer()?;
        let mut resp = self.send_get(&url, query, &token)?;

        // Retry once with a fresh token when the current one was rejected.
        if matches!(resp.status().as_u16(), 401 | 403) {
            debug!("{} rejected the access token; refreshing", endpoint);
            self.refresh_token()?;
            let token = self.bearer()?;
            resp = self.send_get(&url, query, &token)?;
        }

        let status = resp.status();
        let text = resp.body_mut().read_to_string()?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: vendor_error_message(&text),
            });
        }
        unwrap_body(&text)
    }
}

impl HomesApi for NetatmoClient {
    fn homes_data(&self) -> Result<HomesData, ClientError> {
        self.get_body("homesdata", &[])
    }

    fn home_status(&self, home_id: &HomeId) -> Result<HomeStatus, ClientError> {
        self.get_body("homestatus", &[("home_id", home_id.0.clone())])
    }

    fn measure(&self, query: &MeasureQuery<'_>) -> Result<Vec<MeasureRecord>, ClientError> {
        let mut q = vec![("device_id", query.device_id.to_string())];
        if let Some(module_id) = query.module_id {
            q.push(("module_id", module_id.0.clone()));
        }
        q.push(("type", MEASURE_TYPES.to_string()));
        q.push(("scale", MEASURE_SCALE.to_string()));
        q.push(("real_time", "true".to_string()));
        q.push(("date_begin", query.date_begin.timestamp().to_string()));
        q.push(("date_end", query.date_end.timestamp().to_string()));
        self.get_body("getmeasure", &q)
    }
}

/// Decode the `body` field of a vendor response envelope.
pub fn unwrap_body<T: DeserializeOwned>(text: &str) -> Result<T, ClientError> {
    let de = &mut serde_json::Deserializer::from_str(text);
    let mut envelope: Map<String, Value> = serde_path_to_error::deserialize(de)?;
    let body = envelope.remove("body").ok_or(ClientError::MissingBody)?;
    Ok(serde_path_to_error::deserialize(body)?)
}

fn parse_token_response(text: &str) -> Result<OAuthToken, ClientError> {
    #[derive(serde::Deserialize)]
    struct R {
        access_token: String,
        expires_in: u64,
        #[serde(default)]
        refresh_token: Option<String>,
    }

    let de = &mut serde_json::Deserializer::from_str(text);
    let R {
        access_token,
        expires_in,
        refresh_token,
    } = serde_path_to_error::deserialize(de)?;
    let now = Instant::now();
    let lifetime = Duration::from_secs(expires_in).min(MAX_TOKEN_LIFETIME);
    Ok(OAuthToken {
        access_token,
        expires_at: now.checked_add(lifetime).unwrap_or(now),
        refresh_token,
    })
}

/// Best-effort extraction of `error.message` (API) or `error` (OAuth) from an error body.
fn vendor_error_message(text: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return if text.is_empty() { String::from("<no body>") } else { text.to_string() };
    };
    match value.get("error") {
        Some(Value::Object(err)) => match err.get("message").and_then(Value::as_str) {
            Some(msg) => msg.to_string(),
            None => Value::Object(err.clone()).to_string(),
        },
        Some(Value::String(err)) => err.clone(),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server};

    const TOKEN_BODY: &str = r#"{"access_token":"access-1","refresh_token":"refresh-1","expires_in":10800,"scope":["read_thermostat"]}"#;

    fn config(base_url: String) -> ClientConfig {
        ClientConfig {
            base_url,
            client_id: "cid".into(),
            client_secret: "secret".into(),
            credentials: Credentials::Password {
                username: "user@example.com".into(),
                password: "hunter2".into(),
            },
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn unwraps_body_envelope() {
        let data: HomesData = unwrap_body(r#"{"body":{"homes":[{"id":"H1","name":"Home"}]},"status":"ok"}"#).expect("unwrap");
        assert_eq!(data.homes.len(), 1);
        assert_eq!(data.homes[0].id, HomeId("H1".into()));
    }

    #[test]
    fn missing_body_is_an_error() {
        let result: Result<HomesData, _> = unwrap_body(r#"{"status":"ok"}"#);
        assert!(matches!(result, Err(ClientError::MissingBody)));
    }

    #[test]
    fn json_errors_carry_the_field_path() {
        let result: Result<HomesData, _> = unwrap_body(r#"{"body":{"homes":[{"id":"H1","altitude":"high"}]}}"#);
        match result {
            Err(ClientError::Json(e)) => assert_eq!(e.path().to_string(), "homes[0].altitude"),
            other => panic!("expected json error, got {:?}", other),
        }
    }

    #[test]
    fn extracts_vendor_error_messages() {
        assert_eq!(
            vendor_error_message(r#"{"error":{"code":2,"message":"Invalid access_token"}}"#),
            "Invalid access_token"
        );
        assert_eq!(vendor_error_message(r#"{"error":"invalid_grant"}"#), "invalid_grant");
        assert_eq!(vendor_error_message(""), "<no body>");
        assert_eq!(vendor_error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn password_grant_then_homesdata() {
        let mut server = Server::new();
        let token = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("username".into(), "user@example.com".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TOKEN_BODY)
            .create();
        let homes = server
            .mock("GET", "/api/homesdata")
            .match_header("authorization", "Bearer access-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(std::fs::read_to_string("tests/data/homesdata.json").expect("fixture present"))
            .create();

        let client = NetatmoClient::new(config(server.url())).expect("client");
        let data = client.homes_data().expect("homesdata");

        assert_eq!(data.homes.len(), 1);
        assert_eq!(data.homes[0].name, "Maison");
        assert_eq!(data.homes[0].modules.len(), 2);
        token.assert();
        homes.assert();
    }

    #[test]
    fn getmeasure_sends_window_and_module_parameters() {
        let mut server = Server::new();
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(TOKEN_BODY)
            .create();
        let measure = server
            .mock("GET", "/api/getmeasure")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("device_id".into(), "70:ee:50:aa:bb:cc".into()),
                Matcher::UrlEncoded("module_id".into(), "04:00:00:aa:bb:01".into()),
                Matcher::UrlEncoded("type".into(), MEASURE_TYPES.into()),
                Matcher::UrlEncoded("scale".into(), "5min".into()),
                Matcher::UrlEncoded("real_time".into(), "true".into()),
                Matcher::UrlEncoded("date_begin".into(), "1700000000".into()),
                Matcher::UrlEncoded("date_end".into(), "1700003600".into()),
            ]))
            .with_status(200)
            .with_body(std::fs::read_to_string("tests/data/getmeasure.json").expect("fixture present"))
            .create();

        let client = NetatmoClient::new(config(server.url())).expect("client");
        let module_id = ModuleId("04:00:00:aa:bb:01".into());
        let records = client
            .measure(&MeasureQuery {
                device_id: "70:ee:50:aa:bb:cc",
                module_id: Some(&module_id),
                date_begin: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                date_end: Utc.timestamp_opt(1_700_003_600, 0).unwrap(),
            })
            .expect("measure");

        assert_eq!(records.len(), 2);
        measure.assert();
    }

    #[test]
    fn rejected_token_is_refreshed_once() {
        let mut server = Server::new();
        server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_body(TOKEN_BODY)
            .create();
        let refresh = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"access-2","refresh_token":"refresh-2","expires_in":10800}"#)
            .create();
        server
            .mock("GET", "/api/homestatus")
            .match_query(Matcher::UrlEncoded("home_id".into(), "H1".into()))
            .match_header("authorization", "Bearer access-1")
            .with_status(403)
            .with_body(r#"{"error":{"code":3,"message":"Access token expired"}}"#)
            .create();
        let status = server
            .mock("GET", "/api/homestatus")
            .match_query(Matcher::UrlEncoded("home_id".into(), "H1".into()))
            .match_header("authorization", "Bearer access-2")
            .with_status(200)
            .with_body(std::fs::read_to_string("tests/data/homestatus.json").expect("fixture present"))
            .create();

        let client = NetatmoClient::new(config(server.url())).expect("client");
        let home = client.home_status(&HomeId("H1".into())).expect("homestatus").home;

        assert_eq!(home.modules.len(), 2);
        refresh.assert();
        status.assert();
    }

    #[test]
    fn http_errors_surface_vendor_message() {
        let mut server = Server::new();
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(TOKEN_BODY)
            .create();
        server
            .mock("GET", "/api/homesdata")
            .with_status(500)
            .with_body(r#"{"error":{"code":1,"message":"Internal error"}}"#)
            .create();

        let client = NetatmoClient::new(config(server.url())).expect("client");
        match client.homes_data() {
            Err(ClientError::Http { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal error");
            }
            other => panic!("expected http error, got {:?}", other),
        }
    }

    #[test]
    fn failed_token_request_is_an_auth_error() {
        let mut server = Server::new();
        server
            .mock("POST", "/oauth2/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create();

        let result = NetatmoClient::new(config(server.url()));
        assert!(matches!(result, Err(ClientError::Auth(msg)) if msg.contains("invalid_grant")));
    }

    #[test]
    fn token_lifetime_is_bounded() {
        let before = Instant::now();
        let token = parse_token_response(&format!(r#"{{"access_token":"a","expires_in":{}}}"#, u64::MAX)).expect("token");
        assert!(token.expires_at <= Instant::now() + MAX_TOKEN_LIFETIME);
        assert!(token.expires_at >= before + MAX_TOKEN_LIFETIME);
        assert_eq!(token.refresh_token, None);
    }

    #[test]
    fn rejected_refresh_token_falls_back_to_password_grant() {
        let mut server = Server::new();
        // Expires immediately, so the next call has to refresh.
        let password = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"access-1","refresh_token":"refresh-1","expires_in":0}"#)
            .expect(2)
            .create();
        let refresh = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .expect(1)
            .create();
        let homes = server
            .mock("GET", "/api/homesdata")
            .match_header("authorization", "Bearer access-1")
            .with_status(200)
            .with_body(r#"{"body":{"homes":[]},"status":"ok"}"#)
            .create();

        let client = NetatmoClient::new(config(server.url())).expect("client");
        let data = client.homes_data().expect("homesdata");

        assert!(data.homes.is_empty());
        password.assert();
        refresh.assert();
        homes.assert();
    }
}
