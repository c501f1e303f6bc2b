//! Blocking client for the Easee cloud REST API.

use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::credential_store::{
    Authenticator, Credential, CredentialError, CredentialStore, LoginError,
};
use crate::models::{
    ChargerCommand, ChargerConfig, ChargerState, LoginRequest, LoginResponse, Session, Setting,
};

pub const DEFAULT_API_BASE: &str = "https://api.easee.cloud/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the vendor answered a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClass {
    Accepted,
    /// Payload or authorization problem; retrying unchanged will not help.
    ClientError,
    /// Transient problem on the vendor side.
    ServerError,
    Unknown,
}

impl ResponseClass {
    pub fn of(status: u16) -> Self {
        match status {
            200 | 202 => ResponseClass::Accepted,
            400 | 401 | 403 | 415 => ResponseClass::ClientError,
            500 | 503 | 504 => ResponseClass::ServerError,
            _ => ResponseClass::Unknown,
        }
    }
}

/// Human readable explanation of a vendor status code.
pub fn status_reason(status: u16) -> &'static str {
    match status {
        200 | 202 => "Command successfully sent to charger",
        400 => "Command has missing/invalid values",
        401 => "Missing authorization data. Check 'Authorization' header",
        403 => "Forbidden. Authorization set, but access to resource is denied",
        415 => "Payload format is in an unsupported format",
        500 => "Unexpected internal error on the vendor side",
        503 => "Server gateway cannot reach API. Try again in about a minute...",
        504 => "Unable to deliver commands upstream. End device is not reachable, or a problem with queueing the device command",
        _ => "Unknown response code",
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("client error {status}: {reason}")]
    ClientError { status: u16, reason: &'static str },
    #[error("server error {status}: {reason}")]
    ServerError { status: u16, reason: &'static str },
    #[error("Unknown response code: {status}")]
    Unknown { status: u16 },
    #[error("malformed response body (status {status}): {source}")]
    MalformedResponse {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl ApiError {
    /// Maps a status that is not [`ResponseClass::Accepted`] to its error.
    pub fn from_status(status: u16) -> Self {
        let reason = status_reason(status);
        match ResponseClass::of(status) {
            ResponseClass::ClientError => ApiError::ClientError { status, reason },
            ResponseClass::ServerError => ApiError::ServerError { status, reason },
            ResponseClass::Accepted | ResponseClass::Unknown => ApiError::Unknown { status },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::ClientError { status, .. }
            | ApiError::ServerError { status, .. }
            | ApiError::Unknown { status }
            | ApiError::MalformedResponse { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Credential(_) => None,
        }
    }
}

/// A setter call the vendor accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accepted {
    pub status: u16,
}

/// The vendor operations the bridge uses.
pub trait ChargerApi: Send + Sync {
    fn get_state(&self, charger_id: &str) -> Result<ChargerState, ApiError>;

    fn get_config(&self, charger_id: &str) -> Result<ChargerConfig, ApiError>;

    fn get_latest_session(&self, charger_id: &str) -> Result<Session, ApiError>;

    fn set_setting(&self, charger_id: &str, setting: &Setting) -> Result<Accepted, ApiError>;

    fn send_command(&self, charger_id: &str, command: &ChargerCommand)
        -> Result<Accepted, ApiError>;
}

pub struct EaseeAuthenticator {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl EaseeAuthenticator {
    pub fn new(http: Client, base_url: &str, username: &str, password: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl Authenticator for EaseeAuthenticator {
    fn login(&self) -> Result<LoginResponse, LoginError> {
        let url = format!("{}/accounts/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&LoginRequest {
                user_name: &self.username,
                password: &self.password,
            })
            .send()?;
        let status = response.status().as_u16();
        debug!("Response from login: {status}");
        if status != 200 {
            return Err(LoginError::Rejected {
                status,
                reason: status_reason(status),
            });
        }
        let body = response.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

pub struct ChargerClient<A: Authenticator = EaseeAuthenticator> {
    http: Client,
    base_url: String,
    credentials: CredentialStore<A>,
}

impl ChargerClient<EaseeAuthenticator> {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        let authenticator = EaseeAuthenticator::new(http.clone(), base_url, username, password);
        Ok(Self::with_credentials(
            http,
            base_url,
            CredentialStore::new(authenticator),
        ))
    }
}

impl<A: Authenticator> ChargerClient<A> {
    pub fn with_credentials(http: Client, base_url: &str, credentials: CredentialStore<A>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialStore<A> {
        &self.credentials
    }

    fn url(&self, charger_id: &str, path: &str) -> String {
        format!("{}/chargers/{}/{}", self.base_url, charger_id, path)
    }

    fn send(&self, request: RequestBuilder) -> Result<(u16, Response), ApiError> {
        let credential = self.credentials.ensure_valid()?;
        let response = request
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", credential.token()))
            .send()?;
        let status = response.status().as_u16();
        self.check_status(status, &credential)?;
        Ok((status, response))
    }

    fn check_status(&self, status: u16, credential: &Credential) -> Result<(), ApiError> {
        if ResponseClass::of(status) == ResponseClass::Accepted {
            return Ok(());
        }
        if status == 401 {
            self.credentials.invalidate(credential);
        }
        Err(ApiError::from_status(status))
    }

    fn get<T: DeserializeOwned>(&self, charger_id: &str, path: &str) -> Result<T, ApiError> {
        let url = self.url(charger_id, path);
        debug!("GET {url}");
        let (status, response) = self.send(self.http.get(&url))?;
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|source| ApiError::MalformedResponse { status, source })
    }

    fn post(&self, url: &str, body: &serde_json::Value) -> Result<Accepted, ApiError> {
        debug!("POST {url} {body}");
        let (status, response) = self.send(self.http.post(url).json(body))?;
        // some commands answer with an empty body, anything else has to be json
        let body = response.text()?;
        if !body.trim().is_empty() {
            serde_json::from_str::<serde_json::Value>(&body)
                .map_err(|source| ApiError::MalformedResponse { status, source })?;
        }
        Ok(Accepted { status })
    }
}

impl<A: Authenticator> ChargerApi for ChargerClient<A> {
    fn get_state(&self, charger_id: &str) -> Result<ChargerState, ApiError> {
        self.get(charger_id, "state")
    }

    fn get_config(&self, charger_id: &str) -> Result<ChargerConfig, ApiError> {
        self.get(charger_id, "config")
    }

    fn get_latest_session(&self, charger_id: &str) -> Result<Session, ApiError> {
        self.get(charger_id, "sessions/latest")
    }

    fn set_setting(&self, charger_id: &str, setting: &Setting) -> Result<Accepted, ApiError> {
        let url = self.url(charger_id, "settings");
        self.post(&url, &setting.to_json())
    }

    fn send_command(
        &self,
        charger_id: &str,
        command: &ChargerCommand,
    ) -> Result<Accepted, ApiError> {
        let url = self.url(charger_id, &format!("commands/{}", command.name()));
        self.post(&url, &command.to_json())
    }
}

/// Logs the outcome of a call in the vendor's terms.
pub fn log_outcome(operation: &str, charger_id: &str, result: &Result<Accepted, ApiError>) {
    match result {
        Ok(accepted) => debug!(
            "{operation} on {charger_id}: {} - {}",
            accepted.status,
            status_reason(accepted.status)
        ),
        Err(e) => warn!("{operation} on {charger_id} failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// What the fake vendor saw of one request.
    struct Exchange {
        request_line: String,
        authorization: Option<String>,
        body: String,
    }

    /// Answers one connection per entry of `responses`, in order.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<Vec<Exchange>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());
        let server = thread::spawn(move || {
            responses
                .into_iter()
                .map(|(status, body)| {
                    let (stream, _) = listener.accept().unwrap();
                    answer(stream, status, body)
                })
                .collect()
        });
        (base_url, server)
    }

    fn answer(mut stream: TcpStream, status: u16, body: &str) -> Exchange {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        let mut authorization = None;
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim().to_string();
                match name.to_ascii_lowercase().as_str() {
                    "authorization" => authorization = Some(value),
                    "content-length" => content_length = value.parse().unwrap(),
                    _ => {}
                }
            }
        }
        let mut request_body = vec![0; content_length];
        reader.read_exact(&mut request_body).unwrap();

        write!(
            stream,
            "HTTP/1.1 {status} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .unwrap();
        stream.flush().unwrap();

        Exchange {
            request_line: request_line.trim_end().to_string(),
            authorization,
            body: String::from_utf8(request_body).unwrap(),
        }
    }

    const LOGIN_1: &str = r#"{"accessToken":"tok1","expiresIn":86400}"#;
    const LOGIN_2: &str = r#"{"accessToken":"tok2","expiresIn":86400}"#;

    #[test]
    fn reads_with_bearer_token_and_logs_in_again_after_401() {
        let (base_url, server) = serve(vec![
            (200, LOGIN_1),
            (200, "not json"),
            (401, ""),
            (200, LOGIN_2),
            (200, r#"{"isEnabled":true,"maxChargerCurrent":32.0}"#),
        ]);
        let client =
            ChargerClient::new(&base_url, "user", "password", Duration::from_secs(5)).unwrap();

        let err = client.get_config("EH1").unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse { status: 200, .. }));
        let err = client.get_config("EH1").unwrap_err();
        assert!(matches!(err, ApiError::ClientError { status: 401, .. }));
        let config = client.get_config("EH1").unwrap();
        assert!(config.is_enabled);
        assert_eq!(config.max_charger_current, Some(32.0));

        let exchanges = server.join().unwrap();
        let request_lines: Vec<&str> = exchanges
            .iter()
            .map(|exchange| exchange.request_line.as_str())
            .collect();
        assert_eq!(
            request_lines,
            vec![
                "POST /api/accounts/login HTTP/1.1",
                "GET /api/chargers/EH1/config HTTP/1.1",
                "GET /api/chargers/EH1/config HTTP/1.1",
                "POST /api/accounts/login HTTP/1.1",
                "GET /api/chargers/EH1/config HTTP/1.1",
            ]
        );
        let authorizations: Vec<Option<&str>> = exchanges
            .iter()
            .map(|exchange| exchange.authorization.as_deref())
            .collect();
        assert_eq!(
            authorizations,
            vec![
                None,
                Some("Bearer tok1"),
                Some("Bearer tok1"),
                None,
                Some("Bearer tok2"),
            ]
        );
        let login: serde_json::Value = serde_json::from_str(&exchanges[0].body).unwrap();
        assert_eq!(login["userName"], "user");
    }

    #[test]
    fn setters_accept_empty_bodies_but_not_garbage() {
        let (base_url, server) = serve(vec![
            (200, LOGIN_1),
            (202, ""),
            (200, "<html>"),
            (503, ""),
        ]);
        let client =
            ChargerClient::new(&base_url, "user", "password", Duration::from_secs(5)).unwrap();

        let setting = Setting::Enabled(false);
        assert_eq!(
            client.set_setting("EH1", &setting).unwrap(),
            Accepted { status: 202 }
        );
        let lock = ChargerCommand::LockState("true".into());
        let err = client.send_command("EH1", &lock).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse { status: 200, .. }));
        let err = client.set_setting("EH1", &setting).unwrap_err();
        assert!(matches!(err, ApiError::ServerError { status: 503, .. }));

        let exchanges = server.join().unwrap();
        assert_eq!(
            exchanges[1].request_line,
            "POST /api/chargers/EH1/settings HTTP/1.1"
        );
        let body: serde_json::Value = serde_json::from_str(&exchanges[1].body).unwrap();
        assert_eq!(body, setting.to_json());
        assert_eq!(
            exchanges[2].request_line,
            "POST /api/chargers/EH1/commands/lock_state HTTP/1.1"
        );
        // a 503 does not touch the credential
        assert_eq!(exchanges[3].authorization.as_deref(), Some("Bearer tok1"));
    }

    #[test]
    fn classifies_vendor_status_codes() {
        for status in [200, 202] {
            assert_eq!(ResponseClass::of(status), ResponseClass::Accepted);
        }
        for status in [400, 401, 403, 415] {
            assert_eq!(ResponseClass::of(status), ResponseClass::ClientError);
            assert!(matches!(
                ApiError::from_status(status),
                ApiError::ClientError { .. }
            ));
        }
        for status in [500, 503, 504] {
            assert_eq!(ResponseClass::of(status), ResponseClass::ServerError);
            assert!(matches!(
                ApiError::from_status(status),
                ApiError::ServerError { .. }
            ));
        }
        for status in [201, 204, 404, 429, 502] {
            assert_eq!(ResponseClass::of(status), ResponseClass::Unknown);
            assert!(matches!(
                ApiError::from_status(status),
                ApiError::Unknown { .. }
            ));
        }
    }

    #[test]
    fn errors_carry_code_and_reason() {
        let e = ApiError::from_status(503);
        assert_eq!(e.status(), Some(503));
        assert_eq!(
            e.to_string(),
            "server error 503: Server gateway cannot reach API. Try again in about a minute..."
        );
        assert_eq!(
            ApiError::from_status(418).to_string(),
            "Unknown response code: 418"
        );
    }

    #[test]
    fn trailing_slash_in_base_url_is_ignored() {
        let client = ChargerClient::new(
            "http://localhost:1/api/",
            "user",
            "password",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.url("EH1", "sessions/latest"),
            "http://localhost:1/api/chargers/EH1/sessions/latest"
        );
    }
}
