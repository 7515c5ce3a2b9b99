//! HTTP client for the Connect Box web management interface.
//!
//! The modem speaks a form-POST protocol against two endpoints:
//! `xml/getter.xml` for status documents and `xml/setter.xml` for actions
//! such as login/logout. Every request must carry the current `sessionToken`
//! cookie both as a cookie and as a `token` form field, and the firmware
//! rotates the token on every response.
//!
//! The device admits a single web session. [`DeviceClient`] therefore opens
//! one session per scrape, logs out on every exit path, and serializes
//! concurrent scrapes behind an async mutex.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{COOKIE, SET_COOKIE};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::MetricGroup;
use crate::snapshot::{self, DeviceSnapshot};

/// Per-scrape failure, observed by the orchestrator as a two-way signal plus
/// a diagnostic message for the log.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

/// `getter.xml` function codes understood by the CH7465LG firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GetterFunction {
    GlobalSettings = 1,
    CmSystemInfo = 2,
    DownstreamTable = 10,
    UpstreamTable = 11,
    SignalTable = 12,
    CmStatus = 121,
    LanUserTable = 123,
    CmState = 136,
}

/// `setter.xml` function codes used by this exporter.
const SETTER_LOGIN: u32 = 15;
const SETTER_LOGOUT: u32 = 16;

/// The web interface has a single fixed account.
const USERNAME: &str = "admin";

/// Client for one modem. Stateless between scrapes apart from the session
/// gate; each call to [`fetch_snapshot`](Self::fetch_snapshot) runs a full
/// login / query / logout cycle.
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    password: String,
    /// At most one authenticated session against the device at a time.
    /// Concurrent scrapes queue here rather than fail.
    session_gate: Mutex<()>,
}

impl DeviceClient {
    /// Build a client for the device at `ip_address` (an `ip:port` pair is
    /// also accepted). `timeout` bounds every individual HTTP call.
    pub fn new(ip_address: &str, password: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            base_url: format!("http://{ip_address}"),
            password: password.to_string(),
            session_gate: Mutex::new(()),
        })
    }

    /// Run one full query cycle and return the decoded snapshot.
    ///
    /// Opens an authenticated session, fetches the documents needed for the
    /// selected metric groups, and logs out again on both the success and the
    /// failure path. No retries; the next scrape starts from scratch.
    pub async fn fetch_snapshot(
        &self,
        groups: &BTreeSet<MetricGroup>,
    ) -> Result<DeviceSnapshot, ClientError> {
        let _guard = self.session_gate.lock().await;

        debug!(url = %self.base_url, "Logging in");
        let mut session = Session::login(&self.http, &self.base_url, &self.password).await?;

        let result = collect(&mut session, groups).await;

        debug!(url = %self.base_url, "Logging out");
        if let Err(e) = session.logout().await {
            warn!(url = %self.base_url, error = %e, "Logout failed");
        }

        result
    }
}

/// Query the documents for each selected metric group within one session.
async fn collect(
    session: &mut Session<'_>,
    groups: &BTreeSet<MetricGroup>,
) -> Result<DeviceSnapshot, ClientError> {
    let mut snap = DeviceSnapshot::default();

    if groups.contains(&MetricGroup::DeviceStatus) {
        let global = session.xml_getter(GetterFunction::GlobalSettings).await?;
        let sysinfo = session.xml_getter(GetterFunction::CmSystemInfo).await?;
        let status = session.xml_getter(GetterFunction::CmStatus).await?;
        snap.device_info = Some(snapshot::parse_device_info(&global, &sysinfo, &status)?);
    }

    if groups.contains(&MetricGroup::Temperature) {
        let state = session.xml_getter(GetterFunction::CmState).await?;
        snap.temperature = Some(snapshot::parse_temperature(&state)?);
    }

    if groups.contains(&MetricGroup::Downstream) {
        let table = session.xml_getter(GetterFunction::DownstreamTable).await?;
        let signals = session.xml_getter(GetterFunction::SignalTable).await?;
        snap.downstream = snapshot::parse_downstream(&table, &signals)?;
    }

    if groups.contains(&MetricGroup::Upstream) {
        let table = session.xml_getter(GetterFunction::UpstreamTable).await?;
        snap.upstream = snapshot::parse_upstream(&table)?;
    }

    if groups.contains(&MetricGroup::LanUsers) {
        // Connected-client enumeration is not reliable across firmware
        // versions; a failure here drops the section, not the scrape.
        let clients = match session.xml_getter(GetterFunction::LanUserTable).await {
            Ok(xml) => snapshot::parse_lan_clients(&xml),
            Err(e) => Err(e),
        };
        match clients {
            Ok(clients) => snap.lan_clients = Some(clients),
            Err(e) => warn!(error = %e, "Skipping connected-client table"),
        }
    }

    Ok(snap)
}

/// One authenticated web session. Tracks the cookie jar by hand because the
/// rotating `sessionToken` has to be echoed back as a form field.
struct Session<'a> {
    http: &'a reqwest::Client,
    base_url: &'a str,
    cookies: HashMap<String, String>,
}

impl<'a> Session<'a> {
    /// Fetch the initial session token and authenticate.
    async fn login(
        http: &'a reqwest::Client,
        base_url: &'a str,
        password: &str,
    ) -> Result<Session<'a>, ClientError> {
        let mut session = Session {
            http,
            base_url,
            cookies: HashMap::new(),
        };

        // The landing page hands out the first sessionToken cookie.
        let response = http.get(format!("{base_url}/")).send().await?;
        session.absorb_cookies(response.headers());
        if session.token().is_none() {
            return Err(ClientError::Protocol(
                "device did not hand out a session token".to_string(),
            ));
        }

        let body = session
            .post_form(
                "xml/setter.xml",
                &[
                    ("token", session.token().unwrap_or_default().to_string()),
                    ("fun", SETTER_LOGIN.to_string()),
                    ("Username", USERNAME.to_string()),
                    ("Password", password.to_string()),
                ],
            )
            .await?;

        match parse_login_response(&body) {
            Some(sid) => {
                session.cookies.insert("SID".to_string(), sid);
                Ok(session)
            }
            None => Err(ClientError::Auth(format!(
                "login rejected: {}",
                truncate(body.trim(), 64)
            ))),
        }
    }

    /// Fetch one raw status document.
    async fn xml_getter(&mut self, fun: GetterFunction) -> Result<String, ClientError> {
        debug!(fun = fun as u32, "Querying getter.xml");
        self.post_form(
            "xml/getter.xml",
            &[
                ("token", self.token().unwrap_or_default().to_string()),
                ("fun", (fun as u32).to_string()),
            ],
        )
        .await
    }

    /// Release the device's session slot.
    async fn logout(&mut self) -> Result<(), ClientError> {
        self.post_form(
            "xml/setter.xml",
            &[
                ("token", self.token().unwrap_or_default().to_string()),
                ("fun", SETTER_LOGOUT.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn post_form(
        &mut self,
        path: &str,
        fields: &[(&str, String)],
    ) -> Result<String, ClientError> {
        let form: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .header(COOKIE, self.cookie_header())
            .form(&form)
            .send()
            .await?;

        self.absorb_cookies(response.headers());

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Protocol(format!(
                "{path} returned HTTP {status}"
            )));
        }

        Ok(response.text().await?)
    }

    fn token(&self) -> Option<&str> {
        self.cookies.get("sessionToken").map(String::as_str)
    }

    fn cookie_header(&self) -> String {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        pairs.join("; ")
    }

    fn absorb_cookies(&mut self, headers: &reqwest::header::HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            if let Ok(raw) = value.to_str()
                && let Some((name, value)) = parse_set_cookie(raw)
            {
                self.cookies.insert(name, value);
            }
        }
    }
}

/// First `name=value` pair of a `Set-Cookie` header.
fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let first = raw.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// A successful login answers `successful;SID=<sid>`.
fn parse_login_response(body: &str) -> Option<String> {
    let rest = body.trim().strip_prefix("successful")?;
    let rest = rest.strip_prefix(';').unwrap_or(rest);
    for part in rest.split(';') {
        if let Some(sid) = part.trim().strip_prefix("SID=") {
            return Some(sid.to_string());
        }
    }
    // Some firmware revisions answer a bare "successful".
    Some(String::new())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
