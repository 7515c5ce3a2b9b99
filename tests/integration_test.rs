//! Integration tests against a mock Connect Box.
//!
//! The mock speaks the modem's form-POST protocol: it hands out a
//! `sessionToken` cookie, rotates it on every response, accepts login and
//! logout on `xml/setter.xml`, and serves canned status documents from
//! `xml/getter.xml`. It also counts concurrent sessions so the tests can
//! prove that scrapes are serialized against the device.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Form, State};
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower::ServiceExt;

use connectbox_exporter::http::create_router;
use connectbox_exporter::{DeviceClient, ExporterConfig, ScrapeCollector};

const DOWNSTREAM_TABLE: &str = r#"<downstream_table>
  <ds_num>1</ds_num>
  <downstream>
    <freq>602000000</freq>
    <pow>3.1</pow>
    <snr>38</snr>
    <mod>256qam</mod>
    <chid>25</chid>
    <RxMER>38.983</RxMER>
  </downstream>
</downstream_table>"#;

const SIGNAL_TABLE: &str = r#"<signal_table>
  <sig_num>1</sig_num>
  <signal>
    <dsid>25</dsid>
    <unerrored>113789391</unerrored>
    <correctable>12</correctable>
    <uncorrectable>0</uncorrectable>
  </signal>
</signal_table>"#;

const UPSTREAM_TABLE: &str = r#"<upstream_table>
  <us_num>1</us_num>
  <upstream>
    <usid>1</usid>
    <freq>36000000</freq>
    <power>43.5</power>
    <srate>5120</srate>
    <mod>64qam</mod>
    <t1Timeouts>0</t1Timeouts>
    <t2Timeouts>0</t2Timeouts>
    <t3Timeouts>2</t3Timeouts>
    <t4Timeouts>0</t4Timeouts>
  </upstream>
</upstream_table>"#;

const GLOBAL_SETTINGS: &str = r#"<GlobalSettings>
  <SwVersion>CH7465LG-NCIP-6.12.18.24</SwVersion>
  <CmProvisionMode>IPv4</CmProvisionMode>
  <GwProvisionMode>IPv4</GwProvisionMode>
  <OperatorId>LGI</OperatorId>
</GlobalSettings>"#;

const CM_SYSTEM_INFO: &str = r#"<cm_system_info>
  <cm_docsis_mode>DOCSIS 3.0</cm_docsis_mode>
  <cm_hardware_version>5.01</cm_hardware_version>
  <cm_system_uptime>36day(s)15h:24m:58s</cm_system_uptime>
</cm_system_info>"#;

const CM_STATUS: &str = r#"<cmstatus>
  <provisioning_st>Online</provisioning_st>
  <cm_comment>Operational</cm_comment>
</cmstatus>"#;

const CM_STATE: &str = r#"<cmstate>
  <TunnerTemperature>212</TunnerTemperature>
  <Temperature>32</Temperature>
</cmstate>"#;

const LAN_USER_TABLE: &str = r#"<LanUserTable>
  <Ethernet>
    <clientinfo>
      <MACAddr>00:11:22:33:44:55</MACAddr>
      <IPv4Addr>192.168.0.10</IPv4Addr>
      <hostname>nas</hostname>
      <speed>1000</speed>
    </clientinfo>
  </Ethernet>
  <WIFI>
    <clientinfo>
      <MACAddr>66:77:88:99:aa:bb</MACAddr>
      <IPv4Addr>192.168.0.23</IPv4Addr>
      <hostname>phone</hostname>
      <speed>72</speed>
    </clientinfo>
  </WIFI>
</LanUserTable>"#;

const PASSWORD: &str = "hunter2";

#[derive(Default)]
struct ModemState {
    fail_lan_users: bool,
    token_counter: AtomicUsize,
    current_token: Mutex<String>,
    active_sessions: AtomicUsize,
    max_concurrent_sessions: AtomicUsize,
    logins: AtomicUsize,
    logouts: AtomicUsize,
}

impl ModemState {
    fn issue_token(&self) -> String {
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let token = format!("tok{n}");
        *self.current_token.lock().unwrap() = token.clone();
        token
    }

    fn token_cookie(&self) -> (header::HeaderName, String) {
        (
            header::SET_COOKIE,
            format!("sessionToken={}; Path=/", self.issue_token()),
        )
    }

    /// The device rejects requests whose `token` form field is not the one
    /// handed out with the previous response.
    fn token_is_current(&self, form: &HashMap<String, String>) -> bool {
        form.get("token") == Some(&*self.current_token.lock().unwrap())
    }
}

async fn landing_page(State(state): State<Arc<ModemState>>) -> Response {
    (StatusCode::OK, [state.token_cookie()], "<html></html>").into_response()
}

async fn setter(
    State(state): State<Arc<ModemState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if !state.token_is_current(&form) {
        return (StatusCode::UNAUTHORIZED, "stale token").into_response();
    }

    match form.get("fun").map(String::as_str) {
        Some("15") => {
            if form.get("Password").map(String::as_str) == Some(PASSWORD) {
                state.logins.fetch_add(1, Ordering::SeqCst);
                let now = state.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
                state
                    .max_concurrent_sessions
                    .fetch_max(now, Ordering::SeqCst);
                (
                    StatusCode::OK,
                    [state.token_cookie()],
                    "successful;SID=271828",
                )
                    .into_response()
            } else {
                (StatusCode::OK, [state.token_cookie()], "idloginincorrect").into_response()
            }
        }
        Some("16") => {
            state.logouts.fetch_add(1, Ordering::SeqCst);
            state.active_sessions.fetch_sub(1, Ordering::SeqCst);
            (StatusCode::OK, [state.token_cookie()], "").into_response()
        }
        _ => (StatusCode::BAD_REQUEST, "unknown setter").into_response(),
    }
}

async fn getter(
    State(state): State<Arc<ModemState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if !state.token_is_current(&form) {
        return (StatusCode::UNAUTHORIZED, "stale token").into_response();
    }

    // Widen the window in which a second, wrongly-parallel session would be
    // observable.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let body = match form.get("fun").map(String::as_str) {
        Some("1") => GLOBAL_SETTINGS,
        Some("2") => CM_SYSTEM_INFO,
        Some("10") => DOWNSTREAM_TABLE,
        Some("11") => UPSTREAM_TABLE,
        Some("12") => SIGNAL_TABLE,
        Some("121") => CM_STATUS,
        Some("123") => {
            if state.fail_lan_users {
                return (StatusCode::INTERNAL_SERVER_ERROR, "nope").into_response();
            }
            LAN_USER_TABLE
        }
        Some("136") => CM_STATE,
        _ => return (StatusCode::BAD_REQUEST, "unknown getter").into_response(),
    };

    (StatusCode::OK, [state.token_cookie()], body).into_response()
}

async fn start_mock_modem(state: Arc<ModemState>) -> SocketAddr {
    let router = Router::new()
        .route("/", get(landing_page))
        .route("/xml/setter.xml", post(setter))
        .route("/xml/getter.xml", post(getter))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Exporter router pointed at the mock modem.
fn exporter_router(modem_addr: SocketAddr, password: &str) -> Router {
    let config = ExporterConfig::parse(&format!(
        r#"{{ ip_address: "{modem_addr}", password: "{password}" }}"#
    ))
    .unwrap();
    let client =
        DeviceClient::new(&config.ip_address, &config.password, Duration::from_secs(5)).unwrap();
    create_router(Arc::new(ScrapeCollector::new(client, &config)))
}

async fn fetch_metrics(router: Router) -> String {
    let response = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn successful_scrape_exposes_device_metrics() {
    let state = Arc::new(ModemState::default());
    let modem = start_mock_modem(state.clone()).await;
    let router = exporter_router(modem, PASSWORD);

    let body = fetch_metrics(router).await;
    let source = modem.to_string();

    assert!(body.contains(&format!("connectbox_up{{source=\"{source}\"}} 1\n")));
    assert!(body.contains("connectbox_scrape_duration_seconds{"));

    // downstream: frequency in Hz, power in dBmV, codeword counters
    assert!(body.contains(&format!(
        "connectbox_downstream_frequency_hz{{source=\"{source}\",channel_id=\"25\"}} 602000000\n"
    )));
    assert!(body.contains(&format!(
        "connectbox_downstream_power_level_dbmv{{source=\"{source}\",channel_id=\"25\"}} 3.1\n"
    )));
    assert!(body.contains(
        "# TYPE connectbox_downstream_codewords_corrected_total counter"
    ));
    assert!(body.contains("connectbox_downstream_codewords_uncorrectable_total{"));

    // upstream: timeout counters keyed by type
    assert!(body.contains(&format!(
        "connectbox_upstream_timeouts_total{{source=\"{source}\",channel_id=\"01\",timeout_type=\"T3\"}} 2\n"
    )));

    // temperatures converted from Fahrenheit
    assert!(body.contains(&format!(
        "connectbox_tuner_temperature_celsius{{source=\"{source}\"}} 100\n"
    )));
    assert!(body.contains(&format!(
        "connectbox_temperature_celsius{{source=\"{source}\"}} 0\n"
    )));

    // uptime parsed from the firmware's duration format
    let uptime = 36 * 86_400 + 15 * 3_600 + 24 * 60 + 58;
    assert!(body.contains(&format!(
        "connectbox_uptime_seconds_total{{source=\"{source}\"}} {uptime}\n"
    )));

    // device info and provisioning state
    assert!(body.contains("firmware_version=\"CH7465LG-NCIP-6.12.18.24\""));
    assert!(body.contains("status=\"Online\"} 1"));

    // connected clients
    assert!(body.contains("connectbox_ethernet_client_speed_mbit{"));
    assert!(body.contains("hostname=\"phone\"} 72"));
}

#[tokio::test]
async fn every_scrape_logs_in_and_out_once() {
    let state = Arc::new(ModemState::default());
    let modem = start_mock_modem(state.clone()).await;
    let router = exporter_router(modem, PASSWORD);

    for _ in 0..3 {
        let body = fetch_metrics(router.clone()).await;
        assert!(body.contains("connectbox_up{"));
    }

    assert_eq!(state.logins.load(Ordering::SeqCst), 3);
    assert_eq!(state.logouts.load(Ordering::SeqCst), 3);
    assert_eq!(state.active_sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrong_password_reports_down_and_nothing_else() {
    let state = Arc::new(ModemState::default());
    let modem = start_mock_modem(state.clone()).await;
    let router = exporter_router(modem, "not-the-password");

    let body = fetch_metrics(router).await;

    assert!(body.contains(&format!("connectbox_up{{source=\"{modem}\"}} 0\n")));
    assert!(body.contains("connectbox_scrape_duration_seconds{"));

    let metric_names: Vec<_> = body
        .lines()
        .filter(|l| !l.starts_with('#') && !l.is_empty())
        .map(|l| l.split('{').next().unwrap())
        .collect();
    assert_eq!(
        metric_names,
        vec!["connectbox_up", "connectbox_scrape_duration_seconds"]
    );

    // no session was opened, so there is nothing to log out of
    assert_eq!(state.logins.load(Ordering::SeqCst), 0);
    assert_eq!(state.logouts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_modem_reports_down() {
    // Nothing listens on port 9.
    let router = {
        let config = ExporterConfig::parse(
            r#"{ ip_address: "127.0.0.1:9", password: "secret", timeout_seconds: 1 }"#,
        )
        .unwrap();
        let client = DeviceClient::new(
            &config.ip_address,
            &config.password,
            Duration::from_millis(300),
        )
        .unwrap();
        create_router(Arc::new(ScrapeCollector::new(client, &config)))
    };

    let body = fetch_metrics(router).await;
    assert!(body.contains("connectbox_up{source=\"127.0.0.1:9\"} 0\n"));
    assert!(!body.contains("connectbox_downstream"));
}

#[tokio::test]
async fn lan_user_failure_drops_only_that_section() {
    let state = Arc::new(ModemState {
        fail_lan_users: true,
        ..Default::default()
    });
    let modem = start_mock_modem(state.clone()).await;
    let router = exporter_router(modem, PASSWORD);

    let body = fetch_metrics(router).await;

    assert!(body.contains(&format!("connectbox_up{{source=\"{modem}\"}} 1\n")));
    assert!(body.contains("connectbox_downstream_frequency_hz{"));
    assert!(!body.contains("connectbox_ethernet_client_speed_mbit"));
    assert!(!body.contains("connectbox_wifi_client_speed_mbit"));

    // the failed sub-fetch must not leak the session
    assert_eq!(state.logouts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_scrapes_share_one_device_session() {
    let state = Arc::new(ModemState::default());
    let modem = start_mock_modem(state.clone()).await;
    let router = exporter_router(modem, PASSWORD);

    let (a, b) = tokio::join!(
        fetch_metrics(router.clone()),
        fetch_metrics(router.clone())
    );

    assert!(a.contains("connectbox_up{"));
    assert!(b.contains("connectbox_up{"));
    assert_eq!(state.logins.load(Ordering::SeqCst), 2);
    assert_eq!(
        state.max_concurrent_sessions.load(Ordering::SeqCst),
        1,
        "scrapes must be serialized against the device"
    );
}
