#![allow(clippy::unwrap_used)]
// Integration tests for `FirewallClient` using wiremock.

use secrecy::SecretString;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use firewatch_api::{Error, FirewallClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, FirewallClient) {
    let server = MockServer::start().await;
    let endpoint = Url::parse(&format!("{}/api/", server.uri())).unwrap();
    let client = FirewallClient::with_client(
        reqwest::Client::new(),
        endpoint,
        SecretString::from("test-api-key".to_owned()),
    );
    (server, client)
}

fn xml_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_owned(), "application/xml")
}

// ── System info ─────────────────────────────────────────────────────

#[tokio::test]
async fn system_info_parses_identity_fields() {
    let (server, client) = setup().await;

    let body = r#"<response status="success"><result><system>
        <hostname>edge-fw-01</hostname>
        <uptime>12 days, 04:30:00</uptime>
        <sw-version>11.1.2-h3</sw-version>
        <serial>0123456789</serial>
        <model>PA-440</model>
    </system></result></response>"#;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "op"))
        .and(query_param("key", "test-api-key"))
        .respond_with(xml_response(body))
        .mount(&server)
        .await;

    let info = client.system_info().await.unwrap();
    assert_eq!(info.value.hostname.as_deref(), Some("edge-fw-01"));
    assert_eq!(info.value.uptime_seconds, Some(12 * 86_400 + 4 * 3_600 + 30 * 60));
    assert_eq!(info.value.sw_version.as_deref(), Some("11.1.2-h3"));
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn http_403_maps_to_authentication_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .mount(&server)
        .await;

    let result = client.system_info().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

#[tokio::test]
async fn xml_error_status_maps_to_operation_error() {
    let (server, client) = setup().await;

    let body =
        r#"<response status="error"><msg><line>Invalid credential</line></msg></response>"#;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(xml_response(body))
        .mount(&server)
        .await;

    let result = client.session_info().await;
    assert!(matches!(result, Err(Error::Operation { .. })));
}

// ── Interface counters ──────────────────────────────────────────────

#[tokio::test]
async fn interface_counters_round_trip() {
    let (server, client) = setup().await;

    let body = r#"<response status="success"><result><ifnet><ifnet>
        <entry>
            <name>ethernet1/12</name>
            <ibytes>1000000</ibytes><obytes>500000</obytes>
            <ipackets>1000</ipackets><opackets>500</opackets>
            <ierrors>0</ierrors><idrops>2</idrops>
        </entry>
    </ifnet></ifnet></result></response>"#;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(xml_response(body))
        .mount(&server)
        .await;

    let fetched = client.interface_counters("ethernet1/12").await.unwrap();
    assert_eq!(fetched.value.ibytes, 1_000_000);
    assert_eq!(fetched.value.obytes, 500_000);
    assert_eq!(fetched.value.idrops, 2);
}

// ── Logs ────────────────────────────────────────────────────────────

#[tokio::test]
async fn threat_logs_query_parameters_and_parsing() {
    let (server, client) = setup().await;

    let body = r#"<response status="success"><result><log><logs count="1">
        <entry>
            <receive_time>2026/07/30 11:22:33</receive_time>
            <threatid>Win32.Emotet</threatid>
            <severity>critical</severity>
            <src>192.168.1.23</src><dst>203.0.113.9</dst>
            <app>web-browsing</app><action>reset-both</action>
            <category>spyware</category><rule>allow-outbound</rule>
        </entry>
    </logs></log></result></response>"#;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "log"))
        .and(query_param("log-type", "threat"))
        .and(query_param("nlogs", "100"))
        .respond_with(xml_response(body))
        .mount(&server)
        .await;

    let logs = client.threat_logs(100).await.unwrap();
    assert_eq!(logs.value.len(), 1);
    assert_eq!(logs.value[0].threat_name.as_deref(), Some("Win32.Emotet"));
    assert_eq!(logs.value[0].severity.as_deref(), Some("critical"));
}

// ── ARP / DHCP ──────────────────────────────────────────────────────

#[tokio::test]
async fn arp_and_dhcp_listing() {
    let (server, client) = setup().await;

    let arp_body = r#"<response status="success"><result><entries>
        <entry><ip>192.168.1.10</ip><mac>aa:bb:cc:dd:ee:ff</mac><interface>ethernet1/2</interface><status>c</status></entry>
        <entry><ip>192.168.1.11</ip><mac>11:22:33:44:55:66</mac><interface>ethernet1/2</interface><status>c</status></entry>
    </entries></result></response>"#;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "op"))
        .respond_with(xml_response(arp_body))
        .mount(&server)
        .await;

    let arp = client.arp_table().await.unwrap();
    assert_eq!(arp.value.len(), 2);
    assert_eq!(arp.value[0].interface.as_deref(), Some("ethernet1/2"));
}

// ── Latency measurement ─────────────────────────────────────────────

#[tokio::test]
async fn latency_is_measured() {
    let (server, client) = setup().await;

    let body = r#"<response status="success"><result>
        <num-active>10</num-active>
    </result></response>"#;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(xml_response(body).set_delay(std::time::Duration::from_millis(30)))
        .mount(&server)
        .await;

    let fetched = client.session_info().await.unwrap();
    assert!(fetched.latency >= std::time::Duration::from_millis(30));
}
