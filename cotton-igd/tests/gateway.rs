use cotton_igd::ssdp;
use cotton_igd::{
    Config, GetExternalAddressError, GetGenericPortMappingEntryError, Igd,
    Protocol, SoapRequestError,
};
use serial_test::serial;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

const WAN_IP_CONNECTION_2: &str =
    "urn:schemas-upnp-org:service:WANIPConnection:2";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>1</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:2</deviceType>
    <friendlyName>Fake Router</friendlyName>
    <UDN>uuid:fake-gw</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:Layer3Forwarding:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:L3Forwarding1</serviceId>
        <controlURL>/ctl/L3F</controlURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:2</deviceType>
        <friendlyName>WAN Device</friendlyName>
        <UDN>uuid:fake-wan</UDN>
        <deviceList>
          <device>
            <deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:2</deviceType>
            <friendlyName>WAN Connection Device</friendlyName>
            <UDN>uuid:fake-wanconn</UDN>
            <serviceList>
              <service>
                <serviceType>urn:schemas-upnp-org:service:WANIPConnection:2</serviceType>
                <serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>
                <controlURL>/ctl/IPConn</controlURL>
              </service>
            </serviceList>
          </device>
        </deviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

fn envelope(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body>{inner}</s:Body></s:Envelope>"#
    )
}

fn action_reply(action: &str, fields: &str) -> String {
    envelope(&format!(
        r#"<u:{action}Response xmlns:u="{WAN_IP_CONNECTION_2}">{fields}</u:{action}Response>"#
    ))
}

fn port_listing() -> String {
    let rows = "<p:PortMappingEntry>\
<p:NewRemoteHost></p:NewRemoteHost>\
<p:NewExternalPort>7000</p:NewExternalPort>\
<p:NewProtocol>TCP</p:NewProtocol>\
<p:NewInternalPort>7001</p:NewInternalPort>\
<p:NewInternalClient>127.0.0.1</p:NewInternalClient>\
<p:NewEnabled>1</p:NewEnabled>\
<p:NewDescription>listed</p:NewDescription>\
<p:NewLeaseTime>600</p:NewLeaseTime>\
</p:PortMappingEntry>\
<p:PortMappingEntry>\
<p:NewExternalPort>7002</p:NewExternalPort>\
<p:NewProtocol>TCP</p:NewProtocol>\
</p:PortMappingEntry>";
    let list = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><p:PortMappingList xmlns:p="urn:schemas-upnp-org:gw:WANIPConnection">{rows}</p:PortMappingList>"#
    );
    let escaped = list.replace('<', "&lt;").replace('>', "&gt;");
    action_reply(
        "GetListOfPortMappings",
        &format!("<NewPortListing>{escaped}</NewPortListing>"),
    )
}

#[derive(Debug, Clone)]
struct Request {
    head: String,
    body: String,
}

impl Request {
    /// Header names are compared case-insensitively, as HTTP requires
    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().find_map(|l| {
            let (k, v) = l.split_once(':')?;
            k.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    fn action(&self) -> Option<&str> {
        self.header("SOAPAction")?
            .trim_matches('"')
            .split_once('#')
            .map(|(_, a)| a)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let end = loop {
        if let Some(i) = find(&buf, b"\r\n\r\n") {
            break i + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..end]).into_owned();
    let length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < end + length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[end..end + length]).into_owned();
    Some(Request { head, body })
}

async fn reply(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
Content-Type: text/xml; charset=\"utf-8\"\r\n\
Content-Length: {}\r\n\
Connection: close\r\n\
\r\n\
{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn reply_chunked(stream: &mut TcpStream, body: &str) {
    let (a, b) = body.split_at(body.len() / 2);
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
Content-Type: text/xml\r\n\
Transfer-Encoding: chunked\r\n\
Connection: close\r\n\
\r\n\
{:x}\r\n{a}\r\n{:x}\r\n{b}\r\n0\r\n\r\n",
        a.len(),
        b.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Normal,
    Silent,
    BadLocation,
    HangOnSoap,
}

struct FakeGateway {
    ssdp: SocketAddr,
    http: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FakeGateway {
    async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = listener.local_addr().unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ssdp = udp.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let location = if behaviour == Behaviour::BadLocation {
            "http://127.0.0.1:1/rootDesc.xml".to_string()
        } else {
            format!("http://{http}/rootDesc.xml")
        };

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            loop {
                let Ok((n, from)) = udp.recv_from(&mut buf).await else {
                    return;
                };
                let search = String::from_utf8_lossy(&buf[..n]).into_owned();
                if behaviour == Behaviour::Silent
                    || !search.starts_with("M-SEARCH * HTTP/1.1\r\n")
                {
                    continue;
                }
                let st = search
                    .lines()
                    .find_map(|l| l.strip_prefix("ST: "))
                    .unwrap_or_default()
                    .to_string();
                let answer = format!(
                    "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=120\r\n\
ST: {st}\r\n\
USN: uuid:fake-gw::{st}\r\n\
EXT:\r\n\
SERVER: Fake/1.0 UPnP/1.1\r\n\
LOCATION: {location}\r\n\
\r\n"
                );
                let _ = udp.send_to(b"NOTIFY * HTTP/1.1\r\n\r\n", from).await;
                let _ = udp.send_to(answer.as_bytes(), from).await;
                let _ = udp.send_to(answer.as_bytes(), from).await;
            }
        });

        let log = requests.clone();
        let server = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let log = log.clone();
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut stream).await else {
                        return;
                    };
                    log.lock().unwrap().push(request.clone());
                    if request.head.starts_with("GET /rootDesc.xml ") {
                        reply(&mut stream, "200 OK", DESCRIPTION).await;
                        return;
                    }
                    if behaviour == Behaviour::HangOnSoap {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return;
                    }
                    match request.action() {
                        Some("GetExternalIPAddress") => {
                            let body = action_reply(
                                "GetExternalIPAddress",
                                "<NewExternalIPAddress>203.0.113.7</NewExternalIPAddress>",
                            );
                            reply(&mut stream, "200 OK", &body).await;
                        }
                        Some(
                            action @ ("AddPortMapping" | "DeletePortMapping"),
                        ) => {
                            reply(&mut stream, "200 OK", &action_reply(action, ""))
                                .await;
                        }
                        Some("GetGenericPortMappingEntry")
                            if request.body.contains(
                                "<NewPortMappingIndex>0</NewPortMappingIndex>",
                            ) =>
                        {
                            let body = action_reply(
                                "GetGenericPortMappingEntry",
                                "<NewRemoteHost></NewRemoteHost>\
<NewExternalPort>6000</NewExternalPort>\
<NewProtocol>UDP</NewProtocol>\
<NewInternalPort>6001</NewInternalPort>\
<NewInternalClient>127.0.0.1</NewInternalClient>\
<NewEnabled>1</NewEnabled>\
<NewPortMappingDescription>first</NewPortMappingDescription>\
<NewLeaseDuration>0</NewLeaseDuration>",
                            );
                            reply(&mut stream, "200 OK", &body).await;
                        }
                        Some("GetListOfPortMappings") => {
                            reply_chunked(&mut stream, &port_listing()).await;
                        }
                        _ => {
                            let fault = envelope(
                                "<s:Fault><faultcode>s:Client</faultcode>\
<faultstring>UPnPError</faultstring></s:Fault>",
                            );
                            reply(&mut stream, "500 Internal Server Error", &fault)
                                .await;
                        }
                    }
                });
            }
        });

        FakeGateway {
            ssdp,
            http,
            requests,
            tasks: vec![responder, server],
        }
    }

    fn config(&self) -> Config {
        Config {
            multicast_address: self.ssdp,
            search_wait: Duration::from_secs(1),
            grace: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn requests_for(&self, action: &str) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.action() == Some(action))
            .cloned()
            .collect()
    }

    async fn discover(&self) -> Igd {
        let mut igds = Igd::discover_with(self.config()).await.unwrap();
        assert_eq!(igds.len(), 1);
        igds.remove(0)
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn discovers_one_gateway() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::Normal).await;
    let igd = gw.discover().await;

    assert_eq!(igd.uuid(), "fake-gw");
    assert_eq!(igd.friendly_name(), "Fake Router");
    assert_eq!(igd.device().udn, "uuid:fake-wan");
    assert_eq!(igd.device().friendly_name, "WAN Device");
    assert_eq!(igd.service_id(), "urn:upnp-org:serviceId:WANIPConn1");
    assert_eq!(igd.service_urn(), WAN_IP_CONNECTION_2);
    assert_eq!(
        igd.control_url().to_string(),
        format!("http://{}/ctl/IPConn", gw.http)
    );
    assert!(igd.is_version_2());

    // Two search targets, each answered twice, but one description
    // fetch per distinct USN
    let fetches = gw
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.head.starts_with("GET "))
        .count();
    assert_eq!(fetches, 2);
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn reads_external_address() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::Normal).await;
    let igd = gw.discover().await;

    let ip = igd.get_external_address().await.unwrap();
    assert_eq!(ip, IpAddr::from([203, 0, 113, 7]));

    let requests = gw.requests_for("GetExternalIPAddress");
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.head.starts_with("POST /ctl/IPConn HTTP/1.1\r\n"));
    assert_eq!(request.header("Host"), Some(gw.http.to_string().as_str()));
    assert_eq!(
        request.header("SOAPAction"),
        Some(format!("\"{WAN_IP_CONNECTION_2}#GetExternalIPAddress\"").as_str())
    );
    assert_eq!(
        request.header("Content-Type"),
        Some("text/xml; charset=\"utf-8\"")
    );
    assert_eq!(request.header("Connection"), Some("close"));
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn adds_and_deletes_mapping() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::Normal).await;
    let igd = gw.discover().await;

    igd.add_port_mapping(
        Protocol::Udp,
        5000,
        5001,
        "cotton <test>",
        Duration::from_secs(3600),
    )
    .await
    .unwrap();

    let requests = gw.requests_for("AddPortMapping");
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert!(body.contains("<NewExternalPort>5000</NewExternalPort>"));
    assert!(body.contains("<NewInternalPort>5001</NewInternalPort>"));
    assert!(body.contains("<NewProtocol>UDP</NewProtocol>"));
    assert!(body.contains("<NewInternalClient>127.0.0.1</NewInternalClient>"));
    assert!(body.contains("<NewEnabled>1</NewEnabled>"));
    assert!(body.contains("<NewLeaseDuration>3600</NewLeaseDuration>"));
    assert!(body.contains("cotton &lt;test"));

    igd.delete_port_mapping(Protocol::Udp, 5000).await.unwrap();
    let requests = gw.requests_for("DeletePortMapping");
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert!(body.contains("<NewExternalPort>5000</NewExternalPort>"));
    assert!(body.contains("<NewProtocol>UDP</NewProtocol>"));
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn reads_mapping_table() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::Normal).await;
    let igd = gw.discover().await;

    let entry = igd.get_generic_port_mapping_entry(0).await.unwrap();
    assert_eq!(entry.ext_port, 6000);
    assert_eq!(entry.int_port, 6001);
    assert_eq!(entry.protocol, Protocol::Udp);
    assert_eq!(entry.description, "first");
    assert_eq!(entry.lease_duration, Duration::ZERO);
    assert!(entry.enabled);

    let e = igd.get_generic_port_mapping_entry(1).await.unwrap_err();
    assert!(matches!(
        e,
        GetGenericPortMappingEntryError::Soap(SoapRequestError::HttpStatus(
            500
        ))
    ));

    let list = igd
        .get_list_of_port_mappings(Protocol::Tcp, 0, 65535, 100)
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].ext_port, 7000);
    assert_eq!(list[0].internal_client, IpAddr::from([127, 0, 0, 1]));
    assert_eq!(list[0].lease_duration, Duration::from_secs(600));

    let requests = gw.requests_for("GetListOfPortMappings");
    let body = &requests[0].body;
    assert!(body.contains("<NewStartPort>0</NewStartPort>"));
    assert!(body.contains("<NewEndPort>65535</NewEndPort>"));
    assert!(body.contains("<NewNumberOfPorts>100</NewNumberOfPorts>"));
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn times_out_without_gateways() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::Silent).await;
    let e = Igd::discover_with(gw.config()).await.unwrap_err();
    assert!(matches!(e, ssdp::Error::TimedOut));
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn skips_unreachable_description() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::BadLocation).await;
    let e = Igd::discover_with(gw.config()).await.unwrap_err();
    assert!(matches!(e, ssdp::Error::TimedOut));
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn stop_aborts_request_in_flight() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::HangOnSoap).await;
    let igd = Arc::new(gw.discover().await);

    let i2 = igd.clone();
    let task =
        tokio::spawn(async move { i2.get_external_address().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());
    igd.stop();

    let e = task.await.unwrap().unwrap_err();
    assert!(matches!(
        e,
        GetExternalAddressError::Soap(SoapRequestError::Aborted(_))
    ));
}

#[tokio::test]
#[serial]
#[cfg_attr(miri, ignore)]
async fn silent_gateway_times_out() {
    init_tracing();
    let gw = FakeGateway::start(Behaviour::HangOnSoap).await;
    let config = Config {
        http_timeout: Duration::from_millis(500),
        ..gw.config()
    };
    let mut igds = Igd::discover_with(config).await.unwrap();
    let igd = igds.remove(0);

    let e = igd.get_external_address().await.unwrap_err();
    assert!(matches!(
        e,
        GetExternalAddressError::Soap(SoapRequestError::TimedOut(_))
    ));
}
