use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Device type of a version-1 Internet Gateway Device
pub const INTERNET_GATEWAY_DEVICE_V1: &str =
    "urn:schemas-upnp-org:device:InternetGatewayDevice:1";

/// Device type of a version-2 Internet Gateway Device
pub const INTERNET_GATEWAY_DEVICE_V2: &str =
    "urn:schemas-upnp-org:device:InternetGatewayDevice:2";

/// The well-known SSDP multicast group and port
///
/// See <https://www.grc.com/port_1900.htm>
pub const SSDP_MULTICAST: SocketAddrV4 =
    SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);

/// Tunable parameters for discovery and gateway control
///
/// The defaults are what a home network needs; they are only worth
/// changing in tests, or to search for something other than IGDs.
///
/// ```
/// use std::time::Duration;
///
/// let config = cotton_igd::Config {
///     search_wait: Duration::from_secs(3),
///     ..Default::default()
/// };
/// assert_eq!(config.mx(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// One M-SEARCH is sent for each of these search targets (ST)
    pub search_targets: Vec<String>,

    /// How long gateways may wait before answering (the MX header)
    pub search_wait: Duration,

    /// Extra time allowed for late answers after `search_wait`
    pub grace: Duration,

    /// Where M-SEARCH requests are sent
    ///
    /// Normally the SSDP multicast group; the group is only joined if
    /// this is a multicast address.
    pub multicast_address: SocketAddr,

    /// Deadline for each complete HTTP exchange with a gateway
    pub http_timeout: Duration,

    /// Sent as USER-AGENT (SSDP) and User-Agent (HTTP)
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            search_targets: vec![
                INTERNET_GATEWAY_DEVICE_V1.to_string(),
                INTERNET_GATEWAY_DEVICE_V2.to_string(),
            ],
            search_wait: Duration::from_secs(2),
            grace: Duration::from_millis(200),
            multicast_address: SocketAddr::V4(SSDP_MULTICAST),
            http_timeout: Duration::from_secs(5),
            user_agent: format!(
                "{}/{} UPnP/1.1",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl Config {
    /// The MX value advertised in searches, in whole seconds (at least 1)
    #[must_use]
    pub fn mx(&self) -> u64 {
        self.search_wait.as_secs().max(1)
    }

    /// Total time a discovery run listens for answers
    #[must_use]
    pub fn search_deadline(&self) -> Duration {
        self.search_wait + self.grace
    }
}
