use crate::cancel::Cancel;
use crate::config::{
    Config, INTERNET_GATEWAY_DEVICE_V1, INTERNET_GATEWAY_DEVICE_V2,
};
use crate::device::Device;
use crate::error::{
    AddPortMappingError, DeletePortMappingError,
    GetExternalAddressError, GetGenericPortMappingEntryError,
    GetListOfPortMappingsError, SoapRequestError,
};
use crate::http;
use crate::soap;
use crate::ssdp::{self, GetResponseError, Query, Response};
use crate::url::Url;
use crate::xml;
use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use xmltree::Element;

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        })
    }
}

/// A protocol name other than "TCP" or "UDP"
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol {0:?}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("TCP") {
            Ok(Protocol::Tcp)
        } else if s.eq_ignore_ascii_case("UDP") {
            Ok(Protocol::Udp)
        } else {
            Err(UnknownProtocol(s.to_string()))
        }
    }
}

/// One port mapping, as reported by a gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub description: String,
    pub ext_port: u16,
    pub int_port: u16,
    pub lease_duration: Duration,
    pub protocol: Protocol,
    pub internal_client: IpAddr,
    pub enabled: bool,
}

/// An Internet Gateway Device's WAN connection service
///
/// Obtained from [`Igd::discover`]. All operations go to the same
/// control URL; they may be issued one after another, and
/// [`Igd::stop`] (or dropping the `Igd`) aborts any still in flight.
#[derive(Debug)]
pub struct Igd {
    uuid: String,
    friendly_name: String,
    device: Device,
    service_id: String,
    control_url: Url,
    service_urn: String,
    config: Arc<Config>,
    cancel: Cancel,
}

enum DescriptionError {
    HostParse,
    Http(http::Error),
    HttpStatus(u16),
    Invalid,
}

impl std::fmt::Display for DescriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptionError::HostParse => f.write_str("host is not an IP address"),
            DescriptionError::Http(e) => write!(f, "{e}"),
            DescriptionError::HttpStatus(s) => write!(f, "HTTP status {s}"),
            DescriptionError::Invalid => f.write_str("invalid device description"),
        }
    }
}

async fn fetch_root_device(
    location: &Url,
    config: &Config,
    cancel: &Cancel,
) -> Result<Device, DescriptionError> {
    let endpoint =
        location.socket_addr().ok_or(DescriptionError::HostParse)?;
    let response = http::get(endpoint, location, config, cancel)
        .await
        .map_err(DescriptionError::Http)?;
    if response.status != 200 {
        return Err(DescriptionError::HttpStatus(response.status));
    }
    Device::parse_description(&response.body).ok_or(DescriptionError::Invalid)
}

/// Find the WAN connection services under an IGD's root device
///
/// Only the device tree of the root device's own IGD version is
/// searched: `WANDevice` then `WANConnectionDevice`, then either
/// `WANIPConnection` or `WANPPPConnection`. WAN devices whose UDN is
/// already in `seen` are skipped (and new ones added to it).
fn select_services(
    root: &Device,
    response: &Response,
    config: &Arc<Config>,
    seen: &mut HashSet<String>,
) -> Vec<Igd> {
    let version = match root.device_type.as_str() {
        INTERNET_GATEWAY_DEVICE_V1 => 1,
        INTERNET_GATEWAY_DEVICE_V2 => 2,
        other => {
            debug!(device_type = other, "not an IGD");
            return Vec::new();
        }
    };
    let wan_device = format!("urn:schemas-upnp-org:device:WANDevice:{version}");
    let wan_connection_device = format!(
        "urn:schemas-upnp-org:device:WANConnectionDevice:{version}"
    );
    let ip_connection =
        format!("urn:schemas-upnp-org:service:WANIPConnection:{version}");
    let ppp_connection =
        format!("urn:schemas-upnp-org:service:WANPPPConnection:{version}");

    let mut igds = Vec::new();
    for device in &root.devices {
        if device.device_type != wan_device || !seen.insert(device.udn.clone())
        {
            continue;
        }
        for connection in &device.devices {
            if connection.device_type != wan_connection_device {
                continue;
            }
            for service in &connection.services {
                if service.service_type != ip_connection
                    && service.service_type != ppp_connection
                {
                    continue;
                }
                let mut control_url = response.location.clone();
                control_url.replace_path(service.control_url.path());
                info!(
                    name = %root.friendly_name,
                    url = %control_url,
                    service = %service.service_type,
                    "found gateway"
                );
                igds.push(Igd::new(
                    response.uuid.clone(),
                    root.friendly_name.clone(),
                    device.clone(),
                    service.id.clone(),
                    control_url,
                    service.service_type.clone(),
                    config.clone(),
                ));
            }
        }
    }
    igds
}

fn parse_external_address(
    body: &str,
) -> Result<IpAddr, GetExternalAddressError> {
    let doc =
        xml::parse(body).ok_or(GetExternalAddressError::InvalidXmlBody)?;
    let text = soap::action_response(&doc, "GetExternalIPAddress")
        .and_then(|r| xml::text(r, "NewExternalIPAddress"))
        .ok_or(GetExternalAddressError::InvalidResponse)?;
    text.parse()
        .map_err(|_| GetExternalAddressError::BadAddress(text))
}

fn parse_generic_entry(
    body: &str,
) -> Result<MapEntry, GetGenericPortMappingEntryError> {
    let doc = xml::parse(body)
        .ok_or(GetGenericPortMappingEntryError::InvalidXmlBody)?;
    soap::action_response(&doc, "GetGenericPortMappingEntry")
        .and_then(|r| {
            Some(MapEntry {
                description: xml::text(r, "NewPortMappingDescription")?,
                ext_port: xml::number(r, "NewExternalPort")?,
                int_port: xml::number(r, "NewInternalPort")?,
                lease_duration: Duration::from_secs(xml::number(
                    r,
                    "NewLeaseDuration",
                )?),
                protocol: xml::number(r, "NewProtocol")?,
                internal_client: xml::address(r, "NewInternalClient")?,
                enabled: xml::flag(r, "NewEnabled")?,
            })
        })
        .ok_or(GetGenericPortMappingEntryError::InvalidResponse)
}

fn parse_listing_row(row: &Element) -> Option<MapEntry> {
    Some(MapEntry {
        description: xml::text(row, "*:NewDescription")?,
        ext_port: xml::number(row, "*:NewExternalPort")?,
        int_port: xml::number(row, "*:NewInternalPort")?,
        lease_duration: Duration::from_secs(xml::number(
            row,
            "*:NewLeaseTime",
        )?),
        protocol: xml::number(row, "*:NewProtocol")?,
        internal_client: xml::address(row, "*:NewInternalClient")?,
        enabled: xml::flag(row, "*:NewEnabled")?,
    })
}

fn parse_port_listing(
    body: &str,
) -> Result<Vec<MapEntry>, GetListOfPortMappingsError> {
    let doc =
        xml::parse(body).ok_or(GetListOfPortMappingsError::InvalidXmlBody)?;
    let listing = soap::action_response(&doc, "GetListOfPortMappings")
        .and_then(|r| xml::text(r, "NewPortListing"))
        .ok_or(GetListOfPortMappingsError::InvalidResponse)?;
    let list = xml::parse(&listing)
        .filter(|l| l.name == "PortMappingList")
        .ok_or(GetListOfPortMappingsError::InvalidResponse)?;

    Ok(xml::matching(&list, "*:PortMappingEntry")
        .filter_map(|row| {
            let entry = parse_listing_row(row);
            if entry.is_none() {
                trace!("skipping malformed port mapping row");
            }
            entry
        })
        .collect())
}

impl Igd {
    pub(crate) fn new(
        uuid: String,
        friendly_name: String,
        device: Device,
        service_id: String,
        control_url: Url,
        service_urn: String,
        config: Arc<Config>,
    ) -> Self {
        Self {
            uuid,
            friendly_name,
            device,
            service_id,
            control_url,
            service_urn,
            config,
            cancel: Cancel::new(),
        }
    }

    /// Search the local network for gateways, with default settings
    ///
    /// # Errors
    ///
    /// See [`Igd::discover_with`].
    pub async fn discover() -> Result<Vec<Igd>, ssdp::Error> {
        Self::discover_with(Config::default()).await
    }

    /// Search the local network for gateways
    ///
    /// Every search answer is followed up by fetching its device
    /// description; answers which can't be parsed or fetched are
    /// skipped. The search runs until its deadline, and then the
    /// gateways found so far are returned.
    ///
    /// # Errors
    ///
    /// [`ssdp::Error::TimedOut`] if no gateway at all was found, or
    /// any other error that ended the search.
    pub async fn discover_with(config: Config) -> Result<Vec<Igd>, ssdp::Error> {
        let config = Arc::new(config);
        let mut query = Query::start(&config).await?;
        let cancel = Cancel::new();
        let mut seen = HashSet::new();
        let mut igds = Vec::new();

        loop {
            let response = match query.get_response().await {
                Ok(r) => r,
                Err(GetResponseError::Parse(_)) => continue,
                Err(GetResponseError::Query(ssdp::Error::TimedOut))
                    if !igds.is_empty() =>
                {
                    break
                }
                Err(GetResponseError::Query(e)) => return Err(e),
            };

            let root = match fetch_root_device(
                &response.location,
                &config,
                &cancel,
            )
            .await
            {
                Ok(d) => d,
                Err(e) => {
                    warn!(
                        location = %response.location,
                        error = %e,
                        "failed to fetch device description"
                    );
                    continue;
                }
            };
            igds.extend(select_services(&root, &response, &config, &mut seen));
        }
        Ok(igds)
    }

    async fn soap_request(
        &self,
        action: &str,
        args: &[(&str, String)],
    ) -> Result<String, SoapRequestError> {
        let endpoint = self
            .control_url
            .socket_addr()
            .ok_or_else(|| SoapRequestError::HostParse(self.control_url.clone()))?;
        let body = soap::build_request(&self.service_urn, action, args)
            .map_err(SoapRequestError::Encode)?;
        debug!(action, url = %self.control_url, "SOAP request");

        let response = http::post_soap(
            endpoint,
            &self.control_url,
            &format!("{}#{}", self.service_urn, action),
            &body,
            &self.config,
            &self.cancel,
        )
        .await?;
        if response.status != 200 {
            debug!(
                action,
                status = response.status,
                body = %response.body,
                "SOAP request refused"
            );
            return Err(SoapRequestError::HttpStatus(response.status));
        }
        Ok(response.body)
    }

    /// Ask the gateway to forward `external_port` to this host
    ///
    /// The internal client is whichever local address reaches the
    /// gateway. A zero `duration` asks for a permanent mapping.
    ///
    /// # Errors
    ///
    /// [`AddPortMappingError::HostParse`] if the control URL is not an
    /// IP endpoint, [`AddPortMappingError::NoEndpointToIgd`] if the
    /// gateway can't be reached, or a failed request.
    pub async fn add_port_mapping(
        &self,
        protocol: Protocol,
        external_port: u16,
        internal_port: u16,
        description: &str,
        duration: Duration,
    ) -> Result<(), AddPortMappingError> {
        let endpoint = self
            .control_url
            .socket_addr()
            .ok_or_else(|| AddPortMappingError::HostParse(self.control_url.clone()))?;
        let local = http::local_address_to(endpoint, &self.config, &self.cancel)
            .await
            .map_err(|e| match e {
                http::RouteError::Aborted(a) => AddPortMappingError::Aborted(a),
                http::RouteError::Unreachable(e) => {
                    AddPortMappingError::NoEndpointToIgd(e)
                }
            })?;

        self.soap_request(
            "AddPortMapping",
            &[
                ("NewRemoteHost", String::new()),
                ("NewExternalPort", external_port.to_string()),
                ("NewProtocol", protocol.to_string()),
                ("NewInternalPort", internal_port.to_string()),
                ("NewInternalClient", local.to_string()),
                ("NewEnabled", "1".to_string()),
                ("NewPortMappingDescription", description.to_string()),
                ("NewLeaseDuration", duration.as_secs().to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    /// The gateway's public IP address
    ///
    /// # Errors
    ///
    /// A failed request, or a reply without a valid address.
    pub async fn get_external_address(
        &self,
    ) -> Result<IpAddr, GetExternalAddressError> {
        let body = self.soap_request("GetExternalIPAddress", &[]).await?;
        parse_external_address(&body)
    }

    /// The mappings within a port range (an IGD:2 action)
    ///
    /// Malformed rows in the reply are skipped.
    ///
    /// # Errors
    ///
    /// A failed request, or a reply without a usable listing.
    pub async fn get_list_of_port_mappings(
        &self,
        protocol: Protocol,
        start_port: u16,
        end_port: u16,
        max_count: u16,
    ) -> Result<Vec<MapEntry>, GetListOfPortMappingsError> {
        let body = self
            .soap_request(
                "GetListOfPortMappings",
                &[
                    ("NewStartPort", start_port.to_string()),
                    ("NewEndPort", end_port.to_string()),
                    ("NewProtocol", protocol.to_string()),
                    ("NewNumberOfPorts", max_count.to_string()),
                ],
            )
            .await?;
        parse_port_listing(&body)
    }

    /// The mapping at position `index` in the gateway's table
    ///
    /// # Errors
    ///
    /// A failed request (gateways answer 500 past the end of the
    /// table), or a reply missing any field.
    pub async fn get_generic_port_mapping_entry(
        &self,
        index: u32,
    ) -> Result<MapEntry, GetGenericPortMappingEntryError> {
        let body = self
            .soap_request(
                "GetGenericPortMappingEntry",
                &[("NewPortMappingIndex", index.to_string())],
            )
            .await?;
        parse_generic_entry(&body)
    }

    /// Remove the mapping of `external_port`
    ///
    /// # Errors
    ///
    /// A failed request.
    pub async fn delete_port_mapping(
        &self,
        protocol: Protocol,
        external_port: u16,
    ) -> Result<(), DeletePortMappingError> {
        self.soap_request(
            "DeletePortMapping",
            &[
                ("NewRemoteHost", String::new()),
                ("NewExternalPort", external_port.to_string()),
                ("NewProtocol", protocol.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    /// Abort every operation in flight, and any later ones
    pub fn stop(&self) {
        self.cancel.fire();
    }

    /// Has [`Igd::stop`] been called?
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_fired()
    }

    /// UUID of the root device, from its search answer
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The gateway's name for itself, from its root device
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// The WAN device the service belongs to
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// e.g. "urn:upnp-org:serviceId:WANIPConn1"
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Where SOAP requests are sent
    #[must_use]
    pub fn control_url(&self) -> &Url {
        &self.control_url
    }

    /// e.g. "urn:schemas-upnp-org:service:WANIPConnection:2"
    #[must_use]
    pub fn service_urn(&self) -> &str {
        &self.service_urn
    }

    /// Does this service understand IGD:2 actions, such as
    /// [`Igd::get_list_of_port_mappings`]?
    #[must_use]
    pub fn is_version_2(&self) -> bool {
        self.service_urn.ends_with(":2")
    }
}

impl Drop for Igd {
    fn drop(&mut self) {
        self.stop();
    }
}
