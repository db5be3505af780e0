use crate::url::Url;
use crate::xml;
use tracing::trace;
use xmltree::Element;

/// One `<service>` entry from a UPnP device description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// e.g. "urn:upnp-org:serviceId:WANIPConn1"
    pub id: String,

    /// e.g. "urn:schemas-upnp-org:service:WANIPConnection:1"
    pub service_type: String,

    /// Usually just a path, relative to the description's location
    pub control_url: Url,
}

impl Service {
    /// Read a service from its `<service>` element
    ///
    /// Returns `None` if serviceId, serviceType or controlURL is
    /// missing (or the control URL is empty).
    #[must_use]
    pub fn parse(e: &Element) -> Option<Service> {
        let control_url =
            xml::text(e, "*:controlURL").filter(|u| !u.is_empty())?;
        Some(Service {
            id: xml::text(e, "*:serviceId")?,
            service_type: xml::text(e, "*:serviceType")?,
            control_url: Url::parse(control_url)?,
        })
    }
}

/// A UPnP device, with its embedded devices and services
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    /// e.g. "urn:schemas-upnp-org:device:WANDevice:1"
    pub device_type: String,

    /// Unique device name, "uuid:..."
    pub udn: String,

    pub friendly_name: String,

    /// Embedded devices, from `<deviceList>`
    pub devices: Vec<Device>,

    /// Services, from `<serviceList>`
    pub services: Vec<Service>,
}

impl Device {
    /// Read the root device from a complete description document
    ///
    /// ```
    /// let d = cotton_igd::Device::parse_description(r#"
    ///   <root xmlns="urn:schemas-upnp-org:device-1-0">
    ///     <device>
    ///       <deviceType>urn:schemas-upnp-org:device:Basic:1</deviceType>
    ///       <friendlyName>Box</friendlyName>
    ///       <UDN>uuid:1234</UDN>
    ///     </device>
    ///   </root>"#).unwrap();
    /// assert_eq!(d.friendly_name, "Box");
    /// ```
    #[must_use]
    pub fn parse_description(text: &str) -> Option<Device> {
        let root = xml::parse(text)?;
        Self::parse(xml::find(&root, "*:root.*:device")?)
    }

    /// Read a device from its `<device>` element
    ///
    /// Returns `None` if deviceType, UDN or friendlyName is missing.
    /// Malformed embedded devices and services are left out, rather
    /// than spoiling the whole device.
    #[must_use]
    pub fn parse(e: &Element) -> Option<Device> {
        let device_type = xml::text(e, "*:deviceType")?;
        let udn = xml::text(e, "*:UDN")?;
        let friendly_name = xml::text(e, "*:friendlyName")?;

        let services = xml::child(e, "*:serviceList")
            .map(|list| {
                xml::elements(list)
                    .filter_map(|s| {
                        let service = Service::parse(s);
                        if service.is_none() {
                            trace!(%udn, "skipping malformed service");
                        }
                        service
                    })
                    .collect()
            })
            .unwrap_or_default();

        let devices = xml::child(e, "*:deviceList")
            .map(|list| {
                xml::elements(list)
                    .filter_map(|d| {
                        let device = Device::parse(d);
                        if device.is_none() {
                            trace!(%udn, "skipping malformed embedded device");
                        }
                        device
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Device {
            device_type,
            udn,
            friendly_name,
            devices,
            services,
        })
    }
}
