//! Finding and controlling UPnP Internet Gateway Devices
//!
//! The cotton-igd crate is a client for the UPnP "Internet Gateway
//! Device" (IGD) protocols, as spoken by most home routers. It lets a
//! program discover the gateways on its local network, ask for their
//! public IP address, and open (or close, or list) port mappings so
//! that peers on the Internet can reach it.
//!
//! Discovery uses SSDP, the Simple Service Discovery Protocol: a
//! multicast M-SEARCH, with answers collected for a short while. Each
//! answer names a device description, which is fetched over HTTP and
//! searched for a WAN IP or PPP connection service. Control is by SOAP
//! requests to that service.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use cotton_igd::{Igd, Protocol};
//! use std::time::Duration;
//!
//! for igd in Igd::discover().await? {
//!     println!("{} says we are {}", igd.control_url(),
//!              igd.get_external_address().await?);
//!     igd.add_port_mapping(Protocol::Udp, 5000, 5000, "demo",
//!                          Duration::from_secs(3600)).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Everything is asynchronous, using Tokio. Every operation in flight
//! can be aborted, using the [`Cancel`] tokens on which the crate is
//! built, and an aborted operation always reports [`Aborted`] rather
//! than some transport error.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod cancel;
mod condvar;
mod config;
mod device;
mod error;
mod http;
mod igd;
pub mod message;
mod soap;
pub mod ssdp;
mod url;
pub mod xml;

pub use cancel::{Cancel, Connection};
pub use condvar::{ConditionVariable, Wait};
pub use config::{
    Config, INTERNET_GATEWAY_DEVICE_V1, INTERNET_GATEWAY_DEVICE_V2,
    SSDP_MULTICAST,
};
pub use device::{Device, Service};
pub use error::{
    AddPortMappingError, Aborted, DeletePortMappingError,
    GetExternalAddressError, GetGenericPortMappingEntryError,
    GetListOfPortMappingsError, SoapRequestError,
};
pub use http::Error as HttpError;
pub use igd::{Igd, MapEntry, Protocol, UnknownProtocol};
pub use url::Url;
