use crate::http;
use crate::url::Url;

/// An operation was stopped by its cancellation token
///
/// Every asynchronous operation in this crate can end this way, and it
/// is always reported as itself, never as a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation aborted")]
pub struct Aborted;

/// Failures of a single SOAP exchange with a gateway's control URL
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SoapRequestError {
    /// The control URL's host is not an IP address (or its port is bad)
    #[error("failed to parse IGD host {0}")]
    HostParse(Url),

    /// The request envelope could not be serialised
    #[error("failed to encode SOAP request")]
    Encode(#[source] xmltree::Error),

    /// TCP connection to the gateway failed
    #[error("TCP connect to IGD failed")]
    Connect(#[source] reqwest::Error),

    /// Sending the request, or receiving the response head, failed
    #[error("failed to send HTTP request")]
    HttpRequest(#[source] reqwest::Error),

    /// Receiving the response body failed
    #[error("failed to read HTTP response")]
    HttpResponse(#[source] reqwest::Error),

    /// The exchange took longer than the configured HTTP timeout
    #[error("HTTP exchange with IGD timed out")]
    TimedOut(#[source] reqwest::Error),

    /// The gateway answered, but not with 200 OK
    #[error("IGD returned HTTP status {0}")]
    HttpStatus(u16),

    /// The exchange was cancelled
    #[error(transparent)]
    Aborted(#[from] Aborted),
}

impl SoapRequestError {
    /// Was the exchange cancelled, rather than failing?
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, SoapRequestError::Aborted(_))
    }
}

impl From<http::Error> for SoapRequestError {
    fn from(e: http::Error) -> Self {
        match e {
            http::Error::Connect(e) => SoapRequestError::Connect(e),
            http::Error::Request(e) => SoapRequestError::HttpRequest(e),
            http::Error::Response(e) => SoapRequestError::HttpResponse(e),
            http::Error::TimedOut(e) => SoapRequestError::TimedOut(e),
            http::Error::Aborted(a) => SoapRequestError::Aborted(a),
        }
    }
}

/// Failures of [`Igd::add_port_mapping`](crate::Igd::add_port_mapping)
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AddPortMappingError {
    /// The control URL's host is not an IP address
    #[error("failed to parse IGD host {0}")]
    HostParse(Url),

    /// No local address could be found that reaches the gateway
    #[error("no suitable endpoint to IGD")]
    NoEndpointToIgd(#[source] std::io::Error),

    /// The request itself failed
    #[error("SOAP request failed")]
    Soap(#[from] SoapRequestError),

    /// The operation was cancelled while finding the local address
    #[error(transparent)]
    Aborted(#[from] Aborted),
}

/// Failures of [`Igd::get_external_address`](crate::Igd::get_external_address)
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GetExternalAddressError {
    /// The request itself failed
    #[error("SOAP request failed")]
    Soap(#[from] SoapRequestError),

    /// The response body was not XML
    #[error("invalid XML body")]
    InvalidXmlBody,

    /// The response lacked `NewExternalIPAddress`
    #[error("invalid response")]
    InvalidResponse,

    /// `NewExternalIPAddress` was not an IP address
    #[error("failed to parse external IP address {0:?}")]
    BadAddress(String),
}

/// Failures of [`Igd::get_list_of_port_mappings`](crate::Igd::get_list_of_port_mappings)
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GetListOfPortMappingsError {
    /// The request itself failed
    #[error("SOAP request failed")]
    Soap(#[from] SoapRequestError),

    /// The response body was not XML
    #[error("invalid XML body")]
    InvalidXmlBody,

    /// The response lacked a well-formed `NewPortListing`
    #[error("invalid response")]
    InvalidResponse,
}

/// Failures of [`Igd::get_generic_port_mapping_entry`](crate::Igd::get_generic_port_mapping_entry)
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GetGenericPortMappingEntryError {
    /// The request itself failed
    #[error("SOAP request failed")]
    Soap(#[from] SoapRequestError),

    /// The response body was not XML
    #[error("invalid XML body")]
    InvalidXmlBody,

    /// A required field was missing or malformed
    #[error("invalid response")]
    InvalidResponse,
}

/// Failures of [`Igd::delete_port_mapping`](crate::Igd::delete_port_mapping)
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeletePortMappingError {
    /// The request itself failed
    #[error("SOAP request failed")]
    Soap(#[from] SoapRequestError),
}
