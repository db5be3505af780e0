//! SSDP search requests and responses, on the wire
use crate::url::Url;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::SocketAddr;

/// Reasons a datagram was not a usable search response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Not UTF-8, or the first line does not look like HTTP
    #[error("bad SSDP status line {0:?}")]
    HttpStatusLine(String),

    /// The status code is not 200
    #[error("unexpected SSDP status {0:?}")]
    HttpResult(String),

    /// LOCATION is missing, or has no host
    #[error("bad SSDP location {0:?}")]
    LocationUrl(String),
}

/// A device's answer to an M-SEARCH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The whole USN header, e.g. "uuid:...::urn:schemas-upnp-org:..."
    pub usn: String,

    /// The device UUID extracted from the USN (may be empty)
    pub uuid: String,

    /// Where the device description can be fetched
    pub location: Url,

    /// The ST header
    pub service_type: String,
}

/// Extract the UUID from a USN such as `uuid:abcd::urn:...`
///
/// Everything after the first "uuid:" token, up to any "::", is the
/// answer; a UUID may itself contain single colons. Gives "" if there
/// is no "uuid:" token.
#[must_use]
pub fn uuid_from_usn(usn: &str) -> &str {
    let mut rest = usn;
    while let Some((token, tail)) = rest.split_once(':') {
        if token.eq_ignore_ascii_case("uuid") {
            return tail.split_once("::").map_or(tail, |(uuid, _)| uuid);
        }
        rest = tail;
    }
    ""
}

impl Response {
    /// Parse a received datagram
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the datagram is not a "200" HTTP
    /// response with a usable LOCATION.
    pub fn parse(buf: &[u8]) -> Result<Response, ParseError> {
        let packet = std::str::from_utf8(buf).map_err(|_| {
            ParseError::HttpStatusLine(String::from_utf8_lossy(buf).into())
        })?;

        let mut iter = packet.lines();
        let status = iter.next().unwrap_or_default();
        let is_http = status
            .get(..4)
            .is_some_and(|s| s.eq_ignore_ascii_case("http"));
        if !is_http {
            return Err(ParseError::HttpStatusLine(status.to_string()));
        }
        if status.split_whitespace().nth(1) != Some("200") {
            return Err(ParseError::HttpResult(status.to_string()));
        }

        let mut map = BTreeMap::new();
        for line in iter {
            if let Some((key, value)) = line.split_once(':') {
                map.insert(key.trim().to_ascii_uppercase(), value.trim());
            }
        }

        let location = map.get("LOCATION").copied().unwrap_or_default();
        let url = Url::parse(location)
            .filter(|u| !u.host().is_empty())
            .ok_or_else(|| ParseError::LocationUrl(location.to_string()))?;
        let usn = map.get("USN").copied().unwrap_or_default();

        Ok(Response {
            usn: usn.to_string(),
            uuid: uuid_from_usn(usn).to_string(),
            location: url,
            service_type: map
                .get("ST")
                .copied()
                .unwrap_or_default()
                .to_string(),
        })
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(ssdp::response uuid:{} url:{} service_type:{})",
            self.uuid, self.location, self.service_type
        )
    }
}

/// A replacement for Cursor that writes into a fixed buffer
struct MessageCursor<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> MessageCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> MessageCursor<'a> {
        MessageCursor { buf, offset: 0 }
    }

    pub const fn position(&self) -> usize {
        self.offset
    }
}

impl<'a> Write for MessageCursor<'a> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let n = s.len();
        if n + self.offset > self.buf.len() {
            return Err(std::fmt::Error);
        }
        self.buf[self.offset..self.offset + n].clone_from_slice(s.as_bytes());
        self.offset += n;
        Ok(())
    }
}

/// Write an M-SEARCH request into `buf`, returning its length
///
/// If `buf` is too small the message is truncated.
pub fn build_search(
    buf: &mut [u8],
    host: SocketAddr,
    search_target: &str,
    maximum_wait_sec: u64,
    user_agent: &str,
) -> usize {
    let mut cursor = MessageCursor::new(buf);
    let _ = write!(
        cursor,
        "M-SEARCH * HTTP/1.1\r
HOST: {host}\r
ST: {search_target}\r
MAN: \"ssdp:discover\"\r
MX: {maximum_wait_sec}\r
USER-AGENT: {user_agent}\r
\r\n"
    );
    cursor.position()
}
