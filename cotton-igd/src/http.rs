//! HTTP exchanges with a gateway
//!
//! Each exchange uses a fresh connection with `Connection: close`, and
//! each stage of it (sending the request, receiving the body) is raced
//! against the session's cancellation token. The whole exchange shares
//! one deadline, [`Config::http_timeout`].
use crate::cancel::Cancel;
use crate::config::Config;
use crate::error::Aborted;
use crate::url::Url;
use reqwest::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, PRAGMA};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;
use tracing::trace;

/// Failures of an HTTP exchange, by the stage that failed
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No TCP connection could be made
    #[error("TCP connect failed")]
    Connect(#[source] reqwest::Error),

    /// The request could not be sent, or no response head came back
    #[error("HTTP request failed")]
    Request(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("failed to read HTTP response")]
    Response(#[source] reqwest::Error),

    /// The deadline passed, in whichever stage
    #[error("HTTP exchange timed out")]
    TimedOut(#[source] reqwest::Error),

    #[error(transparent)]
    Aborted(#[from] Aborted),
}

impl Error {
    fn sending(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::TimedOut(e)
        } else if e.is_connect() {
            Error::Connect(e)
        } else {
            Error::Request(e)
        }
    }

    fn receiving(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::TimedOut(e)
        } else {
            Error::Response(e)
        }
    }
}

/// Failures of [`local_address_to`]
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RouteError {
    /// The gateway could not be reached
    #[error("no route to gateway")]
    Unreachable(#[source] io::Error),

    #[error(transparent)]
    Aborted(#[from] Aborted),
}

/// A received HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

async fn staged<T, F>(
    future: F,
    cancel: &Cancel,
    stage: fn(reqwest::Error) -> Error,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(Aborted.into()),
        r = future => r.map_err(stage),
    }
}

fn client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.http_timeout)
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .http1_only()
        .http1_title_case_headers()
        .build()
}

/// Where to send a request for `url`: always the resolved `endpoint`
fn target(endpoint: SocketAddr, url: &Url) -> String {
    format!("http://{}{}", endpoint, url.request_target())
}

async fn exchange(
    request: reqwest::RequestBuilder,
    cancel: &Cancel,
) -> Result<Response, Error> {
    let response = staged(request.send(), cancel, Error::sending).await?;
    let status = response.status().as_u16();
    let body = staged(response.text(), cancel, Error::receiving).await?;
    trace!(status, "HTTP response");
    Ok(Response { status, body })
}

/// Fetch a document, such as a device description
///
/// # Errors
///
/// Returns the stage that failed, or [`Error::Aborted`] if `cancel`
/// fires first.
pub async fn get(
    endpoint: SocketAddr,
    url: &Url,
    config: &Config,
    cancel: &Cancel,
) -> Result<Response, Error> {
    let request = client(config)
        .map_err(Error::Request)?
        .get(target(endpoint, url))
        .header(CONNECTION, "close");
    exchange(request, cancel).await
}

/// Post a SOAP envelope to a control URL
///
/// # Errors
///
/// Returns the stage that failed, or [`Error::Aborted`] if `cancel`
/// fires first.
pub async fn post_soap(
    endpoint: SocketAddr,
    url: &Url,
    soap_action: &str,
    body: &str,
    config: &Config,
    cancel: &Cancel,
) -> Result<Response, Error> {
    let request = client(config)
        .map_err(Error::Request)?
        .post(target(endpoint, url))
        .header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")
        .header(CONNECTION, "close")
        .header(CACHE_CONTROL, "no-cache")
        .header(PRAGMA, "no-cache")
        .header("SOAPAction", format!("\"{soap_action}\""))
        .body(body.to_string());
    exchange(request, cancel).await
}

/// The local address this host would use to reach `endpoint`
///
/// Found by connecting to it, so the gateway must be listening.
///
/// # Errors
///
/// [`RouteError::Unreachable`] if the connection fails or times out,
/// or [`RouteError::Aborted`].
pub async fn local_address_to(
    endpoint: SocketAddr,
    config: &Config,
    cancel: &Cancel,
) -> Result<IpAddr, RouteError> {
    let stream = tokio::select! {
        biased;

        () = cancel.cancelled() => return Err(Aborted.into()),
        r = tokio::time::timeout(config.http_timeout, TcpStream::connect(endpoint)) => {
            match r {
                Ok(r) => r.map_err(RouteError::Unreachable)?,
                Err(_) => {
                    return Err(RouteError::Unreachable(
                        io::ErrorKind::TimedOut.into(),
                    ))
                }
            }
        }
    };
    let local = stream.local_addr().map_err(RouteError::Unreachable)?;
    Ok(local.ip())
}
