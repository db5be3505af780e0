//! Asynchronous SSDP search for gateways
//!
//! A [`Query`] sends one M-SEARCH per configured search target, then
//! collects answers in the background until the search deadline. The
//! answers are handed out, deduplicated by USN, by
//! [`Query::get_response`].
use crate::cancel::Cancel;
use crate::condvar::ConditionVariable;
use crate::config::Config;
use crate::error::Aborted;
use crate::message;
pub use crate::message::{ParseError, Response};
use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const MAX_PACKET_SIZE: usize = 512;
const RECEIVE_BUFFER_SIZE: usize = 32 * 1024;

/// Failures of the search as a whole
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The UDP socket could not be created or configured
    #[error("failed to set up SSDP socket")]
    Socket(#[source] Arc<std::io::Error>),

    /// An M-SEARCH could not be sent
    #[error("failed to send M-SEARCH")]
    Send(#[source] Arc<std::io::Error>),

    /// Receiving failed
    #[error("failed to receive SSDP response")]
    Receive(#[source] Arc<std::io::Error>),

    /// The search deadline passed
    #[error("SSDP search timed out")]
    TimedOut,

    /// The query was stopped
    #[error(transparent)]
    Aborted(#[from] Aborted),
}

/// What [`Query::get_response`] can give instead of a response
#[derive(Debug, Clone, thiserror::Error)]
pub enum GetResponseError {
    /// One datagram was unusable; the query carries on
    #[error("unusable SSDP response")]
    Parse(#[from] ParseError),

    /// The query has finished; every later call gives the same error
    #[error(transparent)]
    Query(#[from] Error),
}

impl GetResponseError {
    /// Is this just one bad datagram, rather than the end of the query?
    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        matches!(self, GetResponseError::Parse(_))
    }

    /// Did the query end because its deadline passed?
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, GetResponseError::Query(Error::TimedOut))
    }
}

#[derive(Default)]
struct Inner {
    responses: VecDeque<Result<Response, ParseError>>,
    seen: HashSet<String>,
    stopped: bool,
    terminal: Option<Error>,
}

#[derive(Default)]
struct State {
    inner: Mutex<Inner>,
    condvar: ConditionVariable,
}

impl State {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_datagram(&self, buf: &[u8], from: SocketAddr) {
        let response = message::Response::parse(buf);
        {
            let mut inner = self.lock();
            match &response {
                Ok(r) => {
                    if !inner.seen.insert(r.usn.clone()) {
                        trace!(usn = %r.usn, %from, "duplicate SSDP response");
                        return;
                    }
                    debug!(%from, "{}", r);
                }
                Err(e) => debug!(%from, error = %e, "unusable SSDP response"),
            }
            inner.responses.push_back(response);
        }
        self.condvar.notify();
    }

    fn finish(&self, error: Error) {
        {
            let mut inner = self.lock();
            if inner.terminal.is_none() {
                inner.terminal = Some(if inner.stopped {
                    Error::Aborted(Aborted)
                } else {
                    error
                });
            }
        }
        self.condvar.notify();
    }
}

fn setup_socket(config: &Config) -> std::io::Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        None,
    )?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket.bind(&addr.into())?;
    if let IpAddr::V4(group) = config.multicast_address.ip() {
        if group.is_multicast() {
            if let Err(e) =
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            {
                warn!(%group, error = %e, "failed to join SSDP multicast group");
            }
        }
    }
    let socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(socket)
}

/// A search in progress
///
/// Dropping the query stops it.
pub struct Query {
    state: Arc<State>,
    cancel: Cancel,
}

impl Query {
    /// Send the searches and start collecting answers
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Socket`] if the socket cannot be set up, or
    /// [`Error::Send`] if a search cannot be sent.
    pub async fn start(config: &Config) -> Result<Query, Error> {
        let socket =
            setup_socket(config).map_err(|e| Error::Socket(Arc::new(e)))?;

        let mut buf = [0u8; MAX_PACKET_SIZE];
        for target in &config.search_targets {
            let n = message::build_search(
                &mut buf,
                config.multicast_address,
                target,
                config.mx(),
                &config.user_agent,
            );
            socket
                .send_to(&buf[..n], config.multicast_address)
                .await
                .map_err(|e| Error::Send(Arc::new(e)))?;
            debug!(%target, to = %config.multicast_address, "M-SEARCH sent");
        }

        let state = Arc::new(State::default());
        let cancel = Cancel::new();
        let deadline = Instant::now() + config.search_deadline();
        tokio::spawn(receive_loop(
            state.clone(),
            socket,
            Cancel::child_of(&cancel),
            deadline,
        ));
        Ok(Query { state, cancel })
    }

    /// The next answer, waiting for one if necessary
    ///
    /// Answers are returned in arrival order, each USN only once. Once
    /// the queue is empty and the search is over, every call returns
    /// the error that ended it: [`Error::TimedOut`] if the deadline
    /// passed, or [`Aborted`] if the query was stopped.
    ///
    /// # Errors
    ///
    /// [`GetResponseError::Parse`] for a bad datagram (ask again), or
    /// [`GetResponseError::Query`] once the search is over.
    pub async fn get_response(&mut self) -> Result<Response, GetResponseError> {
        loop {
            let wait = {
                let mut inner = self.state.lock();
                if inner.stopped {
                    return Err(Error::Aborted(Aborted).into());
                }
                if let Some(r) = inner.responses.pop_front() {
                    return r.map_err(Into::into);
                }
                if let Some(e) = &inner.terminal {
                    return Err(e.clone().into());
                }
                self.state.condvar.wait(None)
            };
            let _ = wait.await;
        }
    }

    /// Stop the search; queued answers are discarded
    pub fn stop(&mut self) {
        self.state.lock().stopped = true;
        self.cancel.fire();
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(
    state: Arc<State>,
    socket: UdpSocket,
    stop: Cancel,
    deadline: Instant,
) {
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    let error = loop {
        tokio::select! {
            biased;

            () = stop.cancelled() => break Error::Aborted(Aborted),
            () = &mut sleep => break Error::TimedOut,
            r = socket.recv_from(&mut buf) => match r {
                Ok((n, from)) => state.on_datagram(&buf[..n], from),
                Err(e) => break Error::Receive(Arc::new(e)),
            },
        }
    };
    debug!(error = %error, "SSDP search finished");
    drop(socket);
    state.finish(error);
}
