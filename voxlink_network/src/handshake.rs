//! Connection establishment: name resolution, connection, and the HTTP upgrade.

use core::{num::NonZeroU32, time::Duration};
use std::{
    io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
};

use crate::{
    Clock, ClientConfig, Error, HandshakeError, Shutdown, SystemClock, io_err_is_timeout,
    link::{Link, SupervisorState},
    supervisor::Connect,
    transport::{Channel, Stream},
    uri::WsUri,
};

/// The `Sec-WebSocket-Key` sent with every upgrade request.
pub const REQUEST_KEY: &str = "x3JJHMbDL1EzLkh9GBhXDw==";

/// The `Sec-WebSocket-Accept` value a compliant server answers [`REQUEST_KEY`] with.
pub const EXPECTED_ACCEPT: &str = "HSmrc0sMlYUkAGmm5OPpG2HaGWk=";

/// Upper bound on the size of the upgrade response.
pub const MAX_RESPONSE_LEN: usize = 512;

const RESPONSE_END: &[u8] = b"\r\n\r\n";

/// Host name resolution.
pub trait Resolve {
    fn resolve(&mut self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolves through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&mut self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        (host, port).to_socket_addrs().map(Iterator::collect)
    }
}

impl<F: FnMut(&str, u16) -> io::Result<Vec<SocketAddr>>> Resolve for F {
    #[inline(always)]
    fn resolve(&mut self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        self(host, port)
    }
}

/// Builds the upgrade request for `uri`.
pub fn upgrade_request(uri: &WsUri) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {REQUEST_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        uri.path(),
        uri.authority(),
    )
}

/// Reads the upgrade response, up to [`MAX_RESPONSE_LEN`] bytes.
///
/// Bytes are read one at a time, so that a frame sent right behind the response is
/// left in the stream. Reading stops at the end of the response headers, or when the
/// server stops sending.
fn read_response<S: Stream>(channel: &Channel<S>) -> Result<Vec<u8>, Error> {
    let mut response = Vec::with_capacity(MAX_RESPONSE_LEN);

    while response.len() < MAX_RESPONSE_LEN && !response.ends_with(RESPONSE_END) {
        let mut byte = [0];

        match channel.receive(&mut byte) {
            Ok(_) => response.push(byte[0]),
            Err(Error::Closed) => break,
            Err(Error::Io(e)) if io_err_is_timeout(e.kind()) => break,
            Err(e) => return Err(e),
        }
    }

    if response.is_empty() {
        return Err(HandshakeError::NoResponse.into());
    }

    Ok(response)
}

/// Checks the status line and, if the server sent one, the accept key.
pub fn validate_response(response: &[u8]) -> Result<(), HandshakeError> {
    let response = String::from_utf8_lossy(response);
    let mut lines = response.split("\r\n");

    let status = lines.next().unwrap_or_default();
    let mut tokens = status.split_ascii_whitespace();

    if tokens.next() != Some("HTTP/1.1") || tokens.next() != Some("101") {
        return Err(HandshakeError::UnexpectedStatus(status.to_owned()));
    }

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        if !name.trim().eq_ignore_ascii_case("sec-websocket-accept") {
            continue;
        }

        let value = value.trim();
        if value != EXPECTED_ACCEPT {
            return Err(HandshakeError::AcceptMismatch(value.to_owned()));
        }
    }

    Ok(())
}

/// Performs the upgrade handshake on a freshly opened channel.
///
/// When `strict` is unset, any non-empty response is accepted.
pub fn upgrade<S: Stream>(channel: &Channel<S>, uri: &WsUri, strict: bool) -> Result<(), Error> {
    let request = upgrade_request(uri);
    channel.send(request.as_bytes())?;

    let response = read_response(channel)?;

    log::debug!(
        "session {}: upgrade response: {:?}",
        channel.session(),
        String::from_utf8_lossy(&response),
    );

    if strict {
        validate_response(&response)?;
    }

    Ok(())
}

/// Establishes sessions, as described by a [`ClientConfig`].
#[derive(Debug)]
pub struct Negotiator<R = SystemResolver, K = SystemClock> {
    uri: String,
    resolver: R,
    clock: K,
    dns_max_retry: NonZeroU32,
    dns_retry_interval: Duration,
    socket_timeout: Duration,
    strict: bool,
}

impl Negotiator {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_resolver(config, SystemResolver, SystemClock)
    }
}

impl<R: Resolve, K: Clock> Negotiator<R, K> {
    pub fn with_resolver(config: &ClientConfig, resolver: R, clock: K) -> Self {
        Self {
            uri: config.uri.clone(),
            resolver,
            clock,
            dns_max_retry: config.dns_max_retry,
            dns_retry_interval: config.dns_retry_interval(),
            socket_timeout: config.socket_timeout(),
            strict: config.strict_handshake,
        }
    }

    /// Resolves `uri`'s host, retrying failed lookups.
    pub fn resolve(&mut self, uri: &WsUri, shutdown: &Shutdown) -> Result<SocketAddr, Error> {
        let attempts = self.dns_max_retry.get();
        let mut attempt = 1;

        loop {
            match self.resolver.resolve(uri.host(), uri.port()) {
                Ok(addrs) => {
                    return addrs
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::NoAddress(uri.host().to_owned()));
                }
                Err(source) if attempt >= attempts || shutdown.is_requested() => {
                    return Err(Error::Resolution {
                        host: uri.host().to_owned(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "failed to resolve {:?} ({attempt}/{attempts}): {e}",
                        uri.host()
                    );
                    self.clock.sleep(self.dns_retry_interval, shutdown);
                    attempt += 1;
                }
            }
        }
    }

    /// Resolves, connects and upgrades, reporting progress through `link`.
    pub fn negotiate(&mut self, session: u64, link: &Link) -> Result<Channel, Error> {
        // a bad URI fails every attempt the same way, but is not retried within one
        let uri = WsUri::parse(&self.uri)?;

        link.set_state(SupervisorState::Resolving);
        let addr = self.resolve(&uri, link.shutdown())?;

        link.set_state(SupervisorState::Handshaking);
        log::info!("session {session}: connecting to {uri} ({addr})");

        let channel = Channel::open(addr, self.socket_timeout, session)?;

        if let Err(e) = upgrade(&channel, &uri, self.strict) {
            channel.close();
            return Err(e);
        }

        Ok(channel)
    }
}

impl<R: Resolve, K: Clock> Connect for Negotiator<R, K> {
    type Stream = TcpStream;

    fn connect(&mut self, session: u64, link: &Link) -> Result<Channel, Error> {
        self.negotiate(session, link)
    }
}
