// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Transport
//!
//! The chat socket over tungstenite. `wss://` goes through native-tls or
//! rustls depending on the enabled feature.

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::handshake::HandshakeRole;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Connector, HandshakeError, Message, WebSocket};

use super::error::NetworkError;
use super::transport::{ConnectionState, Transport, TransportConfig, TransportResult};

/// Sub-protocol announced during the handshake.
const CHAT_PROTOCOL: &str = "Blaze-Protocol/1.0";

type ChatSocket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Host, port and whether TLS is needed, taken from the handshake URI.
#[derive(Debug, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    secure: bool,
}

impl Endpoint {
    fn of(request: &Request) -> TransportResult<Self> {
        let uri = request.uri();
        let secure = match uri.scheme_str() {
            Some("wss") => true,
            Some("ws") => false,
            other => {
                return Err(NetworkError::ConnectionFailed(format!(
                    "unsupported scheme {:?}, expected ws or wss",
                    other.unwrap_or("")
                )))
            }
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| NetworkError::ConnectionFailed(format!("no host in {}", uri)))?;
        Ok(Endpoint {
            host: host.trim_matches(|c| c == '[' || c == ']').to_string(),
            port: uri.port_u16().unwrap_or(if secure { 443 } else { 80 }),
            secure,
        })
    }
}

/// Builds the upgrade request with the protocol and bearer headers.
fn handshake_request(url: &str, config: &TransportConfig) -> TransportResult<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| NetworkError::ConnectionFailed(format!("bad socket url {}: {}", url, e)))?;
    let headers = request.headers_mut();
    headers.insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(CHAT_PROTOCOL),
    );
    if let Some(token) = &config.auth_token {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| NetworkError::AuthenticationFailed(e.to_string()))?;
        headers.insert("Authorization", bearer);
    }
    Ok(request)
}

fn dial(endpoint: &Endpoint, timeout: Duration) -> TransportResult<TcpStream> {
    let addrs = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", endpoint.host, e)))?;

    let mut last = NetworkError::ConnectionFailed(format!("{} did not resolve", endpoint.host));
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == ErrorKind::TimedOut => last = NetworkError::Timeout,
            Err(e) => last = NetworkError::ConnectionFailed(format!("{}: {}", addr, e)),
        }
    }
    Err(last)
}

#[cfg(feature = "network-rustls")]
fn tls_connector() -> TransportResult<Connector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Connector::Rustls(std::sync::Arc::new(config)))
}

#[cfg(all(feature = "network-native-tls", not(feature = "network-rustls")))]
fn tls_connector() -> TransportResult<Connector> {
    native_tls::TlsConnector::new()
        .map(Connector::NativeTls)
        .map_err(|e| NetworkError::ConnectionFailed(format!("tls setup: {}", e)))
}

fn handshake_failure<R: HandshakeRole>(err: HandshakeError<R>) -> NetworkError {
    match err {
        HandshakeError::Interrupted(_) => NetworkError::Timeout,
        HandshakeError::Failure(tungstenite::Error::Http(response))
            if response.status().as_u16() == 401 =>
        {
            NetworkError::AuthenticationFailed("socket handshake rejected".into())
        }
        HandshakeError::Failure(e) => NetworkError::ConnectionFailed(format!("handshake: {}", e)),
    }
}

fn is_poll_timeout(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(e)
        if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}

/// Chat socket over a blocking TCP stream with a short read timeout, so
/// `receive` returns regularly while idle.
pub struct WebSocketTransport {
    socket: Option<ChatSocket>,
    state: ConnectionState,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        WebSocketTransport {
            socket: None,
            state: ConnectionState::Disconnected,
        }
    }

    fn open(url: &str, config: &TransportConfig) -> TransportResult<ChatSocket> {
        let request = handshake_request(url, config)?;
        let endpoint = Endpoint::of(&request)?;

        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let tcp = dial(&endpoint, connect_timeout)?;
        let io = |e: std::io::Error| NetworkError::ConnectionFailed(e.to_string());
        // The handshake gets the full connect timeout; reads poll afterwards.
        tcp.set_read_timeout(Some(connect_timeout)).map_err(io)?;
        tcp.set_write_timeout(Some(Duration::from_millis(config.request_timeout_ms)))
            .map_err(io)?;
        let handle = tcp.try_clone().map_err(io)?;

        let connector = if endpoint.secure {
            tls_connector()?
        } else {
            Connector::Plain
        };
        let (socket, _response) =
            tungstenite::client_tls_with_config(request, tcp, None, Some(connector))
                .map_err(handshake_failure)?;

        handle
            .set_read_timeout(Some(Duration::from_millis(config.poll_timeout_ms)))
            .map_err(io)?;
        Ok(socket)
    }

    fn lost(&mut self, err: NetworkError) -> NetworkError {
        self.socket = None;
        self.state = ConnectionState::Disconnected;
        err
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WebSocketTransport {
    fn connect(&mut self, url: &str, config: &TransportConfig) -> TransportResult<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;

        match Self::open(url, config) {
            Ok(socket) => {
                self.socket = Some(socket);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => Err(self.lost(e)),
        }
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        if let Some(mut socket) = self.socket.take() {
            // Best effort; the peer may already be gone.
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state.clone()
    }

    fn send(&mut self, frame: &[u8]) -> TransportResult<()> {
        let socket = self.socket.as_mut().ok_or(NetworkError::NotConnected)?;
        match socket.send(Message::Binary(frame.to_vec())) {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Err(self.lost(NetworkError::ConnectionClosed))
            }
            Err(e) => Err(NetworkError::SendFailed(e.to_string())),
        }
    }

    fn receive(&mut self) -> TransportResult<Option<Vec<u8>>> {
        let socket = self.socket.as_mut().ok_or(NetworkError::NotConnected)?;
        let message = match socket.read() {
            Ok(message) => message,
            Err(e) if is_poll_timeout(&e) => return Ok(None),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Err(self.lost(NetworkError::ConnectionClosed))
            }
            Err(e) => return Err(self.lost(NetworkError::ReceiveFailed(e.to_string()))),
        };

        match message {
            Message::Binary(data) => Ok(Some(data)),
            Message::Close(_) => Err(self.lost(NetworkError::ConnectionClosed)),
            Message::Text(_) => Err(NetworkError::InvalidMessage(
                "text frame on a binary socket".into(),
            )),
            // tungstenite queues the pong itself; flush pushes it out.
            Message::Ping(_) => {
                let _ = socket.flush();
                Ok(None)
            }
            Message::Pong(_) | Message::Frame(_) => Ok(None),
        }
    }
}
