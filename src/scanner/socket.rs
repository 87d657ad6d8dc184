//! Single-shot socket probes: TCP connect, UDP exchange and banner collection.
use super::task::{ProbeResult, ProbeTask, Protocol, RESPONSE_CAP};
use crate::error::Result;
use log::{debug, warn};
use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time,
};
use tokio_native_tls::TlsConnector;

/// Ports spoken to with a plain HTTP request before reading.
pub const HTTP_PORTS: [u16; 4] = [80, 8080, 8000, 8888];

/// Ports that need a TLS handshake before anything is exchanged.
pub const HTTPS_PORTS: [u16; 2] = [443, 8443];

/// How a connection is opened before its banner is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Read whatever the service volunteers.
    Passive,
    /// Send a minimal `GET /` first.
    Http,
    /// Negotiate TLS, then send `GET /`.
    Https,
}

impl Handshake {
    pub fn for_port(port: u16) -> Self {
        if HTTP_PORTS.contains(&port) {
            Self::Http
        } else if HTTPS_PORTS.contains(&port) {
            Self::Https
        } else {
            Self::Passive
        }
    }
}

/// Performs exactly one connect/send/receive attempt per call.
///
/// Every network step is bounded by the task's timeout; nothing here may
/// block indefinitely.
#[derive(Clone)]
pub struct SocketProbe {
    ip: IpAddr,
    host: Arc<str>,
    grab_banner: bool,
    handshake: Option<Handshake>,
    tls: TlsConnector,
}

impl std::fmt::Debug for SocketProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketProbe")
            .field("ip", &self.ip)
            .field("host", &self.host)
            .field("grab_banner", &self.grab_banner)
            .finish_non_exhaustive()
    }
}

impl SocketProbe {
    /// `host` is the name the user gave for `ip`; it is sent as the HTTP
    /// `Host` header and as the TLS server name.
    pub fn new(ip: IpAddr, host: &str, grab_banner: bool) -> Result<Self> {
        // reconnaissance, not validation: any certificate is accepted
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        Ok(Self {
            ip,
            host: Arc::from(host),
            grab_banner,
            handshake: None,
            tls: TlsConnector::from(connector),
        })
    }

    /// Uses `handshake` on every port instead of picking one by port number.
    #[cfg(test)]
    pub(crate) fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Probes `task.port()` on this prober's address.
    pub async fn probe(&self, task: ProbeTask) -> ProbeResult {
        let socket = SocketAddr::new(self.ip, task.port());
        match task.protocol() {
            Protocol::Tcp => self.tcp(socket, task).await,
            Protocol::Udp => self.udp(socket, task).await,
            Protocol::None => {
                ProbeResult::error(task, "socket probe needs a tcp or udp task", Duration::ZERO)
            }
        }
    }

    async fn tcp(&self, socket: SocketAddr, task: ProbeTask) -> ProbeResult {
        let started = Instant::now();
        let wait = task.timeout();

        let stream = match time::timeout(wait, TcpStream::connect(socket)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return connect_failure(task, &e, started.elapsed()),
            Err(_) => return ProbeResult::filtered(task, started.elapsed()),
        };

        debug!("Connection was successful {socket}");
        let banner = if self.grab_banner {
            self.collect_banner(stream, &task).await
        } else {
            if let Err(e) = { stream }.shutdown().await {
                debug!("Shutdown stream error {e}");
            }
            Vec::new()
        };

        ProbeResult::open(task, banner, started.elapsed())
    }

    async fn collect_banner(&self, stream: TcpStream, task: &ProbeTask) -> Vec<u8> {
        let wait = task.timeout();
        let handshake = self
            .handshake
            .unwrap_or_else(|| Handshake::for_port(task.port()));
        let outcome = match handshake {
            Handshake::Passive => exchange(stream, task.payload(), wait).await,
            Handshake::Http => {
                let request = task
                    .payload()
                    .map_or_else(|| http_request(&self.host), <[u8]>::to_vec);
                exchange(stream, Some(&request), wait).await
            }
            Handshake::Https => {
                match time::timeout(wait, self.tls.connect(&self.host, stream)).await {
                    Ok(Ok(tls_stream)) => {
                        exchange(tls_stream, Some(&http_request(&self.host)), wait).await
                    }
                    Ok(Err(e)) => {
                        debug!("TLS handshake with {}:{} failed: {e}", self.ip, task.port());
                        Ok(Vec::new())
                    }
                    Err(_) => {
                        debug!("TLS handshake with {}:{} timed out", self.ip, task.port());
                        Ok(Vec::new())
                    }
                }
            }
        };

        outcome.unwrap_or_else(|e| {
            debug!("Banner read from {}:{} failed: {e}", self.ip, task.port());
            Vec::new()
        })
    }

    async fn udp(&self, socket: SocketAddr, task: ProbeTask) -> ProbeResult {
        let started = Instant::now();
        let payload = task.payload().unwrap_or_default().to_vec();

        match udp_exchange(socket, &payload, task.timeout()).await {
            Ok(Some(response)) => {
                debug!("Received {} bytes from {socket}", response.len());
                ProbeResult::open(task, response, started.elapsed())
            }
            // silence proves nothing either way
            Ok(None) => ProbeResult::filtered(task, started.elapsed()),
            Err(e) if is_refusal(&e) => ProbeResult::closed(task, started.elapsed()),
            Err(e) => ProbeResult::error(task, e, started.elapsed()),
        }
    }
}

/// Minimal request used to coax a banner out of web servers.
pub fn http_request(host: &str) -> Vec<u8> {
    format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n").into_bytes()
}

/// Refusal means closed. Anything else is an error verdict for this port
/// only; running out of file descriptors is worth a warning since every
/// other probe is about to hit it too.
fn connect_failure(task: ProbeTask, e: &io::Error, elapsed: Duration) -> ProbeResult {
    if is_refusal(e) {
        debug!("{}:{} refused: {e}", task.address(), task.port());
        return ProbeResult::closed(task, elapsed);
    }
    if e.to_string().to_lowercase().contains("too many open files") {
        warn!("Too many open files. Please reduce the number of workers.");
    }
    ProbeResult::error(task, e, elapsed)
}

fn is_refusal(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

/// Optionally writes `payload`, then reads at most [`RESPONSE_CAP`] bytes.
/// Running out of time while reading is not an error: whatever arrived is
/// the banner.
async fn exchange<S>(mut stream: S, payload: Option<&[u8]>, wait: Duration) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(payload) = payload.filter(|p| !p.is_empty()) {
        time::timeout(wait, stream.write_all(payload))
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
    }

    let mut buf = vec![0u8; RESPONSE_CAP];
    let mut filled = 0;
    let deadline = time::Instant::now() + wait;
    while filled < RESPONSE_CAP {
        match time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if filled > 0 => {
                debug!("Read error after {filled} bytes: {e}");
                break;
            }
            Ok(Err(e)) => return Err(e),
        }
    }

    if let Err(e) = stream.shutdown().await {
        debug!("Shutdown stream error {e}");
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Binds an ephemeral local socket of the right family, sends `payload` and
/// waits up to `wait` for one datagram. `Ok(None)` means nothing came back.
async fn udp_exchange(socket: SocketAddr, payload: &[u8], wait: Duration) -> io::Result<Option<Vec<u8>>> {
    let local_addr: SocketAddr = match socket {
        SocketAddr::V4(_) => (std::net::Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let udp_socket = UdpSocket::bind(local_addr).await?;
    udp_socket.connect(socket).await?;
    udp_socket.send(payload).await?;

    let mut buf = vec![0u8; RESPONSE_CAP];
    match time::timeout(wait, udp_socket.recv(&mut buf)).await {
        Ok(Ok(size)) => {
            buf.truncate(size);
            Ok(Some(buf))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}
