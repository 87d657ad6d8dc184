//! AXFR against every authoritative name server of a domain.
//!
//! Most servers refuse. A refusal, like any other failure of one server,
//! is logged at debug level and contributes nothing.
use super::{in_scope, DiscoveryMethod, SubdomainSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use hickory_resolver::proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_resolver::proto::rr::{Name, RecordType};
use hickory_resolver::proto::serialize::binary::BinEncodable;
use hickory_resolver::TokioAsyncResolver;
use log::{debug, info};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

const DNS_PORT: u16 = 53;

/// Guards against servers that never send the closing SOA.
const MAX_MESSAGES: usize = 10_000;

pub struct ZoneTransfer {
    resolver: TokioAsyncResolver,
    timeout: Duration,
    servers: Option<Vec<SocketAddr>>,
}

impl ZoneTransfer {
    pub const fn new(resolver: TokioAsyncResolver, timeout: Duration) -> Self {
        Self {
            resolver,
            timeout,
            servers: None,
        }
    }

    /// Skips the NS lookup and always asks these servers.
    #[must_use]
    pub fn with_servers(mut self, servers: Vec<SocketAddr>) -> Self {
        self.servers = Some(servers);
        self
    }

    async fn name_servers(&self, domain: &str) -> Vec<SocketAddr> {
        if let Some(servers) = &self.servers {
            return servers.clone();
        }

        let ns = match self.resolver.ns_lookup(domain).await {
            Ok(ns) => ns,
            Err(e) => {
                debug!("Could not get name servers for {domain}: {e}");
                return Vec::new();
            }
        };

        let mut servers = Vec::new();
        for name in ns.iter() {
            match self.resolver.lookup_ip(name.0.clone()).await {
                Ok(ips) => servers.extend(ips.iter().next().map(|ip| SocketAddr::new(ip, DNS_PORT))),
                Err(e) => debug!("Could not resolve name server {name}: {e}"),
            }
        }
        servers
    }

    /// Tries every server, collecting in-scope owner names from each
    /// successful transfer.
    pub async fn transfer_all(&self, domain: &str, servers: &[SocketAddr]) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for &server in servers {
            debug!("Attempting zone transfer of {domain} from {server}");
            match time::timeout(self.timeout, transfer(domain, server)).await {
                Ok(Ok(names)) => {
                    info!("Zone transfer from {server} succeeded with {} names", names.len());
                    found.extend(names.iter().filter_map(|name| in_scope(name, domain)));
                }
                Ok(Err(e)) => debug!("Zone transfer failed for {server}: {e}"),
                Err(_) => debug!("Zone transfer from {server} timed out"),
            }
        }
        found
    }
}

#[async_trait]
impl SubdomainSource for ZoneTransfer {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::ZoneTransfer
    }

    async fn discover(&self, domain: &str) -> BTreeSet<String> {
        let servers = self.name_servers(domain).await;
        self.transfer_all(domain, &servers).await
    }
}

/// Owner names of every record in the zone, as sent by `server`.
pub async fn transfer(domain: &str, server: SocketAddr) -> Result<Vec<String>> {
    let mut stream = TcpStream::connect(server).await?;
    let query = axfr_query(domain)?;
    write_frame(&mut stream, &query).await?;

    let mut names = Vec::new();
    let mut soa_seen = 0;
    for _ in 0..MAX_MESSAGES {
        let response = Message::from_vec(&read_frame(&mut stream).await?)
            .map_err(|e| Error::parse("zone transfer response", e))?;

        if response.response_code() != ResponseCode::NoError {
            return Err(Error::Upstream(format!(
                "{server} answered {}",
                response.response_code()
            )));
        }
        if response.answers().is_empty() {
            break;
        }

        for record in response.answers() {
            if record.record_type() == RecordType::SOA {
                soa_seen += 1;
            }
            names.push(record.name().to_string());
        }
        // a zone starts and ends with its SOA
        if soa_seen >= 2 {
            break;
        }
    }
    Ok(names)
}

fn axfr_query(domain: &str) -> Result<Vec<u8>> {
    let mut name = Name::from_ascii(domain).map_err(|e| Error::InvalidInput(e.to_string()))?;
    name.set_fqdn(true);

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false)
        .add_query(Query::query(name, RecordType::AXFR));

    message.to_vec().map_err(|e| Error::parse("zone transfer query", e))
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len())
        .map_err(|_| Error::InvalidInput("DNS message too long".to_owned()))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let len = stream.read_u16().await?;
    let mut buffer = vec![0; usize::from(len)];
    stream.read_exact(&mut buffer).await?;
    Ok(buffer)
}
