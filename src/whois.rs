//! WHOIS lookup over TCP port 43.
//!
//! IANA is asked first and names the registry server through its `refer:`
//! line. Thin registries add a `Registrar WHOIS Server:` line, which is
//! followed once more when present.
use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use itertools::Itertools;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

pub const IANA_WHOIS: &str = "whois.iana.org";
pub const WHOIS_PORT: u16 = 43;
pub const WHOIS_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_RESPONSE: u64 = 1 << 20;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email pattern")
});

/// `Key: Value` lines, keys lowercased, values in order of appearance.
pub type Fields = BTreeMap<String, Vec<String>>;

/// Well-known registration fields plus everything the server sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WhoisData {
    pub domain_name: Option<String>,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub updated_date: Option<String>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub emails: Vec<String>,
    pub org: Option<String>,
    pub country: Option<String>,
    pub raw: Fields,
}

impl WhoisData {
    pub fn from_response(text: &str) -> Self {
        let raw = parse_fields(text);
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| raw.get(*key).and_then(|values| values.first()))
                .cloned()
        };
        let all = |keys: &[&str], lowercase: bool| {
            keys.iter()
                .filter_map(|key| raw.get(*key))
                .flatten()
                .map(|value| {
                    let value = value.split_whitespace().next().unwrap_or_default();
                    if lowercase {
                        value.to_lowercase()
                    } else {
                        value.to_owned()
                    }
                })
                .sorted()
                .dedup()
                .collect::<Vec<String>>()
        };

        Self {
            domain_name: first(&["domain name", "domain"]),
            registrar: first(&["registrar", "sponsoring registrar"]),
            creation_date: first(&["creation date", "created", "registered"]),
            expiration_date: first(&[
                "registry expiry date",
                "registrar registration expiration date",
                "expiry date",
                "expires",
                "paid-till",
            ]),
            updated_date: first(&["updated date", "last-modified", "changed", "last updated"]),
            name_servers: all(&["name server", "nserver"], true),
            status: all(&["domain status", "status"], false),
            emails: EMAIL
                .find_iter(text)
                .map(|m| m.as_str().to_lowercase())
                .sorted()
                .dedup()
                .collect(),
            org: first(&["registrant organization", "org", "organisation", "organization"]),
            country: first(&["registrant country", "country"]),
            raw,
        }
    }

    /// Fields from `other` fill in what is still missing here.
    fn merge(&mut self, other: Self) {
        macro_rules! fill {
            ($($field: ident),+) => {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field;
                    }
                )+
            }
        }
        fill!(
            domain_name,
            registrar,
            creation_date,
            expiration_date,
            updated_date,
            org,
            country
        );

        for (key, values) in other.raw {
            self.raw.entry(key).or_insert(values);
        }
        for email in other.emails {
            if !self.emails.contains(&email) {
                self.emails.push(email);
            }
        }
    }
}

/// Splits a WHOIS response into fields. Comment lines and the trailing
/// `>>> Last update` notice are skipped.
pub fn parse_fields(text: &str) -> Fields {
    let mut fields = Fields::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(['%', '#']) || line.starts_with(">>>") {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim().to_lowercase(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let values = fields.entry(key).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_owned());
        }
    }
    fields
}

/// The next server to ask, from IANA's `refer:` or a registry's
/// `Registrar WHOIS Server:` line.
pub fn referral(text: &str) -> Option<String> {
    let fields = parse_fields(text);
    ["refer", "whois", "registrar whois server"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(|values| values.first()))
        .map(|server| {
            let server = server.trim_start_matches("whois://");
            server.trim_end_matches('/').to_lowercase()
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct WhoisReport {
    pub target: String,
    pub timestamp: DateTime<Local>,
    pub whois_data: WhoisData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WhoisClient {
    root: String,
    port: u16,
    timeout: Duration,
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new(IANA_WHOIS, WHOIS_PORT, WHOIS_TIMEOUT)
    }
}

impl WhoisClient {
    pub fn new(root: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            port,
            timeout,
        }
    }

    /// Never fails: a failed lookup is recorded in the report's `error`.
    pub async fn lookup(&self, target: &str) -> WhoisReport {
        info!("Performing WHOIS lookup for {target}");
        let (whois_data, error) = match self.resolve_chain(target).await {
            Ok(data) => {
                info!("WHOIS lookup completed for {target}");
                (data, None)
            }
            Err(e) => {
                error!("WHOIS lookup failed: {e}");
                (WhoisData::default(), Some(e.to_string()))
            }
        };

        WhoisReport {
            target: target.to_owned(),
            timestamp: Local::now(),
            whois_data,
            error,
        }
    }

    async fn resolve_chain(&self, target: &str) -> Result<WhoisData> {
        let root = self.query(&self.root, target).await?;
        let registry = referral(&root)
            .ok_or_else(|| Error::parse("IANA WHOIS response", "no referral server"))?;
        debug!("{} refers {target} to {registry}", self.root);

        let response = self.query(&registry, target).await?;
        let mut data = WhoisData::from_response(&response);

        if let Some(registrar) = referral(&response).filter(|server| *server != registry) {
            debug!("{registry} refers {target} to {registrar}");
            match self.query(&registrar, target).await {
                Ok(detail) => {
                    let mut detailed = WhoisData::from_response(&detail);
                    detailed.merge(data);
                    data = detailed;
                }
                Err(e) => debug!("Registrar WHOIS {registrar} failed: {e}"),
            }
        }
        Ok(data)
    }

    async fn query(&self, server: &str, request: &str) -> Result<String> {
        time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect((server, self.port))
                .await
                .map_err(|e| match e.kind() {
                    io::ErrorKind::ConnectionRefused => Error::ConnectionRefused(server.to_owned()),
                    _ => Error::Upstream(format!("{server}: {e}")),
                })?;
            stream.write_all(format!("{request}\r\n").as_bytes()).await?;

            let mut response = Vec::new();
            (&mut stream)
                .take(MAX_RESPONSE)
                .read_to_end(&mut response)
                .await?;
            Ok::<_, Error>(String::from_utf8_lossy(&response).into_owned())
        })
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
    }
}
