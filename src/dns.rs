//! DNS record enumeration.
use chrono::{DateTime, Local};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use log::{debug, error, info, warn};
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Record types queried, in query order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordKind {
    A,
    Aaaa,
    Mx,
    Ns,
    Txt,
    Soa,
    Cname,
    Ptr,
}

impl RecordKind {
    pub const ALL: [Self; 8] = [
        Self::A,
        Self::Aaaa,
        Self::Mx,
        Self::Ns,
        Self::Txt,
        Self::Soa,
        Self::Cname,
        Self::Ptr,
    ];

    pub const fn record_type(self) -> RecordType {
        match self {
            Self::A => RecordType::A,
            Self::Aaaa => RecordType::AAAA,
            Self::Mx => RecordType::MX,
            Self::Ns => RecordType::NS,
            Self::Txt => RecordType::TXT,
            Self::Soa => RecordType::SOA,
            Self::Cname => RecordType::CNAME,
            Self::Ptr => RecordType::PTR,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.record_type().fmt(f)
    }
}

/// One answer, shaped per record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
#[allow(clippy::upper_case_acronyms)]
pub enum DnsRecord {
    A {
        address: Ipv4Addr,
    },
    AAAA {
        address: Ipv6Addr,
    },
    MX {
        priority: u16,
        exchange: String,
    },
    NS {
        nameserver: String,
    },
    TXT {
        text: String,
    },
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: i32,
        retry: i32,
        expire: i32,
        minimum: u32,
    },
    CNAME {
        target: String,
    },
    PTR {
        ptrdname: String,
    },
}

impl DnsRecord {
    /// `None` for record data outside the enumerated types.
    pub fn from_rdata(rdata: &RData) -> Option<Self> {
        let record = match rdata {
            RData::A(a) => Self::A { address: a.0 },
            RData::AAAA(aaaa) => Self::AAAA { address: aaaa.0 },
            RData::MX(mx) => Self::MX {
                priority: mx.preference(),
                exchange: mx.exchange().to_string(),
            },
            RData::NS(ns) => Self::NS {
                nameserver: ns.0.to_string(),
            },
            RData::TXT(txt) => Self::TXT {
                text: txt
                    .iter()
                    .map(|data| String::from_utf8_lossy(data))
                    .collect(),
            },
            RData::SOA(soa) => Self::SOA {
                mname: soa.mname().to_string(),
                rname: soa.rname().to_string(),
                serial: soa.serial(),
                refresh: soa.refresh(),
                retry: soa.retry(),
                expire: soa.expire(),
                minimum: soa.minimum(),
            },
            RData::CNAME(cname) => Self::CNAME {
                target: cname.0.to_string(),
            },
            RData::PTR(ptr) => Self::PTR {
                ptrdname: ptr.0.to_string(),
            },
            other => {
                debug!("Ignoring {} record", other.record_type());
                return None;
            }
        };
        Some(record)
    }
}

/// Results of one enumeration. Types without answers are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct DnsReport {
    pub target: String,
    pub timestamp: DateTime<Local>,
    pub records: BTreeMap<String, Vec<DnsRecord>>,
    pub total_records: usize,
}

pub struct DnsEnumerator {
    resolver: TokioAsyncResolver,
}

impl DnsEnumerator {
    pub const fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }

    pub async fn enumerate(&self, target: &str) -> DnsReport {
        info!("Enumerating DNS records for {target}");

        let mut records = BTreeMap::new();
        for kind in RecordKind::ALL {
            let found = self.query(target, kind).await;
            if !found.is_empty() {
                info!("Found {} {kind} record(s)", found.len());
                records.insert(kind.to_string(), found);
            }
        }

        let total_records = records.values().map(Vec::len).sum();
        info!("DNS enumeration completed. Found {total_records} total records");

        DnsReport {
            target: target.to_owned(),
            timestamp: Local::now(),
            records,
            total_records,
        }
    }

    /// Answers of exactly `kind`. CNAMEs followed on the way are not
    /// reported under another type.
    pub async fn query(&self, target: &str, kind: RecordKind) -> Vec<DnsRecord> {
        match self.resolver.lookup(target, kind.record_type()).await {
            Ok(lookup) => lookup
                .record_iter()
                .filter(|record| record.record_type() == kind.record_type())
                .filter_map(|record| record.data())
                .filter_map(DnsRecord::from_rdata)
                .collect(),
            Err(e) => {
                log_failure(target, kind, &e);
                Vec::new()
            }
        }
    }
}

fn log_failure(target: &str, kind: RecordKind, e: &ResolveError) {
    match e.kind() {
        ResolveErrorKind::NoRecordsFound {
            response_code: ResponseCode::NXDomain,
            ..
        } => error!("Domain {target} does not exist"),
        ResolveErrorKind::NoRecordsFound { .. } => debug!("No {kind} records found"),
        ResolveErrorKind::Timeout => warn!("DNS query timeout for {kind} records"),
        _ => warn!("Error querying {kind} records: {e}"),
    }
}
