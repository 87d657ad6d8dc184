//! This crate exposes the internal functionality of the Spotter
//! reconnaissance tool.
//!
//! Spotter runs a set of independent modules against one target host or
//! domain: WHOIS lookup, DNS record enumeration, TCP/UDP port scanning,
//! service detection and subdomain discovery.
//!
//! ## Architecture Overview
//!
//! Port scanning, service detection and subdomain brute force all share
//! [`ConcurrentScanner`](crate::scanner::ConcurrentScanner): a bounded pool
//! that fans [`ProbeTask`](crate::scanner::task::ProbeTask)s out, folds every
//! failure into the probe's verdict and returns results sorted by task
//! identity.
//!
//! 1. **Input Processing**: the target is resolved and port specs are parsed
//!    before any probe is sent. These are the only fatal errors.
//! 2. **Probing**: [`SocketProbe`](crate::scanner::socket::SocketProbe), or
//!    nmap when it is installed and a SYN scan was asked for.
//! 3. **Identification**: open ports with banners go through
//!    [`service::identify`](crate::service::identify).
//! 4. **Subdomains**: brute force, zone transfer and certificate
//!    transparency are merged by the
//!    [`Aggregator`](crate::subdomain::aggregate::Aggregator).
//! 5. **Output**: every module's report lands in one
//!    [`Report`](crate::report::Report), saved as JSON, XML or text.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::{net::IpAddr, time::Duration};
//!
//! use spotter::input::ScanType;
//! use spotter::portscan::{NativeProber, PortScanner};
//! use spotter::scanner::{socket::SocketProbe, Cancellation, ConcurrentScanner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ip: IpAddr = "127.0.0.1".parse()?;
//!     let probe = SocketProbe::new(ip, "localhost", false)?;
//!     let prober = NativeProber::new(
//!         probe,
//!         ConcurrentScanner::new(50, Cancellation::new()),
//!         Duration::from_millis(500),
//!     );
//!
//!     let ports: Vec<u16> = (1..=1000).collect();
//!     let report = PortScanner::new("localhost", Box::new(prober))
//!         .scan(&ports, ScanType::Tcp)
//!         .await;
//!
//!     println!("Discovered {} open ports", report.total_open_ports);
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod error;

pub mod input;

pub mod scanner;

pub mod address;

pub mod portscan;

pub mod service;

pub mod subdomain;

pub mod dns;

pub mod whois;

pub mod report;
