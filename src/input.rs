//! Provides a means to read, parse and hold configuration options for runs.
use crate::scanner::task::Protocol;
use clap::{Parser, ValueEnum};
use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Port range scanned when none is given.
pub const DEFAULT_PORTS: &str = "1-1000";

/// How ports are probed.
///   - Syn uses nmap when it is installed and falls back to a TCP connect scan.
///   - Tcp always uses a TCP connect scan.
///   - Udp sends a datagram and waits for an answer.
#[derive(Deserialize, Serialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Syn,
    Tcp,
    Udp,
}

impl ScanType {
    pub const fn protocol(self) -> Protocol {
        match self {
            Self::Syn | Self::Tcp => Protocol::Tcp,
            Self::Udp => Protocol::Udp,
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syn => "syn",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        };
        f.write_str(name)
    }
}

/// Format results are saved in.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Xml,
    Txt,
}

impl OutputFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Txt => "txt",
        }
    }
}

pub type Ports = Vec<u16>;

/// Parses `"22,80,1000-2000"` style input into sorted, deduplicated ports.
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = range_parts[0].trim().parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].trim().parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

/// Inverse of [`parse_ports_and_ranges`]: collapses sorted runs back into
/// `a-b` ranges, e.g. `[20, 21, 22, 80]` becomes `"20-22,80"`.
pub fn fmt_port_spec(ports: &[u16]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = ports.iter().copied().sorted_unstable().dedup().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek().is_some_and(|&next| Some(next) == end.checked_add(1)) {
            end = iter.next().unwrap_or(end);
        }
        parts.push(if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        });
    }
    parts.join(",")
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "spotter",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Modular reconnaissance: WHOIS, DNS records, port scanning, service
/// detection and subdomain discovery against a single target.
/// Only point this at hosts you are allowed to test.
pub struct Opts {
    /// Target domain or IP address.
    #[arg(short, long)]
    pub target: String,

    /// Run every module.
    #[arg(long)]
    pub full: bool,

    /// Run the port scanning module.
    #[arg(long)]
    pub port_scan: bool,

    /// Run the service detection module.
    #[arg(long)]
    pub service_detect: bool,

    /// Run the subdomain discovery module.
    #[arg(long)]
    pub subdomain_discovery: bool,

    /// Run the WHOIS lookup module.
    #[arg(long)]
    pub whois: bool,

    /// Run the DNS enumeration module.
    #[arg(long)]
    pub dns_enum: bool,

    /// Ports and/or port ranges to scan. Examples: 80,443,8080 or 1-1000 or 1-1000,8080
    #[arg(short, long, alias = "range", value_parser = parse_ports_and_ranges, default_value = DEFAULT_PORTS)]
    pub ports: Ports,

    /// Port scan type.
    #[arg(long, value_enum, ignore_case = true, default_value = "syn")]
    pub scan_type: ScanType,

    /// Ports for service detection. Defaults to a list of well-known ports.
    #[arg(long, value_parser = parse_ports_and_ranges)]
    pub specific_ports: Option<Ports>,

    /// Wordlist file for subdomain brute forcing, one word per line.
    #[arg(short, long)]
    pub wordlist: Option<PathBuf>,

    /// Per-probe timeout in milliseconds.
    #[arg(long, default_value = "1000")]
    pub timeout: u64,

    /// Timeout in milliseconds for banner collection during service detection.
    #[arg(long, default_value = "3000")]
    pub banner_timeout: u64,

    /// Number of ports probed at the same time.
    #[arg(long, default_value = "50")]
    pub workers: usize,

    /// Number of subdomain names resolved at the same time.
    #[arg(long, default_value = "20")]
    pub subdomain_workers: usize,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Certificate transparency search endpoint.
    #[arg(long, default_value = crate::subdomain::cert_transparency::CRT_SH)]
    pub ct_endpoint: String,

    /// Output format of the saved results.
    #[arg(short, long, value_enum, ignore_case = true, default_value = "json")]
    pub output_format: OutputFormat,

    /// Directory results are saved to.
    #[arg(long, default_value = "results")]
    pub output_dir: PathBuf,

    /// Do not save results to a file.
    #[arg(long)]
    pub no_save: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Accessible mode. Turns off colours and decorations.
    #[arg(long)]
    pub accessible: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merges values found within the user configuration file into the
    /// command line options.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            ports,
            scan_type,
            timeout,
            banner_timeout,
            workers,
            subdomain_workers,
            ct_endpoint,
            output_format,
            output_dir,
            accessible
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(resolver, wordlist, specific_ports);
    }

    /// True when at least one module was asked for.
    pub const fn any_module(&self) -> bool {
        self.full
            || self.port_scan
            || self.service_detect
            || self.subdomain_discovery
            || self.whois
            || self.dns_enum
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default, deserialize_with = "deserialize_ports")]
    ports: Option<Ports>,
    scan_type: Option<ScanType>,
    #[serde(default, deserialize_with = "deserialize_ports")]
    specific_ports: Option<Ports>,
    wordlist: Option<PathBuf>,
    timeout: Option<u64>,
    banner_timeout: Option<u64>,
    workers: Option<usize>,
    subdomain_workers: Option<usize>,
    resolver: Option<String>,
    ct_endpoint: Option<String>,
    output_format: Option<OutputFormat>,
    output_dir: Option<PathBuf>,
    accessible: Option<bool>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// ports = [22, 80, 443]   # or "1-1000,8080"
    /// scan_type = "tcp"
    /// timeout = 1500
    /// workers = 100
    /// output_format = "xml"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match custom_config_path {
            Some(path) => path,
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config = Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("{} in {}", e, config_path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Config files may list ports as an array or as a spec string. Both go
/// through [`parse_ports_and_ranges`], so a bad port fails the config load.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortList {
    Spec(String),
    Ports(Vec<u32>),
}

fn deserialize_ports<'de, D>(deserializer: D) -> Result<Option<Ports>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let spec = match <Option<PortList> as serde::Deserialize>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(PortList::Spec(spec)) => spec,
        Some(PortList::Ports(ports)) => ports.iter().join(","),
    };
    parse_ports_and_ranges(&spec)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".spotter.toml");
    Some(config_path)
}
