//! Certificate transparency search.
use super::{in_scope, DiscoveryMethod, SubdomainSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{redirect, Client};
use serde_derive::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// crt.sh JSON search. `{domain}` is replaced with the target.
pub const CRT_SH: &str = "https://crt.sh/?q=%25.{domain}&output=json";

pub const CT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CtEntry {
    #[serde(default)]
    name_value: Option<String>,
}

pub struct CertTransparency {
    client: Client,
    endpoint: String,
}

impl CertTransparency {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(4))
            .timeout(CT_TIMEOUT)
            .build()
            .map_err(|e| Error::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn url(&self, domain: &str) -> String {
        self.endpoint.replace("{domain}", domain)
    }

    async fn query(&self, domain: &str) -> Result<String> {
        let url = self.url(domain);
        debug!("Querying certificate transparency at {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("{url} answered {status}")));
        }

        response.text().await.map_err(|e| Error::Upstream(e.to_string()))
    }
}

/// Pulls every in-scope name out of a crt.sh JSON body. One `name_value`
/// may hold several names separated by newlines.
pub fn parse_ct_names(body: &str, domain: &str) -> Result<BTreeSet<String>> {
    let entries: Vec<CtEntry> =
        serde_json::from_str(body).map_err(|e| Error::parse("certificate transparency JSON", e))?;

    Ok(entries
        .iter()
        .filter_map(|entry| entry.name_value.as_deref())
        .flat_map(str::lines)
        .filter_map(|name| in_scope(name, domain))
        .collect())
}

#[async_trait]
impl SubdomainSource for CertTransparency {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::CertTransparency
    }

    async fn discover(&self, domain: &str) -> BTreeSet<String> {
        match self
            .query(domain)
            .await
            .and_then(|body| parse_ct_names(&body, domain))
        {
            Ok(names) => names,
            Err(e) => {
                warn!("Certificate transparency check failed: {e}");
                BTreeSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const BODY: &str = r#"[
        {"issuer_name": "C=US, O=Let's Encrypt", "name_value": "example.com\nwww.example.com"},
        {"name_value": "*.example.com\napi.example.com\nAPI.example.com"},
        {"name_value": "mail.example.com"},
        {"name_value": "evil-example.com\nwww.example.org"},
        {"id": 42}
    ]"#;

    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0; 1024];
            let _ = stream.read(&mut request).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/?q=%25.{{domain}}&output=json")
    }

    #[test]
    fn names_are_split_and_filtered() {
        let names = parse_ct_names(BODY, "example.com").unwrap();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["API.example.com", "api.example.com", "mail.example.com", "www.example.com"]
        );
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert!(matches!(
            parse_ct_names("<html>rate limited</html>", "example.com"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn endpoint_template_is_filled() {
        let ct = CertTransparency::new(CRT_SH).unwrap();
        assert_eq!(
            ct.url("example.com"),
            "https://crt.sh/?q=%25.example.com&output=json"
        );
    }

    #[tokio::test]
    async fn names_come_back_from_endpoint() {
        let endpoint = serve_once("200 OK", BODY).await;
        let found = CertTransparency::new(endpoint)
            .unwrap()
            .discover("example.com")
            .await;
        assert_eq!(found.len(), 4);
    }

    #[tokio::test]
    async fn server_error_contributes_nothing() {
        let endpoint = serve_once("503 Service Unavailable", "[]").await;
        let found = CertTransparency::new(endpoint)
            .unwrap()
            .discover("example.com")
            .await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_contributes_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let found = CertTransparency::new(format!("http://{addr}/?q={{domain}}"))
            .unwrap()
            .discover("example.com")
            .await;
        assert!(found.is_empty());
    }
}
