use crate::config::Config;
use anyhow::{Context, Result};
use log::{debug, warn};
use quick_xml::de::from_str;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::thread;
use std::time::Duration;

/// Spacing between EUtils requests; ~3 req/s keeps within NCBI's
/// unauthenticated rate limit.
const RATE_LIMIT_DELAY: Duration = Duration::from_millis(350);

// EUtils XML payloads.

#[derive(Deserialize, Debug)]
struct ESearchResult {
    #[serde(rename = "IdList", default)]
    id_list: IdList,
}

#[derive(Deserialize, Debug, Default)]
struct IdList {
    #[serde(rename = "Id", default)]
    ids: Vec<String>,
}

/// Blocking EUtils client for the sequence retrieval service.
///
/// Transient HTTP failures are retried a small fixed number of times;
/// responses that parse but carry no results are returned as-is, since an
/// empty result is a valid outcome, not a transport fault.
pub struct NcbiClient {
    client: Client,
    base_url: String,
    email: Option<String>,
    api_key: Option<String>,
    attempts: u32,
    timeout: Duration,
}

impl NcbiClient {
    pub fn new(config: &Config) -> Self {
        NcbiClient {
            client: Client::new(),
            base_url: config.eutils_base_url.clone(),
            email: config.email.clone(),
            api_key: config.api_key.clone(),
            attempts: config.retrieval_attempts.max(1),
            timeout: config.tool_timeout,
        }
    }

    fn url(&self, endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}{}?", self.base_url, endpoint);
        let mut pairs: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), urlencode(v)))
            .collect();
        if let Some(email) = &self.email {
            pairs.push(("email".to_string(), urlencode(email)));
        }
        if let Some(key) = &self.api_key {
            pairs.push(("api_key".to_string(), urlencode(key)));
        }
        let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        url.push_str(&query.join("&"));
        url
    }

    /// GETs a URL with the fixed-attempt retry policy for transient errors.
    fn get_with_retries(&self, url: &str) -> Result<String> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            thread::sleep(RATE_LIMIT_DELAY);
            match self.try_get(url) {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(
                        "EUtils request failed (attempt {}/{}): {}",
                        attempt, self.attempts, e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("EUtils request made no attempts")))
    }

    fn try_get(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("Failed to send EUtils request to {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!(
                "EUtils request failed with status {}: {}",
                response.status(),
                response
                    .text()
                    .unwrap_or_else(|_| "<failed to read response body>".to_string())
            );
        }
        response.text().context("Failed to read EUtils response text")
    }

    /// Searches a database, returning the matching UID list.
    pub fn esearch(&self, db: &str, term: &str, retmax: usize) -> Result<Vec<String>> {
        let retmax = retmax.to_string();
        let url = self.url(
            "esearch.fcgi",
            &[("db", db), ("term", term), ("retmax", retmax.as_str())],
        );
        let body = self.get_with_retries(&url)?;
        let result: ESearchResult =
            from_str(&body).context("Failed to parse ESearch XML response")?;
        Ok(result.id_list.ids)
    }

    /// Resolves a free-text taxon name to `txid<N>` via the taxonomy
    /// database; `None` when the name is unknown.
    pub fn resolve_taxon(&self, taxon: &str) -> Result<Option<String>> {
        let ids = self.esearch("taxonomy", taxon, 1)?;
        Ok(ids.first().map(|id| format!("txid{}", id)))
    }

    /// Fetches FASTA text for protein UIDs or accessions.
    pub fn fetch_fasta(&self, ids: &[String]) -> Result<String> {
        if ids.is_empty() {
            return Ok(String::new());
        }
        let joined = ids.join(",");
        let url = self.url(
            "efetch.fcgi",
            &[
                ("db", "protein"),
                ("id", joined.as_str()),
                ("rettype", "fasta"),
                ("retmode", "text"),
            ],
        );
        self.get_with_retries(&url)
    }

    /// Fetches the accession list for protein UIDs, one per line.
    pub fn fetch_accessions(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let url = self.url(
            "efetch.fcgi",
            &[
                ("db", "protein"),
                ("id", joined.as_str()),
                ("rettype", "acc"),
                ("retmode", "text"),
            ],
        );
        let body = self.get_with_retries(&url)?;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Percent-encodes a query-string value.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esearch_xml_parses_id_list() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" ?>
<eSearchResult><Count>2</Count><RetMax>2</RetMax><RetStart>0</RetStart>
<IdList><Id>12345</Id><Id>67890</Id></IdList>
</eSearchResult>"#;
        let result: ESearchResult = from_str(xml).unwrap();
        assert_eq!(result.id_list.ids, vec!["12345", "67890"]);
    }

    #[test]
    fn esearch_xml_tolerates_empty_id_list() {
        let xml = r#"<eSearchResult><Count>0</Count><IdList/></eSearchResult>"#;
        let result: ESearchResult = from_str(xml).unwrap();
        assert!(result.id_list.ids.is_empty());
    }

    #[test]
    fn urlencode_escapes_query_expressions() {
        assert_eq!(
            urlencode("pyruvate kinase[PROT] AND txid8782[ORGN]"),
            "pyruvate+kinase%5BPROT%5D+AND+txid8782%5BORGN%5D"
        );
    }
}
