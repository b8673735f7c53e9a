//! Fetching validated ROA payloads.
//!
//! The cache is fed from JSON documents produced by upstream RPKI
//! validators, the `{"roas": [...]}` format published by e.g. the
//! Cloudflare and rpki-client validators. All configured URLs are fetched
//! concurrently; a source that fails only costs its own records. The raw
//! record list this module yields still contains duplicates across
//! sources, deduplication is the store's job.

use std::net::IpAddr;
use std::time::Duration;
use futures::future;
use log::{info, warn};
use serde::Deserialize;
use crate::payload::Roa;


//------------ Configuration Constants ---------------------------------------

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);


//------------ VRP Documents -------------------------------------------------

/// The top level of a VRP JSON document. Unknown fields are ignored.
#[derive(Clone, Debug, Deserialize)]
struct VrpDocument {
    roas: Vec<VrpRecord>,
}

#[derive(Clone, Debug, Deserialize)]
struct VrpRecord {
    prefix: String,
    #[serde(rename = "maxLength")]
    max_length: u8,
    asn: AsnValue,
}

/// The two ASN encodings observed in the wild: a bare number or a string
/// carrying an `AS` prefix.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum AsnValue {
    Number(u32),
    Text(String),
}

impl AsnValue {
    fn normalize(&self) -> u32 {
        match *self {
            AsnValue::Number(asn) => asn,
            AsnValue::Text(ref text) => parse_asn(text),
        }
    }
}


//------------ IngestError ---------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("building HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("all VRP sources failed")]
    AllSourcesFailed,
}


//------------ Fetcher -------------------------------------------------------

/// Fetches and decodes the configured VRP sources.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl Fetcher {
    pub fn new(urls: Vec<String>) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(IngestError::Client)?;
        Ok(Fetcher { client, urls })
    }

    /// Fetches every source concurrently and returns the combined records.
    ///
    /// A failing source is logged and skipped. Only if every source failed
    /// does the whole operation fail, so a single bad URL never wipes the
    /// cache.
    pub async fn fetch_all(&self) -> Result<Vec<Roa>, IngestError> {
        let results = future::join_all(
            self.urls.iter().map(|url| self.fetch_one(url))
        ).await;
        let mut roas = Vec::new();
        let mut failed = 0;
        for (url, result) in self.urls.iter().zip(results) {
            match result {
                Ok(records) => {
                    info!("{} ROAs from {}", records.len(), url);
                    roas.extend(records);
                }
                Err(err) => {
                    warn!("unable to retrieve ROAs: {}", err);
                    failed += 1;
                }
            }
        }
        if failed == self.urls.len() {
            return Err(IngestError::AllSourcesFailed)
        }
        Ok(roas)
    }

    async fn fetch_one(&self, url: &str) -> Result<Vec<Roa>, IngestError> {
        let document = self.client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|source| IngestError::Fetch {
                url: url.into(), source
            })?
            .json::<VrpDocument>()
            .await
            .map_err(|source| IngestError::Fetch {
                url: url.into(), source
            })?;
        Ok(roas_from_document(document))
    }
}

/// Turns decoded records into raw ROAs, dropping unparseable prefixes.
fn roas_from_document(document: VrpDocument) -> Vec<Roa> {
    let mut roas = Vec::with_capacity(document.roas.len());
    for record in document.roas {
        match parse_prefix(&record.prefix) {
            Some((addr, prefix_len)) => {
                roas.push(Roa::new(
                    addr, prefix_len, record.max_length,
                    record.asn.normalize()
                ));
            }
            None => {
                warn!(
                    "dropping VRP with unparseable prefix {:?}",
                    record.prefix
                );
            }
        }
    }
    roas
}

/// Parses CIDR notation into an address and a prefix length.
fn parse_prefix(prefix: &str) -> Option<(IpAddr, u8)> {
    let (addr, len) = prefix.split_once('/')?;
    Some((addr.parse().ok()?, len.parse().ok()?))
}

/// Parses the ASN out of a string such as `"AS13335"`.
///
/// Any leading run of non-digit characters is stripped before parsing.
/// Anything that still fails to parse as a 32 bit number yields zero with
/// a logged warning.
pub fn parse_asn(text: &str) -> u32 {
    let digits = text.trim_start_matches(|c: char| !c.is_ascii_digit());
    match digits.parse::<u32>() {
        Ok(asn) => asn,
        Err(_) => {
            warn!("unable to parse ASN {:?}", text);
            0
        }
    }
}


//============ Tests =========================================================
