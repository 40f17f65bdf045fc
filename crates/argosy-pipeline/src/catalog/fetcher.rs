//! Remote catalog retrieval
//!
//! The archive publishes one HTML directory listing per (region, year)
//! whose anchors point at per-basin inventory files (`*_argoinv.txt`).
//! Each inventory file is a CSV document listing the archives for that
//! basin. Fetching is a pure read: repeated calls for the same selector
//! observe the same remote state and return the same entries.

use crate::config::{PipelineConfig, USER_AGENT};
use crate::error::{PipelineError, Result};
use crate::types::{IndexEntry, Selector};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector as CssSelector};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Result of one catalog fetch
#[derive(Debug, Clone)]
pub struct CatalogFetch {
    /// Parsed entries, deduplicated by key, in key order
    pub entries: Vec<IndexEntry>,
    /// Inventory files the listing pointed at
    pub inventory_files: usize,
    /// Rows skipped because they failed to parse
    pub rejected_rows: usize,
}

/// HTTP client for the remote catalog
pub struct CatalogClient {
    client: Client,
    base_url: String,
}

impl CatalogClient {
    /// Create a new client from pipeline configuration
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate().map_err(PipelineError::Validation)?;

        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.catalog_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch and parse the full catalog for a selector
    ///
    /// Fails with `CatalogUnavailable` when the listing or an inventory
    /// file cannot be retrieved, and with `CatalogParse` when retrieval
    /// succeeds but not a single entry survives parsing. Individual
    /// malformed rows are skipped and counted.
    pub async fn fetch(&self, selector: Selector) -> Result<CatalogFetch> {
        let listing_url = format!("{}/{}/{}/", self.base_url, selector.region, selector.year);
        info!(selector = %selector, url = %listing_url, "fetching catalog listing");

        let html = self.get_text(&listing_url).await?;
        let files = parse_inventory_links(&html)?;

        if files.is_empty() {
            return Err(PipelineError::CatalogUnavailable(format!(
                "no inventory files listed at {}",
                listing_url
            )));
        }

        let mut entries: BTreeMap<_, IndexEntry> = BTreeMap::new();
        let mut rejected_rows = 0usize;

        for href in &files {
            let url = join_url(&listing_url, href);
            debug!(url = %url, "fetching inventory file");
            let text = self.get_text(&url).await?;

            let (rows, rejected) = parse_inventory(&text, selector);
            rejected_rows += rejected;
            for entry in rows {
                entries.insert(entry.key(), entry);
            }
        }

        if entries.is_empty() {
            return Err(PipelineError::CatalogParse(format!(
                "no parseable inventory entries for {} ({} rows rejected)",
                selector, rejected_rows
            )));
        }

        if rejected_rows > 0 {
            warn!(
                selector = %selector,
                rejected = rejected_rows,
                "some inventory rows failed to parse and were skipped"
            );
        }

        info!(
            selector = %selector,
            entries = entries.len(),
            inventory_files = files.len(),
            rejected = rejected_rows,
            "catalog fetch complete"
        );

        Ok(CatalogFetch {
            entries: entries.into_values().collect(),
            inventory_files: files.len(),
            rejected_rows,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::CatalogUnavailable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::CatalogUnavailable(format!(
                "{}: HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| PipelineError::CatalogUnavailable(format!("{}: {}", url, e)))
    }
}

/// Extract inventory file hrefs from a directory listing page
///
/// Apache, nginx and S3 front-ends render listings differently; anchors
/// are the common denominator.
fn parse_inventory_links(html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let link_selector =
        CssSelector::parse("a").map_err(|e| PipelineError::CatalogParse(e.to_string()))?;
    let inventory_pattern = Regex::new(r"_argoinv\.txt$")?;

    let mut files = Vec::new();
    for element in document.select(&link_selector) {
        if let Some(href) = element.value().attr("href") {
            if inventory_pattern.is_match(href) {
                files.push(href.to_string());
            }
        }
    }

    Ok(files)
}

/// Resolve an anchor href against the listing URL
fn join_url(listing_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}{}", listing_url, href.trim_start_matches('/'))
    }
}

/// Raw inventory row as present in the CSV, before validation
#[derive(Debug, Deserialize)]
struct InventoryRow {
    #[serde(alias = "platform", alias = "platform_number")]
    platform_id: String,
    #[serde(alias = "cycle", alias = "cycle_number")]
    cycle_number: i32,
    #[serde(alias = "file", alias = "file_path")]
    remote_path: String,
    #[serde(default, alias = "file_size", alias = "size")]
    size_bytes: Option<i64>,
    #[serde(default, alias = "sha256")]
    checksum: Option<String>,
}

impl InventoryRow {
    fn into_entry(self, selector: Selector) -> std::result::Result<IndexEntry, String> {
        let platform_id = self.platform_id.trim().to_string();
        if platform_id.is_empty() {
            return Err("empty platform id".to_string());
        }
        if self.cycle_number < 0 {
            return Err(format!("negative cycle number {}", self.cycle_number));
        }

        let remote_path = normalize_remote_path(&self.remote_path);
        if remote_path.is_empty() {
            return Err("empty archive path".to_string());
        }

        Ok(IndexEntry {
            region: selector.region,
            year: selector.year,
            platform_id,
            cycle_number: self.cycle_number,
            remote_path,
            size_bytes: self.size_bytes.filter(|len| *len >= 0),
            checksum: self
                .checksum
                .map(|sum| sum.trim().to_lowercase())
                .filter(|sum| !sum.is_empty()),
        })
    }
}

/// Parse one inventory CSV document; malformed rows are counted, not fatal
fn parse_inventory(text: &str, selector: Selector) -> (Vec<IndexEntry>, usize) {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut entries = Vec::new();
    let mut rejected = 0usize;

    for row in reader.deserialize::<InventoryRow>() {
        match row {
            Ok(raw) => match raw.into_entry(selector) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    rejected += 1;
                    debug!(reason = %reason, "skipping inventory row");
                }
            },
            Err(e) => {
                rejected += 1;
                debug!(error = %e, "skipping malformed inventory row");
            }
        }
    }

    (entries, rejected)
}

/// Normalize an inventory archive path
///
/// The upstream inventories occasionally prefix paths with the `data/`
/// root segment (which the data base URL already carries) and contain a
/// known `.nnc` extension typo.
pub fn normalize_remote_path(path: &str) -> String {
    let mut cleaned = path.trim().trim_start_matches('/').to_string();

    if let Some(stripped) = cleaned.strip_prefix("data/") {
        cleaned = stripped.to_string();
    }

    if let Some(stripped) = cleaned.strip_suffix(".nnc") {
        cleaned = format!("{}.nc", stripped);
    }

    cleaned
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Region;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING_HTML: &str = r#"<html><body><h1>Index of /inv/atlantic/2020</h1><pre>
<a href="../">../</a>
<a href="atlantic_argoinv.txt">atlantic_argoinv.txt</a>
<a href="atlantic_aoml_argoinv.txt">atlantic_aoml_argoinv.txt</a>
<a href="readme.html">readme.html</a>
</pre></body></html>"#;

    const INVENTORY_CSV: &str = "\
platform_number,cycle_number,file_path,size_bytes,checksum
4900562,12,data/aoml/4900562/profiles/R4900562_012.nnc,184320,
1900722,3,aoml/1900722/profiles/R1900722_003.nc,,abcdef0123456789
bad-row,not-a-number,aoml/broken.nc,,
";

    fn selector() -> Selector {
        Selector::new(Region::Atlantic, 2020).unwrap()
    }

    #[test]
    fn test_normalize_remote_path() {
        assert_eq!(
            normalize_remote_path("data/aoml/4900562/profiles/R4900562_012.nc"),
            "aoml/4900562/profiles/R4900562_012.nc"
        );
        assert_eq!(
            normalize_remote_path("/aoml/4900562/profiles/R4900562_012.nnc"),
            "aoml/4900562/profiles/R4900562_012.nc"
        );
        assert_eq!(normalize_remote_path("  aoml/x.nc "), "aoml/x.nc");
    }

    #[test]
    fn test_parse_inventory_links_filters_anchors() {
        let files = parse_inventory_links(LISTING_HTML).unwrap();
        assert_eq!(
            files,
            vec![
                "atlantic_argoinv.txt".to_string(),
                "atlantic_aoml_argoinv.txt".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_inventory_skips_malformed_rows() {
        let (entries, rejected) = parse_inventory(INVENTORY_CSV, selector());
        assert_eq!(entries.len(), 2);
        assert_eq!(rejected, 1);

        assert_eq!(entries[0].platform_id, "4900562");
        assert_eq!(entries[0].cycle_number, 12);
        assert_eq!(entries[0].remote_path, "aoml/4900562/profiles/R4900562_012.nc");
        assert_eq!(entries[0].size_bytes, Some(184320));
        assert_eq!(entries[0].checksum, None);

        assert_eq!(entries[1].size_bytes, None);
        assert_eq!(entries[1].checksum.as_deref(), Some("abcdef0123456789"));
    }

    #[test]
    fn test_parse_inventory_all_rows_bad() {
        let (entries, rejected) = parse_inventory(
            "platform_number,cycle_number,file_path\nx,-1,aoml/a.nc\n,3,aoml/b.nc\n",
            selector(),
        );
        assert!(entries.is_empty());
        assert_eq!(rejected, 2);
    }

    fn test_config(base: &str) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.catalog_base_url = format!("{}/inv", base);
        config
    }

    #[tokio::test]
    async fn test_fetch_parses_listing_and_inventories() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/inv/atlantic/2020/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING_HTML))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/inv/atlantic/2020/atlantic_argoinv.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INVENTORY_CSV))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/inv/atlantic/2020/atlantic_aoml_argoinv.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "platform_number,cycle_number,file_path\n1900722,3,aoml/1900722/profiles/R1900722_003.nc\n",
            ))
            .mount(&server)
            .await;

        let client = CatalogClient::new(&test_config(&server.uri())).unwrap();
        let fetch = client.fetch(selector()).await.unwrap();

        // The duplicate (1900722, 3) key across the two inventories collapses
        assert_eq!(fetch.entries.len(), 2);
        assert_eq!(fetch.inventory_files, 2);
        assert_eq!(fetch.rejected_rows, 1);
        assert!(fetch.entries.iter().all(|e| e.region == Region::Atlantic));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_listing_is_catalog_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/inv/atlantic/2020/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = CatalogClient::new(&test_config(&server.uri())).unwrap();
        let err = client.fetch(selector()).await.unwrap_err();
        assert!(matches!(err, PipelineError::CatalogUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_with_no_entries_is_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/inv/atlantic/2020/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="empty_argoinv.txt">empty_argoinv.txt</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/inv/atlantic/2020/empty_argoinv.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("platform_number,cycle_number,file_path\n"),
            )
            .mount(&server)
            .await;

        let client = CatalogClient::new(&test_config(&server.uri())).unwrap();
        let err = client.fetch(selector()).await.unwrap_err();
        assert!(matches!(err, PipelineError::CatalogParse(_)));
    }
}
