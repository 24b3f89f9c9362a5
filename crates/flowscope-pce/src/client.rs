use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

use flowscope_core::fetch::FlowSource;
use flowscope_core::models::{FlowQuery, FlowRecord, Label, LabelDirectory, Workload, WorkloadDirectory};
use flowscope_core::FlowError;

use crate::api::{ApiLabel, ApiWorkload, AsyncJob, TrafficFlow, TrafficQueryBody};
use crate::config::PceConfig;

const MAX_GET_RESULTS: &str = "100000";
const ASYNC_POLL_ATTEMPTS: u32 = 360;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Collection size reported by the PCE alongside a synchronous GET.
fn total_count(headers: &HeaderMap) -> Option<usize> {
    headers.get("x-total-count")?.to_str().ok()?.trim().parse().ok()
}

/// True when a synchronous page stopped short of `X-Total-Count`.
fn is_partial(total: Option<usize>, returned: usize) -> bool {
    total.is_some_and(|t| t > returned)
}

fn retry_after(headers: &HeaderMap) -> Duration {
    let secs = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs.clamp(1, 60))
}

fn href_url(api_root: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}{}", api_root, href)
    }
}

pub struct PceClient {
    config: PceConfig,
    http: reqwest::Client,
}

impl PceClient {
    pub fn new(config: PceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .danger_accept_invalid_certs(config.disable_tls_verification)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &PceConfig {
        &self.config
    }

    /// Authenticate, send, and fail on any non-success status.
    async fn send(&self, req: RequestBuilder, what: &str) -> Result<(HeaderMap, String)> {
        let resp = req
            .basic_auth(&self.config.user, Some(&self.config.key))
            .send()
            .await
            .with_context(|| format!("failed to reach PCE {}", self.config.display_name()))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("PCE API error ({}) on {}: {}", status, what, text);
        }
        Ok((headers, text))
    }

    /// GET a whole collection. Falls back to an async collection job when the
    /// synchronous page is shorter than `X-Total-Count`.
    async fn collection<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.config.base_url(), path);
        tracing::debug!(%url, "GET");
        let (headers, text) = self
            .send(self.http.get(&url).query(&[("max_results", MAX_GET_RESULTS)]), path)
            .await?;
        let items: Vec<T> = serde_json::from_str(&text)
            .with_context(|| format!("unexpected response from GET {}", path))?;

        let total = total_count(&headers);
        if !is_partial(total, items.len()) {
            return Ok(items);
        }
        tracing::info!(
            path,
            returned = items.len(),
            total = ?total,
            "synchronous GET capped, switching to async collection"
        );

        let items: Vec<T> = self.async_collection(&url, path).await?;
        if let Some(total) = total.filter(|t| items.len() < *t) {
            anyhow::bail!("GET {} returned {} of {} objects", path, items.len(), total);
        }
        Ok(items)
    }

    async fn async_collection<T: DeserializeOwned>(&self, url: &str, path: &str) -> Result<Vec<T>> {
        let (headers, _) = self
            .send(self.http.get(url).header("Prefer", "respond-async"), path)
            .await?;
        let job_href = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .with_context(|| format!("async GET {} returned no job location", path))?;

        let root = self.config.api_root();
        let mut wait = retry_after(&headers);
        for _ in 0..ASYNC_POLL_ATTEMPTS {
            tokio::time::sleep(wait).await;
            let (headers, text) = self
                .send(self.http.get(href_url(&root, &job_href)), &job_href)
                .await?;
            let job: AsyncJob = serde_json::from_str(&text)
                .with_context(|| format!("unexpected job status from {}", job_href))?;

            if job.is_failed() {
                anyhow::bail!("async GET {} failed on the PCE", path);
            }
            if job.is_done() {
                let result = job
                    .result
                    .with_context(|| format!("job {} finished without a result", job_href))?;
                let (_, text) = self
                    .send(self.http.get(href_url(&root, &result.href)), &result.href)
                    .await?;
                return serde_json::from_str(&text)
                    .with_context(|| format!("unexpected async result for GET {}", path));
            }
            tracing::debug!(job = %job_href, status = %job.status, "waiting on async collection");
            wait = retry_after(&headers);
        }
        anyhow::bail!("async GET {} did not finish after {} polls", path, ASYNC_POLL_ATTEMPTS)
    }

    pub async fn labels(&self) -> Result<LabelDirectory> {
        let labels: Vec<ApiLabel> = self.collection("/labels").await?;
        tracing::info!(count = labels.len(), "loaded labels");
        Ok(LabelDirectory::new(labels.into_iter().map(Label::from)))
    }

    pub async fn workloads(&self) -> Result<WorkloadDirectory> {
        let workloads: Vec<ApiWorkload> = self.collection("/workloads").await?;
        tracing::info!(count = workloads.len(), "loaded workloads");
        Ok(WorkloadDirectory::new(workloads.into_iter().map(Workload::from)))
    }

    pub async fn traffic(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>> {
        let url = format!(
            "{}/traffic_flows/traffic_analysis_queries",
            self.config.base_url()
        );
        let body = TrafficQueryBody::from(query);
        tracing::debug!(start = %body.start_date, end = %body.end_date, "traffic query");

        let (_, text) = self
            .send(self.http.post(&url).json(&body), "traffic query")
            .await?;

        let flows: Vec<TrafficFlow> =
            serde_json::from_str(&text).context("unexpected traffic query response")?;
        let mut records = Vec::with_capacity(flows.len());
        for flow in flows {
            match FlowRecord::try_from(flow) {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!(error = %e, "skipping flow"),
            }
        }
        Ok(records)
    }
}

impl FlowSource for PceClient {
    async fn query(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>, FlowError> {
        self.traffic(query)
            .await
            .map_err(|e| FlowError::TransportFailure(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_total_count_header() {
        assert_eq!(total_count(&headers(&[("x-total-count", "1234")])), Some(1234));
        assert_eq!(total_count(&headers(&[("x-total-count", "lots")])), None);
        assert_eq!(total_count(&HeaderMap::new()), None);
    }

    #[test]
    fn test_capped_page_is_partial() {
        assert!(is_partial(Some(1234), 500));
        assert!(!is_partial(Some(500), 500));
        assert!(!is_partial(Some(12), 12));
        assert!(!is_partial(None, 500));
    }

    #[test]
    fn test_retry_after_bounds() {
        assert_eq!(retry_after(&headers(&[("retry-after", "3")])), Duration::from_secs(3));
        assert_eq!(retry_after(&headers(&[("retry-after", "0")])), Duration::from_secs(1));
        assert_eq!(retry_after(&headers(&[("retry-after", "9000")])), Duration::from_secs(60));
        assert_eq!(retry_after(&HeaderMap::new()), Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
    }

    #[test]
    fn test_job_href_resolution() {
        let root = "https://pce.example.com:8443/api/v2";
        assert_eq!(
            href_url(root, "/orgs/1/jobs/9f"),
            "https://pce.example.com:8443/api/v2/orgs/1/jobs/9f"
        );
        assert_eq!(href_url(root, "https://other/x"), "https://other/x");
    }
}
