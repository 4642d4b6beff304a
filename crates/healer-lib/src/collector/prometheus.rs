//! Prometheus-backed signal collector
//!
//! One instant query per signal. Queries carry a `{node}` placeholder that
//! is replaced with the node name before the request is sent.

use super::SignalCollector;
use crate::error::{HealerError, Result};
use crate::models::{MetricName, SignalSet};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const NODE_PLACEHOLDER: &str = "{node}";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    /// `[unix_timestamp, "value"]`
    value: (f64, String),
}

pub struct PrometheusCollector {
    client: Client,
    query_url: Url,
    queries: Vec<(MetricName, String)>,
}

impl PrometheusCollector {
    pub fn new(
        base_url: &str,
        queries: impl IntoIterator<Item = (MetricName, String)>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid Prometheus URL: {base_url}"))?;
        let query_url = base
            .join("api/v1/query")
            .context("Failed to build Prometheus query URL")?;

        Ok(Self {
            client,
            query_url,
            queries: queries.into_iter().collect(),
        })
    }

    pub fn queries(&self) -> &[(MetricName, String)] {
        &self.queries
    }

    async fn query(&self, node: &str, metric: &MetricName, template: &str) -> Result<Option<f64>> {
        let promql = template.replace(NODE_PLACEHOLDER, node);
        let fail = |message: String| HealerError::collection(node, format!("{metric}: {message}"));

        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", promql.as_str())])
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;

        let status = response.status();
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| fail(format!("invalid response ({status}): {e}")))?;

        if body.status != "success" {
            return Err(fail(format!(
                "query failed: {}",
                body.error.unwrap_or_else(|| body.status.clone())
            )));
        }

        let Some(sample) = body.data.and_then(|d| d.result.into_iter().next()) else {
            debug!(node = %node, metric = %metric, "No samples returned");
            return Ok(None);
        };

        sample
            .value
            .1
            .parse::<f64>()
            .map(Some)
            .map_err(|e| fail(format!("unparseable sample {:?}: {e}", sample.value.1)))
    }
}

#[async_trait]
impl SignalCollector for PrometheusCollector {
    async fn collect(&self, node: &str) -> Result<SignalSet> {
        let values = try_join_all(
            self.queries
                .iter()
                .map(|(metric, template)| self.query(node, metric, template)),
        )
        .await?;

        let signals: SignalSet = self
            .queries
            .iter()
            .zip(values)
            .filter_map(|((metric, _), value)| value.map(|v| (metric.clone(), v)))
            .collect();

        debug!(node = %node, signals = signals.len(), "Signals collected");
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn vector(value: &str) -> String {
        format!(
            r#"{{"status":"success","data":{{"resultType":"vector","result":[{{"metric":{{"instance":"worker-1"}},"value":[1700000000.123,"{value}"]}}]}}}}"#
        )
    }

    const EMPTY: &str = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;

    fn collector(url: &str, queries: &[(&str, &str)]) -> PrometheusCollector {
        PrometheusCollector::new(
            url,
            queries
                .iter()
                .map(|(m, q)| (MetricName::from(*m), q.to_string())),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_collect_substitutes_node_name() {
        let mut server = mockito::Server::new_async().await;
        let io = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                r#"node_io_wait{node="worker-1"}"#.into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(vector("0.42"))
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                r#"node_drops{node="worker-1"}"#.into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(EMPTY)
            .create_async()
            .await;

        let collector = collector(
            &server.url(),
            &[
                (MetricName::DISK_IO_WAIT, r#"node_io_wait{node="{node}"}"#),
                (MetricName::NETWORK_DROPS, r#"node_drops{node="{node}"}"#),
            ],
        );
        let signals = collector.collect("worker-1").await.unwrap();

        io.assert_async().await;
        assert_eq!(signals.len(), 1);
        assert!((signals[&MetricName::from(MetricName::DISK_IO_WAIT)] - 0.42).abs() < 1e-9);
        assert!(!signals.contains_key(&MetricName::from(MetricName::NETWORK_DROPS)));
    }

    #[tokio::test]
    async fn test_server_error_is_collection_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let collector = collector(&server.url(), &[("kubelet_errors", "up")]);
        let err = collector.collect("worker-1").await.unwrap_err();

        assert!(matches!(err, HealerError::Collection { ref node, .. } if node == "worker-1"));
    }

    #[tokio::test]
    async fn test_query_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let collector = collector(&server.url(), &[("kubelet_errors", "rate(")]);
        let err = collector.collect("worker-1").await.unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn test_unreachable_prometheus() {
        // nothing listens on the discard port
        let collector = collector("http://127.0.0.1:9/", &[("kubelet_errors", "up")]);
        let err = collector.collect("worker-1").await.unwrap_err();
        assert_eq!(err.kind(), "collection");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(PrometheusCollector::new("not a url", Vec::new(), Duration::from_secs(1)).is_err());
    }
}
