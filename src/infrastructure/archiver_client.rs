// Archiver Appliance HTTP client
//
// Builds retrieval URLs (operator/bin-interval encoding), resolves PV
// name patterns through the archiver's name search, and issues batched
// GET requests with one physical request per unique URL per batch.
use crate::application::archive_repository::ArchiveRepository;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::pattern::parse_target_pv;
use crate::domain::record::{ArchiveRecord, RecordMeta, Sample, SampleValue};
use crate::domain::target::{OPERATOR_LIST, TargetQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ArchiverClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    meta: RawMeta,
    #[serde(default)]
    data: Vec<RawSample>,
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    name: String,
    #[serde(default)]
    waveform: bool,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    millis: i64,
    val: serde_json::Value,
}

impl ArchiverClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Retrieval URL for one PV. Operator and interval select the PV
    /// expression: raw/last and sub-second intervals use the bare name,
    /// an empty operator defaults to mean binning, and anything outside
    /// the operator list is rejected. `last` asks for a zero-width
    /// window ending at `to`.
    pub fn build_data_url(
        &self,
        pvname: &str,
        operator: &str,
        interval: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> GatewayResult<String> {
        let pv = if operator == "raw" || operator == "last" || interval.is_empty() {
            pvname.to_string()
        } else if operator.is_empty() {
            format!("mean_{}({})", interval, pvname)
        } else if OPERATOR_LIST.contains(&operator) {
            format!("{}_{}({})", operator, interval, pvname)
        } else {
            return Err(GatewayError::InvalidOperator(operator.to_string()));
        };

        let from = if operator == "last" { to } else { from };

        // Parentheses of the operator expression stay literal; the
        // archiver expects them unescaped.
        let pv = urlencoding::encode(&pv)
            .replace("%28", "(")
            .replace("%29", ")");

        Ok(format!(
            "{}/data/getData.qw?pv={}&from={}&to={}",
            self.base_url,
            pv,
            iso_millis(from),
            iso_millis(to),
        ))
    }

    async fn get(&self, url: &str) -> GatewayResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Backend(format!(
                "status {}: {}",
                status, body
            )));
        }

        Ok(response)
    }

    async fn fetch_records(&self, url: &str) -> GatewayResult<Vec<ArchiveRecord>> {
        let response = self.get(url).await?;
        let records = response
            .json::<Vec<RawRecord>>()
            .await
            .map_err(|e| GatewayError::Backend(format!("malformed response: {}", e)))?;

        Ok(records.into_iter().map(convert_record).collect())
    }
}

fn iso_millis(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Decode a wire record, keeping only numeric samples.
fn convert_record(raw: RawRecord) -> ArchiveRecord {
    let samples = raw
        .data
        .into_iter()
        .filter_map(|sample| {
            let value = convert_value(&sample.val)?;
            Some(Sample {
                millis: sample.millis,
                value,
            })
        })
        .collect();

    ArchiveRecord {
        meta: RecordMeta {
            name: raw.meta.name,
            waveform: raw.meta.waveform,
        },
        samples,
    }
}

fn convert_value(val: &serde_json::Value) -> Option<SampleValue> {
    if let Some(v) = val.as_f64() {
        return Some(SampleValue::Scalar(v));
    }

    let array = val.as_array()?;
    let numbers: Vec<f64> = array.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.len() != array.len() {
        return None;
    }
    Some(SampleValue::Array(numbers))
}

#[async_trait]
impl ArchiveRepository for ArchiverClient {
    async fn build_urls(&self, target: &TargetQuery) -> GatewayResult<Vec<String>> {
        let max_num_pvs = target.max_num_pvs();
        let bin_interval = target.bin_interval().to_string();

        let target_pvs = parse_target_pv(&target.target);

        // Literal targets resolve directly; regex targets go through the
        // archiver's name search, one request per expanded pattern.
        let mut pvnames = Vec::new();
        if target.regex {
            let searches = futures::future::join_all(
                target_pvs
                    .iter()
                    .map(|pv| self.find_pv_names(pv, max_num_pvs)),
            )
            .await;
            for result in searches {
                pvnames.extend(result?);
            }
        } else {
            pvnames = target_pvs;
        }

        let mut seen = HashSet::new();
        pvnames.retain(|name| seen.insert(name.clone()));
        pvnames.truncate(max_num_pvs);

        tracing::debug!(
            "target {} resolved to {} PV names",
            target.ref_id,
            pvnames.len()
        );

        pvnames
            .iter()
            .map(|pvname| {
                self.build_data_url(
                    pvname,
                    &target.operator,
                    &bin_interval,
                    target.from,
                    target.to,
                )
            })
            .collect()
    }

    async fn fetch_deduped(
        &self,
        urls_array: Vec<Vec<String>>,
    ) -> Vec<Vec<GatewayResult<Vec<ArchiveRecord>>>> {
        // One request per unique URL, first-seen order; several targets
        // naming the same PV/operator/interval share one response.
        let mut unique = Vec::new();
        let mut seen = HashSet::new();
        for url in urls_array.iter().flatten() {
            if seen.insert(url.clone()) {
                unique.push(url.clone());
            }
        }

        let results =
            futures::future::join_all(unique.iter().map(|url| self.fetch_records(url))).await;
        let by_url: HashMap<String, GatewayResult<Vec<ArchiveRecord>>> =
            unique.into_iter().zip(results).collect();

        urls_array
            .iter()
            .map(|urls| urls.iter().map(|url| by_url[url].clone()).collect())
            .collect()
    }

    async fn find_pv_names(&self, pattern: &str, limit: usize) -> GatewayResult<Vec<String>> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/bpl/getMatchingPVs?limit={}&regex={}",
            self.base_url,
            limit,
            urlencoding::encode(pattern),
        );

        let response = self.get(&url).await?;
        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| GatewayError::Backend(format!("malformed response: {}", e)))
    }

    async fn get_version(&self) -> GatewayResult<String> {
        let url = format!("{}/bpl/getVersion", self.base_url);
        let response = self.get(&url).await?;
        response
            .text()
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client() -> ArchiverClient {
        ArchiverClient::new("http://localhost:17665/retrieval/".to_string())
    }

    fn range() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2010, 1, 1, 0, 30, 0).unwrap(),
        )
    }

    #[test]
    fn test_build_data_url_with_operator_and_interval() {
        let (from, to) = range();
        let url = client()
            .build_data_url("PV1", "mean", "9", from, to)
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:17665/retrieval/data/getData.qw?pv=mean_9(PV1)\
             &from=2010-01-01T00:00:00.000Z&to=2010-01-01T00:30:00.000Z"
        );
    }

    #[test]
    fn test_build_data_url_defaults_to_mean() {
        let (from, to) = range();
        let url = client().build_data_url("PV1", "", "9", from, to).unwrap();
        assert!(url.contains("pv=mean_9(PV1)"));
    }

    #[test]
    fn test_build_data_url_raw_and_empty_interval() {
        let (from, to) = range();
        let url = client().build_data_url("PV1", "raw", "9", from, to).unwrap();
        assert!(url.contains("pv=PV1&"));

        let url = client().build_data_url("PV1", "max", "", from, to).unwrap();
        assert!(url.contains("pv=PV1&"));
    }

    #[test]
    fn test_build_data_url_last_sends_to_as_from() {
        let (from, to) = range();
        let url = client()
            .build_data_url("PV1", "last", "9", from, to)
            .unwrap();
        assert!(url.contains("from=2010-01-01T00:30:00.000Z"));
        assert!(url.contains("to=2010-01-01T00:30:00.000Z"));
    }

    #[test]
    fn test_build_data_url_invalid_operator() {
        let (from, to) = range();
        assert!(matches!(
            client().build_data_url("PV1", "bogus", "9", from, to),
            Err(GatewayError::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_convert_record_scalar_and_skips_non_numeric() {
        let raw: RawRecord = serde_json::from_value(serde_json::json!({
            "meta": { "name": "PV" },
            "data": [
                { "millis": 1000, "val": 1.5 },
                { "millis": 2000, "val": "offline" },
                { "millis": 3000, "val": 3 },
            ],
        }))
        .unwrap();

        let record = convert_record(raw);
        assert!(!record.meta.waveform);
        assert_eq!(record.samples.len(), 2);
        assert_eq!(record.samples[0].value, SampleValue::Scalar(1.5));
        assert_eq!(record.samples[1].millis, 3000);
    }

    #[test]
    fn test_convert_record_waveform() {
        let raw: RawRecord = serde_json::from_value(serde_json::json!({
            "meta": { "name": "PV", "waveform": true },
            "data": [ { "millis": 1000, "val": [1, 2, 3] } ],
        }))
        .unwrap();

        let record = convert_record(raw);
        assert!(record.meta.waveform);
        assert_eq!(
            record.samples[0].value,
            SampleValue::Array(vec![1.0, 2.0, 3.0])
        );
    }

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pattern_target(target: &str) -> TargetQuery {
        let (from, to) = range();
        TargetQuery {
            target: target.to_string(),
            ref_id: "A".to_string(),
            hide: false,
            alias: String::new(),
            alias_pattern: String::new(),
            operator: String::new(),
            regex: false,
            functions: Vec::new(),
            options: HashMap::new(),
            from,
            to,
            interval: String::new(),
            stream: false,
            strm_int: String::new(),
            strm_cap: String::new(),
        }
    }

    #[tokio::test]
    async fn test_fetch_deduped_issues_one_request_per_unique_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/getData.qw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "meta": { "name": "PV1" }, "data": [ { "millis": 1000, "val": 1.0 } ] }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArchiverClient::new(server.uri());
        let url = format!("{}/data/getData.qw?pv=PV1", server.uri());

        // Two targets referencing the same URL observe one request.
        let results = client
            .fetch_deduped(vec![vec![url.clone()], vec![url]])
            .await;

        assert_eq!(results.len(), 2);
        for target_results in &results {
            let records = target_results[0].as_ref().unwrap();
            assert_eq!(records[0].meta.name, "PV1");
            assert_eq!(records[0].samples.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_build_urls_expands_pattern() {
        let server = MockServer::start().await;
        let client = ArchiverClient::new(server.uri());

        let urls = client
            .build_urls(&pattern_target("PV:(A|B):VAL"))
            .await
            .unwrap();

        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("pv=PV%3AA%3AVAL"));
        assert!(urls[1].contains("pv=PV%3AB%3AVAL"));
    }

    #[tokio::test]
    async fn test_build_urls_regex_target_searches_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bpl/getMatchingPVs"))
            .and(query_param("regex", "PV:.*"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!(["PV:A", "PV:B", "PV:A"])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ArchiverClient::new(server.uri());
        let mut target = pattern_target("PV:.*");
        target.regex = true;

        let urls = client.build_urls(&target).await.unwrap();

        // Duplicate search hits collapse, first occurrence order kept.
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("pv=PV%3AA"));
        assert!(urls[1].contains("pv=PV%3AB"));
    }

    #[tokio::test]
    async fn test_build_urls_truncates_to_max_num_pvs() {
        let server = MockServer::start().await;
        let client = ArchiverClient::new(server.uri());

        let mut target = pattern_target("PV:(A|B|C):VAL");
        target
            .options
            .insert("maxNumPVs".to_string(), "2".to_string());

        let urls = client.build_urls(&target).await.unwrap();
        assert_eq!(urls.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_records_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bpl/getVersion"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = ArchiverClient::new(server.uri());
        assert!(matches!(
            client.get_version().await,
            Err(GatewayError::Backend(_))
        ));
    }
}
