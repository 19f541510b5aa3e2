// Query orchestrator - composes URL building, retrieval, parsing,
// alias substitution and function application per target
use crate::application::archive_repository::ArchiveRepository;
use crate::application::response::parse_response;
use crate::application::transform::apply_function_defs;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::frame::Frame;
use crate::domain::functions::{FunctionDescriptor, get_options, resolve_func_descriptor};
use crate::domain::pattern::parse_target_pv;
use crate::domain::target::TargetQuery;
use crate::infrastructure::config::substitute;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_MAX_DATA_POINTS: i64 = 2000;
const DEFAULT_FIND_LIMIT: usize = 100;

/// Raw query model as posted by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub range: TimeRange,
    #[serde(default)]
    pub interval_ms: Option<i64>,
    #[serde(default)]
    pub max_data_points: Option<i64>,
    #[serde(default)]
    pub scoped_vars: HashMap<String, String>,
    #[serde(default)]
    pub targets: Vec<RawTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTarget {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub hide: bool,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub alias_pattern: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub functions: Vec<RawFunction>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub strm_int: String,
    #[serde(default)]
    pub strm_cap: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFunction {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Clone)]
pub struct QueryService {
    repository: Arc<dyn ArchiveRepository>,
}

impl QueryService {
    pub fn new(repository: Arc<dyn ArchiveRepository>) -> Self {
        Self { repository }
    }

    /// Build target queries from a raw request: hidden and empty targets
    /// are dropped, template variables substituted, functions resolved
    /// against the registry and the bin interval computed from the range
    /// and requested point count.
    pub fn build_target_queries(&self, request: &QueryRequest) -> GatewayResult<Vec<TargetQuery>> {
        let from = request.range.from;
        let to = request.range.to;
        let range_msec = (to - from).num_milliseconds();
        let max_data_points = request.max_data_points.unwrap_or(DEFAULT_MAX_DATA_POINTS);
        let interval_sec = range_msec / (max_data_points.max(1) * 1000);

        request
            .targets
            .iter()
            .filter(|t| !t.hide && !t.target.is_empty())
            .map(|raw| {
                let functions = raw
                    .functions
                    .iter()
                    .map(|f| {
                        let params = f
                            .params
                            .iter()
                            .map(|p| substitute(p, &request.scoped_vars))
                            .collect();
                        resolve_func_descriptor(&f.name, Some(params))
                    })
                    .collect::<GatewayResult<Vec<FunctionDescriptor>>>()?;

                let options = get_options(&functions);
                let interval = if interval_sec >= 1 {
                    interval_sec.to_string()
                } else if options.get("disableAutoRaw").map(String::as_str) == Some("true") {
                    "1".to_string()
                } else {
                    String::new()
                };

                Ok(TargetQuery {
                    target: substitute(&raw.target, &request.scoped_vars),
                    ref_id: raw.ref_id.clone(),
                    hide: raw.hide,
                    alias: substitute(&raw.alias, &request.scoped_vars),
                    alias_pattern: raw.alias_pattern.clone(),
                    operator: substitute(&raw.operator, &request.scoped_vars),
                    regex: raw.regex,
                    functions,
                    options,
                    from,
                    to,
                    interval,
                    stream: raw.stream,
                    strm_int: substitute(&raw.strm_int, &request.scoped_vars),
                    strm_cap: substitute(&raw.strm_cap, &request.scoped_vars),
                })
            })
            .collect()
    }

    /// Run the full pipeline for a set of targets. Targets are processed
    /// independently; the result vector is positional, so one failed
    /// target does not disturb the others.
    pub async fn do_query(&self, targets: &[TargetQuery]) -> Vec<GatewayResult<Vec<Frame>>> {
        let url_results = futures::future::join_all(
            targets.iter().map(|t| self.repository.build_urls(t)),
        )
        .await;

        // Fetch with cross-target URL dedup; failed URL builds keep an
        // empty slot so positions stay aligned.
        let urls_array: Vec<Vec<String>> = url_results
            .iter()
            .map(|r| r.as_ref().cloned().unwrap_or_default())
            .collect();
        let mut responses = self.repository.fetch_deduped(urls_array).await;

        targets
            .iter()
            .zip(url_results)
            .zip(responses.drain(..))
            .map(|((target, urls), url_responses)| {
                urls?;
                let batches = url_responses
                    .into_iter()
                    .collect::<GatewayResult<Vec<_>>>()?;
                self.target_process(batches, target)
            })
            .collect()
    }

    /// As `do_query`, but failing the whole call on the first error.
    pub async fn do_query_flat(&self, targets: &[TargetQuery]) -> GatewayResult<Vec<Frame>> {
        let results = self.do_query(targets).await;
        let mut frames = Vec::new();
        for result in results {
            frames.extend(result?);
        }
        Ok(frames)
    }

    fn target_process(
        &self,
        batches: Vec<Vec<crate::domain::record::ArchiveRecord>>,
        target: &TargetQuery,
    ) -> GatewayResult<Vec<Frame>> {
        let frames = parse_response(batches, target)?;
        let frames = set_alias(frames, target)?;
        apply_function_defs(&target.functions, frames)
    }

    /// PV name lookup for variable queries. The pattern may carry a
    /// `?limit=N` suffix; alternation groups are expanded before the
    /// search.
    pub async fn find_pv_names(&self, query: &str, vars: &HashMap<String, String>) -> GatewayResult<Vec<String>> {
        let replaced = substitute(query, vars);
        let (pv_query, params_query) = match replaced.split_once('?') {
            Some((pv, params)) => (pv, Some(params)),
            None => (replaced.as_str(), None),
        };

        let limit = params_query
            .and_then(|params| {
                params
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("limit="))
                    .and_then(|v| v.parse::<usize>().ok())
            })
            .unwrap_or(DEFAULT_FIND_LIMIT);

        let searches = parse_target_pv(pv_query);
        let results = futures::future::join_all(
            searches
                .iter()
                .map(|pattern| self.repository.find_pv_names(pattern, limit)),
        )
        .await;

        let mut names = Vec::new();
        for result in results {
            names.extend(result?);
        }
        let mut seen = std::collections::HashSet::new();
        names.retain(|name| seen.insert(name.clone()));
        names.truncate(limit);
        Ok(names)
    }

    pub async fn get_version(&self) -> GatewayResult<String> {
        self.repository.get_version().await
    }
}

/// Rename value fields: a flat rename, or a capture-group rewrite of the
/// display label when an alias pattern is present.
pub fn set_alias(frames: Vec<Frame>, target: &TargetQuery) -> GatewayResult<Vec<Frame>> {
    if target.alias.is_empty() {
        return Ok(frames);
    }

    let pattern = if target.alias_pattern.is_empty() {
        None
    } else {
        Some(Regex::new(&target.alias_pattern)?)
    };

    let frames = frames
        .into_iter()
        .map(|mut frame| {
            for field in &mut frame.fields {
                if field.is_time() || field.name == "index" {
                    continue;
                }
                let alias = match &pattern {
                    Some(regex) => regex
                        .replace(field.display_label(), target.alias.as_str())
                        .into_owned(),
                    None => target.alias.clone(),
                };
                field.display_name = Some(alias);
            }
            frame
        })
        .collect();

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame::Field;
    use chrono::TimeZone;

    fn test_target(alias: &str, alias_pattern: &str) -> TargetQuery {
        TargetQuery {
            target: "PV".to_string(),
            ref_id: "A".to_string(),
            hide: false,
            alias: alias.to_string(),
            alias_pattern: alias_pattern.to_string(),
            operator: String::new(),
            regex: false,
            functions: Vec::new(),
            options: HashMap::new(),
            from: Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2010, 1, 1, 0, 30, 0).unwrap(),
            interval: String::new(),
            stream: false,
            strm_int: String::new(),
            strm_cap: String::new(),
        }
    }

    fn named_frame(display: &str) -> Frame {
        Frame::new(
            Some(display.to_string()),
            Some("A".to_string()),
            vec![
                Field::time(vec![1]),
                Field::number_with_display("value".to_string(), display.to_string(), vec![1.0]),
            ],
        )
    }

    #[test]
    fn test_set_alias_flat_rename() {
        let target = test_target("renamed", "");
        let frames = set_alias(vec![named_frame("PV:X")], &target).unwrap();
        assert_eq!(frames[0].fields[1].display_label(), "renamed");
    }

    #[test]
    fn test_set_alias_capture_group() {
        let target = test_target("$1", "PV:(\\w+):VAL");
        let frames = set_alias(vec![named_frame("PV:ABC:VAL")], &target).unwrap();
        assert_eq!(frames[0].fields[1].display_label(), "ABC");
    }

    #[test]
    fn test_set_alias_bad_pattern_is_typed_error() {
        let target = test_target("x", "(unclosed");
        assert!(matches!(
            set_alias(vec![named_frame("PV")], &target),
            Err(GatewayError::InvalidAliasPattern(_))
        ));
    }

    fn request(targets: Vec<RawTarget>) -> QueryRequest {
        QueryRequest {
            range: TimeRange {
                from: Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
                to: Utc.with_ymd_and_hms(2010, 1, 1, 1, 0, 0).unwrap(),
            },
            interval_ms: None,
            max_data_points: Some(1800),
            scoped_vars: HashMap::new(),
            targets,
        }
    }

    fn raw_target(target: &str) -> RawTarget {
        RawTarget {
            target: target.to_string(),
            ref_id: "A".to_string(),
            hide: false,
            alias: String::new(),
            alias_pattern: String::new(),
            operator: String::new(),
            regex: false,
            functions: Vec::new(),
            stream: false,
            strm_int: String::new(),
            strm_cap: String::new(),
        }
    }

    struct NullRepository;

    #[async_trait::async_trait]
    impl ArchiveRepository for NullRepository {
        async fn build_urls(&self, _target: &TargetQuery) -> GatewayResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn fetch_deduped(
            &self,
            urls_array: Vec<Vec<String>>,
        ) -> Vec<Vec<GatewayResult<Vec<crate::domain::record::ArchiveRecord>>>> {
            urls_array.iter().map(|_| Vec::new()).collect()
        }

        async fn find_pv_names(
            &self,
            pattern: &str,
            _limit: usize,
        ) -> GatewayResult<Vec<String>> {
            Ok(vec![pattern.to_string(), "shared".to_string()])
        }

        async fn get_version(&self) -> GatewayResult<String> {
            Ok("test".to_string())
        }
    }

    fn service() -> QueryService {
        QueryService::new(Arc::new(NullRepository))
    }

    #[test]
    fn test_build_target_queries_computes_interval() {
        // 3600s range / 1800 points = 2s bins
        let targets = service()
            .build_target_queries(&request(vec![raw_target("PV")]))
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].interval, "2");
    }

    #[test]
    fn test_build_target_queries_sub_second_interval_is_raw() {
        let mut req = request(vec![raw_target("PV")]);
        req.max_data_points = Some(1_000_000);
        let targets = service().build_target_queries(&req).unwrap();
        assert_eq!(targets[0].interval, "");
    }

    #[test]
    fn test_disable_auto_raw_forces_one_second_bins() {
        let mut raw = raw_target("PV");
        raw.functions = vec![RawFunction {
            name: "disableAutoRaw".to_string(),
            params: vec!["true".to_string()],
        }];
        let mut req = request(vec![raw]);
        req.max_data_points = Some(1_000_000);

        let targets = service().build_target_queries(&req).unwrap();
        assert_eq!(targets[0].interval, "1");
        assert_eq!(targets[0].option("disableAutoRaw"), Some("true"));
    }

    #[test]
    fn test_build_target_queries_drops_hidden_and_empty() {
        let mut hidden = raw_target("PV:HIDDEN");
        hidden.hide = true;
        let req = request(vec![hidden, raw_target(""), raw_target("PV")]);
        let targets = service().build_target_queries(&req).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target, "PV");
    }

    #[test]
    fn test_build_target_queries_substitutes_variables() {
        let mut raw = raw_target("PV:${sector}:VAL");
        raw.functions = vec![RawFunction {
            name: "scale".to_string(),
            params: vec!["${factor}".to_string()],
        }];
        let mut req = request(vec![raw]);
        req.scoped_vars
            .insert("sector".to_string(), "S01".to_string());
        req.scoped_vars
            .insert("factor".to_string(), "3".to_string());

        let targets = service().build_target_queries(&req).unwrap();
        assert_eq!(targets[0].target, "PV:S01:VAL");
        assert_eq!(targets[0].functions[0].params, vec!["3"]);
    }

    #[test]
    fn test_build_target_queries_unknown_function() {
        let mut raw = raw_target("PV");
        raw.functions = vec![RawFunction {
            name: "definitelyNotAFunction".to_string(),
            params: Vec::new(),
        }];
        let result = service().build_target_queries(&request(vec![raw]));
        assert!(matches!(result, Err(GatewayError::UnknownFunction(_))));
    }

    #[tokio::test]
    async fn test_find_pv_names_limit_suffix_and_dedup() {
        let names = service()
            .find_pv_names("PV:(A|B)?limit=3", &HashMap::new())
            .await
            .unwrap();
        // Both expansions return "shared"; dedup keeps first occurrence.
        assert_eq!(names, vec!["PV:A", "shared", "PV:B"]);
    }

    use crate::domain::frame::FieldValues;
    use crate::infrastructure::archiver_client::ArchiverClient;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_scalar_pv(server: &MockServer, pv: &str, samples: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/data/getData.qw"))
            .and(query_param("pv", pv))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "meta": { "name": pv }, "data": samples }
            ])))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_do_query_end_to_end() {
        let server = MockServer::start().await;
        mock_scalar_pv(
            &server,
            "PV:X",
            serde_json::json!([
                { "millis": 1262304000000i64, "val": 1.0 },
                { "millis": 1262304060000i64, "val": 2.0 },
            ]),
        )
        .await;

        let service = QueryService::new(Arc::new(ArchiverClient::new(server.uri())));
        let mut target = test_target("", "");
        target.target = "PV:X".to_string();
        target.functions = vec![
            resolve_func_descriptor("scale", Some(vec!["10".to_string()])).unwrap(),
        ];

        let frames = service.do_query_flat(&[target.clone()]).await.unwrap();

        assert_eq!(frames.len(), 1);
        let to_ms = target.to.timestamp_millis();
        // Raw range: the response is extrapolated to `to`, then scaled.
        assert_eq!(
            frames[0].times().unwrap(),
            &[1262304000000, 1262304060000, to_ms]
        );
        assert_eq!(
            frames[0].fields[1].values,
            FieldValues::Number(vec![10.0, 20.0, 20.0])
        );
    }

    #[tokio::test]
    async fn test_do_query_isolates_failed_targets() {
        let server = MockServer::start().await;
        mock_scalar_pv(
            &server,
            "PV:GOOD",
            serde_json::json!([{ "millis": 1262304000000i64, "val": 1.0 }]),
        )
        .await;

        let service = QueryService::new(Arc::new(ArchiverClient::new(server.uri())));
        let mut bad = test_target("", "");
        bad.target = "PV:BAD".to_string();
        bad.operator = "bogus".to_string();
        bad.interval = "9".to_string();
        let mut good = test_target("", "");
        good.target = "PV:GOOD".to_string();

        let results = service.do_query(&[bad, good]).await;

        assert!(matches!(results[0], Err(GatewayError::InvalidOperator(_))));
        let frames = results[1].as_ref().unwrap();
        assert_eq!(frames[0].name.as_deref(), Some("PV:GOOD"));
    }

    #[tokio::test]
    async fn test_do_query_applies_alias_before_functions() {
        let server = MockServer::start().await;
        mock_scalar_pv(
            &server,
            "PV:RAW:SIG",
            serde_json::json!([{ "millis": 1262304000000i64, "val": 5.0 }]),
        )
        .await;

        let service = QueryService::new(Arc::new(ArchiverClient::new(server.uri())));
        let mut target = test_target("$1", "PV:RAW:(\\w+)");
        target.target = "PV:RAW:SIG".to_string();
        // Excluding by the original name must not match once aliased.
        target.functions =
            vec![resolve_func_descriptor("exclude", Some(vec!["RAW".to_string()])).unwrap()];

        let frames = service.do_query_flat(&[target]).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].fields[1].display_label(), "SIG");
    }
}
