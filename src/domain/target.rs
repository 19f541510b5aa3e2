// Target query domain model
use super::functions::FunctionDescriptor;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Aggregation operators understood by the archiver's retrieval API.
pub const OPERATOR_LIST: &[&str] = &[
    "firstSample",
    "lastSample",
    "firstFill",
    "lastFill",
    "mean",
    "min",
    "max",
    "count",
    "ncount",
    "nth",
    "median",
    "std",
    "jitter",
    "ignoreflyers",
    "flyers",
    "variance",
    "popvariance",
    "kurtosis",
    "skewness",
    "raw",
    "last",
];

pub const DEFAULT_MAX_NUM_PVS: usize = 100;

/// One logical request unit, built fresh per query evaluation.
/// Streaming rewrites `from`/`to` between polls; everything else is
/// fixed once constructed.
#[derive(Debug, Clone)]
pub struct TargetQuery {
    pub target: String,
    pub ref_id: String,
    pub hide: bool,
    pub alias: String,
    pub alias_pattern: String,
    pub operator: String,
    pub regex: bool,
    pub functions: Vec<FunctionDescriptor>,
    pub options: HashMap<String, String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: String,
    pub stream: bool,
    pub strm_int: String,
    pub strm_cap: String,
}

impl TargetQuery {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn option_enabled(&self, name: &str) -> bool {
        self.option(name) == Some("true")
    }

    pub fn max_num_pvs(&self) -> usize {
        self.option("maxNumPVs")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_NUM_PVS)
    }

    /// Bin interval used in retrieval URLs: the binInterval option wins
    /// over the auto-computed target interval.
    pub fn bin_interval(&self) -> &str {
        match self.option("binInterval") {
            Some(v) if !v.is_empty() => v,
            _ => &self.interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub fn test_target(target: &str) -> TargetQuery {
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
            from: Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2010, 1, 1, 0, 30, 0).unwrap(),
            interval: String::new(),
            stream: false,
            strm_int: String::new(),
            strm_cap: String::new(),
        }
    }

    #[test]
    fn test_max_num_pvs_defaults() {
        let mut target = test_target("PV");
        assert_eq!(target.max_num_pvs(), 100);

        target
            .options
            .insert("maxNumPVs".to_string(), "10".to_string());
        assert_eq!(target.max_num_pvs(), 10);

        target
            .options
            .insert("maxNumPVs".to_string(), "bogus".to_string());
        assert_eq!(target.max_num_pvs(), 100);
    }

    #[test]
    fn test_bin_interval_option_wins() {
        let mut target = test_target("PV");
        target.interval = "30".to_string();
        assert_eq!(target.bin_interval(), "30");

        target
            .options
            .insert("binInterval".to_string(), "900".to_string());
        assert_eq!(target.bin_interval(), "900");
    }
}
