//! `/stats/<device_id>/<key>/...`: device samples read back from the repository.
//!
//! Samples live under [`STATS_ENTITY`] with `device_id`, `key`, `value` and a
//! `timestamp` in seconds since the epoch.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use strum::{Display, EnumString};

use super::{DispatchError, DispatchResult, request::key_value_pairs};
use crate::repository::{Record, RecordFields, Repository};

pub const STATS_ENTITY: &str = "device_stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StatsInterval {
    Minute,
    Hour,
    Day,
    Week,
}

impl StatsInterval {
    pub fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StatsSelector {
    Avg,
    Min,
    Max,
}

impl StatsSelector {
    fn select(self, values: &[f64]) -> f64 {
        match self {
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Parameters of a `from/<ts>[/to/<ts>][/interval/<i>/selector/<s>]` request.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsQuery {
    pub from: f64,
    pub to: Option<f64>,
    /// Only applied when both interval and selector are given.
    pub aggregate: Option<(StatsInterval, StatsSelector)>,
}

impl StatsQuery {
    pub fn from_pairs(pairs: &[(String, String)]) -> DispatchResult<Self> {
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        let from = get("from")
            .ok_or_else(|| DispatchError::BadRequest("missing 'from' parameter".to_string()))
            .and_then(parse_timestamp)?;
        let to = get("to").map(parse_timestamp).transpose()?;

        let interval = get("interval")
            .map(|raw| {
                raw.parse::<StatsInterval>()
                    .map_err(|_| DispatchError::BadRequest(format!("unknown interval: {}", raw)))
            })
            .transpose()?;
        let selector = get("selector")
            .map(|raw| {
                raw.parse::<StatsSelector>()
                    .map_err(|_| DispatchError::BadRequest(format!("unknown selector: {}", raw)))
            })
            .transpose()?;

        Ok(Self {
            from,
            to,
            aggregate: interval.zip(selector),
        })
    }

    fn contains(&self, timestamp: f64) -> bool {
        timestamp >= self.from && self.to.is_none_or(|to| timestamp <= to)
    }
}

pub async fn route(repository: &dyn Repository, segments: &[&str]) -> DispatchResult<Vec<Value>> {
    match segments {
        [device_id, key, "all"] => Ok(records_json(samples(repository, device_id, key).await?)),
        [device_id, key, "latest"] => Ok(records_json(last(repository, device_id, key, 1).await?)),
        [device_id, key, "last", count] => {
            let count = count.parse::<usize>().map_err(|_| {
                DispatchError::BadRequest(format!("sample count must be an integer: {}", count))
            })?;
            Ok(records_json(last(repository, device_id, key, count).await?))
        }
        [device_id, key, rest @ ..] if rest.len() > 1 && rest[0] == "from" => {
            let query = StatsQuery::from_pairs(&key_value_pairs(rest)?)?;
            let values = window(repository, device_id, key, &query).await?;
            Ok(vec![json!({
                "values": values,
                "key": key,
                "device_id": device_id,
            })])
        }
        [_, _, verb @ ("last" | "from"), ..] => Err(DispatchError::BadRequest(format!(
            "Wrong syntax for {}",
            verb
        ))),
        _ => Err(DispatchError::BadRequest(format!(
            "Unknown stats request: /{}",
            segments.join("/")
        ))),
    }
}

/// Samples of `device_id`/`key`, oldest first.
pub async fn samples(
    repository: &dyn Repository,
    device_id: &str,
    key: &str,
) -> DispatchResult<Vec<Record>> {
    let filter: RecordFields = [
        ("device_id".to_string(), device_id.to_string()),
        ("key".to_string(), key.to_string()),
    ]
    .into_iter()
    .collect();
    let mut records = repository.list(STATS_ENTITY, &filter).await?;
    records.sort_by(|a, b| sample_time(a).total_cmp(&sample_time(b)));
    Ok(records)
}

/// The `count` most recent samples, newest first.
async fn last(
    repository: &dyn Repository,
    device_id: &str,
    key: &str,
    count: usize,
) -> DispatchResult<Vec<Record>> {
    let mut records = samples(repository, device_id, key).await?;
    records.reverse();
    records.truncate(count);
    Ok(records)
}

async fn window(
    repository: &dyn Repository,
    device_id: &str,
    key: &str,
    query: &StatsQuery,
) -> DispatchResult<Vec<Value>> {
    let in_range = samples(repository, device_id, key)
        .await?
        .into_iter()
        .filter(|record| query.contains(sample_time(record)));

    let Some((interval, selector)) = query.aggregate else {
        return Ok(in_range
            .map(|record| {
                json!({
                    "timestamp": sample_time(&record),
                    "value": record.fields.get("value").cloned().unwrap_or_default(),
                })
            })
            .collect());
    };

    // non-numeric samples have no place in an aggregate
    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for record in in_range {
        let Some(value) = record
            .fields
            .get("value")
            .and_then(|v| v.parse::<f64>().ok())
        else {
            continue;
        };
        let start = (sample_time(&record) as i64).div_euclid(interval.seconds()) * interval.seconds();
        buckets.entry(start).or_default().push(value);
    }
    Ok(buckets
        .into_iter()
        .map(|(start, values)| json!({"timestamp": start, "value": selector.select(&values)}))
        .collect())
}

fn parse_timestamp(raw: &str) -> DispatchResult<f64> {
    raw.parse::<f64>()
        .map_err(|_| DispatchError::BadRequest(format!("timestamp must be a number: {}", raw)))
}

/// Unreadable timestamps sort first and fall outside every window.
fn sample_time(record: &Record) -> f64 {
    record
        .fields
        .get("timestamp")
        .and_then(|t| t.parse::<f64>().ok())
        .unwrap_or(f64::NEG_INFINITY)
}

pub(crate) fn records_json(records: Vec<Record>) -> Vec<Value> {
    records
        .into_iter()
        .map(|record| serde_json::to_value(record).unwrap_or(Value::Null))
        .collect()
}
