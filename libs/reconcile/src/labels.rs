//! Label interpreter: workload labels to desired registry entries.
//!
//! Pure function, no logging. Callers decide what to do with the result:
//!
//! - `Ok(None)`: the workload is not a managed service (no labels, no name)
//! - `Ok(Some(entry))`: the workload's desired entry
//! - `Err(LabelError)`: the workload asks to be managed but its labels are
//!   unusable; it is left out of the desired set for this pass

use std::collections::BTreeMap;
use std::time::Duration;

use doko_id::ServiceId;
use url::Url;

use crate::duration::{parse_duration, DurationError};
use crate::error::LabelError;
use crate::model::{
    DesiredEntry, HealthCheck, Workload, DEFAULT_CHECK_INTERVAL, DEFAULT_CHECK_TIMEOUT,
    DEFAULT_HTTP_CHECK_PATH, OWNER_META_KEY, OWNER_META_VALUE,
};

pub const LABEL_NAME: &str = "doko.name";
pub const LABEL_PORT: &str = "doko.port";
pub const LABEL_TAGS: &str = "doko.tags";
pub const LABEL_CHECK: &str = "doko.check";
pub const LABEL_CHECK_INTERVAL: &str = "doko.check.interval";
pub const LABEL_CHECK_TIMEOUT: &str = "doko.check.timeout";
pub const LABEL_CHECK_HTTP_PATH: &str = "doko.check.http.path";
pub const LABEL_META_PREFIX: &str = "doko.meta.";

const CHECK_HTTP: &str = "http";
const CHECK_GRPC: &str = "grpc";

// Registry limits on service metadata.
const MAX_META_PAIRS: usize = 64;
const MAX_META_KEY_LEN: usize = 128;
const MAX_META_VALUE_LEN: usize = 512;
const RESERVED_META_PREFIX: &str = "consul-";

const PATH_BASE: &str = "http://localhost/";

const NETWORK_HOST: &str = "host";
const NETWORK_BRIDGE: &[&str] = &["default", "bridge"];

/// Derives the desired registry entry for one workload.
pub fn interpret(workload: &Workload) -> Result<Option<DesiredEntry>, LabelError> {
    let labels = &workload.labels;
    if labels.is_empty() {
        return Ok(None);
    }

    let name = clean_name(label(labels, LABEL_NAME));
    if name.is_empty() {
        return Ok(None);
    }

    let raw_port = label(labels, LABEL_PORT);
    let declared = clean_port(raw_port).ok_or_else(|| LabelError::InvalidPort {
        value: raw_port.to_string(),
    })?;
    let port = resolve_port(workload, declared)?;

    let id = ServiceId::for_container(&workload.id)?;
    let tags = clean_tags(label(labels, LABEL_TAGS));
    let check = parse_check(labels)?;

    let mut meta: BTreeMap<String, String> = labels
        .iter()
        .filter_map(|(k, v)| {
            let key = k.strip_prefix(LABEL_META_PREFIX)?;
            let value = v.trim();
            (is_valid_meta_key(key) && value.len() <= MAX_META_VALUE_LEN)
                .then(|| (key.to_string(), value.to_string()))
        })
        .filter(|(key, _)| key != OWNER_META_KEY)
        .take(MAX_META_PAIRS - 1)
        .collect();
    meta.insert(OWNER_META_KEY.to_string(), OWNER_META_VALUE.to_string());

    Ok(Some(DesiredEntry {
        id,
        name,
        port,
        tags,
        meta,
        check,
    }))
}

/// Resolves the network-reachable port for a declared container port.
///
/// Host networking exposes the declared port as-is. Bridge networking
/// exposes whatever public port the declared private port is published on.
pub fn resolve_port(workload: &Workload, declared: u16) -> Result<u16, LabelError> {
    let mode = workload.network_mode.as_str();
    if mode == NETWORK_HOST {
        return Ok(declared);
    }
    if !NETWORK_BRIDGE.contains(&mode) {
        return Err(LabelError::UnsupportedNetworkMode(mode.to_string()));
    }

    workload
        .ports
        .iter()
        .filter(|p| p.private == declared)
        .find_map(|p| p.public.filter(|public| *public != 0))
        .ok_or(LabelError::PortNotPublished(declared))
}

fn parse_check(labels: &BTreeMap<String, String>) -> Result<Option<HealthCheck>, LabelError> {
    let kind = label(labels, LABEL_CHECK).trim().to_lowercase();
    let check = match kind.as_str() {
        "" => return Ok(None),
        CHECK_HTTP => {
            let path = label(labels, LABEL_CHECK_HTTP_PATH).trim();
            HealthCheck::Http {
                path: clean_path(path),
                interval: check_interval(labels)?,
                timeout: duration_label(labels, LABEL_CHECK_TIMEOUT, DEFAULT_CHECK_TIMEOUT)?,
            }
        }
        CHECK_GRPC => HealthCheck::Grpc {
            interval: check_interval(labels)?,
            timeout: duration_label(labels, LABEL_CHECK_TIMEOUT, DEFAULT_CHECK_TIMEOUT)?,
        },
        _ => return Err(LabelError::UnknownCheckKind(kind)),
    };
    Ok(Some(check))
}

fn duration_label(
    labels: &BTreeMap<String, String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, LabelError> {
    let raw = label(labels, key).trim();
    if raw.is_empty() {
        return Ok(default);
    }
    parse_duration(raw).map_err(|source| LabelError::InvalidDuration { key, source })
}

/// The registry refuses a check that never runs.
fn check_interval(labels: &BTreeMap<String, String>) -> Result<Duration, LabelError> {
    let interval = duration_label(labels, LABEL_CHECK_INTERVAL, DEFAULT_CHECK_INTERVAL)?;
    if interval.is_zero() {
        return Err(LabelError::InvalidDuration {
            key: LABEL_CHECK_INTERVAL,
            source: DurationError::Zero(label(labels, LABEL_CHECK_INTERVAL).trim().to_string()),
        });
    }
    Ok(interval)
}

fn label<'a>(labels: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    labels.get(key).map(String::as_str).unwrap_or_default()
}

/// Keys the registry accepts: `[A-Za-z0-9_-]`, bounded length, and
/// outside the reserved `consul-` namespace.
fn is_valid_meta_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_META_KEY_LEN
        && !key.starts_with(RESERVED_META_PREFIX)
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn clean_name(s: &str) -> String {
    s.trim().to_lowercase()
}

fn clean_port(s: &str) -> Option<u16> {
    s.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

/// Canonical form of a check path, as the registry reports it back:
/// percent-encoded, dot segments resolved, fragment dropped.
fn clean_path(s: &str) -> String {
    if s.is_empty() {
        return DEFAULT_HTTP_CHECK_PATH.to_string();
    }
    let raw = format!("/{}", s.trim_start_matches('/'));
    match Url::parse(PATH_BASE).and_then(|base| base.join(&raw)) {
        Ok(url) => path_and_query(&url),
        Err(_) => raw,
    }
}

/// Path of `url` with its query appended, if any.
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Splits, trims and case-folds a comma-separated tag list, dropping empty
/// entries and duplicates while keeping first-seen order.
pub fn clean_tags(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in s.split(',').map(|t| t.trim().to_lowercase()) {
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
