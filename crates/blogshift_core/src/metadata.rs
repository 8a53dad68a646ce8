use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

pub const POST_EXTENSION: &str = "md";

const OUTPUT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const ZONED_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
];

/// Identifier-keyed output of the migrate stage. Sorted so reruns diff cleanly.
pub type MetadataMap = BTreeMap<String, MigratedMetadata>;

/// Normalized post metadata in the target site's front matter vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigratedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<serde_json::Value>,
    #[serde(
        default,
        rename = "pubDatetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub pub_datetime: Option<String>,
    #[serde(default, rename = "updateDatetime")]
    pub update_datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toc: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<Vec<String>>,
    pub slug: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "isTop")]
    pub is_top: bool,
    #[serde(default)]
    pub draft: bool,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
}

impl MigratedMetadata {
    /// Title as plain text. Non-string titles render as compact JSON.
    pub fn title_text(&self) -> String {
        match &self.title {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn aliases(&self) -> &[String] {
        self.alias.as_deref().unwrap_or(&[])
    }

    /// Where the legacy post lives: `{posts_dir}/{category}/{post_id}.md`.
    pub fn source_path(&self, posts_dir: &Path, post_id: &str) -> PathBuf {
        posts_dir
            .join(&self.category)
            .join(format!("{post_id}.{POST_EXTENSION}"))
    }

    /// Where the rewritten post goes: `{output_dir}/{category}/{slug}.md`.
    pub fn target_path(&self, output_dir: &Path) -> PathBuf {
        output_dir
            .join(&self.category)
            .join(format!("{}.{POST_EXTENSION}", self.slug))
    }

    /// Front matter fields for the rewritten post, keys in sorted order.
    pub fn front_matter_fields(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let value = serde_json::to_value(self).context("failed to serialize metadata")?;
        match value {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => bail!("metadata did not serialize to an object"),
        }
    }
}

/// Site-wide constants stamped on every migrated post.
#[derive(Debug, Clone)]
pub struct MigrationDefaults {
    pub author: String,
    pub lang: String,
}

pub fn slug_for(post_id: &str) -> String {
    post_id.replace('_', "-")
}

/// Map a legacy front matter mapping onto the target vocabulary. Every
/// well-formed mapping yields a record; odd field shapes pass through.
pub fn migrate_metadata(
    legacy: &Mapping,
    post_id: &str,
    category: &str,
    defaults: &MigrationDefaults,
) -> MigratedMetadata {
    let pub_datetime = legacy.get("date").and_then(normalize_datetime);
    let update_datetime = legacy
        .get("updated")
        .filter(|value| is_truthy(value))
        .and_then(normalize_datetime)
        .or_else(|| pub_datetime.clone())
        .unwrap_or_default();

    MigratedMetadata {
        title: passthrough(legacy, "title"),
        pub_datetime,
        update_datetime,
        tags: passthrough(legacy, "tags"),
        categories: passthrough(legacy, "categories"),
        toc: passthrough(legacy, "toc"),
        thumbnail: passthrough(legacy, "thumbnail"),
        alias: legacy.get("alias").map(alias_list),
        slug: slug_for(post_id),
        author: defaults.author.clone(),
        lang: defaults.lang.clone(),
        description: String::new(),
        is_top: false,
        draft: legacy.get("published").is_some_and(|value| !is_truthy(value)),
        category: category.to_string(),
        origin_url: None,
    }
}

/// Render a YAML date or datetime as `YYYY-MM-DD HH:MM:SS` wall-clock time.
/// Strings that are not timestamps pass through untouched; null yields `None`.
pub fn normalize_datetime(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(
            parse_timestamp(text.trim())
                .map(|parsed| parsed.format(OUTPUT_DATETIME_FORMAT).to_string())
                .unwrap_or_else(|| text.clone()),
        ),
        other => scalar_text(other),
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_local());
    }
    let with_utc = text.strip_suffix('Z').unwrap_or(text);
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(with_utc, format) {
            return Some(parsed);
        }
    }
    for format in ZONED_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(text, format) {
            return Some(parsed.naive_local());
        }
    }
    None
}

/// Values JSON cannot hold (mappings with sequence keys, say) fall back to
/// their YAML text.
fn passthrough(legacy: &Mapping, key: &str) -> Option<serde_json::Value> {
    let value = legacy.get(key)?;
    Some(serde_json::to_value(value).unwrap_or_else(|_| {
        serde_json::Value::String(
            serde_yaml::to_string(value)
                .unwrap_or_default()
                .trim_end()
                .to_string(),
        )
    }))
}

fn alias_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_text).collect(),
        other => scalar_text(other).into_iter().collect(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Sequence(items) => !items.is_empty(),
        Value::Mapping(mapping) => !mapping.is_empty(),
        Value::Tagged(tagged) => is_truthy(&tagged.value),
    }
}
