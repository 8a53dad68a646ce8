use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde_yaml::{Mapping, Value};

pub const MARKER: &str = "---";

/// Fields whose values must render as bare YAML scalars.
const UNQUOTED_FIELDS: &[&str] = &["pubDatetime", "updateDatetime"];

/// A post split at its front matter markers. Both slices borrow from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontMatter<'a> {
    pub yaml: &'a str,
    pub body: &'a str,
}

/// Locate the leading `---` block by scanning lines, so a `---` inside the body
/// (a thematic break, say) never moves the split point.
pub fn split_front_matter(content: &str) -> Result<FrontMatter<'_>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let first_end = line_end(content, 0);
    if !is_marker(&content[..first_end]) {
        bail!("missing opening `{MARKER}` marker");
    }

    let yaml_start = (first_end + 1).min(content.len());
    let mut cursor = yaml_start;
    while cursor < content.len() {
        let end = line_end(content, cursor);
        if is_marker(&content[cursor..end]) {
            let body_start = (end + 1).min(content.len());
            return Ok(FrontMatter {
                yaml: &content[yaml_start..cursor],
                body: &content[body_start..],
            });
        }
        cursor = end + 1;
    }
    bail!("missing closing `{MARKER}` marker")
}

/// Parse a front matter block into a YAML mapping. Empty and non-mapping
/// documents are rejected.
pub fn parse_mapping(yaml: &str) -> Result<Mapping> {
    if yaml.trim().is_empty() {
        bail!("front matter is empty");
    }
    let value: Value = serde_yaml::from_str(yaml).context("front matter is not valid YAML")?;
    match value {
        Value::Mapping(mapping) if !mapping.is_empty() => Ok(mapping),
        Value::Mapping(_) | Value::Null => bail!("front matter is empty"),
        _ => bail!("front matter is not a mapping"),
    }
}

/// Render a full post: marker, YAML with sorted keys, marker, blank line, body.
/// Leading blank lines of `body` are dropped; the rest is copied verbatim.
pub fn render_post(fields: &BTreeMap<String, serde_json::Value>, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(fields).context("failed to serialize front matter")?;
    let yaml = unquote_fields(&yaml);
    let body = body.trim_start_matches(['\r', '\n']);
    Ok(format!("{MARKER}\n{yaml}{MARKER}\n\n{body}"))
}

fn unquote_fields(yaml: &str) -> String {
    let mut output = String::with_capacity(yaml.len());
    for line in yaml.lines() {
        output.push_str(&unquote_line(line));
        output.push('\n');
    }
    output
}

fn unquote_line(line: &str) -> String {
    let Some((key, value)) = line.split_once(':') else {
        return line.to_string();
    };
    if !UNQUOTED_FIELDS.contains(&key) {
        return line.to_string();
    }
    let value = value.trim();
    let bare = ['\'', '"'].iter().find_map(|quote| {
        value
            .strip_prefix(*quote)
            .and_then(|rest| rest.strip_suffix(*quote))
            .filter(|inner| !inner.is_empty())
    });
    match bare {
        Some(inner) => format!("{key}: {inner}"),
        None => line.to_string(),
    }
}

fn line_end(content: &str, from: usize) -> usize {
    content[from..]
        .find('\n')
        .map(|index| from + index)
        .unwrap_or(content.len())
}

fn is_marker(line: &str) -> bool {
    line.trim_end() == MARKER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_finds_block_and_body() {
        let content = "---\ntitle: T\n---\nBody line\n";
        let parts = split_front_matter(content).expect("split");
        assert_eq!(parts.yaml, "title: T\n");
        assert_eq!(parts.body, "Body line\n");
    }

    #[test]
    fn split_ignores_thematic_breaks_in_body() {
        let content = "---\ntitle: T\n---\n\nintro\n\n---\n\nmore --- text\n";
        let parts = split_front_matter(content).expect("split");
        assert_eq!(parts.yaml, "title: T\n");
        assert_eq!(parts.body, "\nintro\n\n---\n\nmore --- text\n");
    }

    #[test]
    fn split_does_not_treat_longer_rules_as_closing_marker() {
        let content = "---\ntitle: T\n-----\n---\nbody";
        let parts = split_front_matter(content).expect("split");
        assert_eq!(parts.yaml, "title: T\n-----\n");
        assert_eq!(parts.body, "body");
    }

    #[test]
    fn split_tolerates_crlf_line_endings() {
        let content = "---\r\ntitle: T\r\n---\r\nbody\r\n";
        let parts = split_front_matter(content).expect("split");
        assert_eq!(parts.yaml, "title: T\r\n");
        assert_eq!(parts.body, "body\r\n");
    }

    #[test]
    fn split_rejects_missing_markers() {
        let missing_open = split_front_matter("title: T\n---\nbody").expect_err("must fail");
        assert!(missing_open.to_string().contains("opening"));

        let missing_close = split_front_matter("---\ntitle: T\nbody\n").expect_err("must fail");
        assert!(missing_close.to_string().contains("closing"));
    }

    #[test]
    fn parse_mapping_rejects_empty_and_scalar_documents() {
        assert!(parse_mapping("").is_err());
        assert!(parse_mapping("   \n").is_err());
        assert!(parse_mapping("{}").is_err());
        assert!(parse_mapping("just a string").is_err());
        assert!(parse_mapping("title: [unclosed").is_err());
    }

    #[test]
    fn parse_mapping_returns_fields() {
        let mapping = parse_mapping("title: Hello\ntags:\n  - a\n  - b\n").expect("parse");
        assert_eq!(
            mapping.get("title").and_then(Value::as_str),
            Some("Hello")
        );
        assert_eq!(
            mapping
                .get("tags")
                .and_then(Value::as_sequence)
                .map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn unquote_line_strips_datetime_quotes_only() {
        assert_eq!(
            unquote_line("pubDatetime: '2024-01-01 00:00:00'"),
            "pubDatetime: 2024-01-01 00:00:00"
        );
        assert_eq!(
            unquote_line("updateDatetime: \"2024-01-02 08:00:00\""),
            "updateDatetime: 2024-01-02 08:00:00"
        );
        assert_eq!(unquote_line("title: 'yes'"), "title: 'yes'");
        assert_eq!(unquote_line("updateDatetime: ''"), "updateDatetime: ''");
    }

    #[test]
    fn render_post_sorts_keys_and_preserves_body() {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), serde_json::json!("T"));
        fields.insert(
            "pubDatetime".to_string(),
            serde_json::json!("2024-01-01 00:00:00"),
        );
        fields.insert("draft".to_string(), serde_json::json!(false));

        let rendered = render_post(&fields, "\n\n# Heading\n\n---\ntext  \n").expect("render");
        assert!(rendered.starts_with("---\ndraft: false\npubDatetime: 2024-01-01 00:00:00\n"));
        assert!(rendered.contains("title: T\n---\n\n# Heading\n\n---\ntext  \n"));
        assert!(rendered.ends_with("# Heading\n\n---\ntext  \n"));
    }
}
