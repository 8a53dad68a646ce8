use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::metadata::{MetadataMap, MigratedMetadata};
use crate::runtime::normalize_for_display;
use crate::store::{load_metadata, write_json_atomic};

/// Legacy site-relative path to its redirect rule.
pub type RedirectTable = BTreeMap<String, RedirectRule>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub status: u16,
    pub destination: String,
}

#[derive(Debug, Clone)]
pub struct RedirectSettings {
    /// Site origin without a trailing slash, e.g. `https://example.com`.
    pub base_url: String,
    /// Path prefix of the new article tree, e.g. `/posts/articles`.
    pub article_prefix: String,
    pub status: u16,
}

#[derive(Debug, Clone)]
pub struct RedirectOptions {
    pub metadata_file: PathBuf,
    pub redirects_file: PathBuf,
    pub settings: RedirectSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedirectReport {
    pub posts_with_redirects: usize,
    pub rules: usize,
}

pub fn run_redirects(options: &RedirectOptions) -> Result<RedirectReport> {
    let posts = load_metadata(&options.metadata_file)?;
    let table = build_redirect_table(&posts, &options.settings);
    write_json_atomic(&options.redirects_file, &table)?;
    info!(
        "wrote {} redirect rules to {}",
        table.len(),
        normalize_for_display(&options.redirects_file)
    );
    Ok(RedirectReport {
        posts_with_redirects: posts
            .values()
            .filter(|post| post.origin_url.is_some())
            .count(),
        rules: table.len(),
    })
}

/// Build the table in identifier order. A later post claiming the same
/// legacy path replaces the earlier rule.
pub fn build_redirect_table(posts: &MetadataMap, settings: &RedirectSettings) -> RedirectTable {
    let mut table = RedirectTable::new();
    for post in posts.values() {
        let Some(origin_url) = post.origin_url.as_deref() else {
            continue;
        };
        let destination = destination_path(post, settings);
        let aliases = post
            .aliases()
            .iter()
            .map(|alias| alias.trim())
            .filter(|alias| !alias.is_empty())
            .map(|alias| format!("{}/{}", settings.base_url, alias.trim_start_matches('/')));
        for legacy_url in std::iter::once(origin_url.to_string()).chain(aliases) {
            table.insert(
                legacy_path(&legacy_url, &settings.base_url),
                RedirectRule {
                    status: settings.status,
                    destination: destination.clone(),
                },
            );
        }
    }
    table
}

/// `{article_prefix}/{category}/{slug}/`; root-level posts skip the category.
pub fn destination_path(post: &MigratedMetadata, settings: &RedirectSettings) -> String {
    let prefix = settings.article_prefix.trim_end_matches('/');
    let category = post.category.trim_matches('/');
    if category.is_empty() || category == "." {
        format!("{prefix}/{}/", post.slug)
    } else {
        format!("{prefix}/{category}/{}/", post.slug)
    }
}

/// Drop the site origin and any trailing slash. URLs on another origin keep
/// their full form so they still show up in the table.
pub fn legacy_path(url: &str, base_url: &str) -> String {
    url.strip_prefix(base_url)
        .unwrap_or(url)
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn settings() -> RedirectSettings {
        RedirectSettings {
            base_url: "https://example.com".to_string(),
            article_prefix: "/posts/articles".to_string(),
            status: 302,
        }
    }

    fn published(category: &str, slug: &str, origin: &str, aliases: &[&str]) -> MigratedMetadata {
        MigratedMetadata {
            slug: slug.to_string(),
            category: category.to_string(),
            origin_url: Some(origin.to_string()),
            alias: (!aliases.is_empty())
                .then(|| aliases.iter().map(|alias| alias.to_string()).collect()),
            ..MigratedMetadata::default()
        }
    }

    #[test]
    fn origin_and_aliases_point_at_the_new_path() {
        let mut posts = MetadataMap::new();
        posts.insert(
            "a".to_string(),
            published("c", "a", "https://example.com/x/y/a/", &["old-a"]),
        );

        let table = build_redirect_table(&posts, &settings());

        let expected = RedirectRule {
            status: 302,
            destination: "/posts/articles/c/a/".to_string(),
        };
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("/x/y/a"), Some(&expected));
        assert_eq!(table.get("/old-a"), Some(&expected));
    }

    #[test]
    fn drafts_without_origin_produce_no_rules() {
        let mut posts = MetadataMap::new();
        posts.insert(
            "draft".to_string(),
            MigratedMetadata {
                slug: "draft".to_string(),
                category: "c".to_string(),
                draft: true,
                alias: Some(vec!["old-draft".to_string()]),
                ..MigratedMetadata::default()
            },
        );
        assert!(build_redirect_table(&posts, &settings()).is_empty());
    }

    #[test]
    fn later_identifier_wins_a_shared_legacy_path() {
        let mut posts = MetadataMap::new();
        posts.insert(
            "first".to_string(),
            published("c", "first", "https://example.com/p/q/first", &["shared"]),
        );
        posts.insert(
            "second".to_string(),
            published("d", "second", "https://example.com/p/q/second", &["/shared/"]),
        );

        let table = build_redirect_table(&posts, &settings());

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.get("/shared").map(|rule| rule.destination.as_str()),
            Some("/posts/articles/d/second/")
        );
    }

    #[test]
    fn legacy_path_strips_origin_and_trailing_slash() {
        assert_eq!(
            legacy_path("https://example.com/a/b/", "https://example.com"),
            "/a/b"
        );
        assert_eq!(
            legacy_path("https://other.example/a/", "https://example.com"),
            "https://other.example/a"
        );
    }

    #[test]
    fn destination_handles_nested_and_root_categories() {
        let nested = published("notes/rust", "intro", "https://example.com/a/b/intro", &[]);
        let root = published(".", "about-me", "https://example.com/a/b/about_me", &[]);
        assert_eq!(
            destination_path(&nested, &settings()),
            "/posts/articles/notes/rust/intro/"
        );
        assert_eq!(
            destination_path(&root, &settings()),
            "/posts/articles/about-me/"
        );
    }

    #[test]
    fn run_writes_sorted_table_and_reports_counts() {
        let temp = tempdir().expect("tempdir");
        let metadata_file = temp.path().join("result.json");
        let redirects_file = temp.path().join("rewrite.json");
        let mut posts = MetadataMap::new();
        posts.insert(
            "zeta".to_string(),
            published("c", "zeta", "https://example.com/p/q/zeta/", &[]),
        );
        posts.insert(
            "alpha".to_string(),
            published("c", "alpha", "https://example.com/p/q/alpha/", &["al"]),
        );
        posts.insert(
            "draft".to_string(),
            MigratedMetadata {
                slug: "draft".to_string(),
                category: "c".to_string(),
                draft: true,
                ..MigratedMetadata::default()
            },
        );
        write_json_atomic(&metadata_file, &posts).expect("write metadata");

        let report = run_redirects(&RedirectOptions {
            metadata_file,
            redirects_file: redirects_file.clone(),
            settings: RedirectSettings {
                status: 301,
                ..settings()
            },
        })
        .expect("redirects");

        assert_eq!(
            report,
            RedirectReport {
                posts_with_redirects: 2,
                rules: 3,
            }
        );
        let written: RedirectTable =
            crate::store::read_json(&redirects_file).expect("read table");
        assert_eq!(
            written.keys().cloned().collect::<Vec<_>>(),
            vec!["/al", "/p/q/alpha", "/p/q/zeta"]
        );
        assert!(written.values().all(|rule| rule.status == 301));
    }
}
