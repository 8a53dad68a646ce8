use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error_log::ErrorLog;
use crate::front_matter::{parse_mapping, split_front_matter};
use crate::metadata::{MetadataMap, MigrationDefaults, POST_EXTENSION, migrate_metadata};
use crate::runtime::normalize_for_display;
use crate::sitemap::{
    LegacyUrlIndex, SitemapSource, build_legacy_index, filter_article_urls,
    parse_sitemap_locations,
};

/// Categories starting with this are private by convention and should not
/// have a published counterpart.
pub const RESERVED_CATEGORY_PREFIX: char = '_';

/// Category assigned to posts sitting directly in the content root.
pub const ROOT_CATEGORY: &str = ".";

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub posts_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub error_log: PathBuf,
    pub sitemap_url: String,
    pub defaults: MigrationDefaults,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrateReport {
    pub scanned_files: usize,
    pub migrated_posts: usize,
    pub parse_errors: usize,
    pub duplicate_ids: usize,
    pub walk_errors: usize,
    pub legacy_urls: usize,
    pub matched: usize,
    pub unmatched_legacy: usize,
    pub drafts: usize,
    pub reserved_category_published: Vec<String>,
    pub logged_errors: usize,
}

/// Posts found on disk before any sitemap matching.
#[derive(Debug, Clone, Default)]
pub struct LocalScan {
    pub posts: MetadataMap,
    pub scanned_files: usize,
    pub parse_errors: usize,
    pub duplicate_ids: usize,
    pub walk_errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub matched: usize,
    pub drafts: usize,
    pub reserved_category_published: Vec<String>,
    /// `(post_id, legacy_url)` pairs published before but absent locally.
    pub missing_locally: Vec<(String, String)>,
}

/// Run the whole migrate stage. The metadata file is only written once the
/// sitemap has been fetched and parsed.
pub fn run_migration<S>(options: &MigrateOptions, sitemap: &S) -> Result<MigrateReport>
where
    S: SitemapSource + ?Sized,
{
    let mut error_log = ErrorLog::create(&options.error_log)?;
    let LocalScan {
        mut posts,
        scanned_files,
        parse_errors,
        duplicate_ids,
        walk_errors,
    } = scan_local_posts(&options.posts_dir, &options.defaults, &mut error_log)?;

    let xml = sitemap
        .fetch_sitemap(&options.sitemap_url)
        .with_context(|| format!("could not load sitemap {}", options.sitemap_url))?;
    let index = build_legacy_index(&filter_article_urls(parse_sitemap_locations(&xml)?));
    if index.is_empty() {
        warn!(
            "sitemap {} yielded no article URLs; every post will be a draft",
            options.sitemap_url
        );
    }

    let reconciliation = reconcile(&mut posts, &index);
    for (post_id, url) in &reconciliation.missing_locally {
        error_log.record(&format!(
            "no local post for published article: {post_id}, url: {url}"
        ))?;
    }
    for post_id in &reconciliation.reserved_category_published {
        warn!(
            "published post sits in a reserved category: {post_id}, category: {}",
            posts
                .get(post_id)
                .map(|post| post.category.as_str())
                .unwrap_or_default()
        );
    }

    crate::store::write_json_atomic(&options.metadata_file, &posts)?;
    info!(
        "wrote {} posts to {}",
        posts.len(),
        normalize_for_display(&options.metadata_file)
    );

    Ok(MigrateReport {
        scanned_files,
        migrated_posts: posts.len(),
        parse_errors,
        duplicate_ids,
        walk_errors,
        legacy_urls: index.len(),
        matched: reconciliation.matched,
        unmatched_legacy: reconciliation.missing_locally.len(),
        drafts: reconciliation.drafts,
        reserved_category_published: reconciliation.reserved_category_published,
        logged_errors: error_log.entries(),
    })
}

/// Walk `root` in sorted path order and migrate every post's front matter.
/// Unreadable entries, unparseable posts and repeated identifiers are logged
/// and skipped.
pub fn scan_local_posts(
    root: &Path,
    defaults: &MigrationDefaults,
    error_log: &mut ErrorLog,
) -> Result<LocalScan> {
    if !root.is_dir() {
        bail!("posts directory {} does not exist", root.display());
    }

    let mut scan = LocalScan::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                scan.walk_errors += 1;
                let location = error
                    .path()
                    .map(normalize_for_display)
                    .unwrap_or_else(|| normalize_for_display(root));
                error_log.record(&format!("cannot read directory entry: {location} ({error})"))?;
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some(POST_EXTENSION)
        {
            continue;
        }
        scan.scanned_files += 1;

        let Some(post_id) = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
        else {
            continue;
        };
        let category = category_for(root, path);
        let display = normalize_for_display(path);

        let legacy = match fs::read_to_string(path)
            .with_context(|| format!("failed to read {display}"))
            .and_then(|content| {
                let parts = split_front_matter(&content)?;
                parse_mapping(parts.yaml)
            }) {
            Ok(legacy) => legacy,
            Err(error) => {
                scan.parse_errors += 1;
                error_log.record(&format!("unparseable front matter: {display} ({error:#})"))?;
                continue;
            }
        };

        let migrated = migrate_metadata(&legacy, &post_id, &category, defaults);

        if scan.posts.contains_key(&post_id) {
            scan.duplicate_ids += 1;
            error_log.record(&format!("duplicate post id: {post_id}, path: {display}"))?;
            continue;
        }
        scan.posts.insert(post_id, migrated);
    }
    Ok(scan)
}

/// Decide draft status from the legacy index and attach origin URLs.
pub fn reconcile(posts: &mut MetadataMap, index: &LegacyUrlIndex) -> Reconciliation {
    let mut outcome = Reconciliation::default();
    for (post_id, post) in posts.iter_mut() {
        match index.get(post_id) {
            Some(url) => {
                post.draft = false;
                post.origin_url = Some(url.clone());
                outcome.matched += 1;
                if post.category.starts_with(RESERVED_CATEGORY_PREFIX) {
                    outcome.reserved_category_published.push(post_id.clone());
                }
            }
            None => {
                post.draft = true;
                post.origin_url = None;
                outcome.drafts += 1;
            }
        }
    }
    outcome.missing_locally = index
        .iter()
        .filter(|(post_id, _)| !posts.contains_key(*post_id))
        .map(|(post_id, url)| (post_id.clone(), url.clone()))
        .collect();
    outcome
}

fn category_for(root: &Path, path: &Path) -> String {
    let relative = path
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|relative| {
            relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    if relative.is_empty() {
        ROOT_CATEGORY.to_string()
    } else {
        relative
    }
}
