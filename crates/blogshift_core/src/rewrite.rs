use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::front_matter::{render_post, split_front_matter};
use crate::metadata::MigratedMetadata;
use crate::runtime::normalize_for_display;
use crate::store::{DescriptionStore, load_metadata};

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub posts_dir: PathBuf,
    pub output_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub descriptions_file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub written: usize,
    pub skipped_missing: usize,
    pub skipped_malformed: usize,
    pub skipped_unreadable: usize,
}

/// Write every post, drafts included, into the new tree with migrated front
/// matter and its cached description.
pub fn run_rewrite(options: &RewriteOptions) -> Result<RewriteReport> {
    let posts = load_metadata(&options.metadata_file)?;
    if !options.descriptions_file.exists() {
        warn!(
            "{} does not exist; posts are written with empty descriptions",
            normalize_for_display(&options.descriptions_file)
        );
    }
    let descriptions = DescriptionStore::load_snapshot(&options.descriptions_file)?;

    let mut report = RewriteReport::default();
    for (post_id, post) in &posts {
        let source = post.source_path(&options.posts_dir, post_id);
        if !source.is_file() {
            warn!(
                "post file {} does not exist; skipping",
                normalize_for_display(&source)
            );
            report.skipped_missing += 1;
            continue;
        }

        let content = match fs::read_to_string(&source) {
            Ok(content) => content,
            Err(error) => {
                warn!(
                    "cannot read post file {}: {error}; skipping",
                    normalize_for_display(&source)
                );
                report.skipped_unreadable += 1;
                continue;
            }
        };
        let description = descriptions.get(post_id).map(String::as_str).unwrap_or("");
        let Some(rendered) = rewrite_post(&content, post, description, &source)? else {
            report.skipped_malformed += 1;
            continue;
        };

        let target = post.target_path(&options.output_dir);
        write_post(&target, &rendered)?;
        info!("wrote {}", normalize_for_display(&target));
        report.written += 1;
    }
    Ok(report)
}

/// Render the replacement for one post, or `None` when its front matter
/// block cannot be located.
pub fn rewrite_post(
    content: &str,
    post: &MigratedMetadata,
    description: &str,
    source: &Path,
) -> Result<Option<String>> {
    let parts = match split_front_matter(content) {
        Ok(parts) => parts,
        Err(error) => {
            warn!(
                "malformed post {}: {error}; skipping",
                normalize_for_display(source)
            );
            return Ok(None);
        }
    };

    let mut merged = post.clone();
    merged.description = description.to_string();
    let fields = merged.front_matter_fields()?;
    render_post(&fields, parts.body).map(Some)
}

fn write_post(target: &Path, rendered: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(target, rendered).with_context(|| format!("failed to write {}", target.display()))
}
