use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::http::{HttpClientConfig, build_client};
use crate::metadata::{MetadataMap, MigratedMetadata};
use crate::runtime::normalize_for_display;
use crate::store::{DescriptionStore, load_metadata};

const SYSTEM_MESSAGE: &str = "You are a professional assistant that writes article summaries.";

const TASK_TEMPLATE: &str = "Write a description for the article below. Requirements:
1. 50 to 80 characters, written in the language tagged {lang}.
2. Speak from the author's point of view about what the article covers and why it was written, without using the word \"I\".
3. Keep the wording modest; avoid phrases such as \"in-depth analysis\" or \"comprehensive guide\".
4. Do not repeat the title; add information the title does not already give.
5. Follow mixed-script typesetting conventions: put a space between CJK characters and Latin letters or digits.
6. Keep it search-engine friendly.
Reply with the description only.";

/// One post handed to a [`DescriptionService`].
#[derive(Debug, Clone, Copy)]
pub struct DescriptionRequest<'a> {
    pub post_id: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

/// Anything that can turn a post into a one-line description. Shared across
/// worker threads, hence `Sync`.
pub trait DescriptionService: Sync {
    fn describe(&self, request: &DescriptionRequest<'_>) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub lang: String,
    pub http: HttpClientConfig,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    task_prompt: String,
}

impl ChatCompletionClient {
    pub fn new(config: &ChatCompletionConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("chat completion API key is empty");
        }
        Ok(Self {
            client: build_client(&config.http)?,
            endpoint: format!("{}/chat/completions", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            task_prompt: task_prompt(&config.lang),
        })
    }
}

impl DescriptionService for ChatCompletionClient {
    fn describe(&self, request: &DescriptionRequest<'_>) -> Result<String> {
        let user_message = user_message(&self.task_prompt, request);
        let payload = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: &user_message,
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("failed to call {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                self.endpoint,
                body.trim()
            );
        }

        let reply: ChatResponse = response
            .json()
            .context("failed to decode chat completion response")?;
        extract_description(reply)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

fn task_prompt(lang: &str) -> String {
    TASK_TEMPLATE.replace("{lang}", lang)
}

fn user_message(task_prompt: &str, request: &DescriptionRequest<'_>) -> String {
    format!(
        "{task_prompt}\n\nTitle: {}\n\nContent: {}",
        request.title, request.body
    )
}

fn extract_description(reply: ChatResponse) -> Result<String> {
    let Some(choice) = reply.choices.into_iter().next() else {
        bail!("chat completion response has no choices");
    };
    let description = choice.message.content.unwrap_or_default().trim().to_string();
    if description.is_empty() {
        bail!("chat completion response has empty content");
    }
    Ok(description)
}

#[derive(Debug, Clone)]
pub struct DescribeOptions {
    pub posts_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub descriptions_file: PathBuf,
    pub workers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DescribeReport {
    pub pending: usize,
    pub generated: usize,
    pub failed: usize,
    pub skipped_missing: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostOutcome {
    Generated,
    Failed,
    SkippedMissing,
}

impl PostOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Failed => "failed",
            Self::SkippedMissing => "skipped (missing file)",
        }
    }
}

/// Published posts without a cached description, in identifier order.
pub fn pending_posts<'a>(
    posts: &'a MetadataMap,
    store: &DescriptionStore,
) -> Vec<(&'a str, &'a MigratedMetadata)> {
    posts
        .iter()
        .filter(|(post_id, post)| !post.draft && !store.contains(post_id))
        .map(|(post_id, post)| (post_id.as_str(), post))
        .collect()
}

/// Generate descriptions for every pending post with a bounded pool of
/// workers. Each success is persisted before its worker picks up another post.
pub fn run_descriptions<S>(options: &DescribeOptions, service: &S) -> Result<DescribeReport>
where
    S: DescriptionService + ?Sized,
{
    let posts = load_metadata(&options.metadata_file)?;
    let store = DescriptionStore::open(&options.descriptions_file)?;
    let pending = pending_posts(&posts, &store);
    let total = pending.len();

    let mut report = DescribeReport {
        pending: total,
        ..DescribeReport::default()
    };
    if pending.is_empty() {
        info!("every published post already has a description");
        return Ok(report);
    }

    let workers = options.workers.max(1).min(total);
    info!("describing {total} posts with {workers} workers");

    let cursor = AtomicUsize::new(0);
    let progress = Mutex::new(DescribeReport::default());
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(&(post_id, post)) = pending.get(index) else {
                        break;
                    };
                    let outcome = describe_post(&options.posts_dir, post_id, post, service, &store);

                    let mut tally = progress.lock().unwrap_or_else(PoisonError::into_inner);
                    match outcome {
                        PostOutcome::Generated => tally.generated += 1,
                        PostOutcome::Failed => tally.failed += 1,
                        PostOutcome::SkippedMissing => tally.skipped_missing += 1,
                    }
                    let completed = tally.generated + tally.failed + tally.skipped_missing;
                    println!("progress: {completed}/{total} {post_id} {}", outcome.as_str());
                }
            });
        }
    });

    let tally = progress.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.generated = tally.generated;
    report.failed = tally.failed;
    report.skipped_missing = tally.skipped_missing;
    Ok(report)
}

fn describe_post<S>(
    posts_dir: &Path,
    post_id: &str,
    post: &MigratedMetadata,
    service: &S,
    store: &DescriptionStore,
) -> PostOutcome
where
    S: DescriptionService + ?Sized,
{
    let path = post.source_path(posts_dir, post_id);
    if !path.is_file() {
        warn!(
            "post file {} does not exist; skipping {post_id}",
            normalize_for_display(&path)
        );
        return PostOutcome::SkippedMissing;
    }

    let title = post.title_text();
    let result = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", normalize_for_display(&path)))
        .and_then(|body| {
            service.describe(&DescriptionRequest {
                post_id,
                title: &title,
                body: &body,
            })
        })
        .and_then(|description| {
            store.insert(post_id, &description)?;
            Ok(description)
        });

    match result {
        Ok(description) => {
            info!("{post_id}: {description}");
            PostOutcome::Generated
        }
        Err(error) => {
            error!("failed to describe {post_id}: {error:#}");
            PostOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::store::write_json_atomic;

    #[derive(Default)]
    struct FakeService {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        failing: BTreeSet<String>,
    }

    impl FakeService {
        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|id| id.to_string()).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DescriptionService for FakeService {
        fn describe(&self, request: &DescriptionRequest<'_>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .expect("seen lock")
                .push(request.post_id.to_string());
            if self.failing.contains(request.post_id) {
                bail!("service rejected {}", request.post_id);
            }
            Ok(format!("about {}", request.title))
        }
    }

    struct Fixture {
        _temp: TempDir,
        options: DescribeOptions,
    }

    fn post(title: &str, category: &str, draft: bool) -> MigratedMetadata {
        MigratedMetadata {
            title: Some(serde_json::Value::from(title)),
            slug: title.to_lowercase(),
            category: category.to_string(),
            draft,
            ..MigratedMetadata::default()
        }
    }

    fn fixture(posts: &[(&str, MigratedMetadata, bool)], workers: usize) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let posts_dir = temp.path().join("posts");
        let mut metadata = MetadataMap::new();
        for (post_id, entry, on_disk) in posts {
            if *on_disk {
                let path = entry.source_path(&posts_dir, post_id);
                fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
                fs::write(&path, format!("---\ntitle: x\n---\nbody of {post_id}\n"))
                    .expect("write post");
            }
            metadata.insert(post_id.to_string(), entry.clone());
        }
        let metadata_file = temp.path().join("result.json");
        write_json_atomic(&metadata_file, &metadata).expect("write metadata");
        Fixture {
            options: DescribeOptions {
                posts_dir,
                metadata_file,
                descriptions_file: temp.path().join("desc.json"),
                workers,
            },
            _temp: temp,
        }
    }

    fn cache(options: &DescribeOptions) -> BTreeMap<String, String> {
        DescriptionStore::load_snapshot(&options.descriptions_file).expect("snapshot")
    }

    #[test]
    fn generates_for_published_posts_and_skips_drafts() {
        let fixture = fixture(
            &[
                ("alpha", post("Alpha", "notes", false), true),
                ("beta", post("Beta", "notes", true), true),
            ],
            2,
        );
        let service = FakeService::default();

        let report = run_descriptions(&fixture.options, &service).expect("describe");

        assert_eq!(
            report,
            DescribeReport {
                pending: 1,
                generated: 1,
                failed: 0,
                skipped_missing: 0,
            }
        );
        assert_eq!(service.calls(), 1);
        let cache = cache(&fixture.options);
        assert_eq!(cache.get("alpha").map(String::as_str), Some("about Alpha"));
        assert!(!cache.contains_key("beta"));
    }

    #[test]
    fn second_run_issues_no_calls() {
        let fixture = fixture(&[("alpha", post("Alpha", "notes", false), true)], 4);
        run_descriptions(&fixture.options, &FakeService::default()).expect("first run");
        let before = fs::read_to_string(&fixture.options.descriptions_file).expect("read");

        let service = FakeService::default();
        let report = run_descriptions(&fixture.options, &service).expect("second run");

        assert_eq!(report.pending, 0);
        assert_eq!(service.calls(), 0);
        assert_eq!(
            fs::read_to_string(&fixture.options.descriptions_file).expect("read"),
            before
        );
    }

    #[test]
    fn missing_cache_file_is_created_even_with_nothing_pending() {
        let fixture = fixture(&[("draft", post("Draft", "notes", true), true)], 1);
        let report = run_descriptions(&fixture.options, &FakeService::default()).expect("run");
        assert_eq!(report.pending, 0);
        assert!(fixture.options.descriptions_file.is_file());
        assert!(cache(&fixture.options).is_empty());
    }

    #[test]
    fn missing_content_file_is_skipped_without_a_call() {
        let fixture = fixture(
            &[
                ("ghost", post("Ghost", "notes", false), false),
                ("real", post("Real", ".", false), true),
            ],
            2,
        );
        let service = FakeService::default();

        let report = run_descriptions(&fixture.options, &service).expect("describe");

        assert_eq!(report.pending, 2);
        assert_eq!(report.skipped_missing, 1);
        assert_eq!(report.generated, 1);
        assert_eq!(service.calls(), 1);
        assert!(!cache(&fixture.options).contains_key("ghost"));
    }

    #[test]
    fn failures_are_counted_and_do_not_stop_other_posts() {
        let fixture = fixture(
            &[
                ("a", post("A", "x", false), true),
                ("b", post("B", "x", false), true),
                ("c", post("C", "x", false), true),
            ],
            1,
        );
        let service = FakeService::failing(&["b"]);

        let report = run_descriptions(&fixture.options, &service).expect("describe");

        assert_eq!(report.generated, 2);
        assert_eq!(report.failed, 1);
        let cache = cache(&fixture.options);
        assert_eq!(cache.keys().cloned().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(
            *service.seen.lock().expect("seen"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );

        let retry = FakeService::default();
        let report = run_descriptions(&fixture.options, &retry).expect("retry");
        assert_eq!(report.pending, 1);
        assert_eq!(retry.calls(), 1);
        assert!(cache_has(&fixture.options, "b"));
    }

    fn cache_has(options: &DescribeOptions, post_id: &str) -> bool {
        cache(options).contains_key(post_id)
    }

    #[test]
    fn parallel_workers_persist_every_success() {
        let entries = (0..25)
            .map(|n| {
                let id = format!("post_{n:02}");
                let entry = post(&format!("Title {n}"), "bulk", false);
                (id, entry)
            })
            .collect::<Vec<_>>();
        let posts = entries
            .iter()
            .map(|(id, entry)| (id.as_str(), entry.clone(), true))
            .collect::<Vec<_>>();
        let fixture = fixture(&posts, 8);
        let service = FakeService::default();

        let report = run_descriptions(&fixture.options, &service).expect("describe");

        assert_eq!(report.generated, 25);
        assert_eq!(service.calls(), 25);
        assert_eq!(cache(&fixture.options).len(), 25);
    }

    #[test]
    fn missing_metadata_file_is_fatal() {
        let temp = tempdir().expect("tempdir");
        let options = DescribeOptions {
            posts_dir: temp.path().join("posts"),
            metadata_file: temp.path().join("result.json"),
            descriptions_file: temp.path().join("desc.json"),
            workers: 2,
        };
        let error = run_descriptions(&options, &FakeService::default()).expect_err("missing");
        assert!(format!("{error:#}").contains("blogshift migrate"));
    }

    #[test]
    fn reply_extraction_trims_and_rejects_empty() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  short summary \n"}}]}"#,
        )
        .expect("decode");
        assert_eq!(extract_description(reply).expect("extract"), "short summary");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("decode");
        assert!(extract_description(empty).is_err());

        let blank: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"   "}}]}"#).expect("decode");
        assert!(extract_description(blank).is_err());
    }

    #[test]
    fn user_message_carries_title_and_content() {
        let prompt = task_prompt("zh-CN");
        assert!(prompt.contains("zh-CN"));
        let message = user_message(
            &prompt,
            &DescriptionRequest {
                post_id: "p",
                title: "Hello",
                body: "Body text",
            },
        );
        assert!(message.starts_with(&prompt));
        assert!(message.ends_with("\n\nTitle: Hello\n\nContent: Body text"));
    }

    #[test]
    fn client_requires_api_key() {
        let config = ChatCompletionConfig {
            api_url: "https://api.example/v1/".to_string(),
            api_key: " ".to_string(),
            model: "m".to_string(),
            lang: "en".to_string(),
            http: HttpClientConfig::new("test"),
        };
        assert!(ChatCompletionClient::new(&config).is_err());
    }
}
