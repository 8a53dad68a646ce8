use std::path::PathBuf;

use anyhow::{Context, Result};
use blogshift_core::describe::{
    ChatCompletionClient, ChatCompletionConfig, DescribeOptions, DescribeReport, run_descriptions,
};
use blogshift_core::http::HttpClientConfig;
use blogshift_core::metadata::MigrationDefaults;
use blogshift_core::migrate::{MigrateOptions, MigrateReport, run_migration};
use blogshift_core::redirect::{RedirectOptions, RedirectReport, RedirectSettings, run_redirects};
use blogshift_core::rewrite::{RewriteOptions, RewriteReport, run_rewrite};
use blogshift_core::runtime::{
    PathOverrides, ResolutionContext, Runtime, normalize_for_display, resolve_runtime,
};
use blogshift_core::sitemap::HttpSitemapSource;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "blogshift=info,blogshift_core=info";

#[derive(Debug, Parser)]
#[command(
    name = "blogshift",
    version,
    about = "Migrate a legacy static blog into a new content tree"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Migrate front matter and match posts against the legacy sitemap")]
    Migrate,
    #[command(about = "Generate missing descriptions for published posts")]
    Describe(DescribeArgs),
    #[command(about = "Build the legacy-path redirect table")]
    Redirects,
    #[command(about = "Write posts into the new content tree")]
    Rewrite,
    #[command(about = "Run migrate, describe, redirects and rewrite in order")]
    All(DescribeArgs),
    #[command(about = "Show resolved paths and settings")]
    Paths,
}

#[derive(Debug, Clone, Copy, Args)]
struct DescribeArgs {
    #[arg(long, value_name = "N", help = "Concurrent description requests")]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Migrate) => run_migrate(&runtime),
        Some(Commands::Describe(args)) => run_describe(&runtime, args),
        Some(Commands::Redirects) => run_redirect_table(&runtime),
        Some(Commands::Rewrite) => run_rewrite_posts(&runtime),
        Some(Commands::All(args)) => run_all(&runtime, args),
        Some(Commands::Paths) => run_paths(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let resolved = resolve_runtime_config(runtime)?;
    let report = migrate_stage(&resolved)?;
    print_migrate_report(&resolved, &report);
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn run_describe(runtime: &RuntimeOptions, args: DescribeArgs) -> Result<()> {
    let resolved = resolve_runtime_config(runtime)?;
    let report = describe_stage(&resolved, args)?;
    print_describe_report(&report);
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn run_redirect_table(runtime: &RuntimeOptions) -> Result<()> {
    let resolved = resolve_runtime_config(runtime)?;
    let report = redirect_stage(&resolved)?;
    print_redirect_report(&resolved, &report);
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn run_rewrite_posts(runtime: &RuntimeOptions) -> Result<()> {
    let resolved = resolve_runtime_config(runtime)?;
    let report = rewrite_stage(&resolved)?;
    print_rewrite_report(&resolved, &report);
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn run_all(runtime: &RuntimeOptions, args: DescribeArgs) -> Result<()> {
    let resolved = resolve_runtime_config(runtime)?;

    let migrate = migrate_stage(&resolved)?;
    print_migrate_report(&resolved, &migrate);
    println!();
    let describe = describe_stage(&resolved, args)?;
    print_describe_report(&describe);
    println!();
    let redirects = redirect_stage(&resolved)?;
    print_redirect_report(&resolved, &redirects);
    println!();
    let rewrite = rewrite_stage(&resolved)?;
    print_rewrite_report(&resolved, &rewrite);
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn run_paths(runtime: &RuntimeOptions) -> Result<()> {
    let resolved = resolve_runtime_config(runtime)?;
    let config = &resolved.config;
    println!("{}", resolved.paths.diagnostics());
    println!("sitemap_url={}", config.sitemap_url());
    println!("base_url={}", config.base_url());
    println!("article_prefix={}", config.article_prefix());
    println!("author={}", config.author());
    println!("lang={}", config.lang());
    println!("redirect_status={}", config.redirect_status());
    println!("api_url={}", config.api_url());
    println!("model={}", config.model());
    println!(
        "api_key={}",
        if config.api_key().is_some() {
            "<set>"
        } else {
            "<unset>"
        }
    );
    println!("workers={}", config.workers());
    println!("llm_timeout_ms={}", config.llm_timeout_ms());
    Ok(())
}

fn migrate_stage(resolved: &Runtime) -> Result<MigrateReport> {
    let config = &resolved.config;
    let sitemap = HttpSitemapSource::new(&HttpClientConfig::new(config.user_agent()))?;
    run_migration(
        &MigrateOptions {
            posts_dir: resolved.paths.posts_dir.clone(),
            metadata_file: resolved.paths.metadata_file.clone(),
            error_log: resolved.paths.error_log.clone(),
            sitemap_url: config.sitemap_url(),
            defaults: MigrationDefaults {
                author: config.author().to_string(),
                lang: config.lang().to_string(),
            },
        },
        &sitemap,
    )
}

fn describe_stage(resolved: &Runtime, args: DescribeArgs) -> Result<DescribeReport> {
    let config = &resolved.config;
    let api_key = config
        .api_key()
        .context("no API key configured; set BLOGSHIFT_API_KEY or [llm].api_key")?;
    let client = ChatCompletionClient::new(&ChatCompletionConfig {
        api_url: config.api_url(),
        api_key,
        model: config.model(),
        lang: config.lang().to_string(),
        http: HttpClientConfig::new(config.user_agent()).with_timeout_ms(config.llm_timeout_ms()),
    })?;
    run_descriptions(
        &DescribeOptions {
            posts_dir: resolved.paths.posts_dir.clone(),
            metadata_file: resolved.paths.metadata_file.clone(),
            descriptions_file: resolved.paths.descriptions_file.clone(),
            workers: args.workers.unwrap_or_else(|| config.workers()).max(1),
        },
        &client,
    )
}

fn redirect_stage(resolved: &Runtime) -> Result<RedirectReport> {
    let config = &resolved.config;
    run_redirects(&RedirectOptions {
        metadata_file: resolved.paths.metadata_file.clone(),
        redirects_file: resolved.paths.redirects_file.clone(),
        settings: RedirectSettings {
            base_url: config.base_url(),
            article_prefix: config.article_prefix(),
            status: config.redirect_status(),
        },
    })
}

fn rewrite_stage(resolved: &Runtime) -> Result<RewriteReport> {
    run_rewrite(&RewriteOptions {
        posts_dir: resolved.paths.posts_dir.clone(),
        output_dir: resolved.paths.output_dir.clone(),
        metadata_file: resolved.paths.metadata_file.clone(),
        descriptions_file: resolved.paths.descriptions_file.clone(),
    })
}

fn print_migrate_report(resolved: &Runtime, report: &MigrateReport) {
    println!("migrate");
    println!(
        "posts_dir: {}",
        normalize_for_display(&resolved.paths.posts_dir)
    );
    println!(
        "metadata_file: {}",
        normalize_for_display(&resolved.paths.metadata_file)
    );
    println!("scanned_files: {}", report.scanned_files);
    println!("migrated_posts: {}", report.migrated_posts);
    println!("legacy_urls: {}", report.legacy_urls);
    println!("matched: {}", report.matched);
    println!("unmatched_legacy: {}", report.unmatched_legacy);
    println!("drafts: {}", report.drafts);
    println!("parse_errors: {}", report.parse_errors);
    println!("duplicate_ids: {}", report.duplicate_ids);
    println!("walk_errors: {}", report.walk_errors);
    if !report.reserved_category_published.is_empty() {
        println!("warnings:");
        for post_id in &report.reserved_category_published {
            println!("  - published post in reserved category: {post_id}");
        }
    }
    println!(
        "error_log: {} ({} entries)",
        normalize_for_display(&resolved.paths.error_log),
        report.logged_errors
    );
}

fn print_describe_report(report: &DescribeReport) {
    println!("describe");
    println!("pending: {}", report.pending);
    if report.pending == 0 {
        println!("status: every published post already has a description");
        return;
    }
    println!("generated: {}", report.generated);
    println!("failed: {}", report.failed);
    println!("skipped_missing: {}", report.skipped_missing);
}

fn print_redirect_report(resolved: &Runtime, report: &RedirectReport) {
    println!("redirects");
    println!(
        "redirects_file: {}",
        normalize_for_display(&resolved.paths.redirects_file)
    );
    println!("posts_with_redirects: {}", report.posts_with_redirects);
    println!("rules: {}", report.rules);
}

fn print_rewrite_report(resolved: &Runtime, report: &RewriteReport) {
    println!("rewrite");
    println!(
        "output_dir: {}",
        normalize_for_display(&resolved.paths.output_dir)
    );
    println!("written: {}", report.written);
    println!("skipped_missing: {}", report.skipped_missing);
    println!("skipped_malformed: {}", report.skipped_malformed);
    println!("skipped_unreadable: {}", report.skipped_unreadable);
}

fn print_diagnostics(runtime: &RuntimeOptions, resolved: &Runtime) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.paths.diagnostics());
    }
}

fn resolve_runtime_config(runtime: &RuntimeOptions) -> Result<Runtime> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_runtime(&context, &overrides)?;
    let project_env = initial.paths.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_runtime(&context, &overrides)
}
