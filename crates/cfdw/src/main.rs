use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cfdw_core::config::{CfdwConfig, load_config};
use cfdw_core::engine::{Engine, RunReport};
use cfdw_core::registry::TemplateRegistry;
use cfdw_core::store::{MediaWikiClientConfig, MediaWikiStore};
use cfdw_core::title::{NS_MAIN, Title};

#[derive(Debug, Parser)]
#[command(
    name = "cfdw",
    version,
    about = "Process categories-for-discussion working pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = "cfdw.toml")]
    config: PathBuf,
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Execute instructions from the working pages")]
    Run(PageArgs),
    #[command(about = "Parse and validate only; write nothing")]
    Check(PageArgs),
    #[command(about = "Print the resolved configuration and template registry")]
    Config,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[arg(
        long = "page",
        value_name = "TITLE",
        help = "Working page to process (repeatable; default: all protected working pages)"
    )]
    pages: Vec<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match &cli.command {
        Commands::Run(args) => run(&cli, &config, args, false),
        Commands::Check(args) => run(&cli, &config, args, true),
        Commands::Config => print_config(&cli, &config),
    }
}

fn build_store(cli: &Cli, config: &CfdwConfig) -> Result<MediaWikiStore> {
    let mut client_config = MediaWikiClientConfig::from_config(config);
    if let Some(api_url) = &cli.api_url {
        client_config.api_url = api_url.clone();
    }
    let mut store = MediaWikiStore::new(client_config)?;
    if let (Ok(username), Ok(password)) = (env::var("WIKI_USERNAME"), env::var("WIKI_PASSWORD"))
    {
        store
            .login(&username, &password)
            .context("wiki login failed")?;
    }
    Ok(store)
}

fn load_registry(store: &mut MediaWikiStore, config: &CfdwConfig) -> Result<TemplateRegistry> {
    let registry_page = Title::parse(config.registry_page(), NS_MAIN)
        .with_context(|| format!("invalid registry page {:?}", config.registry_page()))?;
    TemplateRegistry::load(store, &registry_page)
}

fn run(cli: &Cli, config: &CfdwConfig, args: &PageArgs, check_only: bool) -> Result<()> {
    let mut store = build_store(cli, config)?;
    let registry = load_registry(&mut store, config)?;
    let mut engine = Engine::new(&mut store, &registry, config.put_throttle());
    if check_only {
        engine = engine.dry_run();
    }
    let report = engine.run(config.working_prefix(), &args.pages)?;
    print_report(&report, check_only);
    println!("api requests: {}", store.request_count());
    Ok(())
}

fn print_report(report: &RunReport, check_only: bool) {
    let executed_label = if check_only { "valid" } else { "executed" };
    println!("pages processed: {}", report.pages.len());
    for page in &report.pages {
        println!("  - {page}");
    }
    println!("pages skipped: {}", report.skipped_pages.len());
    for page in &report.skipped_pages {
        println!("  - {page}");
    }
    println!("instructions {executed_label}: {}", report.executed.len());
    for instruction in &report.executed {
        println!("  - {instruction}");
    }
    println!("instructions skipped: {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("  - {skipped}");
    }
    if !report.errors.is_empty() {
        println!("errors: {}", report.errors.len());
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn print_config(cli: &Cli, config: &CfdwConfig) -> Result<()> {
    let api_url = cli
        .api_url
        .clone()
        .or_else(|| config.api_url())
        .unwrap_or_else(|| "<unset>".to_string());
    println!("config_path: {}", cli.config.display());
    println!("api_url: {api_url}");
    println!("user_agent: {}", config.user_agent());
    println!("working_prefix: {}", config.working_prefix());
    println!("registry_page: {}", config.registry_page());
    println!("put_throttle_ms: {}", config.put_throttle().as_millis());
    if api_url == "<unset>" {
        println!("registry: skipped (no API URL configured)");
        return Ok(());
    }
    let mut store = build_store(cli, config)?;
    let registry = load_registry(&mut store, config)?;
    println!("cfd templates: {}", registry.cfd_titles().len());
    for title in registry.cfd_titles() {
        println!("  - {title}");
    }
    println!("update templates: {}", registry.update_titles().len());
    for title in registry.update_titles() {
        println!("  - {title}");
    }
    Ok(())
}
