use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use scopesync::domain::{BudgetItem, Guest, Task};
use scopesync::{CacheNamespace, DemoSandbox, EntityKind, LocalCache, SyncConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cache-tool")]
#[command(about = "Inspect and maintain the local fallback cache")]
struct Cli {
    /// Cache directory
    #[arg(long)]
    dir: Option<PathBuf>,

    /// JSON config file; its cacheDir is used when --dir is absent
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every namespace with its entity count
    List,
    /// Print the entities stored under a namespace
    Show { namespace: String },
    /// Write demo fixtures for a collection unless the namespace exists
    SeedDemo { kind: String, scope: String },
    /// Delete a namespace
    Clear { namespace: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cache = open_cache(cli.dir, cli.config)?;

    match cli.command {
        Command::List => list(&cache),
        Command::Show { namespace } => show(&cache, &namespace),
        Command::SeedDemo { kind, scope } => match kind.as_str() {
            "tasks" => seed::<Task>(&cache, &scope),
            "guests" => seed::<Guest>(&cache, &scope),
            "budgetItems" => seed::<BudgetItem>(&cache, &scope),
            other => Err(anyhow!(
                "Unknown collection '{}'. Expected one of: tasks, guests, budgetItems",
                other
            )),
        },
        Command::Clear { namespace } => clear(&cache, &namespace),
    }
}

fn open_cache(dir: Option<PathBuf>, config: Option<PathBuf>) -> Result<LocalCache> {
    let dir = match (dir, config) {
        (Some(dir), _) => dir,
        (None, Some(path)) => SyncConfig::load(&path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?
            .cache_dir
            .ok_or_else(|| anyhow!("Config '{}' has no cacheDir", path.display()))?,
        (None, None) => return Err(anyhow!("Either --dir or --config must be provided")),
    };
    LocalCache::open_dir(&dir)
        .with_context(|| format!("Failed to open cache directory '{}'", dir.display()))
}

fn parse_namespace(raw: &str) -> Result<CacheNamespace> {
    raw.parse()
        .with_context(|| format!("Invalid namespace '{}'", raw))
}

fn list(cache: &LocalCache) -> Result<()> {
    let namespaces = cache.namespaces()?;
    if namespaces.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }
    for namespace in namespaces {
        match cache.get_json(&namespace) {
            Ok(Some(value)) => {
                let count = value.as_array().map(Vec::len).unwrap_or(0);
                println!("{:<40} {} entities", namespace.to_string(), count);
            }
            Ok(None) => {}
            Err(err) => println!("{:<40} unreadable ({})", namespace.to_string(), err),
        }
    }
    Ok(())
}

fn show(cache: &LocalCache, raw: &str) -> Result<()> {
    let namespace = parse_namespace(raw)?;
    let value = cache
        .get_json(&namespace)?
        .ok_or_else(|| anyhow!("Namespace '{}' does not exist", namespace))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn seed<T: EntityKind>(cache: &LocalCache, scope: &str) -> Result<()> {
    let outcome = DemoSandbox::default().seed_if_absent::<T>(cache, scope, Utc::now())?;
    let namespace = CacheNamespace::new(T::KIND, scope);
    if outcome.was_seeded() {
        println!(
            "Seeded '{}' with {} entities",
            namespace,
            outcome.into_entities().len()
        );
    } else {
        println!("Namespace '{}' already exists; left untouched", namespace);
    }
    Ok(())
}

fn clear(cache: &LocalCache, raw: &str) -> Result<()> {
    let namespace = parse_namespace(raw)?;
    if !cache.contains(&namespace)? {
        return Err(anyhow!("Namespace '{}' does not exist", namespace));
    }
    cache.delete(&namespace)?;
    println!("Cleared '{}'", namespace);
    Ok(())
}
