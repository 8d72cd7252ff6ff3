//! Deliverables Analyzer CLI
//!
//! Entry point for the `deliverables-analyzer` command-line tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use da_cache::{namespace_names, CacheTopology};
use da_model::{project, JobId, RawBuildMap};
use deliverables_analyzer::config::{default_config_path, env_overrides, ensure_config_dir};
use deliverables_analyzer::{generate_job_id, EffectiveConfig};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deliverables-analyzer")]
#[command(about = "Attribute distribution artifacts to known builds", version)]
struct Cli {
    /// Path to config file (default: ~/.config/deliverables-analyzer/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config {
        /// Print the config file path only
        #[arg(long)]
        file: bool,

        /// Output the full effective config with sources as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cache management commands
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Project a raw build map (JSON) into an analysis report
    Project {
        /// Job identifier (8 lowercase hex digits)
        #[arg(long)]
        id: String,

        /// Distribution location recorded in the report
        #[arg(long)]
        url: String,

        /// Raw build map file
        #[arg(long)]
        input: PathBuf,

        /// Write the report here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print a fresh job identifier
    JobId,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Create the cache root and its namespaces
    Init {
        /// Cache root (default: from config)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Show live entry counts per namespace
    Stats {
        /// Cache root (default: from config)
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Config { file, json } => run_config(&config_path, file, json),
        Commands::Cache { action } => match action {
            CacheCommands::Init { root } => run_cache_init(&config_path, root),
            CacheCommands::Stats { root } => run_cache_stats(&config_path, root),
        },
        Commands::Project {
            id,
            url,
            input,
            output,
        } => run_project(&id, &url, &input, output.as_deref()),
        Commands::JobId => println!("{}", generate_job_id()),
    }
}

fn load_config(config_path: &Path, cache_root: Option<&Path>) -> EffectiveConfig {
    let cli_overrides = cache_root.map(|root| json!({ "cache_root": root }));
    match EffectiveConfig::build(
        Some(config_path),
        env_overrides(|var| std::env::var(var).ok()),
        cli_overrides,
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    }
}

fn run_config(config_path: &Path, file_only: bool, json: bool) {
    if file_only {
        println!("{}", config_path.display());
        return;
    }

    let effective = load_config(config_path, None);
    let rendered = if json {
        effective.to_json()
    } else {
        serde_json::to_string_pretty(&effective.config)
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            process::exit(1);
        }
    }
}

fn run_cache_init(config_path: &Path, root: Option<PathBuf>) {
    let effective = load_config(config_path, root.as_deref());
    let config = effective.analyzer();

    if root.is_none() {
        if let Some(parent) = config.cache_root().parent() {
            if let Err(e) = ensure_config_dir(parent) {
                eprintln!("Configuration error: {}", e);
                process::exit(1);
            }
        }
    }

    let topology = CacheTopology::new();
    let handle = match topology.ensure(config.cache_root(), &config.cache_settings()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cache error: {}", e);
            process::exit(1);
        }
    };

    println!("Cache {} at {}", handle.name(), handle.root().display());
    for name in namespace_names(config.checksum_types()) {
        println!("  {}", name);
    }

    if let Err(e) = handle.close() {
        eprintln!("Error closing cache: {}", e);
        process::exit(1);
    }
}

fn run_cache_stats(config_path: &Path, root: Option<PathBuf>) {
    let effective = load_config(config_path, root.as_deref());
    let config = effective.analyzer();

    if !config.cache_root().is_dir() {
        eprintln!("No cache at {}", config.cache_root().display());
        process::exit(1);
    }

    let topology = CacheTopology::new();
    let handle = match topology.ensure(config.cache_root(), &config.cache_settings()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cache error: {}", e);
            process::exit(1);
        }
    };

    let stats = handle.stats();
    let total: usize = stats.values().sum();
    for (name, count) in &stats {
        println!("{:<28} {:>8}", name, count);
    }
    println!("{:<28} {:>8}", "total", total);

    if let Err(e) = handle.close() {
        eprintln!("Error closing cache: {}", e);
        process::exit(1);
    }
}

fn run_project(id: &str, url: &str, input: &Path, output: Option<&Path>) {
    let job_id = match JobId::parse(id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Invalid job id: {}", e);
            process::exit(1);
        }
    };

    let raw: RawBuildMap = match fs::read(input)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
    {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error reading {}: {}", input.display(), e);
            process::exit(1);
        }
    };

    let report = match project(&job_id, url, &raw) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Projection error: {}", e);
            process::exit(1);
        }
    };

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error serializing report: {}", e);
            process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, json) {
                eprintln!("Error writing {}: {}", path.display(), e);
                process::exit(1);
            }
        }
        None => println!("{}", json),
    }
}
