use clap::{Parser, Subcommand};
use eyre::{Context, Result, eyre};
use granola_export::server_config::{self, RegisterOutcome, ServerEntry};
use granola_export::{ExportConfig, exporter};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Export Granola meeting notes to Markdown files.
/// Reads the app's local cache; exported files are never deleted.
#[derive(Parser)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to Granola's cache file (cache-v4.json).
    /// Auto-detected if omitted.
    #[arg(long, value_name = "PATH")]
    cache_path: Option<PathBuf>,

    /// Directory to export markdown files into.
    /// Defaults to ~/granola-notes if not set in config.
    #[arg(long, value_name = "PATH")]
    output_dir: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/granola-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Re-export every meeting, even if its file is up to date.
    #[arg(short, long)]
    force: bool,

    /// Report what would be written without touching the output directory.
    #[arg(long)]
    dry_run: bool,

    /// Print one line per meeting.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Add or replace a server entry in a JSON tool registry config.
    RegisterServer {
        /// The shared config file (e.g. a desktop assistant's config.json).
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,

        /// Entry name under `mcpServers`.
        #[arg(long)]
        name: String,

        /// Executable the registry should launch.
        #[arg(long)]
        command: String,

        /// Argument passed to the command; repeat for several.
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Environment variable for the command; repeat for several.
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },

    /// Remove a server entry from a JSON tool registry config.
    UnregisterServer {
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,

        #[arg(long)]
        name: String,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    cache_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

fn default_cache_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("Granola/cache-v4.json"))
}

fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join("granola-notes"))
        .unwrap_or_else(|| PathBuf::from("granola-notes"))
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        // Search: XDG/OS config dir, then nothing
        dirs::config_dir()
            .map(|d| d.join("granola-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "granola_export=debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn sync(cli: Cli) -> Result<()> {
    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve output_dir (CLI > Config > Default)
    let output_dir = cli
        .output_dir
        .or(file_cfg.output_dir)
        .unwrap_or_else(default_output_dir);

    // 3. Resolve cache_path (CLI > Config > Auto-detect)
    let cache_path = cli
        .cache_path
        .or(file_cfg.cache_path)
        .or_else(default_cache_path)
        .ok_or_else(|| {
            eyre!("Could not determine the Granola cache path.\nUse --cache-path to specify it, or set cache_path in config.toml.")
        })?;

    let config = ExportConfig {
        cache_path,
        output_dir,
        force: cli.force,
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    };

    // 4. Run the Business Logic
    let report = exporter::run(&config).wrap_err("Sync failed")?;

    if config.verbose {
        for line in report.record_lines() {
            println!("  {}", line);
        }
    }
    println!("{}", report.summary_line());

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        eprintln!("Completed with {} skipped record(s):", failures.len());
        for (outcome, error) in failures {
            eprintln!("  {} [{}]: {}", outcome.title, outcome.id, error);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.take() {
        None => sync(cli),
        Some(Command::RegisterServer {
            config_file,
            name,
            command,
            args,
            env,
        }) => {
            let entry = ServerEntry {
                command,
                args,
                env: env.into_iter().collect::<BTreeMap<_, _>>(),
            };
            let outcome = server_config::register(&config_file, &name, &entry)
                .wrap_err_with(|| format!("Failed to register {name}"))?;
            match outcome {
                RegisterOutcome::Added => println!("Added {} to {}", name, config_file.display()),
                RegisterOutcome::Replaced => {
                    println!("Updated {} in {}", name, config_file.display())
                }
                RegisterOutcome::AddedAfterBackup { backup } => println!(
                    "Added {} to {} (previous unreadable file saved as {})",
                    name,
                    config_file.display(),
                    backup.display()
                ),
            }
            Ok(())
        }
        Some(Command::UnregisterServer { config_file, name }) => {
            let removed = server_config::unregister(&config_file, &name)
                .wrap_err_with(|| format!("Failed to unregister {name}"))?;
            if removed {
                println!("Removed {} from {}", name, config_file.display());
            } else {
                println!("{} was not registered in {}", name, config_file.display());
            }
            Ok(())
        }
    }
}
