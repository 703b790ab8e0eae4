#![deny(unsafe_code)]

//! mimesniff CLI: classify files from the command line.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimesniff_config::AppConfig;
use mimesniff_core::cache::{self, NoCache, TagCache};
use mimesniff_core::{MimeDatabase, RequestDispatcher};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// mimesniff: content-type detection from filenames and file contents.
#[derive(Parser)]
#[command(name = "mimesniff", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "mimesniff.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv). Overrides the configured level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Determine the type of each file.
    Classify {
        /// Files to classify.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print one JSON object per line.
        #[arg(long)]
        json: bool,

        /// Skip the per-file tag cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Show the filename verdict for each name without touching any file.
    Glob {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Serialize)]
struct Verdict {
    path: String,
    mime_type: Option<String>,
}

impl Verdict {
    fn to_line(&self) -> String {
        format!(
            "{}: {}",
            self.path,
            self.mime_type.as_deref().unwrap_or("(unknown)")
        )
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config).await?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .with_writer(std::io::stderr)
        .init();

    if !found {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Classify {
            paths,
            json,
            no_cache,
        } => cmd_classify(&config, paths, json, no_cache).await?,
        Commands::Glob { names } => cmd_glob(&config, &names),
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

fn log_filter(verbose: u8, config: &AppConfig) -> &str {
    match verbose {
        0 => &config.logging.level,
        1 => "debug",
        _ => "trace",
    }
}

async fn cmd_classify(
    config: &AppConfig,
    paths: Vec<PathBuf>,
    json: bool,
    no_cache: bool,
) -> Result<()> {
    let db = Arc::new(MimeDatabase::from_config(&config.database));
    let tag_cache: Arc<dyn TagCache> = if no_cache {
        Arc::new(NoCache)
    } else {
        cache::from_config(&config.dispatcher)
    };

    let verdicts = classify_paths(db, tag_cache, config.dispatcher.max_workers, paths).await?;
    for verdict in &verdicts {
        if json {
            println!("{}", serde_json::to_string(verdict)?);
        } else {
            println!("{}", verdict.to_line());
        }
    }
    Ok(())
}

/// Run every path through a dispatcher and return verdicts in input order.
async fn classify_paths(
    db: Arc<MimeDatabase>,
    tag_cache: Arc<dyn TagCache>,
    max_workers: usize,
    paths: Vec<PathBuf>,
) -> Result<Vec<Verdict>> {
    let mut dispatcher = RequestDispatcher::new(db, tag_cache, max_workers);
    let results: Rc<RefCell<Vec<Option<String>>>> =
        Rc::new(RefCell::new(vec![None; paths.len()]));

    for (slot, path) in paths.iter().enumerate() {
        let results = Rc::clone(&results);
        dispatcher
            .start(path.clone(), move |req, mime_type| {
                debug!(id = req.id(), path = %req.path().display(), ?mime_type, "Classified");
                results.borrow_mut()[slot] = mime_type;
            })
            .context("dispatcher refused request")?;
    }
    dispatcher.run_until_idle().await;
    dispatcher.shutdown();

    let results = results.take();
    Ok(paths
        .iter()
        .zip(results)
        .map(|(path, mime_type)| Verdict {
            path: path.display().to_string(),
            mime_type,
        })
        .collect())
}

fn cmd_glob(config: &AppConfig, names: &[String]) {
    let db = MimeDatabase::from_config(&config.database);
    for name in names {
        match db.lookup_glob(name) {
            Some(found) if found.needs_magic => {
                println!("{name}: {} (ambiguous, needs content)", found.mime_type)
            }
            Some(found) => println!("{name}: {}", found.mime_type),
            None => println!("{name}: (no match)"),
        }
    }
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("TOML error")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Load the config if it exists; the flag reports whether it did.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if path.exists() {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimesniff_test_utils::config::TestConfigBuilder;
    use mimesniff_test_utils::fixtures::{MagicDbBuilder, MagicRuleSpec, write_globs};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_classify() {
        let cli = Cli::try_parse_from(["mimesniff", "-v", "classify", "--json", "a", "b"]).unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Classify {
                paths,
                json,
                no_cache,
            } => {
                assert_eq!(paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
                assert!(json);
                assert!(!no_cache);
            }
            _ => panic!("expected classify"),
        }
    }

    #[test]
    fn test_classify_requires_paths() {
        assert!(Cli::try_parse_from(["mimesniff", "classify"]).is_err());
    }

    #[test]
    fn test_log_filter() {
        let config = TestConfigBuilder::new().log_level("warn").build();
        assert_eq!(log_filter(0, &config), "warn");
        assert_eq!(log_filter(1, &config), "debug");
        assert_eq!(log_filter(3, &config), "trace");
    }

    #[test]
    fn test_verdict_output() {
        let found = Verdict {
            path: "a.png".to_string(),
            mime_type: Some("image/png".to_string()),
        };
        let missing = Verdict {
            path: "blob".to_string(),
            mime_type: None,
        };
        assert_eq!(found.to_line(), "a.png: image/png");
        assert_eq!(missing.to_line(), "blob: (unknown)");
        assert_eq!(
            serde_json::to_string(&missing).unwrap(),
            r#"{"path":"blob","mime_type":null}"#
        );
    }

    #[tokio::test]
    async fn test_classify_paths_keeps_input_order() {
        let tmp = TempDir::new().unwrap();
        let globs = write_globs(tmp.path(), "50:text/plain:*.txt\n").unwrap();
        let magic = tmp.path().join("magic");
        MagicDbBuilder::new()
            .section(50, "image/png", [MagicRuleSpec::new(0, b"\x89PNG")])
            .write_to(&magic)
            .unwrap();
        let picture = tmp.path().join("picture");
        std::fs::write(&picture, b"\x89PNG\r\n").unwrap();

        let config = TestConfigBuilder::new().glob_file(globs).magic_file(magic).build();
        let db = Arc::new(MimeDatabase::from_config(&config.database));
        let paths = vec![
            picture.clone(),
            tmp.path().join("notes.txt"),
            tmp.path().join("missing"),
        ];

        let verdicts = classify_paths(db, Arc::new(NoCache), 2, paths).await.unwrap();
        let types: Vec<Option<&str>> = verdicts.iter().map(|v| v.mime_type.as_deref()).collect();
        assert_eq!(types, vec![Some("image/png"), Some("text/plain"), None]);
        assert_eq!(verdicts[0].path, picture.display().to_string());
    }

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let (config, found) = load_config(&tmp.path().join("none.toml")).await.unwrap();
        assert!(!found);
        assert_eq!(config.dispatcher.max_workers, 4);
    }
}
