use crate::{api_source::DEFAULT_API_BASE, traversal::TraversalOptions};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "flowgraph.toml";
pub const DEFAULT_GRAPHML_PATH: &str = "graph.graphml";
pub const DEFAULT_HTML_PATH: &str = "transactions.html";

/// Deeper graphs get too large for the HTML view, only GraphML is written for them.
pub const HTML_DEPTH_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Sqlite,
    Frames,
    Api,
}

#[derive(Parser, Debug, Default)]
#[command(name = "flowgraph", about = "Trace the flow of funds between addresses")]
pub struct Args {
    /// Address or 64-character transaction hash to start from
    #[arg(short, long)]
    pub target: Option<String>,
    /// Maximum number of successor hops, 0 for unbounded
    #[arg(short = 'd', long)]
    pub depth: Option<usize>,
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub ledger: Option<LedgerKind>,
    /// SQLite database file or directory of CSV frames
    #[arg(long)]
    pub db: Option<PathBuf>,
    #[arg(long)]
    pub api_base: Option<String>,
    #[arg(long)]
    pub max_transactions: Option<usize>,
    #[arg(long)]
    pub graphml: Option<PathBuf>,
    #[arg(long)]
    pub html: Option<PathBuf>,
    #[arg(long)]
    pub dot: Option<PathBuf>,
    /// Print the per-pair summary
    #[arg(long)]
    pub summary: bool,
    /// Print every edge as a table
    #[arg(long)]
    pub table: bool,
    /// Print groups of addresses that pay each other in a circle
    #[arg(long)]
    pub loops: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub kind: LedgerKind,
    pub path: PathBuf,
    pub api_base: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            kind: LedgerKind::Sqlite,
            path: PathBuf::from("BC.db"),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub graphml: Option<PathBuf>,
    pub html: Option<PathBuf>,
    pub dot: Option<PathBuf>,
    pub summary: bool,
}

/// Contents of the TOML configuration file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub target: Option<String>,
    pub depth: Option<usize>,
    pub address_lengths: Vec<usize>,
    pub max_transactions: Option<usize>,
    pub ledger: LedgerConfig,
    pub output: OutputConfig,
}

impl FileConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse configuration")
    }

    /// Reads `path`. A missing file is only an error when it was asked for explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Self::from_toml(&text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outputs {
    pub graphml: PathBuf,
    pub html: Option<PathBuf>,
    pub dot: Option<PathBuf>,
    pub summary: bool,
    pub table: bool,
    pub loops: bool,
}

/// Everything a run needs, after command line flags were laid over the file.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: String,
    pub options: TraversalOptions,
    pub ledger: LedgerConfig,
    pub outputs: Outputs,
}

impl Config {
    pub fn load(args: Args) -> Result<Self> {
        let file = FileConfig::load(args.config.as_deref())?;
        Self::merge(args, file)
    }

    /// Command line values win over file values.
    pub fn merge(args: Args, file: FileConfig) -> Result<Self> {
        let Some(target) = args.target.or(file.target) else {
            bail!("No target given: pass --target or set `target` in the configuration file");
        };
        let max_depth = args.depth.or(file.depth).unwrap_or(0);

        let mut ledger = file.ledger;
        if let Some(kind) = args.ledger {
            ledger.kind = kind;
        }
        if let Some(path) = args.db {
            ledger.path = path;
        }
        if let Some(api_base) = args.api_base {
            ledger.api_base = api_base;
        }

        let html = args.html.or(file.output.html).or_else(|| {
            (max_depth < HTML_DEPTH_LIMIT).then(|| PathBuf::from(DEFAULT_HTML_PATH))
        });

        Ok(Self {
            target,
            options: TraversalOptions {
                max_depth,
                max_transactions: args.max_transactions.or(file.max_transactions),
                address_lengths: file.address_lengths,
            },
            ledger,
            outputs: Outputs {
                graphml: args
                    .graphml
                    .or(file.output.graphml)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_GRAPHML_PATH)),
                html,
                dot: args.dot.or(file.output.dot),
                summary: args.summary || file.output.summary,
                table: args.table,
                loops: args.loops,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
target = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT"
depth = 4
address_lengths = [26, 34, 42, 62]

[ledger]
kind = "frames"
path = "exports"

[output]
dot = "graph.dot"
summary = true
"#;

    #[test]
    fn file_values_parse() {
        let file = FileConfig::from_toml(FILE).unwrap();
        assert_eq!(file.depth, Some(4));
        assert_eq!(file.ledger.kind, LedgerKind::Frames);
        assert_eq!(file.ledger.api_base, DEFAULT_API_BASE);
        assert!(file.output.summary);
    }

    #[test]
    fn command_line_wins_over_file() {
        let args = Args {
            depth: Some(1),
            db: Some("other.db".into()),
            ledger: Some(LedgerKind::Sqlite),
            ..Default::default()
        };
        let config = Config::merge(args, FileConfig::from_toml(FILE).unwrap()).unwrap();
        assert_eq!(config.target, "1BoatSLRHtKNngkdXEeobR76b53LETtpyT");
        assert_eq!(config.options.max_depth, 1);
        assert_eq!(config.options.address_lengths, vec![26, 34, 42, 62]);
        assert_eq!(config.ledger.kind, LedgerKind::Sqlite);
        assert_eq!(config.ledger.path, PathBuf::from("other.db"));
        assert_eq!(config.outputs.dot, Some(PathBuf::from("graph.dot")));
    }

    #[test]
    fn html_only_for_shallow_graphs() {
        let shallow = Config::merge(
            Args {
                target: Some("abc".into()),
                depth: Some(2),
                ..Default::default()
            },
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(shallow.outputs.html, Some(PathBuf::from(DEFAULT_HTML_PATH)));
        assert_eq!(shallow.outputs.graphml, PathBuf::from(DEFAULT_GRAPHML_PATH));

        let deep = Config::merge(
            Args {
                target: Some("abc".into()),
                depth: Some(3),
                ..Default::default()
            },
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(deep.outputs.html, None);
    }

    #[test]
    fn missing_target_is_an_error() {
        assert!(Config::merge(Args::default(), FileConfig::default()).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfig::load(Some(&dir.path().join("absent.toml"))).is_err());

        let path = dir.path().join("flowgraph.toml");
        fs::write(&path, "depth = 2\n").unwrap();
        assert_eq!(FileConfig::load(Some(&path)).unwrap().depth, Some(2));
    }
}
