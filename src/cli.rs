//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chunkdl::DownloadStatus;
use clap::{Args as ClapArgs, Parser, Subcommand};

/// Default database file, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "chunkdl.db";

/// Resumable, chunked HTTP downloads.
///
/// Downloads are registered with `add` and run with `get` or `resume`.
/// Progress is kept in a local database; Ctrl-C pauses running downloads
/// and a later `resume` continues from the last checkpoint.
#[derive(Parser, Debug)]
#[command(name = "chunkdl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Database file holding downloads and chunk progress
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Config file (default: $XDG_CONFIG_HOME/chunkdl/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Maximum concurrent downloads (1-32), overrides the config file
    #[arg(
        short = 'c',
        long,
        global = true,
        value_parser = clap::value_parser!(u8).range(1..=32)
    )]
    pub concurrency: Option<u8>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a download.
    Add(AddArgs),

    /// Run one download (resuming it if it has progress).
    Get {
        /// Download identifier.
        id: i64,
    },

    /// Resume a paused or failed download, or every resumable one.
    Resume {
        /// Download identifier.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<i64>,

        /// Resume every paused, failed and pending download.
        #[arg(long)]
        all: bool,
    },

    /// Discard progress and download again from scratch.
    Restart {
        /// Download identifier.
        id: i64,
    },

    /// List downloads.
    List {
        /// Include completed downloads.
        #[arg(long)]
        all: bool,

        /// Only downloads with this status.
        #[arg(long, value_parser = parse_status)]
        status: Option<DownloadStatus>,
    },

    /// Remove a download and its chunk records.
    Remove {
        /// Download identifier.
        id: i64,
    },

    /// Check completed downloads against their expected hash.
    Verify {
        /// Download identifier.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<i64>,

        /// Verify every completed download.
        #[arg(long)]
        all: bool,

        /// Re-download files whose hash does not match.
        #[arg(long)]
        fix: bool,
    },
}

impl Command {
    /// Whether the command starts transfers, and so may take over downloads
    /// a crashed process left behind.
    pub fn runs_downloads(&self) -> bool {
        match self {
            Self::Get { .. } | Self::Resume { .. } | Self::Restart { .. } => true,
            Self::Verify { fix, .. } => *fix,
            Self::Add(_) | Self::List { .. } | Self::Remove { .. } => false,
        }
    }
}

/// Arguments for `add`.
#[derive(Debug, ClapArgs)]
pub struct AddArgs {
    /// Primary URL.
    pub url: String,

    /// Expected MD5 or SHA-256 digest (hex); also the dedup key.
    #[arg(long)]
    pub hash: String,

    /// Destination file path.
    #[arg(long)]
    pub dest: PathBuf,

    /// Alternate URL, tried in order after the primary (repeatable).
    #[arg(long = "mirror")]
    pub mirrors: Vec<String>,

    /// Expected size in bytes, if known.
    #[arg(long)]
    pub size: Option<u64>,

    /// Human readable title.
    #[arg(long)]
    pub title: Option<String>,

    /// Queue priority; higher runs first.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i64,
}

fn parse_status(raw: &str) -> Result<DownloadStatus, String> {
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_add_parses_all_options() {
        let args = Args::try_parse_from([
            "chunkdl",
            "add",
            "https://example.com/a.iso",
            "--hash",
            "5eb63bbbe01eeed093cb22bb8f5acdc3",
            "--dest",
            "/data/a.iso",
            "--mirror",
            "https://m1.example.com/a.iso",
            "--mirror",
            "https://m2.example.com/a.iso",
            "--size",
            "1024",
            "--title",
            "A",
        ])
        .unwrap();

        let Command::Add(add) = args.command else {
            panic!("expected add");
        };
        assert_eq!(add.url, "https://example.com/a.iso");
        assert_eq!(add.dest, PathBuf::from("/data/a.iso"));
        assert_eq!(add.mirrors.len(), 2);
        assert_eq!(add.size, Some(1024));
        assert_eq!(add.title.as_deref(), Some("A"));
        assert_eq!(add.priority, 0);
    }

    #[test]
    fn test_cli_add_requires_hash_and_dest() {
        let result = Args::try_parse_from(["chunkdl", "add", "https://example.com/a"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_cli_global_flags_defaults() {
        let args = Args::try_parse_from(["chunkdl", "list"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.db, PathBuf::from(DEFAULT_DB_PATH));
        assert!(args.config.is_none());
        assert!(args.concurrency.is_none());
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["chunkdl", "resume", "--all", "-c", "4", "-vv", "--db", "x.db"])
                .unwrap();
        assert_eq!(args.concurrency, Some(4));
        assert_eq!(args.verbose, 2);
        assert_eq!(args.db, PathBuf::from("x.db"));
        assert!(matches!(args.command, Command::Resume { id: None, all: true }));
    }

    #[test]
    fn test_cli_concurrency_range() {
        for bad in ["0", "33"] {
            let result = Args::try_parse_from(["chunkdl", "-c", bad, "list"]);
            assert_eq!(
                result.unwrap_err().kind(),
                clap::error::ErrorKind::ValueValidation
            );
        }
        let args = Args::try_parse_from(["chunkdl", "-c", "32", "list"]).unwrap();
        assert_eq!(args.concurrency, Some(32));
    }

    #[test]
    fn test_cli_resume_needs_id_or_all() {
        assert!(Args::try_parse_from(["chunkdl", "resume"]).is_err());
        assert!(Args::try_parse_from(["chunkdl", "resume", "3", "--all"]).is_err());
        let args = Args::try_parse_from(["chunkdl", "resume", "3"]).unwrap();
        assert!(matches!(args.command, Command::Resume { id: Some(3), all: false }));
    }

    #[test]
    fn test_cli_list_status_filter() {
        let args = Args::try_parse_from(["chunkdl", "list", "--status", "paused"]).unwrap();
        assert!(matches!(
            args.command,
            Command::List {
                status: Some(DownloadStatus::Paused),
                all: false
            }
        ));
        assert!(Args::try_parse_from(["chunkdl", "list", "--status", "bogus"]).is_err());
    }

    #[test]
    fn test_cli_verify_fix_flag() {
        let args = Args::try_parse_from(["chunkdl", "verify", "--all", "--fix"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Verify {
                id: None,
                all: true,
                fix: true
            }
        ));
    }

    #[test]
    fn test_cli_help_and_version() {
        assert_eq!(
            Args::try_parse_from(["chunkdl", "--help"]).unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
        assert_eq!(
            Args::try_parse_from(["chunkdl", "--version"]).unwrap_err().kind(),
            clap::error::ErrorKind::DisplayVersion
        );
    }

    #[test]
    fn test_cli_only_transfer_commands_run_downloads() {
        let runs = |argv: &[&str]| Args::try_parse_from(argv).unwrap().command.runs_downloads();

        assert!(runs(&["chunkdl", "get", "1"]));
        assert!(runs(&["chunkdl", "resume", "--all"]));
        assert!(runs(&["chunkdl", "restart", "1"]));
        assert!(runs(&["chunkdl", "verify", "1", "--fix"]));
        assert!(!runs(&["chunkdl", "verify", "--all"]));
        assert!(!runs(&["chunkdl", "list"]));
        assert!(!runs(&["chunkdl", "remove", "1"]));
    }
}
