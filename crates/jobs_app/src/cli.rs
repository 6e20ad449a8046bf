use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const DEFAULT_CONFIG: &str = "config/pipeline.ron";

#[derive(Debug, Parser)]
#[command(name = "jobs")]
#[command(about = "Extract, normalize and deduplicate job postings")]
pub struct Cli {
    /// Pipeline config (RON).
    #[arg(long, global = true, env = "JOBS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `data_dir` from the config.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "JOBS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Defaults to `<data_dir>/logs`.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log to the terminal only.
    #[arg(long, global = true)]
    pub no_file_log: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Fetch listing pages and stage raw records
    Extract {
        /// Limit to these sites (repeatable); all enabled sites otherwise.
        #[arg(long = "site")]
        sites: Vec<String>,
    },
    /// Normalize and deduplicate the staged raw records
    Transform,
    /// Hand the staged canonical records to the output sink
    Load,
    /// Extract, transform and load in one run
    RunAll {
        #[arg(long = "site")]
        sites: Vec<String>,
    },
}

impl Cli {
    /// Config path and whether the user named it.
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_all_accepts_repeated_sites() {
        let cli = Cli::try_parse_from(["jobs", "run-all", "--site", "a", "--site", "b"]).unwrap();
        assert_eq!(
            cli.command,
            Command::RunAll {
                sites: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "jobs",
            "extract",
            "--data-dir",
            "/tmp/data",
            "--no-file-log",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/data")));
        assert!(cli.no_file_log);
        assert_eq!(cli.command, Command::Extract { sites: vec![] });
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["jobs", "scrape"]).is_err());
    }
}
