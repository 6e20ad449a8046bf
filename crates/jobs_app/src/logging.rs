//! Logger setup for the `jobs` binary.
//!
//! Terminal output at the requested level, plus two daily files in the log
//! directory: `pipeline_YYYYMMDD.log` with everything from debug up and
//! `errors_YYYYMMDD.log` with errors only.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

pub struct LogOptions {
    pub level: LevelFilter,
    /// `None` disables the file loggers.
    pub dir: Option<PathBuf>,
}

pub fn initialize(options: &LogOptions) {
    let config = build_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        options.level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(dir) = &options.dir {
        let stamp = Local::now().format("%Y%m%d");
        let file_level = options.level.max(LevelFilter::Debug);
        if let Some(file) = open_log_file(dir, &format!("pipeline_{stamp}.log")) {
            loggers.push(WriteLogger::new(file_level, config.clone(), file));
        }
        if let Some(file) = open_log_file(dir, &format!("errors_{stamp}.log")) {
            loggers.push(WriteLogger::new(LevelFilter::Error, config, file));
        }
    }

    // A logger may already be installed (tests); keep it.
    let _ = CombinedLogger::init(loggers);
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}

fn open_log_file(dir: &Path, name: &str) -> Option<File> {
    if let Err(err) = fs::create_dir_all(dir) {
        eprintln!("Warning: could not create log directory {:?}: {}", dir, err);
        return None;
    }
    let path = dir.join(name);
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("Warning: could not open log file {:?}: {}", path, err);
            None
        }
    }
}
