mod cli;
mod commands;
mod logging;
mod settings;

use std::process::ExitCode;

use clap::Parser;
use pipeline_logging::{pipeline_error, pipeline_info, pipeline_warn};

use cli::Cli;
use logging::LogOptions;

/// Exit code for an unusable configuration, distinct from a failed run.
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config_path, explicit) = cli.config_path();
    let loaded = match settings::load_config(&config_path, explicit) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let from_file = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    settings::apply_overrides(&mut config, cli.data_dir.clone());

    let log_dir = (!cli.no_file_log).then(|| {
        cli.log_dir
            .clone()
            .unwrap_or_else(|| config.data_dir.join("logs"))
    });
    logging::initialize(&LogOptions {
        level: pipeline_logging::parse_level(&cli.log_level),
        dir: log_dir,
    });
    if from_file {
        pipeline_info!(
            "Loaded config from {:?}: {} site(s), {} enabled",
            config_path,
            config.sites.len(),
            config.enabled_sites().count()
        );
    } else {
        pipeline_warn!("No config at {:?}, using defaults", config_path);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            pipeline_error!("Could not start the async runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(commands::execute(cli.command, config)) {
        Ok(code) => code,
        Err(err) => {
            pipeline_error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
