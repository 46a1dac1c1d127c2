// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{
    env,
    fs::OpenOptions,
    path::{Path, PathBuf},
    process,
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use narc::{
    config::{cli_options, Config},
    daemon::Daemon,
};

const USAGE: &str = "\
Usage: narc [/path/to/narc.conf] [options]
       narc - (read config from stdin)
       narc -v or --version
       narc -h or --help

Examples:
       narc (run with default config)
       narc /etc/narc/narc.conf
       narc --remote-host logs.example.com --remote-port 514
       narc /etc/narc/narc.conf --loglevel verbose";

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("-v" | "--version") => {
            println!("narc v{}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Some("-h" | "--help") => {
            eprintln!("{USAGE}");
            process::exit(1);
        }
        _ => {}
    }

    let (config_file, options) = match args.split_first() {
        Some((first, rest)) if !first.starts_with("--") => (Some(PathBuf::from(first)), rest),
        _ => (None, args.as_slice()),
    };

    let config = match Config::load(config_file.as_deref(), &cli_options(options))
        .and_then(|mut config| config.apply_env().map(|()| config))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n*** FATAL CONFIG FILE ERROR ***");
            eprintln!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("Unable to set up logging: {e}");
        process::exit(1);
    }
    debug!("Logging subsystem enabled");

    if config_file.is_none() {
        warn!("No config file specified, using the default config");
    }
    for warning in config.ignored_directives() {
        warn!("{}", warning);
    }
    if let Some(pidfile) = &config.pidfile {
        write_pidfile(pidfile);
    }

    info!("Narc started, version {}", env!("CARGO_PKG_VERSION"));

    let cancel_token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel_token.clone()));

    let result = Daemon::new(config).run(cancel_token).await;
    if let Err(fatal) = result {
        error!("Shutting down: {}", fatal);
        process::exit(1);
    }
    info!("Narc stopped");
}

fn init_logging(config: &Config) -> Result<(), String> {
    let log_level = env::var("NARC_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| config.verbosity.filter_directive().to_string());
    let env_filter = EnvFilter::try_new(log_level).map_err(|e| e.to_string())?;

    let builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    match &config.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Can't open the log file {}: {e}", path.display()))?;
            let subscriber = builder.with_writer(Mutex::new(file)).finish();
            tracing::subscriber::set_global_default(subscriber).map_err(|e| e.to_string())
        }
        None => {
            let subscriber = builder.finish();
            tracing::subscriber::set_global_default(subscriber).map_err(|e| e.to_string())
        }
    }
}

fn write_pidfile(path: &Path) {
    if let Err(e) = std::fs::write(path, format!("{}\n", process::id())) {
        warn!("Unable to write pidfile {}: {}", path.display(), e);
    }
}

async fn cancel_on_signal(cancel_token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Received shutdown signal, stopping");
    cancel_token.cancel();
}
