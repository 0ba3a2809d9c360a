#![forbid(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod site;
pub mod task;
pub mod units;
pub mod watch;

use std::sync::Arc;

use camino::Utf8Path;
use console::style;

use crate::cli::CliArgs;
use crate::config::Config;
use crate::graph::Registry;
use crate::server::Notifier;

pub use crate::error::SitekitError;

/// High-level entry point used by `main.rs`: load + validate the config,
/// build the task registry, then run the requested tasks in order.
pub async fn run(args: CliArgs) -> Result<(), SitekitError> {
    let config = Config::load(Utf8Path::new(&args.config))?;
    let notifier = Notifier::default();
    let registry = Arc::new(site::registry(&config, &notifier)?);

    let mut tasks = args.tasks;
    if tasks.is_empty() {
        tasks.push("default".to_string());
    }

    for name in &tasks {
        dispatch(name, &config, &registry, &notifier).await?;
    }

    Ok(())
}

async fn dispatch(
    name: &str,
    config: &Config,
    registry: &Arc<Registry>,
    notifier: &Notifier,
) -> Result<(), SitekitError> {
    match name {
        // webserver + watch, running until the process is torn down
        "default" => {
            eprintln!(
                "Running {} in {} mode.",
                style("sitekit").red(),
                style("watch").blue()
            );

            let _server = server::start(&config.server, notifier)?;
            let bindings = watch::bindings(config)?;
            watch::watch(registry.clone(), bindings).await?;
            Ok(())
        }
        "webserver" => {
            let handle = server::start(&config.server, notifier)?;
            tokio::task::spawn_blocking(move || handle.wait())
                .await
                .map_err(|e| error::ServerError::Io(std::io::Error::other(e)))?;
            Ok(())
        }
        "watch" => {
            let bindings = watch::bindings(config)?;
            watch::watch(registry.clone(), bindings).await?;
            Ok(())
        }
        _ => {
            registry.run(name).await?;
            Ok(())
        }
    }
}
