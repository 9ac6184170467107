//! msg-to-handler daemon entry point
//!
//! Process mechanics happen here in a fixed order: parse arguments, load
//! and validate configuration, detach if asked (before any runtime threads
//! exist), initialize logging, then build the runtime and run the loop.

use clap::Parser;
use daemonize::Daemonize;
use msg2handler::config::{ConfigOverrides, DaemonConfig};
use msg2handler::dispatch::{DispatchLoop, DispatchOptions};
use msg2handler::error::DaemonError;
use msg2handler::handlers::{BuiltinHandlers, HandlerFactory};
use msg2handler::lifecycle::{shutdown_channel, ConfigReloader, LifecycleController, PidFile};
use msg2handler::observability::init_default_logging;
use msg2handler::routing::{HandlerRegistry, SharedRegistry, TopicPattern};
use msg2handler::transport::mqtt::MqttSessionFactory;
use msg2handler::transport::EndpointResolver;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Route message-bus topics to local monitoring handlers
#[derive(Parser, Debug)]
#[command(name = "msg-to-handler")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MSG_TO_HANDLER_CONFIG")]
    config: Option<PathBuf>,

    /// Topic for the default directory-queue handler
    #[arg(long, value_name = "TOPIC")]
    destination: Option<String>,

    /// Queue directory for the default directory-queue handler
    #[arg(long, value_name = "DIR")]
    dirq: Option<PathBuf>,

    /// Broker URI, e.g. mqtt://broker.example.org:1883
    #[arg(long, value_name = "URI", env = "MSG_TO_HANDLER_BROKER")]
    broker: Option<String>,

    /// File listing candidate broker URIs
    #[arg(long, value_name = "FILE")]
    broker_cache: Option<PathBuf>,

    /// Log handler notes and raise the log level
    #[arg(short, long)]
    verbose: bool,

    /// Detach into the background
    #[arg(short, long)]
    daemon: bool,

    /// Pid file path
    #[arg(long, value_name = "FILE")]
    pidfile: Option<PathBuf>,

    /// Validate configuration, print the handler table and exit
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            destination: self.destination.clone(),
            dirq: self.dirq.clone(),
            broker_uri: self.broker.clone(),
            broker_cache: self.broker_cache.clone(),
            pid_file: self.pidfile.clone(),
            verbose: self.verbose,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let informational = !e.use_stderr();
            let _ = e.print();
            return if informational {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            };
        }
    };

    let overrides = cli.overrides();
    let config = match load_configuration(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("msg-to-handler: {e}");
            return ExitCode::from(1);
        }
    };

    if cli.check {
        print_handler_table(&config);
        return ExitCode::SUCCESS;
    }

    if cli.daemon {
        if let Err(e) = detach(&config) {
            eprintln!("msg-to-handler: {e}");
            return ExitCode::from(1);
        }
    }

    init_default_logging(config.verbose);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        daemon = cli.daemon,
        "Starting msg-to-handler"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build async runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run_daemon(config, cli.config, overrides, cli.daemon)) {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn load_configuration(
    path: Option<&std::path::Path>,
    overrides: &ConfigOverrides,
) -> Result<DaemonConfig, DaemonError> {
    let mut config = DaemonConfig::load(path)?;
    config.apply_overrides(overrides)?;
    config.validate()?;
    Ok(config)
}

/// Print the configured handler table without constructing any handler
fn print_handler_table(config: &DaemonConfig) {
    println!("{:<40} {:<10} STATUS", "TOPIC", "HANDLER");
    for entry in &config.handlers {
        let status = match TopicPattern::compile(&entry.topic) {
            Err(e) => format!("invalid pattern: {e}"),
            Ok(_) if !BuiltinHandlers::KINDS.contains(&entry.handler.as_str()) => {
                "unknown handler kind".to_string()
            }
            Ok(_) => "ok".to_string(),
        };
        println!("{:<40} {:<10} {status}", entry.topic, entry.handler);
    }
}

/// Fork into the background; the daemonizer writes the pid file
fn detach(config: &DaemonConfig) -> Result<(), DaemonError> {
    let mut daemonize = Daemonize::new().working_directory("/");

    if let Some(pid_file) = &config.daemon.pid_file {
        daemonize = daemonize.pid_file(pid_file);
    }
    if let Some(log_file) = &config.daemon.log_file {
        let out = OpenOptions::new().create(true).append(true).open(log_file)?;
        let err = out.try_clone()?;
        daemonize = daemonize.stdout(out).stderr(err);
    }

    daemonize
        .start()
        .map_err(|e| DaemonError::daemonize(e.to_string()))
}

async fn run_daemon(
    config: DaemonConfig,
    config_path: Option<PathBuf>,
    overrides: ConfigOverrides,
    detached: bool,
) -> Result<(), DaemonError> {
    let pid_file = match &config.daemon.pid_file {
        Some(path) if detached => Some(PidFile::adopt(path)),
        Some(path) => Some(PidFile::create(path)?),
        None => None,
    };
    let resolver = EndpointResolver::from_config(&config.broker)?;

    let factory: Arc<dyn HandlerFactory> = Arc::new(BuiltinHandlers);
    let (registry, failures) = HandlerRegistry::load(&config.handlers, factory.as_ref());
    if registry.is_empty() {
        error!(
            configured = config.handlers.len(),
            failed = failures.len(),
            "No handlers loaded, nothing to listen for"
        );
        return Err(DaemonError::NoHandlers);
    }
    if !failures.is_empty() {
        warn!(
            failed = failures.len(),
            loaded = registry.len(),
            "Continuing with a partial handler registry"
        );
    }

    let registry = SharedRegistry::new(registry);
    let (shutdown_handle, shutdown_signal) = shutdown_channel();
    let reloader = ConfigReloader::new(config_path, overrides, factory, registry.clone());
    let _signals = LifecycleController::install(shutdown_handle, Some(reloader))?;

    let mut dispatch = DispatchLoop::new(
        MqttSessionFactory::new(config.broker.clone()),
        resolver,
        registry,
        shutdown_signal,
        DispatchOptions::from_config(&config),
    );
    if let Some(mut pid_file) = pid_file {
        dispatch = dispatch.with_drain_hook(move || pid_file.release());
    }

    let report = dispatch.run().await;
    info!(?report, "Dispatch loop finished");
    Ok(())
}
