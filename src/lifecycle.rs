//! Process lifecycle: shutdown flag, OS signals, live reload and pid file
//!
//! Signals never touch dispatch state directly. SIGINT, SIGTERM and SIGHUP
//! set a one-shot shutdown flag that the dispatch loop observes at its
//! blocking points; SIGUSR1 rebuilds the handler registry and publishes it
//! as a new snapshot.

use crate::config::{ConfigError, ConfigOverrides, DaemonConfig};
use crate::error::DaemonError;
use crate::handlers::HandlerFactory;
use crate::observability::metrics;
use crate::routing::{HandlerRegistry, RegistryError, SharedRegistry};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Create a connected shutdown handle and signal
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

/// Requests shutdown; clones share one flag
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Set the flag; returns true only for the request that actually set it
    pub fn request(&self) -> bool {
        self.tx.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        })
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested
    ///
    /// Cancel safe; never resolves if every handle is dropped unrequested.
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Live reload failures
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Failed to reload configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Reloaded configuration rejected: {0}")]
    Rejected(#[from] RegistryError),
    #[error("Reload task failed: {0}")]
    Task(String),
}

/// Rebuilds the handler registry from the configuration file
#[derive(Clone)]
pub struct ConfigReloader {
    config_path: Option<PathBuf>,
    overrides: ConfigOverrides,
    factory: Arc<dyn HandlerFactory>,
    registry: SharedRegistry,
}

impl ConfigReloader {
    pub fn new(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
        factory: Arc<dyn HandlerFactory>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            config_path,
            overrides,
            factory,
            registry,
        }
    }

    /// Reload and publish; the old registry stays in place on any error
    ///
    /// Returns the number of entries in the new registry.
    pub fn reload(&self) -> Result<usize, ReloadError> {
        let mut config = DaemonConfig::load(self.config_path.as_deref())?;
        config.apply_overrides(&self.overrides)?;

        let (registry, failures) = HandlerRegistry::load(&config.handlers, self.factory.as_ref());
        let loaded = registry.len();
        self.registry.replace(registry)?;

        metrics().registry_reloaded();
        info!(
            event = "registry_reloaded",
            loaded,
            failed = failures.len(),
            "Handler registry reloaded"
        );
        Ok(loaded)
    }

    /// [`Self::reload`] on the blocking pool, keeping file I/O off the runtime
    pub async fn reload_in_background(&self) -> Result<usize, ReloadError> {
        let reloader = self.clone();
        tokio::task::spawn_blocking(move || reloader.reload())
            .await
            .map_err(|e| ReloadError::Task(e.to_string()))?
    }
}

/// Installs OS signal handling
pub struct LifecycleController;

impl LifecycleController {
    /// Register signal streams and spawn the task that serves them
    ///
    /// Registration happens before spawning so failures surface to the caller.
    pub fn install(
        shutdown: ShutdownHandle,
        reloader: Option<ConfigReloader>,
    ) -> Result<JoinHandle<()>, DaemonError> {
        let mut interrupt = signal(SignalKind::interrupt()).map_err(DaemonError::Signal)?;
        let mut terminate = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;
        let mut hangup = signal(SignalKind::hangup()).map_err(DaemonError::Signal)?;
        let mut user1 = signal(SignalKind::user_defined1()).map_err(DaemonError::Signal)?;

        Ok(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = interrupt.recv() => "SIGINT",
                    _ = terminate.recv() => "SIGTERM",
                    _ = hangup.recv() => "SIGHUP",
                    _ = user1.recv() => {
                        match &reloader {
                            Some(reloader) => {
                                if let Err(e) = reloader.reload_in_background().await {
                                    error!(error = %e, "Reload failed, keeping current handlers");
                                }
                            }
                            None => warn!("SIGUSR1 received but reloading is not configured"),
                        }
                        continue;
                    }
                };

                if shutdown.request() {
                    info!(signal = name, "Shutdown requested");
                } else {
                    info!(signal = name, "Shutdown already in progress");
                }
            }
        }))
    }
}

/// Pid file removed when released or dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    released: bool,
}

impl PidFile {
    /// Write the current process id
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self {
            path,
            released: false,
        })
    }

    /// Take ownership of a pid file written by someone else (the daemonizer)
    pub fn adopt<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file; later calls do nothing
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Removed pid file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove pid file"),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerConfig;
    use crate::handlers::BuiltinHandlers;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_shutdown_request_is_one_shot() {
        let (handle, signal) = shutdown_channel();
        assert!(!signal.is_requested());
        assert!(handle.request());
        assert!(!handle.clone().request());
        assert!(signal.is_requested());
        assert!(handle.is_requested());
    }

    #[tokio::test]
    async fn test_requested_resolves_after_request() {
        let (handle, mut signal) = shutdown_channel();
        let waiter = tokio::spawn(async move { signal.requested().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.request();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown not observed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_requested_resolves_if_already_set() {
        let (handle, mut signal) = shutdown_channel();
        handle.request();
        tokio::time::timeout(Duration::from_millis(100), signal.requested())
            .await
            .unwrap();
    }

    #[test]
    fn test_pid_file_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.pid");

        let mut pid = PidFile::create(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());

        pid.release();
        assert!(!path.exists());
        pid.release();
    }

    #[test]
    fn test_pid_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.pid");
        {
            let _pid = PidFile::create(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    fn write_config(handlers: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            format!("[broker]\nuri = \"mqtt://localhost:1883\"\n{handlers}").as_bytes(),
        )
        .unwrap();
        file
    }

    #[test]
    fn test_reload_swaps_registry() {
        let (initial, _) =
            HandlerRegistry::load(&[HandlerConfig::new("old.topic", "log")], &BuiltinHandlers);
        let shared = SharedRegistry::new(initial);

        let file = write_config(
            "[[handlers]]\ntopic = \"new.*\"\nhandler = \"log\"\n\n\
             [[handlers]]\ntopic = \"broken\"\nhandler = \"nope\"\n",
        );
        let reloader = ConfigReloader::new(
            Some(file.path().to_path_buf()),
            ConfigOverrides::default(),
            Arc::new(BuiltinHandlers),
            shared.clone(),
        );

        assert_eq!(reloader.reload().unwrap(), 1);
        assert_eq!(shared.snapshot().topics(), vec!["new.*".to_string()]);
    }

    #[tokio::test]
    async fn test_background_reload_publishes_new_snapshot() {
        let (initial, _) =
            HandlerRegistry::load(&[HandlerConfig::new("old.topic", "log")], &BuiltinHandlers);
        let shared = SharedRegistry::new(initial);
        let mut rx = shared.subscribe();

        let file = write_config("[[handlers]]\ntopic = \"fresh.topic\"\nhandler = \"log\"\n");
        let reloader = ConfigReloader::new(
            Some(file.path().to_path_buf()),
            ConfigOverrides::default(),
            Arc::new(BuiltinHandlers),
            shared.clone(),
        );

        assert_eq!(reloader.reload_in_background().await.unwrap(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().topics(),
            vec!["fresh.topic".to_string()]
        );
    }

    #[test]
    fn test_reload_without_handlers_keeps_old_registry() {
        let (initial, _) =
            HandlerRegistry::load(&[HandlerConfig::new("old.topic", "log")], &BuiltinHandlers);
        let shared = SharedRegistry::new(initial);

        let file = write_config("[[handlers]]\ntopic = \"x\"\nhandler = \"nope\"\n");
        let reloader = ConfigReloader::new(
            Some(file.path().to_path_buf()),
            ConfigOverrides::default(),
            Arc::new(BuiltinHandlers),
            shared.clone(),
        );

        assert!(matches!(
            reloader.reload(),
            Err(ReloadError::Rejected(RegistryError::Empty))
        ));
        assert_eq!(shared.snapshot().topics(), vec!["old.topic".to_string()]);
    }
}
