//! Per-build-run state: owns the status bus, the cancellation token, and the
//! logger/renderer tasks, and enforces the ordered shutdown protocol.

use crate::graph::target::Target;
use crate::graph::vertex::SolveStatus;
use crate::runtime::config::Config;
use crate::runtime::env::{EnvRegistry, EnvVar};
use crate::runtime::telemetry::Telemetry;
use crate::status::logger::{StatusLogger, StatusLoggerParams};
use crate::status::redact::SecretsRedactor;
use crate::status::render::{display_status, DisplayParams, RenderMode};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The root of the target graph for one build run.
///
/// Lifecycle: [`Session::new`], register environment variables (secrets
/// included) with [`Session::e`], then [`Session::start`] to bring up the
/// status pipeline, create targets, and finally [`Session::shutdown`] as the
/// last operation of the process.
pub struct Session {
    config: Config,
    env: Arc<EnvRegistry>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    log_dir: Option<PathBuf>,
    bus_tx: Option<mpsc::Sender<SolveStatus>>,
    logger_task: Option<JoinHandle<()>>,
    renderer_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Builds an idle session. No tasks run yet, so secret variables can
    /// still be registered before output starts streaming.
    pub fn new(config: Config) -> Result<Session> {
        config.validate()?;
        let env = Arc::new(EnvRegistry::new(config.import_env().clone()));
        Ok(Session {
            config,
            env,
            telemetry: Arc::new(Telemetry::default()),
            shutdown: CancellationToken::new(),
            log_dir: None,
            bus_tx: None,
            logger_task: None,
            renderer_task: None,
        })
    }

    /// Registers an environment variable and returns its current value.
    pub fn e(&self, spec: EnvVar) -> String {
        self.env.register(spec)
    }

    pub fn env(&self) -> &EnvRegistry {
        &self.env
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Clone of the root token; cancelling it unwinds the renderer early
    /// during abnormal shutdown. It does not cancel running build targets.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// This session's log directory, available once started.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn cache_dir(&self) -> &Path {
        self.config.cache_dir()
    }

    /// Brings up the status pipeline: creates the session log directory
    /// (failure is fatal), snapshots registered secrets into the redactor,
    /// and spawns the logger and renderer tasks. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        if self.bus_tx.is_some() {
            return Ok(());
        }

        let log_dir = self.config.session_log_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

        if self.config.print_config() {
            self.print_header(&log_dir);
        }

        let capacity = self.config.status_channel_capacity();
        let (bus_tx, bus_rx) = mpsc::channel(capacity);
        let (render_tx, render_rx) = mpsc::channel(capacity);

        let logger = StatusLogger::new(StatusLoggerParams {
            bus_rx,
            render_tx,
            redactor: Arc::new(SecretsRedactor::new(self.env.secrets())),
            telemetry: self.telemetry.clone(),
            log_dir: log_dir.clone(),
        });
        self.logger_task = Some(tokio::spawn(logger.run()));

        let mode = if self.config.plain_progress() {
            RenderMode::Plain
        } else {
            RenderMode::Auto
        };
        self.renderer_task = Some(tokio::spawn(display_status(DisplayParams {
            root_name: format!("logs: {}", log_dir.display()),
            rx: render_rx,
            mode,
            shutdown: self.shutdown.clone(),
        })));

        self.bus_tx = Some(bus_tx);
        self.log_dir = Some(log_dir);
        Ok(())
    }

    /// Creates a root-level target: the unit of log-file granularity.
    ///
    /// Panics when the session has not been started, which indicates a
    /// programming error in the calling build script.
    pub async fn target(&self, name: &str) -> Target {
        let bus = self
            .bus_tx
            .as_ref()
            .expect("session is not running; call start() before creating targets")
            .clone();
        Target::create(bus, name, None).await
    }

    /// Tears the session down, in order: close the bus, wait for the logger
    /// to drain and close every log file, then wait for the renderer to
    /// exit. Must be the last operation of the build; all targets must have
    /// been completed first, or the bus never drains.
    pub async fn shutdown(mut self) -> Result<()> {
        let Some(bus_tx) = self.bus_tx.take() else {
            return Ok(());
        };
        drop(bus_tx);

        if let Some(task) = self.logger_task.take() {
            task.await.context("status logger task failed")?;
        }
        if let Some(task) = self.renderer_task.take() {
            task.await.context("progress renderer task failed")?;
        }
        Ok(())
    }

    fn print_header(&self, log_dir: &Path) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "module:    {}", self.config.module_path());
        let _ = writeln!(out, "version:   {}", self.config.version());
        let _ = writeln!(out, "log dir:   {}", log_dir.display());
        let _ = writeln!(out, "cache dir: {}", self.config.cache_dir().display());
        let _ = self.env.write_help(&mut out);
        let _ = writeln!(out);
    }
}
