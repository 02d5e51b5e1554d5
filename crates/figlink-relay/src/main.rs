//! # figlink-relay
//!
//! Relay binary. Loads settings, starts logging and metrics, then serves
//! the WebSocket relay and HTTP trigger until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use figlink_core::ChannelRegistry;
use figlink_core::logging::{LogFormat, init_subscriber};
use figlink_server::{RelayServer, ServerConfig};
use figlink_settings::FiglinkSettings;
use figlink_settings::loader::{apply_overrides_from, read_settings_file};

/// How long open sessions get to send their close frames on shutdown.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Figma hardware relay.
#[derive(Parser, Debug)]
#[command(name = "figlink-relay", about = "WebSocket relay between Figma plugins and hardware drivers")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.figlink/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter, e.g. `debug` or `figlink_core=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Directory served for unmatched GET paths.
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut FiglinkSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir = Some(dir.to_string_lossy().into_owned());
        }
    }
}

/// Settings before command-line overrides.
///
/// Environment overrides that fail validation are dropped in favor of the
/// file alone. Only an unreadable or malformed file falls back to defaults.
/// The second value describes the fallback taken, if any.
fn resolve_settings<F>(path: &Path, lookup: F) -> (FiglinkSettings, Option<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let file = match read_settings_file(path) {
        Ok(settings) => settings,
        Err(e) => {
            return (
                FiglinkSettings::default(),
                Some(format!("failed to read settings file, using defaults: {e}")),
            );
        }
    };
    let mut layered = file.clone();
    apply_overrides_from(&mut layered, lookup);
    match layered.validate() {
        Ok(()) => (layered, None),
        Err(e) => (
            file,
            Some(format!(
                "environment overrides rejected, using settings file only: {e}"
            )),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings come first so the log level is known; a load failure is
    // reported once logging is up.
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(figlink_settings::settings_path);
    let (mut settings, fallback) = resolve_settings(&settings_path, |name| std::env::var(name).ok());
    args.apply(&mut settings);

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    if let Some(reason) = fallback {
        tracing::warn!(path = %settings_path.display(), "{reason}");
    }
    settings
        .validate()
        .with_context(|| format!("invalid settings ({})", settings_path.display()))?;

    let config = ServerConfig::from_settings(&settings);
    let registry = Arc::new(ChannelRegistry::new());
    let mut server = RelayServer::new(config, Arc::clone(&registry));
    match figlink_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!("figlink relay listening on ws://{addr}/ws");

    wait_for_signal().await?;

    tracing::info!("shutting down");
    server.shutdown().graceful_shutdown(vec![handle], None).await;

    let drained = tokio::time::timeout(SESSION_DRAIN_TIMEOUT, async {
        while registry.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            sessions = registry.session_count(),
            "sessions still open after drain timeout"
        );
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok(())
}
