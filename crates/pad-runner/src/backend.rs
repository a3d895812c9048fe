//! Output backend selection

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use pad_config::{BackendConfig, BackendKind};
use pad_output::{
    DryRunBackend, OutputBackend, PabotBackend, PabotSettings, SerialBackend, SerialSettings,
    ThreeDsBackend,
};
use tracing::{info, instrument};

/// Build the configured backend without connecting it
///
/// `force_dry_run` overrides the configured kind.
pub fn build(config: &BackendConfig, force_dry_run: bool) -> Result<Arc<dyn OutputBackend>> {
    let kind = if force_dry_run {
        BackendKind::DryRun
    } else {
        config.kind
    };

    let backend: Arc<dyn OutputBackend> = match kind {
        BackendKind::DryRun => Arc::new(DryRunBackend::new()),
        BackendKind::Serial => {
            let device = device(config)?;
            Arc::new(SerialBackend::open_device(device, serial_settings(config)))
        }
        BackendKind::PaBotBase => {
            let settings = PabotSettings {
                baud: config.baud(),
                keepalive: config.keepalive(),
            };
            Arc::new(PabotBackend::open_device(device(config)?, settings))
        }
        BackendKind::ThreeDs => {
            let host = config
                .host
                .clone()
                .context("backend.host is required for the threeds backend")?;
            Arc::new(ThreeDsBackend::new(host, config.port, config.keepalive()))
        }
    };
    Ok(backend)
}

fn device(config: &BackendConfig) -> Result<PathBuf> {
    config
        .device
        .clone()
        .with_context(|| format!("backend.device is required for the {} backend", config.kind))
}

fn serial_settings(config: &BackendConfig) -> SerialSettings {
    SerialSettings {
        baud: config.baud(),
        keepalive: config.keepalive(),
        warmup: config.warmup(),
    }
}

/// Build and connect
#[instrument(skip(config), fields(kind = %config.kind))]
pub fn connect(config: &BackendConfig, force_dry_run: bool) -> Result<Arc<dyn OutputBackend>> {
    let backend = build(config, force_dry_run)?;
    backend
        .connect()
        .with_context(|| format!("failed to connect the {} backend", backend.name()))?;
    info!(backend = backend.name(), "Backend connected");
    Ok(backend)
}
