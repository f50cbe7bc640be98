//! Kytin Sentinel - Main entry point
//!
//! Brings up the signer, wraps it in the Resin/policy core and serves IPC
//! until interrupted.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kytin_sentinel::{initialize_signer, open_signer, scheduler, IpcServer, SentinelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kytin_sentinel=info,kytin_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kytin Sentinel v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = SentinelConfig::default_config_path();
    let config = SentinelConfig::load_or_create(&config_path)?;
    config.ensure_directories()?;

    // Bring up the signer; failure here is fatal before the socket exists
    let mut signer = open_signer(&config)?;
    let info = match initialize_signer(signer.as_mut()) {
        Ok(info) => info,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    if info.is_mock {
        warn!("Running with the simulated signer; signatures are not hardware-bound");
    }

    let core = Arc::new(config.build_core(signer));

    let reset_handle = if config.daily_reset.enabled {
        Some(scheduler::spawn_daily_reset(Arc::clone(&core)))
    } else {
        info!("Daily reset scheduler disabled");
        None
    };

    let ipc_server = IpcServer::new(config.ipc_socket_path.clone(), Arc::clone(&core));

    let admin = config.admin_socket_path.clone().map(|path| {
        let server = IpcServer::admin(path, Arc::clone(&core));
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let stopped = async move {
                let _ = stopped.await;
            };
            if let Err(e) = server.run_until(stopped).await {
                error!("Admin IPC server error: {}", e);
            }
        });
        (stop, handle)
    });
    if admin.is_none() {
        info!("Admin socket disabled; policy updates cannot be attested");
    }

    info!("Sentinel started successfully");

    // Serve until the shutdown signal
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    if let Err(e) = ipc_server.run_until(shutdown).await {
        error!("IPC server error: {}", e);
    }

    info!("Sentinel shutting down");

    if let Some((stop, handle)) = admin {
        let _ = stop.send(());
        if let Err(e) = handle.await {
            error!("Admin IPC task failed: {}", e);
        }
    }
    if let Some(handle) = reset_handle {
        handle.abort();
    }
    tokio::task::spawn_blocking(move || core.shutdown()).await?;

    Ok(())
}
