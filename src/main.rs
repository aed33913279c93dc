use domain::{
    DataUpdate, ForceSyncOutcome, ListenerFault, ListenerResult, RealtimeService, SyncNotice,
};
use log::*;
use service::config::{Config, SyncMode};
use service::logging::Logger;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
    }

    info!(
        "Starting gestion-ventes sync client [{}] in {:?} mode",
        config.api_root(),
        config.sync_mode
    );

    let realtime = match RealtimeService::from_config(&config) {
        Ok(realtime) => realtime,
        Err(e) => {
            error!("Failed to initialize realtime service: {e}");
            std::process::exit(1);
        }
    };

    match config.sync_mode {
        SyncMode::Watch => watch(&realtime, &config).await,
        SyncMode::Poll => poll(&realtime).await,
        SyncMode::ForceSync => force_sync(&realtime).await,
    }
}

/// Follow the event stream until interrupted, logging every change.
async fn watch(realtime: &RealtimeService, config: &Config) {
    let _data = realtime.add_data_listener(|update: &DataUpdate| -> ListenerResult {
        for (data_type, data) in update.iter() {
            let rows = data.as_array().map(Vec::len).unwrap_or(1);
            info!("{data_type} changed ({rows} row(s))");
        }
        Ok(())
    });
    let _sync = realtime.add_sync_listener(|notice: &SyncNotice| -> ListenerResult {
        match notice {
            SyncNotice::Heartbeat => trace!("Heartbeat"),
            SyncNotice::GaveUp { .. } | SyncNotice::Disconnected { .. } => warn!("{notice:?}"),
            _ => info!("{notice:?}"),
        }
        Ok(())
    });
    let _faults = realtime.add_fault_listener(|fault: &ListenerFault| -> ListenerResult {
        error!("{fault}");
        Ok(())
    });

    realtime.sync_current_month_data().await;
    realtime.start(config.api_token().map(str::to_string));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down");
    realtime.stop();
}

/// Pull the current month once and print it as JSON on stdout.
async fn poll(realtime: &RealtimeService) {
    let snapshot = realtime.sync_current_month_data().await;
    if !snapshot.is_complete() {
        warn!("Some endpoints failed: {:?}", snapshot.failed);
    }

    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!("Failed to serialize snapshot: {e}");
            std::process::exit(1);
        }
    }
}

async fn force_sync(realtime: &RealtimeService) {
    match realtime.force_sync().await {
        ForceSyncOutcome::Requested => info!("Backend will push fresh data to connected clients"),
        ForceSyncOutcome::FellBack(snapshot) => info!(
            "Force sync request failed; pulled {} locally ({} endpoint(s) failed)",
            snapshot.period,
            snapshot.failed.len()
        ),
    }
}
