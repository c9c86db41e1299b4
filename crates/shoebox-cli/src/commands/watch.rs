use std::sync::Arc;

use shoebox_core::connectivity::{ConnectivityMonitor, TcpProbe};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{describe_event, is_failure, status_report, Session};
use crate::error::CliError;

/// Keep the gallery in sync until Ctrl-C, following connectivity as it changes.
pub async fn run_watch(session: &Session) -> Result<(), CliError> {
    session.require_remote("watch")?;
    let config = &session.config;

    let monitor = Arc::new(ConnectivityMonitor::new(false, config.stable_polls));
    let probe = TcpProbe::new(config.probe_addr.clone(), config.probe_timeout);
    let poll_interval = config.poll_interval;
    let monitor_task = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run(&probe, poll_interval).await })
    };

    let mut events = session.engine.subscribe_events();
    let follow_task = session.engine.follow_connectivity(monitor.subscribe());
    println!("Watching {} (Ctrl-C to stop)", config.data_dir.display());

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if is_failure(&event) => eprintln!("{}", describe_event(&event)),
                Ok(event) => println!("{}", describe_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {skipped} sync events");
                }
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    monitor_task.abort();
    follow_task.abort();

    let report = status_report(&session.engine.view(), true);
    println!(
        "Stopped: {} pending uploads, {} remote deletes queued",
        report.pending_uploads, report.pending_remote_deletes
    );
    Ok(())
}
