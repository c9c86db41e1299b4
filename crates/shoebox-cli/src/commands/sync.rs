use crate::commands::common::{describe_event, is_failure, status_report, Session};
use crate::error::CliError;

pub async fn run_sync(session: &Session) -> Result<(), CliError> {
    session.require_remote("sync")?;
    let mut events = session.engine.subscribe_events();

    if !session.connect_if_reachable().await {
        let report = status_report(&session.engine.view(), true);
        println!(
            "Offline: {} uploads and {} remote deletes stay queued",
            report.pending_uploads, report.pending_remote_deletes
        );
        return Ok(());
    }

    let mut failures = 0_usize;
    while let Ok(event) = events.try_recv() {
        if is_failure(&event) {
            failures += 1;
            eprintln!("{}", describe_event(&event));
        } else {
            println!("{}", describe_event(&event));
        }
    }

    let report = status_report(&session.engine.view(), true);
    println!(
        "Sync completed: {} images, {} pending uploads, {} failed, {} remote deletes queued",
        report.images, report.pending_uploads, report.failed_uploads, report.pending_remote_deletes
    );
    if failures > 0 {
        tracing::warn!("{failures} sync operations failed; they are retried on the next sync");
    }
    Ok(())
}
