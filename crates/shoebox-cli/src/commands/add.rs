use std::path::PathBuf;

use crate::commands::common::{report_failures, Session};
use crate::error::CliError;

pub async fn run_add(session: &Session, paths: Vec<PathBuf>) -> Result<(), CliError> {
    let mut events = session.engine.subscribe_events();
    session.connect_if_reachable().await;

    let ids = session.engine.add_images(paths).await;
    report_failures(&mut events);

    let snapshot = session.engine.snapshot();
    for id in ids {
        if let Some(record) = snapshot.record(&id) {
            println!("{id}  {}", record.status);
        }
    }
    Ok(())
}
