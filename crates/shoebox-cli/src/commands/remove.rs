use crate::commands::common::{parse_image_id, report_failures, Session};
use crate::error::CliError;

pub async fn run_remove(session: &Session, raw_id: &str) -> Result<(), CliError> {
    let id = parse_image_id(raw_id)?;
    let mut events = session.engine.subscribe_events();
    session.connect_if_reachable().await;

    match session.engine.remove_image(&id).await {
        Ok(()) => {}
        Err(shoebox_core::Error::NotFound(_)) => {
            return Err(CliError::ImageNotFound(id.to_string()));
        }
        Err(error) => return Err(error.into()),
    }
    report_failures(&mut events);

    let pending = session.engine.view().pending_remote_deletes;
    if pending > 0 && !session.engine.is_connected() {
        println!("Removed {id} (remote copy is deleted on next sync)");
    } else {
        println!("Removed {id}");
    }
    Ok(())
}
