use crate::commands::common::{status_report, Session};
use crate::error::CliError;

pub fn run_status(session: &Session, as_json: bool) -> Result<(), CliError> {
    let report = status_report(&session.engine.view(), session.remote_enabled);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("State:                  {}", report.state);
    println!(
        "Remote:                 {}",
        if report.remote_configured {
            "configured"
        } else {
            "not configured"
        }
    );
    println!("Images:                 {}", report.images);
    println!("Pending uploads:        {}", report.pending_uploads);
    println!("Failed uploads:         {}", report.failed_uploads);
    println!("Pending remote deletes: {}", report.pending_remote_deletes);
    Ok(())
}
