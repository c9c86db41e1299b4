use crate::commands::common::{
    format_record_lines, now_ms, record_to_list_item, ImageListItem, Session,
};
use crate::error::CliError;

pub fn run_list(session: &Session, as_json: bool) -> Result<(), CliError> {
    let records = session.engine.records();
    let now_ms = now_ms();

    if as_json {
        let json_items = records
            .iter()
            .map(|record| record_to_list_item(record, now_ms))
            .collect::<Vec<ImageListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No images yet. Add some with `shoebox add <PATH>...`.");
    } else {
        for line in format_record_lines(&records, now_ms) {
            println!("{line}");
        }
    }

    Ok(())
}
