pub mod add;
pub mod common;
pub mod completions;
pub mod list;
pub mod remove;
pub mod status;
pub mod sync;
pub mod watch;

pub use add::run_add;
pub use completions::run_completions;
pub use list::run_list;
pub use remove::run_remove;
pub use status::run_status;
pub use sync::run_sync;
pub use watch::run_watch;
