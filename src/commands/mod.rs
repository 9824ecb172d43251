//! CLI command handlers.

mod add;
mod list;
mod run;
mod verify;

pub use add::run_add_command;
pub use list::{run_list_command, run_remove_command};
pub use run::{run_get_command, run_restart_command, run_resume_command};
pub use verify::run_verify_command;
