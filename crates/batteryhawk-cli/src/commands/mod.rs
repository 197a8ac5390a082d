//! Command implementations for the CLI.

mod save;
mod scan;
mod set;
mod show;

pub use save::cmd_save;
pub use scan::cmd_scan;
pub use set::cmd_set;
pub use show::cmd_show;
