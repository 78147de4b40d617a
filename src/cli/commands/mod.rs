//! Command implementations.

pub mod daemon;
pub mod init;
pub mod status;
pub mod sub;
pub mod watch;

use crate::config::Settings;
use crate::repository::DbContext;

/// Open the database for a CLI command.
pub fn db_context(settings: &Settings) -> DbContext {
    DbContext::new(&settings.database_path())
}
