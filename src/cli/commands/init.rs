//! Initialize command.

use console::style;

use crate::config::Settings;

use super::db_context;

/// Create the data directory and database schema.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;

    let ctx = db_context(settings);
    ctx.init_schema().await?;

    println!(
        "{} Initialized pagewatch in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
