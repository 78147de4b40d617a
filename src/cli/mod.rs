//! CLI parser and dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "pagewatch")]
#[command(about = "Web page watch and change-notification pipeline")]
#[command(version)]
pub struct Cli {
    /// Path to a config file (defaults to ./config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Manage watches
    Watch {
        #[command(subcommand)]
        command: WatchCommands,
    },

    /// Manage subscriptions
    Sub {
        #[command(subcommand)]
        command: SubCommands,
    },

    /// Run the scheduler, delivery dispatcher, and API server
    Run,

    /// Show row counts and recent runs
    Status,
}

#[derive(Subcommand)]
enum WatchCommands {
    /// Add a watch
    Add {
        /// Human-readable name
        #[arg(long)]
        name: String,
        /// Page URL to monitor
        #[arg(long)]
        url: String,
        /// Cron schedule (five fields, e.g. "*/30 * * * *")
        #[arg(long)]
        schedule: String,
        /// Schema type of extracted entities (e.g. "product")
        #[arg(long, default_value = "item")]
        schema_type: String,
        /// Identity field, repeatable; order matters
        #[arg(long = "identity-field", required = true)]
        identity_fields: Vec<String>,
        /// Extraction rules as inline JSON
        #[arg(long, default_value = "{}")]
        rules: String,
    },
    /// List watches
    List,
    /// Pause a watch
    Pause { watch_id: String },
    /// Resume a paused or errored watch
    Resume { watch_id: String },
    /// Soft-delete a watch
    Remove { watch_id: String },
    /// Run a watch now
    Trigger { watch_id: String },
}

#[derive(Subcommand)]
enum SubCommands {
    /// Add a subscription
    Add {
        /// Human-readable name
        #[arg(long)]
        name: String,
        /// Event kinds, repeatable (entity_appeared, entity_changed, entity_disappeared)
        #[arg(long = "event", required = true)]
        events: Vec<String>,
        /// Scope to one watch ID (all watches when omitted)
        #[arg(long)]
        watch: Option<String>,
        /// Filter conditions as inline JSON, e.g. {"conditions":[{"operator":"decreased","field":"price"}]}
        #[arg(long, default_value = "{}")]
        filters: String,
        /// Channel type
        #[arg(long, default_value = "webhook")]
        channel: String,
        /// Recipient, repeatable (webhook URLs)
        #[arg(long = "to", required = true)]
        recipients: Vec<String>,
    },
    /// List subscriptions
    List,
    /// Pause a subscription
    Pause { subscription_id: String },
    /// Resume a paused subscription
    Resume { subscription_id: String },
    /// Soft-delete a subscription
    Remove { subscription_id: String },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => commands::init::cmd_init(&settings).await,
        Commands::Watch { command } => match command {
            WatchCommands::Add {
                name,
                url,
                schedule,
                schema_type,
                identity_fields,
                rules,
            } => {
                commands::watch::cmd_add(
                    &settings,
                    name,
                    url,
                    schedule,
                    schema_type,
                    identity_fields,
                    &rules,
                )
                .await
            }
            WatchCommands::List => commands::watch::cmd_list(&settings).await,
            WatchCommands::Pause { watch_id } => {
                commands::watch::cmd_pause(&settings, &watch_id).await
            }
            WatchCommands::Resume { watch_id } => {
                commands::watch::cmd_resume(&settings, &watch_id).await
            }
            WatchCommands::Remove { watch_id } => {
                commands::watch::cmd_remove(&settings, &watch_id).await
            }
            WatchCommands::Trigger { watch_id } => {
                commands::watch::cmd_trigger(&settings, &watch_id).await
            }
        },
        Commands::Sub { command } => match command {
            SubCommands::Add {
                name,
                events,
                watch,
                filters,
                channel,
                recipients,
            } => {
                commands::sub::cmd_add(
                    &settings, name, &events, watch, &filters, channel, recipients,
                )
                .await
            }
            SubCommands::List => commands::sub::cmd_list(&settings).await,
            SubCommands::Pause { subscription_id } => {
                commands::sub::cmd_pause(&settings, &subscription_id).await
            }
            SubCommands::Resume { subscription_id } => {
                commands::sub::cmd_resume(&settings, &subscription_id).await
            }
            SubCommands::Remove { subscription_id } => {
                commands::sub::cmd_remove(&settings, &subscription_id).await
            }
        },
        Commands::Run => commands::daemon::cmd_run(&settings).await,
        Commands::Status => commands::status::cmd_status(&settings).await,
    }
}
