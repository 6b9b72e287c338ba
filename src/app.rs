use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::{CliCommand, parse_cli_args, usage_text, version_text};
use crate::command_handlers::{
    handle_clear_cache, handle_devices, handle_export, handle_interfaces, handle_scan, handle_watch,
};
use crate::config::EngineSettings;
use crate::database::Database;
use crate::fingerprint::WarningHook;
use crate::registry::DiscoveryOrchestrator;

/// Receives every line a command prints
pub type OutputHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a command needs besides its arguments
#[derive(Clone)]
pub struct AppContext {
    pub db_path: PathBuf,
    pub settings: EngineSettings,
    output: OutputHook,
}

impl AppContext {
    /// Settings from `LANLENS_*` variables, output on stdout.
    pub fn from_env() -> Self {
        Self::new(EngineSettings::from_env())
    }

    pub fn new(settings: EngineSettings) -> Self {
        Self {
            db_path: settings.db_path.clone(),
            settings,
            output: Arc::new(|line: &str| println!("{}", line)),
        }
    }

    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    pub fn with_output_hook(mut self, output: OutputHook) -> Self {
        self.output = output;
        self
    }

    pub(crate) fn emit(&self, text: &str) {
        (self.output)(text);
    }

    pub(crate) fn output(&self) -> OutputHook {
        Arc::clone(&self.output)
    }

    /// Open the database and restore the engine state persisted in it.
    pub(crate) fn open_engine(&self) -> Result<DiscoveryOrchestrator> {
        let database = Database::new(self.db_path.clone())
            .with_context(|| format!("Failed to open database at {}", self.db_path.display()))?;
        let hook: WarningHook = Arc::new(|message: &str| crate::log_warn!("{}", message));
        DiscoveryOrchestrator::open(self.settings.clone(), database, Some(hook))
            .context("Failed to start discovery engine")
    }
}

/// Run the app by parsing CLI-style args and dispatching the command.
pub async fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    run_with(&AppContext::from_env(), args).await
}

/// Same as [`run`] with an explicit context.
pub async fn run_with<I, S>(ctx: &AppContext, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let command = parse_cli_args(args)?;
    execute_command(ctx, command).await
}

pub(crate) async fn execute_command(ctx: &AppContext, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Help => {
            ctx.emit(&usage_text());
            Ok(())
        }
        CliCommand::Version => {
            ctx.emit(&version_text());
            Ok(())
        }
        CliCommand::Interfaces => handle_interfaces(ctx).await,
        CliCommand::Scan { full, json } => handle_scan(ctx, full, json).await,
        CliCommand::Watch { seconds, interface } => handle_watch(ctx, seconds, interface).await,
        CliCommand::Devices => handle_devices(ctx).await,
        CliCommand::Export { format } => handle_export(ctx, format).await,
        CliCommand::ClearCache => handle_clear_cache(ctx).await,
    }
}
