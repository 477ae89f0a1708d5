//! CLI command definitions.

use clap::{Subcommand, ValueEnum};
use gantry_core::workflow::TriggerType;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new workflow
    Init,

    /// Validate a workflow file
    Validate {
        /// Path to workflow file
        #[arg(default_value = "gantry.yaml")]
        path: String,
    },

    /// Show the execution plan for a workflow without running it
    Plan {
        /// Path to workflow file
        #[arg(default_value = "gantry.yaml")]
        path: String,

        /// Trigger type to plan for
        #[arg(short, long, value_enum, default_value_t = TriggerArg::PullRequest)]
        trigger: TriggerArg,
    },

    /// Collect integration test groups from a catalog
    Collect {
        /// Path to group catalog
        #[arg(default_value = "tests/integration/groups.yaml")]
        catalog: String,

        /// Trigger type the collection runs under
        #[arg(short, long, value_enum, default_value_t = TriggerArg::PullRequest)]
        trigger: TriggerArg,
    },

    /// Run a workflow locally
    Run {
        /// Path to workflow file
        #[arg(default_value = "gantry.yaml")]
        path: String,

        /// Trigger type to run as
        #[arg(short, long, value_enum, default_value_t = TriggerArg::Manual)]
        trigger: TriggerArg,

        /// Git ref the run is for
        #[arg(short, long)]
        git_ref: Option<String>,

        /// Print step output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}

/// Trigger type as a CLI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerArg {
    PullRequest,
    Schedule,
    WorkflowCall,
    Manual,
}

impl From<TriggerArg> for TriggerType {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::PullRequest => TriggerType::PullRequest,
            TriggerArg::Schedule => TriggerType::Schedule,
            TriggerArg::WorkflowCall => TriggerType::WorkflowCall,
            TriggerArg::Manual => TriggerType::Manual,
        }
    }
}
