use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::output::OutputFormat;

/// Relay CLI - agent chains triggered by status changes
#[derive(Parser, Debug)]
#[command(name = "relayctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG wins when set
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a resource directory and check cross-references
    Validate {
        /// Directory with chains/, triggers/, agents/, teams/ and runtime.yaml
        dir: PathBuf,
    },

    /// Rank the members of a team for a piece of work
    Route {
        /// Team resource file (YAML)
        team_file: PathBuf,

        /// Required skill (repeatable)
        #[arg(short, long = "skill")]
        skills: Vec<String>,

        /// Estimated effort in hours
        #[arg(long, default_value_t = 1.0)]
        hours: f64,

        /// Runtime configuration with routing weights
        #[arg(long, env = "RELAY_RUNTIME_CONFIG")]
        runtime: Option<PathBuf>,
    },

    /// Replay a status change against an in-memory store
    Simulate {
        /// Resource directory to load and apply
        dir: PathBuf,

        /// Entity type, e.g. work_order
        #[arg(long)]
        entity_type: String,

        /// Entity id
        #[arg(long, default_value = "sim-1")]
        id: String,

        /// Previous status
        #[arg(long)]
        from: String,

        /// New status
        #[arg(long)]
        to: String,

        /// Team owning the entity
        #[arg(long)]
        team: Option<String>,

        /// User performing the change
        #[arg(long)]
        user: Option<String>,

        /// Entity attribute as key=value (repeatable; JSON values accepted)
        #[arg(long = "attr", value_parser = commands::simulate::parse_attribute)]
        attributes: Vec<(String, serde_json::Value)>,

        /// Approve every step that pauses for a human
        #[arg(long)]
        auto_approve: bool,

        /// Cap on steps per execution
        #[arg(long, default_value_t = relay_triggers::MAX_AUTO_PROGRESS_ITERATIONS)]
        max_steps: u32,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Validate { dir } => commands::validate::execute(&dir, self.output),
            Commands::Route {
                team_file,
                skills,
                hours,
                runtime,
            } => commands::route::execute(&team_file, &skills, hours, runtime.as_deref(), self.output),
            Commands::Simulate {
                dir,
                entity_type,
                id,
                from,
                to,
                team,
                user,
                attributes,
                auto_approve,
                max_steps,
            } => {
                let args = commands::simulate::SimulateArgs {
                    entity_type,
                    id,
                    from,
                    to,
                    team,
                    user,
                    attributes,
                    auto_approve,
                    max_steps,
                };
                commands::simulate::execute(&dir, args, self.output).await
            }
        }
    }
}
