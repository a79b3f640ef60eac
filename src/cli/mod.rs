pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic backend operations - migrations, sync, dispatch, policy and the WhatsApp worker")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply database migrations")]
    Migrate {
        #[arg(long, help = "Also migrate the cloud database")]
        cloud: bool,
    },

    #[command(about = "Run one local/cloud sync cycle for a clinic")]
    Sync(commands::sync::SyncArgs),

    #[command(about = "Run the scheduled message dispatcher")]
    Dispatch {
        #[arg(long, help = "Run a single tick and exit")]
        once: bool,
    },

    #[command(about = "Role and permission policy management")]
    Policy {
        #[command(subcommand)]
        cmd: commands::policy::PolicyCommands,
    },

    #[command(about = "Serve the WhatsApp worker HTTP surface")]
    Worker {
        #[arg(long, help = "Listen port (defaults to WHATSAPP_WORKER_PORT)")]
        port: Option<u16>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Migrate { cloud } => commands::migrate::handle(cloud, output_format).await,
        Commands::Sync(args) => commands::sync::handle(args, output_format).await,
        Commands::Dispatch { once } => commands::dispatch::handle(once, output_format).await,
        Commands::Policy { cmd } => commands::policy::handle(cmd, output_format).await,
        Commands::Worker { port } => commands::worker::handle(port, output_format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_with_tables() {
        let cli = Cli::try_parse_from([
            "clinic",
            "--json",
            "sync",
            "--clinic",
            "6f1c1c52-3b5e-4d7a-9a57-2f4b8c0c9e11",
            "--tables",
            "patients,invoices",
            "--full",
        ])
        .unwrap();
        assert!(matches!(OutputFormat::from_cli(&cli), OutputFormat::Json));
        match cli.command {
            Commands::Sync(args) => {
                assert_eq!(args.tables, vec!["patients".to_string(), "invoices".to_string()]);
                assert!(args.full);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn policy_assign_requires_a_role() {
        let result = Cli::try_parse_from([
            "clinic",
            "policy",
            "assign",
            "--user",
            "6f1c1c52-3b5e-4d7a-9a57-2f4b8c0c9e11",
            "--clinic",
            "0b8e4f1a-2c3d-4e5f-8a9b-1c2d3e4f5a6b",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_a_malformed_clinic_id() {
        assert!(Cli::try_parse_from(["clinic", "sync", "--clinic", "not-a-uuid"]).is_err());
    }

    #[test]
    fn dispatch_defaults_to_the_loop() {
        let cli = Cli::try_parse_from(["clinic", "dispatch"]).unwrap();
        assert!(matches!(cli.command, Commands::Dispatch { once: false }));
    }
}
