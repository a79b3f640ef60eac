use clap::Subcommand;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::authz::{PgPolicyStore, PolicyManager};
use crate::cli::{utils, OutputFormat};
use crate::config;

#[derive(Subcommand)]
pub enum PolicyCommands {
    #[command(about = "Insert the default role grants into an empty policy store")]
    Seed,

    #[command(about = "Show a user's roles and effective permissions in a clinic")]
    List {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        clinic: Uuid,
    },

    #[command(about = "Replace a user's role in a clinic")]
    Assign {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        clinic: Uuid,
        #[arg(long)]
        role: String,
    },

    #[command(about = "Remove one role from a user in a clinic")]
    Revoke {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        clinic: Uuid,
        #[arg(long)]
        role: String,
    },
}

pub async fn handle(cmd: PolicyCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config::config();
    let db = utils::connect(config)?;
    let policy = PolicyManager::new(Arc::new(PgPolicyStore::new(db.local().clone())));

    let result = run(&policy, cmd, &output_format).await;
    db.close_all().await;
    result
}

async fn run(policy: &PolicyManager, cmd: PolicyCommands, output_format: &OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Seed => {
            let seeded = policy.seed_defaults().await?;
            let message = if seeded == 0 {
                "Policy store already holds grants; nothing seeded".to_string()
            } else {
                format!("Seeded {} default rules", seeded)
            };
            utils::output_success(output_format, &message, Some(json!({ "seeded": seeded })))
        }
        PolicyCommands::List { user, clinic } => {
            policy.reload().await?;
            let (user, clinic) = (user.to_string(), clinic.to_string());
            let report = json!({
                "user_id": user,
                "clinic_id": clinic,
                "roles": policy.roles_for(&user, &clinic),
                "permissions": policy.list_permissions(&user, &clinic),
            });
            utils::output_report(output_format, "Policy for user", &report)
        }
        PolicyCommands::Assign { user, clinic, role } => {
            policy.replace_role(&user.to_string(), &role, &clinic.to_string()).await?;
            utils::output_success(output_format, &format!("Assigned role '{}' to {}", role, user), None)
        }
        PolicyCommands::Revoke { user, clinic, role } => {
            policy.revoke_role(&user.to_string(), &role, &clinic.to_string()).await?;
            utils::output_success(output_format, &format!("Revoked role '{}' from {}", role, user), None)
        }
    }
}
