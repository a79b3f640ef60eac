//! Tenant-scoped RBAC: roles are granted per clinic, permissions per role or per user.

mod manager;
mod policy;
mod store;

pub use manager::PolicyManager;
pub use policy::{default_role_grants, PolicyKind, PolicyRule, PolicySet, ANY_DOMAIN};
pub use store::{PgPolicyStore, PolicyStore};

use thiserror::Error;

pub const RESOURCES: &[&str] = &[
    "users",
    "patients",
    "appointments",
    "billing",
    "treatments",
    "clinic",
    "templates",
    "doctors",
    "attendance",
    "devices",
    "permissions",
    "whatsapp",
    "sync",
];

pub const ACTIONS: &[&str] = &["view", "edit", "delete"];

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid default policy document: {0}")]
    Seed(String),

    #[error("Policy store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub(crate) fn validate_grant(resource: &str, action: &str) -> Result<(), PolicyError> {
    if !RESOURCES.contains(&resource) {
        return Err(PolicyError::UnknownResource(resource.to_string()));
    }
    if !ACTIONS.contains(&action) {
        return Err(PolicyError::UnknownAction(action.to_string()));
    }
    Ok(())
}
