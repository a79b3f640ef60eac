use tracing::debug;
use uuid::Uuid;

use super::AuthUser;
use crate::authz::PolicyManager;
use crate::error::ApiError;

/// Resolve the caller's clinic and check `resource:action` inside it.
///
/// A `clinic_owner` of the clinic is always allowed, so administration keeps
/// working while the policy store is empty or unreachable.
pub fn authorize(policy: &PolicyManager, user: &AuthUser, resource: &str, action: &str) -> Result<Uuid, ApiError> {
    let clinic_id = user.clinic_id()?;

    if user.0.is_clinic_owner() {
        return Ok(clinic_id);
    }

    if policy.check(&user.id().to_string(), &clinic_id.to_string(), resource, action) {
        return Ok(clinic_id);
    }

    debug!(user_id = %user.id(), %clinic_id, resource, action, "Permission denied");
    Err(ApiError::forbidden(format!("Permission denied: {}:{}", resource, action)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Role;
    use crate::testing::{user, MemoryPolicyStore};
    use std::sync::Arc;

    async fn manager() -> PolicyManager {
        PolicyManager::init(Arc::new(MemoryPolicyStore::default())).await.unwrap()
    }

    #[tokio::test]
    async fn owner_passes_with_an_empty_policy_store() {
        let policy = PolicyManager::new(Arc::new(MemoryPolicyStore::default()));
        let clinic = Uuid::new_v4();
        let owner = AuthUser(user(Role::ClinicOwner, Some(clinic)));
        assert_eq!(authorize(&policy, &owner, "permissions", "edit").unwrap(), clinic);
    }

    #[tokio::test]
    async fn denial_names_the_resource_and_action() {
        let policy = manager().await;
        let clinic = Uuid::new_v4();
        let receptionist = AuthUser(user(Role::Receptionist, Some(clinic)));
        policy
            .assign_role(&receptionist.id().to_string(), "receptionist", &clinic.to_string())
            .await
            .unwrap();

        assert!(authorize(&policy, &receptionist, "patients", "view").is_ok());
        let err = authorize(&policy, &receptionist, "permissions", "edit").unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(err.message().contains("permissions:edit"));
    }

    #[tokio::test]
    async fn roles_do_not_leak_across_clinics() {
        let policy = manager().await;
        let home = Uuid::new_v4();
        let doctor = AuthUser(user(Role::Doctor, Some(Uuid::new_v4())));
        policy
            .assign_role(&doctor.id().to_string(), "doctor", &home.to_string())
            .await
            .unwrap();

        assert!(authorize(&policy, &doctor, "patients", "view").is_err());
    }
}
