use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::policy::{default_rules, PolicyRule, PolicySet, ANY_DOMAIN};
use super::store::PolicyStore;
use super::{validate_grant, PolicyError};
use crate::database::models::Role;

/// Process-wide policy handle.
///
/// Reads clone the current `Arc<PolicySet>` and never wait on storage. Writes are
/// serialized, persisted through the store first, then published as a new snapshot.
pub struct PolicyManager {
    store: Arc<dyn PolicyStore>,
    snapshot: RwLock<Option<Arc<PolicySet>>>,
    write_lock: Mutex<()>,
}

impl PolicyManager {
    /// Create an unloaded manager; every check denies until `reload` succeeds
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the persisted policy, seeding role defaults into an empty store
    pub async fn init(store: Arc<dyn PolicyStore>) -> Result<Self, PolicyError> {
        let manager = Self::new(store);
        manager.seed_defaults().await?;
        manager.reload().await?;
        Ok(manager)
    }

    fn current(&self) -> Option<Arc<PolicySet>> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(_) => {
                error!("Policy snapshot lock poisoned");
                None
            }
        }
    }

    fn publish(&self, set: PolicySet) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Some(Arc::new(set)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(set)),
        }
    }

    fn current_or_empty(&self) -> PolicySet {
        self.current().map(|s| (*s).clone()).unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Allow if any grant matches the user's roles in `clinic_id`, or a direct grant
    pub fn check(&self, user_id: &str, clinic_id: &str, resource: &str, action: &str) -> bool {
        match self.current() {
            Some(set) => set.check(user_id, clinic_id, resource, action),
            None => {
                warn!(
                    user_id,
                    clinic_id, resource, action, "Policy not loaded, denying request"
                );
                false
            }
        }
    }

    pub fn roles_for(&self, user_id: &str, clinic_id: &str) -> BTreeSet<String> {
        self.current()
            .map(|set| set.roles_for(user_id, clinic_id))
            .unwrap_or_default()
    }

    pub fn list_permissions(&self, user_id: &str, clinic_id: &str) -> BTreeMap<String, Vec<String>> {
        self.current()
            .map(|set| set.permissions_for(user_id, clinic_id))
            .unwrap_or_default()
    }

    /// Re-read every persisted tuple and swap the snapshot
    pub async fn reload(&self) -> Result<usize, PolicyError> {
        let _guard = self.write_lock.lock().await;
        let rules = self.store.load().await.map_err(|e| {
            error!("Failed to load policy store: {}", e);
            e
        })?;
        let count = rules.len();
        self.publish(PolicySet::from_rules(rules));
        info!("Loaded {} policy rules", count);
        Ok(count)
    }

    /// Insert the embedded role grants when the store holds no grants yet
    pub async fn seed_defaults(&self) -> Result<usize, PolicyError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.store.load().await?;
        if existing.iter().any(|r| r.kind == super::PolicyKind::Grant) {
            return Ok(0);
        }

        let rules = default_rules()?;
        self.store.insert(&rules).await?;
        let count = rules.len();
        let mut set = PolicySet::from_rules(existing);
        for rule in rules {
            set = set.with(rule);
        }
        self.publish(set);
        info!("Seeded {} default policy rules", count);
        Ok(count)
    }

    pub async fn assign_role(&self, user_id: &str, role: &str, clinic_id: &str) -> Result<(), PolicyError> {
        role.parse::<Role>().map_err(PolicyError::UnknownRole)?;
        let _guard = self.write_lock.lock().await;
        let rule = PolicyRule::role(user_id, role, clinic_id);
        self.store.insert(std::slice::from_ref(&rule)).await?;
        self.publish(self.current_or_empty().with(rule));
        info!(user_id, role, clinic_id, "Assigned role");
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: &str, role: &str, clinic_id: &str) -> Result<(), PolicyError> {
        let _guard = self.write_lock.lock().await;
        let rule = PolicyRule::role(user_id, role, clinic_id);
        self.store.remove(&rule).await?;
        self.publish(self.current_or_empty().without(&rule));
        info!(user_id, role, clinic_id, "Revoked role");
        Ok(())
    }

    /// Swap every role the user holds in the clinic for `role` in one store transaction
    pub async fn replace_role(&self, user_id: &str, role: &str, clinic_id: &str) -> Result<(), PolicyError> {
        role.parse::<Role>().map_err(PolicyError::UnknownRole)?;
        let _guard = self.write_lock.lock().await;
        self.store.replace_role(user_id, clinic_id, role).await?;
        self.publish(self.current_or_empty().with_role_replaced(user_id, clinic_id, role));
        info!(user_id, role, clinic_id, "Replaced role");
        Ok(())
    }

    pub async fn grant(&self, user_id: &str, clinic_id: &str, resource: &str, action: &str) -> Result<(), PolicyError> {
        validate_grant(resource, action)?;
        let _guard = self.write_lock.lock().await;
        let rule = PolicyRule::grant(user_id, clinic_id, resource, action);
        self.store.insert(std::slice::from_ref(&rule)).await?;
        self.publish(self.current_or_empty().with(rule));
        info!(user_id, clinic_id, resource, action, "Granted permission");
        Ok(())
    }

    pub async fn revoke_grant(
        &self,
        user_id: &str,
        clinic_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<(), PolicyError> {
        validate_grant(resource, action)?;
        let _guard = self.write_lock.lock().await;
        let rule = PolicyRule::grant(user_id, clinic_id, resource, action);
        self.store.remove(&rule).await?;
        self.publish(self.current_or_empty().without(&rule));
        info!(user_id, clinic_id, resource, action, "Revoked permission");
        Ok(())
    }

    /// Number of tuples in the live snapshot
    pub fn rule_count(&self) -> usize {
        self.current().map(|s| s.len()).unwrap_or(0)
    }

    /// Grants with the `*` domain, used by the role catalog endpoint
    pub fn role_grants(&self) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
        let mut out: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
        if let Some(set) = self.current() {
            for rule in set.rules() {
                if rule.kind == super::PolicyKind::Grant
                    && rule.v1 == ANY_DOMAIN
                    && rule.v0.parse::<Role>().is_ok()
                {
                    out.entry(rule.v0.clone())
                        .or_default()
                        .entry(rule.v2.clone())
                        .or_default()
                        .insert(rule.v3.clone());
                }
            }
        }
        out.into_iter()
            .map(|(role, resources)| {
                let resources = resources
                    .into_iter()
                    .map(|(res, actions)| (res, actions.into_iter().collect()))
                    .collect();
                (role, resources)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPolicyStore;

    #[tokio::test]
    async fn unloaded_manager_denies() {
        let manager = PolicyManager::new(Arc::new(MemoryPolicyStore::default()));
        assert!(!manager.is_loaded());
        assert!(!manager.check("u1", "c1", "patients", "view"));
    }

    #[tokio::test]
    async fn init_seeds_empty_store_once() {
        let store = Arc::new(MemoryPolicyStore::default());
        let manager = PolicyManager::init(store.clone()).await.unwrap();
        let seeded = manager.rule_count();
        assert!(seeded > 0);

        let again = PolicyManager::init(store.clone()).await.unwrap();
        assert_eq!(again.rule_count(), seeded);
    }

    #[tokio::test]
    async fn writes_are_visible_and_persisted() {
        let store = Arc::new(MemoryPolicyStore::default());
        let manager = PolicyManager::init(store.clone()).await.unwrap();

        manager.assign_role("u1", "receptionist", "c1").await.unwrap();
        assert!(manager.check("u1", "c1", "billing", "edit"));
        assert!(!manager.check("u1", "c1", "users", "view"));

        manager.grant("u1", "c1", "users", "view").await.unwrap();
        assert!(manager.check("u1", "c1", "users", "view"));

        let fresh = PolicyManager::new(store);
        fresh.reload().await.unwrap();
        assert!(fresh.check("u1", "c1", "users", "view"));
        assert!(fresh.check("u1", "c1", "billing", "edit"));
    }

    #[tokio::test]
    async fn replace_role_leaves_single_role() {
        let manager = PolicyManager::init(Arc::new(MemoryPolicyStore::default())).await.unwrap();
        manager.assign_role("u1", "doctor", "c1").await.unwrap();
        manager.replace_role("u1", "receptionist", "c1").await.unwrap();
        let roles: Vec<_> = manager.roles_for("u1", "c1").into_iter().collect();
        assert_eq!(roles, vec!["receptionist".to_string()]);
    }

    #[tokio::test]
    async fn rejects_unknown_names() {
        let manager = PolicyManager::init(Arc::new(MemoryPolicyStore::default())).await.unwrap();
        assert!(matches!(
            manager.assign_role("u1", "janitor", "c1").await,
            Err(PolicyError::UnknownRole(_))
        ));
        assert!(matches!(
            manager.grant("u1", "c1", "xrays", "view").await,
            Err(PolicyError::UnknownResource(_))
        ));
        assert!(matches!(
            manager.grant("u1", "c1", "patients", "print").await,
            Err(PolicyError::UnknownAction(_))
        ));
    }

    #[tokio::test]
    async fn failed_store_write_keeps_snapshot() {
        let store = Arc::new(MemoryPolicyStore::default());
        let manager = PolicyManager::init(store.clone()).await.unwrap();
        store.fail_writes(true);
        assert!(manager.assign_role("u1", "doctor", "c1").await.is_err());
        assert!(!manager.check("u1", "c1", "patients", "view"));
    }
}
