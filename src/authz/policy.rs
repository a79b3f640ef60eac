use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::PolicyError;
use crate::database::models::Role;

/// Domain wildcard for grants that apply in every clinic
pub const ANY_DOMAIN: &str = "*";

const DEFAULT_POLICY: &str = include_str!("default_policy.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Grant: (subject, domain, resource, action)
    #[serde(rename = "p")]
    Grant,
    /// Role assignment: (user, role, domain)
    #[serde(rename = "g")]
    Role,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Grant => "p",
            PolicyKind::Role => "g",
        }
    }
}

/// One persisted policy tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub kind: PolicyKind,
    pub v0: String,
    pub v1: String,
    pub v2: String,
    pub v3: String,
}

impl PolicyRule {
    pub fn grant(subject: &str, domain: &str, resource: &str, action: &str) -> Self {
        Self {
            kind: PolicyKind::Grant,
            v0: subject.to_string(),
            v1: domain.to_string(),
            v2: resource.to_string(),
            v3: action.to_string(),
        }
    }

    pub fn role(user: &str, role: &str, domain: &str) -> Self {
        Self {
            kind: PolicyKind::Role,
            v0: user.to_string(),
            v1: role.to_string(),
            v2: domain.to_string(),
            v3: String::new(),
        }
    }
}

/// Immutable snapshot of every grant and role assignment
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    rules: HashSet<PolicyRule>,
}

impl PolicySet {
    pub fn from_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter()
    }

    pub fn with(&self, rule: PolicyRule) -> Self {
        let mut next = self.clone();
        next.rules.insert(rule);
        next
    }

    pub fn without(&self, rule: &PolicyRule) -> Self {
        let mut next = self.clone();
        next.rules.remove(rule);
        next
    }

    /// Drop the user's roles in `domain` and assign `role`
    pub fn with_role_replaced(&self, user: &str, domain: &str, role: &str) -> Self {
        let mut next = self.clone();
        next.rules
            .retain(|r| !(r.kind == PolicyKind::Role && r.v0 == user && r.v2 == domain));
        next.rules.insert(PolicyRule::role(user, role, domain));
        next
    }

    /// Roles held by `user` in `domain`, including domain-wide assignments
    pub fn roles_for(&self, user: &str, domain: &str) -> BTreeSet<String> {
        self.rules
            .iter()
            .filter(|r| r.kind == PolicyKind::Role && r.v0 == user && (r.v2 == domain || r.v2 == ANY_DOMAIN))
            .map(|r| r.v1.clone())
            .collect()
    }

    fn subjects_for(&self, user: &str, domain: &str) -> BTreeSet<String> {
        let mut subjects = self.roles_for(user, domain);
        subjects.insert(user.to_string());
        subjects
    }

    pub fn check(&self, user: &str, domain: &str, resource: &str, action: &str) -> bool {
        let subjects = self.subjects_for(user, domain);
        self.rules.iter().any(|r| {
            r.kind == PolicyKind::Grant
                && subjects.contains(&r.v0)
                && (r.v1 == domain || r.v1 == ANY_DOMAIN)
                && r.v2 == resource
                && r.v3 == action
        })
    }

    /// Union of role-derived and direct grants visible in `domain`
    pub fn permissions_for(&self, user: &str, domain: &str) -> BTreeMap<String, Vec<String>> {
        let subjects = self.subjects_for(user, domain);
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for r in self.rules.iter().filter(|r| {
            r.kind == PolicyKind::Grant && subjects.contains(&r.v0) && (r.v1 == domain || r.v1 == ANY_DOMAIN)
        }) {
            map.entry(r.v2.clone()).or_default().insert(r.v3.clone());
        }
        map.into_iter()
            .map(|(resource, actions)| (resource, actions.into_iter().collect()))
            .collect()
    }
}

/// Role -> resource -> actions, as shipped in the embedded YAML document
pub fn default_role_grants() -> Result<BTreeMap<String, BTreeMap<String, Vec<String>>>, PolicyError> {
    let grants: BTreeMap<String, BTreeMap<String, Vec<String>>> =
        serde_yaml::from_str(DEFAULT_POLICY).map_err(|e| PolicyError::Seed(e.to_string()))?;

    for (role, resources) in &grants {
        role.parse::<Role>().map_err(PolicyError::UnknownRole)?;
        for (resource, actions) in resources {
            for action in actions {
                super::validate_grant(resource, action)?;
            }
        }
    }
    Ok(grants)
}

pub(crate) fn default_rules() -> Result<Vec<PolicyRule>, PolicyError> {
    let mut rules = Vec::new();
    for (role, resources) in default_role_grants()? {
        for (resource, actions) in resources {
            for action in actions {
                rules.push(PolicyRule::grant(&role, ANY_DOMAIN, &resource, &action));
            }
        }
    }
    Ok(rules)
}
