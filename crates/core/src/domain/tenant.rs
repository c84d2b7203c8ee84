use serde::{Deserialize, Serialize};

use crate::errors::ApplicationError;

/// Identifier of an isolated customer organization. Construction rejects
/// blank values so that a repository can never be built without a real
/// tenant to scope to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Result<Self, ApplicationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ApplicationError::Configuration(
                "tenant id is required to scope data access".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Driver,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Driver => "driver",
            Self::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "driver" => Some(Self::Driver),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

/// Immutable per-request identity: built once from the authenticated
/// session and threaded explicitly through every downstream call. There is
/// no ambient or global tenant state anywhere in the workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub branch_id: Option<BranchId>,
}

impl TenantContext {
    pub fn new(
        tenant_id: TenantId,
        user_id: UserId,
        role: Role,
        branch_id: Option<BranchId>,
    ) -> Self {
        Self { tenant_id, user_id, role, branch_id }
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, TenantId};

    #[test]
    fn tenant_id_rejects_blank_values() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("   ").is_err());
        assert!(TenantId::new("T-100").is_ok());
    }

    #[test]
    fn role_round_trips_from_storage_encoding() {
        let cases = [Role::Admin, Role::Manager, Role::Driver, Role::Agent];
        for role in cases {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
    }
}
