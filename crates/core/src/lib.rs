pub mod audit;
pub mod capability;
pub mod config;
pub mod domain;
pub mod errors;
pub mod idempotency;

pub use audit::{AuditEntry, AuditVerb};
pub use capability::{Capability, CapabilityLookup, CapabilityRegistry};
pub use domain::action::{Action, ActionId, ActionStatus, ConversationId};
pub use domain::entity::{EntityId, EntityKind, EntityRecord, Filter, NewEntity, Patch};
pub use domain::tenant::{BranchId, Role, TenantContext, TenantId, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use idempotency::IdempotencyKey;

pub use chrono;
