use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tenant::{TenantId, UserId};
use crate::idempotency::IdempotencyKey;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

/// Lifecycle of one capability invocation.
///
/// Read-only capabilities are written directly in a terminal state.
/// Mutating capabilities wait in `Proposed` for a user decision; the
/// proposed → confirmed/cancelled transition is a storage-layer
/// compare-and-swap and is the exactly-once boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Proposed,
    Confirmed,
    Executed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "proposed" => Some(Self::Proposed),
            "confirmed" => Some(Self::Confirmed),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled | Self::TimedOut)
    }

    /// Exhaustive transition table. Anything not listed here is invalid,
    /// including every transition out of a terminal state.
    pub fn can_transition_to(&self, to: ActionStatus) -> bool {
        matches!(
            (self, to),
            (Self::Proposed, Self::Confirmed)
                | (Self::Proposed, Self::Cancelled)
                | (Self::Confirmed, Self::Executed)
                | (Self::Confirmed, Self::Failed)
                | (Self::Confirmed, Self::TimedOut)
        )
    }
}

/// Persisted record of one dispatched capability invocation. Created by
/// the dispatcher, transitioned by the confirmation handler and the
/// execution step, never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub conversation_id: ConversationId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub capability_name: String,
    pub arguments_json: String,
    pub result_json: Option<String>,
    pub error: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub status: ActionStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::ActionStatus;

    #[test]
    fn status_round_trips_from_storage_encoding() {
        let cases = [
            ActionStatus::Proposed,
            ActionStatus::Confirmed,
            ActionStatus::Executed,
            ActionStatus::Failed,
            ActionStatus::Cancelled,
            ActionStatus::TimedOut,
        ];

        for status in cases {
            assert_eq!(ActionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        let terminal = [
            ActionStatus::Executed,
            ActionStatus::Failed,
            ActionStatus::Cancelled,
            ActionStatus::TimedOut,
        ];
        let all = [
            ActionStatus::Proposed,
            ActionStatus::Confirmed,
            ActionStatus::Executed,
            ActionStatus::Failed,
            ActionStatus::Cancelled,
            ActionStatus::TimedOut,
        ];

        for from in terminal {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn proposed_moves_only_to_confirmed_or_cancelled() {
        assert!(ActionStatus::Proposed.can_transition_to(ActionStatus::Confirmed));
        assert!(ActionStatus::Proposed.can_transition_to(ActionStatus::Cancelled));
        assert!(!ActionStatus::Proposed.can_transition_to(ActionStatus::Executed));
        assert!(!ActionStatus::Proposed.can_transition_to(ActionStatus::Failed));
    }
}
