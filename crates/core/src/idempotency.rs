use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::tenant::UserId;

/// Deterministic fingerprint of one (user, capability, arguments) request,
/// used to collapse retries and duplicate proposals into one logical
/// action. Enforced unique per tenant at the storage layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    /// Derive the key from the invoking user, the capability name, and the
    /// canonicalized argument object. The digest is prefixed with the user
    /// and capability so operators can read a key without a lookup.
    pub fn derive(user_id: &UserId, capability_name: &str, arguments: &Value) -> Self {
        let canonical = canonicalize(arguments).to_string();

        let mut hasher = Sha256::new();
        hasher.update(user_id.0.as_bytes());
        hasher.update(b"\n");
        hasher.update(capability_name.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|byte| format!("{byte:02x}")).collect();

        Self(format!("{}:{}:{}", user_id.0, capability_name, hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Recursively rewrite JSON objects into key-sorted form so that argument
/// objects differing only in key order derive the same key.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::IdempotencyKey;
    use crate::domain::tenant::UserId;

    fn user() -> UserId {
        UserId("U-100".to_string())
    }

    #[test]
    fn identical_requests_derive_identical_keys() {
        let args = json!({"item_id": "I-5", "quantity": 3});

        let first = IdempotencyKey::derive(&user(), "adjust_inventory", &args);
        let second = IdempotencyKey::derive(&user(), "adjust_inventory", &args);

        assert_eq!(first, second);
    }

    #[test]
    fn key_order_does_not_change_the_key() {
        let a = json!({"item_id": "I-5", "quantity": 3, "reason": {"code": "damage", "note": "x"}});
        let b = json!({"reason": {"note": "x", "code": "damage"}, "quantity": 3, "item_id": "I-5"});

        assert_eq!(
            IdempotencyKey::derive(&user(), "adjust_inventory", &a),
            IdempotencyKey::derive(&user(), "adjust_inventory", &b),
        );
    }

    #[test]
    fn differing_arguments_derive_differing_keys() {
        let a = json!({"quantity": 3});
        let b = json!({"quantity": 4});

        assert_ne!(
            IdempotencyKey::derive(&user(), "adjust_inventory", &a),
            IdempotencyKey::derive(&user(), "adjust_inventory", &b),
        );
    }

    #[test]
    fn key_is_prefixed_for_debuggability() {
        let key = IdempotencyKey::derive(&user(), "create_order", &json!({}));
        assert!(key.as_str().starts_with("U-100:create_order:"));
        let digest = key.as_str().rsplit(':').next().unwrap_or_default();
        assert_eq!(digest.len(), 16);
    }
}
