use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::tenant::Role;

/// Curated allow-list of read-only capability names. Classification is
/// never inferred from naming, so a new write capability defaults to
/// requiring confirmation until someone deliberately adds it here.
const READ_ONLY_CAPABILITIES: &[&str] =
    &["list_inventory", "search_customers", "list_orders", "get_vehicle_stock"];

/// Static definition of one operation the remote agent may request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub allowed_roles: Vec<Role>,
    pub read_only: bool,
}

impl Capability {
    fn new(
        name: &str,
        description: &str,
        parameter_schema: Value,
        allowed_roles: Vec<Role>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameter_schema,
            allowed_roles,
            read_only: READ_ONLY_CAPABILITIES.contains(&name),
        }
    }

    pub fn allows(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }
}

/// Outcome of looking up and authorizing one requested call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapabilityLookup<'a> {
    Authorized(&'a Capability),
    RoleDenied { capability: &'a Capability, role: Role },
    Unknown,
}

/// The process-wide capability catalog: built once at startup, immutable
/// afterwards, shared behind an `Arc`. Not persisted and not
/// tenant-specific.
#[derive(Clone, Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn register(&mut self, capability: Capability) {
        self.capabilities.insert(capability.name.clone(), capability);
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn lookup(&self, name: &str, role: Role) -> CapabilityLookup<'_> {
        match self.capabilities.get(name) {
            Some(capability) if capability.allows(role) => CapabilityLookup::Authorized(capability),
            Some(capability) => CapabilityLookup::RoleDenied { capability, role },
            None => CapabilityLookup::Unknown,
        }
    }

    /// Catalog entries in stable name order, for the external contract.
    pub fn catalog(&self) -> Vec<&Capability> {
        let mut entries: Vec<&Capability> = self.capabilities.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// The built-in depot catalog.
    pub fn builtin() -> Self {
        use Role::{Admin, Agent, Driver, Manager};

        let mut registry = Self::default();

        registry.register(Capability::new(
            "list_inventory",
            "List inventory items for the active branch, optionally filtered by name",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Substring match on item name"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            vec![Admin, Manager, Driver, Agent],
        ));

        registry.register(Capability::new(
            "search_customers",
            "Search customer records by name or phone number",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"}
                },
                "required": ["query"]
            }),
            vec![Admin, Manager, Agent],
        ));

        registry.register(Capability::new(
            "list_orders",
            "List orders, optionally filtered by status",
            json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["open", "delivered", "cancelled"]}
                }
            }),
            vec![Admin, Manager, Driver, Agent],
        ));

        registry.register(Capability::new(
            "get_vehicle_stock",
            "Show the stock currently loaded on a vehicle",
            json!({
                "type": "object",
                "properties": {
                    "vehicle_id": {"type": "string"}
                },
                "required": ["vehicle_id"]
            }),
            vec![Admin, Manager, Driver, Agent],
        ));

        registry.register(Capability::new(
            "create_order",
            "Create a customer order with line items",
            json!({
                "type": "object",
                "properties": {
                    "customer_id": {"type": "string"},
                    "lines": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "item_id": {"type": "string"},
                                "quantity": {"type": "integer", "minimum": 1}
                            },
                            "required": ["item_id", "quantity"]
                        }
                    }
                },
                "required": ["customer_id", "lines"]
            }),
            vec![Admin, Manager, Agent],
        ));

        registry.register(Capability::new(
            "adjust_inventory",
            "Adjust the on-hand quantity of an inventory item",
            json!({
                "type": "object",
                "properties": {
                    "item_id": {"type": "string"},
                    "delta": {"type": "integer"},
                    "reason": {"type": "string"}
                },
                "required": ["item_id", "delta"]
            }),
            vec![Admin, Manager, Agent],
        ));

        registry.register(Capability::new(
            "pull_stock",
            "Move stock from branch inventory onto a vehicle",
            json!({
                "type": "object",
                "properties": {
                    "item_id": {"type": "string"},
                    "vehicle_id": {"type": "string"},
                    "quantity": {"type": "integer", "minimum": 1}
                },
                "required": ["item_id", "vehicle_id", "quantity"]
            }),
            vec![Admin, Manager, Driver, Agent],
        ));

        registry
    }
}
