//! Predicates evaluated against fetched objects
//!
//! A condition answers "satisfied yet?" for one object. `Ok(false)` means the
//! object has not converged and the caller may poll again; `Err` means the
//! object can never satisfy the condition as shaped.

use crate::field::{string_map_sequence, FieldPath};
use crate::object::UntypedObject;
use crate::{Error, Result};

/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";
/// The "Available" condition type
pub const CONDITION_AVAILABLE: &str = "Available";
/// The "Ready" condition type
pub const CONDITION_READY: &str = "Ready";

/// A check over a single object
pub trait Condition: Send + Sync {
    /// Human-readable description used in timeout messages
    fn describe(&self) -> String;

    /// Evaluate against a freshly fetched object
    fn check(&self, object: &UntypedObject) -> Result<bool>;
}

/// Label `key` is present with exactly `value`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelEquals {
    /// Label key
    pub key: String,
    /// Expected label value
    pub value: String,
}

impl LabelEquals {
    /// Create a label condition
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Condition for LabelEquals {
    fn describe(&self) -> String {
        format!("label {}={}", self.key, self.value)
    }

    fn check(&self, object: &UntypedObject) -> Result<bool> {
        Ok(object.label(&self.key) == Some(self.value.as_str()))
    }
}

/// `status.conditions` holds an entry of the given type and status
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HasStatusCondition {
    /// Condition type, e.g. `Available`
    pub condition_type: String,
    /// Expected status, e.g. `True`
    pub status: String,
}

impl HasStatusCondition {
    /// Create a status condition check
    pub fn new(condition_type: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            status: status.into(),
        }
    }

    /// `Available=True`
    pub fn available() -> Self {
        Self::new(CONDITION_AVAILABLE, STATUS_TRUE)
    }

    /// `Ready=True`
    pub fn ready() -> Self {
        Self::new(CONDITION_READY, STATUS_TRUE)
    }
}

impl Condition for HasStatusCondition {
    fn describe(&self) -> String {
        format!("condition {}={}", self.condition_type, self.status)
    }

    fn check(&self, object: &UntypedObject) -> Result<bool> {
        let path = FieldPath::new(["status", "conditions"]);
        let conditions = match string_map_sequence(object, &path) {
            Ok(conditions) => conditions,
            // No status written yet
            Err(Error::FieldNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(conditions.iter().any(|c| {
            c.get("type").map(String::as_str) == Some(self.condition_type.as_str())
                && c.get("status").map(String::as_str) == Some(self.status.as_str())
        }))
    }
}

/// Satisfied by any object that can be fetched
#[derive(Clone, Copy, Debug, Default)]
pub struct Exists;

impl Condition for Exists {
    fn describe(&self) -> String {
        "existence".to_string()
    }

    fn check(&self, _object: &UntypedObject) -> Result<bool> {
        Ok(true)
    }
}
