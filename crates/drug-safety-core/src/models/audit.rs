//! Audit event models.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Audited action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    InteractionCheck,
    AllergyCheck,
    OverrideRecorded,
    /// Tagged separately for heightened downstream monitoring
    HighSeverityOverride,
    AllergyCreated,
    AllergyUpdated,
    AllergyDeactivated,
    AllergyVerified,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::InteractionCheck => "interaction_check",
            AuditAction::AllergyCheck => "allergy_check",
            AuditAction::OverrideRecorded => "override_recorded",
            AuditAction::HighSeverityOverride => "high_severity_override",
            AuditAction::AllergyCreated => "allergy_created",
            AuditAction::AllergyUpdated => "allergy_updated",
            AuditAction::AllergyDeactivated => "allergy_deactivated",
            AuditAction::AllergyVerified => "allergy_verified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "interaction_check" => Some(AuditAction::InteractionCheck),
            "allergy_check" => Some(AuditAction::AllergyCheck),
            "override_recorded" => Some(AuditAction::OverrideRecorded),
            "high_severity_override" => Some(AuditAction::HighSeverityOverride),
            "allergy_created" => Some(AuditAction::AllergyCreated),
            "allergy_updated" => Some(AuditAction::AllergyUpdated),
            "allergy_deactivated" => Some(AuditAction::AllergyDeactivated),
            "allergy_verified" => Some(AuditAction::AllergyVerified),
            _ => None,
        }
    }
}

/// A structured audit event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// Acting user; `None` for system-initiated checks
    pub user_id: Option<String>,
    pub action: AuditAction,
    /// Kind of resource touched (e.g. "safety_check", "allergy")
    pub resource_type: String,
    pub resource_id: String,
    /// Free-form structured details
    pub metadata: serde_json::Value,
    pub timestamp: String,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        user_id: Option<&str>,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.map(str::to_string),
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            metadata,
            timestamp: crate::now_timestamp(),
        }
    }

    /// Canonical JSON used for hashing.
    ///
    /// `serde_json` without `preserve_order` keeps object keys sorted, so
    /// the output is stable for equal events.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        serde_json::to_string(&value)
    }

    /// Chain hash: SHA-256 over `prev_hash` followed by the canonical JSON, hex encoded.
    pub fn chain_hash(&self, prev_hash: &str) -> Result<String, serde_json::Error> {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(self.to_canonical_json()?.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// An audit event as stored in the hash-chained log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredAuditEvent {
    /// Monotonic sequence number
    pub sequence: i64,
    pub event: AuditEvent,
    /// Hash of the previous entry (empty for the first)
    pub prev_hash: String,
    /// SHA-256 over `prev_hash` and the canonical event JSON
    pub entry_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_roundtrip() {
        for action in [
            AuditAction::InteractionCheck,
            AuditAction::AllergyCheck,
            AuditAction::OverrideRecorded,
            AuditAction::HighSeverityOverride,
            AuditAction::AllergyCreated,
            AuditAction::AllergyUpdated,
            AuditAction::AllergyDeactivated,
            AuditAction::AllergyVerified,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("deleted_everything"), None);
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let event = AuditEvent {
            user_id: Some("dr-1".into()),
            action: AuditAction::OverrideRecorded,
            resource_type: "safety_check".into(),
            resource_id: "check-1".into(),
            metadata: json!({"z": 1, "a": [1, 2]}),
            timestamp: "2024-01-15T10:00:00.000Z".into(),
        };
        let first = event.to_canonical_json().unwrap();
        let second = event.clone().to_canonical_json().unwrap();
        assert_eq!(first, second);
        assert!(first.find("\"a\"").unwrap() < first.find("\"z\"").unwrap());
    }

    #[test]
    fn test_chain_hash_depends_on_prev() {
        let event = AuditEvent::new(
            Some("dr-1"),
            AuditAction::AllergyCheck,
            "patient",
            "p1",
            json!({}),
        );
        let h1 = event.chain_hash("").unwrap();
        let h2 = event.chain_hash("abc").unwrap();
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, h2);
        assert_eq!(h1, event.chain_hash("").unwrap());
    }
}
