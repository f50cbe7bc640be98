//! IPC protocol types
//!
//! Newline-delimited JSON, one object per line, internally tagged by `type`.
//! Binary payloads travel as base64 and amounts as decimal strings.

use serde::{Deserialize, Serialize};

use kytin_core::encoding::from_base64;
use kytin_core::{
    AuditEntry, HeartbeatMode, PolicyUpdate, Rejection, Signature, StatusSnapshot,
};
use rust_decimal::Decimal;

/// IPC request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Check if the daemon is running
    Ping,

    /// Hardware, Resin and policy snapshot
    Status,

    /// Quota-gated liveness signature
    Heartbeat {
        /// `ECO` or `TURBO`; ECO when absent
        #[serde(default)]
        mode: Option<String>,
        /// Base64 payload to sign
        payload: String,
    },

    /// Policy-gated transaction signature
    SignTransfer {
        /// Base64 transaction bytes
        tx: String,
        /// Decimal string, e.g. "0.25"
        amount: String,
        #[serde(default)]
        program_id: Option<String>,
    },

    /// Open a new day window
    ResetDaily,

    /// Signer public key
    PublicKey,

    /// Recent audit entries
    Audit {
        #[serde(default)]
        last: Option<usize>,
    },

    /// Have the Sentinel sign a policy update
    AttestPolicy { update: PolicyUpdate },

    /// Replace the policy limits
    UpdatePolicy {
        update: PolicyUpdate,
        attestation: Signature,
    },
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Success with no data
    Ok,

    /// Pong response
    Pong { version: String },

    /// Transport-level failure
    Error { message: String },

    /// Request refused by the core
    Rejected {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },

    Status { status: StatusSnapshot },

    Heartbeat {
        /// Base64 signature
        signature: String,
        algorithm: String,
        timestamp: u64,
        hardware_id: String,
        mode: HeartbeatMode,
        resin_balance: u64,
        daily_remaining: u64,
    },

    Transfer {
        /// Base64 signature
        signature: String,
        algorithm: String,
        timestamp: u64,
        hardware_id: String,
        amount: Decimal,
        daily_spent: Decimal,
        daily_remaining: Decimal,
    },

    PublicKey {
        /// Hex, uncompressed SEC1
        public_key: String,
        fingerprint: String,
    },

    Audit { entries: Vec<AuditEntry> },

    Attestation { attestation: Signature },
}

impl From<Rejection> for IpcResponse {
    fn from(rejection: Rejection) -> Self {
        IpcResponse::Rejected {
            code: rejection.code().to_string(),
            message: rejection.to_string(),
            detail: rejection.detail(),
        }
    }
}

/// Parse a heartbeat mode; absent means ECO
pub fn parse_mode(mode: Option<&str>) -> Result<HeartbeatMode, Rejection> {
    match mode {
        None => Ok(HeartbeatMode::default()),
        Some(mode) => mode.parse().map_err(Rejection::MalformedInput),
    }
}

/// Decode a base64 field
pub fn parse_base64(field: &str, value: &str) -> Result<Vec<u8>, Rejection> {
    from_base64(value).map_err(|e| Rejection::MalformedInput(format!("{}: {}", field, e)))
}

/// Parse a decimal amount string
pub fn parse_amount(value: &str) -> Result<Decimal, Rejection> {
    value
        .trim()
        .parse::<Decimal>()
        .map_err(|e| Rejection::MalformedInput(format!("amount '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request: IpcRequest = serde_json::from_str(
            r#"{"type":"SignTransfer","tx":"AAEC","amount":"1.25","program_id":"Tok"}"#,
        )
        .unwrap();
        match request {
            IpcRequest::SignTransfer {
                tx,
                amount,
                program_id,
            } => {
                assert_eq!(tx, "AAEC");
                assert_eq!(amount, "1.25");
                assert_eq!(program_id.as_deref(), Some("Tok"));
            }
            other => panic!("unexpected request {:?}", other),
        }

        let heartbeat: IpcRequest =
            serde_json::from_str(r#"{"type":"Heartbeat","payload":""}"#).unwrap();
        assert!(matches!(heartbeat, IpcRequest::Heartbeat { mode: None, .. }));
    }

    #[test]
    fn test_rejected_response_carries_code() {
        let response = IpcResponse::from(Rejection::ResinDepleted {
            balance: 3,
            daily_remaining: 0,
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "Rejected");
        assert_eq!(json["code"], "RESIN_DEPLETED");
        assert_eq!(json["detail"]["balance"], 3);
    }

    #[test]
    fn test_field_parsers() {
        assert_eq!(parse_mode(None).unwrap(), HeartbeatMode::Eco);
        assert_eq!(parse_mode(Some("TURBO")).unwrap(), HeartbeatMode::Turbo);
        assert_eq!(parse_mode(Some("WARP")).unwrap_err().code(), "MALFORMED_INPUT");

        assert_eq!(parse_base64("payload", "AAEC").unwrap(), vec![0, 1, 2]);
        assert!(parse_base64("payload", "!!").is_err());

        assert_eq!(parse_amount(" 3.0 ").unwrap().to_string(), "3.0");
        assert!(parse_amount("three").is_err());
        assert!(parse_amount("").is_err());
    }
}
