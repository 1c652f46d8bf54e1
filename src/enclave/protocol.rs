// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request/response envelopes exchanged with the enclave.
//!
//! Envelopes are JSON with camelCase keys; binary payloads are base64.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EnclaveError;

/// Typed request routed by `service_type` + `operation` inside the enclave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnclaveRequest {
    pub request_id: String,
    pub service_type: String,
    pub operation: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnclaveResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EnclaveRequest {
    /// New request with a fresh random request id.
    pub fn new(
        service_type: impl Into<String>,
        operation: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            service_type: service_type.into(),
            operation: operation.into(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnclaveError> {
        serde_json::to_vec(self)
            .map_err(|e| EnclaveError::ProtocolError(format!("cannot encode request: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnclaveError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EnclaveError::ProtocolError(format!("invalid request envelope: {e}")))
    }
}

impl EnclaveResponse {
    pub fn ok(request_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            payload: Some(payload),
            error_message: None,
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            payload: None,
            error_message: Some(message.into()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnclaveError> {
        serde_json::to_vec(self)
            .map_err(|e| EnclaveError::ProtocolError(format!("cannot encode response: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnclaveError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EnclaveError::ProtocolError(format!("invalid response envelope: {e}")))
    }
}

mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&Base64::encode_string(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| Base64::decode_vec(&encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_wire_format() {
        let request = EnclaveRequest {
            request_id: "r-1".into(),
            service_type: "wallet".into(),
            operation: "sign".into(),
            payload: b"hello".to_vec(),
        };
        let value: serde_json::Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "requestId": "r-1",
                "serviceType": "wallet",
                "operation": "sign",
                "payload": "aGVsbG8=",
            })
        );
        assert_eq!(EnclaveRequest::decode(&request.encode().unwrap()).unwrap(), request);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = EnclaveRequest::new("wallet", "sign", vec![]);
        let b = EnclaveRequest::new("wallet", "sign", vec![]);
        assert_ne!(a.request_id, b.request_id);
        assert!(Uuid::parse_str(&a.request_id).is_ok());
    }

    #[test]
    fn error_response_omits_payload() {
        let response = EnclaveResponse::error("r-2", "key not found");
        let value: serde_json::Value = serde_json::from_slice(&response.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"requestId": "r-2", "success": false, "errorMessage": "key not found"})
        );
    }

    #[test]
    fn response_accepts_missing_and_null_payload() {
        let missing = EnclaveResponse::decode(br#"{"requestId":"r","success":true}"#).unwrap();
        assert_eq!(missing.payload, None);
        let null =
            EnclaveResponse::decode(br#"{"requestId":"r","success":true,"payload":null}"#).unwrap();
        assert_eq!(null.payload, None);
        let some = EnclaveResponse::decode(br#"{"requestId":"r","success":true,"payload":"AQI="}"#)
            .unwrap();
        assert_eq!(some.payload, Some(vec![1, 2]));
    }

    #[test]
    fn garbage_is_protocol_error() {
        let err = EnclaveResponse::decode(b"not json").unwrap_err();
        assert_eq!(err.error_code(), "protocol_error");
        let err = EnclaveResponse::decode(br#"{"requestId":"r","success":true,"payload":"%%"}"#)
            .unwrap_err();
        assert_eq!(err.error_code(), "protocol_error");
    }
}
