// JSON encode/decode entry points for the schema layer.
//
// Decoding is serde (shape) followed by `Validate` (content); both failures
// surface as `SchemaError`. Encoding runs `Validate` before serializing, so a
// locally built message that breaks the contract never reaches the wire.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::message::{ClientMessage, ServerMessage};
use crate::validate::{SchemaError, Validate};

fn decode<T: DeserializeOwned + Validate>(bytes: &[u8]) -> Result<T, SchemaError> {
    let value: T = serde_json::from_slice(bytes)?;
    value.validate()?;
    Ok(value)
}

fn encode<T: Serialize + Validate>(value: &T) -> Result<Vec<u8>, SchemaError> {
    value.validate()?;
    Ok(serde_json::to_vec(value)?)
}

pub fn decode_server_message(bytes: &[u8]) -> Result<ServerMessage, SchemaError> {
    decode(bytes)
}

pub fn decode_client_message(bytes: &[u8]) -> Result<ClientMessage, SchemaError> {
    decode(bytes)
}

pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, SchemaError> {
    encode(msg)
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, SchemaError> {
    encode(msg)
}

/// Decode and validate any schema type, e.g. a `GameRecord` read from disk.
pub fn decode_validated<T: DeserializeOwned + Validate>(bytes: &[u8]) -> Result<T, SchemaError> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_refuses_invalid_outbound_message() {
        let msg = ClientMessage::Log {
            severity: crate::message::LogSeverity::Info,
            log: "a\u{7}bell".into(),
        };
        assert!(matches!(
            encode_client_message(&msg),
            Err(SchemaError::Invalid { .. })
        ));
    }

    #[test]
    fn decode_runs_content_validation() {
        let json = br#"{"type":"intent","intent":{"type":"donate_gold","clientID":"AAAA1111","recipient":"BBBB2222","gold":-3}}"#;
        assert!(matches!(
            decode_client_message(json),
            Err(SchemaError::Invalid {
                field: "intent.gold",
                ..
            })
        ));
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(matches!(
            decode_server_message(b"\xff\x00garbage"),
            Err(SchemaError::Malformed(_))
        ));
    }

    #[test]
    fn hash_message_roundtrips_negative_values() {
        let msg = ClientMessage::Hash {
            hash: i64::from(i32::MIN),
            turn_number: 0,
        };
        let bytes = encode_client_message(&msg).unwrap();
        assert_eq!(decode_client_message(&bytes).unwrap(), msg);
    }
}
