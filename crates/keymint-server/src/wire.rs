//! Wire protocol: one JSON request per line, one JSON response per line.
//!
//! Requests carry an `"op"` tag for dispatch. Raw key material travels
//! as hex strings. Responses are either `{"ok": …}` or
//! `{"error": {"code", "message"}}`, where `code` is a stable tag from
//! the keychain error taxonomy.

use keymint_core::Change;
use keymint_engine::EngineError;
use keymint_store::StoreError;
use serde::{Deserialize, Serialize};

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateKeychain {
        descriptor: String,
        /// Serialized account xpub; alternative to the raw fields below.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extended_public_key: Option<String>,
        /// Raw account material (hex public key + hex chain code).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_index: Option<u32>,
        /// Scheme and network tags; parsed through the typed codec so
        /// unknown values answer with their taxonomy codes.
        scheme: String,
        network: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lookahead: Option<u32>,
    },
    GetFreshAddresses {
        descriptor: String,
        change: Change,
        count: u32,
    },
    MarkPathAsUsed {
        descriptor: String,
        /// `change/index` string; parsed through the typed codec so a
        /// hardened or unknown component gets its taxonomy code instead
        /// of a generic parse failure.
        path: String,
    },
    MarkAddressesAsUsed {
        descriptor: String,
        addresses: Vec<String>,
    },
    GetAllObservableAddresses {
        descriptor: String,
        change: Change,
        from: u32,
        to: u32,
    },
    GetAllObservableIndexes {
        descriptor: String,
        change: Change,
        from: u32,
        to: u32,
    },
    GetMaxObservableIndex {
        descriptor: String,
        change: Change,
    },
    GetAccountExtendedKey {
        descriptor: String,
    },
    GetKeychainInfo {
        descriptor: String,
    },
    DeleteKeychain {
        descriptor: String,
    },
}

/// A server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: serde_json::Value },
    Error { error: ErrorBody },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl Response {
    pub fn ok(value: serde_json::Value) -> Self {
        Response::Ok { ok: value }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

/// Stable wire code for an engine error.
pub fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::Codec(codec) => match codec {
            keymint_core::Error::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
            keymint_core::Error::UnsupportedScheme(_) => "UNSUPPORTED_SCHEME",
            keymint_core::Error::MalformedKey(_) => "MALFORMED_KEY",
            keymint_core::Error::MalformedPath(_) => "MALFORMED_REQUEST",
            keymint_core::Error::InvalidChecksum => "INVALID_CHECKSUM",
            keymint_core::Error::InvalidDerivation(_) => "INVALID_DERIVATION",
            keymint_core::Error::HardenedIndex(_) => "HARDENED_INDEX",
            keymint_core::Error::UnrecognizedChange(_) => "UNRECOGNIZED_CHANGE",
        },
        EngineError::Store(store) => match store {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::AlreadyExists(_) => "ALREADY_EXISTS",
            StoreError::Conflict(_) => "CONFLICT",
            StoreError::Sqlite(_) => "INTERNAL",
        },
        EngineError::AddressNotObservable(_) => "ADDRESS_NOT_OBSERVABLE",
        EngineError::Json(_) | EngineError::Internal(_) => "INTERNAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymint_core::DerivationPath;

    #[test]
    fn requests_round_trip() {
        let request = Request::GetFreshAddresses {
            descriptor: "acct".into(),
            change: Change::External,
            count: 5,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""op":"get_fresh_addresses""#));
        assert!(json.contains(r#""change":"external""#));

        let back: Request = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Request::GetFreshAddresses { count: 5, .. }));
    }

    #[test]
    fn create_request_accepts_bare_xpub_form() {
        let request: Request = serde_json::from_str(
            r#"{
                "op": "create_keychain",
                "descriptor": "acct",
                "extended_public_key": "xpub…",
                "scheme": "native_segwit",
                "network": "bitcoin_mainnet"
            }"#,
        )
        .unwrap();
        match request {
            Request::CreateKeychain {
                extended_public_key,
                public_key,
                lookahead,
                scheme,
                ..
            } => {
                assert!(extended_public_key.is_some());
                assert!(public_key.is_none());
                assert!(lookahead.is_none());
                assert_eq!(scheme, "native_segwit");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn mark_path_uses_string_paths() {
        let request: Request = serde_json::from_str(
            r#"{"op": "mark_path_as_used", "descriptor": "acct", "path": "1/42"}"#,
        )
        .unwrap();
        match request {
            Request::MarkPathAsUsed { path, .. } => {
                assert_eq!(
                    path.parse::<DerivationPath>().unwrap(),
                    DerivationPath::new(Change::Internal, 42).unwrap()
                );
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn responses_round_trip() {
        let ok = Response::ok(serde_json::json!({"max": 21}));
        let json = serde_json::to_string(&ok).unwrap();
        assert_eq!(json, r#"{"ok":{"max":21}}"#);

        let err = Response::error("NOT_FOUND", "no such keychain");
        let json = serde_json::to_string(&err).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        match back {
            Response::Error { error } => assert_eq!(error.code, "NOT_FOUND"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn engine_errors_map_to_taxonomy_codes() {
        assert_eq!(
            error_code(&EngineError::Codec(keymint_core::Error::InvalidChecksum)),
            "INVALID_CHECKSUM"
        );
        assert_eq!(
            error_code(&EngineError::Store(StoreError::NotFound("d".into()))),
            "NOT_FOUND"
        );
        assert_eq!(
            error_code(&EngineError::AddressNotObservable("addr".into())),
            "ADDRESS_NOT_OBSERVABLE"
        );
        assert_eq!(
            error_code(&EngineError::Internal("bug".into())),
            "INTERNAL"
        );
    }
}
