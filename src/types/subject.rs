//! Subjects whose reservations are resolved
//!
//! A subject is either a user (by wallet or by institutional session) or a
//! lab. Exactly one identity mode applies to each subject and selects the
//! backend read path.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lab (token) identifier
pub type LabId = u64;

/// Backend read path selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Reads go through the wallet (contract view) path
    Wallet,
    /// Reads go through the institutional SSO path
    Institutional,
}

impl IdentityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::Institutional => "institutional",
        }
    }
}

impl fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity whose reservations are resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", from = "SubjectRepr")]
pub enum Subject {
    /// A user identified by wallet address
    Wallet { address: String },
    /// A user identified by an institutional session
    Institution { session: String },
    /// All reservations of one lab, read through the given path
    #[serde(rename_all = "camelCase")]
    Lab { lab_id: LabId, mode: IdentityMode },
}

/// Wire form of [`Subject`]; deserialized values pass through the constructors
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum SubjectRepr {
    Wallet { address: String },
    Institution { session: String },
    #[serde(rename_all = "camelCase")]
    Lab { lab_id: LabId, mode: IdentityMode },
}

impl From<SubjectRepr> for Subject {
    fn from(repr: SubjectRepr) -> Self {
        match repr {
            SubjectRepr::Wallet { address } => Self::wallet(address),
            SubjectRepr::Institution { session } => Self::institution(session),
            SubjectRepr::Lab { lab_id, mode } => Self::lab(lab_id, mode),
        }
    }
}

impl Subject {
    /// Wallet subject; the address is trimmed and lower-cased
    pub fn wallet(address: impl AsRef<str>) -> Self {
        Self::Wallet {
            address: address.as_ref().trim().to_ascii_lowercase(),
        }
    }

    pub fn institution(session: impl Into<String>) -> Self {
        Self::Institution {
            session: session.into(),
        }
    }

    pub fn lab(lab_id: LabId, mode: IdentityMode) -> Self {
        Self::Lab { lab_id, mode }
    }

    /// Identity mode (read path) of this subject
    pub fn mode(&self) -> IdentityMode {
        match self {
            Self::Wallet { .. } => IdentityMode::Wallet,
            Self::Institution { .. } => IdentityMode::Institutional,
            Self::Lab { mode, .. } => *mode,
        }
    }

    /// Whether the identifier is complete enough to issue requests for
    pub fn is_resolvable(&self) -> bool {
        match self {
            Self::Wallet { address } => is_wallet_address(address),
            Self::Institution { session } => !session.trim().is_empty(),
            Self::Lab { .. } => true,
        }
    }

    /// Stable cache scope for this subject.
    ///
    /// Session identifiers are credentials, so only a digest prefix is used.
    pub fn cache_scope(&self) -> String {
        match self {
            Self::Wallet { address } => format!("wallet:{}", address),
            Self::Institution { session } => format!("session:{}", short_digest(session)),
            Self::Lab { lab_id, mode } => format!("lab:{}:{}", lab_id, mode),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_scope())
    }
}

/// `0x` followed by 40 hex digits
pub fn is_wallet_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(digits) => digits.len() == 40 && hex::decode(digits).is_ok(),
        None => false,
    }
}

/// Null owner: missing, empty, or all zero digits
pub fn is_zero_address(address: Option<&str>) -> bool {
    match address {
        None => true,
        Some(raw) => {
            let digits = raw.trim().trim_start_matches("0x");
            digits.chars().all(|c| c == '0')
        }
    }
}

/// First 8 bytes of SHA-256 as hex
pub(crate) fn short_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

    #[test]
    fn test_wallet_normalized_and_resolvable() {
        let subject = Subject::wallet("  0x00000000000000000000000000000000000A11CE ");
        assert_eq!(subject, Subject::wallet(ALICE));
        assert!(subject.is_resolvable());
        assert_eq!(subject.mode(), IdentityMode::Wallet);
    }

    #[test]
    fn test_deserialized_wallet_normalized() {
        let subject: Subject = serde_json::from_value(serde_json::json!({
            "kind": "wallet",
            "address": " 0x00000000000000000000000000000000000A11CE"
        }))
        .unwrap();
        assert_eq!(subject, Subject::wallet(ALICE));
        assert_eq!(subject.cache_scope(), Subject::wallet(ALICE).cache_scope());

        let lab: Subject = serde_json::from_value(
            serde_json::to_value(Subject::lab(3, IdentityMode::Institutional)).unwrap(),
        )
        .unwrap();
        assert_eq!(lab, Subject::lab(3, IdentityMode::Institutional));
    }

    #[test]
    fn test_incomplete_subjects_not_resolvable() {
        assert!(!Subject::wallet("").is_resolvable());
        assert!(!Subject::wallet("0x1234").is_resolvable());
        assert!(!Subject::wallet("0xzz000000000000000000000000000000000a11ce").is_resolvable());
        assert!(!Subject::institution("   ").is_resolvable());
        assert!(Subject::institution("sess-1").is_resolvable());
        assert!(Subject::lab(7, IdentityMode::Institutional).is_resolvable());
    }

    #[test]
    fn test_session_scope_hides_identifier() {
        let subject = Subject::institution("secret-session-token");
        let scope = subject.cache_scope();
        assert!(scope.starts_with("session:"));
        assert!(!scope.contains("secret"));
        assert_eq!(scope, Subject::institution("secret-session-token").cache_scope());
    }

    #[test]
    fn test_lab_scope_includes_mode() {
        let wallet = Subject::lab(3, IdentityMode::Wallet).cache_scope();
        let sso = Subject::lab(3, IdentityMode::Institutional).cache_scope();
        assert_ne!(wallet, sso);
        assert_eq!(wallet, "lab:3:wallet");
    }

    #[test]
    fn test_zero_address() {
        assert!(is_zero_address(None));
        assert!(is_zero_address(Some("0x0000000000000000000000000000000000000000")));
        assert!(is_zero_address(Some("")));
        assert!(!is_zero_address(Some(ALICE)));
    }
}
