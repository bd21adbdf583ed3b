use serde::{Deserialize, Serialize};

use crate::challenge::store::{ChallengeKind, ChallengeRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge_id: String,
    pub multi_challenge: bool,
    pub challenge_types: Vec<ChallengeKind>,
    pub questions: Vec<String>,
    pub instructions: Vec<String>,
    pub timestamp: i64,
    pub expires_at: i64,
    pub nonce: String,
    pub signature: String,
}

impl From<&ChallengeRecord> for ChallengeResponse {
    fn from(record: &ChallengeRecord) -> Self {
        ChallengeResponse {
            challenge_id: record.id.clone(),
            multi_challenge: record.kinds.len() > 1,
            challenge_types: record.kinds.clone(),
            questions: record.kinds.iter().map(|k| k.question().to_string()).collect(),
            instructions: record.kinds.iter().map(|k| k.instruction().to_string()).collect(),
            timestamp: record.issued_unix,
            expires_at: record.expires_unix,
            nonce: record.nonce.clone(),
            signature: record.signature.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::challenge::store::ChallengeStore;

    #[test]
    fn test_wire_shape() {
        let store = ChallengeStore::new(
            b"dev-only-secret-0123456789abcdef0123456789abcdef".to_vec(),
            Duration::from_secs(120),
            2,
        );
        let record = store.issue();
        let response = ChallengeResponse::from(record.as_ref());

        assert!(response.multi_challenge);
        assert_eq!(response.challenge_types.len(), 2);
        assert_eq!(response.questions.len(), 2);
        assert_eq!(response.instructions.len(), 2);
        assert_eq!(response.expires_at - response.timestamp, 120);

        let json = serde_json::to_value(&response).unwrap();
        for kind in json["challenge_types"].as_array().unwrap() {
            let name = kind.as_str().unwrap();
            assert!(matches!(name, "blink" | "turn_left" | "turn_right"));
        }
    }

    #[test]
    fn test_single_challenge_is_not_multi() {
        let store = ChallengeStore::new(
            b"dev-only-secret-0123456789abcdef0123456789abcdef".to_vec(),
            Duration::from_secs(120),
            1,
        );
        let record = store.issue();
        let response = ChallengeResponse::from(record.as_ref());
        assert!(!response.multi_challenge);
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_value(ChallengeKind::TurnLeft).unwrap(), "turn_left");
        assert_eq!(serde_json::to_value(ChallengeKind::Blink).unwrap(), "blink");
    }
}
