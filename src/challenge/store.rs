use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use hmac::{Hmac, Mac};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

// Entries examined opportunistically on each mutation.
const OPPORTUNISTIC_SCAN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Blink,
    TurnLeft,
    TurnRight,
}

pub const ALL_CHALLENGE_KINDS: [ChallengeKind; 3] =
    [ChallengeKind::Blink, ChallengeKind::TurnLeft, ChallengeKind::TurnRight];

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Blink => "blink",
            ChallengeKind::TurnLeft => "turn_left",
            ChallengeKind::TurnRight => "turn_right",
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            ChallengeKind::Blink => "blink eyes",
            ChallengeKind::TurnLeft => "turn face left",
            ChallengeKind::TurnRight => "turn face right",
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            ChallengeKind::Blink => "Blink your eyes once",
            ChallengeKind::TurnLeft => "Turn your face to the left",
            ChallengeKind::TurnRight => "Turn your face to the right",
        }
    }

    // Label used in verdict messages.
    pub fn label(&self) -> &'static str {
        match self {
            ChallengeKind::Blink => "blink",
            ChallengeKind::TurnLeft => "turn left",
            ChallengeKind::TurnRight => "turn right",
        }
    }
}

/// Immutable once issued. Expiry is tracked on the monotonic clock; the
/// unix pair is what goes over the wire and into the signature.
#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    pub id: String,
    pub kinds: Vec<ChallengeKind>,
    pub issued_unix: i64,
    pub expires_unix: i64,
    pub nonce: String,
    pub signature: String,
    expires_at: Instant,
}

impl ChallengeRecord {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Ok,
    Expired,
    InvalidSignature,
    NotFound,
    AlreadyConsumed,
}

enum EntryState {
    Issued,
    Consumed,
}

struct Entry {
    record: Arc<ChallengeRecord>,
    state: EntryState,
}

/// Process-wide challenge map with TTL eviction and HMAC binding. All
/// mutations go through one store-level mutex, which makes issue/consume
/// linearizable per id; the lock is never held across an await point.
pub struct ChallengeStore {
    secret: Vec<u8>,
    ttl: Duration,
    predicate_count: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ChallengeStore {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration, predicate_count: usize) -> Self {
        ChallengeStore {
            secret: secret.into(),
            ttl,
            predicate_count: predicate_count.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Creates and stores a challenge with `predicate_count` predicates
    /// drawn independently and uniformly, with replacement.
    pub fn issue(&self) -> Arc<ChallengeRecord> {
        let mut rng = rand::thread_rng();
        let kinds: Vec<ChallengeKind> = (0..self.predicate_count)
            .map(|_| ALL_CHALLENGE_KINDS[rng.gen_range(0..ALL_CHALLENGE_KINDS.len())])
            .collect();

        self.insert_record(kinds)
    }

    #[cfg(test)]
    pub(crate) fn issue_with(&self, kinds: Vec<ChallengeKind>) -> Arc<ChallengeRecord> {
        self.insert_record(kinds)
    }

    fn insert_record(&self, kinds: Vec<ChallengeKind>) -> Arc<ChallengeRecord> {
        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; 16] = rng.gen();
        let nonce = hex::encode(nonce_bytes);

        let id = Uuid::new_v4().to_string();
        let issued_unix = Utc::now().timestamp();
        let expires_unix = issued_unix + self.ttl.as_secs() as i64;
        let signature = self.sign(&id, &nonce, &kinds, expires_unix);

        let record = Arc::new(ChallengeRecord {
            id: id.clone(),
            kinds,
            issued_unix,
            expires_unix,
            nonce,
            signature,
            expires_at: Instant::now() + self.ttl,
        });

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        sweep_some(&mut entries, OPPORTUNISTIC_SCAN);
        entries.insert(id, Entry { record: Arc::clone(&record), state: EntryState::Issued });

        debug!("issued challenge {} with {} predicates", record.id, record.kinds.len());
        record
    }

    /// Returns the record, or `None` for unknown, consumed, or expired ids.
    /// Expired records are treated as absent and removed on access.
    pub fn lookup(&self, id: &str) -> Option<Arc<ChallengeRecord>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(id) {
            Some(entry) if matches!(entry.state, EntryState::Issued) => {
                if entry.record.is_expired() {
                    entries.remove(id);
                    return None;
                }
                Some(Arc::clone(&entry.record))
            }
            _ => None,
        }
    }

    /// Atomically verifies the signature and, on match and non-expiry,
    /// marks the challenge consumed. A consumed id stays behind as a
    /// tombstone until its TTL passes, so a racing duplicate observes
    /// `AlreadyConsumed` rather than a silent miss. Never passes twice.
    pub fn consume(&self, id: &str, claimed_signature: &str) -> ConsumeOutcome {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        sweep_some(&mut entries, OPPORTUNISTIC_SCAN);

        let entry = match entries.get_mut(id) {
            Some(entry) => entry,
            None => return ConsumeOutcome::NotFound,
        };

        if matches!(entry.state, EntryState::Consumed) {
            return ConsumeOutcome::AlreadyConsumed;
        }

        if entry.record.is_expired() {
            entries.remove(id);
            return ConsumeOutcome::Expired;
        }

        let record = &entry.record;
        if !self.verify(record, claimed_signature) {
            warn!("challenge {id} presented an invalid signature");
            return ConsumeOutcome::InvalidSignature;
        }

        entry.state = EntryState::Consumed;
        ConsumeOutcome::Ok
    }

    /// Drops every expired entry, tombstones included. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.record.is_expired());
        before - entries.len()
    }

    pub fn active_count(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    fn sign(&self, id: &str, nonce: &str, kinds: &[ChallengeKind], expires_unix: i64) -> String {
        let kinds_csv: Vec<&str> = kinds.iter().map(ChallengeKind::as_str).collect();
        let message = format!("{}:{}:{}:{}", id, nonce, kinds_csv.join(","), expires_unix);

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts keys of any length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, record: &ChallengeRecord, claimed_signature: &str) -> bool {
        let claimed = match hex::decode(claimed_signature) {
            Ok(claimed) => claimed,
            Err(_) => return false,
        };

        let kinds_csv: Vec<&str> = record.kinds.iter().map(ChallengeKind::as_str).collect();
        let message = format!(
            "{}:{}:{}:{}",
            record.id,
            record.nonce,
            kinds_csv.join(","),
            record.expires_unix
        );

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts keys of any length");
        mac.update(message.as_bytes());
        // verify_slice compares in constant time.
        mac.verify_slice(&claimed).is_ok()
    }
}

/// Bounded expiry scan used on the mutation path.
fn sweep_some(entries: &mut HashMap<String, Entry>, limit: usize) {
    let expired: Vec<String> = entries
        .iter()
        .take(limit)
        .filter(|(_, entry)| entry.record.is_expired())
        .map(|(id, _)| id.clone())
        .collect();

    for id in expired {
        entries.remove(&id);
    }
}

/// Background sweeper bounding store memory between mutations.
pub fn spawn_sweeper(store: Arc<ChallengeStore>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                info!("challenge sweeper removed {removed} expired entries");
            }
        }
    })
}
