//! Single-use `state` correlation tokens.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::crypto;
use crate::errors::Result;
use crate::provider::ProviderType;

/// Random bytes per state value (256 bits).
pub const STATE_BYTES: usize = 32;

/// Generate a fresh state value.
pub fn generate_state() -> Result<String> {
    crypto::random_token(STATE_BYTES)
}

struct PendingEntry {
    provider_type: ProviderType,
    issued_at: Instant,
}

/// States issued for authentication attempts that have not completed yet.
///
/// Each value can be consumed exactly once. Entries older than `max_age`
/// are dropped the next time a state is issued.
pub struct PendingStates {
    entries: Mutex<HashMap<String, PendingEntry>>,
    max_age: Duration,
}

impl PendingStates {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Generate and record a state that is not currently pending.
    pub async fn issue(&self, provider_type: ProviderType) -> Result<String> {
        let mut entries = self.entries.lock().await;
        let max_age = self.max_age;
        entries.retain(|_, e| e.issued_at.elapsed() < max_age);

        let mut state = generate_state()?;
        while entries.contains_key(&state) {
            state = generate_state()?;
        }
        entries.insert(
            state.clone(),
            PendingEntry {
                provider_type,
                issued_at: Instant::now(),
            },
        );
        Ok(state)
    }

    /// Remove `state` and report which provider it was issued for.
    ///
    /// Returns `None` when the value was never issued, already consumed or
    /// expired.
    pub async fn consume(&self, state: &str) -> Option<ProviderType> {
        let entry = self.entries.lock().await.remove(state)?;
        if entry.issued_at.elapsed() >= self.max_age {
            return None;
        }
        Some(entry.provider_type)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    #[tokio::test]
    async fn test_consume_exactly_once() {
        let pending = PendingStates::new(Duration::from_secs(60));
        let state = pending.issue(ProviderType::OneDrive).await.unwrap();
        assert_eq!(pending.consume(&state).await, Some(ProviderType::OneDrive));
        assert_eq!(pending.consume(&state).await, None);
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_state_not_consumed() {
        let pending = PendingStates::new(Duration::from_secs(60));
        pending.issue(ProviderType::GoogleDrive).await.unwrap();
        assert_eq!(pending.consume("forged").await, None);
        assert_eq!(pending.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_state_rejected() {
        let pending = PendingStates::new(Duration::ZERO);
        let state = pending.issue(ProviderType::GoogleDrive).await.unwrap();
        assert_eq!(pending.consume(&state).await, None);
    }

    #[tokio::test]
    async fn test_concurrent_attempts_get_distinct_states() {
        let pending = Arc::new(PendingStates::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let pending = pending.clone();
            handles.push(tokio::spawn(async move {
                pending.issue(ProviderType::GoogleDrive).await.unwrap()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(pending.len().await, 64);
    }

    proptest! {
        #[test]
        fn prop_states_pairwise_distinct(n in 2usize..200) {
            let states: Vec<String> = (0..n).map(|_| generate_state().unwrap()).collect();
            let unique: HashSet<&String> = states.iter().collect();
            prop_assert_eq!(unique.len(), n);
        }

        #[test]
        fn prop_state_carries_at_least_128_bits(_seed in 0u8..8) {
            let state = generate_state().unwrap();
            // base64 carries 6 bits per character
            prop_assert!(state.len() * 6 >= 128);
            prop_assert!(state.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }
}
