use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Outcome of claiming an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// False when the key was already claimed inside the TTL window; the
    /// caller must not create a second order.
    pub accepted: bool,
    pub key: String,
}

/// In-process registry of recently used checkout idempotency keys.
///
/// This is a latency optimization, not the guarantee: it only protects a
/// single process, and claims do not survive restarts. The durable source of
/// truth is the unique index on `orders.idempotency_key`; a key that slips
/// past this guard (second process, restart) is still rejected at insert
/// time.
#[derive(Debug)]
pub struct IdempotencyGuard {
    claims: DashMap<String, Instant>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            claims: DashMap::new(),
            ttl,
        }
    }

    /// Claims a key. A missing key gets a generated one and is always
    /// accepted. Re-claiming a key inside the TTL window is rejected;
    /// an expired claim is replaced.
    pub fn claim(&self, key: Option<&str>) -> Claim {
        self.evict_expired();

        let key = match key {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => {
                let generated = Uuid::new_v4().to_string();
                self.claims.insert(generated.clone(), Instant::now());
                return Claim {
                    accepted: true,
                    key: generated,
                };
            }
        };

        let now = Instant::now();
        let mut accepted = true;
        // Entry API keeps check-and-insert atomic per key under concurrent
        // claims for the same key.
        self.claims
            .entry(key.clone())
            .and_modify(|claimed_at| {
                if now.duration_since(*claimed_at) < self.ttl {
                    accepted = false;
                } else {
                    *claimed_at = now;
                }
            })
            .or_insert(now);

        Claim { accepted, key }
    }

    /// Releases a claim so the caller may retry, used when checkout fails
    /// before any durable side effect (no order row was created).
    pub fn release(&self, key: &str) {
        self.claims.remove(key);
    }

    fn evict_expired(&self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.claims
            .retain(|_, claimed_at| now.duration_since(*claimed_at) < ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.claims.len()
    }
}
