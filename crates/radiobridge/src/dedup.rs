//! Duplicate suppression for preventing relay loops
//!
//! With both legs live, a message can travel:
//!
//! 1. bus → radio, transmitted by this bridge
//! 2. received by the peer bridge and published on its bus
//! 3. heard back on this bus (shared broker or bridged brokers)
//! 4. bus → radio again... and so on
//!
//! The same happens in the other direction: a radio message published on the
//! bus is delivered back to this bridge's own subscription. The
//! [`DuplicateSuppressor`] breaks both cycles by remembering a digest of every
//! relayed `(topic, payload)` pair for a TTL window, regardless of the
//! direction it travelled.
//!
//! # Digest
//!
//! SHA-256 over the topic length, the topic bytes and the payload bytes. The
//! length prefix keeps `("a:", "b")` and `("a", ":b")` apart.

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::DedupConfig;

/// Fixed-length digest of a topic and payload
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct MessageDigest([u8; 32]);

impl MessageDigest {
    /// Digest a topic and payload
    pub fn of(topic: &str, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((topic.len() as u64).to_be_bytes());
        hasher.update(topic.as_bytes());
        hasher.update(payload);
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Suppressor statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct SuppressorStats {
    /// Total checks
    pub total_checks: u64,
    /// Checks answered "duplicate"
    pub duplicates: u64,
    /// Expired entries found on lookup or removed by a sweep
    pub expirations: u64,
    /// Unexpired entries pushed out by the capacity bound
    pub capacity_evictions: u64,
}

#[derive(Debug)]
struct Table {
    entries: LruCache<MessageDigest, Instant>,
    stats: SuppressorStats,
}

/// TTL-bounded digest cache answering "relayed this recently?"
///
/// Clones share the same table, so both relay directions see one history.
#[derive(Debug, Clone)]
pub struct DuplicateSuppressor {
    table: Arc<Mutex<Table>>,
    ttl: Duration,
    enabled: bool,
}

impl DuplicateSuppressor {
    /// Create an enabled suppressor
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            table: Arc::new(Mutex::new(Table {
                entries: LruCache::new(cap),
                stats: SuppressorStats::default(),
            })),
            ttl,
            enabled: true,
        }
    }

    /// Create a suppressor that lets everything through
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO, 1)
        }
    }

    /// Create from configuration
    pub fn from_config(config: &DedupConfig) -> Self {
        if config.enabled {
            Self::new(config.ttl, config.capacity)
        } else {
            Self::disabled()
        }
    }

    /// Check and record a message in one step
    ///
    /// Returns `false` when the same topic and payload were recorded less than
    /// one TTL ago; the original timestamp is left untouched. Otherwise records
    /// the message with the current time and returns `true`.
    pub fn should_relay(&self, topic: &str, payload: &[u8]) -> bool {
        if !self.enabled {
            return true;
        }

        let digest = MessageDigest::of(topic, payload);
        let now = Instant::now();

        let mut table = self.table.lock();
        table.stats.total_checks += 1;

        if let Some(&first_seen) = table.entries.peek(&digest) {
            if now.duration_since(first_seen) < self.ttl {
                table.stats.duplicates += 1;
                debug!(digest = %digest, topic, "Duplicate message suppressed");
                return false;
            }
            trace!(digest = %digest, "Entry expired, treating as new");
            table.stats.expirations += 1;
        }

        if let Some((evicted, first_seen)) = table.entries.push(digest, now) {
            if evicted != digest && now.duration_since(first_seen) < self.ttl {
                table.stats.capacity_evictions += 1;
                debug!(digest = %evicted, "Capacity bound evicted a live entry");
            }
        }

        true
    }

    /// Remove every expired entry, returning how many were removed
    ///
    /// Entries are kept in insertion order, so expired ones sit at the
    /// least-recently-used end.
    pub fn sweep_expired(&self) -> usize {
        if !self.enabled {
            return 0;
        }

        let now = Instant::now();
        let mut table = self.table.lock();
        let mut removed = 0;

        while let Some((_, &first_seen)) = table.entries.peek_lru() {
            if now.duration_since(first_seen) < self.ttl {
                break;
            }
            table.entries.pop_lru();
            removed += 1;
        }

        table.stats.expirations += removed as u64;
        if removed > 0 {
            trace!(removed, remaining = table.entries.len(), "Swept expired digests");
        }
        removed
    }

    /// Whether suppression is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Suppression window
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of digests held, including any not yet swept
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether no digests are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> SuppressorStats {
        self.table.lock().stats.clone()
    }
}
