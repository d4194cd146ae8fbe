//! Time-to-live accounting shared by capabilities and credentials.
//!
//! The expiry of an entity is derived exactly once, at construction, by
//! [`derive_expiry`]. Expiry checks are recomputed against the clock on every
//! call and never cached.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Compute `created_at + ttl`, saturating at the latest representable instant.
pub fn derive_expiry(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| created_at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Creation time, TTL and derived expiry of a time-bounded entity.
///
/// Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LifetimeRecord")]
pub struct Lifetime {
    created_at: DateTime<Utc>,
    #[serde(with = "secs")]
    ttl: Duration,
    expires_at: DateTime<Utc>,
}

/// Wire form: `created_at` and `expires_at` are optional and filled in on
/// conversion.
#[derive(Deserialize)]
struct LifetimeRecord {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(with = "secs")]
    ttl: Duration,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl From<LifetimeRecord> for Lifetime {
    fn from(record: LifetimeRecord) -> Self {
        match record.expires_at {
            Some(expires_at) => Self::with_expiry(record.created_at, record.ttl, expires_at),
            None => Self::new(record.created_at, record.ttl),
        }
    }
}

impl Lifetime {
    /// Start a lifetime at `created_at` (now if `None`) lasting `ttl`.
    pub fn new(created_at: Option<DateTime<Utc>>, ttl: Duration) -> Self {
        let created_at = created_at.unwrap_or_else(Utc::now);
        Self {
            created_at,
            ttl,
            expires_at: derive_expiry(created_at, ttl),
        }
    }

    /// Use an absolute expiry supplied by the vault instead of deriving one.
    pub fn with_expiry(
        created_at: Option<DateTime<Utc>>,
        ttl: Duration,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            created_at: created_at.unwrap_or_else(Utc::now),
            ttl,
            expires_at,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `true` once `now` is strictly past the expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remaining time at `now`; zero once expired.
    pub fn time_to_expiry_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn time_to_expiry(&self) -> Duration {
        self.time_to_expiry_at(Utc::now())
    }
}

/// Terminal revocation marker shared by every clone of an entity.
///
/// Once set it is never cleared.
#[derive(Clone, Default)]
pub struct RevocationFlag(Arc<AtomicBool>);

impl RevocationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_revoked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl fmt::Debug for RevocationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevocationFlag({})", self.is_revoked())
    }
}

/// Serde helper: `Duration` as a number of seconds.
///
/// Whole seconds serialize as integers, anything else as a float.
pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(raw)
            .map_err(|e| de::Error::custom(format!("invalid duration {raw}: {e}")))
    }
}
