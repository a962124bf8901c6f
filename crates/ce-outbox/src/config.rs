use std::time::Duration;

use crate::error::OutboxError;

pub const DEFAULT_CHANNEL: &str = "outboxce";
pub const DEFAULT_MAX_BATCH: usize = 100;
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;
const MAX_CHANNEL_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Upper bound between scans when no notification arrives.
    pub max_wait: Duration,
    pub max_batch: usize,
    /// LISTEN/NOTIFY channel.
    pub channel: String,
    /// Advisory lock id serializing relays across replicas.
    pub lock_id: i64,
    /// Pause before the observer retries a failed or contended relay loop.
    pub retry_interval: Duration,
    /// How long an in-flight publish may keep running after shutdown before
    /// its batch is rolled back.
    pub cancel_grace: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
            max_batch: DEFAULT_MAX_BATCH,
            channel: DEFAULT_CHANNEL.to_string(),
            lock_id: lock_id_for(DEFAULT_CHANNEL),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl OutboxConfig {
    /// Switches the channel and re-derives the lock id from it.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self.lock_id = lock_id_for(&self.channel);
        self
    }

    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    #[must_use]
    pub fn with_cancel_grace(mut self, cancel_grace: Duration) -> Self {
        self.cancel_grace = cancel_grace;
        self
    }

    pub fn validate(&self) -> Result<(), OutboxError> {
        if self.max_wait.is_zero() {
            return Err(OutboxError::Config("max_wait must be positive".to_string()));
        }
        if self.max_batch == 0 {
            return Err(OutboxError::Config("max_batch must be positive".to_string()));
        }
        if i64::try_from(self.max_batch).is_err() {
            return Err(OutboxError::Config("max_batch is too large".to_string()));
        }
        if self.retry_interval.is_zero() {
            return Err(OutboxError::Config(
                "retry_interval must be positive".to_string(),
            ));
        }
        validate_channel(&self.channel)
    }
}

/// FNV-1a 64 of the channel name, reinterpreted as the signed key Postgres
/// advisory locks take.
#[must_use]
pub fn lock_id_for(channel: &str) -> i64 {
    let hash = channel.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    i64::from_ne_bytes(hash.to_ne_bytes())
}

/// Channels are interpolated into `LISTEN`, so only plain lowercase
/// identifiers are accepted.
fn validate_channel(channel: &str) -> Result<(), OutboxError> {
    let mut chars = channel.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_');
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !starts_ok || !rest_ok || channel.len() > MAX_CHANNEL_LEN {
        return Err(OutboxError::Config(format!(
            "channel {channel:?} must be a lowercase identifier of at most {MAX_CHANNEL_LEN} characters"
        )));
    }
    Ok(())
}
