//! Constant variables.

/// Shown in place of content that could not be decrypted.
pub const ENCRYPTED_PLACEHOLDER: &str = "[Encrypted Message]";

/// Lifetime of an outbound session key before maintenance rotates it.
pub const DEFAULT_SESSION_LIFETIME_SECS: u64 = 3600;
/// Grace window during which a rotated-out key still opens in-flight envelopes.
pub const DEFAULT_ROTATION_GRACE_SECS: u64 = 120;
/// Interval of the periodic key maintenance task.
pub const DEFAULT_KEY_MAINTENANCE_INTERVAL_SECS: u64 = 3600;

/// Connection attempts per peer before callers are routed to the relay.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;
/// Quiet period after which one recorded attempt decays.
pub const DEFAULT_RETRY_DECAY_SECS: u64 = 10;
/// How long a connection attempt may stay pending before it is failed.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Absolute bitrate floor in kbps.
pub const MIN_BITRATE_KBPS: u32 = 50;
/// Absolute bitrate ceiling in kbps.
pub const MAX_BITRATE_KBPS: u32 = 5000;
/// Initial lower bandwidth limit for a fresh data channel.
pub const DEFAULT_MIN_BITRATE_KBPS: u32 = 300;
/// Initial upper bandwidth limit for a fresh data channel.
pub const DEFAULT_MAX_BITRATE_KBPS: u32 = 2500;
/// Initial target bitrate for a fresh data channel.
pub const DEFAULT_START_BITRATE_KBPS: u32 = 1000;

/// Messages returned by a history fetch when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Signaling rows older than this are considered stale and purged.
pub const SIGNAL_STALE_SECS: u64 = 300;
/// At most one typing broadcast per sender within this window.
pub const TYPING_THROTTLE_MS: u64 = 1000;
