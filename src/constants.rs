/// Path segment under the base path holding all presence data
pub const PRESENCE_PATH_TYPE: &str = "presence";

pub const PATH_SEPARATOR: char = '/';

/// Heartbeat intervals below this are rejected
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1000;

pub(crate) const WAIT_MIN_POLL_MS: u64 = 1000;
pub(crate) const WAIT_MAX_POLL_MS: u64 = 5000;
