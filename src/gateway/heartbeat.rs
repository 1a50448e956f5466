use std::time::Duration;

/// Interval advertised in HELLO. The liveness deadline is twice this: one
/// missed beat is tolerated, the second closes the connection.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(45);

/// How long an unauthenticated socket may sit between HELLO and
/// IDENTIFY/RESUME.
pub const DEFAULT_IDENTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a detached session stays resumable. Aligned with the heartbeat
/// deadline so a client that noticed the drop late can still come back.
pub const DEFAULT_RESUME_GRACE: Duration = Duration::from_secs(90);

/// Frames retained per session for RESUME replay.
pub const DEFAULT_RESUME_BUFFER_CAPACITY: usize = 1024;

/// Cadence of the detached-session reaper sweep.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(30);
