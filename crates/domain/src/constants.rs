//! Protocol constants
//!
//! Centralized location for wire-level constants shared by the REST and
//! gateway layers.

// REST surface
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";
pub const DEFAULT_USER_AGENT: &str =
    concat!("DiscordBot (https://github.com/conduit-rs/conduit, ", env!("CARGO_PKG_VERSION"), ")");
pub const AUTH_SCHEME_BOT: &str = "Bot";
pub const AUDIT_LOG_REASON_HEADER: &str = "X-Audit-Log-Reason";

// Rate-limit headers
pub const HEADER_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RATELIMIT_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_RATELIMIT_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_RATELIMIT_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_RATELIMIT_SCOPE: &str = "x-ratelimit-scope";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

// Global ceiling enforced by the service across all routes
pub const DEFAULT_GLOBAL_REQUESTS_PER_SECOND: u32 = 50;

// Retry defaults
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 1;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
pub const DEFAULT_RATE_LIMIT_FALLBACK_MS: u64 = 1_000;

// Gateway
pub const GATEWAY_VERSION: u8 = 10;
pub const GATEWAY_ENCODING: &str = "json";
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LARGE_THRESHOLD: u8 = 50;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code that keeps the session resumable on the service side
pub const CLOSE_RESUMABLE: u16 = 4000;
