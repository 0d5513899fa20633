/// Default number of records kept in the in-memory message log
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Default session lifetime in seconds (24 hours)
/// Also used as the session cookie Max-Age
pub const DEFAULT_SESSION_TTL_SECS: i64 = 86_400;

/// Default period of the expired-session sweep (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Time a fresh WebSocket connection has to send its auth frame
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;

/// Default capacity of each connection's outbound queue
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// How long a delivery may wait on a full outbound queue before the
/// receiving connection is treated as stalled and closed
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;

/// Upper bound on flushing the close handshake to a departing peer
pub const SOCKET_CLOSE_GRACE_MILLIS: u64 = 1_000;

/// Argon2id memory cost in KiB (OWASP baseline)
pub const DEFAULT_PASSWORD_HASH_MEMORY_KIB: u32 = 19_456;

/// Argon2id iteration count
pub const DEFAULT_PASSWORD_HASH_ITERATIONS: u32 = 2;

/// Username length bounds (inclusive)
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;

/// Minimum accepted password length at registration
pub const MIN_PASSWORD_LEN: usize = 6;

/// Random bytes in a password salt
pub const SALT_LEN: usize = 16;

/// Random bytes in a session token (before base64url encoding)
pub const SESSION_TOKEN_LEN: usize = 32;

/// Length of the derived password hash in bytes
pub const PASSWORD_HASH_LEN: usize = 32;

/// Recipient value addressing every connected user
pub const BROADCAST_RECIPIENT: &str = "all";

// =============================================================================
// Session transport
// =============================================================================

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session_token";

/// Header consulted when no session cookie is present
pub const SESSION_HEADER: &str = "x-session-token";

// =============================================================================
// Messages
// =============================================================================

/// Sent to a connection right after it is registered
pub const WELCOME_MESSAGE: &str = "Welcome to Secure Messenger!";

/// Content of presence notifications
pub const USER_JOINED_MESSAGE: &str = "joined the chat";
pub const USER_LEFT_MESSAGE: &str = "left the chat";

/// Error frame content when the WebSocket handshake is rejected
pub const ERR_AUTHENTICATION_FAILED: &str = "Authentication failed";

/// Error message when registration fields are missing
pub const ERR_MISSING_CREDENTIALS: &str = "Username and password are required";

/// Error message for a badly shaped username
pub const ERR_INVALID_USERNAME: &str =
    "Username must be 3-20 characters of letters, digits or underscore";

/// Error message for a short password
pub const ERR_PASSWORD_TOO_SHORT: &str = "Password must be at least 6 characters";
