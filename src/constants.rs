/// Application-wide constants
/// All magic numbers and default configuration values live here

/// Default per-object size cap in bytes (5 MiB)
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024;

/// Default global storage quota in bytes (1 GiB)
pub const DEFAULT_MAX_STORAGE: u64 = 1024 * 1024 * 1024;

/// Default object time-to-live in seconds (24 hours)
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Default sweep interval in seconds (5 minutes)
pub const DEFAULT_CLEAN_INTERVAL_SECS: u64 = 5 * 60;

/// Default lifetime of an unanswered captcha challenge in seconds
pub const DEFAULT_CAPTCHA_TTL_SECS: u64 = 10 * 60;

/// Number of digits in a captcha challenge
pub const CAPTCHA_DIGITS: usize = 6;

/// Rendered captcha size in pixels
pub const CAPTCHA_WIDTH: u32 = 300;
pub const CAPTCHA_HEIGHT: u32 = 110;

/// Slack added to the body limit for multipart framing and form fields
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Random bytes per storage identifier (128 bits)
pub const ID_ENTROPY_BYTES: usize = 16;

/// Upper bound on identifier allocation attempts for a single upload
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Route prefix under which stored objects are served
pub const DOWNLOAD_PREFIX: &str = "/d";

/// Fallback name when a client supplies no usable filename
pub const FALLBACK_FILENAME: &str = "file";

/// Longest public filename kept, in bytes
pub const MAX_FILENAME_LEN: usize = 200;

/// Log banner
pub const FUP_BANNER: &str = "📦 fup";
