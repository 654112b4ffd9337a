//! Shared configuration constants for contextualize
//!
//! Default values used by provider configuration, the browser capability and
//! the extraction engine, kept in one place to avoid magic numbers.

/// Implicit wait applied to every element lookup: 3 seconds
///
/// Overridden per provider by the `wait` key of `multi.yaml`/`source.yaml`.
pub const IMPLICIT_WAIT_DEFAULT_SECS: f64 = 3.0;

/// Explicit wait used by wait-method operations that configure no `wait`
pub const EXPLICIT_WAIT_DEFAULT_SECS: f64 = 10.0;

/// Poll interval for explicit waits: 200ms
pub const WAIT_POLL_INTERVAL_MS: u64 = 200;

/// Cached content older than this many days is re-extracted
pub const FRESHNESS_THRESHOLD_DEFAULT_DAYS: i64 = 30;

/// Pages fetched when `pagination` is present but `pages` is not
pub const PAGES_MAXIMUM_DEFAULT: u32 = 10;

/// Pages fetched when no `pagination` section exists
pub const PAGES_MINIMUM_DEFAULT: u32 = 1;

/// Provider configuration file for paginated search extractors
pub const MULTI_FILE_NAME: &str = "multi.yaml";

/// Provider configuration file for detail-page extractors
pub const SOURCE_FILE_NAME: &str = "source.yaml";

/// Exponential rate approximating the chance a user clicks the nth result
///
/// Derived from a first-result selection probability of 32.5%:
/// `lambda = -ln(1 - 0.325) / 1`.
pub const HUMAN_SELECTION_LAMBDA: f64 = 0.393;

/// Attempts made by bounded random samplers before falling back to the mode
pub const RANDOM_SAMPLE_ATTEMPTS: usize = 10;

/// Parsed configuration documents kept in memory
pub const CONFIG_FILE_CACHE_CAPACITY: usize = 256;

/// Timeout for page navigation in the chromium backend
pub const NAVIGATION_TIMEOUT_SECS: u64 = 30;

/// User agent presented by both browser backends
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
