// Platform defaults
pub const DEFAULT_BASE_URL: &str = "https://millerbecker.pakaneo.com";
pub const DEFAULT_OUTPUT_DIR: &str = "billing_exports";
pub const DEFAULT_CREDENTIALS_FILE: &str = "auth_details.json";

// Scheduling defaults
pub const DEFAULT_CONCURRENT_FETCHES: usize = 20;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10000;
pub const DEFAULT_RETRY_JITTER: f64 = 0.2;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30000;
pub const DEFAULT_LOGIN_TIMEOUT_MS: u64 = 45000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_REQUEST_DELAY_MIN_MS: u64 = 200;
pub const DEFAULT_REQUEST_DELAY_MAX_MS: u64 = 1000;

// Unclassified failures get a single retry at most
pub const UNCLASSIFIED_MAX_ATTEMPTS: u32 = 2;

// Output layout
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const REPORT_FILE_PREFIX: &str = "download_report_";
pub const PART_FILE_SUFFIX: &str = ".part";
pub const CORRUPT_REPORT_SUFFIX: &str = ".corrupt";
pub const RECENT_EXPORTS_LIMIT: usize = 3;

// HTTP
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";
pub const ACCEPT_HEADER: &str = "text/csv,application/octet-stream,text/plain;q=0.9,*/*;q=0.8";
pub const CSV_CONTENT_TYPES: &[&str] = &["text/csv", "application/octet-stream", "text/plain"];
pub const CSRF_MISMATCH_STATUS: u16 = 419;

// Export type aliases (compared after lowercasing and stripping '-', '_' and "export")
pub const STORE_PRODUCTS_ALIASES: &[&str] = &["storeproducts", "store"];
pub const STORED_PRODUCTS_ALIASES: &[&str] = &["storedproducts", "stored"];
pub const PACKED_PRODUCTS_ALIASES: &[&str] = &["packedproducts", "products"];
pub const PACKED_ORDERS_ALIASES: &[&str] = &["packedorders", "orders"];
