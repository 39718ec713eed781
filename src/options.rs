//! Configuration options for cursordb.

use std::time::Duration;

/// Default number of rows a cursor pulls from SQLite per round trip.
pub const DEFAULT_CURSOR_PAGE_SIZE: usize = 64;

/// Default busy timeout for the SQLite connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default prepared statement cache capacity.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 64;

/// Maximum encoded key size (8KB).
pub const MAX_KEY_SIZE: usize = 8 * 1024;

/// Maximum value size (256MB).
pub const MAX_VALUE_SIZE: usize = 256 * 1024 * 1024;

/// SQLite `synchronous` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Hand writes to the OS without syncing (fastest, may lose commits on power loss).
    Off,
    /// Sync at critical moments.
    #[default]
    Normal,
    /// Sync on every commit (safest, slowest).
    Full,
}

impl SyncMode {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            SyncMode::Off => "OFF",
            SyncMode::Normal => "NORMAL",
            SyncMode::Full => "FULL",
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Rollback journal deleted after each transaction.
    Delete,
    /// Write-ahead log.
    #[default]
    Wal,
    /// Journal kept in memory.
    Memory,
}

impl JournalMode {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Wal => "WAL",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// Backing store configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    // === Storage ===
    /// Create the database file if it doesn't exist.
    pub create_if_missing: bool,

    /// SQLite `synchronous` mode.
    pub sync_mode: SyncMode,

    /// SQLite journal mode (ignored for in-memory databases).
    pub journal_mode: JournalMode,

    /// How long to wait on a locked database before failing.
    pub busy_timeout: Duration,

    /// Number of prepared statements kept per connection.
    pub statement_cache_capacity: usize,

    // === Cursors ===
    /// Rows fetched per range-query page.
    pub cursor_page_size: usize,

    // === Limits ===
    /// Maximum encoded key size.
    pub max_key_size: usize,

    /// Maximum value size.
    pub max_value_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_mode: SyncMode::default(),
            journal_mode: JournalMode::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            cursor_page_size: DEFAULT_CURSOR_PAGE_SIZE,
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.cursor_page_size == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "cursor_page_size must be at least 1".into(),
            ));
        }

        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return Err(crate::Error::InvalidConfiguration(format!(
                "max_key_size must be between 1 and {}",
                MAX_KEY_SIZE
            )));
        }

        if self.max_value_size > MAX_VALUE_SIZE {
            return Err(crate::Error::InvalidConfiguration(format!(
                "max_value_size cannot exceed {}",
                MAX_VALUE_SIZE
            )));
        }

        Ok(())
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set create_if_missing.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.options.create_if_missing = value;
        self
    }

    /// Set sync mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.sync_mode = mode;
        self
    }

    /// Set journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.options.journal_mode = mode;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.options.busy_timeout = timeout;
        self
    }

    /// Set statement cache capacity.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.options.statement_cache_capacity = capacity;
        self
    }

    /// Set cursor page size.
    pub fn cursor_page_size(mut self, rows: usize) -> Self {
        self.options.cursor_page_size = rows;
        self
    }

    /// Set max key size.
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.options.max_key_size = size;
        self
    }

    /// Set max value size.
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.options.max_value_size = size;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
