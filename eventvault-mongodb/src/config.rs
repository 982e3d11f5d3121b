use std::time::Duration;

/// Environment variable holding the connection string.
pub const URI_ENV: &str = "EVENTVAULT_MONGODB_URI";
/// Environment variable holding the database name.
pub const DATABASE_ENV: &str = "EVENTVAULT_MONGODB_DATABASE";

const DEFAULT_URI: &str = "mongodb://localhost:27017";
const DEFAULT_DATABASE: &str = "eventvault";

/// Connection settings for [`MongoDocumentEngine`](crate::MongoDocumentEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConfig {
    /// Connection string (default: `mongodb://localhost:27017`)
    pub uri: String,
    /// Database holding every collection (default: `eventvault`)
    pub database: String,
    /// How long to wait for a usable server (default: 3 seconds)
    pub server_selection_timeout: Duration,
    /// TCP connect timeout (default: 3 seconds)
    pub connect_timeout: Duration,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            server_selection_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl MongoConfig {
    /// Configuration for `uri` and `database` with default timeouts.
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Read `EVENTVAULT_MONGODB_URI` and `EVENTVAULT_MONGODB_DATABASE`,
    /// falling back to the defaults for unset variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            uri: lookup(URI_ENV)
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.uri),
            database: lookup(DATABASE_ENV)
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.database),
            ..defaults
        }
    }

    /// Set the server selection timeout.
    #[must_use]
    pub const fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
