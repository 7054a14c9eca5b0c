use std::path::{Path, PathBuf};

/// At most this many topics are carried on the streaming connection, to
/// bound connection-setup cost. The most recently active win.
pub const DEFAULT_MAX_TOPICS: usize = 32;

/// Byte budget for the backup snapshot file.
pub const DEFAULT_BACKUP_MAX_BYTES: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    /// Base URL of the live feed gateway.
    pub gateway_url: String,
    /// Base URL of the reservation status-log service.
    pub status_log_url: String,
    /// Authenticated display identity, used to resolve message senders.
    pub identity: String,
    pub max_topics: usize,
    pub backup_max_bytes: usize,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        gateway_url: impl Into<String>,
        status_log_url: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            gateway_url: gateway_url.into(),
            status_log_url: status_log_url.into(),
            identity: identity.into(),
            max_topics: DEFAULT_MAX_TOPICS,
            backup_max_bytes: DEFAULT_BACKUP_MAX_BYTES,
        }
    }

    /// Default data directory under the platform data dir.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rentdesk")
    }
}
