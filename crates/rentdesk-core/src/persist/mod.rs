pub mod db;
pub mod snapshot;

pub use db::SessionDb;
pub use snapshot::BackupSnapshot;
