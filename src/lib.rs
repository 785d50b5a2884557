// Partsnap - incremental part-based snapshot backups
// Core library module

pub mod backup;
pub mod compare;
pub mod copier;
pub mod device;
pub mod error;
pub mod layout;
pub mod restore;
pub mod size;
pub mod speed;
pub mod status;

pub use backup::{BackupEngine, BackupOptions, BackupReport};
pub use copier::{BlockCopier, DdBlockCopier, FileBlockCopier};
pub use device::{DeviceRegistry, DeviceResolver};
pub use error::{BackupError, Result};
pub use restore::{RestoreEngine, RestoreOptions};
pub use size::{format_size, parse_size};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
