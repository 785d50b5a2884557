// Source resolution
// Maps a CLI source argument to a concrete path, optionally looking up a
// block device by filesystem UUID through a platform adapter.

use crate::error::{BackupError, Result};
use std::path::PathBuf;
use uuid::Uuid;

/// Platform adapter that maps a normalized filesystem UUID to a device
/// path, or `None` when no device carries it.
pub trait DeviceResolver: Send + Sync {
    fn device_for_uuid(&self, uuid: &str) -> Result<Option<PathBuf>>;
}

/// Registry of platform device resolvers. Platforms without an adapter
/// reject UUID lookups as unsupported.
#[derive(Default)]
pub struct DeviceRegistry {
    resolvers: Vec<Box<dyn DeviceResolver>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the adapters available on this platform.
    pub fn with_platform_resolvers() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(target_os = "macos")]
        registry.register(Box::new(macos::DiskutilResolver::default()));

        registry
    }

    pub fn register(&mut self, resolver: Box<dyn DeviceResolver>) {
        self.resolvers.push(resolver);
    }

    /// Resolves a source argument to a path. With `is_uuid` the argument is
    /// normalized and looked up through the registered platform adapters;
    /// otherwise it must simply exist on disk.
    pub fn resolve_source(&self, source: &str, is_uuid: bool) -> Result<PathBuf> {
        if !is_uuid {
            let path = PathBuf::from(source);
            if !path.exists() {
                return Err(BackupError::NoSuchSource(source.to_string()));
            }
            return Ok(path);
        }

        let uuid = normalize_uuid(source)?;

        if self.resolvers.is_empty() {
            return Err(BackupError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ));
        }

        for resolver in &self.resolvers {
            if let Some(device) = resolver.device_for_uuid(&uuid)? {
                return Ok(device);
            }
        }

        Err(BackupError::NoSuchUuid(uuid))
    }
}

/// Canonical lowercase hyphenated form of a UUID string.
pub fn normalize_uuid(value: &str) -> Result<String> {
    Uuid::parse_str(value.trim())
        .map(|uuid| uuid.hyphenated().to_string())
        .map_err(|_| BackupError::InvalidArgument(format!("not a valid UUID: {:?}", value)))
}

/// Whether `value` parses as a UUID.
pub fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value.trim()).is_ok()
}

#[cfg(target_os = "macos")]
pub mod macos {
    //! `diskutil`-backed UUID lookup. Scans the plist disk listing for a
    //! partition or APFS volume whose `DiskUUID` matches and returns the raw
    //! (unbuffered) device node for better copy throughput.

    use super::DeviceResolver;
    use crate::error::{BackupError, Result};
    use plist::Value;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::process::Command;

    #[derive(Debug, Clone)]
    pub struct DiskutilResolver {
        program: String,
    }

    impl Default for DiskutilResolver {
        fn default() -> Self {
            Self {
                program: "diskutil".to_string(),
            }
        }
    }

    impl DiskutilResolver {
        fn disk_listing(&self) -> Result<Value> {
            let output = Command::new(&self.program)
                .args(["list", "-plist"])
                .output()?;

            if !output.status.success() {
                return Err(BackupError::Internal(format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }

            Value::from_reader(Cursor::new(output.stdout))
                .map_err(|e| BackupError::Internal(format!("unreadable diskutil plist: {}", e)))
        }
    }

    fn find_in_volume_list(volumes: &[Value], uuid: &str) -> Option<PathBuf> {
        for volume in volumes {
            let Some(volume) = volume.as_dictionary() else {
                continue;
            };
            let Some(disk_uuid) = volume.get("DiskUUID").and_then(Value::as_string) else {
                continue;
            };

            if disk_uuid.eq_ignore_ascii_case(uuid) {
                let identifier = volume.get("DeviceIdentifier").and_then(Value::as_string)?;
                return Some(PathBuf::from(format!("/dev/r{}", identifier)));
            }
        }
        None
    }

    impl DeviceResolver for DiskutilResolver {
        fn device_for_uuid(&self, uuid: &str) -> Result<Option<PathBuf>> {
            let listing = self.disk_listing()?;
            let disks = listing
                .as_dictionary()
                .and_then(|root| root.get("AllDisksAndPartitions"))
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    BackupError::Internal("diskutil plist has no disk listing".to_string())
                })?;

            for disk in disks {
                let Some(disk) = disk.as_dictionary() else {
                    continue;
                };

                for key in ["Partitions", "APFSVolumes"] {
                    if let Some(volumes) = disk.get(key).and_then(Value::as_array) {
                        if let Some(device) = find_in_volume_list(volumes, uuid) {
                            return Ok(Some(device));
                        }
                    }
                }
            }

            Ok(None)
        }
    }
}
