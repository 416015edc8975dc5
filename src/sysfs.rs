use std::io;
use std::path::Path;

use tracing::warn;

/// Small-text-file access to a sysfs-like attribute store.
///
/// Drivers never touch the filesystem directly; they go through this
/// capability so tests can swap in an in-memory tree.
pub trait SysfsIo: Send + Sync {
    fn read_string(&self, path: &Path) -> io::Result<String>;
    fn write_string(&self, path: &Path, value: &str) -> io::Result<()>;
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;
    fn exists(&self, path: &Path) -> bool;

    fn read_trimmed(&self, path: &Path) -> io::Result<String> {
        Ok(self.read_string(path)?.trim().to_string())
    }

    fn read_i64(&self, path: &Path) -> io::Result<i64> {
        let raw = self.read_trimmed(path)?;
        raw.parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{raw:?}: {e}")))
    }

    fn read_f64(&self, path: &Path) -> io::Result<f64> {
        let raw = self.read_trimmed(path)?;
        raw.parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{raw:?}: {e}")))
    }

    fn write_int(&self, path: &Path, value: i64) -> io::Result<()> {
        self.write_string(path, &value.to_string())
    }

    /// Integer write with readback verification.
    fn write_int_verify(&self, path: &Path, value: i64) -> io::Result<()> {
        self.write_int(path, value)?;
        let back = self.read_i64(path)?;
        if back != value {
            warn!("Possible failure in int write {} to {}", value, path.display());
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("wrote {value}, read back {back}"),
            ));
        }
        Ok(())
    }

    /// String write with readback verification.
    fn write_string_verify(&self, path: &Path, value: &str) -> io::Result<()> {
        self.write_string(path, value)?;
        let back = self.read_trimmed(path)?;
        if back != value {
            warn!(
                "Possible failure in string write of {} to {}: read back {}",
                value,
                path.display(),
                back
            );
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("wrote {value:?}, read back {back:?}"),
            ));
        }
        Ok(())
    }
}

/// The real thing: plain `std::fs` against `/sys`.
#[derive(Debug, Default)]
pub struct LinuxSysfs;

impl LinuxSysfs {
    pub fn new() -> Self {
        Self
    }
}

impl SysfsIo for LinuxSysfs {
    fn read_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_string(&self, path: &Path, value: &str) -> io::Result<()> {
        std::fs::write(path, value)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
