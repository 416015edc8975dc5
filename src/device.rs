use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::sysfs::SysfsIo;

/// Snapshot of one kernel device, as handed to the drivers.
///
/// This is the minimal discovery contract the drivers need: subsystem, kernel
/// object name, sysfs attributes, declared properties, device node and parent
/// traversal. Enumeration and property computation beyond that belong to the
/// hotplug collaborator feeding `DeviceEvent`s.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    subsystem: String,
    kernel_name: String,
    sysfs_path: PathBuf,
    dev_node: Option<PathBuf>,
    properties: HashMap<String, String>,
    parent: Option<Device>,
    io: Arc<dyn SysfsIo>,
}

impl Device {
    pub fn builder(subsystem: impl Into<String>, kernel_name: impl Into<String>) -> DeviceBuilder {
        DeviceBuilder {
            subsystem: subsystem.into(),
            kernel_name: kernel_name.into(),
            sysfs_path: None,
            dev_node: None,
            properties: HashMap::new(),
            parent: None,
        }
    }

    pub fn subsystem(&self) -> &str {
        &self.inner.subsystem
    }

    pub fn kernel_name(&self) -> &str {
        &self.inner.kernel_name
    }

    /// Trailing decimal part of the kernel name ("iio:device3" -> "3").
    pub fn number(&self) -> Option<&str> {
        let name = &self.inner.kernel_name;
        let digits = name
            .rfind(|c: char| !c.is_ascii_digit())
            .map(|i| &name[i + 1..])
            .unwrap_or(name.as_str());
        (!digits.is_empty()).then_some(digits)
    }

    pub fn sysfs_path(&self) -> &Path {
        &self.inner.sysfs_path
    }

    pub fn dev_node(&self) -> Option<&Path> {
        self.inner.dev_node.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.inner.properties.get(key).map(String::as_str)
    }

    /// udev-style boolean property ("1" means true).
    pub fn property_bool(&self, key: &str) -> bool {
        self.property(key) == Some("1")
    }

    pub fn parent(&self) -> Option<&Device> {
        self.inner.parent.as_ref()
    }

    /// Read a sysfs attribute of this device, trimmed. `None` when absent.
    pub fn attr(&self, name: &str) -> Option<String> {
        self.inner
            .io
            .read_trimmed(&self.inner.sysfs_path.join(name))
            .ok()
    }

    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.inner
            .io
            .read_f64(&self.inner.sysfs_path.join(name))
            .ok()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("subsystem", &self.inner.subsystem)
            .field("kernel_name", &self.inner.kernel_name)
            .field("sysfs_path", &self.inner.sysfs_path)
            .finish()
    }
}

pub struct DeviceBuilder {
    subsystem: String,
    kernel_name: String,
    sysfs_path: Option<PathBuf>,
    dev_node: Option<PathBuf>,
    properties: HashMap<String, String>,
    parent: Option<Device>,
}

impl DeviceBuilder {
    pub fn sysfs_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sysfs_path = Some(path.into());
        self
    }

    pub fn dev_node(mut self, path: impl Into<PathBuf>) -> Self {
        self.dev_node = Some(path.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn parent(mut self, parent: Device) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self, io: Arc<dyn SysfsIo>) -> Device {
        let sysfs_path = self
            .sysfs_path
            .unwrap_or_else(|| PathBuf::from("/sys").join(&self.kernel_name));
        Device {
            inner: Arc::new(DeviceInner {
                subsystem: self.subsystem,
                kernel_name: self.kernel_name,
                sysfs_path,
                dev_node: self.dev_node,
                properties: self.properties,
                parent: self.parent,
                io,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceAction {
    Added,
    Removed,
    Changed,
}

/// Hotplug notification fanned out to the coordinator and drivers.
#[derive(Clone, Debug)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    pub device: Device,
}

/// Enumerate candidate devices by subsystem. Used for the startup scan and
/// for trigger discovery.
pub trait DeviceCatalog: Send + Sync {
    fn by_subsystem(&self, subsystem: &str) -> Vec<Device>;
}

/// Axis triplet read from an input event node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AbsReading {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Kernel-node reads. Separated from [`SysfsIo`] because these hit character
/// devices, not attribute files.
pub trait DeviceIo: Send + Sync {
    /// Non-blocking bulk read from a character device. `Ok(None)` when no
    /// data is available yet.
    fn read_chunk(&self, node: &Path, max_len: usize) -> io::Result<Option<Vec<u8>>>;

    /// Current absolute-axis state of an input event node.
    fn read_abs_axes(&self, node: &Path) -> io::Result<AbsReading>;
}

#[cfg(target_os = "linux")]
mod linux_io {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::io::Read;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    #[derive(Debug, Default)]
    pub struct LinuxDeviceIo;

    impl LinuxDeviceIo {
        pub fn new() -> Self {
            Self
        }
    }

    /// See `struct input_absinfo` in linux/input.h.
    #[repr(C)]
    #[derive(Default)]
    struct InputAbsinfo {
        value: i32,
        minimum: i32,
        maximum: i32,
        fuzz: i32,
        flat: i32,
        resolution: i32,
    }

    // _IOR('E', 0x40 + axis, struct input_absinfo)
    fn eviocgabs(axis: u8) -> libc::c_ulong {
        let size = std::mem::size_of::<InputAbsinfo>() as libc::c_ulong;
        (2 as libc::c_ulong) << 30
            | size << 16
            | (libc::c_ulong::from(b'E')) << 8
            | (0x40 + libc::c_ulong::from(axis))
    }

    fn read_axis(file: &File, axis: u8) -> io::Result<i32> {
        let mut info = InputAbsinfo::default();
        let r = unsafe { libc::ioctl(file.as_raw_fd(), eviocgabs(axis), &mut info) };
        if r < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(info.value)
    }

    impl DeviceIo for LinuxDeviceIo {
        fn read_chunk(&self, node: &Path, max_len: usize) -> io::Result<Option<Vec<u8>>> {
            let mut file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(node)?;
            let mut buf = vec![0u8; max_len];
            match file.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    Ok(Some(buf))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            }
        }

        fn read_abs_axes(&self, node: &Path) -> io::Result<AbsReading> {
            let file = File::open(node)?;
            Ok(AbsReading {
                x: read_axis(&file, 0x00)?,
                y: read_axis(&file, 0x01)?,
                z: read_axis(&file, 0x02)?,
            })
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_io::LinuxDeviceIo;

#[cfg(not(target_os = "linux"))]
#[derive(Debug, Default)]
pub struct LinuxDeviceIo;

#[cfg(not(target_os = "linux"))]
impl LinuxDeviceIo {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(target_os = "linux"))]
impl DeviceIo for LinuxDeviceIo {
    fn read_chunk(&self, _node: &Path, _max_len: usize) -> io::Result<Option<Vec<u8>>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "device nodes are only supported on Linux",
        ))
    }

    fn read_abs_axes(&self, _node: &Path) -> io::Result<AbsReading> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "device nodes are only supported on Linux",
        ))
    }
}

/// Startup enumeration straight off sysfs.
///
/// This covers the bounded scan the daemon performs at startup; live hotplug
/// and udev-computed properties (ID_INPUT_ACCELEROMETER and friends) come in
/// over the `DeviceEvent` channel from the embedding service.
pub struct SysfsCatalog {
    io: Arc<dyn SysfsIo>,
    root: PathBuf,
}

impl SysfsCatalog {
    pub fn new(io: Arc<dyn SysfsIo>) -> Self {
        Self::with_root(io, "/sys")
    }

    pub fn with_root(io: Arc<dyn SysfsIo>, root: impl Into<PathBuf>) -> Self {
        Self {
            io,
            root: root.into(),
        }
    }

    fn subsystem_dir(&self, subsystem: &str) -> Option<PathBuf> {
        match subsystem {
            "iio" => Some(self.root.join("bus/iio/devices")),
            "input" => Some(self.root.join("class/input")),
            "platform" => Some(self.root.join("bus/platform/devices")),
            _ => None,
        }
    }

    fn build_device(&self, subsystem: &str, dir: &Path, kernel_name: &str) -> Device {
        let sysfs_path = dir.join(kernel_name);
        let mut builder = Device::builder(subsystem, kernel_name).sysfs_path(&sysfs_path);

        // DEVNAME / MODALIAS live in the uevent file
        if let Ok(uevent) = self.io.read_string(&sysfs_path.join("uevent")) {
            for line in uevent.lines() {
                match line.split_once('=') {
                    Some(("DEVNAME", node)) => {
                        builder = builder.dev_node(Path::new("/dev").join(node));
                    }
                    Some(("MODALIAS", alias)) => {
                        builder = builder.property("MODALIAS", alias);
                    }
                    _ => {}
                }
            }
        }

        // udev derives the NAME property from the kernel name attribute,
        // quoted; mirror that so name-matching drivers work from a cold scan.
        if let Ok(name) = self.io.read_trimmed(&sysfs_path.join("name")) {
            builder = builder.property("NAME", format!("\"{name}\""));
        }

        builder.build(self.io.clone())
    }
}

impl DeviceCatalog for SysfsCatalog {
    fn by_subsystem(&self, subsystem: &str) -> Vec<Device> {
        let Some(dir) = self.subsystem_dir(subsystem) else {
            return Vec::new();
        };
        let entries = match self.io.list_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Could not enumerate {}: {}", dir.display(), e);
                return Vec::new();
            }
        };
        entries
            .into_iter()
            .map(|name| self.build_device(subsystem, &dir, &name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::mem::MemSysfs;

    fn mem_device(kernel_name: &str) -> Device {
        Device::builder("iio", kernel_name)
            .sysfs_path(format!("/sys/bus/iio/devices/{kernel_name}"))
            .build(Arc::new(MemSysfs::new()))
    }

    #[test]
    fn test_device_number_is_trailing_digits() {
        assert_eq!(mem_device("iio:device12").number(), Some("12"));
        assert_eq!(mem_device("trigger0").number(), Some("0"));
        assert_eq!(mem_device("weird").number(), None);
    }

    #[test]
    fn test_attr_reads_through_sysfs() {
        let fs = Arc::new(MemSysfs::new());
        fs.insert("/sys/bus/iio/devices/iio:device0/name", "accel_3d\n");
        let dev = Device::builder("iio", "iio:device0")
            .sysfs_path("/sys/bus/iio/devices/iio:device0")
            .build(fs);
        assert_eq!(dev.attr("name").as_deref(), Some("accel_3d"));
        assert_eq!(dev.attr("missing"), None);
    }

    #[test]
    fn test_catalog_builds_devices_from_uevent() {
        let fs = Arc::new(MemSysfs::new());
        fs.insert(
            "/sys/bus/iio/devices/iio:device0/uevent",
            "MAJOR=246\nMINOR=0\nDEVNAME=iio:device0\n",
        );
        fs.insert("/sys/bus/iio/devices/iio:device0/name", "accel_3d\n");
        let catalog = SysfsCatalog::new(fs);
        let devices = catalog.by_subsystem("iio");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].kernel_name(), "iio:device0");
        assert_eq!(
            devices[0].dev_node(),
            Some(Path::new("/dev/iio:device0"))
        );
        assert_eq!(devices[0].property("NAME"), Some("\"accel_3d\""));
    }
}
