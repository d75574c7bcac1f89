//! Declarations handed over to the package manager, the init system and the filesystem.
//!
//! None of these perform anything by themselves: they describe a desired state, and the
//! [`apply`](crate::apply) module (or an external tool) converges the host towards it.

use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Desired state of a resource which can be removed.
///
/// `Present` carries whatever the resource needs to be created, so that an absent
/// resource cannot hold a stale body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensure<T> {
    /// The resource must not exist; any previous instance is removed.
    Absent,
    /// The resource must exist with the given content.
    Present(T),
}

impl<T> Ensure<T> {
    /// Whether the resource is declared present.
    pub fn is_present(&self) -> bool {
        matches!(self, Ensure::Present(_))
    }

    /// The body of a present resource.
    pub fn as_present(&self) -> Option<&T> {
        match self {
            Ensure::Absent => None,
            Ensure::Present(t) => Some(t),
        }
    }
}

/// Kind of a resource, as used in references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// An OS package.
    Package,
    /// A daemon managed by the init system.
    Service,
    /// A plain file.
    File,
    /// A systemd drop-in file.
    DropinFile,
    /// The resource limits of a systemd unit.
    ServiceLimits,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Package => "Package",
            ResourceKind::Service => "Service",
            ResourceKind::File => "File",
            ResourceKind::DropinFile => "Dropin_file",
            ResourceKind::ServiceLimits => "Service_limits",
        })
    }
}

/// Reference to a resource, displayed as `Kind[title]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Title of the resource, unique per kind.
    pub title: String,
}

impl ResourceRef {
    /// Reference to the package `name`.
    pub fn package(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Package,
            title: name.into(),
        }
    }

    /// Reference to the service `name`.
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Service,
            title: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.title)
    }
}

/// An OS package which must be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Name of the package, as known by the package manager.
    pub name: String,
}

impl Package {
    /// Declares the package `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Reference to this package.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::package(&self.name)
    }
}

/// Whether a service should be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEnsure {
    /// Started, and restarted when notified.
    #[default]
    Running,
    /// Stopped. Notifications are then ignored.
    Stopped,
}

/// A daemon managed by the init system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Name of the service, without the `.service` suffix.
    pub name: String,
    /// Desired run state.
    pub ensure: ServiceEnsure,
    /// Whether the service is started at boot.
    pub enable: bool,
    /// Resources which must be in place before the service is managed.
    pub require: Vec<ResourceRef>,
}

impl Service {
    /// Reference to this service.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::service(&self.name)
    }

    /// Name of the systemd unit of the service.
    pub fn unit(&self) -> String {
        format!("{}.service", self.name)
    }
}

/// A file with literal content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    /// Absolute path of the file on the managed host.
    pub path: PathBuf,
    /// Desired content.
    pub ensure: Ensure<String>,
    /// Unix permissions of the file when created.
    pub mode: u32,
    /// Resources to notify when the file changes.
    pub notify: Vec<ResourceRef>,
    /// Resources which must be in place before the file is written.
    pub require: Vec<ResourceRef>,
}

impl FileResource {
    /// Reference to this file.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: ResourceKind::File,
            title: self.path.display().to_string(),
        }
    }
}

/// Directory holding the drop-ins of a systemd unit.
pub fn dropin_dir(unit: &str) -> PathBuf {
    Path::new("/etc/systemd/system").join(format!("{unit}.d"))
}

/// A drop-in file layered on top of a systemd unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropinFile {
    /// Name of the file in the drop-in directory.
    pub filename: String,
    /// Unit the drop-in applies to, e.g. `qpidd.service`.
    pub unit: String,
    /// Content of the drop-in.
    pub ensure: Ensure<String>,
    /// Resources to notify when the drop-in changes.
    pub notify: Vec<ResourceRef>,
    /// Resources which must be in place before the drop-in is written.
    pub require: Vec<ResourceRef>,
}

impl DropinFile {
    /// Absolute path of the drop-in on the managed host.
    pub fn path(&self) -> PathBuf {
        dropin_dir(&self.unit).join(&self.filename)
    }

    /// Reference to this drop-in.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: ResourceKind::DropinFile,
            title: self.filename.clone(),
        }
    }

    /// The drop-in seen as a plain file.
    pub fn to_file(&self) -> FileResource {
        FileResource {
            path: self.path(),
            ensure: self.ensure.clone(),
            mode: 0o644,
            notify: self.notify.clone(),
            require: self.require.clone(),
        }
    }
}

/// Resource limits (`LimitNOFILE`, ...) of a systemd unit, stored in a drop-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLimits {
    /// Unit the limits apply to, e.g. `qpidd.service`.
    pub unit: String,
    /// Limit name to value, in emission order.
    pub ensure: Ensure<Vec<(String, String)>>,
    /// Resources to notify when the limits change.
    pub notify: Vec<ResourceRef>,
}

impl ServiceLimits {
    /// Name of the drop-in holding the limits.
    pub const DROPIN_FILENAME: &'static str = "90-limits.conf";

    /// Reference to these limits.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: ResourceKind::ServiceLimits,
            title: self.unit.clone(),
        }
    }

    /// Value of the limit `name`, if the limits are present and set it.
    pub fn limit(&self, name: &str) -> Option<&str> {
        self.ensure
            .as_present()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The drop-in carrying these limits.
    pub fn to_dropin(&self) -> DropinFile {
        let ensure = match &self.ensure {
            Ensure::Absent => Ensure::Absent,
            Ensure::Present(limits) => {
                let mut body = String::from("[Service]\n");
                for (name, value) in limits {
                    body.push_str(&format!("{name}={value}\n"));
                }
                Ensure::Present(body)
            }
        };
        DropinFile {
            filename: Self::DROPIN_FILENAME.to_owned(),
            unit: self.unit.clone(),
            ensure,
            notify: self.notify.clone(),
            require: Vec::new(),
        }
    }
}
