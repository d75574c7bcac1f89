//! Converges the filesystem towards a [`Catalog`].
//!
//! Only file-shaped resources are acted upon. Packages and the service are reported back
//! to the caller, which hands them over to the package manager and the init system.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Context;
use futures_util::future::join_all;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::render::Catalog;
use crate::resource::{Ensure, FileResource, Package, ResourceRef, Service, ServiceEnsure};

/// Creates (or truncates) a file, with `mode` as its permissions when it is created.
pub fn create_file_with_mode<T>(path: impl AsRef<Path>, mode: u32) -> anyhow::Result<T>
where
    std::fs::File: Into<T>,
{
    let mut open_opt = std::fs::OpenOptions::new();
    open_opt.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open_opt.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    let std_file = open_opt.open(path)?;
    Ok(std_file.into())
}

/// Sets the permissions of an existing file to `mode`.
pub async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Maps an absolute path of the managed host under `root`.
pub fn under_root(root: &Path, path: &Path) -> PathBuf {
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// How [`apply`] behaves.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Directory standing for `/` of the managed host.
    pub root: PathBuf,
    /// Compute the report without touching the filesystem.
    pub dry_run: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            dry_run: false,
        }
    }
}

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// It did not exist and was written.
    Created,
    /// It existed with another content and was rewritten.
    Updated,
    /// It already had the right content.
    Unchanged,
    /// It existed and was removed.
    Removed,
    /// It did not exist and was not supposed to.
    AlreadyAbsent,
}

impl Change {
    /// Whether the filesystem was (or, in dry run, would be) modified.
    pub fn is_change(self) -> bool {
        matches!(self, Change::Created | Change::Updated | Change::Removed)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Change::Created => "created",
            Change::Updated => "updated",
            Change::Unchanged => "unchanged",
            Change::Removed => "removed",
            Change::AlreadyAbsent => "absent",
        })
    }
}

/// Outcome for one file resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    /// The resource in the catalog.
    pub resource: ResourceRef,
    /// Where the file lives once mapped under the root.
    pub path: PathBuf,
    /// What happened to it.
    pub change: Change,
}

/// Result of [`apply`].
#[derive(Debug, Clone)]
pub struct Report {
    /// One outcome per file resource, in catalog order.
    pub files: Vec<FileOutcome>,
    /// Packages to install, in catalog order.
    pub packages: Vec<Package>,
    /// The managed service.
    pub service: Service,
    /// Whether a drop-in changed, requiring `systemctl daemon-reload`.
    pub daemon_reload: bool,
    /// Services notified by a changed resource.
    pub restart: Vec<ResourceRef>,
}

impl Report {
    /// Whether anything changed on disk.
    pub fn changed(&self) -> bool {
        self.files.iter().any(|f| f.change.is_change())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            writeln!(f, "{} {} ({})", file.change, file.resource, file.path.display())?;
        }
        for package in &self.packages {
            writeln!(f, "install {}", package.reference())?;
        }
        if self.daemon_reload {
            writeln!(f, "daemon-reload")?;
        }
        let state = match self.service.ensure {
            ServiceEnsure::Running => "running",
            ServiceEnsure::Stopped => "stopped",
        };
        let enable = if self.service.enable { "enabled" } else { "disabled" };
        writeln!(f, "ensure {} {state} {enable}", self.service.reference())?;
        for service in &self.restart {
            writeln!(f, "restart {service}")?;
        }
        Ok(())
    }
}

struct Target {
    resource: ResourceRef,
    file: FileResource,
    dropin: bool,
}

fn targets(catalog: &Catalog) -> Vec<Target> {
    let mut targets = vec![Target {
        resource: catalog.config_file.reference(),
        file: catalog.config_file.clone(),
        dropin: false,
    }];
    if let Some(acl) = &catalog.acl_file {
        targets.push(Target {
            resource: acl.reference(),
            file: acl.clone(),
            dropin: false,
        });
    }
    targets.push(Target {
        resource: catalog.service_limits.reference(),
        file: catalog.service_limits.to_dropin().to_file(),
        dropin: true,
    });
    targets.push(Target {
        resource: catalog.port_wait.reference(),
        file: catalog.port_wait.to_file(),
        dropin: true,
    });
    targets
}

#[instrument(name = "", level = "debug", skip_all, fields(file = %target.file.path.display()))]
async fn apply_file(target: &Target, root: &Path, dry_run: bool) -> anyhow::Result<Change> {
    let path = under_root(root, &target.file.path);
    let current = match tokio::fs::read(&path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Reading {}", path.display())),
    };
    let change = match (&target.file.ensure, current) {
        (Ensure::Absent, None) => Change::AlreadyAbsent,
        (Ensure::Absent, Some(_)) => {
            if !dry_run {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Removing {}", path.display()))?;
            }
            Change::Removed
        }
        (Ensure::Present(content), Some(current)) if current == content.as_bytes() => {
            Change::Unchanged
        }
        (Ensure::Present(content), current) => {
            if !dry_run {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Creating directory {}", parent.display()))?;
                }
                let mut file: tokio::fs::File = create_file_with_mode(&path, target.file.mode)
                    .with_context(|| format!("Opening {}", path.display()))?;
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
                // The mode given at creation does not apply to files which already existed.
                set_mode(&path, target.file.mode)
                    .await
                    .with_context(|| format!("Setting permissions of {}", path.display()))?;
            }
            if current.is_some() {
                Change::Updated
            } else {
                Change::Created
            }
        }
    };
    if change.is_change() {
        tracing::info!("{} {}", target.resource, change);
    } else {
        tracing::debug!("{} {}", target.resource, change);
    }
    Ok(change)
}

/// Writes and removes the file resources of `catalog` under `options.root`.
///
/// Files are independent from each other and are handled concurrently. The first error
/// encountered is returned, after every file has been processed.
#[instrument(level = "debug", skip_all, fields(root = %options.root.display(), dry_run = options.dry_run))]
pub async fn apply(catalog: &Catalog, options: &ApplyOptions) -> anyhow::Result<Report> {
    let targets = targets(catalog);
    let changes = join_all(
        targets
            .iter()
            .map(|t| apply_file(t, &options.root, options.dry_run)),
    )
    .await;

    let mut files = Vec::with_capacity(targets.len());
    let mut daemon_reload = false;
    let mut restart: Vec<ResourceRef> = Vec::new();
    for (target, change) in targets.into_iter().zip(changes) {
        let change = change?;
        if change.is_change() {
            daemon_reload |= target.dropin;
            for notified in &target.file.notify {
                if !restart.contains(notified) {
                    restart.push(notified.clone());
                }
            }
        }
        files.push(FileOutcome {
            path: under_root(&options.root, &target.file.path),
            resource: target.resource,
            change,
        });
    }

    let service = catalog.service.clone();
    if service.ensure == ServiceEnsure::Stopped {
        restart.retain(|r| *r != service.reference());
    }
    for service in &restart {
        tracing::info!("{} must be restarted.", service);
    }

    Ok(Report {
        files,
        packages: catalog.packages().cloned().collect(),
        service,
        daemon_reload,
        restart,
    })
}
