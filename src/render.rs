//! Turns a [`Request`] into a [`Catalog`] of declarations.
//!
//! Rendering is pure: the same request always yields the same catalog, and nothing is
//! read from or written to the host.
//!
//! Lines of `qpidd.conf` are emitted in this order:
//!
//! 1. `acl-file`, when an ACL is configured,
//! 2. the base lines: `log-enable`, `log-to-syslog`, `auth`,
//! 3. the tunables: `interface`, `session-max-unacked`, `mgmt-pub-interval`,
//!    `wcache-page-size`, `default-queue-limit`, `max-connections`,
//! 4. the SSL lines: `require-encryption`, `ssl-require-client-authentication`,
//!    `ssl-port`, `ssl-cert-db`, `ssl-cert-password-file`, `ssl-cert-name`,
//! 5. the custom settings, in the order they were written.

use std::fmt::{self, Display};

use crate::config::{Request, Ssl};
use crate::resource::{
    DropinFile, Ensure, FileResource, Package, ResourceRef, Service, ServiceLimits,
};

/// Package providing `nc`, used to probe the SSL port.
pub const PORT_PROBE_PACKAGE: &str = "nmap-ncat";
/// Name of the drop-in waiting for the SSL port.
pub const PORT_WAIT_DROPIN: &str = "wait-for-port.conf";

/// Keys emitted from dedicated parameters, which custom settings cannot override.
pub(crate) const RESERVED_KEYS: &[&str] = &[
    "acl-file",
    "log-enable",
    "log-to-syslog",
    "auth",
    "interface",
    "session-max-unacked",
    "mgmt-pub-interval",
    "wcache-page-size",
    "default-queue-limit",
    "max-connections",
    "require-encryption",
    "ssl-require-client-authentication",
    "ssl-port",
    "ssl-cert-db",
    "ssl-cert-password-file",
    "ssl-cert-name",
];

/// One `key=value` line of `qpidd.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLine {
    /// Option name, hyphenated.
    pub key: String,
    /// Option value.
    pub value: String,
}

impl Display for ConfigLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// The rendered `qpidd.conf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    lines: Vec<ConfigLine>,
}

impl ConfigDocument {
    fn push(&mut self, key: &str, value: impl Display) {
        self.lines.push(ConfigLine {
            key: key.to_owned(),
            value: value.to_string(),
        });
    }

    fn push_opt(&mut self, key: &str, value: Option<impl Display>) {
        if let Some(value) = value {
            self.push(key, value);
        }
    }

    /// The lines, in emission order.
    pub fn lines(&self) -> &[ConfigLine] {
        &self.lines
    }

    /// The lines, formatted as `key=value`.
    pub fn to_lines(&self) -> Vec<String> {
        self.lines.iter().map(ToString::to_string).collect()
    }

    /// Value of `key`, if emitted.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value.as_str())
    }
}

impl Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Everything needed to converge a host towards a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    /// Content of `qpidd.conf`.
    pub config: ConfigDocument,
    /// `qpidd.conf` as a file resource.
    pub config_file: FileResource,
    /// The ACL file, when an ACL is configured.
    pub acl_file: Option<FileResource>,
    /// `LimitNOFILE` of the broker unit.
    pub service_limits: ServiceLimits,
    /// Drop-in delaying the startup notification until the SSL port accepts connections.
    pub port_wait: DropinFile,
    /// Packages providing the broker.
    pub server_packages: Vec<Package>,
    /// The message store package, unless the store is disabled.
    pub store_package: Option<Package>,
    /// The package providing `nc`, when the port wait drop-in is present.
    pub probe_package: Option<Package>,
    /// The broker daemon.
    pub service: Service,
}

impl Catalog {
    /// All declared packages.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.server_packages
            .iter()
            .chain(self.store_package.iter())
            .chain(self.probe_package.iter())
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

/// Renders the lines of `qpidd.conf`, following the order given in the module docs.
pub fn render_config(request: &Request) -> ConfigDocument {
    let mut doc = ConfigDocument::default();

    // 1. ACL
    doc.push_opt("acl-file", request.acl.as_ref().map(|acl| acl.path.display()));

    // 2. Base
    doc.push("log-enable", &request.log_level);
    doc.push("log-to-syslog", yes_no(request.log_to_syslog));
    doc.push("auth", yes_no(request.auth));

    // 3. Tunables
    doc.push_opt("interface", request.interface.as_ref());
    doc.push_opt("session-max-unacked", request.session_unacked);
    doc.push_opt("mgmt-pub-interval", request.mgmt_pub_interval);
    doc.push_opt("wcache-page-size", request.wcache_page_size);
    doc.push_opt("default-queue-limit", request.default_queue_limit);
    doc.push_opt("max-connections", request.max_connections);

    // 4. SSL
    if let Some(ssl) = &request.ssl {
        doc.push("require-encryption", "yes");
        if ssl.require_client_auth {
            doc.push("ssl-require-client-authentication", "yes");
        }
        doc.push_opt("ssl-port", ssl.port);
        doc.push_opt("ssl-cert-db", ssl.cert_db.as_ref().map(|p| p.display()));
        doc.push_opt(
            "ssl-cert-password-file",
            ssl.cert_password_file.as_ref().map(|p| p.display()),
        );
        doc.push_opt("ssl-cert-name", ssl.cert_name.as_ref());
    }

    // 5. Custom
    for (key, value) in &request.custom_settings {
        doc.push(key, value);
    }

    doc
}

/// Body of the drop-in making systemd wait for the SSL port before considering the
/// broker started.
pub fn port_wait_body(port: u16) -> String {
    format!(
        "[Service]\n\
        ExecStartPost=/bin/bash -c 'while ! nc -z 127.0.0.1 {port}; do sleep 1; done'\n"
    )
}

fn port_wait(ssl: Option<&Ssl>, unit: &str, service: &ResourceRef) -> DropinFile {
    let probe = ResourceRef::package(PORT_PROBE_PACKAGE);
    DropinFile {
        filename: PORT_WAIT_DROPIN.to_owned(),
        unit: unit.to_owned(),
        ensure: match ssl {
            None => Ensure::Absent,
            Some(ssl) => Ensure::Present(port_wait_body(ssl.effective_port())),
        },
        notify: vec![service.clone()],
        require: if ssl.is_some() { vec![probe] } else { Vec::new() },
    }
}

/// Renders the whole catalog of a request.
pub fn render(request: &Request) -> Catalog {
    let service_ref = ResourceRef::service(&request.service.name);
    let unit = format!("{}.service", request.service.name);
    let server_packages: Vec<Package> = request
        .server_packages
        .iter()
        .map(|name| Package::new(name.as_str()))
        .collect();
    let store_package = request
        .server_store
        .then(|| Package::new(request.store_package.as_str()));
    let probe_package = request
        .ssl
        .as_ref()
        .map(|_| Package::new(PORT_PROBE_PACKAGE));
    let packages_refs: Vec<ResourceRef> = server_packages
        .iter()
        .chain(store_package.iter())
        .map(Package::reference)
        .collect();

    let config = render_config(request);
    tracing::debug!(lines = config.lines().len(), "Rendered {}", request.config_file.display());

    let config_file = FileResource {
        path: request.config_file.clone(),
        ensure: Ensure::Present(config.to_string()),
        mode: 0o644,
        notify: vec![service_ref.clone()],
        require: packages_refs.clone(),
    };
    let acl_file = request.acl.as_ref().map(|acl| FileResource {
        path: acl.path.clone(),
        ensure: Ensure::Present(acl.content.clone()),
        mode: 0o640,
        notify: vec![service_ref.clone()],
        require: packages_refs.clone(),
    });
    let service_limits = ServiceLimits {
        unit: unit.clone(),
        ensure: match request.open_file_limit {
            None => Ensure::Absent,
            Some(limit) => Ensure::Present(vec![("LimitNOFILE".to_owned(), limit.to_string())]),
        },
        notify: vec![service_ref.clone()],
    };
    let port_wait = port_wait(request.ssl.as_ref(), &unit, &service_ref);

    let mut service_require = packages_refs;
    service_require.push(config_file.reference());
    service_require.extend(acl_file.as_ref().map(FileResource::reference));
    let service = Service {
        name: request.service.name.clone(),
        ensure: request.service.ensure,
        enable: request.service.enable,
        require: service_require,
    };

    Catalog {
        config,
        config_file,
        acl_file,
        service_limits,
        port_wait,
        server_packages,
        store_package,
        probe_package,
        service,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::Acl;

    #[test]
    fn acl_line_comes_before_base_lines() {
        let request = Request {
            acl: Some(Acl {
                path: PathBuf::from("/etc/qpid/qpid.acl"),
                content: "allow all all".to_owned(),
            }),
            interface: Some("lo".to_owned()),
            ..Request::default()
        };
        assert_eq!(
            render_config(&request).to_lines(),
            [
                "acl-file=/etc/qpid/qpid.acl",
                "log-enable=error+",
                "log-to-syslog=yes",
                "auth=no",
                "interface=lo",
            ]
        );
    }

    #[test]
    fn base_lines_follow_parameters() {
        let request = Request {
            log_level: "info+".to_owned(),
            log_to_syslog: false,
            auth: true,
            ..Request::default()
        };
        assert_eq!(
            render_config(&request).to_lines(),
            ["log-enable=info+", "log-to-syslog=no", "auth=yes"]
        );
    }

    #[test]
    fn ssl_without_port_waits_on_default_port() {
        let request = Request {
            ssl: Some(Ssl::default()),
            ..Request::default()
        };
        let catalog = render(&request);
        assert_eq!(catalog.config.get("ssl-port"), None);
        assert_eq!(catalog.config.get("require-encryption"), Some("yes"));
        assert_eq!(
            catalog.port_wait.ensure,
            Ensure::Present(port_wait_body(5671))
        );
    }

    #[test]
    fn document_text_ends_with_newline() {
        assert_eq!(
            render_config(&Request::default()).to_string(),
            "log-enable=error+\nlog-to-syslog=yes\nauth=no\n"
        );
    }
}
