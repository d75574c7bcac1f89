//! The TOML configuration file, and its validation into a [`Request`].
//!
//! Parameter names follow the ones of the qpid configuration module they mirror
//! (`session_unacked` for `session-max-unacked`, ...). Every parameter is optional.

use std::{
    fmt,
    num::NonZeroU64,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::ValidationError;
use crate::render::RESERVED_KEYS;
use crate::resource::{dropin_dir, ServiceEnsure};

/// Where the broker reads its configuration from.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/qpid/qpidd.conf";
/// Package providing the broker.
pub const DEFAULT_SERVER_PACKAGE: &str = "qpid-cpp-server";
/// Package providing the linear message store.
pub const DEFAULT_STORE_PACKAGE: &str = "qpid-cpp-server-linearstore";
/// Name of the broker daemon.
pub const DEFAULT_SERVICE_NAME: &str = "qpidd";
/// Log filter of the broker.
pub const DEFAULT_LOG_LEVEL: &str = "error+";
/// Port the broker listens on for SSL connections unless told otherwise.
pub const DEFAULT_SSL_PORT: u16 = 5671;

/// Page sizes (in KiB) accepted by the linear store write cache.
const WCACHE_PAGE_SIZES: [i64; 6] = [4, 8, 16, 32, 64, 128];

/// The configuration file, as written by the user.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Install the persistent message store. Defaults to `true`.
    pub server_store: Option<bool>,
    /// Packages providing the broker.
    pub server_packages: Option<Vec<String>>,
    /// Package providing the message store.
    pub store_package: Option<String>,
    /// Path of the rendered broker configuration.
    pub config_file: Option<PathBuf>,
    /// Network interface the broker listens on.
    pub interface: Option<String>,
    /// `LimitNOFILE` of the broker unit.
    pub open_file_limit: Option<RawFileLimit>,
    /// Path of the ACL file. Requires `acl_content`.
    pub acl_file: Option<PathBuf>,
    /// Content of the ACL file. Requires `acl_file`.
    pub acl_content: Option<String>,
    /// `log-enable` filter.
    pub log_level: Option<String>,
    /// Send broker logs to syslog. Defaults to `true`.
    pub log_to_syslog: Option<bool>,
    /// Require SASL authentication. Defaults to `false`.
    pub auth: Option<bool>,
    /// Enable SSL. The other `ssl_*` parameters are ignored unless this is `true`.
    pub ssl: Option<bool>,
    /// Port of the SSL listener.
    pub ssl_port: Option<i64>,
    /// NSS certificate database directory.
    pub ssl_cert_db: Option<PathBuf>,
    /// File holding the password of the certificate database.
    pub ssl_cert_password_file: Option<PathBuf>,
    /// Nickname of the broker certificate in the database.
    pub ssl_cert_name: Option<String>,
    /// Require clients to present a certificate.
    pub ssl_require_client_auth: Option<bool>,
    /// `session-max-unacked`.
    pub session_unacked: Option<i64>,
    /// `mgmt-pub-interval`, in seconds.
    pub mgmt_pub_interval: Option<i64>,
    /// `wcache-page-size`, in KiB.
    pub wcache_page_size: Option<i64>,
    /// `default-queue-limit`, in bytes.
    pub default_queue_limit: Option<i64>,
    /// `max-connections`.
    pub max_connections: Option<i64>,
    /// Extra `key=value` lines, emitted in the order they are written.
    pub custom_settings: IndexMap<String, SettingValue>,
    /// Name of the broker daemon.
    pub service_name: Option<String>,
    /// Whether the broker should be running.
    pub service_ensure: Option<ServiceEnsure>,
    /// Whether the broker starts at boot. Defaults to `true`.
    pub service_enable: Option<bool>,
}

/// `open_file_limit` as it can be written: a number, or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawFileLimit {
    /// `open_file_limit = 100`
    Count(i64),
    /// `open_file_limit = "infinity"`, an empty string meaning unset.
    Text(String),
}

/// A validated `LimitNOFILE` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFileLimit {
    /// A fixed number of descriptors.
    Count(NonZeroU64),
    /// No limit.
    Infinity,
}

impl fmt::Display for OpenFileLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenFileLimit::Count(n) => write!(f, "{n}"),
            OpenFileLimit::Infinity => f.write_str("infinity"),
        }
    }
}

/// Value of a custom setting.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// `true` or `false`.
    Bool(bool),
    /// An integer.
    Integer(i64),
    /// A float.
    Float(f64),
    /// Anything else, written verbatim.
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Integer(i) => write!(f, "{i}"),
            // Debug keeps the fractional part of round floats: 1.0, not 1.
            SettingValue::Float(x) => write!(f, "{x:?}"),
            SettingValue::Text(s) => f.write_str(s),
        }
    }
}

/// The ACL file and its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    /// Where the ACL file is written, and what `acl-file` points to.
    pub path: PathBuf,
    /// Content of the file, written verbatim.
    pub content: String,
}

/// SSL settings, only present when SSL is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ssl {
    /// Explicit SSL port.
    pub port: Option<u16>,
    /// NSS certificate database directory.
    pub cert_db: Option<PathBuf>,
    /// File holding the password of the certificate database.
    pub cert_password_file: Option<PathBuf>,
    /// Nickname of the broker certificate.
    pub cert_name: Option<String>,
    /// Require clients to present a certificate.
    pub require_client_auth: bool,
}

impl Ssl {
    /// The port the broker ends up listening on: the explicit one, else the broker's default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSL_PORT)
    }
}

/// How the broker daemon is managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Name of the daemon.
    pub name: String,
    /// Whether it should be running.
    pub ensure: ServiceEnsure,
    /// Whether it starts at boot.
    pub enable: bool,
}

/// A validated configuration, ready to be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Install the persistent message store.
    pub server_store: bool,
    /// Packages providing the broker.
    pub server_packages: Vec<String>,
    /// Package providing the message store.
    pub store_package: String,
    /// Path of the rendered broker configuration.
    pub config_file: PathBuf,
    /// Network interface the broker listens on.
    pub interface: Option<String>,
    /// `LimitNOFILE` of the broker unit.
    pub open_file_limit: Option<OpenFileLimit>,
    /// ACL file.
    pub acl: Option<Acl>,
    /// `log-enable` filter.
    pub log_level: String,
    /// Send broker logs to syslog.
    pub log_to_syslog: bool,
    /// Require SASL authentication.
    pub auth: bool,
    /// SSL settings, `None` when SSL is disabled.
    pub ssl: Option<Ssl>,
    /// `session-max-unacked`.
    pub session_unacked: Option<u32>,
    /// `mgmt-pub-interval`.
    pub mgmt_pub_interval: Option<u32>,
    /// `wcache-page-size`.
    pub wcache_page_size: Option<u32>,
    /// `default-queue-limit`.
    pub default_queue_limit: Option<u64>,
    /// `max-connections`.
    pub max_connections: Option<u32>,
    /// Extra lines, keys already hyphenated, in emission order.
    pub custom_settings: Vec<(String, SettingValue)>,
    /// The broker daemon.
    pub service: ServiceSettings,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            server_store: true,
            server_packages: vec![DEFAULT_SERVER_PACKAGE.to_owned()],
            store_package: DEFAULT_STORE_PACKAGE.to_owned(),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            interface: None,
            open_file_limit: None,
            acl: None,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
            log_to_syslog: true,
            auth: false,
            ssl: None,
            session_unacked: None,
            mgmt_pub_interval: None,
            wcache_page_size: None,
            default_queue_limit: None,
            max_connections: None,
            custom_settings: Vec::new(),
            service: ServiceSettings {
                name: DEFAULT_SERVICE_NAME.to_owned(),
                ensure: ServiceEnsure::Running,
                enable: true,
            },
        }
    }
}

impl TryFrom<Config> for Request {
    type Error = ValidationError;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        let defaults = Request::default();

        let acl = match (config.acl_file, config.acl_content) {
            (None, None) => None,
            (Some(_), None) => {
                return Err(ValidationError::MissingCompanion {
                    given: "acl_file",
                    missing: "acl_content",
                })
            }
            (None, Some(_)) => {
                return Err(ValidationError::MissingCompanion {
                    given: "acl_content",
                    missing: "acl_file",
                })
            }
            (Some(path), Some(content)) => {
                file_path("acl_file", &path)?;
                Some(Acl { path, content })
            }
        };

        let ssl = if config.ssl.unwrap_or(false) {
            let port = config
                .ssl_port
                .map(|p| {
                    u16::try_from(p)
                        .ok()
                        .filter(|p| *p != 0)
                        .ok_or_else(|| out_of_range("ssl_port", p, "a port between 1 and 65535"))
                })
                .transpose()?;
            for (field, path) in [
                ("ssl_cert_db", &config.ssl_cert_db),
                ("ssl_cert_password_file", &config.ssl_cert_password_file),
            ] {
                if let Some(path) = path {
                    file_path(field, path)?;
                }
            }
            if let Some(name) = &config.ssl_cert_name {
                single_line("ssl_cert_name", name)?;
            }
            Some(Ssl {
                port,
                cert_db: config.ssl_cert_db,
                cert_password_file: config.ssl_cert_password_file,
                cert_name: config.ssl_cert_name,
                require_client_auth: config.ssl_require_client_auth.unwrap_or(false),
            })
        } else {
            let ignored: Vec<&str> = [
                ("ssl_port", config.ssl_port.is_some()),
                ("ssl_cert_db", config.ssl_cert_db.is_some()),
                ("ssl_cert_password_file", config.ssl_cert_password_file.is_some()),
                ("ssl_cert_name", config.ssl_cert_name.is_some()),
                ("ssl_require_client_auth", config.ssl_require_client_auth.is_some()),
            ]
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect();
            if !ignored.is_empty() {
                tracing::warn!(
                    "SSL is disabled, ignoring {}. Set `ssl = true` to use them.",
                    ignored.join(", ")
                );
            }
            None
        };

        if let Some(interface) = &config.interface {
            single_line("interface", interface)?;
        }
        let log_level = config.log_level.unwrap_or(defaults.log_level);
        single_line("log_level", &log_level)?;

        let wcache_page_size = config
            .wcache_page_size
            .map(|size| {
                if WCACHE_PAGE_SIZES.contains(&size) {
                    Ok(size as u32)
                } else {
                    Err(out_of_range(
                        "wcache_page_size",
                        size,
                        "one of 4, 8, 16, 32, 64, 128",
                    ))
                }
            })
            .transpose()?;
        let service_name = config.service_name.unwrap_or(defaults.service.name);
        service_name_check(&service_name)?;
        let config_file = config.config_file.unwrap_or(defaults.config_file);
        file_path("config_file", &config_file)?;
        let dropins = dropin_dir(&format!("{service_name}.service"));
        if config_file.starts_with(&dropins) {
            return Err(ValidationError::PathCollision {
                field: "config_file",
                path: config_file,
                conflicts_with: "the drop-ins of the broker unit",
            });
        }
        if let Some(acl) = &acl {
            if acl.path == config_file {
                return Err(ValidationError::PathCollision {
                    field: "acl_file",
                    path: acl.path.clone(),
                    conflicts_with: "config_file",
                });
            }
            if acl.path.starts_with(&dropins) {
                return Err(ValidationError::PathCollision {
                    field: "acl_file",
                    path: acl.path.clone(),
                    conflicts_with: "the drop-ins of the broker unit",
                });
            }
        }

        let default_queue_limit = config
            .default_queue_limit
            .map(|limit| {
                u64::try_from(limit)
                    .map_err(|_| out_of_range("default_queue_limit", limit, "a non-negative number"))
            })
            .transpose()?;

        Ok(Request {
            server_store: config.server_store.unwrap_or(defaults.server_store),
            server_packages: config.server_packages.unwrap_or(defaults.server_packages),
            store_package: config.store_package.unwrap_or(defaults.store_package),
            config_file,
            interface: config.interface,
            open_file_limit: config.open_file_limit.map(open_file_limit).transpose()?.flatten(),
            acl,
            log_level,
            log_to_syslog: config.log_to_syslog.unwrap_or(defaults.log_to_syslog),
            auth: config.auth.unwrap_or(defaults.auth),
            ssl,
            session_unacked: positive("session_unacked", config.session_unacked)?,
            mgmt_pub_interval: positive("mgmt_pub_interval", config.mgmt_pub_interval)?,
            wcache_page_size,
            default_queue_limit,
            max_connections: positive("max_connections", config.max_connections)?,
            custom_settings: custom_settings(config.custom_settings)?,
            service: ServiceSettings {
                name: service_name,
                ensure: config.service_ensure.unwrap_or(defaults.service.ensure),
                enable: config.service_enable.unwrap_or(defaults.service.enable),
            },
        })
    }
}

fn out_of_range(field: &'static str, value: impl fmt::Display, expected: &'static str) -> ValidationError {
    ValidationError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

fn single_line(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.contains(['\n', '\r']) {
        return Err(ValidationError::Multiline {
            field: field.to_owned(),
        });
    }
    Ok(())
}

/// Paths end up both in `qpidd.conf` and on disk, relative ones would not point to the
/// same file.
fn file_path(field: &'static str, path: &Path) -> Result<(), ValidationError> {
    single_line(field, &path.display().to_string())?;
    if !path.is_absolute() {
        return Err(ValidationError::RelativePath {
            field,
            path: path.to_owned(),
        });
    }
    Ok(())
}

fn service_name_check(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidServiceName {
        name: name.to_owned(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if name.contains('/') {
        return Err(invalid("contains '/'"));
    }
    if name.contains("..") {
        return Err(invalid("contains '..'"));
    }
    if name.contains(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }
    Ok(())
}

fn positive(field: &'static str, value: Option<i64>) -> Result<Option<u32>, ValidationError> {
    value
        .map(|v| {
            u32::try_from(v)
                .ok()
                .filter(|v| *v >= 1)
                .ok_or_else(|| out_of_range(field, v, "a number between 1 and 4294967295"))
        })
        .transpose()
}

fn open_file_limit(raw: RawFileLimit) -> Result<Option<OpenFileLimit>, ValidationError> {
    const EXPECTED: &str = "a positive number or \"infinity\"";
    let count = match raw {
        RawFileLimit::Count(n) => n,
        RawFileLimit::Text(s) => match s.trim() {
            "" => return Ok(None),
            "infinity" => return Ok(Some(OpenFileLimit::Infinity)),
            t => t
                .parse::<i64>()
                .map_err(|_| out_of_range("open_file_limit", format!("{s:?}"), EXPECTED))?,
        },
    };
    u64::try_from(count)
        .ok()
        .and_then(NonZeroU64::new)
        .map(|n| Some(OpenFileLimit::Count(n)))
        .ok_or_else(|| out_of_range("open_file_limit", count, EXPECTED))
}

/// Hyphenates the keys of the custom settings and checks they can be emitted as is.
fn custom_settings(
    settings: IndexMap<String, SettingValue>,
) -> Result<Vec<(String, SettingValue)>, ValidationError> {
    let mut seen: IndexMap<String, String> = IndexMap::new();
    let mut res = Vec::with_capacity(settings.len());
    for (key, value) in settings {
        let invalid = |reason| ValidationError::InvalidSettingKey {
            key: key.clone(),
            reason,
        };
        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        if key.contains('=') {
            return Err(invalid("contains '='"));
        }
        if key.contains('#') {
            return Err(invalid("contains '#'"));
        }
        if key.contains(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }
        if let SettingValue::Text(text) = &value {
            single_line(&key, text)?;
        }
        let line_key = key.replace('_', "-");
        if RESERVED_KEYS.contains(&line_key.as_str()) {
            return Err(ValidationError::CollidingSetting {
                key,
                conflicts_with: line_key,
            });
        }
        if let Some(previous) = seen.get(&line_key) {
            return Err(ValidationError::CollidingSetting {
                key,
                conflicts_with: previous.clone(),
            });
        }
        seen.insert(line_key.clone(), key);
        res.push((line_key, value));
    }
    Ok(res)
}
