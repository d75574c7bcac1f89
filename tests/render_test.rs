use pretty_assertions::assert_eq;

use qpidconf::config::{Config, Request};
use qpidconf::render::{render, Catalog};
use qpidconf::resource::{Ensure, ResourceRef};

const BASE: [&str; 3] = ["log-enable=error+", "log-to-syslog=yes", "auth=no"];

fn catalog(toml: &str) -> Catalog {
    let config: Config = toml::from_str(toml).unwrap();
    render(&Request::try_from(config).unwrap())
}

fn base_with(extra: &[&str]) -> Vec<String> {
    BASE.iter().chain(extra).map(|s| s.to_string()).collect()
}

#[test]
fn without_parameters() {
    let catalog = catalog("");
    assert_eq!(catalog.config.to_lines(), base_with(&[]));
    assert_eq!(
        catalog.config_file.path,
        std::path::Path::new("/etc/qpid/qpidd.conf")
    );
    assert!(catalog.acl_file.is_none());

    let packages: Vec<_> = catalog.packages().map(|p| p.name.as_str()).collect();
    assert_eq!(packages, ["qpid-cpp-server", "qpid-cpp-server-linearstore"]);

    let service = ResourceRef::service("qpidd");
    assert_eq!(catalog.service_limits.unit, "qpidd.service");
    assert_eq!(catalog.service_limits.ensure, Ensure::Absent);
    assert_eq!(catalog.service_limits.notify, [service.clone()]);
    assert_eq!(catalog.port_wait.filename, "wait-for-port.conf");
    assert_eq!(catalog.port_wait.ensure, Ensure::Absent);
    assert_eq!(catalog.port_wait.notify, [service]);
}

#[test]
fn with_service_limits() {
    let catalog = catalog("open_file_limit = 100");
    assert_eq!(
        catalog.service_limits.ensure,
        Ensure::Present(vec![("LimitNOFILE".to_owned(), "100".to_owned())])
    );
    assert_eq!(catalog.service_limits.notify, [ResourceRef::service("qpidd")]);
    // Rendering is deterministic.
    assert_eq!(catalog, self::catalog("open_file_limit = 100"));
}

#[test]
fn message_store_disabled() {
    let catalog = catalog("server_store = false");
    assert!(catalog.store_package.is_none());
    assert!(catalog
        .packages()
        .all(|p| p.name != "qpid-cpp-server-linearstore"));
}

#[test]
fn with_interface() {
    assert_eq!(
        catalog(r#"interface = "lo""#).config.to_lines(),
        base_with(&["interface=lo"])
    );
}

#[test]
fn with_acl_file() {
    let catalog = catalog(
        r#"
        acl_file = "/etc/qpid/qpid.acl"
        acl_content = "allow all all"
        "#,
    );
    assert_eq!(
        catalog.config.to_lines(),
        [
            "acl-file=/etc/qpid/qpid.acl",
            "log-enable=error+",
            "log-to-syslog=yes",
            "auth=no",
        ]
    );
    let acl = catalog.acl_file.unwrap();
    assert_eq!(acl.path, std::path::Path::new("/etc/qpid/qpid.acl"));
    assert_eq!(acl.ensure, Ensure::Present("allow all all".to_owned()));
    assert_eq!(acl.mode, 0o640);
}

#[test]
fn with_ssl_options() {
    let catalog = catalog(
        r#"
        ssl = true
        ssl_port = 5671
        ssl_cert_db = "/etc/pki/katello/nssdb"
        ssl_cert_password_file = "/etc/pki/katello/nssdb/nss_db_password-file"
        ssl_cert_name = "broker"
        ssl_require_client_auth = true
        "#,
    );
    assert_eq!(
        catalog.config.to_lines(),
        base_with(&[
            "require-encryption=yes",
            "ssl-require-client-authentication=yes",
            "ssl-port=5671",
            "ssl-cert-db=/etc/pki/katello/nssdb",
            "ssl-cert-password-file=/etc/pki/katello/nssdb/nss_db_password-file",
            "ssl-cert-name=broker",
        ])
    );

    let dropin = &catalog.port_wait;
    assert_eq!(
        dropin.path(),
        std::path::Path::new("/etc/systemd/system/qpidd.service.d/wait-for-port.conf")
    );
    assert_eq!(dropin.notify, [ResourceRef::service("qpidd")]);
    assert_eq!(dropin.require, [ResourceRef::package("nmap-ncat")]);
    let body = dropin.ensure.as_present().unwrap();
    assert_eq!(
        body.lines().collect::<Vec<_>>(),
        [
            "[Service]",
            "ExecStartPost=/bin/bash -c 'while ! nc -z 127.0.0.1 5671; do sleep 1; done'",
        ]
    );
    assert_eq!(
        catalog.probe_package.map(|p| p.name),
        Some("nmap-ncat".to_owned())
    );
}

#[test]
fn ssl_without_client_auth() {
    let catalog = catalog("ssl = true\nssl_port = 5672");
    assert_eq!(
        catalog.config.to_lines(),
        base_with(&["require-encryption=yes", "ssl-port=5672"])
    );
    assert!(catalog.port_wait.ensure.as_present().unwrap().contains("127.0.0.1 5672;"));
}

#[test]
fn with_session_max_unacked() {
    assert_eq!(
        catalog("session_unacked = 10").config.to_lines(),
        base_with(&["session-max-unacked=10"])
    );
}

#[test]
fn with_mgmt_pub_interval() {
    assert_eq!(
        catalog("mgmt_pub_interval = 4").config.to_lines(),
        base_with(&["mgmt-pub-interval=4"])
    );
}

#[test]
fn with_wcache_page_size() {
    assert_eq!(
        catalog("wcache_page_size = 4").config.to_lines(),
        base_with(&["wcache-page-size=4"])
    );
}

#[test]
fn with_default_queue_limit() {
    assert_eq!(
        catalog("default_queue_limit = 10000").config.to_lines(),
        base_with(&["default-queue-limit=10000"])
    );
}

#[test]
fn with_max_connections() {
    assert_eq!(
        catalog("max_connections = 2000").config.to_lines(),
        base_with(&["max-connections=2000"])
    );
}

#[test]
fn with_custom_settings() {
    let catalog = catalog(
        r#"
        [custom_settings]
        efp-file-size = 512
        log-to-file = "/tmp/qpidd.log"
        "#,
    );
    assert_eq!(
        catalog.config.to_lines(),
        base_with(&["efp-file-size=512", "log-to-file=/tmp/qpidd.log"])
    );
}

#[test]
fn custom_settings_come_after_everything_else() {
    let catalog = catalog(
        r#"
        interface = "lo"
        max_connections = 2000
        ssl = true
        acl_file = "/etc/qpid/qpid.acl"
        acl_content = "allow all all"

        [custom_settings]
        log_to_file = "/tmp/qpidd.log"
        link_maintenance_interval = 2.5
        "#,
    );
    assert_eq!(
        catalog.config.to_lines(),
        [
            "acl-file=/etc/qpid/qpid.acl",
            "log-enable=error+",
            "log-to-syslog=yes",
            "auth=no",
            "interface=lo",
            "max-connections=2000",
            "require-encryption=yes",
            "log-to-file=/tmp/qpidd.log",
            "link-maintenance-interval=2.5",
        ]
    );
}

#[test]
fn service_follows_service_name() {
    let catalog = catalog(r#"service_name = "qpidd-secondary""#);
    assert_eq!(catalog.service.unit(), "qpidd-secondary.service");
    assert_eq!(catalog.service_limits.unit, "qpidd-secondary.service");
    assert_eq!(
        catalog.port_wait.notify,
        [ResourceRef::service("qpidd-secondary")]
    );
}

#[test]
fn example_configuration_renders() {
    let catalog = catalog(include_str!("../config_example.toml"));
    assert_eq!(catalog.config.get("acl-file"), Some("/etc/qpid/qpid.acl"));
    assert_eq!(catalog.config.get("log-to-file"), Some("/tmp/qpidd.log"));
    assert_eq!(
        catalog.service_limits.limit("LimitNOFILE"),
        Some("65536")
    );
    assert!(catalog.port_wait.ensure.is_present());
}
