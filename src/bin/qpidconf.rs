#![forbid(missing_docs, rustdoc::broken_intra_doc_links)]
//! Qpidconf renders the configuration of a qpid broker from a single TOML file, and
//! writes it to the host: `qpidd.conf`, the ACL file and the systemd drop-ins of the
//! broker unit.
//!
//! Packages and the service are only reported, installing and restarting them is left to
//! the package manager and the init system.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Arg, ArgAction};

use tracing_subscriber::prelude::*;

use qpidconf::apply::{apply, ApplyOptions};
use qpidconf::config::{Config, Request};
use qpidconf::render::render;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_ops = clap::command!()
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .required(true)
                .action(ArgAction::Set)
                .value_name("config.toml")
                .help("Path to the configuration file."),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .action(ArgAction::Set)
                .value_name("dir")
                .default_value("/")
                .value_parser(clap::value_parser!(PathBuf))
                .help(
                    "Directory standing for the root of the managed host. \
                    Useful to stage the files before deploying them.",
                ),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Report what would change without writing anything.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("print")
                .long("print")
                .help("Print the rendered qpidd.conf on stdout and exit.")
                .conflicts_with("dry-run")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Deactivates colors in output.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Activates debug output.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let debug_mode = cli_ops.get_flag("debug");

    let tracing_filter = std::env::var("RUST_LOG").unwrap_or(if debug_mode {
        format!("info,{}=debug", env!("CARGO_CRATE_NAME"))
    } else {
        "info".to_owned()
    });

    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter)
        .with_ansi(!cli_ops.get_flag("no-color"))
        .with_writer(std::io::stderr)
        .finish()
        .with(tracing_error::ErrorLayer::default())
        .init();

    let config_path = cli_ops
        .get_one::<String>("config")
        .context("Missing configuration file argument")?;
    let config_file = tokio::fs::read_to_string(config_path)
        .await
        .with_context(|| format!("Reading configuration file {config_path}"))?;
    let config: Config = toml::from_str(&config_file)
        .with_context(|| format!("Parsing configuration file {config_path}"))?;
    let request = Request::try_from(config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;

    let catalog = render(&request);

    if cli_ops.get_flag("print") {
        print!("{}", catalog.config);
        return Ok(());
    }

    let options = ApplyOptions {
        root: cli_ops
            .get_one::<PathBuf>("root")
            .cloned()
            .unwrap_or_else(|| PathBuf::from("/")),
        dry_run: cli_ops.get_flag("dry-run"),
    };
    let report = apply(&catalog, &options).await?;
    print!("{report}");
    if options.dry_run && report.changed() {
        tracing::info!("Dry run, nothing was written.");
    }
    Ok(())
}
