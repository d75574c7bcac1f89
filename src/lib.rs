#![forbid(missing_docs, rustdoc::broken_intra_doc_links)]
//! Qpidconf renders the configuration of a [qpid](https://qpid.apache.org/) C++ broker
//! from a single TOML file: the `qpidd.conf` file itself, an optional ACL file and the
//! systemd drop-ins of the `qpidd` unit, along with the packages and service those
//! artifacts depend on.
//!
//! The flow is `config` → `render` → (optionally) `apply`:
//!
//! - [`config::Config`] is the raw TOML document, validated into a [`config::Request`],
//! - [`render::render`] is a pure function producing a [`render::Catalog`],
//! - [`apply::apply`] writes the file resources of the catalog under a root directory.

pub mod apply;
pub mod config;
pub mod error;
pub mod render;
pub mod resource;
