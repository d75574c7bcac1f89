//! Validation errors raised while turning a [`Config`](crate::config::Config) into a
//! [`Request`](crate::config::Request).

use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration was rejected. Nothing is rendered when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// One field of a pair was given without its companion.
    #[error("`{given}` is set but `{missing}` is not, both must be given together")]
    MissingCompanion {
        /// The field that was set.
        given: &'static str,
        /// The field that is missing.
        missing: &'static str,
    },

    /// A numeric tunable is outside of what the broker accepts.
    #[error("`{field}` = {value} is out of range, expected {expected}")]
    OutOfRange {
        /// Name of the parameter.
        field: &'static str,
        /// The rejected value, as written.
        value: String,
        /// Human readable description of the accepted values.
        expected: &'static str,
    },

    /// A value would break the line-oriented file format.
    #[error("`{field}` must fit on a single line")]
    Multiline {
        /// Name of the parameter, or of the custom setting.
        field: String,
    },

    /// A custom setting key cannot be written as a `key=value` line.
    #[error("invalid custom setting key {key:?}: {reason}")]
    InvalidSettingKey {
        /// The key as written in the configuration.
        key: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A custom setting would emit a key already emitted by another line.
    #[error("custom setting {key:?} collides with `{conflicts_with}`")]
    CollidingSetting {
        /// The key as written in the configuration.
        key: String,
        /// The parameter (or other custom setting) producing the same line key.
        conflicts_with: String,
    },

    /// A path is relative, so the broker and the file writer would not resolve it alike.
    #[error("`{field}` = {path:?} must be an absolute path")]
    RelativePath {
        /// Name of the parameter.
        field: &'static str,
        /// The rejected path.
        path: PathBuf,
    },

    /// Two file resources would be written to the same place.
    #[error("`{field}` = {path:?} collides with {conflicts_with}")]
    PathCollision {
        /// Name of the parameter.
        field: &'static str,
        /// The rejected path.
        path: PathBuf,
        /// What else is written there.
        conflicts_with: &'static str,
    },

    /// The service name cannot be used as a systemd unit name.
    #[error("invalid service name {name:?}: {reason}")]
    InvalidServiceName {
        /// The name as written in the configuration.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}
