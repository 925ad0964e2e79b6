use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::image::ImageError;

/// The external program could not be run at all.
#[derive(Debug, Error)]
pub enum ProcessExecutionError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("failed to read output of `{command}`: {source}")]
    Read { command: String, source: io::Error },

    #[error("failed to wait for `{command}`: {source}")]
    Wait { command: String, source: io::Error },

    #[error("output pipe of `{command}` was not captured")]
    MissingPipe { command: String },
}

/// The external program ran but exited with a non-zero status.
#[derive(Debug, Clone, Error)]
#[error("`{command}` exited with status {exit_status}")]
pub struct CommandFailed {
    pub command: String,
    pub exit_status: i32,
    pub lines: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Execution(#[from] ProcessExecutionError),

    #[error(transparent)]
    Failed(#[from] CommandFailed),
}

/// Raised by the database collaborator or when opening a connection.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("container {name} is not ready, cannot connect")]
    NotReady { name: String },

    #[error("cannot resolve {address}")]
    Unresolvable { address: String },

    #[error("connection to {address} refused: {source}")]
    Refused { address: SocketAddr, source: io::Error },

    #[error("database setup step `{step}` failed on {name}: {source}")]
    Setup {
        name: String,
        step: &'static str,
        source: CommandError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown platform {0:?}")]
    UnknownPlatform(String),

    #[error("container name {0:?} is configured more than once")]
    DuplicateContainerName(String),

    #[error("invalid image reference: {0}")]
    Image(#[from] ImageError),

    #[error("cannot read properties file {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("malformed properties: {0}")]
    Properties(#[from] java_properties::PropertiesError),
}

/// Hard failures surfaced by container lifecycle operations. Ordinary
/// readiness timeouts are not errors, `start` reports them as `false`.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Execution(#[from] ProcessExecutionError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
}
