pub use config::{ContainerConfig, ContainerConfigBuilder, Properties, StartMode, StopMode};
pub use container::{Container, ContainerState, ManagedContainer};
pub use error::{
    CommandError, CommandFailed, ConfigError, ConnectivityError, ContainerError,
    ProcessExecutionError,
};
pub use factory::{ContainerFactory, Outcome};
pub use guard::{Shutdown, ShutdownGuard};
pub use platform::Platform;
pub use process::{CommandInvocation, CommandRunner, MatchFilter, ProcessExecutor, ProcessResult};

pub mod config;
pub mod container;
pub mod docker_cli;
pub mod error;
pub mod factory;
pub mod guard;
pub mod image;
pub mod platform;
pub mod process;
pub mod readiness;
pub mod setup;

pub fn postgresql<S: Into<String>>(version: S) -> ContainerConfigBuilder {
    ContainerConfig::builder(Platform::Postgres, version)
}
