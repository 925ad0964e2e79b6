use std::{
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
};

use log::{debug, info, warn};

use crate::{
    config::ContainerConfig,
    docker_cli::{DockerCli, SCRIPT_DIR},
    error::{CommandError, ConnectivityError},
    platform::Platform,
    process::{CommandInvocation, CommandRunner},
};

/// Called by the lifecycle after a `Create` or `DropCreate` start reached
/// the ready state, `create` first, then `seed`.
pub trait DatabaseSetup {
    /// Creates the database objects: extensions, databases, schema files.
    fn create(&self, config: &ContainerConfig) -> Result<(), ConnectivityError>;

    /// Loads seed data.
    fn seed(&self, config: &ContainerConfig) -> Result<(), ConnectivityError>;
}

/// Leaves the database as the image created it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSetup;

impl DatabaseSetup for NoSetup {
    fn create(&self, _config: &ContainerConfig) -> Result<(), ConnectivityError> {
        Ok(())
    }

    fn seed(&self, _config: &ContainerConfig) -> Result<(), ConnectivityError> {
        Ok(())
    }
}

/// Prepares the database through `docker exec` and the platform client.
pub struct ExecSetup<R> {
    runner: R,
}

impl<R: CommandRunner> ExecSetup<R> {
    pub fn new(runner: R) -> Self {
        ExecSetup { runner }
    }

    fn exec(
        &self,
        config: &ContainerConfig,
        step: &'static str,
        command: &CommandInvocation,
    ) -> Result<(), ConnectivityError> {
        self.runner
            .run(command)
            .map(|result| {
                for line in result.lines() {
                    debug!("🐋 [{}] {line}", config.name());
                }
            })
            .map_err(|source: CommandError| ConnectivityError::Setup {
                name: config.name().into(),
                step,
                source,
            })
    }

    fn run_scripts(
        &self,
        config: &ContainerConfig,
        step: &'static str,
        files: &[PathBuf],
    ) -> Result<(), ConnectivityError> {
        if files.is_empty() {
            return Ok(());
        }
        if script_args(config, "").is_none() {
            warn!(
                "🐋 No SQL client for {}, skipping {} {step} file(s)",
                config.platform(),
                files.len()
            );
            return Ok(());
        }
        let docker = DockerCli::for_config(config);
        self.exec(config, step, &docker.exec(["mkdir", "-p", SCRIPT_DIR]))?;
        for file in files {
            info!("🐋 Loading {} into {}", file.display(), config.name());
            let (copy, target) = docker.copy_script(file);
            self.exec(config, step, &copy)?;
            if let Some(args) = script_args(config, &target) {
                self.exec(config, step, &docker.exec(args))?;
            }
        }
        Ok(())
    }
}

impl<R: CommandRunner> DatabaseSetup for ExecSetup<R> {
    fn create(&self, config: &ContainerConfig) -> Result<(), ConnectivityError> {
        let docker = DockerCli::for_config(config);
        for statement in create_statements(config) {
            if let Some(args) = statement_args(config, &statement) {
                self.exec(config, "create", &docker.exec(args))?;
            }
        }
        self.run_scripts(config, "schema", config.schema_files())
    }

    fn seed(&self, config: &ContainerConfig) -> Result<(), ConnectivityError> {
        self.run_scripts(config, "seed", config.seed_files())
    }
}

fn create_statements(config: &ContainerConfig) -> Vec<String> {
    let database = &config.credentials().database;
    match config.platform() {
        Platform::Postgres => config
            .extensions()
            .iter()
            .map(|extension| format!("CREATE EXTENSION IF NOT EXISTS \"{extension}\""))
            .collect(),
        Platform::SqlServer => vec![format!(
            "IF DB_ID('{database}') IS NULL CREATE DATABASE [{database}]"
        )],
        platform => {
            if !config.extensions().is_empty() {
                warn!("🐋 Extensions are not supported on {platform}, ignoring them");
            }
            vec![]
        }
    }
}

const SQLCMD: &str = "/opt/mssql-tools18/bin/sqlcmd";

fn statement_args(config: &ContainerConfig, sql: &str) -> Option<Vec<String>> {
    let credentials = config.credentials();
    let (user, password, database) = (
        credentials.user.as_str(),
        credentials.password.as_str(),
        credentials.database.as_str(),
    );
    let args: Vec<&str> = match config.platform() {
        Platform::Postgres => vec![
            "psql", "-U", user, "-d", database, "-v", "ON_ERROR_STOP=1", "-c", sql,
        ],
        Platform::SqlServer => vec![
            SQLCMD, "-C", "-b", "-S", "localhost", "-U", user, "-P", password, "-Q", sql,
        ],
        _ => return None,
    };
    Some(args.into_iter().map(Into::into).collect())
}

fn script_args(config: &ContainerConfig, path: &str) -> Option<Vec<String>> {
    let credentials = config.credentials();
    let (user, password, database) = (
        credentials.user.as_str(),
        credentials.password.as_str(),
        credentials.database.as_str(),
    );
    let args: Vec<String> = match config.platform() {
        Platform::Postgres => ["psql", "-U", user, "-d", database, "-v", "ON_ERROR_STOP=1", "-f", path]
            .map(String::from)
            .to_vec(),
        Platform::MySql => vec![
            "mysql".into(),
            format!("-u{user}"),
            format!("-p{password}"),
            database.into(),
            "-e".into(),
            format!("source {path}"),
        ],
        Platform::SqlServer => [
            SQLCMD, "-C", "-b", "-S", "localhost", "-U", user, "-P", password, "-d", database,
            "-i", path,
        ]
        .map(String::from)
        .to_vec(),
        Platform::Oracle => vec![
            "sh".into(),
            "-c".into(),
            format!("echo exit | sqlplus -s {user}/{password}@//localhost/{database} @{path}"),
        ],
        Platform::Hana | Platform::Elastic => return None,
    };
    Some(args)
}

/// Opens a TCP connection to the container's published port.
pub fn connect(config: &ContainerConfig) -> Result<TcpStream, ConnectivityError> {
    let address = format!("{}:{}", config.host(), config.port().host);
    let candidates = address
        .to_socket_addrs()
        .map_err(|_| ConnectivityError::Unresolvable {
            address: address.clone(),
        })?;
    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect(candidate) {
            Ok(stream) => {
                debug!("🐋 Connected to {} at {candidate}", config.name());
                return Ok(stream);
            }
            Err(source) => last_error = Some((candidate, source)),
        }
    }
    match last_error {
        Some((address, source)) => Err(ConnectivityError::Refused { address, source }),
        None => Err(ConnectivityError::Unresolvable { address }),
    }
}
