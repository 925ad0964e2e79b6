use std::path::Path;

use crate::{config::ContainerConfig, process::CommandInvocation};

/// Directory inside the container receiving copied schema and seed files.
pub const SCRIPT_DIR: &str = "/tmp/testdb";

/// Runtime commands the lifecycle issues, each with an explicit policy for a
/// non-zero exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `run -d`: create and start a fresh container.
    Run,
    /// `start`: restart an existing stopped container.
    StartExisting,
    /// `ps`: existence check.
    Inspect,
    Stop,
    Remove,
    /// `rm -f` before re-creating a container.
    ForceRemove,
}

impl CommandKind {
    /// Whether a non-zero exit leaves the lifecycle going.
    ///
    /// Teardown commands fail when the container is already stopped or
    /// absent, which is the state they aim for. A failing existence check
    /// means "absent".
    pub fn tolerates_failure(self) -> bool {
        match self {
            CommandKind::Run | CommandKind::StartExisting => false,
            CommandKind::Inspect
            | CommandKind::Stop
            | CommandKind::Remove
            | CommandKind::ForceRemove => true,
        }
    }
}

/// Builds runtime invocations addressing one named container.
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker: String,
    name: String,
}

impl DockerCli {
    pub fn new<S: Into<String>>(docker: S, name: S) -> Self {
        DockerCli {
            docker: docker.into(),
            name: name.into(),
        }
    }

    pub fn for_config(config: &ContainerConfig) -> Self {
        DockerCli::new(config.docker(), config.name())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn command(&self, subcommand: &str) -> CommandInvocation {
        CommandInvocation::new(self.docker.as_str()).arg(subcommand)
    }

    pub fn run(&self, config: &ContainerConfig) -> CommandInvocation {
        let mut command = self.command("run").args(["-d", "--name", self.name.as_str()]);
        let port = config.port();
        command = command
            .arg("-p")
            .arg(format!("{}:{}", port.host, port.container));
        if let Some(admin) = config.admin_port() {
            command = command
                .arg("-p")
                .arg(format!("{}:{}", admin.host, admin.container));
        }
        for (name, value) in config.environment() {
            command = command.arg("-e").arg(format!("{name}={value}"));
        }
        command
            .arg(config.image().to_string())
            .args(config.platform().run_args(config))
    }

    pub fn start(&self) -> CommandInvocation {
        self.command("start").arg(self.name.as_str())
    }

    /// Log output, only since the given unix time when set, so that a
    /// restarted container is not judged by its previous run.
    pub fn logs(&self, since: Option<u64>) -> CommandInvocation {
        let mut command = self.command("logs");
        if let Some(since) = since {
            command = command.arg("--since").arg(since.to_string());
        }
        command.arg(self.name.as_str())
    }

    /// Lists the container by exact name; `all` includes stopped ones.
    pub fn ps(&self, all: bool) -> CommandInvocation {
        let mut command = self.command("ps");
        if all {
            command = command.arg("-a");
        }
        command
            .arg("--filter")
            .arg(format!("name=^/?{}$", self.name))
            .args(["--format", "{{.Names}}"])
    }

    pub fn stop(&self) -> CommandInvocation {
        self.command("stop").arg(self.name.as_str())
    }

    pub fn remove(&self) -> CommandInvocation {
        self.command("rm").args(["-v", self.name.as_str()])
    }

    pub fn force_remove(&self) -> CommandInvocation {
        self.command("rm").args(["-f", "-v", self.name.as_str()])
    }

    pub fn exec<I, S>(&self, args: I) -> CommandInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command("exec").arg(self.name.as_str()).args(args)
    }

    /// Copies a host file into [`SCRIPT_DIR`], returning the command and the
    /// path of the copy inside the container.
    pub fn copy_script(&self, file: &Path) -> (CommandInvocation, String) {
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script.sql".into());
        let target = format!("{SCRIPT_DIR}/{file_name}");
        let command = self
            .command("cp")
            .arg(file.display().to_string())
            .arg(format!("{}:{target}", self.name));
        (command, target)
    }
}
