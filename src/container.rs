use std::{
    net::TcpStream,
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, error, info, warn};

use crate::{
    config::{ContainerConfig, StartMode, StopMode},
    docker_cli::{CommandKind, DockerCli},
    error::{CommandError, ConnectivityError, ContainerError, ProcessExecutionError},
    guard::{Shutdown, ShutdownGuard},
    platform::Platform,
    process::{CommandInvocation, CommandRunner, ProcessExecutor, ProcessResult},
    readiness::ReadinessPoller,
    setup::{self, DatabaseSetup, ExecSetup},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Removed,
    Failed,
}

/// Lifecycle operations the factory fans out over.
pub trait ManagedContainer {
    fn platform(&self) -> Platform;

    fn name(&self) -> &str;

    /// Human readable summary handed to start listeners.
    fn description(&self) -> String;

    fn state(&self) -> ContainerState;

    /// Brings the container to the ready state. `Ok(false)` reports an
    /// ordinary failure such as a readiness timeout.
    fn start(&mut self, mode: StartMode) -> Result<bool, ContainerError>;

    fn stop(&mut self, mode: StopMode) -> Result<(), ContainerError>;

    /// Stops without removing, whatever the configured stop mode.
    fn stop_only(&mut self) -> Result<(), ContainerError> {
        self.stop(StopMode::Stop)
    }
}

/// One configured database container, addressed by name through the runtime
/// CLI. Only this value issues commands against that name.
pub struct Container<R = ProcessExecutor> {
    config: ContainerConfig,
    docker: DockerCli,
    runner: R,
    setup: Box<dyn DatabaseSetup>,
    state: ContainerState,
}

impl Container<ProcessExecutor> {
    pub fn new(config: ContainerConfig) -> Self {
        Container::with_runner(config, ProcessExecutor)
    }
}

impl<R: CommandRunner + Clone + 'static> Container<R> {
    /// Uses `runner` for the lifecycle commands and for [`ExecSetup`].
    pub fn with_runner(config: ContainerConfig, runner: R) -> Self {
        let setup = ExecSetup::new(runner.clone());
        Container {
            docker: DockerCli::for_config(&config),
            config,
            runner,
            setup: Box::new(setup),
            state: ContainerState::Absent,
        }
    }
}

impl<R: CommandRunner> Container<R> {
    pub fn with_setup<S: DatabaseSetup + 'static>(mut self, setup: S) -> Self {
        self.setup = Box::new(setup);
        self
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Hands the container to a guard stopping it with the configured
    /// shutdown mode when the guard goes out of scope.
    pub fn into_guard(self) -> ShutdownGuard<Self> {
        ShutdownGuard::new(self)
    }

    pub fn start(&mut self, mode: StartMode) -> Result<bool, ContainerError> {
        info!(
            "🐋 Starting {} ({}) in {mode:?} mode",
            self.config.name(),
            self.config.image()
        );
        let result = match mode {
            StartMode::Create => self.create(true),
            StartMode::DropCreate => {
                self.issue(CommandKind::ForceRemove, &self.docker.force_remove())?;
                self.create(false)
            }
            StartMode::ContainerOnly => self.reuse(false),
            StartMode::FastStart => self.reuse(true),
        };
        if result.is_err() && self.state == ContainerState::Starting {
            self.state = ContainerState::Failed;
        }
        result
    }

    pub fn stop(&mut self, mode: StopMode) -> Result<(), ContainerError> {
        match mode {
            StopMode::None => {
                debug!("🐋 Leaving {} as it is", self.config.name());
            }
            StopMode::Stop => {
                self.state = ContainerState::Stopping;
                self.issue(CommandKind::Stop, &self.docker.stop())?;
                self.state = ContainerState::Stopped;
                info!("🐋 Container {} is stopped", self.config.name());
            }
            StopMode::Remove => {
                self.state = ContainerState::Stopping;
                self.issue(CommandKind::Stop, &self.docker.stop())?;
                self.issue(CommandKind::Remove, &self.docker.remove())?;
                self.state = ContainerState::Removed;
                info!("🐋 Container {} is removed", self.config.name());
            }
        }
        Ok(())
    }

    pub fn stop_only(&mut self) -> Result<(), ContainerError> {
        self.stop(StopMode::Stop)
    }

    /// Opens a TCP connection to the published port of a ready container.
    pub fn connect(&self) -> Result<TcpStream, ConnectivityError> {
        if self.state != ContainerState::Ready {
            return Err(ConnectivityError::NotReady {
                name: self.config.name().into(),
            });
        }
        setup::connect(&self.config)
    }

    /// Runs a fresh container and sets up its database. With
    /// `check_existing`, a container left by an earlier run is brought back
    /// instead, its database was set up when it was created.
    fn create(&mut self, check_existing: bool) -> Result<bool, ContainerError> {
        self.state = ContainerState::Starting;
        if check_existing && self.listed(true)? {
            if self.listed(false)? {
                info!("🐋 Container {} is already running", self.config.name());
                return self.await_ready(false, None, false);
            }
            info!("🐋 Container {} exists, restarting it", self.config.name());
            return self.restart();
        }
        let since = unix_now();
        if self
            .issue(CommandKind::Run, &self.docker.run(&self.config))?
            .is_none()
        {
            self.state = ContainerState::Failed;
            return Ok(false);
        }
        self.await_ready(true, since, true)
    }

    fn reuse(&mut self, fast: bool) -> Result<bool, ContainerError> {
        self.state = ContainerState::Starting;
        if self.listed(false)? {
            if fast {
                info!(
                    "🐋 Container {} is already running, skipping readiness check",
                    self.config.name()
                );
                self.state = ContainerState::Ready;
                return Ok(true);
            }
            return self.await_ready(false, None, false);
        }
        if self.listed(true)? {
            return self.restart();
        }

        let since = unix_now();
        if self
            .issue(CommandKind::Run, &self.docker.run(&self.config))?
            .is_none()
        {
            self.state = ContainerState::Failed;
            return Ok(false);
        }
        self.await_ready(false, since, true)
    }

    fn restart(&mut self) -> Result<bool, ContainerError> {
        let since = unix_now();
        if self
            .issue(CommandKind::StartExisting, &self.docker.start())?
            .is_none()
        {
            self.state = ContainerState::Failed;
            return Ok(false);
        }
        self.await_ready(false, since, false)
    }

    fn await_ready(
        &mut self,
        with_setup: bool,
        since: Option<u64>,
        fresh: bool,
    ) -> Result<bool, ContainerError> {
        let mut readiness = self.config.readiness().clone();
        if fresh {
            readiness = readiness.expecting_restart();
        }
        let poller = ReadinessPoller::new(&self.runner, self.config.poll_interval());
        let docker = &self.docker;
        let ready = poller.wait_ready(
            || docker.logs(since),
            &readiness,
            self.config.max_attempts(),
        )?;
        if !ready {
            error!(
                "🐋 Container {} did not become ready after {} attempts",
                self.config.name(),
                self.config.max_attempts()
            );
            self.state = ContainerState::Failed;
            return Ok(false);
        }

        self.state = ContainerState::Ready;
        info!("🐋 Container {} is ready", self.config.name());
        if with_setup {
            self.setup.create(&self.config)?;
            self.setup.seed(&self.config)?;
        }
        Ok(true)
    }

    /// Whether `ps` lists the container, `all` including stopped ones.
    fn listed(&self, all: bool) -> Result<bool, ProcessExecutionError> {
        let listed = self
            .issue(CommandKind::Inspect, &self.docker.ps(all))?
            .is_some_and(|result| {
                result
                    .lines()
                    .iter()
                    .any(|line| line.trim().trim_start_matches('/') == self.config.name())
            });
        Ok(listed)
    }

    /// Runs one runtime command. A non-zero exit yields `None`, logged
    /// according to the command's failure policy.
    fn issue(
        &self,
        kind: CommandKind,
        command: &CommandInvocation,
    ) -> Result<Option<ProcessResult>, ProcessExecutionError> {
        match self.runner.run(command) {
            Ok(result) => Ok(Some(result)),
            Err(CommandError::Execution(error)) => Err(error),
            Err(CommandError::Failed(failed)) => {
                if kind.tolerates_failure() {
                    debug!("🐋 Ignoring failure of {kind:?} command: {failed}");
                } else {
                    error!("🐋 {failed}");
                    for line in &failed.lines {
                        warn!("🐋 [{}] {line}", self.config.name());
                    }
                }
                Ok(None)
            }
        }
    }
}

fn unix_now() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_secs())
}

impl<R: CommandRunner> ManagedContainer for Container<R> {
    fn platform(&self) -> Platform {
        self.config.platform()
    }

    fn name(&self) -> &str {
        self.config.name()
    }

    fn description(&self) -> String {
        let port = self.config.port();
        format!(
            "{} {} as {} on port {}",
            self.config.platform(),
            self.config.image(),
            self.config.name(),
            port.host
        )
    }

    fn state(&self) -> ContainerState {
        self.state
    }

    fn start(&mut self, mode: StartMode) -> Result<bool, ContainerError> {
        Container::start(self, mode)
    }

    fn stop(&mut self, mode: StopMode) -> Result<(), ContainerError> {
        Container::stop(self, mode)
    }
}

impl<R: CommandRunner> Shutdown for Container<R> {
    fn shutdown(&mut self) {
        let mode = self.config.shutdown_mode();
        if let Err(e) = self.stop(mode) {
            error!("🐋 Shutdown of {} failed: {e}", self.config.name());
        }
    }
}
