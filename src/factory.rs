use std::collections::HashSet;

use log::{debug, error, info, warn};

use crate::{
    config::{ContainerConfig, GlobalSettings, Properties, StartMode, StopMode},
    container::{Container, ManagedContainer},
    error::{ConfigError, ContainerError},
    guard::{Shutdown, ShutdownGuard},
    platform::Platform,
    process::{CommandRunner, ProcessExecutor},
};

/// Result of one container's part in a fan-out.
#[derive(Debug)]
pub struct Outcome<T> {
    pub platform: Platform,
    pub name: String,
    pub result: Result<T, ContainerError>,
}

impl Outcome<bool> {
    /// Whether the container reached the ready state.
    pub fn is_ready(&self) -> bool {
        matches!(self.result, Ok(true))
    }
}

pub struct ContainerFactory {
    containers: Vec<Box<dyn ManagedContainer>>,
    start_mode: StartMode,
    stop_mode: StopMode,
    shutdown_mode: StopMode,
}

impl ContainerFactory {
    /// Registers `containers` in the given order. Names must be unique.
    pub fn new(containers: Vec<Box<dyn ManagedContainer>>) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for container in &containers {
            if !names.insert(container.name().to_string()) {
                return Err(ConfigError::DuplicateContainerName(container.name().into()));
            }
        }
        Ok(ContainerFactory {
            containers,
            start_mode: StartMode::default(),
            stop_mode: StopMode::default(),
            shutdown_mode: StopMode::Remove,
        })
    }

    pub fn from_properties(properties: &Properties) -> Result<Self, ConfigError> {
        ContainerFactory::from_properties_with(properties, ProcessExecutor)
    }

    /// Builds one container per platform with a `version` key that the
    /// `containers.runWith` selection lets through.
    pub fn from_properties_with<R>(properties: &Properties, runner: R) -> Result<Self, ConfigError>
    where
        R: CommandRunner + Clone + 'static,
    {
        let settings = GlobalSettings::from_properties(properties)?;
        let mut containers: Vec<Box<dyn ManagedContainer>> = Vec::new();
        for platform in Platform::ALL {
            if !settings.selects(platform) {
                debug!("🐋 {platform} is not selected to run");
                continue;
            }
            match ContainerConfig::from_properties(platform, properties)? {
                Some(config) => {
                    containers.push(Box::new(Container::with_runner(config, runner.clone())))
                }
                None => debug!("🐋 {platform} has no version configured"),
            }
        }
        if containers.is_empty() {
            warn!("🐋 No container is configured to run");
        }
        Ok(ContainerFactory::new(containers)?
            .with_start_mode(settings.start_mode)
            .with_stop_mode(settings.stop_mode)
            .with_shutdown_mode(settings.shutdown_mode))
    }

    pub fn with_start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    pub fn with_stop_mode(mut self, mode: StopMode) -> Self {
        self.stop_mode = mode;
        self
    }

    pub fn with_shutdown_mode(mut self, mode: StopMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    pub fn containers(&self) -> impl Iterator<Item = &dyn ManagedContainer> {
        self.containers.iter().map(|container| container.as_ref())
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Case-insensitive lookup, `None` for unknown or unconfigured platforms.
    pub fn by_platform(&self, name: &str) -> Option<&dyn ManagedContainer> {
        let platform: Platform = name.parse().ok()?;
        self.containers()
            .find(|container| container.platform() == platform)
    }

    pub fn by_platform_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut (dyn ManagedContainer + 'static)> {
        let platform: Platform = name.parse().ok()?;
        self.containers
            .iter_mut()
            .find(|container| container.platform() == platform)
            .map(|container| container.as_mut())
    }

    pub fn start_containers(&mut self) -> Vec<Outcome<bool>> {
        self.start_containers_with(|_| {})
    }

    /// Starts every container with the factory's start mode, handing each
    /// description to `on_start` first.
    pub fn start_containers_with<F>(&mut self, mut on_start: F) -> Vec<Outcome<bool>>
    where
        F: FnMut(&str),
    {
        let mode = self.start_mode;
        self.fan_out("start", |container| {
            let description = container.description();
            info!("🐋 Starting {description}");
            on_start(&description);
            container.start(mode)
        })
    }

    pub fn stop_containers(&mut self) -> Vec<Outcome<()>> {
        self.stop_containers_with(|_| {})
    }

    /// Tears every container down with the factory's stop mode, handing
    /// each description to `on_stop` first.
    pub fn stop_containers_with<F>(&mut self, mut on_stop: F) -> Vec<Outcome<()>>
    where
        F: FnMut(&str),
    {
        let mode = self.stop_mode;
        self.fan_out("stop", |container| {
            on_stop(&container.description());
            container.stop(mode)
        })
    }

    /// Stops every container without removing any.
    pub fn stop_only(&mut self) -> Vec<Outcome<()>> {
        self.stop_only_with(|_| {})
    }

    pub fn stop_only_with<F>(&mut self, mut on_stop: F) -> Vec<Outcome<()>>
    where
        F: FnMut(&str),
    {
        self.fan_out("stop", |container| {
            on_stop(&container.description());
            container.stop_only()
        })
    }

    /// Starts the containers and returns them behind a guard applying the
    /// shutdown mode when it goes out of scope.
    pub fn start_guarded(self) -> (ShutdownGuard<Self>, Vec<Outcome<bool>>) {
        let mut guard = ShutdownGuard::new(self);
        let outcomes = guard.start_containers();
        (guard, outcomes)
    }

    fn fan_out<T, F>(&mut self, operation: &str, mut apply: F) -> Vec<Outcome<T>>
    where
        F: FnMut(&mut (dyn ManagedContainer + 'static)) -> Result<T, ContainerError>,
    {
        self.containers
            .iter_mut()
            .map(|container| {
                let result = apply(container.as_mut());
                if let Err(e) = &result {
                    error!("🐋 Failed to {operation} {}: {e}", container.name());
                }
                Outcome {
                    platform: container.platform(),
                    name: container.name().to_string(),
                    result,
                }
            })
            .collect()
    }
}

impl Shutdown for ContainerFactory {
    fn shutdown(&mut self) {
        let mode = self.shutdown_mode;
        self.fan_out("shut down", |container| container.stop(mode));
    }
}
