use std::{
    collections::BTreeMap,
    fmt::Display,
    fs::File,
    io::BufReader,
    num::NonZeroU32,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::{
    error::ConfigError, image::DockerImage, platform::Platform, readiness::Readiness,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How aggressively `start` (re)creates a container and its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Run a fresh container, then create schema and seed data. A container
    /// kept by an earlier stop is restarted as it is.
    #[default]
    Create,
    /// Force-remove a container with the same name first, then `Create`.
    DropCreate,
    /// Reuse a running or stopped container, never touch the data.
    ContainerOnly,
    /// `ContainerOnly`, without log polling when the container is running.
    FastStart,
}

/// What `stop` does to the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Stop it and keep it around for a fast restart.
    #[default]
    Stop,
    /// Stop it and remove it with its anonymous volumes.
    Remove,
    /// Leave it running.
    None,
}

fn normalize_mode(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect::<String>()
        .to_ascii_lowercase()
}

impl FromStr for StartMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_mode(value).as_str() {
            "create" => Ok(StartMode::Create),
            "dropcreate" => Ok(StartMode::DropCreate),
            "containeronly" => Ok(StartMode::ContainerOnly),
            "faststart" => Ok(StartMode::FastStart),
            _ => Err("expected create, drop-create, container-only or fast-start".into()),
        }
    }
}

impl FromStr for StopMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_mode(value).as_str() {
            "stop" => Ok(StopMode::Stop),
            "remove" => Ok(StopMode::Remove),
            "none" => Ok(StopMode::None),
            _ => Err("expected stop, remove or none".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: String,
}

/// A host port published for a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub host: u16,
    pub container: u16,
}

/// Everything needed to drive one platform's container. Immutable once built.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    platform: Platform,
    name: String,
    image: DockerImage,
    host: String,
    port: PortPair,
    admin_port: Option<PortPair>,
    credentials: Credentials,
    environment: Vec<(String, String)>,
    extensions: Vec<String>,
    schema_files: Vec<PathBuf>,
    seed_files: Vec<PathBuf>,
    docker: String,
    max_attempts: NonZeroU32,
    poll_interval: Duration,
    readiness: Readiness,
    shutdown_mode: StopMode,
}

impl ContainerConfig {
    pub fn builder<S: Into<String>>(platform: Platform, version: S) -> ContainerConfigBuilder {
        ContainerConfigBuilder::new(platform, version.into())
    }

    /// Reads the settings of `platform`, `None` when its version is not set.
    pub fn from_properties(
        platform: Platform,
        properties: &Properties,
    ) -> Result<Option<ContainerConfig>, ConfigError> {
        let key = |name: &str| format!("{}.{name}", platform.key());
        let Some(version) = properties.get(&key("version")) else {
            return Ok(None);
        };
        let global = GlobalSettings::from_properties(properties)?;

        let mut builder = ContainerConfig::builder(platform, version)
            .docker(global.docker)
            .host(global.host)
            .max_attempts(global.max_attempts)
            .poll_interval(global.poll_interval)
            .shutdown_mode(global.shutdown_mode);
        if let Some(image) = properties.get(&key("image")) {
            builder = builder.image_repository(image);
        }
        if let Some(name) = properties.get(&key("containerName")) {
            builder = builder.name(name);
        }
        if let Some(port) = properties.get_parsed::<u16>(&key("port"))? {
            builder = builder.port(port);
        }
        if let Some(port) = properties.get_parsed::<u16>(&key("internalPort"))? {
            builder = builder.internal_port(port);
        }
        let admin_port = properties.get_parsed::<u16>(&key("adminPort"))?;
        let admin_internal_port = properties.get_parsed::<u16>(&key("adminInternalPort"))?;
        if let Some(container) = admin_internal_port.or(platform.admin_internal_port()) {
            builder = builder.admin_port(admin_port.unwrap_or(container), container);
        }
        if let Some(user) = properties.get(&key("user")) {
            builder = builder.user(user);
        }
        if let Some(password) = properties.get(&key("password")) {
            builder = builder.password(password);
        }
        if let Some(database) = properties.get(&key("database")) {
            builder = builder.database(database);
        }
        for extension in properties.list(&key("extensions")) {
            builder = builder.extension(extension);
        }
        for file in properties.list(&key("schemaFiles")) {
            builder = builder.schema_file(file);
        }
        for file in properties.list(&key("seedFiles")) {
            builder = builder.seed_file(file);
        }
        if let Some(attempts) = properties.get_parsed::<NonZeroU32>(&key("maxAttempts"))? {
            builder = builder.max_attempts(attempts);
        }
        if let Some(marker) = properties.get(&key("readyMarker")) {
            builder = builder.ready_marker(marker);
        }
        if let Some(marker) = properties.get(&key("failureMarker")) {
            builder = builder.failure_marker(marker);
        }
        for (name, value) in properties.with_prefix(&key("env.")) {
            builder = builder.env(name, value);
        }
        builder.build().map(Some)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &DockerImage {
        &self.image
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> PortPair {
        self.port
    }

    pub fn admin_port(&self) -> Option<PortPair> {
        self.admin_port
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Platform environment followed by the configured extra variables.
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut environment = self.platform.environment(self);
        environment.extend(self.environment.iter().cloned());
        environment
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn schema_files(&self) -> &[PathBuf] {
        &self.schema_files
    }

    pub fn seed_files(&self) -> &[PathBuf] {
        &self.seed_files
    }

    pub fn docker(&self) -> &str {
        &self.docker
    }

    pub fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn shutdown_mode(&self) -> StopMode {
        self.shutdown_mode
    }
}

pub struct ContainerConfigBuilder {
    platform: Platform,
    version: String,
    repository: String,
    name: String,
    host: String,
    port: PortPair,
    admin_port: Option<PortPair>,
    credentials: Credentials,
    environment: Vec<(String, String)>,
    extensions: Vec<String>,
    schema_files: Vec<PathBuf>,
    seed_files: Vec<PathBuf>,
    docker: String,
    max_attempts: NonZeroU32,
    poll_interval: Duration,
    readiness: Readiness,
    shutdown_mode: StopMode,
}

impl ContainerConfigBuilder {
    fn new(platform: Platform, version: String) -> Self {
        let port = platform.internal_port();
        ContainerConfigBuilder {
            platform,
            version,
            repository: platform.default_repository().into(),
            name: format!("testdb-{}", platform.key()),
            host: "localhost".into(),
            port: PortPair {
                host: port,
                container: port,
            },
            admin_port: None,
            credentials: Credentials {
                user: platform.default_user().into(),
                password: platform.default_password().into(),
                database: platform.default_database().into(),
            },
            environment: Vec::new(),
            extensions: Vec::new(),
            schema_files: Vec::new(),
            seed_files: Vec::new(),
            docker: "docker".into(),
            max_attempts: NonZeroU32::new(DEFAULT_MAX_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
            poll_interval: DEFAULT_POLL_INTERVAL,
            readiness: platform.readiness(),
            shutdown_mode: StopMode::Remove,
        }
    }

    pub fn image_repository<S: Into<String>>(mut self, repository: S) -> Self {
        self.repository = repository.into();
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, host_port: u16) -> Self {
        self.port.host = host_port;
        self
    }

    pub fn internal_port(mut self, container_port: u16) -> Self {
        self.port.container = container_port;
        self
    }

    pub fn admin_port(mut self, host_port: u16, container_port: u16) -> Self {
        self.admin_port = Some(PortPair {
            host: host_port,
            container: container_port,
        });
        self
    }

    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.credentials.user = user.into();
        self
    }

    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.credentials.password = password.into();
        self
    }

    pub fn database<S: Into<String>>(mut self, database: S) -> Self {
        self.credentials.database = database.into();
        self
    }

    pub fn env<S: Into<String>>(mut self, name: S, value: S) -> Self {
        self.environment.push((name.into(), value.into()));
        self
    }

    pub fn extension<S: Into<String>>(mut self, extension: S) -> Self {
        self.extensions.push(extension.into());
        self
    }

    pub fn schema_file<P: Into<PathBuf>>(mut self, file: P) -> Self {
        self.schema_files.push(file.into());
        self
    }

    pub fn seed_file<P: Into<PathBuf>>(mut self, file: P) -> Self {
        self.seed_files.push(file.into());
        self
    }

    pub fn docker<S: Into<String>>(mut self, executable: S) -> Self {
        self.docker = executable.into();
        self
    }

    pub fn max_attempts(mut self, attempts: NonZeroU32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn ready_marker<S: Into<String>>(mut self, marker: S) -> Self {
        let mut readiness = Readiness::new(marker);
        if let Some(failure) = self.readiness.failure_marker() {
            readiness = readiness.with_failure_marker(failure);
        }
        if let Some(restart) = self.readiness.restart_marker() {
            readiness = readiness.with_restart_marker(restart);
        }
        self.readiness = readiness;
        self
    }

    pub fn failure_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.readiness = self.readiness.with_failure_marker(marker);
        self
    }

    pub fn shutdown_mode(mut self, mode: StopMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    pub fn build(self) -> Result<ContainerConfig, ConfigError> {
        let image = DockerImage::with_version(&self.repository, &self.version)?;
        Ok(ContainerConfig {
            platform: self.platform,
            name: self.name,
            image,
            host: self.host,
            port: self.port,
            admin_port: self.admin_port,
            credentials: self.credentials,
            environment: self.environment,
            extensions: self.extensions,
            schema_files: self.schema_files,
            seed_files: self.seed_files,
            docker: self.docker,
            max_attempts: self.max_attempts,
            poll_interval: self.poll_interval,
            readiness: self.readiness,
            shutdown_mode: self.shutdown_mode,
        })
    }
}

/// Settings shared by all containers of a factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    /// Platforms to run, empty means every configured one.
    pub run_with: Vec<Platform>,
    pub start_mode: StartMode,
    pub stop_mode: StopMode,
    pub shutdown_mode: StopMode,
    pub docker: String,
    pub host: String,
    pub max_attempts: NonZeroU32,
    pub poll_interval: Duration,
}

impl GlobalSettings {
    pub fn from_properties(properties: &Properties) -> Result<Self, ConfigError> {
        let run_with = properties
            .list("containers.runWith")
            .into_iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<Platform>, _>>()?;
        let poll_interval = match properties.get("containers.pollInterval") {
            Some(value) => parse_duration::parse(value).map_err(|e| ConfigError::InvalidValue {
                key: "containers.pollInterval".into(),
                value: value.into(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_POLL_INTERVAL,
        };
        Ok(GlobalSettings {
            run_with,
            start_mode: properties.get_parsed("containers.startMode")?.unwrap_or_default(),
            stop_mode: properties.get_parsed("containers.stopMode")?.unwrap_or_default(),
            shutdown_mode: properties
                .get_parsed("containers.shutdownMode")?
                .unwrap_or(StopMode::Remove),
            docker: properties
                .get("containers.dockerExecutable")
                .unwrap_or("docker")
                .into(),
            host: properties.get("containers.host").unwrap_or("localhost").into(),
            max_attempts: properties
                .get_parsed("containers.maxAttempts")?
                .unwrap_or(NonZeroU32::new(DEFAULT_MAX_ATTEMPTS).unwrap_or(NonZeroU32::MIN)),
            poll_interval,
        })
    }

    /// Whether the selection filter lets `platform` run.
    pub fn selects(&self, platform: Platform) -> bool {
        self.run_with.is_empty() || self.run_with.contains(&platform)
    }
}

/// Flat string key/value configuration source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Properties::default()
    }

    /// Reads java `.properties` text: `key=value`, `key: value` or
    /// `key value`, with `#`/`!` comments, escapes and `\` continuations.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let values = java_properties::read(content.as_bytes())?;
        Ok(values.into_iter().collect())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let values = java_properties::read(BufReader::new(file))?;
        Ok(values.into_iter().collect())
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Overlays `other` on top of these properties.
    pub fn merge(&mut self, other: Properties) -> &mut Self {
        self.values.extend(other.values);
        self
    }

    /// The trimmed value of `key`, blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.into(),
                    value: value.into(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Comma separated values of `key`.
    pub fn list(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries under `prefix`, with the prefix stripped from the keys.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.values
            .iter()
            .filter_map(move |(key, value)| Some((key.strip_prefix(prefix)?, value.as_str())))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Properties {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn modes_parse_in_any_spelling() {
        assert_eq!("drop-create".parse::<StartMode>(), Ok(StartMode::DropCreate));
        assert_eq!("DropCreate".parse::<StartMode>(), Ok(StartMode::DropCreate));
        assert_eq!("container_only".parse::<StartMode>(), Ok(StartMode::ContainerOnly));
        assert_eq!("fast start".parse::<StartMode>(), Ok(StartMode::FastStart));
        assert_eq!("REMOVE".parse::<StopMode>(), Ok(StopMode::Remove));
        assert_eq!("none".parse::<StopMode>(), Ok(StopMode::None));
        assert!("restart".parse::<StopMode>().is_err());
    }

    #[test]
    fn parses_properties_text() {
        let properties = Properties::parse(
            "# databases\n\
             postgres.version = 9.6\n\
             ! legacy comment\n\
             \n\
             mysql.version: 8.0\n\
             containers.runWith=\n",
        )
        .unwrap();
        assert_eq!(properties.get("postgres.version"), Some("9.6"));
        assert_eq!(properties.get("mysql.version"), Some("8.0"));
        assert_eq!(properties.get("containers.runWith"), None);
    }

    #[test]
    fn parses_continuations_escapes_and_space_separators() {
        let properties = Properties::parse(
            "postgres.schemaFiles = a.sql,\\\n    b.sql\n\
             postgres.password=p\\=w\\u0041\n\
             postgres.user test\n",
        )
        .unwrap();
        assert_eq!(properties.list("postgres.schemaFiles"), vec!["a.sql", "b.sql"]);
        assert_eq!(properties.get("postgres.password"), Some("p=wA"));
        assert_eq!(properties.get("postgres.user"), Some("test"));
    }

    #[test]
    fn merged_properties_override_earlier_ones() {
        let mut properties: Properties =
            [("postgres.version", "9.6"), ("postgres.port", "5432")].into_iter().collect();
        let overrides: Properties = [("postgres.port", "15432")].into_iter().collect();
        properties.merge(overrides).set("mysql.version", "8.0");

        assert_eq!(properties.get("postgres.version"), Some("9.6"));
        assert_eq!(properties.get("postgres.port"), Some("15432"));
        assert_eq!(properties.get("mysql.version"), Some("8.0"));
    }

    #[test]
    fn loads_properties_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "postgres.version=16").unwrap();
        writeln!(file, "postgres.port=15432").unwrap();
        let properties = Properties::load(file.path()).unwrap();
        assert_eq!(properties.get_parsed::<u16>("postgres.port").unwrap(), Some(15432));
    }

    #[test]
    fn missing_properties_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Properties::load(dir.path().join("absent.properties")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn absent_version_means_not_requested() {
        let properties: Properties = [("postgres.port", "5432")].into_iter().collect();
        assert!(ContainerConfig::from_properties(Platform::Postgres, &properties)
            .unwrap()
            .is_none());
    }

    #[test]
    fn builds_container_config_from_properties() {
        let properties: Properties = [
            ("containers.dockerExecutable", "/usr/bin/podman"),
            ("containers.pollInterval", "250ms"),
            ("containers.maxAttempts", "40"),
            ("postgres.version", "16.1"),
            ("postgres.containerName", "it-postgres"),
            ("postgres.port", "15432"),
            ("postgres.user", "app"),
            ("postgres.extensions", "uuid-ossp, postgis"),
            ("postgres.schemaFiles", "sql/schema.sql"),
            ("postgres.seedFiles", "sql/a.sql,sql/b.sql"),
            ("postgres.env.TZ", "UTC"),
        ]
        .into_iter()
        .collect();
        let config = ContainerConfig::from_properties(Platform::Postgres, &properties)
            .unwrap()
            .unwrap();

        assert_eq!(config.name(), "it-postgres");
        assert_eq!(config.docker(), "/usr/bin/podman");
        assert_eq!(config.image().to_string(), "postgres:16.1");
        assert_eq!(
            config.port(),
            PortPair {
                host: 15432,
                container: 5432
            }
        );
        assert_eq!(config.admin_port(), None);
        assert_eq!(config.credentials().user, "app");
        assert_eq!(config.credentials().password, "test");
        assert_eq!(config.extensions(), &["uuid-ossp", "postgis"]);
        assert_eq!(config.seed_files().len(), 2);
        assert_eq!(config.max_attempts().get(), 40);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.shutdown_mode(), StopMode::Remove);
        assert!(config
            .environment()
            .contains(&("TZ".to_string(), "UTC".to_string())));
    }

    #[test]
    fn admin_port_defaults_to_the_platform_port() {
        let properties: Properties = [("elastic.version", "8.11.1"), ("elastic.port", "19200")]
            .into_iter()
            .collect();
        let config = ContainerConfig::from_properties(Platform::Elastic, &properties)
            .unwrap()
            .unwrap();
        assert_eq!(
            config.admin_port(),
            Some(PortPair {
                host: 9300,
                container: 9300
            })
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let properties: Properties = [("mysql.version", "8.0"), ("mysql.port", "70000")]
            .into_iter()
            .collect();
        assert!(matches!(
            ContainerConfig::from_properties(Platform::MySql, &properties),
            Err(ConfigError::InvalidValue { key, .. }) if key == "mysql.port"
        ));

        let properties: Properties = [("mysql.version", "8.0"), ("mysql.maxAttempts", "0")]
            .into_iter()
            .collect();
        assert!(ContainerConfig::from_properties(Platform::MySql, &properties).is_err());

        let properties: Properties = [("containers.stopMode", "pause")].into_iter().collect();
        assert!(GlobalSettings::from_properties(&properties).is_err());
    }

    #[test]
    fn ready_marker_override_keeps_the_other_markers() {
        let config = ContainerConfig::builder(Platform::Postgres, "16")
            .ready_marker("listening on IPv4")
            .build()
            .unwrap();
        assert_eq!(config.readiness().ready_marker(), "listening on IPv4");
        assert_eq!(
            config.readiness().restart_marker(),
            Some("PostgreSQL init process complete")
        );
    }

    #[test]
    fn selection_filter_is_case_insensitive() {
        let properties: Properties = [("containers.runWith", "MySQL, sqlServer")]
            .into_iter()
            .collect();
        let settings = GlobalSettings::from_properties(&properties).unwrap();
        assert!(settings.selects(Platform::MySql));
        assert!(settings.selects(Platform::SqlServer));
        assert!(!settings.selects(Platform::Postgres));
    }
}
