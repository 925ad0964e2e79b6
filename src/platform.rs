use std::{fmt::Display, str::FromStr};

use crate::{config::ContainerConfig, error::ConfigError, readiness::Readiness};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Postgres,
    MySql,
    SqlServer,
    Oracle,
    Hana,
    Elastic,
}

impl Platform {
    /// Declaration order, also the order containers are registered in.
    pub const ALL: [Platform; 6] = [
        Platform::Postgres,
        Platform::MySql,
        Platform::SqlServer,
        Platform::Oracle,
        Platform::Hana,
        Platform::Elastic,
    ];

    /// Prefix of the platform's configuration keys.
    pub fn key(self) -> &'static str {
        match self {
            Platform::Postgres => "postgres",
            Platform::MySql => "mysql",
            Platform::SqlServer => "sqlserver",
            Platform::Oracle => "oracle",
            Platform::Hana => "hana",
            Platform::Elastic => "elastic",
        }
    }

    pub fn default_repository(self) -> &'static str {
        match self {
            Platform::Postgres => "postgres",
            Platform::MySql => "mysql",
            Platform::SqlServer => "mcr.microsoft.com/mssql/server",
            Platform::Oracle => "gvenzl/oracle-xe",
            Platform::Hana => "saplabs/hanaexpress",
            Platform::Elastic => "docker.elastic.co/elasticsearch/elasticsearch",
        }
    }

    pub fn internal_port(self) -> u16 {
        match self {
            Platform::Postgres => 5432,
            Platform::MySql => 3306,
            Platform::SqlServer => 1433,
            Platform::Oracle => 1521,
            Platform::Hana => 39017,
            Platform::Elastic => 9200,
        }
    }

    pub fn admin_internal_port(self) -> Option<u16> {
        match self {
            Platform::Hana => Some(39013),
            Platform::Elastic => Some(9300),
            _ => None,
        }
    }

    pub fn default_user(self) -> &'static str {
        match self {
            Platform::SqlServer => "sa",
            Platform::Hana => "SYSTEM",
            Platform::Elastic => "elastic",
            _ => "test",
        }
    }

    pub fn default_password(self) -> &'static str {
        match self {
            // both images reject passwords without mixed case and digits
            Platform::SqlServer => "Test-Passw0rd",
            Platform::Hana => "HXEHana1",
            _ => "test",
        }
    }

    pub fn default_database(self) -> &'static str {
        match self {
            Platform::Oracle => "XEPDB1",
            Platform::Hana => "HXE",
            _ => "test",
        }
    }

    pub fn readiness(self) -> Readiness {
        match self {
            // the image runs a temporary server for initdb first
            Platform::Postgres => Readiness::new("database system is ready to accept connections")
                .with_failure_marker("PANIC:")
                .with_restart_marker("PostgreSQL init process complete"),
            Platform::MySql => Readiness::new("ready for connections")
                .with_failure_marker("Aborting")
                .with_restart_marker("MySQL init process done"),
            Platform::SqlServer => {
                Readiness::new("SQL Server is now ready for client connections")
            }
            Platform::Oracle => Readiness::new("DATABASE IS READY TO USE!")
                .with_failure_marker("DATABASE SETUP WAS NOT SUCCESSFUL!"),
            Platform::Hana => Readiness::new("Startup finished!"),
            Platform::Elastic => Readiness::new("\"message\":\"started"),
        }
    }

    /// Environment passed to `docker run`.
    pub fn environment(self, config: &ContainerConfig) -> Vec<(String, String)> {
        let credentials = config.credentials();
        let pairs: Vec<(&str, &str)> = match self {
            Platform::Postgres => vec![
                ("POSTGRES_USER", credentials.user.as_str()),
                ("POSTGRES_PASSWORD", credentials.password.as_str()),
                ("POSTGRES_DB", credentials.database.as_str()),
            ],
            Platform::MySql if credentials.user == "root" => vec![
                ("MYSQL_ROOT_PASSWORD", credentials.password.as_str()),
                ("MYSQL_DATABASE", credentials.database.as_str()),
            ],
            Platform::MySql => vec![
                ("MYSQL_ROOT_PASSWORD", credentials.password.as_str()),
                ("MYSQL_DATABASE", credentials.database.as_str()),
                ("MYSQL_USER", credentials.user.as_str()),
                ("MYSQL_PASSWORD", credentials.password.as_str()),
            ],
            Platform::SqlServer => vec![
                ("ACCEPT_EULA", "Y"),
                ("MSSQL_SA_PASSWORD", credentials.password.as_str()),
            ],
            Platform::Oracle => vec![
                ("ORACLE_PASSWORD", credentials.password.as_str()),
                ("APP_USER", credentials.user.as_str()),
                ("APP_USER_PASSWORD", credentials.password.as_str()),
            ],
            Platform::Hana => vec![],
            Platform::Elastic => vec![
                ("discovery.type", "single-node"),
                ("xpack.security.enabled", "false"),
                ("ELASTIC_PASSWORD", credentials.password.as_str()),
                ("ES_JAVA_OPTS", "-Xms512m -Xmx512m"),
            ],
        };
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    /// Arguments appended after the image in `docker run`.
    pub fn run_args(self, config: &ContainerConfig) -> Vec<String> {
        match self {
            Platform::Postgres => vec!["postgres".into(), "-c".into(), "fsync=off".into()],
            Platform::Hana => vec![
                "--agree-to-sap-license".into(),
                "--dont-check-system".into(),
                "--master-password".into(),
                config.credentials().password.clone(),
            ],
            _ => vec![],
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let name = name.trim();
        Platform::ALL
            .into_iter()
            .find(|platform| platform.key().eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownPlatform(name.into()))
    }
}
