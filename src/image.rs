use std::{fmt::Display, str::FromStr, sync::OnceLock};

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("invalid repository name: {0}")]
    Repository(String),
    #[error("invalid sha256 hash version: {0}")]
    Hash(String),
    #[error("invalid tag version: {0}")]
    Tag(String),
}

/// A parsed `[registry/]repository[:tag|@sha256:hash]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerImage {
    registry: Option<String>,
    repository: String,
    version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    Any,
    Sha256(String),
    Tag(String),
}

impl DockerImage {
    /// Combines a repository (optionally prefixed by a registry) with a
    /// configured version. A version starting with `sha256:` pins a digest.
    pub fn with_version(repository: &str, version: &str) -> Result<Self, ImageError> {
        let mut image: DockerImage = repository.parse()?;
        if image.version != Version::Any {
            return Err(ImageError::Repository(repository.into()));
        }
        image.version = match version.strip_prefix("sha256:") {
            Some(hash) => Version::from_sha256(hash)?,
            None => Version::from_tag(version)?,
        };
        Ok(image)
    }
}

impl Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.repository)?;
        match &self.version {
            Version::Any => Ok(()),
            Version::Tag(tag) => write!(f, ":{tag}"),
            Version::Sha256(hash) => write!(f, "@sha256:{hash}"),
        }
    }
}

impl FromStr for DockerImage {
    type Err = ImageError;

    fn from_str(full_image_name: &str) -> Result<Self, Self::Err> {
        let (registry, repository_and_version) = match full_image_name.split_once('/') {
            Some((registry, repository_and_version))
                if registry.contains('.')
                    || registry.contains(':')
                    || registry.contains("localhost") =>
            {
                (Some(registry), repository_and_version)
            }
            _ => (None, full_image_name),
        };

        let (repository, version) = match repository_and_version.split_once("@sha256:") {
            Some((repository, hash)) => (repository, Version::from_sha256(hash)?),
            None => match repository_and_version.split_once(':') {
                Some((repository, tag)) => (repository, Version::from_tag(tag)?),
                None => (repository_and_version, Version::Any),
            },
        };
        if repository.is_empty() || repository.contains('@') || repository.contains(':') {
            return Err(ImageError::Repository(full_image_name.into()));
        }
        Ok(DockerImage {
            registry: registry.map(Into::into),
            repository: repository.into(),
            version,
        })
    }
}

impl Version {
    fn from_sha256(hash: &str) -> Result<Version, ImageError> {
        static HASH: OnceLock<Regex> = OnceLock::new();
        let re_hash = HASH.get_or_init(|| Regex::new("^[0-9a-fA-F]{32,}$").unwrap());
        if re_hash.is_match(hash) {
            Ok(Version::Sha256(hash.into()))
        } else {
            Err(ImageError::Hash(hash.into()))
        }
    }

    fn from_tag(tag: &str) -> Result<Version, ImageError> {
        static TAG: OnceLock<Regex> = OnceLock::new();
        let re_tag = TAG.get_or_init(|| Regex::new(r"^[\w][\w.\-]{0,127}$").unwrap());
        if re_tag.is_match(tag) {
            Ok(Version::Tag(tag.into()))
        } else {
            Err(ImageError::Tag(tag.into()))
        }
    }
}
