use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::domain::Accession;
use crate::error::GeoflatError;
use crate::geo::landing_page_url;

pub const CONFIG_FILE_NAME: &str = "geoflat.json";
pub const DEFAULT_LANDING_URL: &str = "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi";
pub const DEFAULT_ACCESSION: &str = "GSE68849";

pub const ENV_LANDING_URL: &str = "GEOFLAT_LANDING_URL";
pub const ENV_ACCESSION: &str = "GEOFLAT_ACCESSION";
pub const ENV_MAX_WORKERS: &str = "GEOFLAT_MAX_WORKERS";
pub const ENV_NO_LOCK: &str = "GEOFLAT_NO_LOCK";
pub const ENV_ROOT: &str = "GEOFLAT_ROOT";

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub landing_url: Option<String>,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub no_lock: Option<bool>,
    #[serde(default)]
    pub root: Option<String>,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub accession: Option<String>,
    pub max_workers: Option<usize>,
    pub no_lock: bool,
    pub root: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub landing_url: String,
    pub accession: Accession,
    pub max_workers: usize,
    pub no_lock: bool,
    pub root: Utf8PathBuf,
}

impl ResolvedConfig {
    pub fn landing_page_url(&self) -> Result<Url, GeoflatError> {
        landing_page_url(&self.landing_url, &self.accession)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, GeoflatError> {
        let mut config = match path {
            Some(path) => Self::read(&PathBuf::from(path))?,
            None => match Self::discover() {
                Some(found) => Self::read(&found)?,
                None => Config::default(),
            },
        };
        apply_env(&mut config, |key| std::env::var(key).ok())?;
        apply_overrides(&mut config, overrides);
        Self::resolve_config(config)
    }

    pub fn read(path: &PathBuf) -> Result<Config, GeoflatError> {
        let content =
            fs::read_to_string(path).map_err(|_| GeoflatError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| GeoflatError::ConfigParse(err.to_string()))
    }

    /// `geoflat.json` in the working directory, then the user config directory.
    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("geoflat").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GeoflatError> {
        let landing_url = config
            .landing_url
            .unwrap_or_else(|| DEFAULT_LANDING_URL.to_string());
        let accession: Accession = config
            .accession
            .as_deref()
            .unwrap_or(DEFAULT_ACCESSION)
            .parse()?;
        let max_workers = config.max_workers.unwrap_or(1);
        if max_workers == 0 {
            return Err(GeoflatError::InvalidConfig(
                "max_workers must be a positive integer".to_string(),
            ));
        }
        let root = Utf8PathBuf::from(config.root.unwrap_or_else(|| ".".to_string()));

        // Fail at load time rather than in the first stage.
        landing_page_url(&landing_url, &accession)?;

        Ok(ResolvedConfig {
            landing_url,
            accession,
            max_workers,
            no_lock: config.no_lock.unwrap_or(false),
            root,
        })
    }
}

pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<(), GeoflatError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_LANDING_URL) {
        config.landing_url = Some(value);
    }
    if let Some(value) = lookup(ENV_ACCESSION) {
        config.accession = Some(value);
    }
    if let Some(value) = lookup(ENV_MAX_WORKERS) {
        let workers = value.trim().parse::<usize>().map_err(|_| {
            GeoflatError::InvalidConfig(format!("{ENV_MAX_WORKERS} is not a number: {value}"))
        })?;
        config.max_workers = Some(workers);
    }
    if let Some(value) = lookup(ENV_NO_LOCK) {
        config.no_lock = Some(parse_flag(ENV_NO_LOCK, &value)?);
    }
    if let Some(value) = lookup(ENV_ROOT) {
        config.root = Some(value);
    }
    Ok(())
}

pub fn apply_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(accession) = &overrides.accession {
        config.accession = Some(accession.clone());
    }
    if let Some(workers) = overrides.max_workers {
        config.max_workers = Some(workers);
    }
    if overrides.no_lock {
        config.no_lock = Some(true);
    }
    if let Some(root) = &overrides.root {
        config.root = Some(root.clone());
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, GeoflatError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(GeoflatError::InvalidConfig(format!(
            "{key} must be a boolean, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_when_config_is_empty() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.landing_url, DEFAULT_LANDING_URL);
        assert_eq!(resolved.accession.as_str(), DEFAULT_ACCESSION);
        assert_eq!(resolved.max_workers, 1);
        assert!(!resolved.no_lock);
        assert_eq!(resolved.root, ".");
    }

    #[test]
    fn env_parses_flags_and_numbers() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_NO_LOCK, "yes"), (ENV_MAX_WORKERS, " 4 ")]);
        let mut config = Config::default();
        apply_env(&mut config, |key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.no_lock, Some(true));
        assert_eq!(config.max_workers, Some(4));
    }

    #[test]
    fn env_rejects_bad_flag() {
        let mut config = Config::default();
        let err = apply_env(&mut config, |key| {
            (key == ENV_NO_LOCK).then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert_matches!(err, GeoflatError::InvalidConfig(_));
    }
}
