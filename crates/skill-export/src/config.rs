// skill-export/crates/skill-export/src/config.rs

use std::env;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{ExportError, Result};
use crate::model::PhaseSet;
use crate::resolver::{ResolverConfig, DEFAULT_MAX_SESSIONS_PER_QUERY};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub database_name: String,
    pub max_sessions_per_query: usize,
    pub dive_in_phases: PhaseSet,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from any variable source; `lookup` returns `None` for unset names.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path = lookup("APPLICATION_DATABASE_PATH").unwrap_or_default();
        let database_name = lookup("APPLICATION_DATABASE_NAME").unwrap_or_default();

        let max_sessions_per_query = match lookup("MAX_SESSIONS_PER_QUERY") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                ExportError::Config(format!("MAX_SESSIONS_PER_QUERY '{}' is not a number: {}", raw, e))
            })?,
            None => DEFAULT_MAX_SESSIONS_PER_QUERY,
        };

        let dive_in_phases = match lookup("DIVE_IN_PHASES") {
            Some(raw) if !raw.trim().is_empty() => {
                PhaseSet::from_names(raw.split(',').filter(|name| !name.trim().is_empty()))
                    .map_err(|e| ExportError::Config(format!("DIVE_IN_PHASES: {}", e)))?
            }
            _ => PhaseSet::default(),
        };

        let config = Self {
            database_path: PathBuf::from(database_path),
            database_name,
            max_sessions_per_query,
            dive_in_phases,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ExportError::Config("APPLICATION_DATABASE_PATH is required".into()));
        }
        if self.database_name.trim().is_empty() {
            return Err(ExportError::Config("APPLICATION_DATABASE_NAME is required".into()));
        }
        if self.max_sessions_per_query == 0 {
            return Err(ExportError::Config(
                "MAX_SESSIONS_PER_QUERY must be greater than zero".into(),
            ));
        }
        if self.dive_in_phases.is_empty() {
            return Err(ExportError::Config("DIVE_IN_PHASES must name at least one phase".into()));
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            max_sessions: self.max_sessions_per_query,
            phases: self.dive_in_phases.clone(),
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database Path: {}", self.database_path.display());
        info!("- Database Name: {}", self.database_name);
        info!("- Max Sessions Per Query: {}", self.max_sessions_per_query);
        info!("- Dive-in Phases: {}", self.dive_in_phases.names().join(", "));
    }
}
