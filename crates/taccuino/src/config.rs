//! Configuration loading from environment variables.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::timezone::DisplayZone;

pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";

/// Settings shared by every subcommand
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub migrations_dir: PathBuf,
    pub display_zone: DisplayZone,
    pub bcrypt_cost: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads `TACCUINO_DB`, `TACCUINO_MIGRATIONS`, `TACCUINO_TIMEZONE` and
    /// `TACCUINO_BCRYPT_COST`, either from the environment or from a `.env`
    /// file. All of them are optional.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_path = lookup("TACCUINO_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("taccuino.db"));

        let migrations_dir = lookup("TACCUINO_MIGRATIONS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("db/migrations"));

        let zone_name = lookup("TACCUINO_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let display_zone =
            DisplayZone::parse(&zone_name).context("TACCUINO_TIMEZONE is not a valid timezone")?;

        let bcrypt_cost = match lookup("TACCUINO_BCRYPT_COST") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|cost| (4..=31).contains(cost))
                .with_context(|| format!("TACCUINO_BCRYPT_COST must be 4..=31, got {raw:?}"))?,
            None => bcrypt::DEFAULT_COST,
        };

        Ok(Self {
            database_path,
            migrations_dir,
            display_zone,
            bcrypt_cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // Lookups are injected so these tests never touch the process environment.

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.database_path, PathBuf::from("taccuino.db"));
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.display_zone.name(), DEFAULT_TIMEZONE);
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("TACCUINO_DB", "/tmp/journal.db"),
            ("TACCUINO_TIMEZONE", "Europe/Rome"),
            ("TACCUINO_BCRYPT_COST", "6"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/journal.db"));
        assert_eq!(config.display_zone.name(), "Europe/Rome");
        assert_eq!(config.bcrypt_cost, 6);
    }

    #[test]
    fn test_invalid_timezone() {
        assert!(Config::from_lookup(lookup_from(&[("TACCUINO_TIMEZONE", "Nowhere/Special")])).is_err());
    }

    #[test]
    fn test_invalid_bcrypt_cost() {
        assert!(Config::from_lookup(lookup_from(&[("TACCUINO_BCRYPT_COST", "2")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("TACCUINO_BCRYPT_COST", "lots")])).is_err());
    }
}
