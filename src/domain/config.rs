use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration for the catalog.
///
/// Read from a versioned TOML file, typically `cre.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    /// Path of the SQLite database file.
    ///
    /// Relative paths are resolved against the directory containing the
    /// configuration file.
    pub database: PathBuf,

    /// The default page size for paginated node lookups.
    items_per_page: usize,

    /// Whether to open the database in write-ahead-logging mode.
    pub wal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            items_per_page: default_items_per_page(),
            wal: true,
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the TOML content is
    /// invalid.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        let mut config: Self =
            toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {e}"))?;

        if config.database.is_relative() {
            if let Some(dir) = path.parent() {
                config.database = dir.join(&config.database);
            }
        }
        Ok(config)
    }

    /// Loads the configuration, falling back to defaults if the file is
    /// missing or unreadable.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::debug!("Failed to load config: {e}");
            Self::default()
        })
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Returns the default page size. Never zero.
    #[must_use]
    pub const fn items_per_page(&self) -> usize {
        if self.items_per_page == 0 {
            default_items_per_page()
        } else {
            self.items_per_page
        }
    }

    /// Sets the default page size. Zero restores the default.
    pub const fn set_items_per_page(&mut self, items_per_page: usize) {
        self.items_per_page = items_per_page;
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("catalog.sqlite")
}

const fn default_items_per_page() -> usize {
    20
}

const fn default_wal() -> bool {
    true
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default = "default_database")]
        database: PathBuf,

        #[serde(default = "default_items_per_page")]
        items_per_page: usize,

        #[serde(default = "default_wal")]
        wal: bool,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                database,
                items_per_page,
                wal,
            } => Self {
                database,
                items_per_page,
                wal,
            },
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            database: config.database,
            items_per_page: config.items_per_page,
            wal: config.wal,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn load_reads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"_version = \"1\"\ndatabase = \"/var/lib/cre/catalog.db\"\nitems_per_page = 50\nwal = false\n",
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.database, PathBuf::from("/var/lib/cre/catalog.db"));
        assert_eq!(config.items_per_page(), 50);
        assert!(!config.wal);
    }

    #[test]
    fn relative_database_resolves_against_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cre.toml");
        std::fs::write(&path, "_version = \"1\"\ndatabase = \"data/cre.db\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database, tmp.path().join("data/cre.db"));
    }

    #[test]
    fn load_missing_file_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.toml");

        let error = Config::load(&missing).unwrap_err();
        assert!(error.starts_with("Failed to read config file:"));
        assert_eq!(Config::load_or_default(&missing), Config::default());
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"_version = \"1\"\nitems_per_page = \"many\"\n")
            .unwrap();

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.starts_with("Failed to parse config file:"));
    }

    #[test]
    fn empty_file_returns_default() {
        let expected = Config::default();
        let actual: Config = toml::from_str(r#"_version = "1""#).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn zero_page_size_falls_back_to_default() {
        let mut config = Config::default();
        config.set_items_per_page(0);
        assert_eq!(config.items_per_page(), 20);
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cre.toml");
        let mut config = Config {
            database: tmp.path().join("catalog.sqlite"),
            ..Config::default()
        };
        config.set_items_per_page(5);

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
