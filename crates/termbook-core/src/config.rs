//! Layered configuration and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nesting, e.g. `APP_WINDOW__OVERSCAN=4`).
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::CollectionName;

pub const DEFAULT_COLLECTIONS: [&str; 6] =
    ["xisaab", "bayoloji", "fisikis", "soomaali_mansuur", "juqraafi", "doorashooyinka"];

pub const DEFAULT_MANIFEST: [&str; 16] = [
    "./",
    "./index.html",
    "./style.css",
    "./app.js",
    "./manifest.json",
    "./xisaab.json",
    "./bayoloji.json",
    "./fisikis.json",
    "./soomaali_mansuur.json",
    "./juqraafi.json",
    "./doorashooyinka.json",
    "./images/icon-192x192.png",
    "./images/icon-512x512.png",
    "./images/screen1.jpg",
    "./images/screen2.jpg",
    "./vendor/dexie.js",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub window: WindowSettings,
    pub cache: CacheSettings,
    pub update: UpdateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub db_dir: String,
    pub source_dir: String,
    pub collections: Vec<String>,
    pub search_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSettings {
    pub record_height_px: u32,
    pub overscan: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub root_dir: String,
    pub release_dir: String,
    pub tag_prefix: String,
    pub manifest: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub poll_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                db_dir: "~/.termbook/records".to_string(),
                source_dir: "./dictionaries".to_string(),
                collections: DEFAULT_COLLECTIONS.iter().map(|s| s.to_string()).collect(),
                search_limit: 25,
            },
            window: WindowSettings { record_height_px: 45, overscan: 2 },
            cache: CacheSettings {
                root_dir: "~/.termbook/assets".to_string(),
                release_dir: "./public".to_string(),
                tag_prefix: "terminology-dictionary".to_string(),
                manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            },
            update: UpdateSettings { poll_interval_secs: 3600 },
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.window.record_height_px == 0 {
            return Err(Error::InvalidConfig("window.record_height_px must be > 0".into()));
        }
        if self.store.search_limit == 0 {
            return Err(Error::InvalidConfig("store.search_limit must be > 0".into()));
        }
        if self.store.collections.is_empty() {
            return Err(Error::InvalidConfig("store.collections is empty".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.store.collections {
            CollectionName::new(name)?;
            if !seen.insert(name.as_str()) {
                return Err(Error::InvalidConfig(format!("duplicate collection '{name}'")));
            }
        }
        if self.update.poll_interval_secs == 0 {
            return Err(Error::InvalidConfig("update.poll_interval_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn db_dir(&self) -> PathBuf {
        expand_path(&self.store.db_dir)
    }

    pub fn source_dir(&self) -> PathBuf {
        expand_path(&self.store.source_dir)
    }

    pub fn cache_root(&self) -> PathBuf {
        expand_path(&self.cache.root_dir)
    }

    pub fn release_dir(&self) -> PathBuf {
        expand_path(&self.cache.release_dir)
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    /// Same layering as [`Config::load`], with config files looked up in `dir`.
    pub fn load_from(dir: &Path, env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
