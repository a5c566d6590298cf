use std::{env, path::PathBuf};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_USER: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Memory,
}

/// Runtime settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub default_user: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let port = match lookup("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|err| format!("PORT must be a port number: {err}"))?,
            None => DEFAULT_PORT,
        };

        let store = match lookup("APP_STORE").as_deref().map(str::trim) {
            None | Some("") | Some("file") => StoreKind::File,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                return Err(format!("APP_STORE must be 'file' or 'memory', got '{other}'"));
            }
        };

        Ok(Self {
            port,
            data_dir: lookup("APP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/users")),
            store,
            default_user: lookup("APP_DEFAULT_USER").unwrap_or_else(|| DEFAULT_USER.to_string()),
        })
    }
}
