use std::env;
use std::fs;
use std::io::Result;
use std::io::{Error, ErrorKind};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_yaml;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::crypto::Codec;

pub const DEFAULT_PORT: u16 = 4043;
// max open file should at least be
pub const DEFAULT_MAX_OPEN_FILES: u64 = 1024 * 1024 * 1024;

pub const SECRET_ENV: &str = "SECRET";
pub const SALT_ENV: &str = "SALT";

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub secret: String,
    pub salt: String,
    pub max_cache_entries: usize,
    pub max_open_files: u64,
    // seconds, 0 keeps the platform default
    pub dial_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            secret: String::new(),
            salt: String::new(),
            max_cache_entries: DEFAULT_MAX_ENTRIES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            dial_timeout: 0,
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn dial_timeout(&self) -> Option<Duration> {
        match self.dial_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.secret.as_bytes(), self.salt.as_bytes())
    }

    // apply_env overrides secret and salt from SECRET and SALT when set.
    pub fn apply_env(&mut self) {
        if let Ok(secret) = env::var(SECRET_ENV) {
            self.secret = secret;
        }
        if let Ok(salt) = env::var(SALT_ENV) {
            self.salt = salt;
        }
    }

    // validate only warns: a bad key is reported per request with its own code.
    pub fn validate(&self) {
        if !self.codec().key_valid() {
            warn!(
                "secret is {} bytes, AES needs 16, 24 or 32; every token will be rejected",
                self.secret.len()
            );
        }
        if self.salt.is_empty() {
            warn!("salt is empty, tokens are not integrity checked");
        }
    }
}

pub fn parse_str(s: &str) -> Result<Config> {
    let cfg: Config = match serde_yaml::from_str(s) {
        Ok(_cfg) => _cfg,
        Err(_err) => return Err(Error::new(ErrorKind::InvalidData, _err)),
    };
    Ok(cfg)
}

pub fn parse_conf(path: &str) -> Result<Config> {
    let s = fs::read_to_string(path)?;
    parse_str(&s)
}

// load reads the optional config file then applies the environment.
pub fn load(path: Option<&str>) -> Result<Config> {
    let mut cfg = match path {
        Some(path) => parse_conf(path)?,
        None => Config::default(),
    };
    cfg.apply_env();
    Ok(cfg)
}
