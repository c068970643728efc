use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

use crate::auth::MAX_SESSION_AGE_SECS;

pub struct Config {
    pub addr: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password_file: PathBuf,
    pub session_max_age: i64,
    pub max_upload: usize,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config = Self {
            addr: try_load("AUTOECOLE_ADDR", "127.0.0.1")?,
            port: try_load("AUTOECOLE_PORT", "8000")?,
            data_dir: try_load("AUTOECOLE_DATA_DIR", "data")?,
            password_file: try_load("AUTOECOLE_PASSWORD_FILE", "password.txt")?,
            session_max_age: try_load("AUTOECOLE_SESSION_MAX_AGE", "86400")?,
            max_upload: try_load("AUTOECOLE_MAX_UPLOAD", "10485760")?,
        };
        config.check()?;
        Ok(config)
    }

    /// Rejects values that parse but cannot be used.
    pub fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (1..=MAX_SESSION_AGE_SECS).contains(&self.session_max_age),
            "Invalid AUTOECOLE_SESSION_MAX_AGE value `{}`: expected 1 to {} seconds",
            self.session_max_age,
            MAX_SESSION_AGE_SECS
        );
        anyhow::ensure!(
            self.max_upload > 0,
            "Invalid AUTOECOLE_MAX_UPLOAD value `0`: expected a positive byte count"
        );
        Ok(())
    }

    /// Defaults with every file kept under `root`.
    pub fn rooted_at<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self {
            addr: IpAddr::from([127, 0, 0, 1]),
            port: 8000,
            data_dir: root.join("data"),
            password_file: root.join("password.txt"),
            session_max_age: 86400,
            max_upload: 10 * 1024 * 1024,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        log::info!("{} not set, using default: {}", key, default);
        default.to_string()
    });
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid {} value `{}`", key, raw))
}
