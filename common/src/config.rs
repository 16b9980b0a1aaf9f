use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{env, fs};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    /// Comma-separated `version:hex` key entries, e.g. `1:<64 hex chars>`.
    pub checkin_keys: String,
    /// Version of the key new tokens are encrypted under.
    pub checkin_active_key: u8,
    pub checkin_rotation_seconds: u64,
    pub checkin_max_age_seconds: u64,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init(env_path: &str) -> &'static Self {
        dotenvy::from_filename(env_path).ok();

        CONFIG.get_or_init(|| {
            let project_name = env::var("PROJECT_NAME").unwrap_or_else(|_| "checkin".into());
            let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".into());
            let log_file = env::var("LOG_FILE").unwrap_or_else(|_| "logs/checkin.log".into());

            if let Some(parent) = std::path::Path::new(&log_file).parent() {
                fs::create_dir_all(parent).expect("Failed to create log directory");
            }

            let checkin_keys = env::var("CHECKIN_KEYS").expect("CHECKIN_KEYS must be set");
            let checkin_active_key = env::var("CHECKIN_ACTIVE_KEY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            let checkin_rotation_seconds = env::var("CHECKIN_ROTATION_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            let checkin_max_age_seconds = env::var("CHECKIN_MAX_AGE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(35);

            Config {
                project_name,
                log_level,
                log_file,
                checkin_keys,
                checkin_active_key,
                checkin_rotation_seconds,
                checkin_max_age_seconds,
            }
        })
    }

    pub fn get() -> &'static Self {
        CONFIG.get().expect("Config not initialized")
    }
}
