use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use tracing::{error, warn};

use crate::audio_engine::EnvelopeSettings;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppSettings {
    pub host_name: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
    pub master_volume: f32,
    pub envelope: EnvelopeSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host_name: None,
            output_device: None,
            sample_rate: None,
            buffer_size: None,
            master_volume: 1.0,
            envelope: EnvelopeSettings::default(),
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let config_dir = exe_dir.join("AppSettings");
            if !config_dir.exists() {
                if let Err(err) = fs::create_dir_all(&config_dir) {
                    error!(path = %config_dir.display(), %err, "failed to create settings directory");
                    return None;
                }
            }
            return Some(config_dir);
        }
    }
    error!("could not determine application directory");
    None
}

pub fn load_settings() -> AppSettings {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        if let Ok(json_string) = fs::read_to_string(&path) {
            match serde_json::from_str(&json_string) {
                Ok(settings) => return settings,
                Err(err) => {
                    warn!(path = %path.display(), %err, "unreadable settings file, using defaults");
                }
            }
        }
    }
    AppSettings::default()
}

pub fn save_settings(settings: &AppSettings) {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        match serde_json::to_string_pretty(settings) {
            Ok(json_string) => {
                if let Err(err) = fs::write(&path, json_string) {
                    error!(path = %path.display(), %err, "failed to write settings");
                }
            }
            Err(err) => error!(%err, "failed to serialize settings"),
        }
    }
}
