//! host settings file
//! runtime parameters of the client process, read from `config_{ENV}.toml`

use std::{fs::File, io::Read};
use lazy_static::lazy_static;
use serde_derive::Deserialize;
use std::env;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Env {
    pub debug: bool,
    pub env: String,
    pub log_level: String,
}

impl Default for Env {
    fn default() -> Self {
        Env {
            debug: false,
            env: String::from("dev"),
            log_level: String::from("info"),
        }
    }
}

/// device file system, credential and record paths are relative to `root_dir`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub root_dir: String,
    // forget configuration and hub assignment before seeding the storage again
    pub reset_on_start: bool,
}

impl Default for Storage {
    fn default() -> Self {
        Storage {
            root_dir: String::from("storage"),
            reset_on_start: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Mqtt {
    pub port: u16,
    pub keep_alive_secs: u64,
    // how long one blocking receive waits for the next inbound message
    pub receive_timeout_millis: u64,
}

impl Default for Mqtt {
    fn default() -> Self {
        Mqtt {
            port: 8883,
            keep_alive_secs: 20,
            receive_timeout_millis: 5000,
        }
    }
}

/// host files the device storage is seeded from at startup
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Bootstrap {
    pub root_ca: String,
    pub root_ca_rotated: String,
    pub device_cert: String,
    pub device_key: String,
    pub device_config: String,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Bootstrap {
            root_ca: String::from("certs/root_ca.pem"),
            root_ca_rotated: String::from("certs/root_ca_rotated.pem"),
            device_cert: String::from("certs/device_cert.pem"),
            device_key: String::from("certs/device_key.pem"),
            device_config: String::from("certs/device_config.json"),
        }
    }
}

/// identity of the radio module, reported as device properties
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Board {
    pub component_name: String,
    pub firmware_version: String,
    pub mac_address: String,
    pub udid: String,
}

impl Default for Board {
    fn default() -> Self {
        Board {
            component_name: String::from("calypso"),
            firmware_version: String::from("2.2.0"),
            mac_address: String::from("00:00:00:00:00:00"),
            udid: String::from("00000000000000000000000000000000"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Provisioning {
    // upper bound for the whole register and poll flow
    pub deadline_secs: u64,
    // drop a persisted hub assignment and register again
    pub reprovision: bool,
}

impl Default for Provisioning {
    fn default() -> Self {
        Provisioning {
            deadline_secs: 300,
            reprovision: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub env: Env,
    pub storage: Storage,
    pub mqtt: Mqtt,
    pub bootstrap: Bootstrap,
    pub board: Board,
    pub provisioning: Provisioning,
}

impl Settings {
    /// read settings from `config_{ENV}.toml`, built-in defaults when the file is absent or invalid
    fn load() -> Self {
        let env = match env::var("ENV") {
            Ok(e) => e,
            Err(_) => String::from("dev")
        };

        let file_path: String = format!("config_{}.toml", env);

        let mut file = match File::open(file_path.as_str()) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("settings file {} not readable, using defaults: {}", file_path, e);
                return Settings::default();
            }
        };

        let mut str_val = String::new();
        if let Err(e) = file.read_to_string(&mut str_val) {
            eprintln!("cannot read settings file {}, using defaults: {}", file_path, e);
            return Settings::default();
        }

        Settings::parse(&str_val).unwrap_or_else(|e| {
            eprintln!("settings file {} format invalid, using defaults: {}", file_path, e);
            Settings::default()
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn get<'a>() -> &'a Self {
        lazy_static! {
            static ref CACHE: Settings = Settings::load();
        }
        &CACHE
    }
}
