use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use backchannel_core::peer_id::PeerId;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::processor::ProcessorConfig;
use crate::processor::ProcessorConfigSerialized;
use crate::util::ensure_parent_dir;
use crate::util::expand_home;

lazy_static::lazy_static! {
  static ref DEFAULT_STORAGE_CONFIG: StorageConfig = StorageConfig {
    path: get_storage_location(".backchannel", "relay"),
    capacity: DEFAULT_STORAGE_CAPACITY,
  };
}

pub const DEFAULT_ICE_SERVERS: &str = "stun://stun.l.google.com:19302";
pub const DEFAULT_MAINTENANCE_INTERVAL: u64 = 60;
pub const DEFAULT_STORAGE_CAPACITY: u32 = 200000000;

pub fn get_storage_location<P>(prefix: P, path: P) -> String
where P: AsRef<std::path::Path> {
    let home_dir = env::var_os("HOME").map(PathBuf::from);
    let expect = match home_dir {
        Some(dir) => dir.join(prefix).join(path),
        None => std::path::Path::new("data").join(prefix).join(path),
    };
    expect.to_string_lossy().to_string()
}

fn default_maintenance_interval() -> u64 {
    DEFAULT_MAINTENANCE_INTERVAL
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Stable id of this node's account. Drawn once at init and kept for
    /// the lifetime of the file.
    pub peer_id: PeerId,
    /// Path of the hex encoded identity secret file. A raw hex string is
    /// also accepted.
    pub identity_secret: String,
    pub ice_servers: String,
    /// When the field is absent from the YAML file, deserialization falls
    /// back to [DEFAULT_MAINTENANCE_INTERVAL].
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<String>,
    /// Outbound session key lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_lifetime: Option<u64>,
    /// Grace window of rotated-out keys in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_rotation_grace: Option<u64>,
    /// Connection attempt budget per peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connect_attempts: Option<u32>,
    /// Seconds a connection attempt may stay pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    pub storage: StorageConfig,
}

impl TryFrom<Config> for ProcessorConfigSerialized {
    type Error = Error;
    fn try_from(config: Config) -> Result<Self> {
        let identity_secret = config.identity_secret;
        let secret_file = expand_home(&identity_secret)?;
        let identity_secret = fs::read_to_string(secret_file).unwrap_or_else(|e| {
            tracing::warn!(
                "Read identity secret file failed: {e:?}. Handling it as a raw hex secret. Prefer a file path."
            );
            identity_secret
        });

        let mut cs = Self::new(
            config.peer_id,
            config.ice_servers,
            identity_secret,
            config.maintenance_interval,
        )
        .session_policy(config.session_lifetime, config.session_rotation_grace)
        .connection_budget(config.max_connect_attempts, config.connect_timeout);

        cs = if let Some(ext_ip) = config.external_ip {
            cs.external_address(ext_ip)
        } else {
            cs
        };

        Ok(cs)
    }
}

impl TryFrom<Config> for ProcessorConfig {
    type Error = Error;
    fn try_from(config: Config) -> Result<Self> {
        ProcessorConfigSerialized::try_from(config).and_then(Self::try_from)
    }
}

impl Config {
    pub fn new<P>(identity_secret: P) -> Self
    where P: AsRef<std::path::Path> {
        let identity_secret = identity_secret.as_ref().to_string_lossy().to_string();
        Self {
            peer_id: PeerId::random(),
            identity_secret,
            ice_servers: DEFAULT_ICE_SERVERS.to_string(),
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            external_ip: None,
            session_lifetime: None,
            session_rotation_grace: None,
            max_connect_attempts: None,
            connect_timeout: None,
            storage: DEFAULT_STORAGE_CONFIG.clone(),
        }
    }

    pub fn write_fs<P>(&self, path: P) -> Result<String>
    where P: AsRef<std::path::Path> {
        let path = expand_home(path)?;
        ensure_parent_dir(&path)?;
        let f =
            fs::File::create(path.as_path()).map_err(|e| Error::CreateFileError(e.to_string()))?;
        let f_writer = io::BufWriter::new(f);
        serde_yaml::to_writer(f_writer, self).map_err(|_| Error::EncodeError)?;
        Ok(path.to_string_lossy().to_string())
    }

    pub fn read_fs<P>(path: P) -> Result<Config>
    where P: AsRef<std::path::Path> {
        let path = expand_home(path)?;
        tracing::debug!("Read config from: {:?}", path);
        let f = fs::File::open(path).map_err(|e| Error::OpenFileError(e.to_string()))?;
        let f_rdr = io::BufReader::new(f);
        serde_yaml::from_reader(f_rdr).map_err(|_| Error::DecodeError)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub path: String,
    pub capacity: u32,
}

impl StorageConfig {
    pub fn new(path: &str, capacity: u32) -> Self {
        Self {
            path: path.to_string(),
            capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_with_missed_field() {
        let yaml = r#"
peer_id: 0c9b7b66-1f84-4d5e-9b36-2d3b4f8a2f10
identity_secret: identity.key
ice_servers: stun://stun.l.google.com:19302
storage:
  path: /home/foo/.backchannel/relay
  capacity: 200000000
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.maintenance_interval, DEFAULT_MAINTENANCE_INTERVAL);
        assert_eq!(cfg.external_ip, None);
    }

    #[test]
    fn test_config_write_read_round_trip() {
        let config = Config::new("~/.backchannel/identity.key");
        let path = env::temp_dir().join(format!("backchannel-config-{}.yaml", config.peer_id));

        let written = config.write_fs(&path).unwrap();
        let restored = Config::read_fs(&written).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(restored.peer_id, config.peer_id);
        assert_eq!(restored.identity_secret, "~/.backchannel/identity.key");
        assert_eq!(restored.storage.capacity, DEFAULT_STORAGE_CAPACITY);
    }
}
