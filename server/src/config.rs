use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level server configuration, loaded from huddle.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub rooms: RoomsSection,
    pub rate: RateSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_address: String,
    /// Shared secret clients must supply via `?key=`. Empty disables the gate.
    pub shared_secret: String,
    /// Liveness probe period in seconds.
    pub heartbeat_seconds: u64,
    /// Directory served as the static web page.
    pub static_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".into(),
            shared_secret: String::new(),
            heartbeat_seconds: 30,
            static_dir: "static".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsSection {
    /// When true, connections without a valid group code all share one
    /// neutral room instead of being bucketed by address. Set this behind a
    /// shared proxy, where client addresses collapse.
    pub require_code: bool,
    /// Maximum retained events per room.
    pub history_max: usize,
}

impl Default for RoomsSection {
    fn default() -> Self {
        Self {
            require_code: false,
            history_max: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateSection {
    /// Chat messages permitted per window per client address.
    pub max_events: u32,
    pub window_seconds: u64,
}

impl Default for RateSection {
    fn default() -> Self {
        Self {
            max_events: 10,
            window_seconds: 3,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file
    /// doesn't exist. Environment variables override TOML values.
    pub fn load(path: &str) -> Self {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read config file {}: {}", path, e));
            toml::from_str(&contents)
                .unwrap_or_else(|e| panic!("failed to parse config file {}: {}", path, e))
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LISTEN_ADDRESS") {
            self.server.listen_address = v;
        }
        if let Ok(v) = std::env::var("CHAT_KEY") {
            self.server.shared_secret = v;
        }
        if let Ok(v) = std::env::var("HEARTBEAT_SECONDS")
            && let Ok(secs) = v.parse()
        {
            self.server.heartbeat_seconds = secs;
        }
        if let Ok(v) = std::env::var("STATIC_DIR") {
            self.server.static_dir = v;
        }
        if let Ok(v) = std::env::var("REQUIRE_CODE")
            && let Ok(flag) = v.parse()
        {
            self.rooms.require_code = flag;
        }
        if let Ok(v) = std::env::var("HISTORY_MAX")
            && let Ok(max) = v.parse()
        {
            self.rooms.history_max = max;
        }
        if let Ok(v) = std::env::var("RATE_MAX_EVENTS")
            && let Ok(max) = v.parse()
        {
            self.rate.max_events = max;
        }
        if let Ok(v) = std::env::var("RATE_WINDOW_SECONDS")
            && let Ok(secs) = v.parse()
        {
            self.rate.window_seconds = secs;
        }
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_seconds)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate.window_seconds)
    }
}
