use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Interval of the keepalive frames sent on every accepted socket.
    pub heartbeat_interval_secs: u64,
    /// Bound on how long a trigger waits for the agent reply.
    pub reply_timeout_secs: u64,
    pub max_send_queue: usize,
    /// Directory holding uploaded test executables, one subdir per task.
    pub media_root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            heartbeat_interval_secs: 25,
            reply_timeout_secs: 30,
            max_send_queue: 256,
            media_root: PathBuf::from("/var/proctor/media"),
        }
    }
}

impl ServerConfig {
    /// Defaults with environment overrides; unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = env_parse("PROCTOR_PORT") {
            config.port = port;
        }
        if let Some(secs) = env_parse("PROCTOR_HEARTBEAT_SECS") {
            config.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = env_parse("PROCTOR_REPLY_TIMEOUT_SECS") {
            config.reply_timeout_secs = secs;
        }
        if let Ok(root) = std::env::var("PROCTOR_MEDIA_ROOT") {
            config.media_root = PathBuf::from(root);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
