use std::env;
use std::path::PathBuf;

/// How persisted notifications reach the push provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDriver {
    /// Dispatch in-process right after persistence.
    Sync,
    /// Leave rows pending for an external queue consumer.
    Queue,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub db_path: PathBuf,
    pub fcm_server_key: String,
    pub notification_driver: NotificationDriver,
    pub dispatch_concurrency: usize,
    pub dispatch_chunk_size: usize,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            addr: env_str("CAMPUSD_ADDR", "127.0.0.1:8044"),
            db_path: PathBuf::from(env_str("CAMPUSD_DB", "campusd.sqlite3")),
            fcm_server_key: env_str("FCM_SERVER_KEY", ""),
            notification_driver: match env_str("NOTIFICATION_DRIVER", "sync").as_str() {
                "queue" => NotificationDriver::Queue,
                _ => NotificationDriver::Sync,
            },
            dispatch_concurrency: env_usize("DISPATCH_CONCURRENCY", 3).max(1),
            dispatch_chunk_size: env_usize("DISPATCH_CHUNK_SIZE", 500).max(1),
        }
    }
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
