use crate::ws::rooms::RoomManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // A .env file is optional
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|_| {
                vec![
                    "stun:stun.l.google.com:19302".to_string(),
                    "stun:stun1.l.google.com:19302".to_string(),
                ]
            });

        Ok(Config {
            bind_address,
            stun_servers,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub rooms: Arc<RoomManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            rooms: Arc::new(RoomManager::new()),
        }
    }
}
