use std::net::{IpAddr, Ipv4Addr};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Battle simulation tick rate (ticks per second)
    pub tick_rate: u32,
    /// Warm-up phase duration in seconds
    pub warmup_secs: u64,
    /// Minimum non-spectator players before a matchmaking lobby leaves Waiting
    pub min_players: usize,
    /// Optional path to a JSON map-configuration file
    pub maps_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 5190,
            tick_rate: 20,
            warmup_secs: 30,
            min_players: 2,
            maps_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid PORT '{}', using default", port);
            }
        }

        if let Ok(rate) = std::env::var("TICK_RATE") {
            if let Ok(parsed) = rate.parse::<u32>() {
                if (1..=120).contains(&parsed) {
                    config.tick_rate = parsed;
                } else {
                    tracing::warn!("TICK_RATE must be 1-120, using default");
                }
            } else {
                tracing::warn!("Invalid TICK_RATE '{}', using default", rate);
            }
        }

        if let Ok(secs) = std::env::var("WARMUP_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                config.warmup_secs = parsed;
            } else {
                tracing::warn!("Invalid WARMUP_SECS '{}', using default", secs);
            }
        }

        if let Ok(min) = std::env::var("MIN_PLAYERS") {
            if let Ok(parsed) = min.parse::<usize>() {
                if parsed > 0 {
                    config.min_players = parsed;
                } else {
                    tracing::warn!("MIN_PLAYERS must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid MIN_PLAYERS '{}', using default", min);
            }
        }

        if let Ok(path) = std::env::var("MAPS_PATH") {
            config.maps_path = Some(path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.min_players == 0 {
            return Err("min_players must be at least 1".to_string());
        }
        Ok(())
    }

    /// Duration of one simulation tick
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5190);
        assert_eq!(config.tick_rate, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tick_interval() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_interval(), std::time::Duration::from_millis(50));
    }
}
