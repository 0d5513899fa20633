use std::env;
use std::time::Duration;

use crate::constants::*;
use crate::security::PasswordParams;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub public_host: String,
    pub secure_cookies: bool,
    pub allowed_origins: Vec<String>,
    pub history_limit: usize,
    pub session_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub auth_timeout_secs: u64,
    pub outbound_queue_capacity: usize,
    pub send_timeout_secs: u64,
    pub password_hash_memory_kib: u32,
    pub password_hash_iterations: u32,
    pub seed_demo_users: bool,
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        // Render terminates TLS in front of us and expects a public bind
        let on_render = env::var("RENDER").map(|v| v == "true").unwrap_or(false);

        let server_host = env::var("HOST").unwrap_or_else(|_| {
            if on_render { "0.0.0.0" } else { "localhost" }.to_string()
        });

        let server_port = parse_var("PORT", 8080u16)?;

        let public_host = if on_render {
            match env::var("RENDER_SERVICE_NAME") {
                Ok(name) if !name.is_empty() => format!("{}.onrender.com", name),
                _ => "secure-messenger.onrender.com".to_string(),
            }
        } else {
            "localhost".to_string()
        };

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| format!("http://localhost:{}", server_port))
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let history_limit = parse_var("HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?;
        let session_ttl_secs = parse_var("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        if session_ttl_secs <= 0 {
            return Err("SESSION_TTL_SECS must be positive".to_string());
        }

        let sweep_interval_secs =
            parse_var("SESSION_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?.max(1);
        let auth_timeout_secs = parse_var("AUTH_TIMEOUT_SECS", DEFAULT_AUTH_TIMEOUT_SECS)?;
        let outbound_queue_capacity =
            parse_var("OUTBOUND_QUEUE_CAPACITY", DEFAULT_OUTBOUND_QUEUE_CAPACITY)?.max(1);
        let send_timeout_secs =
            parse_var("SEND_TIMEOUT_SECS", DEFAULT_SEND_TIMEOUT_SECS)?.max(1);

        let password_hash_memory_kib =
            parse_var("PASSWORD_HASH_MEMORY_KIB", DEFAULT_PASSWORD_HASH_MEMORY_KIB)?;
        let password_hash_iterations =
            parse_var("PASSWORD_HASH_ITERATIONS", DEFAULT_PASSWORD_HASH_ITERATIONS)?;

        let seed_demo_users = parse_var("SEED_DEMO_USERS", false)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Ok(Config {
            server_host,
            server_port,
            public_host,
            secure_cookies: on_render,
            allowed_origins,
            history_limit,
            session_ttl_secs,
            sweep_interval_secs,
            auth_timeout_secs,
            outbound_queue_capacity,
            send_timeout_secs,
            password_hash_memory_kib,
            password_hash_iterations,
            seed_demo_users,
            environment,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Session lifetime as a chrono duration
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn password_params(&self) -> PasswordParams {
        PasswordParams {
            memory_kib: self.password_hash_memory_kib,
            iterations: self.password_hash_iterations,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}
