use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "docproxy", about = "RESP proxy in front of a document store", version)]
pub struct Config {
    /// Address the proxy listens on. A bare ":port" binds every interface.
    #[arg(long, env = "DOCPROXY_LISTEN", default_value = "127.0.0.1:6380")]
    pub listen: String,

    /// Backend connection string: memory:// or resp://host:port
    #[arg(long, env = "DOCPROXY_BACKEND", default_value = "resp://127.0.0.1:6379")]
    pub backend: String,

    #[arg(long, env = "DOCPROXY_USER", default_value = "")]
    pub user: String,

    #[arg(long, env = "DOCPROXY_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Namespace prepended to every backend key
    #[arg(long, env = "DOCPROXY_BUCKET", default_value = "default")]
    pub bucket: String,

    #[arg(long, env = "DOCPROXY_USE_CACHE")]
    pub use_cache: bool,

    /// Lifetime of local cache records, in seconds
    #[arg(long, env = "DOCPROXY_CACHE_TTL", default_value_t = 300)]
    pub cache_ttl: u64,

    #[arg(long, env = "DOCPROXY_OP_TIMEOUT_MS", default_value_t = 2500)]
    pub op_timeout_ms: u64,

    #[arg(long, env = "DOCPROXY_LOGLEVEL", default_value = "info")]
    pub loglevel: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: "127.0.0.1:6380".to_string(),
            backend: "resp://127.0.0.1:6379".to_string(),
            user: String::new(),
            password: String::new(),
            bucket: "default".to_string(),
            use_cache: false,
            cache_ttl: 300,
            op_timeout_ms: 2500,
            loglevel: "info".to_string(),
        }
    }
}

impl Config {
    /// Socket address to bind, expanding ":port" to all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }

    pub fn cache_lifetime(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matches_default() {
        let parsed = Config::try_parse_from(["docproxy"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.listen, default.listen);
        assert_eq!(parsed.backend, default.backend);
        assert_eq!(parsed.bucket, default.bucket);
        assert_eq!(parsed.cache_ttl, default.cache_ttl);
        assert_eq!(parsed.op_timeout_ms, default.op_timeout_ms);
        assert!(!parsed.use_cache);
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::try_parse_from([
            "docproxy",
            "--listen",
            ":7000",
            "--backend",
            "memory://",
            "--use-cache",
            "--cache-ttl",
            "5",
            "--op-timeout-ms",
            "100",
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:7000");
        assert_eq!(config.backend, "memory://");
        assert!(config.use_cache);
        assert_eq!(config.cache_lifetime(), Duration::from_secs(5));
        assert_eq!(config.op_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_bad_number() {
        assert!(Config::try_parse_from(["docproxy", "--cache-ttl", "soon"]).is_err());
    }
}
