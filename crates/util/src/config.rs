use std::{env, fmt, net::SocketAddr};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://therapy-log.db?mode=rwc";
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60 * 24;
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;
pub const DEFAULT_BCRYPT_COST: u32 = 12;
const DEVELOPMENT_JWT_SECRET: &str = "development-only-secret-change-me";
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub jwt_secret: Vec<u8>,
    pub token_ttl_minutes: i64,
    pub bcrypt_cost: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("environment", &self.environment)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_minutes", &self.token_ttl_minutes)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = env::var("APP_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(value) if !value.is_empty() => value.into_bytes(),
            _ if environment == Environment::Production => {
                return Err(ConfigError::MissingJwtSecret)
            }
            _ => DEVELOPMENT_JWT_SECRET.as_bytes().to_vec(),
        };

        let token_ttl_minutes = match env::var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            Ok(raw) => match raw.parse::<i64>() {
                Ok(value) if (1..=MAX_TOKEN_TTL_MINUTES).contains(&value) => value,
                _ => return Err(ConfigError::InvalidTokenTtl(raw)),
            },
            Err(_) => DEFAULT_TOKEN_TTL_MINUTES,
        };

        let bcrypt_cost = match env::var("BCRYPT_COST") {
            Ok(raw) => match raw.parse::<u32>() {
                Ok(value) if (MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&value) => value,
                _ => return Err(ConfigError::InvalidBcryptCost(raw)),
            },
            Err(_) => DEFAULT_BCRYPT_COST,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            jwt_secret,
            token_ttl_minutes,
            bcrypt_cost,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingJwtSecret,
    InvalidTokenTtl(String),
    InvalidBcryptCost(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingJwtSecret => write!(f, "JWT_SECRET must be set in production"),
            Self::InvalidTokenTtl(value) => write!(
                f,
                "ACCESS_TOKEN_EXPIRE_MINUTES must be between 1 and {MAX_TOKEN_TTL_MINUTES} (got {value})"
            ),
            Self::InvalidBcryptCost(value) => write!(
                f,
                "BCRYPT_COST must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST} (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_URL",
        "JWT_SECRET",
        "ACCESS_TOKEN_EXPIRE_MINUTES",
        "BCRYPT_COST",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.token_ttl_minutes, DEFAULT_TOKEN_TTL_MINUTES);
        assert_eq!(config.bcrypt_cost, DEFAULT_BCRYPT_COST);
        assert!(!config.jwt_secret.is_empty());
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_env();
    }

    #[test]
    fn production_requires_jwt_secret() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");

        let err = AppConfig::from_env().expect_err("secret is mandatory");
        assert!(matches!(err, ConfigError::MissingJwtSecret));

        env::set_var("JWT_SECRET", "prod-secret");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.jwt_secret, b"prod-secret".to_vec());

        clear_env();
    }

    #[test]
    fn rejects_malformed_bind_address() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_BIND_ADDR", "localhost");

        let err = AppConfig::from_env().expect_err("host names are not socket addresses");
        assert!(matches!(err, ConfigError::BindAddress(_)));

        clear_env();
    }

    #[test]
    fn validates_numeric_settings() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        env::set_var("ACCESS_TOKEN_EXPIRE_MINUTES", "0");
        let err = AppConfig::from_env().expect_err("ttl must be positive");
        assert!(matches!(err, ConfigError::InvalidTokenTtl(value) if value == "0"));

        env::set_var("ACCESS_TOKEN_EXPIRE_MINUTES", "1000000000000");
        let err = AppConfig::from_env().expect_err("ttl above one year");
        assert!(matches!(err, ConfigError::InvalidTokenTtl(value) if value == "1000000000000"));

        env::set_var("ACCESS_TOKEN_EXPIRE_MINUTES", MAX_TOKEN_TTL_MINUTES.to_string());
        assert_eq!(
            AppConfig::from_env().expect("ceiling is allowed").token_ttl_minutes,
            MAX_TOKEN_TTL_MINUTES
        );

        env::set_var("ACCESS_TOKEN_EXPIRE_MINUTES", "30");
        env::set_var("BCRYPT_COST", "2");
        let err = AppConfig::from_env().expect_err("cost below bcrypt minimum");
        assert!(matches!(err, ConfigError::InvalidBcryptCost(value) if value == "2"));

        env::set_var("BCRYPT_COST", "10");
        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.token_ttl_minutes, 30);
        assert_eq!(config.bcrypt_cost, 10);

        clear_env();
    }
}
