use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct LtiConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub platform: PlatformConfig,
    pub keys: KeyConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
}

/// Upper bound on launch token lifetime. Keeps `iat + ttl` far from `i64`
/// overflow and launches short-lived.
pub const MAX_TOKEN_TTL_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

/// Identity of this platform as seen by tools.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// `iss` of every launch token and expected `aud` of tool responses.
    pub issuer: String,
    pub token_ttl_seconds: i64,
    /// Clock skew tolerated when checking `exp` on inbound tokens.
    pub token_leeway_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    /// Overrides the thumbprint-derived key id when set.
    pub key_id: Option<String>,
    pub jwks_cache_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Disabled,
}

impl LtiConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = LtiConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("lti-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("lti"), is_prod)?,
            },
            platform: PlatformConfig {
                issuer: get_env("LTI_ISSUER", Some("http://localhost:8080"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                token_ttl_seconds: parse_env("LTI_TOKEN_TTL_SECONDS", "3600", is_prod)?,
                token_leeway_seconds: parse_env("LTI_TOKEN_LEEWAY_SECONDS", "0", is_prod)?,
            },
            keys: KeyConfig {
                private_key_path: get_env("LTI_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("LTI_PUBLIC_KEY_PATH", None, is_prod)?,
                key_id: env::var("LTI_KEY_ID").ok().filter(|v| !v.is_empty()),
                jwks_cache_ttl_seconds: parse_env("LTI_JWKS_CACHE_TTL_SECONDS", "300", is_prod)?,
                http_timeout_seconds: parse_env("LTI_HTTP_TIMEOUT_SECONDS", "10", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("*"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.platform.token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LTI_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.platform.token_ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LTI_TOKEN_TTL_SECONDS must not exceed {}",
                MAX_TOKEN_TTL_SECONDS
            )));
        }

        if self.keys.http_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LTI_HTTP_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if !self.platform.issuer.starts_with("https://") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "LTI_ISSUER must be an https URL in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!("Swagger UI is publicly accessible in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
