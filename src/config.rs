use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Served IDP hostnames (realms), keyed by hostname
    #[serde(default = "default_tenants")]
    pub tenants: HashMap<String, TenantConfig>,
    /// Registered relying parties, keyed by client id
    #[serde(default)]
    pub clients: HashMap<String, ClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_secret")]
    pub secret: String,
    #[serde(default = "default_assertion_expire")]
    pub assertion_expire_hours: u64,
    #[serde(default = "default_access_token_expire")]
    pub access_token_expire_minutes: u64,
    /// When no scope is requested, embed email/name/picture unconditionally.
    /// Turning this off makes the no-scope path mint a minimal token instead.
    #[serde(default = "default_true")]
    pub legacy_full_disclosure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub cookie_secure: bool,
    #[serde(default = "default_login_expire")]
    pub login_expire_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    #[serde(default = "default_tenant_name")]
    pub display_name: String,
    #[serde(default)]
    pub branding: BrandingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrandingConfig {
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default = "default_text_color")]
    pub color: String,
    /// Icon URLs may contain a `{base_url}` placeholder substituted per request
    #[serde(default = "default_icons")]
    pub icons: Vec<IconConfig>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct IconConfig {
    pub url: String,
    pub size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub origin: String,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "data/fedcm-idp.db".to_string()
}

fn default_token_secret() -> String {
    // Replaced by a generated, persisted secret on first start
    "change-me".to_string()
}

fn default_assertion_expire() -> u64 {
    24 // hours
}

fn default_access_token_expire() -> u64 {
    60 // minutes
}

fn default_true() -> bool {
    true
}

fn default_cookie_name() -> String {
    "fedcm-idp-session".to_string()
}

fn default_login_expire() -> u64 {
    5 // minutes
}

fn default_tenant_name() -> String {
    "Test IDP".to_string()
}

fn default_background_color() -> String {
    "#6200ee".to_string()
}

fn default_text_color() -> String {
    "#ffffff".to_string()
}

fn default_icons() -> Vec<IconConfig> {
    vec![IconConfig {
        url: "{base_url}/images/logo.png".to_string(),
        size: 32,
    }]
}

fn default_tenants() -> HashMap<String, TenantConfig> {
    let mut tenants = HashMap::new();
    tenants.insert("localhost".to_string(), TenantConfig::default());
    tenants
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: default_token_secret(),
            assertion_expire_hours: default_assertion_expire(),
            access_token_expire_minutes: default_access_token_expire(),
            legacy_full_disclosure: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            cookie_secure: false,
            login_expire_minutes: default_login_expire(),
        }
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            display_name: default_tenant_name(),
            branding: BrandingConfig::default(),
        }
    }
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            background_color: default_background_color(),
            color: default_text_color(),
            icons: default_icons(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            token: TokenConfig::default(),
            session: SessionConfig::default(),
            tenants: default_tenants(),
            clients: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.ensure_token_secret()?;
        tracing::info!(
            "Serving tenants: [{}], {} registered client(s)",
            config.tenants.keys().cloned().collect::<Vec<_>>().join(", "),
            config.clients.len()
        );
        Ok(config)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: IDP_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("IDP_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("IDP_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("IDP_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        if let Ok(val) = env::var("IDP_CONF_TOKEN_SECRET") {
            self.token.secret = val;
        }
        if let Ok(val) = env::var("IDP_CONF_TOKEN_ASSERTION_EXPIRE") {
            if let Ok(hours) = val.parse() {
                self.token.assertion_expire_hours = hours;
            }
        }
        if let Ok(val) = env::var("IDP_CONF_TOKEN_LEGACY_FULL_DISCLOSURE") {
            if let Ok(v) = val.parse() {
                self.token.legacy_full_disclosure = v;
            }
        }

        if let Ok(val) = env::var("IDP_CONF_SESSION_COOKIE_SECURE") {
            if let Ok(v) = val.parse() {
                self.session.cookie_secure = v;
            }
        }
        if let Ok(val) = env::var("IDP_CONF_SESSION_LOGIN_EXPIRE") {
            if let Ok(minutes) = val.parse() {
                self.session.login_expire_minutes = minutes;
            }
        }
    }

    /// Ensure the token signing secret is non-default and persisted
    fn ensure_token_secret(&mut self) -> anyhow::Result<()> {
        if self.token.secret == default_token_secret() || self.token.secret.is_empty() {
            let secret_path = Path::new("data/.token_secret");

            if secret_path.exists() {
                let secret = fs::read_to_string(secret_path)?;
                self.token.secret = secret.trim().to_string();
                tracing::info!("Loaded persisted token secret from data/.token_secret");
            } else {
                let secret = uuid::Uuid::new_v4().to_string();

                if let Some(parent) = secret_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                fs::write(secret_path, &secret)?;
                self.token.secret = secret;
                tracing::info!("Generated and persisted new token secret to data/.token_secret");
            }
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn login_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session.login_expire_minutes as i64)
    }
}
