//! Server configuration.
//!
//! All runtime configuration arrives via `BOLETERA_*` environment
//! variables; `Config::from_env` is the canonical path for deployments.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use boletera_core::dte::{CertificateRef, IssuerIdentity};
use boletera_core::{Error, Result};

/// CORS configuration for browser-based register frontends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Use `["*"]` to allow all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Invoicing-gateway configuration (SimpleAPI-style provider).
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL for document calls (`/dte/generar`, `/envio/*`, `/consulta/envio`).
    pub base_url: String,
    /// Base URL for the folio-issuance service.
    pub folios_url: String,
    /// Static API key sent in the `Authorization` header.
    pub api_key: String,
    /// Path to the signing certificate (`.pfx`).
    pub certificate_path: PathBuf,
    /// RUT of the certificate holder.
    pub certificate_rut: String,
    /// Certificate password.
    pub certificate_password: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("folios_url", &self.folios_url)
            .field("api_key", &"[REDACTED]")
            .field("certificate_path", &self.certificate_path)
            .field("certificate_rut", &self.certificate_rut)
            .field("certificate_password", &"[REDACTED]")
            .finish()
    }
}

impl GatewayConfig {
    /// Certificate reference embedded in gateway payloads.
    #[must_use]
    pub fn certificate_ref(&self) -> CertificateRef {
        CertificateRef {
            rut: self.certificate_rut.clone(),
            password: self.certificate_password.clone(),
        }
    }
}

/// Issuer identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// Issuer RUT body (digits, no verifier).
    pub rut: String,
    /// RUT verifier digit.
    pub dv: String,
    /// Registered business name.
    pub business_name: String,
    /// Registered line of business.
    pub business_line: String,
    /// Origin address.
    pub origin_address: String,
    /// Origin commune.
    pub origin_commune: String,
}

impl IssuerConfig {
    /// Converts to the core identity type.
    #[must_use]
    pub fn to_identity(&self) -> IssuerIdentity {
        IssuerIdentity {
            rut: self.rut.clone(),
            dv: self.dv.clone(),
            business_name: self.business_name.clone(),
            business_line: self.business_line.clone(),
            origin_address: self.origin_address.clone(),
            origin_commune: self.origin_commune.clone(),
        }
    }
}

/// Configuration for the Boletera API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode: pretty logs, in-memory store allowed.
    pub debug: bool,

    /// Directory where CAF certificates are deposited.
    pub caf_directory: PathBuf,

    /// Path to the receipts SQLite database. `None` selects the in-memory
    /// store (debug only).
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Remaining-folio threshold for the low-capacity alert.
    pub alert_threshold: u64,

    /// Webhook URL the alert notifier posts to. `None` selects the noop
    /// notifier.
    #[serde(default)]
    pub alert_webhook_url: Option<String>,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Invoicing-gateway settings.
    pub gateway: GatewayConfig,

    /// Issuer identity stamped on every document.
    pub issuer: IssuerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            debug: false,
            caf_directory: PathBuf::from("caf"),
            database_path: None,
            alert_threshold: boletera_core::alert::DEFAULT_ALERT_THRESHOLD,
            alert_webhook_url: None,
            cors: CorsConfig::default(),
            gateway: GatewayConfig {
                base_url: "https://api.simpleapi.cl/api/v1".to_string(),
                folios_url: "https://servicios.simpleapi.cl/api".to_string(),
                api_key: String::new(),
                certificate_path: PathBuf::from("certificado/certificado.pfx"),
                certificate_rut: String::new(),
                certificate_password: String::new(),
            },
            issuer: IssuerConfig {
                rut: String::new(),
                dv: String::new(),
                business_name: String::new(),
                business_line: String::new(),
                origin_address: String::new(),
                origin_commune: String::new(),
            },
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `BOLETERA_HTTP_PORT`
    /// - `BOLETERA_DEBUG`
    /// - `BOLETERA_CAF_DIR`
    /// - `BOLETERA_DB_PATH`
    /// - `BOLETERA_ALERT_THRESHOLD`
    /// - `BOLETERA_ALERT_WEBHOOK_URL`
    /// - `BOLETERA_CORS_ALLOWED_ORIGINS` (comma-separated, or `*`)
    /// - `BOLETERA_CORS_MAX_AGE_SECONDS`
    /// - `BOLETERA_GATEWAY_URL`
    /// - `BOLETERA_FOLIOS_URL`
    /// - `BOLETERA_GATEWAY_API_KEY`
    /// - `BOLETERA_CERT_PATH`
    /// - `BOLETERA_CERT_RUT`
    /// - `BOLETERA_CERT_PASSWORD`
    /// - `BOLETERA_ISSUER_RUT`
    /// - `BOLETERA_ISSUER_DV`
    /// - `BOLETERA_ISSUER_NAME`
    /// - `BOLETERA_ISSUER_LINE`
    /// - `BOLETERA_ISSUER_ADDRESS`
    /// - `BOLETERA_ISSUER_COMMUNE`
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed,
    /// or if a required production setting is missing outside debug mode.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("BOLETERA_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("BOLETERA_DEBUG")? {
            config.debug = debug;
        }
        if let Some(dir) = env_string("BOLETERA_CAF_DIR") {
            config.caf_directory = PathBuf::from(dir);
        }
        if let Some(path) = env_string("BOLETERA_DB_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(threshold) = env_u64("BOLETERA_ALERT_THRESHOLD")? {
            config.alert_threshold = threshold;
        }
        config.alert_webhook_url = env_string("BOLETERA_ALERT_WEBHOOK_URL");

        if let Some(origins) = env_string("BOLETERA_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = parse_cors_allowed_origins(&origins);
        }
        if let Some(max_age) = env_u64("BOLETERA_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        if let Some(url) = env_string("BOLETERA_GATEWAY_URL") {
            config.gateway.base_url = url;
        }
        if let Some(url) = env_string("BOLETERA_FOLIOS_URL") {
            config.gateway.folios_url = url;
        }
        if let Some(key) = env_string("BOLETERA_GATEWAY_API_KEY") {
            config.gateway.api_key = key;
        }
        if let Some(path) = env_string("BOLETERA_CERT_PATH") {
            config.gateway.certificate_path = PathBuf::from(path);
        }
        if let Some(rut) = env_string("BOLETERA_CERT_RUT") {
            config.gateway.certificate_rut = rut;
        }
        if let Some(password) = env_string("BOLETERA_CERT_PASSWORD") {
            config.gateway.certificate_password = password;
        }

        if let Some(rut) = env_string("BOLETERA_ISSUER_RUT") {
            config.issuer.rut = rut;
        }
        if let Some(dv) = env_string("BOLETERA_ISSUER_DV") {
            config.issuer.dv = dv;
        }
        if let Some(name) = env_string("BOLETERA_ISSUER_NAME") {
            config.issuer.business_name = name;
        }
        if let Some(line) = env_string("BOLETERA_ISSUER_LINE") {
            config.issuer.business_line = line;
        }
        if let Some(address) = env_string("BOLETERA_ISSUER_ADDRESS") {
            config.issuer.origin_address = address;
        }
        if let Some(commune) = env_string("BOLETERA_ISSUER_COMMUNE") {
            config.issuer.origin_commune = commune;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field requirements.
    ///
    /// # Errors
    ///
    /// Returns an error when production mode lacks gateway credentials,
    /// issuer identity, or a database path.
    pub fn validate(&self) -> Result<()> {
        if self.debug {
            return Ok(());
        }
        if self.gateway.api_key.trim().is_empty() {
            return Err(Error::InvalidInput(
                "BOLETERA_GATEWAY_API_KEY is required when BOLETERA_DEBUG=false".to_string(),
            ));
        }
        if self.gateway.certificate_rut.trim().is_empty()
            || self.gateway.certificate_password.trim().is_empty()
        {
            return Err(Error::InvalidInput(
                "BOLETERA_CERT_RUT and BOLETERA_CERT_PASSWORD are required when BOLETERA_DEBUG=false"
                    .to_string(),
            ));
        }
        if self.issuer.rut.trim().is_empty() || self.issuer.dv.trim().is_empty() {
            return Err(Error::InvalidInput(
                "BOLETERA_ISSUER_RUT and BOLETERA_ISSUER_DV are required when BOLETERA_DEBUG=false"
                    .to_string(),
            ));
        }
        if self.database_path.is_none() {
            return Err(Error::InvalidInput(
                "BOLETERA_DB_PATH is required when BOLETERA_DEBUG=false".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

fn parse_cors_allowed_origins(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == "*" {
        return vec!["*".to_string()];
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
