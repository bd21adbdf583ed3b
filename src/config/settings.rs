use config::{Config, ConfigError, Environment, File, FileFormat};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::{env, fmt};

pub static SETTINGS: Lazy<Settings> = Lazy::new(|| Settings::new().expect("Failed to setup settings"));

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub http_port: u16,
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Edge {
    pub http_port: u16,
    pub inference_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Verification {
    pub similarity_threshold: f32,
    pub pending_face_floor: f32,
    pub pending_ocr_floor: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Upload {
    pub max_upload_size_mb: usize,
}

impl Upload {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    pub ttl_seconds: u64,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Liveness {
    pub min_frames: usize,
    pub face_ratio_floor: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Security {
    pub hmac_secret: String,
}

impl Security {
    // The signing key is process-scoped and immutable; a short key makes
    // challenge signatures forgeable, so startup refuses to proceed.
    pub fn validate(&self) -> Result<(), String> {
        if self.hmac_secret.as_bytes().len() < 32 {
            return Err("security.hmac_secret must be at least 32 bytes".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cors {
    pub allowed_origins: Vec<String>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub environment: Option<String>,
    pub app: App,
    pub server: Server,
    pub edge: Edge,
    pub logger: Option<Logger>,
    pub verification: Verification,
    pub upload: Upload,
    pub challenge: Challenge,
    pub liveness: Liveness,
    pub security: Security,
    pub cors: Cors,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name("conf/config.toml").format(FileFormat::Toml))
            .add_source(File::with_name("conf/default").required(false))
            .add_source(File::with_name(&format!("conf/{run_mode}")).required(false))
            .add_source(File::with_name("conf/local").required(false))
            .add_source(Environment::default().separator("__"));

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.http_port", port)?;
        }

        builder.build()?.try_deserialize()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "http://localhost:{}", &self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let settings = match Settings::new() {
            Ok(settings) => settings,
            Err(e) => {
                println!("{:?}", e);
                return;
            }
        };

        assert!(settings.verification.similarity_threshold > 0.0);
        assert_eq!(
            settings.upload.max_upload_bytes(),
            settings.upload.max_upload_size_mb * 1024 * 1024
        );
    }

    #[test]
    fn test_secret_validation() {
        let short = Security { hmac_secret: "too-short".to_string() };
        assert!(short.validate().is_err());

        let ok = Security {
            hmac_secret: "dev-only-secret-0123456789abcdef0123456789abcdef".to_string(),
        };
        assert!(ok.validate().is_ok());
    }
}
