use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::env;
use std::path::{Path, PathBuf};

/// Runtime configuration for the relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP/WS server binds to (default: "127.0.0.1")
    pub http_host: String,

    /// HTTP listen port (default: 4630)
    pub http_port: u16,

    /// Host running the OCR worker's reply socket (default: "localhost")
    pub worker_host: String,

    /// Port of the OCR worker's reply socket (default: 5555)
    pub worker_port: u16,

    /// Directory uploaded files are written to (default: "./input/")
    pub upload_dir: PathBuf,

    /// Input file used by the standalone mode (default: "input.jpg")
    pub default_input_filename: String,

    /// Maximum upload size in bytes (default: 50 MB)
    pub max_file_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: 4630,
            worker_host: "localhost".to_string(),
            worker_port: 5555,
            upload_dir: PathBuf::from("./input/"),
            default_input_filename: "input.jpg".to_string(),
            max_file_size: 50 * 1024 * 1024, // 50 MB
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            http_host: env::var("HTTP_HOST").unwrap_or(default.http_host),

            http_port: env::var("HTTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.http_port),

            worker_host: env::var("WORKER_HOST").unwrap_or(default.worker_host),

            worker_port: env::var("WORKER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.worker_port),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            default_input_filename: env::var("DEFAULT_INPUT_FILENAME")
                .unwrap_or(default.default_input_filename),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),
        }
    }

    /// Load the `config.json` layout shared with the OCR worker.
    ///
    /// Keys the file does not carry keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(raw)?;
        let default = Self::default();

        Ok(Self {
            http_port: file.express_port.unwrap_or(default.http_port),
            worker_port: file.zmq_port.unwrap_or(default.worker_port),
            upload_dir: file
                .path
                .and_then(|p| p.input_dir)
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),
            default_input_filename: file
                .default_input_filename
                .unwrap_or(default.default_input_filename),
            ..default
        })
    }

    /// Config for tests and local runs (small upload limit, throwaway dir)
    pub fn development() -> Self {
        Self {
            upload_dir: env::temp_dir().join("ocr-relay-input"),
            max_file_size: 10 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// `tcp://host:port` address of the worker's reply socket
    pub fn worker_address(&self) -> String {
        format!("tcp://{}:{}", self.worker_host, self.worker_port)
    }

    /// Request body limit for `/upload`. Leaves room for the multipart
    /// boundaries and part headers around a file of exactly `max_file_size`.
    pub fn body_limit(&self) -> usize {
        self.max_file_size.saturating_add(MULTIPART_OVERHEAD)
    }
}

const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "expressPort", default, deserialize_with = "port_from_any")]
    express_port: Option<u16>,
    #[serde(rename = "zmqPort", default, deserialize_with = "port_from_any")]
    zmq_port: Option<u16>,
    path: Option<ConfigPaths>,
    default_input_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigPaths {
    input_dir: Option<String>,
}

/// The worker concatenates `zmqPort` into a bind address, so it is usually a
/// string in the shared file. Accept both forms.
fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(n)) => Ok(Some(n)),
        Some(Port::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", s))),
    }
}
