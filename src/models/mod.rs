use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

/// Name of the client event carrying a finished OCR result
pub const OCR_DONE_EVENT: &str = "ocr_done";

/// Name of the client event announcing the session id on connect
pub const SESSION_EVENT: &str = "session";

/// Emitted by the upload transport once a file is fully written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEvent {
    pub file_name: String,
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub session_id: String,
}

/// Upload transport events: "saved" or "error".
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Saved(UploadEvent),
    Failed {
        file_name: String,
        session_id: String,
        reason: String,
    },
}

/// Request sent to the OCR worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    #[serde(rename = "pid")]
    pub process_id: u32,
    #[serde(rename = "filename")]
    pub file_name: String,
    #[serde(rename = "filesize")]
    pub file_size_bytes: u64,
    #[serde(rename = "socketio_socket_id")]
    pub session_id: String,
}

/// Reply produced by the OCR worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReply {
    #[serde(rename = "pid")]
    pub process_id: u32,
    #[serde(rename = "img_output_path")]
    pub output_path: String,
    #[serde(rename = "preprocess_exec_time", deserialize_with = "lenient_f64")]
    pub preprocess_time_seconds: f64,
    #[serde(rename = "ocr_exec_time", deserialize_with = "lenient_f64")]
    pub ocr_time_seconds: f64,
    pub ocr_output: OcrOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub res_str: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_img_path: Option<String>,
}

/// Payload broadcast to browsers when OCR finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClientResult {
    pub message: String,
    #[serde(rename = "ocr_output")]
    pub ocr_output_text: String,
}

impl ClientResult {
    /// Recognized text as the browser renders it: one list item per line.
    pub fn output_lines(&self) -> Vec<&str> {
        self.ocr_output_text.split('\n').collect()
    }
}

/// One frame on the client broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    pub fn session(session_id: &str) -> Self {
        Self::new(SESSION_EVENT, session_id)
    }
}

/// Timings arrive as JSON numbers from the worker, but numeric strings are
/// parsed too.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(f64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid number '{}'", s))),
    }
}
