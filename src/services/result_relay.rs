use crate::models::{ClientResult, ProcessingReply};
use crate::services::error::RelayError;
use tracing::info;

/// Parses raw worker reply text. A reply that does not match the wire
/// contract is fatal for the relay.
pub fn parse_reply(raw: &str) -> Result<ProcessingReply, RelayError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn total_time(reply: &ProcessingReply) -> f64 {
    reply.preprocess_time_seconds + reply.ocr_time_seconds
}

pub fn completion_message(total_seconds: f64) -> String {
    format!("PREPROCESS + OCR done in {:.3} seconds", total_seconds)
}

/// Builds the client-facing result; OCR text passes through untouched.
pub fn to_client_result(reply: &ProcessingReply) -> ClientResult {
    info!(
        pid = reply.process_id,
        output = %reply.output_path,
        "Preprocess done in {:.3}sec, OCR done in {:.3}sec",
        reply.preprocess_time_seconds,
        reply.ocr_time_seconds
    );

    ClientResult {
        message: completion_message(total_time(reply)),
        ocr_output_text: reply.ocr_output.res_str.clone(),
    }
}

/// JSON text sent as the `ocr_done` event payload.
pub fn encode(result: &ClientResult) -> Result<String, RelayError> {
    serde_json::to_string(result).map_err(|e| RelayError::Encode(e.to_string()))
}
