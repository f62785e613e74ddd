use crate::models::{ProcessingRequest, UploadEvent, UploadOutcome};
use std::path::Path;
use tracing::{info, warn};

/// Turns upload-completed events into worker requests.
#[derive(Debug, Clone, Copy)]
pub struct RequestCorrelator {
    process_id: u32,
}

impl RequestCorrelator {
    pub fn new(process_id: u32) -> Self {
        Self { process_id }
    }

    /// Correlator tagged with the current process id.
    pub fn for_current_process() -> Self {
        Self::new(std::process::id())
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn correlate(&self, event: &UploadEvent) -> ProcessingRequest {
        ProcessingRequest {
            process_id: self.process_id,
            file_name: base_name(&event.file_path),
            file_size_bytes: event.file_size_bytes,
            session_id: event.session_id.clone(),
        }
    }

    /// Returns the request for a saved upload. Failed uploads are only logged.
    pub fn on_upload(&self, outcome: &UploadOutcome) -> Option<ProcessingRequest> {
        match outcome {
            UploadOutcome::Saved(event) => {
                info!(
                    file = %event.file_name,
                    path = %event.file_path.display(),
                    session_id = %event.session_id,
                    "📥 {} has been uploaded",
                    event.file_name
                );
                Some(self.correlate(event))
            }
            UploadOutcome::Failed {
                file_name,
                session_id,
                reason,
            } => {
                warn!(
                    file = %file_name,
                    session_id = %session_id,
                    "Error from uploader: {}",
                    reason
                );
                None
            }
        }
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
