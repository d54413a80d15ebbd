use crate::error::ConversionError;
use crate::executor::{ConversionRequest, Converted};
use crate::util::{hash_file, now_rfc3339};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionReport {
    pub input: String,
    pub output: String,
    pub input_filters: Vec<String>,
    pub timeout_seconds: u64,
    pub started: String,
    pub finished: String,
    pub duration_ms: u64,
    pub status: ReportStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportStatus {
    Ok {
        input_filter: String,
        export_filter: String,
        output_bytes: u64,
        output_sha256: Option<String>,
    },
    Failed {
        kind: String,
        error: String,
        retryable: bool,
    },
}

impl ConversionReport {
    pub fn new(
        req: &ConversionRequest,
        started: String,
        elapsed: Duration,
        outcome: &Result<Converted, ConversionError>,
    ) -> Self {
        let status = match outcome {
            Ok(done) => ReportStatus::Ok {
                input_filter: done.input_filter.clone(),
                export_filter: done.export_filter.clone(),
                output_bytes: done.output_bytes,
                output_sha256: hash_file(&done.output).ok(),
            },
            Err(err) => ReportStatus::Failed {
                kind: err.kind().to_string(),
                error: err.to_string(),
                retryable: err.is_retryable(),
            },
        };
        Self {
            input: req.input.display().to_string(),
            output: req.output.display().to_string(),
            input_filters: req.input_filters.clone(),
            timeout_seconds: req.timeout.as_secs(),
            started,
            finished: now_rfc3339(),
            duration_ms: elapsed.as_millis() as u64,
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ReportStatus::Ok { .. })
    }
}
