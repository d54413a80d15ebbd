use crate::config::Export;
use crate::deadline::{Deadline, Elapsed};
use crate::engine::{Desktop, Document};
use crate::error::ConversionError;
use crate::resolver::{self, FilterTable};
use crate::supervisor::Connection;
use crate::util::file_url;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Input filters to try, in order.
    pub input_filters: Vec<String>,
    pub timeout: Duration,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, input_filters: Vec<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            input_filters,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Converted {
    pub output: PathBuf,
    pub input_filter: String,
    pub export_filter: String,
    pub output_bytes: u64,
}

/// Runs one conversion against a live connection: open, resolve, export, close.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    filters: FilterTable,
    export: Export,
}

impl Executor {
    pub fn new(filters: FilterTable, export: Export) -> Self {
        Self { filters, export }
    }

    pub async fn convert(
        &self,
        conn: &Connection,
        req: &ConversionRequest,
    ) -> Result<Converted, ConversionError> {
        let deadline = Deadline::arm(req.timeout);
        let job = Job::prepare(req, &self.filters, &self.export)?;
        info!(
            "converting {} -> {} (generation {})",
            job.input.display(),
            job.output.display(),
            conn.generation()
        );

        let desktop = conn.desktop();
        let outcome = deadline.run_blocking(move || job.run(&desktop)).await;
        deadline.disarm();

        match outcome {
            Ok(result) => result,
            Err(Elapsed(timeout)) => {
                warn!("conversion of {} timed out after {:?}", req.input.display(), timeout);
                Err(ConversionError::Timeout { timeout })
            }
        }
    }
}

/// Everything the blocking half of a conversion needs, owned.
struct Job {
    input: PathBuf,
    input_url: String,
    output: PathBuf,
    output_url: String,
    candidates: Vec<String>,
    filters: FilterTable,
    export: Export,
}

impl Job {
    fn prepare(
        req: &ConversionRequest,
        filters: &FilterTable,
        export: &Export,
    ) -> Result<Self, ConversionError> {
        let input = std::path::absolute(&req.input)?;
        let output = std::path::absolute(&req.output)?;
        Ok(Self {
            input_url: file_url(&input),
            output_url: file_url(&output),
            input,
            output,
            candidates: req.input_filters.clone(),
            filters: filters.clone(),
            export: export.clone(),
        })
    }

    fn run(self, desktop: &Mutex<Box<dyn Desktop>>) -> Result<Converted, ConversionError> {
        if let Some(parent) = self.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Held for the whole job so teardown never races a half-finished call.
        let mut desktop = desktop
            .lock()
            .map_err(|_| ConversionError::Process("engine desktop handle poisoned".to_string()))?;

        let (mut doc, input_filter) = resolver::open_document(
            &mut **desktop,
            &self.input,
            &self.input_url,
            &self.candidates,
        )?;

        let exported = self.export_document(&mut *doc);
        let closed = close_document(&mut *doc);
        let export_filter = exported?;
        closed?;

        let output_bytes = std::fs::metadata(&self.output).map(|m| m.len()).unwrap_or(0);
        if output_bytes == 0 {
            return Err(ConversionError::Export(format!(
                "engine reported success but {} is missing or empty",
                self.output.display()
            )));
        }

        Ok(Converted {
            output: self.output,
            input_filter,
            export_filter,
            output_bytes,
        })
    }

    fn export_document(&self, doc: &mut dyn Document) -> Result<String, ConversionError> {
        let filter = resolver::resolve_export_filter(doc, &self.filters)?;
        debug!("exporting with {filter}");
        doc.store_to_url(&self.output_url, &resolver::export_properties(&filter, &self.export))
            .map_err(|err| bridge_failure(err, "export"))?;
        Ok(filter)
    }
}

fn close_document(doc: &mut dyn Document) -> Result<(), ConversionError> {
    doc.dispose().map_err(|err| bridge_failure(err, "dispose"))?;
    doc.close(true).map_err(|err| bridge_failure(err, "close"))
}

fn bridge_failure(err: crate::error::BridgeError, step: &str) -> ConversionError {
    if err.is_fatal() {
        ConversionError::Process(format!("{step}: {err}"))
    } else {
        ConversionError::Export(format!("{step}: {err}"))
    }
}
