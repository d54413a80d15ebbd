//! Filter resolution on both ends of a conversion.
//!
//! Both lookups walk an explicit ordered list and stop at the first hit, so the
//! outcome depends only on list order and on what the engine reports.

use crate::config::Export;
use crate::engine::{Desktop, Document, PropertyValue};
use crate::error::ConversionError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Capability identifiers paired with their PDF export filter, in match order.
pub const PDF_FILTERS: &[(&str, &str)] = &[
    ("com.sun.star.text.GenericTextDocument", "writer_pdf_Export"),
    ("com.sun.star.text.WebDocument", "writer_web_pdf_Export"),
    ("com.sun.star.sheet.SpreadsheetDocument", "calc_pdf_Export"),
    ("com.sun.star.presentation.PresentationDocument", "impress_pdf_Export"),
    ("com.sun.star.drawing.DrawingDocument", "draw_pdf_Export"),
];

/// Macro execution mode passed on open: never run document macros.
pub const MACRO_EXECUTION_NEVER: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub capability: String,
    pub filter: String,
}

/// Ordered capability → export filter table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterTable {
    entries: Vec<FilterSpec>,
}

impl FilterTable {
    pub fn new(entries: Vec<FilterSpec>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FilterSpec] {
        &self.entries
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new(
            PDF_FILTERS
                .iter()
                .map(|(capability, filter)| FilterSpec {
                    capability: capability.to_string(),
                    filter: filter.to_string(),
                })
                .collect(),
        )
    }
}

/// Properties for loading with `filter`: hidden, read-only, macros off.
pub fn open_properties(filter: &str) -> Vec<PropertyValue> {
    vec![
        PropertyValue::new("Hidden", true),
        PropertyValue::new("MacroExecutionMode", MACRO_EXECUTION_NEVER),
        PropertyValue::new("ReadOnly", true),
        PropertyValue::new("FilterName", filter),
    ]
}

pub fn export_properties(filter: &str, export: &Export) -> Vec<PropertyValue> {
    vec![
        PropertyValue::new("FilterName", filter),
        PropertyValue::new("MaxImageResolution", export.max_image_resolution),
        PropertyValue::new("SelectPdfVersion", export.pdf_version),
    ]
}

/// Try each candidate filter in order; return the first document the engine loads.
pub fn open_document(
    desktop: &mut dyn Desktop,
    input: &Path,
    input_url: &str,
    candidates: &[String],
) -> Result<(Box<dyn Document>, String), ConversionError> {
    let mut tried = Vec::with_capacity(candidates.len());
    for filter in candidates {
        tried.push(filter.clone());
        match desktop.load_component(input_url, "_blank", &open_properties(filter)) {
            Ok(Some(mut doc)) => {
                debug!("opened {} with filter {filter}", input.display());
                if let Err(err) = doc.refresh() {
                    if err.is_fatal() {
                        return Err(ConversionError::Process(err.to_string()));
                    }
                    debug!("refresh after load failed: {err}");
                }
                return Ok((doc, filter.clone()));
            }
            Ok(None) => debug!("filter {filter} declined {}", input.display()),
            Err(err) if err.is_fatal() => return Err(ConversionError::Process(err.to_string())),
            Err(err) => warn!("filter {filter} failed on {}: {err}", input.display()),
        }
    }
    Err(ConversionError::Open {
        input: input.to_path_buf(),
        tried,
    })
}

/// First export filter in `table` whose capability the document supports.
pub fn resolve_export_filter(
    doc: &mut dyn Document,
    table: &FilterTable,
) -> Result<String, ConversionError> {
    for spec in table.entries() {
        match doc.supports_service(&spec.capability) {
            Ok(true) => return Ok(spec.filter.clone()),
            Ok(false) => {}
            Err(err) if err.is_fatal() => return Err(ConversionError::Process(err.to_string())),
            Err(err) => debug!("capability query {} failed: {err}", spec.capability),
        }
    }
    Err(ConversionError::Export(
        "PDF export not supported for this document type".to_string(),
    ))
}
