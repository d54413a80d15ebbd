use crate::config::Config;
use std::collections::BTreeMap;
use std::path::Path;

/// Built-in input filters per extension, most specific first.
const DEFAULT_INPUT_FILTERS: &[(&str, &[&str])] = &[
    ("doc", &["MS Word 97"]),
    ("docx", &["MS Word 2007 XML"]),
    ("odt", &["writer8"]),
    ("rtf", &["Rich Text Format"]),
    ("txt", &["Text"]),
    ("htm", &["HTML (StarWriter)", "HTML Document"]),
    ("html", &["HTML (StarWriter)", "HTML Document"]),
    ("xls", &["MS Excel 97"]),
    ("xlsx", &["Calc MS Excel 2007 XML"]),
    ("ods", &["calc8"]),
    ("csv", &["Text - txt - csv (StarCalc)"]),
    ("ppt", &["MS PowerPoint 97"]),
    ("pptx", &["Impress MS PowerPoint 2007 XML"]),
    ("odp", &["impress8"]),
    ("odg", &["draw8"]),
];

/// Candidate input filters keyed by lowercase extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFormats {
    by_extension: BTreeMap<String, Vec<String>>,
}

impl InputFormats {
    /// Built-in table with the config's `[formats.input_filters]` entries layered on top.
    pub fn from_config(cfg: &Config) -> Self {
        let mut formats = Self::default();
        for (ext, filters) in &cfg.formats.input_filters {
            formats
                .by_extension
                .insert(ext.trim_start_matches('.').to_ascii_lowercase(), filters.clone());
        }
        formats
    }

    pub fn for_extension(&self, ext: &str) -> Option<&[String]> {
        self.by_extension
            .get(&ext.trim_start_matches('.').to_ascii_lowercase())
            .map(Vec::as_slice)
            .filter(|filters| !filters.is_empty())
    }

    pub fn for_path(&self, path: &Path) -> Option<&[String]> {
        let ext = path.extension()?.to_str()?;
        self.for_extension(ext)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.by_extension.iter()
    }
}

impl Default for InputFormats {
    fn default() -> Self {
        let by_extension = DEFAULT_INPUT_FILTERS
            .iter()
            .map(|(ext, filters)| {
                (
                    ext.to_string(),
                    filters.iter().map(|f| f.to_string()).collect(),
                )
            })
            .collect();
        Self { by_extension }
    }
}
