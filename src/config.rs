use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub connect: Connect,
    #[serde(default)]
    pub bridge: Bridge,
    #[serde(default)]
    pub conversion: Conversion,
    #[serde(default)]
    pub export: Export,
    #[serde(default)]
    pub formats: Formats,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    /// Path to `soffice`, or `auto` to search `PATH`.
    pub soffice_exe: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            soffice_exe: "auto".into(),
            host: "localhost".into(),
            port: 6519,
            protocol: "urp;StarOffice.ComponentContext".into(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connect {
    pub backoff_ms: u64,
    /// 0 retries forever.
    pub max_attempts: u32,
}
impl Default for Connect {
    fn default() -> Self {
        Self {
            backoff_ms: 1000,
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bridge {
    pub python_exe: String,
    pub script: String,
    pub handshake_timeout_seconds: u64,
    pub forward_stderr: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
impl Default for Bridge {
    fn default() -> Self {
        Self {
            python_exe: "auto".into(),
            script: "scripts/uno_bridge.py".into(),
            handshake_timeout_seconds: 10,
            forward_stderr: true,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub timeout_seconds: u64,
    pub resubmit_attempts: u32,
}
impl Default for Conversion {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            resubmit_attempts: 1,
        }
    }
}

impl Conversion {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    pub max_image_resolution: u32,
    pub pdf_version: u32,
}
impl Default for Export {
    fn default() -> Self {
        Self {
            max_image_resolution: 300,
            pdf_version: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Formats {
    /// Extra or replacement input filters, keyed by lowercase extension.
    #[serde(default)]
    pub input_filters: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_report_json: bool,
    pub report_suffix: String,
    pub print_summary: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: false,
            report_suffix: ".report.json".into(),
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub reject_url_inputs: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
        }
    }
}
