use serde::{Deserialize, Serialize};
use std::fmt;

/// A named argument passed to the engine's load and store calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub name: String,
    pub value: serde_json::Value,
}

impl PropertyValue {
    pub fn new(name: &str, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// Look up a property by name.
pub fn find_property<'a>(props: &'a [PropertyValue], name: &str) -> Option<&'a serde_json::Value> {
    props.iter().find(|p| p.name == name).map(|p| &p.value)
}

/// Where the engine listens for bridge connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

impl ConnectionDescriptor {
    pub fn new(host: &str, port: u16, protocol: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            protocol: protocol.to_string(),
        }
    }

    /// Value for the engine's `--accept=` flag.
    pub fn accept_string(&self) -> String {
        format!("socket,host={},port={};{}", self.host, self.port, self.protocol)
    }

    /// URL handed to the bridge resolver.
    pub fn resolve_url(&self) -> String {
        format!("uno:{}", self.accept_string())
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.accept_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(Option<i32>),
}

/// One line sent to the bridge helper.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HelperRequest {
    Load {
        url: String,
        target: String,
        props: Vec<PropertyValue>,
    },
    Supports {
        doc: u64,
        service: String,
    },
    Refresh {
        doc: u64,
    },
    Store {
        doc: u64,
        url: String,
        props: Vec<PropertyValue>,
    },
    Dispose {
        doc: u64,
    },
    Close {
        doc: u64,
        deliver_ownership: bool,
    },
    Terminate,
}

/// One line received from the bridge helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperResponse {
    pub ok: bool,
    #[serde(default)]
    pub doc: Option<u64>,
    #[serde(default)]
    pub value: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}
