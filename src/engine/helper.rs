//! Bridge to the engine through a helper script.
//!
//! The engine's native bridge lives in the helper (`scripts/uno_bridge.py`), which
//! connects once at startup and then serves line-delimited JSON requests on stdin,
//! answering each on stdout. One helper process backs one desktop handle; dropping
//! the handle kills the helper.

use super::types::{ConnectionDescriptor, HelperRequest, HelperResponse, PropertyValue};
use super::{Broker, Desktop, Document};
use crate::config::Config;
use crate::error::BridgeError;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

pub struct HelperBroker {
    python_exe: PathBuf,
    script: PathBuf,
    env: BTreeMap<String, String>,
    handshake_timeout: Duration,
    forward_stderr: bool,
}

impl HelperBroker {
    pub fn new(python_exe: PathBuf, script: PathBuf) -> Self {
        Self {
            python_exe,
            script,
            env: BTreeMap::new(),
            handshake_timeout: Duration::from_secs(10),
            forward_stderr: true,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            python_exe: resolve_python_exe(&cfg.bridge.python_exe),
            script: PathBuf::from(&cfg.bridge.script),
            env: cfg.bridge.env.clone(),
            handshake_timeout: Duration::from_secs(cfg.bridge.handshake_timeout_seconds.max(1)),
            forward_stderr: cfg.bridge.forward_stderr,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Extra environment for the helper process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn python_exe(&self) -> &Path {
        &self.python_exe
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    fn spawn(&self, descriptor: &ConnectionDescriptor) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(&self.script)
            .arg("--connect")
            .arg(descriptor.resolve_url())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.forward_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            });
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd.spawn()
    }
}

impl Broker for HelperBroker {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Option<Box<dyn Desktop>> {
        let mut child = match self.spawn(descriptor) {
            Ok(child) => child,
            Err(err) => {
                warn!("spawning bridge helper {}: {err}", self.script.display());
                return None;
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return None;
        };

        // The helper may hang inside the native resolver; read the handshake on a
        // side thread so the attempt stays bounded.
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            let read = reader.read_line(&mut line);
            let _ = tx.send((reader, line, read));
        });

        let (reader, line) = match rx.recv_timeout(self.handshake_timeout) {
            Ok((reader, line, Ok(n))) if n > 0 => (reader, line),
            Ok(_) => {
                debug!("bridge helper exited before handshake");
                reap(&mut child);
                return None;
            }
            Err(_) => {
                debug!("bridge helper handshake timed out after {:?}", self.handshake_timeout);
                reap(&mut child);
                return None;
            }
        };

        match serde_json::from_str::<HelperResponse>(line.trim()) {
            Ok(resp) if resp.ok => {
                debug!(pid = child.id(), "bridge helper connected to {descriptor}");
                let channel = HelperChannel {
                    child,
                    stdin,
                    stdout: reader,
                };
                Some(Box::new(HelperDesktop {
                    channel: Arc::new(Mutex::new(channel)),
                }) as Box<dyn Desktop>)
            }
            Ok(resp) => {
                debug!(
                    "bridge helper could not connect: {}",
                    resp.error.as_deref().unwrap_or("no reason given")
                );
                reap(&mut child);
                None
            }
            Err(err) => {
                warn!("bridge helper sent a malformed handshake: {err}");
                reap(&mut child);
                None
            }
        }
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

struct HelperChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl HelperChannel {
    fn call(&mut self, req: &HelperRequest) -> Result<HelperResponse, BridgeError> {
        let mut line = serde_json::to_string(req)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|err| match err.kind() {
                ErrorKind::BrokenPipe => BridgeError::Disconnected,
                _ => BridgeError::Io(err),
            })?;

        let mut buf = String::new();
        if self.stdout.read_line(&mut buf)? == 0 {
            return Err(BridgeError::Disconnected);
        }
        let resp: HelperResponse = serde_json::from_str(buf.trim())?;
        Ok(resp)
    }

    fn call_ok(&mut self, req: &HelperRequest) -> Result<HelperResponse, BridgeError> {
        let resp = self.call(req)?;
        if resp.ok {
            Ok(resp)
        } else {
            Err(BridgeError::Remote(
                resp.error.unwrap_or_else(|| "unspecified engine error".to_string()),
            ))
        }
    }
}

impl Drop for HelperChannel {
    fn drop(&mut self) {
        reap(&mut self.child);
    }
}

fn with_channel<T>(
    channel: &Mutex<HelperChannel>,
    f: impl FnOnce(&mut HelperChannel) -> Result<T, BridgeError>,
) -> Result<T, BridgeError> {
    let mut guard = channel.lock().map_err(|_| BridgeError::Disconnected)?;
    f(&mut guard)
}

struct HelperDesktop {
    channel: Arc<Mutex<HelperChannel>>,
}

impl Desktop for HelperDesktop {
    fn load_component(
        &mut self,
        url: &str,
        target: &str,
        props: &[PropertyValue],
    ) -> Result<Option<Box<dyn Document>>, BridgeError> {
        let req = HelperRequest::Load {
            url: url.to_string(),
            target: target.to_string(),
            props: props.to_vec(),
        };
        let resp = with_channel(&self.channel, |ch| ch.call(&req))?;
        if !resp.ok {
            return Err(BridgeError::Remote(
                resp.error.unwrap_or_else(|| "load failed".to_string()),
            ));
        }
        Ok(resp.doc.map(|doc| {
            Box::new(HelperDocument {
                channel: Arc::clone(&self.channel),
                doc,
            }) as Box<dyn Document>
        }))
    }

    fn terminate(&mut self) -> Result<(), BridgeError> {
        with_channel(&self.channel, |ch| ch.call_ok(&HelperRequest::Terminate)).map(|_| ())
    }
}

struct HelperDocument {
    channel: Arc<Mutex<HelperChannel>>,
    doc: u64,
}

impl Document for HelperDocument {
    fn supports_service(&mut self, service: &str) -> Result<bool, BridgeError> {
        let req = HelperRequest::Supports {
            doc: self.doc,
            service: service.to_string(),
        };
        let resp = with_channel(&self.channel, |ch| ch.call_ok(&req))?;
        resp.value
            .ok_or_else(|| BridgeError::Protocol("supports reply without value".to_string()))
    }

    fn refresh(&mut self) -> Result<(), BridgeError> {
        let req = HelperRequest::Refresh { doc: self.doc };
        with_channel(&self.channel, |ch| ch.call_ok(&req)).map(|_| ())
    }

    fn store_to_url(&mut self, url: &str, props: &[PropertyValue]) -> Result<(), BridgeError> {
        let req = HelperRequest::Store {
            doc: self.doc,
            url: url.to_string(),
            props: props.to_vec(),
        };
        with_channel(&self.channel, |ch| ch.call_ok(&req)).map(|_| ())
    }

    fn dispose(&mut self) -> Result<(), BridgeError> {
        let req = HelperRequest::Dispose { doc: self.doc };
        with_channel(&self.channel, |ch| ch.call_ok(&req)).map(|_| ())
    }

    fn close(&mut self, deliver_ownership: bool) -> Result<(), BridgeError> {
        let req = HelperRequest::Close {
            doc: self.doc,
            deliver_ownership,
        };
        with_channel(&self.channel, |ch| ch.call_ok(&req)).map(|_| ())
    }
}

/// Resolve the Python interpreter that runs the helper.
///
/// `auto` honours `OFFICE_PDF_PYTHON`, then falls back to `python3` on `PATH`.
pub fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("OFFICE_PDF_PYTHON") {
            let p = crate::util::expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return which::which("python3").unwrap_or_else(|_| PathBuf::from("python3"));
    }
    crate::util::expand_tilde(raw)
}
