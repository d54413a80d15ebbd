use super::types::{ConnectionDescriptor, ProcessStatus};
use crate::error::ConversionError;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info};

/// Flags that keep the engine from showing UI, wizards or crash dialogs.
pub const HEADLESS_FLAGS: &[&str] = &[
    "--nologo",
    "--headless",
    "--nocrashreport",
    "--nodefault",
    "--nofirststartwizard",
    "--norestore",
    "--invisible",
];

/// Starts engine processes.
pub trait Launcher: Send + Sync {
    fn launch(&self, descriptor: &ConnectionDescriptor)
        -> Result<Box<dyn EngineProcess>, ConversionError>;
}

/// A running (or exited) engine process.
pub trait EngineProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking status check; reaps the child once it has exited.
    fn status(&mut self) -> std::io::Result<ProcessStatus>;

    /// Kill and wait.
    fn kill(&mut self) -> std::io::Result<()>;
}

pub struct SofficeLauncher {
    exe: PathBuf,
    extra_args: Vec<String>,
}

impl SofficeLauncher {
    pub fn new(exe: PathBuf, extra_args: Vec<String>) -> Self {
        Self { exe, extra_args }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub fn args(&self, descriptor: &ConnectionDescriptor) -> Vec<String> {
        let mut args: Vec<String> = HEADLESS_FLAGS.iter().map(|s| s.to_string()).collect();
        args.extend(self.extra_args.iter().cloned());
        args.push(format!("--accept={}", descriptor.accept_string()));
        args
    }
}

impl Launcher for SofficeLauncher {
    fn launch(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn EngineProcess>, ConversionError> {
        let args = self.args(descriptor);
        debug!("engine command {} {:?}", self.exe.display(), args);
        let child = Command::new(&self.exe)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ConversionError::Launch {
                command: self.exe.display().to_string(),
                source,
            })?;
        info!(pid = child.id(), accept = %descriptor, "started headless engine");
        Ok(Box::new(SofficeProcess { child }))
    }
}

pub struct SofficeProcess {
    child: Child,
}

impl EngineProcess for SofficeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn status(&mut self) -> std::io::Result<ProcessStatus> {
        Ok(match self.child.try_wait()? {
            Some(status) => ProcessStatus::Exited(status.code()),
            None => ProcessStatus::Running,
        })
    }

    fn kill(&mut self) -> std::io::Result<()> {
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
        }
        self.child.wait()?;
        Ok(())
    }
}

/// Resolve the engine executable. `auto` searches `PATH` for `soffice`, then `libreoffice`.
pub fn resolve_soffice_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        for name in ["soffice", "libreoffice"] {
            if let Ok(path) = which::which(name) {
                return path;
            }
        }
        return PathBuf::from("soffice");
    }
    crate::util::expand_tilde(raw)
}
