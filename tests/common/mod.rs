#![allow(dead_code)]

use office_pdf::BridgeError;
use office_pdf::config::Export;
use office_pdf::engine::process::{EngineProcess, Launcher};
use office_pdf::engine::types::find_property;
use office_pdf::engine::{Broker, ConnectionDescriptor, Desktop, Document, ProcessStatus, PropertyValue};
use office_pdf::executor::Executor;
use office_pdf::resolver::FilterTable;
use office_pdf::supervisor::{Connection, RetryPolicy, Supervisor};
use office_pdf::worker::Worker;
use office_pdf::ConversionError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const GENERIC_TEXT: &str = "com.sun.star.text.GenericTextDocument";
pub const WEB: &str = "com.sun.star.text.WebDocument";
pub const SPREADSHEET: &str = "com.sun.star.sheet.SpreadsheetDocument";

/// Shared, inspectable state of a scripted engine.
#[derive(Default)]
pub struct EngineState {
    /// Input filters the engine will load documents with.
    pub accepted_filters: Mutex<Vec<String>>,
    /// Capabilities reported by every loaded document.
    pub services: Mutex<Vec<String>>,
    /// Export takes this long; killing the engine interrupts it.
    pub export_delay: Mutex<Option<Duration>>,
    /// First N connection attempts fail.
    pub failing_connects: AtomicU32,
    pub fail_terminate: AtomicBool,
    /// Desktop terminate blocks this long.
    pub terminate_delay: Mutex<Option<Duration>>,
    pub launches: AtomicUsize,
    pub kills: AtomicUsize,
    pub connects: AtomicU32,
    pub terminates: AtomicUsize,
    pub disposed: AtomicUsize,
    pub closed: AtomicUsize,
    pub loads: Mutex<Vec<String>>,
    pub exports: Mutex<Vec<Vec<PropertyValue>>>,
    pub open_props: Mutex<Vec<Vec<PropertyValue>>>,
    /// Documents loaded and not yet closed.
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    /// Process status polls that landed while a document was open.
    pub polls_during_job: AtomicUsize,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl EngineState {
    /// Alive flag of the most recently launched process; true when none was launched.
    pub fn engine_alive(&self) -> bool {
        match &*self.current.lock().unwrap() {
            Some(alive) => alive.load(Ordering::SeqCst),
            None => true,
        }
    }

    /// Make the current engine process exit on its own.
    pub fn crash(&self) {
        if let Some(alive) = &*self.current.lock().unwrap() {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
pub struct FakeEngine {
    pub state: Arc<EngineState>,
}

impl FakeEngine {
    pub fn new(accepted_filters: &[&str], services: &[&str]) -> Self {
        let state = EngineState::default();
        *state.accepted_filters.lock().unwrap() =
            accepted_filters.iter().map(|s| s.to_string()).collect();
        *state.services.lock().unwrap() = services.iter().map(|s| s.to_string()).collect();
        Self {
            state: Arc::new(state),
        }
    }

    /// A Word engine: accepts the OOXML filter and reports a text document.
    pub fn text_document() -> Self {
        Self::new(&["MS Word 2007 XML"], &[GENERIC_TEXT])
    }

    pub fn set_export_delay(&self, delay: Option<Duration>) {
        *self.state.export_delay.lock().unwrap() = delay;
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn supervisor(&self) -> Supervisor {
        self.supervisor_with(fast_policy())
    }

    pub fn supervisor_with(&self, policy: RetryPolicy) -> Supervisor {
        Supervisor::new(
            Arc::new(FakeLauncher {
                state: Arc::clone(&self.state),
            }),
            Arc::new(FakeBroker {
                state: Arc::clone(&self.state),
            }),
            ConnectionDescriptor::new("localhost", 6519, "urp;StarOffice.ComponentContext"),
            policy,
        )
    }

    pub fn worker(&self) -> Worker {
        Worker::new(self.supervisor(), Executor::new(FilterTable::default(), Export::default()))
    }

    /// A connection that bypasses the supervisor.
    pub fn connection(&self, generation: u64) -> Connection {
        Connection::new(
            generation,
            Box::new(FakeDesktop {
                state: Arc::clone(&self.state),
            }),
        )
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        backoff: Duration::from_millis(5),
        max_attempts: 5,
    }
}

pub struct FakeLauncher {
    state: Arc<EngineState>,
}

impl Launcher for FakeLauncher {
    fn launch(
        &self,
        _descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn EngineProcess>, ConversionError> {
        let n = self.state.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));
        *self.state.current.lock().unwrap() = Some(Arc::clone(&alive));
        Ok(Box::new(FakeProcess {
            pid: 1000 + n as u32,
            alive,
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeProcess {
    pid: u32,
    alive: Arc<AtomicBool>,
    state: Arc<EngineState>,
}

impl EngineProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn status(&mut self) -> std::io::Result<ProcessStatus> {
        if self.state.in_flight.load(Ordering::SeqCst) > 0 {
            self.state.polls_during_job.fetch_add(1, Ordering::SeqCst);
        }
        Ok(if self.alive.load(Ordering::SeqCst) {
            ProcessStatus::Running
        } else {
            ProcessStatus::Exited(Some(1))
        })
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeBroker {
    state: Arc<EngineState>,
}

impl Broker for FakeBroker {
    fn connect(&self, _descriptor: &ConnectionDescriptor) -> Option<Box<dyn Desktop>> {
        let n = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.state.failing_connects.load(Ordering::SeqCst) || !self.state.engine_alive() {
            return None;
        }
        Some(Box::new(FakeDesktop {
            state: Arc::clone(&self.state),
        }) as Box<dyn Desktop>)
    }
}

pub struct FakeDesktop {
    state: Arc<EngineState>,
}

impl Desktop for FakeDesktop {
    fn load_component(
        &mut self,
        _url: &str,
        target: &str,
        props: &[PropertyValue],
    ) -> Result<Option<Box<dyn Document>>, BridgeError> {
        if !self.state.engine_alive() {
            return Err(BridgeError::Disconnected);
        }
        assert_eq!(target, "_blank");
        self.state.open_props.lock().unwrap().push(props.to_vec());
        let filter = find_property(props, "FilterName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.state.loads.lock().unwrap().push(filter.clone());
        if self.state.accepted_filters.lock().unwrap().contains(&filter) {
            let open = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.peak_in_flight.fetch_max(open, Ordering::SeqCst);
            Ok(Some(Box::new(FakeDocument {
                state: Arc::clone(&self.state),
            }) as Box<dyn Document>))
        } else {
            Ok(None)
        }
    }

    fn terminate(&mut self) -> Result<(), BridgeError> {
        self.state.terminates.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.terminate_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.state.fail_terminate.load(Ordering::SeqCst) {
            return Err(BridgeError::Remote("DisposedException".to_string()));
        }
        Ok(())
    }
}

pub struct FakeDocument {
    state: Arc<EngineState>,
}

impl Document for FakeDocument {
    fn supports_service(&mut self, service: &str) -> Result<bool, BridgeError> {
        Ok(self.state.services.lock().unwrap().iter().any(|s| s == service))
    }

    fn store_to_url(&mut self, url: &str, props: &[PropertyValue]) -> Result<(), BridgeError> {
        self.state.exports.lock().unwrap().push(props.to_vec());
        let delay = *self.state.export_delay.lock().unwrap();
        if let Some(delay) = delay {
            let until = Instant::now() + delay;
            while Instant::now() < until {
                if !self.state.engine_alive() {
                    return Err(BridgeError::Disconnected);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if !self.state.engine_alive() {
            return Err(BridgeError::Disconnected);
        }
        let path = url_to_path(url);
        std::fs::write(&path, b"%PDF-1.4\n% fake engine output\n%%EOF\n")?;
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), BridgeError> {
        self.state.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self, deliver_ownership: bool) -> Result<(), BridgeError> {
        assert!(deliver_ownership);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn url_to_path(url: &str) -> PathBuf {
    let raw = url.strip_prefix("file://").expect("file url");
    let decoded = percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .expect("utf8 path");
    PathBuf::from(decoded.into_owned())
}
