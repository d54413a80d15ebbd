pub mod helper;
pub mod process;
pub mod types;

use crate::error::BridgeError;

pub use types::{ConnectionDescriptor, ProcessStatus, PropertyValue};

/// Resolves a connection descriptor to the engine's desktop object.
///
/// A single attempt: any failure is `None`, retrying is the supervisor's job.
pub trait Broker: Send + Sync {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Option<Box<dyn Desktop>>;
}

/// The engine's top-level desktop object.
pub trait Desktop: Send {
    /// Load a document. `Ok(None)` means the engine declined it with these properties.
    fn load_component(
        &mut self,
        url: &str,
        target: &str,
        props: &[PropertyValue],
    ) -> Result<Option<Box<dyn Document>>, BridgeError>;

    /// Ask the engine to shut down cleanly.
    fn terminate(&mut self) -> Result<(), BridgeError>;
}

/// A document loaded in the engine.
pub trait Document: Send {
    fn supports_service(&mut self, service: &str) -> Result<bool, BridgeError>;

    fn refresh(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn store_to_url(&mut self, url: &str, props: &[PropertyValue]) -> Result<(), BridgeError>;

    fn dispose(&mut self) -> Result<(), BridgeError>;

    fn close(&mut self, deliver_ownership: bool) -> Result<(), BridgeError>;
}
