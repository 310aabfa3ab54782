//! Audit event publishing.
//!
//! Publishing is fire-and-forget from the orchestrator's point of view: a
//! failed publish is logged and the command's outcome stands.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::logging::AUDIT_TARGET;
use crate::types::{ExecutionEvent, ExecutionEventType};

/// Why an event could not be recorded.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The sink could not be written.
    #[error("event sink write failed: {0}")]
    Io(#[from] std::io::Error),
    /// The event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The sink's lock was poisoned.
    #[error("event sink lock poisoned: {0}")]
    Lock(String),
}

/// Destination for execution events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record one event.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the sink rejects the event.
    async fn publish(&self, event: &ExecutionEvent) -> Result<(), PublishError>;
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Emits each event as a structured `tracing` record under
/// [`AUDIT_TARGET`], which the production subscriber routes to the audit log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: &ExecutionEvent) -> Result<(), PublishError> {
        info!(
            target: AUDIT_TARGET,
            event_id = %event.event_id,
            event_type = %event.event_type,
            command_id = %event.command_id,
            tenant_id = %event.tenant_id,
            lead_id = %event.lead_id,
            action_type = %event.action_type,
            correlation_id = %event.correlation_id,
            adapter = event.adapter.as_deref().unwrap_or("none"),
            details = %event.details,
            "execution event"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Appends one JSON object per event to a writer.
pub struct JsonlEventPublisher {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonlEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlEventPublisher").finish_non_exhaustive()
    }
}

impl JsonlEventPublisher {
    /// Append to the file at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Io`] if the file cannot be opened.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PublishError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Write to an arbitrary sink (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl EventPublisher for JsonlEventPublisher {
    async fn publish(&self, event: &ExecutionEvent) -> Result<(), PublishError> {
        let line = serde_json::to_string(event)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| PublishError::Lock(e.to_string()))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps every event in memory, for hosts that inspect the trail in-process.
#[derive(Debug, Default)]
pub struct MemoryEventPublisher {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl MemoryEventPublisher {
    /// Create an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event published so far.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Events of one type, in publish order.
    pub fn of_type(&self, event_type: ExecutionEventType) -> Vec<ExecutionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Events belonging to one command, in publish order.
    pub fn for_command(&self, command_id: &str) -> Vec<ExecutionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.command_id == command_id)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    async fn publish(&self, event: &ExecutionEvent) -> Result<(), PublishError> {
        self.events
            .lock()
            .map_err(|e| PublishError::Lock(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}
