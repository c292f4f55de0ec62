//! Diagnostics capability handed to orchestrators at construction.
//!
//! Orchestrators never reach for a global logger; they report through a
//! `&dyn Diagnostics` chosen by the caller. `TracingDiagnostics` is the usual
//! choice in services, `MemoryDiagnostics` when the events should travel with
//! a job result.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
}

/// One recorded diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub level: DiagnosticLevel,
    pub component: String,
    pub message: String,
}

/// Sink for engine diagnostics.
pub trait Diagnostics: Send + Sync {
    fn emit(&self, level: DiagnosticLevel, component: &str, message: &str);

    fn debug(&self, component: &str, message: &str) {
        self.emit(DiagnosticLevel::Debug, component, message);
    }

    fn info(&self, component: &str, message: &str) {
        self.emit(DiagnosticLevel::Info, component, message);
    }

    fn warn(&self, component: &str, message: &str) {
        self.emit(DiagnosticLevel::Warn, component, message);
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn emit(&self, level: DiagnosticLevel, component: &str, message: &str) {
        match level {
            DiagnosticLevel::Debug => tracing::debug!(component, "{message}"),
            DiagnosticLevel::Info => tracing::info!(component, "{message}"),
            DiagnosticLevel::Warn => tracing::warn!(component, "{message}"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    fn emit(&self, _level: DiagnosticLevel, _component: &str, _message: &str) {}
}

/// Keeps events in memory, optionally dropping those below `min_level`.
#[derive(Debug)]
pub struct MemoryDiagnostics {
    min_level: DiagnosticLevel,
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemoryDiagnostics {
    pub fn new(min_level: DiagnosticLevel) -> Self {
        Self {
            min_level,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.events().iter().any(|e| e.message.contains(needle))
    }
}

impl Default for MemoryDiagnostics {
    fn default() -> Self {
        Self::new(DiagnosticLevel::Debug)
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn emit(&self, level: DiagnosticLevel, component: &str, message: &str) {
        if level < self.min_level {
            return;
        }
        let event = DiagnosticEvent {
            level,
            component: component.to_string(),
            message: message.to_string(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
