use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::model::SharedModel;

/// Lifecycle phase of the service runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Starting = 0,
    WaitingForModel = 1,
    Ready = 2,
    Draining = 3,
    Stopped = 4,
    Failed = 5,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Starting,
            1 => Phase::WaitingForModel,
            2 => Phase::Ready,
            3 => Phase::Draining,
            4 => Phase::Stopped,
            _ => Phase::Failed,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Starting => "starting",
            Phase::WaitingForModel => "waiting-for-model",
            Phase::Ready => "ready",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Process-wide service state. The model slot is written once by the runtime
/// and read lock-free by the health handlers.
#[derive(Debug)]
pub struct ServiceState {
    port: u16,
    model: OnceLock<SharedModel>,
    phase: AtomicU8,
}

impl ServiceState {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            model: OnceLock::new(),
            phase: AtomicU8::new(Phase::Starting as u8),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn model(&self) -> Option<&SharedModel> {
        self.model.get()
    }

    /// Installs the loaded model. Returns the model back if one is already set.
    pub fn install_model(&self, model: SharedModel) -> Result<(), SharedModel> {
        self.model.set(model)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn transition(&self, next: Phase) {
        let prev = Phase::from_u8(self.phase.swap(next as u8, Ordering::AcqRel));
        info!("Lifecycle: {prev} -> {next} (port {})", self.port);
    }
}

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ServiceState>,
    pub service_name: &'static str,
    pub version: &'static str,
}

impl AppState {
    pub fn new(service: Arc<ServiceState>) -> Self {
        Self {
            service,
            service_name: crate::SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn model(name: &str) -> SharedModel {
        SharedModel::new(name, "3.7.1", vec!["ner".to_string()], HashSet::new())
    }

    #[test]
    fn test_new_state_not_ready() {
        let state = ServiceState::new(4312);
        assert_eq!(state.port(), 4312);
        assert!(state.model().is_none());
        assert_eq!(state.model().map(SharedModel::name), None);
        assert_eq!(state.phase(), Phase::Starting);
    }

    #[test]
    fn test_install_model_once() {
        let state = ServiceState::new(4312);
        assert!(state.install_model(model("en_core_web_sm")).is_ok());
        assert!(state.model().is_some());
        assert_eq!(state.model().map(SharedModel::name), Some("en_core_web_sm"));

        let rejected = state.install_model(model("en_core_web_lg")).unwrap_err();
        assert_eq!(rejected.name(), "en_core_web_lg");
        assert_eq!(state.model().map(SharedModel::name), Some("en_core_web_sm"));
    }

    #[test]
    fn test_phase_transitions() {
        let state = ServiceState::new(1);
        for phase in [
            Phase::WaitingForModel,
            Phase::Ready,
            Phase::Draining,
            Phase::Stopped,
        ] {
            state.transition(phase);
            assert_eq!(state.phase(), phase);
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::WaitingForModel.to_string(), "waiting-for-model");
        assert_eq!(Phase::Failed.to_string(), "failed");
    }
}
