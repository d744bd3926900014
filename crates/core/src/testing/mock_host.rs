//! Mock host network for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::tunnel::{HostCommand, HostError, HostNetwork};

#[derive(Debug, Default)]
struct HostState {
    commands: Vec<String>,
    failures: Vec<(String, HostError)>,
    failing_probes: HashSet<String>,
    probes: usize,
}

/// Mock implementation of the HostNetwork trait.
///
/// Records every command instead of running it:
/// - Commands are recorded as their display string (`ip link add dev bw0 ...`)
/// - `fail_matching` makes every command containing a pattern fail
/// - Probes succeed unless failure was requested for the interface
///
/// # Example
///
/// ```rust,ignore
/// use burrow_core::testing::MockHostNetwork;
///
/// let host = MockHostNetwork::new();
/// host.fail_matching("rule add", HostError::Io("boom".into()));
///
/// plan.apply(&host).await.unwrap_err();
/// assert!(host.recorded_commands().iter().any(|c| c == "ip link del dev bw0"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockHostNetwork {
    state: Arc<Mutex<HostState>>,
}

impl MockHostNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every command run so far, in order.
    pub fn recorded_commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_recorded(&self) {
        self.state().commands.clear();
    }

    /// Commands containing `pattern` fail with `error` until cleared.
    pub fn fail_matching(&self, pattern: &str, error: HostError) {
        self.state().failures.push((pattern.to_string(), error));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Makes probes through `interface` fail (or succeed again).
    pub fn set_probe_failure(&self, interface: &str, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_probes.insert(interface.to_string());
        } else {
            state.failing_probes.remove(interface);
        }
    }

    pub fn probe_count(&self) -> usize {
        self.state().probes
    }
}

#[async_trait]
impl HostNetwork for MockHostNetwork {
    async fn run(&self, command: &HostCommand) -> Result<(), HostError> {
        let line = command.to_string();
        let mut state = self.state();
        state.commands.push(line.clone());
        match state
            .failures
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
        {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn probe(
        &self,
        interface: &str,
        _source: IpAddr,
        target: SocketAddr,
        _timeout: Duration,
    ) -> Result<(), HostError> {
        let mut state = self.state();
        state.probes += 1;
        if state.failing_probes.contains(interface) {
            return Err(HostError::ProbeFailed {
                interface: interface.to_string(),
                target: target.to_string(),
                reason: "mock probe failure".to_string(),
            });
        }
        Ok(())
    }
}
