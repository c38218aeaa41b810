//! Provisioning run results

/// Result of one provisioning run
///
/// `state` is the engine's full serialized state, not a diff. An empty
/// `state` means there is nothing new to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningOutputs {
    /// Serialized terraform state
    pub state: Vec<u8>,
    /// Cloud provider discovery data
    pub cloud_discovery: Vec<u8>,
}

impl ProvisioningOutputs {
    /// Create outputs carrying only state
    pub fn new(state: impl Into<Vec<u8>>) -> Self {
        Self {
            state: state.into(),
            cloud_discovery: Vec::new(),
        }
    }

    /// Attach cloud discovery data
    #[must_use]
    pub fn with_cloud_discovery(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.cloud_discovery = data.into();
        self
    }

    /// Whether there is state worth persisting
    #[must_use]
    pub fn has_state(&self) -> bool {
        !self.state.is_empty()
    }
}

/// Outputs carrying state, or `None` for absent and empty ones
#[must_use]
pub fn with_state(outputs: Option<&ProvisioningOutputs>) -> Option<&ProvisioningOutputs> {
    outputs.filter(|o| o.has_state())
}
