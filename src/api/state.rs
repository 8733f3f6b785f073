//! API shared state

use crate::protocol::ControlProtocol;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Control protocol (also gives access to the broadcaster)
    pub protocol: ControlProtocol,
}

impl ApiState {
    pub fn new(protocol: ControlProtocol) -> Self {
        Self { protocol }
    }
}
