//! Effects collaborator - supplies the booster and equalizer nodes
//!
//! DSP lives outside this crate. The engine only asks for the current nodes
//! and listens for changes of the equalizer type.

use super::node::ProcessingNode;
use crate::events::Event;
use std::sync::Arc;

/// Emitted when the active equalizer set changes shape
#[derive(Clone)]
pub struct EqualizerTypeChanged {
    /// The chain to wire in, in signal order
    pub nodes: Vec<Arc<dyn ProcessingNode>>,
}

pub trait Effects: Send + Sync {
    /// The always-present volume booster
    fn booster(&self) -> Arc<dyn ProcessingNode>;

    /// Equalizer nodes of the currently selected type, in signal order
    fn active_equalizers(&self) -> Vec<Arc<dyn ProcessingNode>>;

    fn type_changed(&self) -> &Event<EqualizerTypeChanged>;
}
