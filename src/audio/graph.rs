//! Signal Graph - input → booster → effect chain → output mixer
//!
//! Owns the wiring inside the audio runtime and the render tap registration.
//! Topology changes happen only on the control context; the runtime's render
//! thread never sees a half-wired chain because rewiring requires `Stopped`.

use super::node::{NodeHandle, ProcessingNode};
use super::runtime::AudioRuntime;
use crate::capture::RenderObserver;
use crate::driver::AudioObjectId;
use crate::error::{EngineError, EngineResult};
use crate::format::AudioFormat;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of the signal graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphState {
    Unconfigured,
    Built,
    Running,
    Stopped,
    Rebuilding,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphState::Unconfigured => "unconfigured",
            GraphState::Built => "built",
            GraphState::Running => "running",
            GraphState::Stopped => "stopped",
            GraphState::Rebuilding => "rebuilding",
        };
        f.write_str(name)
    }
}

/// Ordered, non-empty list of effect nodes
#[derive(Clone)]
pub struct SignalChain {
    nodes: Vec<Arc<dyn ProcessingNode>>,
}

impl SignalChain {
    /// Fails with `EmptyChain` when `nodes` is empty
    pub fn new(nodes: Vec<Arc<dyn ProcessingNode>>) -> EngineResult<Self> {
        if nodes.is_empty() {
            return Err(EngineError::EmptyChain);
        }
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn handles(&self) -> Vec<NodeHandle> {
        self.nodes.iter().map(|n| n.handle()).collect()
    }

    /// Node whose output reaches the mixer
    pub fn last(&self) -> NodeHandle {
        // non-empty by construction
        self.nodes[self.nodes.len() - 1].handle()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProcessingNode>> {
        self.nodes.iter()
    }
}

impl fmt::Debug for SignalChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handles()).finish()
    }
}

/// Signal graph driving an [`AudioRuntime`]
pub struct SignalGraph {
    runtime: Box<dyn AudioRuntime>,
    format: AudioFormat,
    booster: Option<Arc<dyn ProcessingNode>>,
    chain: Option<SignalChain>,
    /// Kept across rebuilds so it can be reinstalled on the new last node
    tap: Option<Arc<dyn RenderObserver>>,
    /// Node the tap is currently registered on
    tap_node: Option<NodeHandle>,
    state: GraphState,
}

impl SignalGraph {
    pub fn new(runtime: Box<dyn AudioRuntime>, format: AudioFormat) -> Self {
        Self {
            runtime,
            format,
            booster: None,
            chain: None,
            tap: None,
            tap_node: None,
            state: GraphState::Unconfigured,
        }
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Effect node handles in signal order
    pub fn chain(&self) -> Vec<NodeHandle> {
        self.chain
            .as_ref()
            .map(SignalChain::handles)
            .unwrap_or_default()
    }

    pub fn booster(&self) -> Option<NodeHandle> {
        self.booster.as_ref().map(|b| b.handle())
    }

    /// Node currently carrying the render tap
    pub fn tap_node(&self) -> Option<NodeHandle> {
        self.tap_node
    }

    pub fn set_input_device(&mut self, device: AudioObjectId) -> EngineResult<()> {
        self.runtime
            .set_input_device(device)
            .map_err(|status| EngineError::Runtime {
                op: "set input device",
                status,
            })
    }

    pub fn set_output_volume(&mut self, volume: f32) {
        self.runtime.set_output_volume(volume);
    }

    /// Wire input → booster → nodes[0] → … → nodes[n-1] → output mixer
    pub fn construct(
        &mut self,
        booster: Arc<dyn ProcessingNode>,
        nodes: Vec<Arc<dyn ProcessingNode>>,
    ) -> EngineResult<()> {
        if self.state != GraphState::Unconfigured {
            return Err(EngineError::InvalidState {
                op: "construct",
                state: self.state,
            });
        }

        let chain = SignalChain::new(nodes)?;
        self.check_format(booster.as_ref())?;
        for node in chain.iter() {
            self.check_format(node.as_ref())?;
        }
        self.check_handles(booster.handle(), &chain)?;

        if let Err(status) = self.runtime.attach(booster.clone()) {
            return Err(EngineError::Runtime {
                op: "attach booster",
                status,
            });
        }
        self.booster = Some(booster);
        if let Err(e) = self.install_chain(chain) {
            self.release_nodes();
            return Err(e);
        }

        self.state = GraphState::Built;
        info!(
            nodes = self.chain().len(),
            "[SignalGraph] Constructed chain {:?}",
            self.chain()
        );
        Ok(())
    }

    /// Register a post-render observer on the last chain node
    ///
    /// On failure the observer is still remembered and the graph stays
    /// usable; a later rebuild tries to install it again.
    pub fn attach_render_tap(&mut self, observer: Arc<dyn RenderObserver>) -> EngineResult<()> {
        if self.chain.is_none() {
            return Err(EngineError::InvalidState {
                op: "attach render tap",
                state: self.state,
            });
        }
        self.remove_tap_registration();
        self.tap = Some(observer);
        self.install_tap()
    }

    /// Unregister and forget the render tap
    pub fn detach_render_tap(&mut self) {
        self.remove_tap_registration();
        self.tap = None;
    }

    /// Start rendering. No-op when already running.
    pub fn start(&mut self) -> EngineResult<()> {
        match self.state {
            GraphState::Running => Ok(()),
            GraphState::Built | GraphState::Stopped => {
                self.runtime.prepare();
                self.runtime
                    .start()
                    .map_err(|status| EngineError::Runtime { op: "start", status })?;
                self.state = GraphState::Running;
                debug!("[SignalGraph] Started");
                Ok(())
            }
            state => Err(EngineError::InvalidState { op: "start", state }),
        }
    }

    /// Halt rendering without tearing anything down
    ///
    /// No-op when nothing is running. A built graph that was never started
    /// moves to `Stopped` so it can be rebuilt.
    pub fn stop(&mut self) {
        match self.state {
            GraphState::Running => {
                self.runtime.stop();
                self.state = GraphState::Stopped;
                debug!("[SignalGraph] Stopped");
            }
            GraphState::Built => self.state = GraphState::Stopped,
            _ => {}
        }
    }

    /// Replace the effect nodes of a stopped graph
    ///
    /// The old nodes are detached but not destroyed; ownership stays with
    /// the caller. The render tap moves to the new last node.
    ///
    /// Everything checkable up front (empty chain, formats, duplicate
    /// handles) is checked before the old chain is touched. If the runtime
    /// then refuses the new nodes, the previous chain is wired back and the
    /// graph stays `Stopped`; if even that fails the graph is released and
    /// left `Unconfigured`, so it cannot be started half-wired.
    /// A tap reinstall failure leaves the graph `Built` and is returned as
    /// `RenderTapInstall`.
    pub fn rebuild_chain(&mut self, nodes: Vec<Arc<dyn ProcessingNode>>) -> EngineResult<()> {
        if self.state != GraphState::Stopped {
            return Err(EngineError::InvalidState {
                op: "rebuild",
                state: self.state,
            });
        }
        let chain = SignalChain::new(nodes)?;
        for node in chain.iter() {
            self.check_format(node.as_ref())?;
        }
        if let Some(booster) = self.booster() {
            self.check_handles(booster, &chain)?;
        }

        self.state = GraphState::Rebuilding;
        let previous = self.chain.take();
        let old = previous.as_ref().map_or(0, SignalChain::len);

        self.remove_tap_registration();
        if let Some(booster) = &self.booster {
            self.runtime.disconnect_output(booster.handle());
        }
        if let Some(previous) = &previous {
            for node in previous.iter() {
                self.runtime.disconnect_output(node.handle());
                self.runtime.detach(node.handle());
            }
        }

        if let Err(e) = self.install_chain(chain) {
            error!("[SignalGraph] Rebuild failed: {}", e);
            self.restore(previous);
            return Err(e);
        }

        self.state = GraphState::Built;
        info!(
            old,
            new = self.chain().len(),
            "[SignalGraph] Rebuilt chain {:?}",
            self.chain()
        );

        if self.tap.is_some() {
            self.install_tap()?;
        }
        Ok(())
    }

    /// Stop, unregister the tap and detach every node
    pub fn teardown(&mut self) {
        if self.state == GraphState::Unconfigured {
            return;
        }
        self.stop();
        self.detach_render_tap();
        self.release_nodes();
        self.state = GraphState::Unconfigured;
        debug!("[SignalGraph] Torn down");
    }

    fn check_format(&self, node: &dyn ProcessingNode) -> EngineResult<()> {
        let found = node.format();
        if found.is_compatible(&self.format) {
            Ok(())
        } else {
            Err(EngineError::FormatMismatch {
                node: node.label().to_string(),
                expected: self.format,
                found,
            })
        }
    }

    /// Every handle must be distinct from the others and from the
    /// runtime's input node and output mixer
    fn check_handles(&self, booster: NodeHandle, chain: &SignalChain) -> EngineResult<()> {
        let mut seen = HashSet::with_capacity(chain.len() + 3);
        seen.insert(self.runtime.input_node());
        seen.insert(self.runtime.output_mixer());
        for handle in std::iter::once(booster).chain(chain.handles()) {
            if !seen.insert(handle) {
                return Err(EngineError::DuplicateNode(handle));
            }
        }
        Ok(())
    }

    fn attach_chain(&mut self, chain: &SignalChain) -> EngineResult<()> {
        let mut attached = Vec::with_capacity(chain.len());
        for node in chain.iter() {
            if let Err(status) = self.runtime.attach(node.clone()) {
                for handle in attached {
                    self.runtime.detach(handle);
                }
                return Err(EngineError::Runtime {
                    op: "attach node",
                    status,
                });
            }
            attached.push(node.handle());
        }
        Ok(())
    }

    /// Attach and wire `chain` behind the booster
    ///
    /// On failure nothing of `chain` is left in the runtime.
    fn install_chain(&mut self, chain: SignalChain) -> EngineResult<()> {
        self.attach_chain(&chain)?;
        self.chain = Some(chain);
        if let Err(e) = self.wire() {
            if let Some(chain) = self.chain.take() {
                for node in chain.iter() {
                    self.runtime.detach(node.handle());
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Put the chain from before a failed rebuild back in place
    fn restore(&mut self, previous: Option<SignalChain>) {
        let restored = match previous {
            Some(previous) => self.install_chain(previous),
            None => Err(EngineError::EmptyChain),
        };
        match restored {
            Ok(()) => {
                self.state = GraphState::Stopped;
                warn!("[SignalGraph] Previous chain restored {:?}", self.chain());
                if self.tap.is_some() {
                    let _ = self.install_tap();
                }
            }
            Err(e) => {
                error!("[SignalGraph] Could not restore previous chain: {}", e);
                self.detach_render_tap();
                self.release_nodes();
                self.state = GraphState::Unconfigured;
            }
        }
    }

    /// Full connection sequence for the current booster and chain
    fn wire(&mut self) -> EngineResult<()> {
        let (Some(booster), Some(chain)) = (&self.booster, &self.chain) else {
            return Ok(());
        };

        let mut sequence = Vec::with_capacity(chain.len() + 3);
        sequence.push(self.runtime.input_node());
        sequence.push(booster.handle());
        sequence.extend(chain.handles());
        sequence.push(self.runtime.output_mixer());

        for pair in sequence.windows(2) {
            self.runtime
                .connect(pair[0], pair[1], &self.format)
                .map_err(|status| EngineError::Runtime {
                    op: "connect",
                    status,
                })?;
        }
        Ok(())
    }

    fn install_tap(&mut self) -> EngineResult<()> {
        let (Some(observer), Some(chain)) = (&self.tap, &self.chain) else {
            return Ok(());
        };
        let last = chain.last();
        match self.runtime.add_render_notify(last, observer.clone()) {
            Ok(()) => {
                self.tap_node = Some(last);
                debug!(node = last.raw(), "[SignalGraph] Render tap installed");
                Ok(())
            }
            Err(status) => {
                warn!(
                    node = last.raw(),
                    "[SignalGraph] Render tap install failed: {}", status
                );
                Err(EngineError::RenderTapInstall(status))
            }
        }
    }

    fn remove_tap_registration(&mut self) {
        if let Some(node) = self.tap_node.take() {
            self.runtime.remove_render_notify(node);
        }
    }

    fn release_nodes(&mut self) {
        if let Some(chain) = self.chain.take() {
            for node in chain.iter() {
                self.runtime.detach(node.handle());
            }
        }
        if let Some(booster) = self.booster.take() {
            self.runtime.detach(booster.handle());
        }
    }
}

impl Drop for SignalGraph {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::offline::{OfflineRuntime, INPUT_NODE, OUTPUT_MIXER};
    use crate::capture::{RenderTap, RingBuffer};
    use crate::format::SampleFormat;

    struct Stage {
        handle: NodeHandle,
        format: AudioFormat,
    }

    impl ProcessingNode for Stage {
        fn handle(&self) -> NodeHandle {
            self.handle
        }

        fn label(&self) -> &str {
            "stage"
        }

        fn format(&self) -> AudioFormat {
            self.format
        }
    }

    fn stage(id: u32) -> Arc<dyn ProcessingNode> {
        Arc::new(Stage {
            handle: NodeHandle::new(id),
            format: AudioFormat::STANDARD,
        })
    }

    fn setup() -> (SignalGraph, OfflineRuntime) {
        let runtime = OfflineRuntime::new(2);
        let graph = SignalGraph::new(Box::new(runtime.clone()), AudioFormat::STANDARD);
        (graph, runtime)
    }

    #[test]
    fn test_construct_wires_in_order() {
        let (mut graph, runtime) = setup();
        graph
            .construct(stage(100), vec![stage(1), stage(2), stage(3)])
            .unwrap();

        assert_eq!(graph.state(), GraphState::Built);
        assert_eq!(
            runtime.chain_from_input(),
            vec![
                INPUT_NODE,
                NodeHandle::new(100),
                NodeHandle::new(1),
                NodeHandle::new(2),
                NodeHandle::new(3),
                OUTPUT_MIXER
            ]
        );
    }

    #[test]
    fn test_construct_empty_chain() {
        let (mut graph, runtime) = setup();
        let err = graph.construct(stage(100), vec![]).unwrap_err();

        assert!(matches!(err, EngineError::EmptyChain));
        assert_eq!(graph.state(), GraphState::Unconfigured);
        assert_eq!(runtime.attached_count(), 0);
    }

    #[test]
    fn test_construct_format_mismatch() {
        let (mut graph, runtime) = setup();
        let mono = Arc::new(Stage {
            handle: NodeHandle::new(2),
            format: AudioFormat {
                sample_rate: 44_100.0,
                channels: 1,
                sample_format: SampleFormat::F32,
                interleaved: false,
            },
        });

        let err = graph
            .construct(stage(100), vec![stage(1), mono])
            .unwrap_err();
        assert!(matches!(err, EngineError::FormatMismatch { .. }));
        assert_eq!(runtime.attached_count(), 0);
    }

    #[test]
    fn test_construct_rejects_repeated_handle() {
        let (mut graph, runtime) = setup();
        let err = graph
            .construct(stage(100), vec![stage(1), stage(2), stage(1)])
            .unwrap_err();

        assert!(matches!(err, EngineError::DuplicateNode(h) if h == NodeHandle::new(1)));
        assert_eq!(graph.state(), GraphState::Unconfigured);
        assert_eq!(runtime.attached_count(), 0);
        assert!(runtime.connections().is_empty());
    }

    #[test]
    fn test_construct_rejects_aliased_booster_and_endpoints() {
        let (mut graph, _runtime) = setup();
        let err = graph.construct(stage(100), vec![stage(100)]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNode(h) if h == NodeHandle::new(100)));

        let err = graph
            .construct(stage(100), vec![stage(OUTPUT_MIXER.raw())])
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNode(h) if h == OUTPUT_MIXER));

        let err = graph.construct(stage(INPUT_NODE.raw()), vec![stage(1)]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNode(h) if h == INPUT_NODE));
        assert_eq!(graph.state(), GraphState::Unconfigured);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1)]).unwrap();

        graph.start().unwrap();
        graph.start().unwrap();
        assert_eq!(runtime.start_count(), 1);

        graph.stop();
        graph.stop();
        assert_eq!(graph.state(), GraphState::Stopped);
        assert!(!runtime.running());
    }

    #[test]
    fn test_rebuild_requires_stopped() {
        let (mut graph, _runtime) = setup();
        graph.construct(stage(100), vec![stage(1)]).unwrap();
        graph.start().unwrap();

        let err = graph.rebuild_chain(vec![stage(2)]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                state: GraphState::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_rebuild_moves_tap_to_new_last_node() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1), stage(2)]).unwrap();
        let tap = Arc::new(RenderTap::new(Arc::new(RingBuffer::new(2, 1024))));
        graph.attach_render_tap(tap).unwrap();
        assert!(runtime.has_render_notify(NodeHandle::new(2)));

        graph.stop();
        graph
            .rebuild_chain(vec![stage(3), stage(4), stage(5)])
            .unwrap();

        assert_eq!(graph.state(), GraphState::Built);
        assert_eq!(graph.tap_node(), Some(NodeHandle::new(5)));
        assert!(!runtime.is_attached(NodeHandle::new(1)));
        assert!(!runtime.is_attached(NodeHandle::new(2)));
        assert!(runtime.has_render_notify(NodeHandle::new(5)));
        assert_eq!(runtime.connections().len(), 5);
    }

    #[test]
    fn test_rebuild_rejects_empty_and_keeps_old_chain() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1)]).unwrap();
        graph.stop();

        let err = graph.rebuild_chain(vec![]).unwrap_err();
        assert!(matches!(err, EngineError::EmptyChain));
        assert_eq!(graph.state(), GraphState::Stopped);
        assert_eq!(graph.chain(), vec![NodeHandle::new(1)]);
        assert!(runtime.is_attached(NodeHandle::new(1)));
    }

    #[test]
    fn test_rebuild_rejects_booster_alias_and_keeps_old_chain() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1)]).unwrap();
        graph.stop();

        let err = graph.rebuild_chain(vec![stage(100)]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNode(_)));
        assert_eq!(graph.state(), GraphState::Stopped);
        assert_eq!(
            runtime.chain_from_input(),
            vec![INPUT_NODE, NodeHandle::new(100), NodeHandle::new(1), OUTPUT_MIXER]
        );
    }

    #[test]
    fn test_rebuild_attach_failure_restores_previous_chain() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1), stage(2)]).unwrap();
        let tap = Arc::new(RenderTap::new(Arc::new(RingBuffer::new(2, 1024))));
        graph.attach_render_tap(tap).unwrap();
        graph.stop();
        runtime.refuse_attach(NodeHandle::new(4));

        let err = graph.rebuild_chain(vec![stage(3), stage(4)]).unwrap_err();
        assert!(matches!(err, EngineError::Runtime { op: "attach node", .. }));

        assert_eq!(graph.state(), GraphState::Stopped);
        assert_eq!(graph.chain(), vec![NodeHandle::new(1), NodeHandle::new(2)]);
        assert_eq!(
            runtime.chain_from_input(),
            vec![
                INPUT_NODE,
                NodeHandle::new(100),
                NodeHandle::new(1),
                NodeHandle::new(2),
                OUTPUT_MIXER
            ]
        );
        assert!(!runtime.is_attached(NodeHandle::new(3)));
        assert_eq!(graph.tap_node(), Some(NodeHandle::new(2)));

        graph.start().unwrap();
        assert_eq!(graph.state(), GraphState::Running);
    }

    #[test]
    fn test_rebuild_connect_failure_restores_previous_chain() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1)]).unwrap();
        graph.stop();
        runtime.refuse_connect(NodeHandle::new(6));

        let err = graph.rebuild_chain(vec![stage(5), stage(6)]).unwrap_err();
        assert!(matches!(err, EngineError::Runtime { op: "connect", .. }));

        assert_eq!(graph.state(), GraphState::Stopped);
        assert!(!runtime.is_attached(NodeHandle::new(5)));
        assert!(!runtime.is_attached(NodeHandle::new(6)));
        assert_eq!(
            runtime.chain_from_input(),
            vec![INPUT_NODE, NodeHandle::new(100), NodeHandle::new(1), OUTPUT_MIXER]
        );
        assert_eq!(runtime.connections().len(), 3);
    }

    #[test]
    fn test_unrestorable_rebuild_refuses_start() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1)]).unwrap();
        graph.stop();
        runtime.refuse_attach(NodeHandle::new(1));
        runtime.refuse_attach(NodeHandle::new(2));

        assert!(graph.rebuild_chain(vec![stage(2)]).is_err());
        assert_eq!(graph.state(), GraphState::Unconfigured);
        assert_eq!(runtime.attached_count(), 0);
        assert!(runtime.connections().is_empty());

        let err = graph.start().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                state: GraphState::Unconfigured,
                ..
            }
        ));
        assert!(!runtime.running());
    }

    #[test]
    fn test_tap_install_failure_keeps_graph_usable() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1)]).unwrap();
        runtime.set_refuse_render_notify(true);

        let tap = Arc::new(RenderTap::new(Arc::new(RingBuffer::new(2, 1024))));
        let err = graph.attach_render_tap(tap).unwrap_err();
        assert!(matches!(err, EngineError::RenderTapInstall(_)));
        assert_eq!(graph.tap_node(), None);

        graph.start().unwrap();
        assert_eq!(graph.state(), GraphState::Running);
    }

    #[test]
    fn test_drop_releases_runtime_nodes() {
        let (mut graph, runtime) = setup();
        graph.construct(stage(100), vec![stage(1), stage(2)]).unwrap();
        graph.start().unwrap();
        drop(graph);

        assert_eq!(runtime.attached_count(), 0);
        assert!(runtime.connections().is_empty());
        assert!(!runtime.running());
    }
}
