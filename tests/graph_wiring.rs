use eqflow::audio::offline::{INPUT_NODE, OUTPUT_MIXER};
use eqflow::audio::{ControlLoop, GraphState, NodeHandle, OfflineRuntime, PlanarBuffer, ProcessingNode, SignalGraph};
use eqflow::capture::{RenderStatus, RenderTap, RingBuffer};
use eqflow::AudioFormat;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

struct Band {
    handle: NodeHandle,
    gain: f32,
}

impl ProcessingNode for Band {
    fn handle(&self) -> NodeHandle {
        self.handle
    }

    fn label(&self) -> &str {
        "eq"
    }

    fn process(&self, buffer: &mut PlanarBuffer) {
        for channel in buffer.channels_mut() {
            channel.apply_gain(self.gain);
        }
    }
}

fn eq(id: u32) -> Arc<dyn ProcessingNode> {
    Arc::new(Band {
        handle: NodeHandle::new(id),
        gain: 1.0,
    })
}

const BOOSTER: u32 = 1000;

fn build(ids: &[u32]) -> (SignalGraph, OfflineRuntime) {
    let runtime = OfflineRuntime::new(2);
    let mut graph = SignalGraph::new(Box::new(runtime.clone()), AudioFormat::STANDARD);
    graph
        .construct(eq(BOOSTER), ids.iter().map(|&id| eq(id)).collect())
        .unwrap();
    (graph, runtime)
}

fn expected_path(ids: &[u32]) -> Vec<NodeHandle> {
    let mut path = vec![INPUT_NODE, NodeHandle::new(BOOSTER)];
    path.extend(ids.iter().map(|&id| NodeHandle::new(id)));
    path.push(OUTPUT_MIXER);
    path
}

#[test]
fn three_equalizers_are_wired_in_order() {
    let (graph, runtime) = build(&[1, 2, 3]);

    assert_eq!(graph.state(), GraphState::Built);
    assert_eq!(runtime.chain_from_input(), expected_path(&[1, 2, 3]));
}

#[test]
fn rebuild_detaches_every_old_node() {
    let (mut graph, runtime) = build(&[1, 2, 3]);
    graph.start().unwrap();
    graph.stop();

    graph.rebuild_chain(vec![eq(10), eq(11)]).unwrap();

    assert_eq!(runtime.chain_from_input(), expected_path(&[10, 11]));
    for old in [1, 2, 3] {
        let handle = NodeHandle::new(old);
        assert!(!runtime.is_attached(handle));
        assert!(runtime.connections().iter().all(|c| !c.touches(handle)));
    }
    // booster + two new nodes
    assert_eq!(runtime.attached_count(), 3);
}

#[test]
fn rendered_frames_reach_the_ring_buffer() {
    let (mut graph, runtime) = build(&[1, 2]);
    let ring = Arc::new(RingBuffer::new(2, 4096));
    let tap = Arc::new(RenderTap::new(ring.clone()));
    graph.attach_render_tap(tap.clone()).unwrap();
    runtime.set_source(|time, buffer| {
        for channel in buffer.channels_mut() {
            for (i, sample) in channel.samples_mut().iter_mut().enumerate() {
                *sample = (time as usize + i) as f32;
            }
        }
    });
    let reader = ring.add_reader(0).unwrap();

    graph.start().unwrap();
    assert_eq!(runtime.render(256), 256);
    assert_eq!(runtime.render(256), 256);

    assert_eq!(runtime.last_render_status(), Some(RenderStatus::Stored));
    assert_eq!(tap.last_sample_time(), Some(256.0));
    assert_eq!(ring.time_bounds(), Some((0, 512)));

    let mut out = vec![vec![0.0f32; 512]; 2];
    assert_eq!(ring.fetch(reader, &mut out, 512), Ok(512));
    assert!(out[0].iter().enumerate().all(|(i, &s)| s == i as f32));
}

#[test]
fn tap_follows_rebuilt_chain() {
    let (mut graph, runtime) = build(&[1]);
    let ring = Arc::new(RingBuffer::new(2, 4096));
    graph
        .attach_render_tap(Arc::new(RenderTap::new(ring.clone())))
        .unwrap();
    graph.stop();
    graph.rebuild_chain(vec![eq(5), eq(6)]).unwrap();
    graph.start().unwrap();

    runtime.render(128);
    assert!(runtime.has_render_notify(NodeHandle::new(6)));
    assert!(!runtime.has_render_notify(NodeHandle::new(1)));
    assert_eq!(ring.write_cursor(), Some(128));
}

#[test]
fn pending_rebuilds_coalesce_into_one_cycle() {
    let (mut graph, runtime) = build(&[1]);
    graph.start().unwrap();
    let graph = Arc::new(Mutex::new(graph));
    let control = ControlLoop::spawn(graph.clone(), Duration::from_millis(80)).unwrap();

    control.request_rebuild(vec![eq(2)]).unwrap();
    control.request_rebuild(vec![eq(3), eq(4)]).unwrap();

    let outcome = control
        .outcomes()
        .recv_timeout(Duration::from_secs(2))
        .unwrap();
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.coalesced, 1);
    assert_eq!(control.rebuild_cycles(), 1);
    assert!(control
        .outcomes()
        .recv_timeout(Duration::from_millis(200))
        .is_err());

    assert_eq!(runtime.chain_from_input(), expected_path(&[3, 4]));
    assert!(!runtime.is_attached(NodeHandle::new(2)));
    assert_eq!(graph.lock().state(), GraphState::Running);
}

proptest! {
    #[test]
    fn construct_orders_any_chain(ids in proptest::collection::hash_set(1u32..500, 1..12)) {
        let ids: Vec<u32> = ids.into_iter().collect();
        let (graph, runtime) = build(&ids);

        prop_assert_eq!(runtime.chain_from_input(), expected_path(&ids));
        prop_assert_eq!(graph.chain().len(), ids.len());
        prop_assert_eq!(runtime.connections().len(), ids.len() + 2);
    }

    #[test]
    fn rebuild_keeps_requested_count(
        first in proptest::collection::hash_set(1u32..200, 1..6),
        second in proptest::collection::hash_set(200u32..400, 1..6),
    ) {
        let first: Vec<u32> = first.into_iter().collect();
        let second: Vec<u32> = second.into_iter().collect();
        let (mut graph, runtime) = build(&first);
        graph.stop();
        graph
            .rebuild_chain(second.iter().map(|&id| eq(id)).collect())
            .unwrap();

        prop_assert_eq!(runtime.chain_from_input(), expected_path(&second));
        prop_assert_eq!(runtime.attached_count(), second.len() + 1);
    }
}
