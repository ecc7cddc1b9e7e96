//! Control Loop - serializes start/stop/rebuild on one worker thread
//!
//! Rebuild requests stop the graph, wait out a settle window and then rewire.
//! Requests that arrive during the window replace the pending node list, so
//! a burst of equalizer changes produces a single rebuild.

use super::graph::{GraphState, SignalGraph};
use super::node::{NodeHandle, ProcessingNode};
use crate::error::{EngineError, EngineResult};
use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default glitch window between stop and rewire
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Outcomes kept for callers; older ones are dropped when nobody reads them
pub const OUTCOME_BACKLOG: usize = 16;

enum ControlCommand {
    Start(Sender<EngineResult<()>>),
    Stop(Sender<()>),
    Rebuild(Vec<Arc<dyn ProcessingNode>>),
    Shutdown,
}

/// Result of one completed rebuild cycle
#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    /// Chain requested by the winning request
    pub requested: Vec<NodeHandle>,
    /// Requests replaced during the settle window
    pub coalesced: usize,
    /// Whether audio was restarted afterwards
    pub resumed: bool,
    pub result: Result<(), EngineError>,
}

/// Handle to the control worker
pub struct ControlLoop {
    commands: Sender<ControlCommand>,
    outcomes: Receiver<RebuildOutcome>,
    cycles: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl ControlLoop {
    pub fn spawn(graph: Arc<Mutex<SignalGraph>>, settle_delay: Duration) -> EngineResult<Self> {
        let (commands, rx) = crossbeam_channel::unbounded();
        let (outcome_tx, outcomes) = crossbeam_channel::bounded(OUTCOME_BACKLOG);
        let cycles = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            graph,
            commands: rx,
            outcomes: outcome_tx,
            backlog: outcomes.clone(),
            settle_delay,
            cycles: cycles.clone(),
        };
        let handle = thread::Builder::new()
            .name("eqflow-control".into())
            .spawn(move || worker.run())
            .map_err(|_| EngineError::ControlLoopClosed)?;

        info!(
            settle_ms = settle_delay.as_millis() as u64,
            "[ControlLoop] Started"
        );

        Ok(Self {
            commands,
            outcomes,
            cycles,
            worker: Some(handle),
        })
    }

    /// Start the graph, waiting for any rebuild in progress to finish first
    pub fn start(&self) -> EngineResult<()> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(ControlCommand::Start(reply))?;
        rx.recv().map_err(|_| EngineError::ControlLoopClosed)?
    }

    /// Stop the graph
    ///
    /// Issued during a rebuild, the stop is applied once the rebuild is done
    /// and the graph is not restarted.
    pub fn stop(&self) -> EngineResult<()> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(ControlCommand::Stop(reply))?;
        rx.recv().map_err(|_| EngineError::ControlLoopClosed)
    }

    /// Queue a rebuild with a new effect chain. Does not wait.
    pub fn request_rebuild(&self, nodes: Vec<Arc<dyn ProcessingNode>>) -> EngineResult<()> {
        self.send(ControlCommand::Rebuild(nodes))
    }

    /// Cloneable handle for queueing rebuilds from event listeners
    pub fn rebuild_handle(&self) -> RebuildHandle {
        RebuildHandle {
            commands: self.commands.clone(),
        }
    }

    /// Completed rebuild cycles, in order
    ///
    /// Holds the most recent [`OUTCOME_BACKLOG`] outcomes.
    pub fn outcomes(&self) -> &Receiver<RebuildOutcome> {
        &self.outcomes
    }

    pub fn rebuild_cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Finish any pending rebuild and join the worker
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.commands.send(ControlCommand::Shutdown);
            if handle.join().is_err() {
                error!("[ControlLoop] Worker panicked");
            }
            debug!("[ControlLoop] Stopped");
        }
    }

    fn send(&self, command: ControlCommand) -> EngineResult<()> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::ControlLoopClosed)
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queues rebuilds on a [`ControlLoop`] without owning it
#[derive(Clone)]
pub struct RebuildHandle {
    commands: Sender<ControlCommand>,
}

impl RebuildHandle {
    pub fn request(&self, nodes: Vec<Arc<dyn ProcessingNode>>) -> EngineResult<()> {
        self.commands
            .send(ControlCommand::Rebuild(nodes))
            .map_err(|_| EngineError::ControlLoopClosed)
    }
}

struct Worker {
    graph: Arc<Mutex<SignalGraph>>,
    commands: Receiver<ControlCommand>,
    outcomes: Sender<RebuildOutcome>,
    /// Used to evict the oldest outcome when the channel is full
    backlog: Receiver<RebuildOutcome>,
    settle_delay: Duration,
    cycles: Arc<AtomicU64>,
}

/// Requests collected while a rebuild is settling
struct Pending {
    nodes: Vec<Arc<dyn ProcessingNode>>,
    coalesced: usize,
    resume: bool,
    stops: Vec<Sender<()>>,
    starts: Vec<Sender<EngineResult<()>>>,
    shutdown: bool,
}

impl Worker {
    fn run(self) {
        while let Ok(command) = self.commands.recv() {
            match command {
                ControlCommand::Start(reply) => {
                    let _ = reply.send(self.graph.lock().start());
                }
                ControlCommand::Stop(reply) => {
                    self.graph.lock().stop();
                    let _ = reply.send(());
                }
                ControlCommand::Rebuild(nodes) => {
                    if !self.rebuild(nodes) {
                        break;
                    }
                }
                ControlCommand::Shutdown => break,
            }
        }
    }

    /// One stop → settle → rewire → resume cycle. Returns false on shutdown.
    fn rebuild(&self, nodes: Vec<Arc<dyn ProcessingNode>>) -> bool {
        let was_running = {
            let mut graph = self.graph.lock();
            let running = graph.state() == GraphState::Running;
            graph.stop();
            running
        };

        let mut pending = Pending {
            nodes,
            coalesced: 0,
            resume: was_running,
            stops: Vec::new(),
            starts: Vec::new(),
            shutdown: false,
        };
        self.settle(&mut pending);

        let requested: Vec<NodeHandle> = pending.nodes.iter().map(|n| n.handle()).collect();
        let (result, resumed) = {
            let mut graph = self.graph.lock();
            let result = graph.rebuild_chain(pending.nodes);
            match &result {
                Ok(()) => {}
                Err(EngineError::RenderTapInstall(status)) => {
                    warn!("[ControlLoop] Rebuilt without render tap: {}", status);
                }
                Err(e) => error!("[ControlLoop] Rebuild failed: {}", e),
            }

            let mut resumed = false;
            if pending.resume && !pending.shutdown {
                match graph.start() {
                    Ok(()) => resumed = true,
                    Err(e) => error!("[ControlLoop] Restart after rebuild failed: {}", e),
                }
            }
            (result, resumed)
        };

        self.cycles.fetch_add(1, Ordering::AcqRel);
        debug!(
            coalesced = pending.coalesced,
            resumed, "[ControlLoop] Rebuild cycle complete"
        );
        self.publish(RebuildOutcome {
            requested,
            coalesced: pending.coalesced,
            resumed,
            result,
        });

        // deferred callers see the finished cycle
        for reply in pending.starts {
            let state = self.graph.lock().state();
            let reply_result = if state == GraphState::Running {
                Ok(())
            } else {
                Err(EngineError::InvalidState { op: "start", state })
            };
            let _ = reply.send(reply_result);
        }
        for reply in pending.stops {
            let _ = reply.send(());
        }

        !pending.shutdown
    }

    fn publish(&self, outcome: RebuildOutcome) {
        if let Err(TrySendError::Full(outcome)) = self.outcomes.try_send(outcome) {
            let _ = self.backlog.try_recv();
            let _ = self.outcomes.try_send(outcome);
        }
    }

    /// Wait out the settle window while absorbing new requests
    fn settle(&self, pending: &mut Pending) {
        let timer = crossbeam_channel::at(Instant::now() + self.settle_delay);
        loop {
            select! {
                recv(self.commands) -> message => match message {
                    Ok(ControlCommand::Rebuild(nodes)) => {
                        pending.nodes = nodes;
                        pending.coalesced += 1;
                    }
                    Ok(ControlCommand::Stop(reply)) => {
                        pending.resume = false;
                        pending.stops.push(reply);
                    }
                    Ok(ControlCommand::Start(reply)) => {
                        pending.resume = true;
                        pending.starts.push(reply);
                    }
                    Ok(ControlCommand::Shutdown) | Err(_) => {
                        pending.shutdown = true;
                        return;
                    }
                },
                recv(timer) -> _ => return,
            }
        }
    }
}
