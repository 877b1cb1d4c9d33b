use std::{sync::Arc, time::Duration};

use comms::msg::{Command, SessionTag};
use tokio::{
    sync::{mpsc::UnboundedSender, watch},
    time,
};

use crate::{NodeInfo, PromiseError};

/// The lifecycle of a dispatched job. Every phase but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Finished,
    Stopped,
    Aborted,
    Errored,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        self != Phase::Running
    }
}

/// Requests a promise forwards to the task driving its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Stop,
    Abort,
    RequestProgress,
    RequestInterim,
}

impl Control {
    pub fn command(self) -> Command<'static> {
        match self {
            Control::Stop => Command::Stop,
            Control::Abort => Command::Abort,
            Control::RequestProgress => Command::RequestProgress,
            Control::RequestInterim => Command::RequestInterim,
        }
    }
}

/// Everything known about a job, published by its dispatching task.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub phase: Phase,
    pub progress: f32,
    /// Bumped on every progress update, so a requester can tell a fresh value apart.
    pub progress_seq: u64,
    pub interim_seq: u64,
    pub interim: Option<Arc<[u8]>>,
    pub result: Option<Arc<[u8]>>,
    pub failure: Option<PromiseError>,
}

impl Snapshot {
    pub fn running() -> Self {
        Self {
            phase: Phase::Running,
            progress: 0.,
            progress_seq: 0,
            interim_seq: 0,
            interim: None,
            result: None,
            failure: None,
        }
    }

    pub fn update_progress(&mut self, progress: f32) {
        self.progress = progress;
        self.progress_seq += 1;
    }

    pub fn update_interim(&mut self, state: Arc<[u8]>, progress: f32) {
        self.interim = Some(state);
        self.interim_seq += 1;
        self.update_progress(progress);
    }

    /// Moves to `Errored` unless a terminal phase was already reached.
    pub fn fail(&mut self, error: PromiseError) {
        if self.phase.is_terminal() {
            return;
        }

        self.phase = Phase::Errored;
        self.failure = Some(error);
    }
}

/// A handle to the in-flight or completed result of a dispatched work unit.
///
/// The job is driven by a background task, which publishes its state through a
/// watch channel, so reads never race with replies coming from the node. Dropping
/// the promise doesn't cancel the job: it keeps running on its node and the
/// results are discarded.
#[derive(Debug)]
pub struct Promise {
    node: NodeInfo,
    tag: SessionTag,
    initial: Arc<[u8]>,
    state: watch::Receiver<Snapshot>,
    control: UnboundedSender<Control>,
}

impl Promise {
    pub(crate) fn new(
        node: NodeInfo,
        tag: SessionTag,
        initial: Arc<[u8]>,
        state: watch::Receiver<Snapshot>,
        control: UnboundedSender<Control>,
    ) -> Self {
        Self {
            node,
            tag,
            initial,
            state,
            control,
        }
    }

    /// The node the job was dispatched to.
    pub fn node(&self) -> NodeInfo {
        self.node
    }

    pub fn tag(&self) -> SessionTag {
        self.tag
    }

    /// The packet that was dispatched.
    pub fn initial_data(&self) -> &[u8] {
        &self.initial
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    pub fn is_finished(&self) -> bool {
        self.phase() == Phase::Finished
    }

    pub fn is_stopped(&self) -> bool {
        self.phase() == Phase::Stopped
    }

    pub fn is_aborted(&self) -> bool {
        self.phase() == Phase::Aborted
    }

    pub fn is_error(&self) -> bool {
        self.phase() == Phase::Errored
    }

    /// Waits until the job reaches a terminal phase.
    ///
    /// # Returns
    /// The terminal phase.
    ///
    /// # Errors
    /// `PromiseError::Detached` if the driving task went away first.
    pub async fn wait(&self) -> Result<Phase, PromiseError> {
        let snapshot = self.wait_until(|s| s.phase.is_terminal()).await?;
        Ok(snapshot.phase)
    }

    /// Waits at most `timeout` for the job to reach a terminal phase.
    ///
    /// # Returns
    /// Whether a terminal phase was observed in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(time::timeout(timeout, self.wait()).await, Ok(Ok(_)))
    }

    /// Completion percentage of the job.
    ///
    /// Once the job is terminal this is the last value received. Otherwise a fresh
    /// value is requested from the node and awaited.
    ///
    /// # Errors
    /// `PromiseError::Detached` if the driving task went away first.
    pub async fn progress(&self) -> Result<f32, PromiseError> {
        let (phase, progress, seq) = {
            let snapshot = self.state.borrow();
            (snapshot.phase, snapshot.progress, snapshot.progress_seq)
        };

        if phase.is_terminal() {
            return Ok(progress);
        }

        self.request(Control::RequestProgress);
        let snapshot = self
            .wait_until(|s| s.phase.is_terminal() || s.progress_seq > seq)
            .await?;

        Ok(snapshot.progress)
    }

    /// The latest state of the job.
    ///
    /// While running, a fresh checkpoint is requested from the node and awaited.
    /// An aborted job yields the initial packet, so callers can restore the state
    /// they had before dispatching; a stopped one yields its last checkpoint.
    ///
    /// # Errors
    /// The failure of the job if it errored, or `PromiseError::Detached` if the
    /// driving task went away first.
    pub async fn interim_result(&self) -> Result<Arc<[u8]>, PromiseError> {
        let (phase, seq) = {
            let snapshot = self.state.borrow();
            (snapshot.phase, snapshot.interim_seq)
        };

        if !phase.is_terminal() {
            self.request(Control::RequestInterim);
        }

        let snapshot = self
            .wait_until(|s| s.phase.is_terminal() || s.interim_seq > seq)
            .await?;

        self.outcome(&snapshot)
    }

    /// Waits for the job to be over and returns its result.
    ///
    /// # Returns
    /// The final packet if the job finished, the last checkpoint if it was stopped,
    /// or the initial packet if it was aborted.
    ///
    /// # Errors
    /// The failure of the job if it errored, or `PromiseError::Detached` if the
    /// driving task went away first.
    pub async fn final_result(&self) -> Result<Arc<[u8]>, PromiseError> {
        let snapshot = self.wait_until(|s| s.phase.is_terminal()).await?;
        self.outcome(&snapshot)
    }

    /// Asks the node to stop the job at its next checkpoint and waits for it to be
    /// over. Does nothing if the job already is.
    pub async fn stop(&self) -> Result<Phase, PromiseError> {
        self.end_with(Control::Stop).await
    }

    /// Asks the node to drop the job and waits for it to be over. Does nothing if
    /// the job already is.
    pub async fn abort(&self) -> Result<Phase, PromiseError> {
        self.end_with(Control::Abort).await
    }

    async fn end_with(&self, control: Control) -> Result<Phase, PromiseError> {
        let phase = self.phase();
        if phase.is_terminal() {
            return Ok(phase);
        }

        self.request(control);
        self.wait().await
    }

    fn request(&self, control: Control) {
        // A closed channel means the job is over, which the waiter observes anyway.
        let _ = self.control.send(control);
    }

    async fn wait_until<F>(&self, mut ready: F) -> Result<Snapshot, PromiseError>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|s| ready(s))
            .await
            .map_err(|_| PromiseError::Detached)?;

        Ok(snapshot.clone())
    }

    fn outcome(&self, snapshot: &Snapshot) -> Result<Arc<[u8]>, PromiseError> {
        match snapshot.phase {
            Phase::Aborted => Ok(Arc::clone(&self.initial)),
            Phase::Errored => Err(snapshot.failure.clone().unwrap_or(PromiseError::Detached)),
            Phase::Finished => snapshot.result.clone().ok_or(PromiseError::Detached),
            Phase::Stopped | Phase::Running => {
                snapshot.interim.clone().ok_or(PromiseError::Detached)
            }
        }
    }
}
