/*! Asynchronous task queues.
 *
 * A [`TaskQueue`] owns one worker thread. Producers on any thread push
 * [`Task`]s into an unbounded channel without blocking, and the worker runs
 * them in the order they were enqueued. Recording tasks are collected into a
 * checked-out execution unit (a command buffer and its sync point) that is
 * flushed to the hardware queue on `Submitting`.
 *
 * Units are recycled through a FIFO and only reopened once their sync point
 * has reached the value of their last submission. Completion callbacks
 * registered with `ExecutionCompleted` run on the worker, in enqueue order,
 * after the next submission has completed.
 */

mod worker;

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::{
    command::CommandBuffer,
    config::TaskQueueDescriptor,
    device::{Device, Queue},
    error::{CreateTaskQueueError, WaitIdleError},
    hal_api::HalApi,
    sync::SyncPoint,
    DeviceError, SubmissionIndex,
};

use self::worker::Worker;

pub type QueueOperationFn<A> = Box<dyn FnOnce(&Queue<A>) + Send>;
pub type RecordingFn<A> = Box<dyn FnOnce(SubmissionIndex, &mut CommandBuffer<A>) + Send>;
pub type CompletionFn = Box<dyn FnOnce() + Send>;

/// A unit of work for a [`TaskQueue`] worker.
pub enum Task<A: HalApi> {
    /// Bind the hardware queue later tasks record and submit for.
    SetQueue(Arc<Queue<A>>),
    /// Run a closure with the bound hardware queue, e.g. to make it wait on
    /// another queue's sync point.
    QueueOperation(QueueOperationFn<A>),
    /// Record commands. The closure gets the submission index the commands
    /// will complete with.
    Recording(RecordingFn<A>),
    BeginRecording,
    EndRecording,
    /// Flush the recorded commands. A no-op if nothing was recorded.
    Submitting,
    /// Run a closure once the next submission has completed.
    ExecutionCompleted(CompletionFn),
    /// Release every execution unit and stop the worker.
    Terminate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SetQueue,
    QueueOperation,
    Recording,
    BeginRecording,
    EndRecording,
    Submitting,
    ExecutionCompleted,
    Terminate,
}

impl<A: HalApi> Task<A> {
    pub fn kind(&self) -> TaskKind {
        match *self {
            Task::SetQueue(_) => TaskKind::SetQueue,
            Task::QueueOperation(_) => TaskKind::QueueOperation,
            Task::Recording(_) => TaskKind::Recording,
            Task::BeginRecording => TaskKind::BeginRecording,
            Task::EndRecording => TaskKind::EndRecording,
            Task::Submitting => TaskKind::Submitting,
            Task::ExecutionCompleted(_) => TaskKind::ExecutionCompleted,
            Task::Terminate => TaskKind::Terminate,
        }
    }
}

impl<A: HalApi> fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Task::SetQueue(ref queue) => write!(f, "SetQueue({:?})", queue.label()),
            _ => write!(f, "{:?}", self.kind()),
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    processed: u64,
    exited: bool,
}

/// State shared between a task queue and its worker.
struct Shared<A: HalApi> {
    enqueued: AtomicU64,
    progress: Mutex<Progress>,
    progress_cvar: Condvar,
    /// Submissions the device may still be working on, oldest first.
    in_flight: Mutex<VecDeque<(SubmissionIndex, Arc<SyncPoint<A>>)>>,
    last_submitted: AtomicU64,
    completed: AtomicU64,
    lost: AtomicBool,
}

impl<A: HalApi> Shared<A> {
    fn new() -> Self {
        Shared {
            enqueued: AtomicU64::new(0),
            progress: Mutex::new(Progress::default()),
            progress_cvar: Condvar::new(),
            in_flight: Mutex::new(VecDeque::new()),
            last_submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            lost: AtomicBool::new(false),
        }
    }

    fn task_done(&self) {
        let mut progress = self.progress.lock();
        progress.processed += 1;
        self.progress_cvar.notify_all();
    }

    fn worker_exited(&self) {
        let mut progress = self.progress.lock();
        progress.exited = true;
        self.progress_cvar.notify_all();
    }

    /// Retire completed submissions. Returns the highest completed index.
    fn triage_submissions(&self) -> SubmissionIndex {
        let mut in_flight = self.in_flight.lock();
        while let Some(&(value, ref sync_point)) = in_flight.front() {
            if !sync_point.is_complete(value) {
                break;
            }
            self.completed.fetch_max(value, Ordering::AcqRel);
            in_flight.pop_front();
        }
        self.completed.load(Ordering::Acquire)
    }
}

/// A multi-producer queue of [`Task`]s, executed in order by one worker thread.
pub struct TaskQueue<A: HalApi> {
    label: String,
    device: Arc<Device<A>>,
    sender: Sender<Task<A>>,
    shared: Arc<Shared<A>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    terminated: AtomicBool,
}

impl<A: HalApi> fmt::Debug for TaskQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("label", &self.label)
            .field("last_submitted", &self.last_submission_index())
            .finish()
    }
}

impl<A: HalApi> TaskQueue<A> {
    pub(crate) fn new(
        device: Arc<Device<A>>,
        desc: &TaskQueueDescriptor,
    ) -> Result<Self, CreateTaskQueueError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::new());
        let worker = Worker::new(Arc::clone(&device), Arc::clone(&shared), desc);
        let handle = thread::Builder::new()
            .name(desc.label.clone())
            .spawn(move || worker.run(receiver))?;
        log::info!("Started task queue {:?}", desc.label);
        Ok(TaskQueue {
            label: desc.label.clone(),
            device,
            sender,
            shared,
            worker: Mutex::new(Some(handle)),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }

    /// Enqueue `task`. Never blocks.
    ///
    /// # Panics
    ///
    /// Panics if the queue was already terminated.
    pub fn execute(&self, task: Task<A>) {
        match task {
            Task::Terminate => assert!(
                !self.terminated.swap(true, Ordering::AcqRel),
                "task queue {:?} is terminated twice",
                self.label
            ),
            _ => assert!(
                !self.terminated.load(Ordering::Acquire),
                "task queue {:?} is terminated",
                self.label
            ),
        }
        self.shared.enqueued.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.sender.send(task) {
            log::error!(
                "Task queue {:?} worker is gone, dropping a {:?} task",
                self.label,
                err.into_inner().kind()
            );
        }
    }

    pub fn set_queue(&self, queue: Arc<Queue<A>>) {
        self.execute(Task::SetQueue(queue));
    }

    pub fn queue_operation(&self, operation: impl FnOnce(&Queue<A>) + Send + 'static) {
        self.execute(Task::QueueOperation(Box::new(operation)));
    }

    pub fn begin_recording(&self) {
        self.execute(Task::BeginRecording);
    }

    pub fn record(
        &self,
        recording: impl FnOnce(SubmissionIndex, &mut CommandBuffer<A>) + Send + 'static,
    ) {
        self.execute(Task::Recording(Box::new(recording)));
    }

    pub fn end_recording(&self) {
        self.execute(Task::EndRecording);
    }

    pub fn submit(&self) {
        self.execute(Task::Submitting);
    }

    pub fn on_execution_completed(&self, callback: impl FnOnce() + Send + 'static) {
        self.execute(Task::ExecutionCompleted(Box::new(callback)));
    }

    /// Begin, record, end and submit in one go.
    pub fn record_and_submit(
        &self,
        recording: impl FnOnce(SubmissionIndex, &mut CommandBuffer<A>) + Send + 'static,
    ) {
        self.begin_recording();
        self.record(recording);
        self.end_recording();
        self.submit();
    }

    /// Enqueue `Terminate`. Never blocks; the worker drains in-flight
    /// submissions before it exits, see [`TaskQueue::join`].
    pub fn terminate(&self) {
        self.execute(Task::Terminate);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Index of the last submission that reached the hardware queue.
    pub fn last_submission_index(&self) -> SubmissionIndex {
        self.shared.last_submitted.load(Ordering::Acquire)
    }

    /// Whether the submission with index `value` has completed on the device.
    pub fn is_execution_completed(&self, value: SubmissionIndex) -> bool {
        value <= self.shared.triage_submissions()
    }

    /// Whether a submission failed, leaving the queue unusable.
    pub fn is_lost(&self) -> bool {
        self.shared.lost.load(Ordering::Acquire)
    }

    /// Block until every task enqueued so far has run and the device has
    /// completed every submission.
    pub fn wait_idle(&self) -> Result<(), WaitIdleError> {
        self.wait_idle_until(None)
    }

    pub fn wait_idle_timeout(&self, timeout: Duration) -> Result<(), WaitIdleError> {
        self.wait_idle_until(Some(Instant::now() + timeout))
    }

    fn wait_idle_until(&self, deadline: Option<Instant>) -> Result<(), WaitIdleError> {
        profiling::scope!("TaskQueue::wait_idle");
        let target = self.shared.enqueued.load(Ordering::Acquire);
        {
            let mut progress = self.shared.progress.lock();
            while progress.processed < target {
                if progress.exited {
                    return Err(WaitIdleError::WorkerExited(target - progress.processed));
                }
                match deadline {
                    Some(deadline) => {
                        let result = self
                            .shared
                            .progress_cvar
                            .wait_until(&mut progress, deadline);
                        if result.timed_out() && progress.processed < target {
                            return Err(WaitIdleError::Timeout);
                        }
                    }
                    None => self.shared.progress_cvar.wait(&mut progress),
                }
            }
        }

        if self.is_lost() {
            return Err(WaitIdleError::Device(DeviceError::Lost));
        }

        let in_flight: Vec<_> = self.shared.in_flight.lock().iter().cloned().collect();
        for (value, sync_point) in in_flight {
            let timeout = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if !sync_point.wait(value, timeout)? {
                return Err(WaitIdleError::Timeout);
            }
        }
        self.shared.triage_submissions();
        Ok(())
    }

    /// Wait for the worker thread to exit, terminating the queue first if
    /// that hasn't been done yet.
    ///
    /// Returns the worker's panic payload if it panicked.
    ///
    /// # Blocking
    ///
    /// On `Terminate` the worker waits, without a time limit, until the device
    /// has finished every submission it made, so no command buffer is freed
    /// while it may still execute. A hung device makes this call hang too,
    /// as does dropping the queue. The wait is skipped once the queue is
    /// lost.
    pub fn join(&self) -> thread::Result<()> {
        if !self.is_terminated() {
            self.terminate();
        }
        match self.worker.lock().take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Terminates the queue if needed and joins the worker, blocking like
/// [`TaskQueue::join`].
impl<A: HalApi> Drop for TaskQueue<A> {
    fn drop(&mut self) {
        let handle = match self.worker.get_mut().take() {
            Some(handle) => handle,
            None => return,
        };
        if !self.terminated.swap(true, Ordering::AcqRel) {
            let _ = self.sender.send(Task::Terminate);
        }
        if handle.join().is_err() {
            log::error!("Task queue {:?} worker panicked", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Api = hal::api::Empty;

    #[test]
    fn task_kinds() {
        let tasks: Vec<Task<Api>> = vec![
            Task::BeginRecording,
            Task::Recording(Box::new(|_, _| {})),
            Task::EndRecording,
            Task::Submitting,
            Task::ExecutionCompleted(Box::new(|| {})),
            Task::Terminate,
        ];
        let kinds: Vec<_> = tasks.iter().map(Task::kind).collect();
        assert_eq!(
            kinds,
            [
                TaskKind::BeginRecording,
                TaskKind::Recording,
                TaskKind::EndRecording,
                TaskKind::Submitting,
                TaskKind::ExecutionCompleted,
                TaskKind::Terminate,
            ]
        );
        assert_eq!(format!("{:?}", tasks[3]), "Submitting");
    }
}
