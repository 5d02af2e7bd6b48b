use std::{
    collections::VecDeque,
    ops::ControlFlow,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use crossbeam_channel::Receiver;
use smallvec::SmallVec;

use super::{CompletionFn, QueueOperationFn, RecordingFn, Shared, Task};
use crate::{
    command::ExecutionUnit,
    config::TaskQueueDescriptor,
    device::{Device, Queue},
    hal_api::HalApi,
    resource_log,
    sync::SyncPoint,
    DeviceError, QueueType, SubmissionIndex,
};

/// Marks the worker as exited when the run loop ends, including by panic.
struct ExitGuard<A: HalApi>(Arc<Shared<A>>);

impl<A: HalApi> Drop for ExitGuard<A> {
    fn drop(&mut self) {
        self.0.worker_exited();
    }
}

/// State of a task queue's worker thread.
pub(super) struct Worker<A: HalApi> {
    device: Arc<Device<A>>,
    shared: Arc<Shared<A>>,
    label: String,
    completion_timeout: Option<Duration>,
    prewarm_units: u32,
    queue: Option<Arc<Queue<A>>>,
    /// The checked-out unit, between `BeginRecording` and `Submitting`.
    active: Option<ExecutionUnit<A>>,
    /// Recording tasks run on the active unit since it was opened.
    recorded: u32,
    next_index: SubmissionIndex,
    /// Submitted units, oldest first.
    recycled: VecDeque<ExecutionUnit<A>>,
    pending: SmallVec<[(SubmissionIndex, CompletionFn); 4]>,
    units_created: usize,
}

impl<A: HalApi> Worker<A> {
    pub(super) fn new(
        device: Arc<Device<A>>,
        shared: Arc<Shared<A>>,
        desc: &TaskQueueDescriptor,
    ) -> Self {
        Worker {
            device,
            shared,
            label: desc.label.clone(),
            completion_timeout: desc.completion_timeout,
            prewarm_units: desc.prewarm_units,
            queue: None,
            active: None,
            recorded: 0,
            next_index: 1,
            recycled: VecDeque::new(),
            pending: SmallVec::new(),
            units_created: 0,
        }
    }

    pub(super) fn run(mut self, receiver: Receiver<Task<A>>) {
        log::info!("Task queue {:?} worker started", self.label);
        let _exit = ExitGuard(Arc::clone(&self.shared));
        for task in receiver.iter() {
            let flow = self.execute(task);
            self.shared.task_done();
            if let ControlFlow::Break(()) = flow {
                break;
            }
        }
        log::info!("Task queue {:?} worker stopped", self.label);
    }

    fn is_lost(&self) -> bool {
        self.shared.lost.load(Ordering::Acquire)
    }

    fn execute(&mut self, task: Task<A>) -> ControlFlow<()> {
        if self.is_lost() {
            match task {
                Task::BeginRecording
                | Task::Recording(_)
                | Task::EndRecording
                | Task::Submitting
                | Task::ExecutionCompleted(_) => {
                    log::debug!("Task queue {:?} is lost, skipping {:?}", self.label, task);
                    return ControlFlow::Continue(());
                }
                _ => {}
            }
        }
        match task {
            Task::SetQueue(queue) => self.set_queue(queue),
            Task::QueueOperation(operation) => self.queue_operation(operation),
            Task::Recording(recording) => self.record(recording),
            Task::BeginRecording => self.begin_recording(),
            Task::EndRecording => self.end_recording(),
            Task::Submitting => self.submit(),
            Task::ExecutionCompleted(callback) => self.pending.push((self.next_index, callback)),
            Task::Terminate => {
                self.terminate();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn fail(&mut self, err: DeviceError) {
        log::error!("Task queue {:?} is lost: {}", self.label, err);
        self.shared.lost.store(true, Ordering::Release);
        if !self.pending.is_empty() {
            log::warn!(
                "Task queue {:?} drops {} completion callbacks",
                self.label,
                self.pending.len()
            );
            self.pending.clear();
        }
        self.recorded = 0;
        self.active = None;
    }

    fn bound_queue(&self) -> Arc<Queue<A>> {
        match self.queue {
            Some(ref queue) => Arc::clone(queue),
            None => panic!("task queue {:?} has no hardware queue set", self.label),
        }
    }

    fn create_unit(&mut self, queue_type: QueueType) -> Result<ExecutionUnit<A>, DeviceError> {
        let index = self.units_created;
        let cmd_buf = self
            .device
            .create_command_buffer(queue_type, &format!("{} unit {}", self.label, index))?;
        let sync_point = self
            .device
            .create_sync_point(&format!("{} sync point {}", self.label, index))?;
        self.units_created += 1;
        log::info!(
            "Task queue {:?} allocated {:?} execution unit {}",
            self.label,
            queue_type,
            index
        );
        Ok(ExecutionUnit::new(cmd_buf, Arc::new(sync_point)))
    }

    /// Take the oldest recycled unit if the device is done with it, or make
    /// a new one.
    fn checkout(&mut self, queue_type: QueueType) -> Result<ExecutionUnit<A>, DeviceError> {
        while self.recycled.front().map_or(false, ExecutionUnit::is_reusable) {
            let unit = match self.recycled.pop_front() {
                Some(unit) => unit,
                None => break,
            };
            if unit.cmd_buf.queue_type() == queue_type {
                resource_log!("Reuse execution unit {:?}", unit.cmd_buf.label());
                return Ok(unit);
            }
            resource_log!(
                "Release {:?} execution unit {:?}",
                unit.cmd_buf.queue_type(),
                unit.cmd_buf.label()
            );
        }
        self.create_unit(queue_type)
    }

    fn set_queue(&mut self, queue: Arc<Queue<A>>) {
        assert!(
            self.recorded == 0,
            "task queue {:?} changes its hardware queue with unsubmitted recordings",
            self.label
        );
        if let Some(unit) = self.active.take() {
            assert!(
                !unit.cmd_buf.is_recording(),
                "task queue {:?} changes its hardware queue while recording",
                self.label
            );
            self.recycled.push_front(unit);
        }
        log::info!("Task queue {:?} bound to {:?}", self.label, queue.label());
        let ty = queue.ty();
        self.queue = Some(queue);

        let ready = self
            .recycled
            .iter()
            .filter(|unit| unit.cmd_buf.queue_type() == ty)
            .count() as u32;
        for _ in ready..self.prewarm_units {
            match self.create_unit(ty) {
                Ok(unit) => self.recycled.push_back(unit),
                Err(err) => {
                    self.fail(err);
                    return;
                }
            }
        }
    }

    fn queue_operation(&mut self, operation: QueueOperationFn<A>) {
        let queue = self.bound_queue();
        operation(&queue);
    }

    fn begin_recording(&mut self) {
        profiling::scope!("Worker::begin_recording");
        let queue = self.bound_queue();
        if let Some(ref unit) = self.active {
            assert!(
                !unit.cmd_buf.is_recording(),
                "task queue {:?} began recording twice",
                self.label
            );
            assert!(
                self.recorded == 0,
                "task queue {:?} began recording over {} unsubmitted recordings",
                self.label,
                self.recorded
            );
        } else {
            match self.checkout(queue.ty()) {
                Ok(unit) => self.active = Some(unit),
                Err(err) => return self.fail(err),
            }
        }
        let result = match self.active {
            Some(ref mut unit) => unit.cmd_buf.begin(),
            None => return,
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }

    fn record(&mut self, recording: RecordingFn<A>) {
        let index = self.next_index;
        let label = &self.label;
        match self.active {
            Some(ref mut unit) if unit.cmd_buf.is_recording() => {
                recording(index, &mut unit.cmd_buf);
                self.recorded += 1;
            }
            _ => panic!(
                "task queue {:?} got a recording without an open command buffer",
                label
            ),
        }
    }

    fn end_recording(&mut self) {
        let label = &self.label;
        let result = match self.active {
            Some(ref mut unit) if unit.cmd_buf.is_recording() => unit.cmd_buf.end(),
            _ => panic!(
                "task queue {:?} ended recording without an open command buffer",
                label
            ),
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }

    /// Block until `sync_point` reaches `value`, warning every time the
    /// completion timeout elapses.
    fn wait_for(&self, sync_point: &SyncPoint<A>, value: SubmissionIndex) -> Result<(), DeviceError> {
        loop {
            if sync_point.wait(value, self.completion_timeout)? {
                return Ok(());
            }
            log::warn!(
                "Task queue {:?} is still waiting for submission {} after {:?}",
                self.label,
                value,
                self.completion_timeout
            );
        }
    }

    fn submit(&mut self) {
        profiling::scope!("Worker::submit");
        if self.recorded == 0 {
            resource_log!("Task queue {:?} has nothing to submit", self.label);
            return;
        }
        let queue = self.bound_queue();
        let mut unit = match self.active.take() {
            Some(unit) => unit,
            None => panic!("task queue {:?} lost its open command buffer", self.label),
        };
        assert!(
            unit.cmd_buf.is_executable(),
            "task queue {:?} submitted without ending the recording",
            self.label
        );

        let value = self.next_index;
        if let Err(err) = queue.submit(&mut unit.cmd_buf, &unit.sync_point, value) {
            self.recycled.push_back(unit);
            return self.fail(err);
        }
        unit.last_submitted = value;
        self.next_index += 1;
        self.recorded = 0;
        self.shared.last_submitted.store(value, Ordering::Release);
        self.shared
            .in_flight
            .lock()
            .push_back((value, Arc::clone(&unit.sync_point)));

        let waited = if self.pending.is_empty() {
            Ok(())
        } else {
            self.wait_for(&unit.sync_point, value)
        };
        self.recycled.push_back(unit);
        if let Err(err) = waited {
            return self.fail(err);
        }
        for (_, callback) in self.pending.drain(..) {
            callback();
        }
        self.shared.triage_submissions();
    }

    fn terminate(&mut self) {
        log::info!("Task queue {:?} is terminating", self.label);
        if self.recorded != 0 {
            log::warn!(
                "Task queue {:?} drops {} unsubmitted recordings",
                self.label,
                self.recorded
            );
        }
        if !self.pending.is_empty() {
            log::warn!(
                "Task queue {:?} drops {} completion callbacks",
                self.label,
                self.pending.len()
            );
            self.pending.clear();
        }
        if !self.is_lost() {
            for unit in self.recycled.iter() {
                if let Err(err) = self.wait_for(&unit.sync_point, unit.last_submitted) {
                    log::error!("Task queue {:?} failed to drain: {}", self.label, err);
                    break;
                }
            }
        }
        let released = self.recycled.len() + self.active.is_some() as usize;
        self.active = None;
        self.recycled.clear();
        self.queue = None;
        self.shared.triage_submissions();
        log::info!(
            "Task queue {:?} released {} execution units",
            self.label,
            released
        );
    }
}
