use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc, Arc, Barrier,
    },
    thread,
    time::Duration,
};

use forge_core::{
    api, Backends, Device, DeviceDescriptor, DeviceError, Instance, InstanceDescriptor,
    QueuePriority, QueueType, TaskQueue, TaskQueueDescriptor, WaitIdleError,
};
use hal::soft::{CompletionMode, ObjectKind};
use parking_lot::Mutex;

type Api = api::Soft;

fn device(label: &str) -> Arc<Device<Api>> {
    let _ = env_logger::try_init();
    let instance = Instance::new(&InstanceDescriptor {
        backends: Backends::SOFT,
        ..Default::default()
    });
    instance
        .open::<Api>(&DeviceDescriptor {
            label: Some(label.to_string()),
            ..Default::default()
        })
        .unwrap()
}

fn task_queue_with(
    device: &Arc<Device<Api>>,
    ty: QueueType,
    desc: TaskQueueDescriptor,
) -> TaskQueue<Api> {
    let queue = device
        .create_queue(&hal::QueueDescriptor {
            label: Some("hw"),
            ty,
            priority: QueuePriority::Normal,
        })
        .unwrap();
    let task_queue = device.create_task_queue(&desc).unwrap();
    task_queue.set_queue(queue);
    task_queue
}

fn task_queue(device: &Arc<Device<Api>>) -> TaskQueue<Api> {
    task_queue_with(
        device,
        QueueType::Graphics,
        TaskQueueDescriptor {
            label: "test worker".to_string(),
            ..Default::default()
        },
    )
}

/// Block until the worker has run everything enqueued so far.
fn sync(task_queue: &TaskQueue<Api>) {
    let (sender, receiver) = mpsc::channel();
    task_queue.queue_operation(move |_| {
        let _ = sender.send(());
    });
    receiver.recv().unwrap();
}

#[test]
fn completion_callback_runs_once() {
    let device = device("callback");
    let task_queue = task_queue(&device);
    let calls = Arc::new(AtomicUsize::new(0));
    let recorded_index = Arc::new(AtomicU64::new(0));

    task_queue.begin_recording();
    {
        let recorded_index = Arc::clone(&recorded_index);
        task_queue.record(move |index, cmd_buf| {
            recorded_index.store(index, Ordering::SeqCst);
            cmd_buf.insert_debug_marker("work");
        });
    }
    task_queue.end_recording();
    {
        let calls = Arc::clone(&calls);
        task_queue.on_execution_completed(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    task_queue.submit();
    task_queue.wait_idle().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(recorded_index.load(Ordering::SeqCst), 1);
    assert_eq!(task_queue.last_submission_index(), 1);
    assert!(task_queue.is_execution_completed(1));
    assert!(!task_queue.is_execution_completed(2));
    assert_eq!(device.raw().executed_markers(), vec!["work".to_string()]);

    task_queue.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn callback_waits_for_device_completion() {
    let device = device("deferred callback");
    device.raw().set_completion_mode(CompletionMode::Manual);
    let task_queue = task_queue(&device);
    let calls = Arc::new(AtomicUsize::new(0));

    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("slow"));
    {
        let calls = Arc::clone(&calls);
        // Registered after the submission, so it fires with the next one.
        task_queue.on_execution_completed(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("slower"));

    // The worker blocks on the second submission until the device finishes it.
    let mut completed = 0;
    while completed < 2 {
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        completed += device.raw().complete_pending();
        thread::yield_now();
    }
    task_queue.wait_idle().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(task_queue.is_execution_completed(2));
}

#[test]
fn submission_indices_increase() {
    let device = device("indices");
    let task_queue = task_queue(&device);
    let indices = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let indices = Arc::clone(&indices);
        task_queue.record_and_submit(move |index, _| indices.lock().push(index));
    }
    task_queue.wait_idle().unwrap();
    assert_eq!(*indices.lock(), vec![1, 2, 3]);
    assert_eq!(task_queue.last_submission_index(), 3);
    assert_eq!(device.raw().submission_count(), 3);
}

#[test]
fn empty_submissions_are_skipped() {
    let device = device("empty");
    let task_queue = task_queue(&device);

    task_queue.submit();
    task_queue.begin_recording();
    task_queue.end_recording();
    task_queue.submit();
    task_queue.wait_idle().unwrap();

    assert_eq!(device.raw().submission_count(), 0);
    assert_eq!(task_queue.last_submission_index(), 0);

    // The open unit is reused for the next real recording.
    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("real"));
    task_queue.wait_idle().unwrap();
    assert_eq!(device.raw().submission_count(), 1);
    assert_eq!(device.raw().created_objects(ObjectKind::CommandBuffer), 1);
}

#[test]
fn recordings_keep_producer_order() {
    const PER_PRODUCER: usize = 100;
    let device = device("fifo");
    let task_queue = Arc::new(task_queue(&device));
    let barrier = Arc::new(Barrier::new(2));

    task_queue.begin_recording();
    let producers = ["a", "b"]
        .iter()
        .map(|&name| {
            let task_queue = Arc::clone(&task_queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_PRODUCER {
                    let marker = format!("{}{}", name, i);
                    task_queue.record(move |_, cmd_buf| cmd_buf.insert_debug_marker(&marker));
                }
            })
        })
        .collect::<Vec<_>>();
    for producer in producers {
        producer.join().unwrap();
    }
    task_queue.end_recording();
    task_queue.submit();
    task_queue.wait_idle().unwrap();

    let markers = device.raw().executed_markers();
    assert_eq!(markers.len(), 2 * PER_PRODUCER);
    for name in ["a", "b"].iter() {
        let seen = markers
            .iter()
            .filter(|marker| marker.starts_with(name))
            .cloned()
            .collect::<Vec<_>>();
        let expected = (0..PER_PRODUCER)
            .map(|i| format!("{}{}", name, i))
            .collect::<Vec<_>>();
        assert_eq!(seen, expected);
    }
}

#[test]
fn units_are_not_reused_before_completion() {
    let device = device("reuse");
    device.raw().set_completion_mode(CompletionMode::Manual);
    let task_queue = task_queue(&device);

    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("first"));
    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("second"));
    sync(&task_queue);
    assert_eq!(device.raw().created_objects(ObjectKind::CommandBuffer), 2);
    assert!(!task_queue.is_execution_completed(1));

    assert_eq!(device.raw().complete_pending(), 2);
    assert!(task_queue.is_execution_completed(2));

    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("third"));
    sync(&task_queue);
    assert_eq!(device.raw().created_objects(ObjectKind::CommandBuffer), 2);

    device.raw().set_completion_mode(CompletionMode::Immediate);
    task_queue.wait_idle().unwrap();
    task_queue.join().unwrap();
}

#[test]
fn prewarmed_units_are_used_first() {
    let device = device("prewarm");
    let task_queue = task_queue_with(
        &device,
        QueueType::Compute,
        TaskQueueDescriptor {
            label: "prewarmed".to_string(),
            prewarm_units: 3,
            ..Default::default()
        },
    );
    sync(&task_queue);
    assert_eq!(device.raw().created_objects(ObjectKind::CommandBuffer), 3);

    for _ in 0..3 {
        task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("compute"));
    }
    task_queue.wait_idle().unwrap();
    assert_eq!(device.raw().created_objects(ObjectKind::CommandBuffer), 3);
}

#[test]
fn queue_operations_see_the_bound_queue() {
    let device = device("operations");
    let task_queue = task_queue_with(
        &device,
        QueueType::Transfer,
        TaskQueueDescriptor {
            label: "copy".to_string(),
            ..Default::default()
        },
    );
    let (sender, receiver) = mpsc::channel();
    task_queue.queue_operation(move |queue| {
        let _ = sender.send((queue.ty(), queue.label().to_string()));
    });
    assert_eq!(
        receiver.recv().unwrap(),
        (QueueType::Transfer, "hw".to_string())
    );
}

/// The last enqueued task panicked the worker.
fn assert_worker_panicked(task_queue: &TaskQueue<Api>) {
    assert_eq!(task_queue.wait_idle(), Err(WaitIdleError::WorkerExited(1)));
    assert!(task_queue.join().is_err());
}

#[test]
fn end_recording_needs_an_open_buffer() {
    let device = device("misuse end");
    let task_queue = task_queue(&device);
    task_queue.end_recording();
    assert_worker_panicked(&task_queue);
}

#[test]
fn recording_needs_an_open_buffer() {
    let device = device("misuse record");
    let task_queue = task_queue(&device);
    task_queue.record(|_, cmd_buf| cmd_buf.insert_debug_marker("orphan"));
    assert_worker_panicked(&task_queue);
    assert!(device.raw().executed_markers().is_empty());
}

#[test]
fn submitting_needs_a_closed_buffer() {
    let device = device("misuse submit");
    let task_queue = task_queue(&device);
    task_queue.begin_recording();
    task_queue.record(|_, cmd_buf| cmd_buf.insert_debug_marker("unclosed"));
    task_queue.submit();
    assert_worker_panicked(&task_queue);
    assert_eq!(device.raw().submission_count(), 0);
}

#[test]
fn begin_recording_twice() {
    let device = device("misuse begin");
    let task_queue = task_queue(&device);
    task_queue.begin_recording();
    task_queue.begin_recording();
    assert_worker_panicked(&task_queue);
}

#[test]
fn begin_recording_needs_a_queue() {
    let device = device("misuse unbound begin");
    let task_queue = device
        .create_task_queue(&TaskQueueDescriptor::default())
        .unwrap();
    task_queue.begin_recording();
    assert_worker_panicked(&task_queue);
}

#[test]
fn queue_operation_needs_a_queue() {
    let device = device("misuse unbound operation");
    let task_queue = device
        .create_task_queue(&TaskQueueDescriptor::default())
        .unwrap();
    task_queue.queue_operation(|_| {});
    assert_worker_panicked(&task_queue);
}

#[test]
#[should_panic(expected = "terminated twice")]
fn terminate_twice() {
    let device = device("misuse terminate");
    let task_queue = task_queue(&device);
    task_queue.terminate();
    task_queue.terminate();
}

#[test]
#[should_panic(expected = "is terminated")]
fn tasks_after_terminate() {
    let device = device("misuse after terminate");
    let task_queue = task_queue(&device);
    task_queue.terminate();
    task_queue.submit();
}

#[test]
fn queue_waits_order_work_across_queues() {
    let device = device("cross queue");
    device.raw().set_completion_mode(CompletionMode::Manual);
    let producer = device
        .create_queue(&hal::QueueDescriptor {
            label: Some("producer"),
            ty: QueueType::Compute,
            priority: QueuePriority::Normal,
        })
        .unwrap();
    let foreign = Arc::new(device.create_sync_point("foreign").unwrap());
    producer.signal(&foreign, 1).unwrap();
    assert_eq!(foreign.completion_value(), 0);

    let consumer = task_queue(&device);
    {
        let foreign = Arc::clone(&foreign);
        consumer.queue_operation(move |queue| queue.wait(&foreign, 1).unwrap());
    }
    consumer.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("after-wait"));

    // The consumer's submission is held back by the unfinished foreign work.
    assert_eq!(
        consumer.wait_idle_timeout(Duration::from_millis(50)),
        Err(WaitIdleError::Timeout)
    );
    assert!(device.raw().executed_markers().is_empty());
    assert_eq!(consumer.last_submission_index(), 0);
    assert_eq!(foreign.completion_value(), 0);

    device.raw().set_completion_mode(CompletionMode::Immediate);
    consumer.wait_idle().unwrap();
    assert_eq!(foreign.completion_value(), 1);
    assert_eq!(
        device.raw().executed_markers(),
        vec!["after-wait".to_string()]
    );
    assert_eq!(consumer.last_submission_index(), 1);
}

#[test]
fn failed_submission_loses_the_queue() {
    let device = device("lost");
    let task_queue = task_queue(&device);
    let calls = Arc::new(AtomicUsize::new(0));

    device.raw().fail_next_submit();
    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("doomed"));
    {
        let calls = Arc::clone(&calls);
        task_queue.on_execution_completed(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(
        task_queue.wait_idle(),
        Err(WaitIdleError::Device(DeviceError::Lost))
    );
    assert!(task_queue.is_lost());

    // Later work is skipped rather than recorded.
    task_queue.record_and_submit(|_, _| panic!("recorded on a lost queue"));
    assert_eq!(
        task_queue.wait_idle(),
        Err(WaitIdleError::Device(DeviceError::Lost))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    task_queue.join().unwrap();
}

#[test]
fn wait_idle_times_out_on_a_stalled_device() {
    let device = device("stalled");
    device.raw().set_completion_mode(CompletionMode::Manual);
    let task_queue = task_queue(&device);

    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("stalled"));
    task_queue.on_execution_completed(|| {});
    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("blocked"));
    assert_eq!(
        task_queue.wait_idle_timeout(Duration::from_millis(20)),
        Err(WaitIdleError::Timeout)
    );

    device.raw().set_completion_mode(CompletionMode::Immediate);
    task_queue.wait_idle().unwrap();
}

#[test]
fn join_waits_for_in_flight_work() {
    let device = device("join drains");
    device.raw().set_completion_mode(CompletionMode::Manual);
    let task_queue = Arc::new(task_queue(&device));
    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("in flight"));
    sync(&task_queue);

    let (sender, receiver) = mpsc::channel();
    let joiner = {
        let task_queue = Arc::clone(&task_queue);
        thread::spawn(move || {
            let result = task_queue.join();
            let _ = sender.send(());
            result.is_ok()
        })
    };
    assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(device.raw().live_objects(ObjectKind::CommandBuffer), 1);

    assert_eq!(device.raw().complete_pending(), 1);
    receiver.recv().unwrap();
    assert!(joiner.join().unwrap());
    assert_eq!(device.raw().live_objects(ObjectKind::CommandBuffer), 0);
}

#[test]
fn terminate_is_final() {
    let device = device("terminate");
    let task_queue = task_queue(&device);
    task_queue.record_and_submit(|_, cmd_buf| cmd_buf.insert_debug_marker("last"));
    task_queue.terminate();
    assert!(task_queue.is_terminated());
    task_queue.join().unwrap();
    assert_eq!(device.raw().executed_markers(), vec!["last".to_string()]);
    assert_eq!(device.raw().live_objects(ObjectKind::CommandBuffer), 0);
}
