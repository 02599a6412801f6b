use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::queue::{Queue, QueueError};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of worker threads pulling from a shared MPMC queue. Each
/// worker is pinned to one CPU when the host has enough cores to make that
/// meaningful, so request handling stays cache-local instead of bouncing
/// across sockets.
pub struct WorkerPool {
    queue: Arc<Queue<Task>>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(num_workers: usize, queue_capacity: usize) -> Self {
        let queue = Arc::new(Queue::with_capacity(queue_capacity));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers.max(1) {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    pin_to_cpu(worker_id);
                    worker_loop(queue, shutdown);
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self { queue, handles, shutdown }
    }

    /// Enqueues `task` for a worker to run. Retries briefly against transient
    /// backpressure (10 yields, then a handful of 1us sleeps) before falling
    /// back to running the task inline on the calling (reactor) thread --
    /// correctness over latency when the pool is saturated.
    pub fn submit(&self, task: Task) {
        let mut task = task;
        for attempt in 0..100 {
            match self.queue.try_enqueue(task) {
                Ok(()) => return,
                Err((QueueError::Full, t)) => {
                    task = t;
                    if attempt < 10 {
                        thread::yield_now();
                    } else {
                        thread::sleep(Duration::from_micros(1));
                    }
                }
                Err((QueueError::Empty, _)) => unreachable!("enqueue cannot fail with Empty"),
            }
        }
        task();
    }

    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(queue: Arc<Queue<Task>>, shutdown: Arc<AtomicBool>) {
    loop {
        match queue.try_dequeue() {
            Ok(task) => task(),
            Err(QueueError::Empty) => {
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                thread::sleep(Duration::from_micros(50));
            }
            Err(QueueError::Full) => unreachable!("dequeue cannot fail with Full"),
        }
    }
}

fn pin_to_cpu(worker_id: usize) {
    let ncpus = num_cpus();
    if ncpus == 0 {
        return;
    }
    let mut set = CpuSet::new();
    if set.set(worker_id % ncpus).is_err() {
        return;
    }
    let _ = sched_setaffinity(Pid::from_raw(0), &set);
}

fn num_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(0)
}
