//! Fixed-size worker pool backing the sorter.
//!
//! Tasks are boxed closures pulled from a queue protected by a mutex and a
//! condition variable. `submit` hands back a typed handle that completes when
//! the task has run. The pool is not reentrant: a task that submits and waits
//! on further tasks can deadlock a saturated pool, so callers keep their
//! fan-out bounded and non-recursive (the sorter submits one flat task set
//! per level).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: VecDeque<Job>,
    stop: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// A pool of OS worker threads.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool with the given number of workers (at least one).
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..workers.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// The lazily-initialized process-wide pool, sized to the hardware
    /// concurrency. Sorters use this unless a pool is injected.
    pub fn global() -> &'static Arc<ThreadPool> {
        static POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();

        POOL.get_or_init(|| {
            let workers = thread::available_parallelism().map_or(1, |n| n.get());
            Arc::new(ThreadPool::new(workers))
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task; the returned handle completes once a worker has run it.
    pub fn submit<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let state = Arc::new(TaskState {
            result: Mutex::new(None),
            done: Condvar::new(),
        });

        let task_state = Arc::clone(&state);
        let wrapped: Job = Box::new(move || {
            let value = job();
            *task_state.result.lock().unwrap() = Some(value);
            task_state.done.notify_all();
        });

        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.jobs.push_back(wrapped);
        }
        self.shared.available.notify_one();

        TaskHandle { state }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stop = true;
        }
        self.shared.available.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                // Drain remaining work even when stopping.
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.stop {
                    return;
                }
                queue = shared.available.wait(queue).unwrap();
            }
        };

        job();
    }
}

struct TaskState<T> {
    result: Mutex<Option<T>>,
    done: Condvar,
}

/// Completion handle for a submitted task.
pub struct TaskHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run, then take its result.
    pub fn wait(self) -> T {
        let mut result = self.state.result.lock().unwrap();
        loop {
            if let Some(value) = result.take() {
                return value;
            }
            result = self.state.done.wait(result).unwrap();
        }
    }
}
