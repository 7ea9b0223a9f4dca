//! Single-threaded cooperative task executor.
//!
//! The executor polls user futures on the simulation's dispatch thread.
//! Wakers enqueue task ids on a shared run queue; the wheel drains the
//! queue between microtask and timer dispatch so that every runnable task
//! reaches its next suspension point before virtual time advances.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as PollContext, Poll};

use futures_task::{waker, ArcWake};
use slab::Slab;

use crate::context::{self, TaskContext};

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Payload of a panic that unwound out of a task poll, a timer callback or
/// a microtask.
pub(crate) struct TaskPanic(pub(crate) Box<dyn Any + Send + 'static>);

/// A single-threaded `async` executor driven by the event wheel.
pub(crate) struct Executor {
    /// Tasks that have not completed yet.
    tasks: Slab<TaskSlot>,
    /// Ids of the tasks awaiting a poll.
    run_queue: Arc<RunQueue>,
}

impl Executor {
    /// Creates an executor that polls futures on the current thread.
    pub(crate) fn new() -> Self {
        Self {
            tasks: Slab::new(),
            run_queue: Arc::new(RunQueue::default()),
        }
    }

    /// Registers a task and marks it runnable.
    ///
    /// The task is not polled until [`run_until_stalled`](Self::run_until_stalled)
    /// is called.
    pub(crate) fn spawn(&mut self, future: TaskFuture, context: TaskContext) {
        let id = self.tasks.insert(TaskSlot {
            future: Some(future),
            context,
        });

        self.run_queue.push(id);
    }

    /// Polls runnable tasks until none remains, each under its own ambient
    /// context.
    ///
    /// Returns early with the panic payload if a poll unwinds.
    pub(crate) fn run_until_stalled(&mut self) -> Result<(), TaskPanic> {
        while let Some(id) = self.run_queue.pop() {
            // Stale wake-ups targeting completed tasks are ignored; spurious
            // polls of a task that recycled the slot are harmless.
            let Some(slot) = self.tasks.get_mut(id) else {
                continue;
            };
            let Some(mut future) = slot.future.take() else {
                continue;
            };
            let task_context = slot.context.clone();

            let waker = waker(Arc::new(TaskWaker {
                id,
                run_queue: self.run_queue.clone(),
            }));
            let mut cx = PollContext::from_waker(&waker);

            let poll = {
                let _guard = context::enter(task_context);
                panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
            };

            match poll {
                Ok(Poll::Ready(())) => {
                    self.tasks.remove(id);
                }
                Ok(Poll::Pending) => {
                    if let Some(slot) = self.tasks.get_mut(id) {
                        slot.future = Some(future);
                    }
                }
                Err(payload) => {
                    self.tasks.remove(id);

                    return Err(TaskPanic(payload));
                }
            }
        }

        Ok(())
    }

    /// Drops all tasks and orphans any outstanding waker.
    pub(crate) fn clear(&mut self) {
        self.tasks.clear();

        // Wakers created before the reset keep a handle to the old queue and
        // push into it without effect.
        self.run_queue = Arc::new(RunQueue::default());
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// A registered task and the context it runs under.
struct TaskSlot {
    /// The task future, taken out of the slot while being polled.
    future: Option<TaskFuture>,
    context: TaskContext,
}

/// Shared FIFO of runnable task ids.
#[derive(Default)]
struct RunQueue {
    ids: Mutex<VecDeque<usize>>,
}

impl RunQueue {
    fn push(&self, id: usize) {
        self.ids.lock().unwrap().push_back(id);
    }

    fn pop(&self) -> Option<usize> {
        self.ids.lock().unwrap().pop_front()
    }
}

/// Waker re-enqueueing its task on the run queue.
struct TaskWaker {
    id: usize,
    run_queue: Arc<RunQueue>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.run_queue.push(arc_self.id);
    }
}
