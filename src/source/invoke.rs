//! Cross-thread invoke sources.
//!
//! An invoke source owns a queue of closures that any thread can feed
//! through a cloneable [`InvokeHandle`]. The owning context dispatches
//! them in enqueue order on its own thread. Each dispatch drains a
//! bounded batch and then yields, so a busy queue cannot starve other
//! sources of the same priority.

use super::{Continuation, Source, SourceFuncs};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Closures drained per dispatch before yielding back to the loop.
const BATCH: usize = 32;

type Task = Box<dyn FnOnce() + Send>;

struct Queue {
    tasks: Mutex<VecDeque<Task>>,
}

struct InvokeFuncs {
    queue: Arc<Queue>,
}

impl SourceFuncs for InvokeFuncs {
    fn prepare(&mut self, _source: &Source, _now: i64) -> (bool, Option<Duration>) {
        if self.queue.tasks.lock().unwrap().is_empty() {
            (false, None)
        } else {
            (true, Some(Duration::ZERO))
        }
    }

    fn check(&mut self, _source: &Source, _now: i64) -> bool {
        !self.queue.tasks.lock().unwrap().is_empty()
    }

    fn dispatch(&mut self, _source: &Source) -> Continuation {
        for _ in 0..BATCH {
            // Pop one task at a time so enqueuers are never blocked for
            // the duration of a callback.
            let task = self.queue.tasks.lock().unwrap().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }

        Continuation::Continue
    }

    fn finalize(&mut self, _source: &Source) {
        self.queue.tasks.lock().unwrap().clear();
    }
}

/// A source dispatching closures enqueued from other threads.
pub struct InvokeSource {
    source: Source,
    queue: Arc<Queue>,
}

impl InvokeSource {
    /// Creates an invoke source with an empty queue.
    pub fn new() -> InvokeSource {
        let queue = Arc::new(Queue {
            tasks: Mutex::new(VecDeque::new()),
        });

        let source = Source::new(Box::new(InvokeFuncs {
            queue: queue.clone(),
        }));

        InvokeSource { source, queue }
    }

    /// Returns a handle through which any thread can enqueue closures.
    pub fn handle(&self) -> InvokeHandle {
        InvokeHandle {
            source: self.source.clone(),
            queue: self.queue.clone(),
        }
    }

    /// Consumes the wrapper, leaving the plain source handle.
    pub fn into_source(self) -> Source {
        self.source
    }
}

impl Default for InvokeSource {
    fn default() -> InvokeSource {
        InvokeSource::new()
    }
}

impl std::ops::Deref for InvokeSource {
    type Target = Source;

    fn deref(&self) -> &Source {
        &self.source
    }
}

/// Cloneable enqueue side of an [`InvokeSource`].
#[derive(Clone)]
pub struct InvokeHandle {
    source: Source,
    queue: Arc<Queue>,
}

impl InvokeHandle {
    /// Enqueues a closure for dispatch on the source's context, in
    /// enqueue order, no earlier than the next iteration. Wakes the
    /// context so a blocked poll picks the work up promptly.
    ///
    /// Closures handed to a destroyed source are dropped immediately:
    /// nothing will ever drain the queue again.
    pub fn invoke<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.source.is_destroyed() {
            return;
        }

        self.queue.tasks.lock().unwrap().push_back(Box::new(task));

        if let Some(context) = self.source.context() {
            context.inner().signal_wakeup();
        }
    }
}
