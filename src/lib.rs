//! # Mainloop
//!
//! **Mainloop** is a cooperative event-loop engine for Rust: a single
//! thread multiplexes timers, idle work, file-descriptor readiness,
//! Unix signals, child-process exits, and cross-thread invocations
//! through one poll call per iteration.
//!
//! The building blocks:
//!
//! - A **[`Context`]** owns the attached sources and drives the
//!   iteration protocol: prepare, poll, check, dispatch
//! - A **[`Source`]** is one participant — anything implementing
//!   [`SourceFuncs`] — dispatched in priority order when ready
//! - A **[`MainLoop`]** iterates a context until `quit` is called
//! - A **wake-up channel** lets other threads interrupt a blocked poll,
//!   so cross-thread hand-off needs no busy waiting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mainloop::{Context, Continuation, MainLoop};
//! use mainloop::source::timeout::TimeoutSource;
//! use std::time::Duration;
//!
//! let context = Context::new();
//! let main_loop = MainLoop::new(&context);
//!
//! let timer = TimeoutSource::new(Duration::from_millis(100), None);
//! let quit = main_loop.clone();
//! timer.set_callback(move || {
//!     quit.quit();
//!     Continuation::Remove
//! });
//! timer.attach(&context).unwrap();
//!
//! main_loop.run().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`context`] — The iteration engine and ownership protocol
//! - [`source`] — The source trait and the built-in source types
//! - [`priority`] — Well-known dispatch priorities

mod cancel;
mod clock;
mod error;
mod main_loop;
mod poll;
mod wakeup;

pub mod context;
pub mod source;

pub use cancel::{CancelSource, CancellationToken};
pub use clock::monotonic_time;
pub use context::{Context, DispatchOutcome, PanicObserver};
pub use error::{AcquireError, AttachError, PollError};
pub use main_loop::MainLoop;
pub use poll::common::{IoCondition, PollCell, PollHandle, PollRecord};
pub use source::{Continuation, Source, SourceFuncs, SourceId};

/// Well-known source priorities. Lower numeric values run first.
pub mod priority {
    /// Runs before every default-priority source.
    pub const HIGH: i32 = -100;
    /// Default for timers, fd sources, and invoke queues.
    pub const DEFAULT: i32 = 0;
    /// Idle work that should still beat ordinary idle sources.
    pub const HIGH_IDLE: i32 = 100;
    /// Default for idle sources.
    pub const DEFAULT_IDLE: i32 = 200;
    /// Runs only when nothing else wants the thread.
    pub const LOW: i32 = 300;
}
