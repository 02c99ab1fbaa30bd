use mainloop::source::idle::IdleSource;
use mainloop::{Context, Continuation, DispatchOutcome};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[test]
fn test_nested_iteration_dispatches_newly_attached_sources() {
    let context = Context::new();

    let outer_runs = Arc::new(AtomicUsize::new(0));
    let inner_ran = Arc::new(AtomicBool::new(false));

    let outer = IdleSource::new();
    let context_for_outer = context.clone();
    let outer_runs_in_callback = outer_runs.clone();
    let inner_ran_for_outer = inner_ran.clone();
    outer.set_callback(move || {
        outer_runs_in_callback.fetch_add(1, Ordering::SeqCst);

        let inner = IdleSource::new();
        let inner_ran = inner_ran_for_outer.clone();
        inner.set_callback(move || {
            inner_ran.store(true, Ordering::SeqCst);
            Continuation::Remove
        });
        inner.attach(&context_for_outer).unwrap();

        // Ownership is recursive on the dispatching thread, so a nested
        // iteration from inside a callback is allowed.
        let outcome = context_for_outer.iterate(false).unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched(1),
            "the nested iteration dispatches the new source"
        );

        Continuation::Remove
    });

    outer.attach(&context).unwrap();
    context.iterate(false).unwrap();

    assert!(inner_ran.load(Ordering::SeqCst));
    assert_eq!(
        outer_runs.load(Ordering::SeqCst),
        1,
        "a source mid-dispatch is not re-entered by the nested iteration"
    );
}

#[test]
fn test_source_in_dispatch_is_skipped_by_nested_iteration() {
    let context = Context::new();

    let runs = Arc::new(AtomicUsize::new(0));
    let idle = IdleSource::new();

    let context_for_callback = context.clone();
    let runs_in_callback = runs.clone();
    idle.set_callback(move || {
        runs_in_callback.fetch_add(1, Ordering::SeqCst);

        // The only attached source is mid-dispatch, so the nested
        // iteration has nothing to run.
        let outcome = context_for_callback.iterate(false).unwrap();
        assert_eq!(outcome, DispatchOutcome::IdledOut);

        Continuation::Remove
    });

    idle.attach(&context).unwrap();
    context.iterate(false).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
