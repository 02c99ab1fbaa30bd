use mainloop::{AcquireError, Context, DispatchOutcome};

use std::time::Duration;

#[test]
fn test_acquire_is_recursive_on_one_thread() {
    let context = Context::new();

    assert!(!context.is_owner());
    context.acquire().unwrap();
    context.acquire().unwrap();
    assert!(context.is_owner());

    context.release();
    assert!(context.is_owner(), "ownership holds until the outermost release");
    context.release();
    assert!(!context.is_owner());
}

#[test]
fn test_acquire_fails_while_another_thread_owns() {
    let context = Context::new();
    context.acquire().unwrap();

    let contender = context.clone();
    let result = std::thread::spawn(move || contender.acquire())
        .join()
        .unwrap();

    assert_eq!(result, Err(AcquireError::Contended));
    context.release();
}

#[test]
fn test_nonblocking_iterate_yields_to_a_foreign_owner() {
    let context = Context::new();
    context.acquire().unwrap();

    let foreign = context.clone();
    let outcome = std::thread::spawn(move || foreign.iterate(false))
        .join()
        .unwrap()
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::NotOwner);
    assert!(context.is_owner(), "the owner is unaffected");
    context.release();
}

#[test]
fn test_blocking_iterate_waits_for_the_owner_to_release() {
    let context = Context::new();
    context.acquire().unwrap();

    let foreign = context.clone();
    let waiter = std::thread::spawn(move || foreign.iterate(true));

    // Pre-arm the wake-up channel so the iteration returns as soon as it
    // gets ownership, then hand it over.
    std::thread::sleep(Duration::from_millis(30));
    context.wakeup();
    context.release();

    let outcome = waiter.join().unwrap().unwrap();
    assert_eq!(outcome, DispatchOutcome::IdledOut);
}
