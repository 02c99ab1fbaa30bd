use mainloop::{CancellationToken, Context, MainLoop};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[test]
fn test_cancel_is_idempotent_and_observable() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());

    token.cancel();
    token.cancel();
    assert!(token.is_cancelled());
    assert!(token.clone().is_cancelled(), "clones share the latch");
}

#[test]
fn test_wait_unblocks_on_cancel_from_another_thread() {
    let token = CancellationToken::new();

    let to_cancel = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        to_cancel.cancel();
    });

    let start = Instant::now();
    token.wait();
    canceller.join().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_wait_timeout_expires_without_cancel() {
    let token = CancellationToken::new();
    assert!(!token.wait_timeout(Duration::from_millis(20)));

    token.cancel();
    assert!(token.wait_timeout(Duration::from_millis(20)));
}

#[test]
fn test_cancel_source_fires_once_and_wakes_the_loop() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);
    let token = CancellationToken::new();

    let fired = Arc::new(AtomicUsize::new(0));
    let source = token.cancelled_source();

    let fired_in_callback = fired.clone();
    let quit = main_loop.clone();
    source.set_callback(move || {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
        quit.quit();
    });
    source.attach(&context).unwrap();

    // One quiet iteration registers the context for cancel wake-ups.
    let to_cancel = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        to_cancel.cancel();
    });

    let start = Instant::now();
    main_loop.run().unwrap();
    canceller.join().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "cancel interrupts a blocked poll"
    );
    assert!(source.is_destroyed(), "a cancel source fires once");
}

#[test]
fn test_source_from_cancelled_token_fires_immediately() {
    let context = Context::new();
    let token = CancellationToken::new();
    token.cancel();

    let fired = Arc::new(AtomicUsize::new(0));
    let source = token.cancelled_source();

    let fired_in_callback = fired.clone();
    source.set_callback(move || {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
    });
    source.attach(&context).unwrap();

    context.iterate(false).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
