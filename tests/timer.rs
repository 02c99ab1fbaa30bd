use mainloop::source::timeout::TimeoutSource;
use mainloop::{Context, Continuation, MainLoop, monotonic_time};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[test]
fn test_one_shot_timer_fires_once() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    let fired = Arc::new(AtomicUsize::new(0));
    let timer = TimeoutSource::new(Duration::from_millis(30), None);

    let fired_in_callback = fired.clone();
    let quit = main_loop.clone();
    timer.set_callback(move || {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
        quit.quit();
        Continuation::Remove
    });

    let start = Instant::now();
    timer.attach(&context).unwrap();
    main_loop.run().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1, "one-shot fires exactly once");
    assert!(
        start.elapsed() >= Duration::from_millis(30),
        "timer must not fire before its delay"
    );
    assert!(timer.is_destroyed(), "Remove destroys the source");
}

#[test]
fn test_repeating_timer_counts_down() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    let fired = Arc::new(AtomicUsize::new(0));
    let timer = TimeoutSource::new(Duration::from_millis(5), Some(Duration::from_millis(5)));

    let fired_in_callback = fired.clone();
    let quit = main_loop.clone();
    timer.set_callback(move || {
        if fired_in_callback.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            quit.quit();
            Continuation::Remove
        } else {
            Continuation::Continue
        }
    });

    timer.attach(&context).unwrap();
    main_loop.run().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 3, "repeating timer fires until removed");
}

#[test]
fn test_repeating_timer_skips_missed_intervals() {
    let context = Context::new();

    let fired = Arc::new(AtomicUsize::new(0));
    let timer = TimeoutSource::new(Duration::from_millis(10), Some(Duration::from_millis(10)));

    let fired_in_callback = fired.clone();
    timer.set_callback(move || {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
        Continuation::Continue
    });
    timer.attach(&context).unwrap();

    // Sleep over several intervals before iterating once.
    std::thread::sleep(Duration::from_millis(45));
    context.iterate(true).unwrap();

    assert_eq!(
        fired.load(Ordering::SeqCst),
        1,
        "missed intervals coalesce into a single dispatch"
    );
    let next = timer.ready_time().expect("repeating timer keeps a deadline");
    assert!(
        next > monotonic_time(),
        "the next deadline is strictly in the future"
    );

    timer.destroy();
}

#[test]
fn test_seconds_timer_expiration_is_second_aligned() {
    let timer = TimeoutSource::seconds(Duration::from_secs(2));

    let expiration = timer.ready_time().expect("seconds timer has a deadline");
    assert_eq!(
        expiration % 1_000_000,
        0,
        "seconds-granularity deadlines sit on second boundaries"
    );

    timer.destroy();
}

#[test]
fn test_zero_delay_timer_dispatches_on_first_iteration() {
    let context = Context::new();

    let fired = Arc::new(AtomicUsize::new(0));
    let timer = TimeoutSource::new(Duration::ZERO, None);

    let fired_in_callback = fired.clone();
    timer.set_callback(move || {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
        Continuation::Remove
    });
    timer.attach(&context).unwrap();

    context.iterate(false).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
