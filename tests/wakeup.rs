use mainloop::{Context, DispatchOutcome, MainLoop};

use std::time::{Duration, Instant};

#[test]
fn test_quit_from_another_thread_unblocks_run() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    let quit = main_loop.clone();
    let quitter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        quit.quit();
    });

    let start = Instant::now();
    // No sources are attached; run blocks in the poll until woken.
    main_loop.run().unwrap();
    quitter.join().unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(30));
    assert!(
        elapsed < Duration::from_millis(500),
        "quit must interrupt a blocked poll promptly"
    );
    assert!(!main_loop.is_running());
}

#[test]
fn test_quit_before_run_returns_without_iterating() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    main_loop.quit();

    let start = Instant::now();
    main_loop.run().unwrap();
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "a loop quit before run must not block"
    );
}

#[test]
fn test_cross_thread_attach_interrupts_a_long_poll() {
    use mainloop::Continuation;
    use mainloop::source::idle::IdleSource;
    use mainloop::source::timeout::TimeoutSource;

    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    // The only source is an hour away, so the poll would sleep forever.
    let far_timer = TimeoutSource::new(Duration::from_secs(3600), None);
    far_timer.set_callback(|| Continuation::Remove);
    far_timer.attach(&context).unwrap();

    let foreign_context = context.clone();
    let quit = main_loop.clone();
    let attacher = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        foreign_context.wakeup();

        let idle = IdleSource::new();
        idle.set_callback(move || {
            quit.quit();
            Continuation::Remove
        });
        idle.attach(&foreign_context).unwrap();
    });

    let start = Instant::now();
    main_loop.run().unwrap();
    attacher.join().unwrap();

    assert!(
        start.elapsed() < Duration::from_millis(500),
        "attaching from another thread reaches a blocked loop promptly"
    );
}

#[test]
fn test_redundant_wakeups_coalesce() {
    let context = Context::new();

    for _ in 0..16 {
        context.wakeup();
    }

    let start = Instant::now();
    let outcome = context.iterate(true).unwrap();
    assert_eq!(outcome, DispatchOutcome::IdledOut);

    // The channel was drained by the first iteration; the second sees a
    // quiet poll with a zero timeout.
    let outcome = context.iterate(false).unwrap();
    assert_eq!(outcome, DispatchOutcome::IdledOut);

    assert!(
        start.elapsed() < Duration::from_millis(500),
        "sixteen wake-ups cost one spurious poll return, not sixteen"
    );
}
