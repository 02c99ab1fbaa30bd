#![cfg(unix)]

use mainloop::source::child::ChildWatchSource;
use mainloop::source::signal::UnixSignalSource;
use mainloop::source::timeout::TimeoutSource;
use mainloop::{Context, Continuation, MainLoop};

use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_repeated_signals_coalesce_into_one_dispatch() {
    let context = Context::new();

    let fired = Arc::new(AtomicUsize::new(0));
    let watch = UnixSignalSource::new(libc::SIGUSR1);

    let fired_in_callback = fired.clone();
    watch.set_callback(move || {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
        Continuation::Continue
    });
    watch.attach(&context).unwrap();

    // The handler is installed at watch creation; raise() delivers to
    // the calling thread synchronously.
    for _ in 0..3 {
        unsafe { libc::raise(libc::SIGUSR1) };
    }

    context.iterate(false).unwrap();
    assert_eq!(
        fired.load(Ordering::SeqCst),
        1,
        "deliveries between dispatches coalesce"
    );

    context.iterate(false).unwrap();
    assert_eq!(
        fired.load(Ordering::SeqCst),
        1,
        "no further dispatch without a new delivery"
    );

    unsafe { libc::raise(libc::SIGUSR1) };
    context.iterate(false).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 2);

    watch.destroy();
}

#[test]
fn test_watches_past_the_wake_table_capacity_still_see_deliveries() {
    // The handler's wake-descriptor table holds 32 contexts; deliveries
    // to watches beyond that are distributed on the next iteration.
    let fired = Arc::new(AtomicUsize::new(0));
    let mut contexts = Vec::new();
    let mut watches = Vec::new();

    for _ in 0..40 {
        let context = Context::new();
        let watch = UnixSignalSource::new(libc::SIGUSR2);

        let fired = fired.clone();
        watch.set_callback(move || {
            fired.fetch_add(1, Ordering::SeqCst);
            Continuation::Continue
        });
        watch.attach(&context).unwrap();

        // A first iteration binds the context's wake-up descriptor.
        context.iterate(false).unwrap();

        contexts.push(context);
        watches.push(watch);
    }

    unsafe { libc::raise(libc::SIGUSR2) };

    for context in &contexts {
        context.iterate(false).unwrap();
    }

    assert_eq!(
        fired.load(Ordering::SeqCst),
        40,
        "every watch sees the delivery, wake slot or not"
    );

    for watch in &watches {
        watch.destroy();
    }
}

#[test]
fn test_child_watch_reports_exit_status() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    // Do not call wait() on the child: the watch reaps it.
    let child = Command::new("/bin/sh")
        .args(["-c", "exit 7"])
        .spawn()
        .expect("spawn child");
    let pid = child.id() as i32;

    let reported_pid = Arc::new(AtomicI32::new(0));
    let reported_status = Arc::new(AtomicI32::new(-1));
    let watch = ChildWatchSource::new(pid);

    let reported_pid_in_callback = reported_pid.clone();
    let reported_status_in_callback = reported_status.clone();
    let quit = main_loop.clone();
    watch.set_callback(move |pid, status| {
        reported_pid_in_callback.store(pid, Ordering::SeqCst);
        reported_status_in_callback.store(status, Ordering::SeqCst);
        quit.quit();
    });
    watch.attach(&context).unwrap();

    // Fallback so a missed exit fails the test instead of hanging it.
    let timed_out = Arc::new(AtomicBool::new(false));
    let fallback = TimeoutSource::new(Duration::from_secs(5), None);
    let timed_out_in_callback = timed_out.clone();
    let quit = main_loop.clone();
    fallback.set_callback(move || {
        timed_out_in_callback.store(true, Ordering::SeqCst);
        quit.quit();
        Continuation::Remove
    });
    fallback.attach(&context).unwrap();

    main_loop.run().unwrap();

    assert!(!timed_out.load(Ordering::SeqCst), "child exit was never seen");
    assert_eq!(reported_pid.load(Ordering::SeqCst), pid);

    let status = reported_status.load(Ordering::SeqCst);
    assert!(libc::WIFEXITED(status), "child exited normally");
    assert_eq!(libc::WEXITSTATUS(status), 7, "raw waitpid status carries the exit code");

    assert!(watch.is_destroyed(), "a child watch fires once and removes itself");
    fallback.destroy();
}

#[test]
fn test_already_exited_child_is_still_reported() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    let child = Command::new("/bin/sh")
        .args(["-c", "exit 0"])
        .spawn()
        .expect("spawn child");
    let pid = child.id() as i32;

    // Give the child time to exit before the watch is created.
    std::thread::sleep(Duration::from_millis(100));

    let fired = Arc::new(AtomicBool::new(false));
    let watch = ChildWatchSource::new(pid);

    let fired_in_callback = fired.clone();
    let quit = main_loop.clone();
    watch.set_callback(move |_, _| {
        fired_in_callback.store(true, Ordering::SeqCst);
        quit.quit();
    });
    watch.attach(&context).unwrap();

    main_loop.run().unwrap();
    assert!(fired.load(Ordering::SeqCst), "registration probes for an early exit");
}
