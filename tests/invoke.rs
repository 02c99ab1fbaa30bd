use mainloop::source::invoke::InvokeSource;
use mainloop::{Context, MainLoop};

use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_invoked_closures_run_in_enqueue_order() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    let invoke = InvokeSource::new();
    let handle = invoke.handle();
    invoke.attach(&context).unwrap();

    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let seen_for_producer = seen.clone();
    let quit = main_loop.clone();
    let producer = std::thread::spawn(move || {
        for value in 0..1000u32 {
            let seen = seen_for_producer.clone();
            handle.invoke(move || seen.lock().unwrap().push(value));
        }
        handle.invoke(move || quit.quit());
    });

    main_loop.run().unwrap();
    producer.join().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1000, "every closure enqueued before quit ran");
    assert!(
        seen.windows(2).all(|pair| pair[0] < pair[1]),
        "closures run in enqueue order"
    );
}

#[test]
fn test_invoke_wakes_a_blocked_loop() {
    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    let invoke = InvokeSource::new();
    let handle = invoke.handle();
    invoke.attach(&context).unwrap();

    let quit = main_loop.clone();
    let producer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        handle.invoke(move || quit.quit());
    });

    let start = std::time::Instant::now();
    main_loop.run().unwrap();
    producer.join().unwrap();

    assert!(
        start.elapsed() < Duration::from_millis(500),
        "an invoke from another thread must interrupt a blocked poll promptly"
    );
}

#[test]
fn test_invoke_after_destroy_is_dropped() {
    let context = Context::new();

    let invoke = InvokeSource::new();
    let handle = invoke.handle();
    invoke.attach(&context).unwrap();
    invoke.destroy();

    let ran = Arc::new(Mutex::new(false));
    let ran_in_closure = ran.clone();
    let marker = Arc::new(());
    let marker_in_closure = marker.clone();
    handle.invoke(move || {
        let _ = &marker_in_closure;
        *ran_in_closure.lock().unwrap() = true;
    });

    context.iterate(false).unwrap();
    context.iterate(false).unwrap();

    assert!(
        !*ran.lock().unwrap(),
        "closures enqueued after destroy never run"
    );
    assert_eq!(
        Arc::strong_count(&marker),
        1,
        "the closure is dropped rather than queued forever"
    );
}
