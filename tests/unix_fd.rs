#![cfg(unix)]

use mainloop::source::unix_fd::UnixFdSource;
use mainloop::{Context, Continuation, DispatchOutcome, IoCondition, MainLoop};

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn pipe_pair() -> (RawFd, RawFd) {
    let mut fds = [0 as libc::c_int; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed");
    (fds[0], fds[1])
}

fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}

#[test]
fn test_fd_source_dispatches_when_readable() {
    let (read_fd, write_fd) = pipe_pair();

    let context = Context::new();
    let main_loop = MainLoop::new(&context);

    let observed: Arc<Mutex<Option<IoCondition>>> = Arc::new(Mutex::new(None));
    let watch = UnixFdSource::new(read_fd, IoCondition::IN);

    let observed_in_callback = observed.clone();
    let quit = main_loop.clone();
    watch.set_callback(move |revents| {
        let mut byte = [0u8; 1];
        unsafe { libc::read(read_fd, byte.as_mut_ptr().cast(), 1) };

        *observed_in_callback.lock().unwrap() = Some(revents);
        quit.quit();
        Continuation::Remove
    });
    watch.attach(&context).unwrap();

    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        let byte = [0x2au8];
        unsafe { libc::write(write_fd, byte.as_ptr().cast(), 1) };
    });

    let start = Instant::now();
    main_loop.run().unwrap();
    writer.join().unwrap();

    let revents = observed.lock().unwrap().expect("callback ran");
    assert!(revents.contains(IoCondition::IN), "read readiness is reported");
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "the poll wakes as soon as the descriptor becomes readable"
    );

    close_fd(read_fd);
    close_fd(write_fd);
}

#[test]
fn test_fd_source_does_not_dispatch_while_quiet() {
    let (read_fd, write_fd) = pipe_pair();

    let context = Context::new();
    let watch = UnixFdSource::new(read_fd, IoCondition::IN);
    watch.set_callback(|_| Continuation::Continue);
    watch.attach(&context).unwrap();

    let outcome = context.iterate(false).unwrap();
    assert_eq!(outcome, DispatchOutcome::IdledOut, "no data, no dispatch");

    watch.destroy();
    close_fd(read_fd);
    close_fd(write_fd);
}

#[test]
fn test_closed_writer_reports_hangup() {
    let (read_fd, write_fd) = pipe_pair();
    close_fd(write_fd);

    let context = Context::new();

    let observed: Arc<Mutex<Option<IoCondition>>> = Arc::new(Mutex::new(None));
    let watch = UnixFdSource::new(read_fd, IoCondition::IN);

    let observed_in_callback = observed.clone();
    watch.set_callback(move |revents| {
        *observed_in_callback.lock().unwrap() = Some(revents);
        Continuation::Remove
    });
    watch.attach(&context).unwrap();

    context.iterate(true).unwrap();

    let revents = observed.lock().unwrap().expect("hangup dispatches the source");
    assert!(
        revents.intersects(IoCondition::HUP | IoCondition::IN),
        "a pipe with no writer reports hangup, got {revents:?}"
    );

    close_fd(read_fd);
}
