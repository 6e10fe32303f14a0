use metronome::{Error, EventLoop, Events, LoopBuilder, Watch};

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn build_loop() -> EventLoop {
    LoopBuilder::new()
        .granularity(Duration::from_millis(5))
        .build()
        .expect("Failed to build event loop")
}

#[test]
fn readable_socket_invokes_the_handler_with_read_set() {
    let el = build_loop();
    el.start().expect("Failed to start dispatch thread");

    let (watched, mut peer) = UnixStream::pair().expect("Failed to create socket pair");
    let mut reader = watched.try_clone().expect("Failed to clone stream");
    let (tx, rx) = mpsc::channel();

    let watch = el
        .watch_create(
            watched.as_raw_fd(),
            Events::READ,
            Box::new(move |_el, _watch, observed| {
                let mut byte = [0u8; 1];
                reader.read_exact(&mut byte).expect("Failed to read byte");
                let _ = tx.send(observed);
            }),
        )
        .expect("Failed to create watch");

    peer.write_all(b"x").expect("Failed to write byte");

    let observed = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("Watch handler never ran");
    assert!(observed.contains(Events::READ));

    el.watch_destroy(watch).expect("Failed to destroy watch");
    el.shutdown();
}

#[test]
fn watch_mod_is_idempotent() {
    let el = build_loop();
    el.start().expect("Failed to start dispatch thread");

    let (watched, mut peer) = UnixStream::pair().expect("Failed to create socket pair");
    let mut reader = watched.try_clone().expect("Failed to clone stream");
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let calls_in = calls.clone();
    let watch = el
        .watch_create(
            watched.as_raw_fd(),
            Events::READ,
            Box::new(move |_el, _watch, _observed| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                let mut byte = [0u8; 1];
                reader.read_exact(&mut byte).expect("Failed to read byte");
                let _ = tx.send(());
            }),
        )
        .expect("Failed to create watch");

    // Applying the same mask twice must be observably identical to once.
    el.watch_mod(watch, Events::READ).expect("Failed to modify watch");
    el.watch_mod(watch, Events::READ).expect("Failed to modify watch");
    assert_eq!(
        el.watch_events(watch).expect("Failed to query mask"),
        Events::READ
    );

    peer.write_all(b"x").expect("Failed to write byte");
    rx.recv_timeout(Duration::from_secs(5))
        .expect("Watch handler never ran");

    // One readiness occurrence, one invocation.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    el.watch_destroy(watch).expect("Failed to destroy watch");
    el.shutdown();
}

#[test]
fn destroyed_watch_in_the_pending_result_set_never_fires() {
    let el = build_loop();

    // Both descriptors are readable before the loop starts, so the first
    // wait returns both in one result array. Each handler destroys both
    // watches; exactly one handler may run.
    let (watched_a, mut peer_a) = UnixStream::pair().expect("Failed to create socket pair");
    let (watched_b, mut peer_b) = UnixStream::pair().expect("Failed to create socket pair");
    peer_a.write_all(b"x").expect("Failed to write byte");
    peer_b.write_all(b"x").expect("Failed to write byte");

    let fired = Arc::new(AtomicUsize::new(0));
    let handles: Arc<Mutex<Vec<Watch>>> = Arc::new(Mutex::new(Vec::new()));

    let mut create = |fd: i32| {
        let fired = fired.clone();
        let handles = handles.clone();
        el.watch_create(
            fd,
            Events::READ,
            Box::new(move |el, _watch, _observed| {
                fired.fetch_add(1, Ordering::SeqCst);
                for other in handles.lock().unwrap().drain(..) {
                    let _ = el.watch_destroy(other);
                }
            }),
        )
        .expect("Failed to create watch")
    };

    let watch_a = create(watched_a.as_raw_fd());
    let watch_b = create(watched_b.as_raw_fd());
    handles.lock().unwrap().extend([watch_a, watch_b]);

    el.start().expect("Failed to start dispatch thread");
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(el.watch_count(), 0);

    el.shutdown();
}

#[test]
fn negative_descriptor_is_rejected_up_front() {
    let el = build_loop();
    let result = el.watch_create(-1, Events::READ, Box::new(|_el, _watch, _ev| {}));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn operations_on_a_destroyed_watch_are_rejected() {
    let el = build_loop();
    let (watched, _peer) = UnixStream::pair().expect("Failed to create socket pair");

    let watch = el
        .watch_create(watched.as_raw_fd(), Events::READ, Box::new(|_el, _w, _e| {}))
        .expect("Failed to create watch");

    assert_eq!(el.watch_fd(watch).expect("Failed to query fd"), watched.as_raw_fd());
    el.watch_destroy(watch).expect("Failed to destroy watch");

    assert!(matches!(el.watch_mod(watch, Events::READ), Err(Error::Stale)));
    assert!(matches!(el.watch_destroy(watch), Err(Error::Stale)));
    assert!(matches!(el.watch_fd(watch), Err(Error::Stale)));
}

#[test]
fn live_count_is_creates_minus_destroys() {
    let el = build_loop();
    el.start().expect("Failed to start dispatch thread");

    let pairs: Vec<_> = (0..8)
        .map(|_| UnixStream::pair().expect("Failed to create socket pair"))
        .collect();

    let mut watches = Vec::new();
    for (watched, _peer) in &pairs {
        let watch = el
            .watch_create(watched.as_raw_fd(), Events::READ, Box::new(|_el, _w, _e| {}))
            .expect("Failed to create watch");
        watches.push(watch);
    }
    assert_eq!(el.watch_count(), 8);

    for watch in watches.drain(..4) {
        el.watch_destroy(watch).expect("Failed to destroy watch");
    }
    assert_eq!(el.watch_count(), 4);

    for watch in watches {
        el.watch_destroy(watch).expect("Failed to destroy watch");
    }
    assert_eq!(el.watch_count(), 0);

    el.shutdown();
}

#[test]
fn sync_bracket_sees_a_quiesced_loop() {
    let el = build_loop();
    el.start().expect("Failed to start dispatch thread");

    let (watched, _peer) = UnixStream::pair().expect("Failed to create socket pair");
    let watch = el
        .watch_create(watched.as_raw_fd(), Events::READ, Box::new(|_el, _w, _e| {}))
        .expect("Failed to create watch");

    // Multi-step inspection as one atomic unit against the dispatch phase.
    el.sync();
    let count = el.watch_count();
    let fd = el.watch_fd(watch).expect("Failed to query fd");
    el.unsync();

    assert_eq!(count, 1);
    assert_eq!(fd, watched.as_raw_fd());

    el.watch_destroy(watch).expect("Failed to destroy watch");
    el.shutdown();
}
