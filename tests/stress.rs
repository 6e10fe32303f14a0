use metronome::{Events, LoopBuilder};

use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// N threads churn watches and timers while the dispatch thread runs on
/// live sockets. The loop must survive without a crash and end with zero
/// live objects.
#[test]
fn concurrent_create_destroy_churn_ends_empty() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 50;

    let el = LoopBuilder::new()
        .granularity(Duration::from_millis(5))
        .build()
        .expect("Failed to build event loop");
    el.start().expect("Failed to start dispatch thread");

    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let el = el.clone();
        workers.push(thread::spawn(move || {
            for round in 0..ROUNDS {
                let (watched, mut peer) =
                    UnixStream::pair().expect("Failed to create socket pair");
                let mut reader = watched.try_clone().expect("Failed to clone stream");

                let watch = el
                    .watch_create(
                        watched.as_raw_fd(),
                        Events::READ,
                        Box::new(move |_el, _watch, _observed| {
                            let mut byte = [0u8; 1];
                            let _ = reader.read_exact(&mut byte);
                        }),
                    )
                    .expect("Failed to create watch");

                // Make roughly half of the watches actually fire.
                if round % 2 == 0 {
                    peer.write_all(b"x").expect("Failed to write byte");
                    thread::sleep(Duration::from_millis(1));
                }

                let timer = el
                    .timer_create((round % 3) as u64 * 5, Box::new(|_el, _timer| {}))
                    .expect("Failed to create timer");

                el.watch_destroy(watch).expect("Failed to destroy watch");
                let _ = el.timer_destroy(timer);
            }
        }));
    }

    for worker in workers {
        worker.join().expect("Worker thread panicked");
    }

    assert_eq!(el.watch_count(), 0);
    assert_eq!(el.timer_count(), 0);

    el.shutdown();
}

/// The sync bracket from an external thread must not deadlock against a
/// dispatch thread that is busy firing timers.
#[test]
fn sync_brackets_interleave_with_a_busy_loop() {
    let el = LoopBuilder::new()
        .granularity(Duration::from_millis(2))
        .build()
        .expect("Failed to build event loop");
    el.start().expect("Failed to start dispatch thread");

    // A self-re-arming timer keeps the dispatch phase hot.
    let (tx, rx) = mpsc::channel();
    let mut fired = 0u32;
    let driver = el
        .timer_create(
            0,
            Box::new(move |el, timer| {
                fired += 1;
                if fired == 200 {
                    let _ = tx.send(());
                } else {
                    el.timer_mod(timer, 1).expect("Failed to re-arm");
                }
            }),
        )
        .expect("Failed to create timer");

    let bracketeer = {
        let el = el.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                el.sync();
                let _ = el.timer_count();
                el.unsync();
            }
        })
    };

    bracketeer.join().expect("Bracket thread panicked");
    rx.recv_timeout(Duration::from_secs(10))
        .expect("Driver timer stalled");

    let _ = el.timer_destroy(driver);
    el.shutdown();
}
