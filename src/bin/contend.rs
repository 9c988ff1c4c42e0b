//! Thread-contention demo (feature-gated).
//!
//! Spawns reader and writer threads that hammer one [`PollingRwLock`] for a
//! fixed duration: writers increment a shared counter, readers observe it,
//! and every acquisition uses the same bounded wait. Prints per-role totals
//! at the end.
//!
//! Run with: `cargo run --bin contend --features cli`

use clap::Parser;
use relock::{PollingRwLock, Wait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "contend", about = "Reader/writer contention demo for relock")]
struct Args {
    /// Number of reader threads.
    #[arg(long, default_value_t = 4)]
    readers: usize,

    /// Number of writer threads.
    #[arg(long, default_value_t = 4)]
    writers: usize,

    /// How long to run, in seconds.
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,

    /// Acquisition timeout per attempt, in milliseconds (0 = no wait).
    #[arg(long, default_value_t = 60_000)]
    timeout_ms: u64,
}

#[derive(Debug, Default)]
struct Tally {
    granted: u64,
    denied: u64,
}

fn main() {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let lock = Arc::new(PollingRwLock::new());
    let counter = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let wait = Wait::from_millis(args.timeout_ms);

    let mut readers = Vec::with_capacity(args.readers);
    for id in 0..args.readers {
        let (lock, counter, stop) = (Arc::clone(&lock), Arc::clone(&counter), Arc::clone(&stop));
        readers.push(thread::spawn(move || {
            let mut tally = Tally::default();
            while !stop.load(Ordering::Relaxed) {
                let token = lock.acquire_read(wait);
                if token.is_valid() {
                    let seen = counter.load(Ordering::Relaxed);
                    tracing::trace!(reader = id, seen, "read");
                    tally.granted += 1;
                } else {
                    tally.denied += 1;
                }
            }
            tally
        }));
    }

    let mut writers = Vec::with_capacity(args.writers);
    for id in 0..args.writers {
        let (lock, counter, stop) = (Arc::clone(&lock), Arc::clone(&counter), Arc::clone(&stop));
        writers.push(thread::spawn(move || {
            let mut tally = Tally::default();
            while !stop.load(Ordering::Relaxed) {
                let token = lock.acquire_write(wait);
                if token.is_valid() {
                    // The lock provides the exclusion; the atomic only
                    // makes the cross-thread access well-defined.
                    let next = counter.load(Ordering::Relaxed) + 1;
                    counter.store(next, Ordering::Relaxed);
                    tracing::trace!(writer = id, next, "write");
                    tally.granted += 1;
                } else {
                    tally.denied += 1;
                }
            }
            tally
        }));
    }

    thread::sleep(Duration::from_secs(args.duration_secs));
    stop.store(true, Ordering::Relaxed);

    let mut reads = Tally::default();
    for handle in readers {
        let t = handle.join().expect("reader thread panicked");
        reads.granted += t.granted;
        reads.denied += t.denied;
    }
    let mut writes = Tally::default();
    for handle in writers {
        let t = handle.join().expect("writer thread panicked");
        writes.granted += t.granted;
        writes.denied += t.denied;
    }

    println!(
        "reads: {} granted, {} denied | writes: {} granted, {} denied | counter: {}",
        reads.granted,
        reads.denied,
        writes.granted,
        writes.denied,
        counter.load(Ordering::Relaxed)
    );
}
