//! Worker pool tests.

use std::sync::mpsc;
use std::time::Duration;
use tcpconn::WorkerPool;

#[test]
fn runs_jobs_on_named_threads() {
    let pool = WorkerPool::new(2, "test-pool").unwrap();
    assert_eq!(pool.size(), 2);

    let (tx, rx) = mpsc::channel();
    for n in 0..4 {
        let tx = tx.clone();
        pool.execute(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send((n, name)).unwrap();
        });
    }

    let mut seen: Vec<_> = (0..4)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    seen.sort_by_key(|(n, _)| *n);
    for (n, (job, name)) in seen.into_iter().enumerate() {
        assert_eq!(job, n);
        assert!(name.unwrap().starts_with("test-pool-"));
    }
}

#[test]
fn survives_panicking_job() {
    let pool = WorkerPool::new(1, "panic-pool").unwrap();
    pool.execute(|| panic!("job failure"));

    let (tx, rx) = mpsc::channel();
    pool.execute(move || tx.send("still alive").unwrap());
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        "still alive"
    );
}

#[test]
fn zero_size_gets_one_worker() {
    let pool = WorkerPool::new(0, "tiny-pool").unwrap();
    assert_eq!(pool.size(), 1);
}
