#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filmlist_store::{Worker, WorkerError};

#[tokio::test]
async fn runs_jobs_in_submission_order() {
    let worker = Worker::spawn("test-worker", 64).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let jobs = (0..16).map(|i| {
        let seen = Arc::clone(&seen);
        worker.submit(move || {
            seen.lock().unwrap().push(i);
            i * 2
        })
    });
    let results: Vec<_> = futures::future::join_all(jobs).await;
    let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, (0..16).map(|i| i * 2).collect::<Vec<_>>());
    assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    worker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_runs_two_jobs_at_once() {
    let worker = Arc::new(Worker::spawn("test-worker", 8).unwrap());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let worker = Arc::clone(&worker);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            worker
                .submit(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panic_is_reported_and_worker_survives() {
    let worker = Worker::spawn("test-worker", 4).unwrap();
    let res: Result<(), WorkerError> = worker.submit(|| panic!("boom")).await;
    assert!(matches!(res, Err(WorkerError::Panicked)));
    assert_eq!(worker.submit(|| 7).await.unwrap(), 7);
    worker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_drains_queued_work() {
    let worker = Arc::new(Worker::spawn("test-worker", 8).unwrap());
    let done = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..3 {
        let worker = Arc::clone(&worker);
        let done = Arc::clone(&done);
        tasks.push(tokio::spawn(async move {
            worker
                .submit(move || {
                    std::thread::sleep(Duration::from_millis(20));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await
        }));
    }
    while worker.pending() + done.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    worker.shutdown().await;
    assert_eq!(done.load(Ordering::SeqCst), 3);
    for t in tasks {
        assert!(t.await.unwrap().is_ok());
    }
    assert!(matches!(worker.submit(|| ()).await, Err(WorkerError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_submit_on_full_queue_is_not_counted() {
    let worker = Arc::new(Worker::spawn("test-worker", 1).unwrap());
    let spawn_sleeper = |ms: u64| {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.submit(move || std::thread::sleep(Duration::from_millis(ms))).await })
    };
    let running = spawn_sleeper(300);
    while worker.pending() < 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let queued = spawn_sleeper(10);
    while worker.pending() < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The queue holds one job and the thread is busy: this submit can only wait for room.
    let gave_up = tokio::time::timeout(Duration::from_millis(20), worker.submit(|| ())).await;
    assert!(gave_up.is_err());
    assert_eq!(worker.pending(), 2);

    running.await.unwrap().unwrap();
    queued.await.unwrap().unwrap();
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while worker.pending() != 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "pending stuck at {}", worker.pending());
    worker.shutdown().await;
}
