#[cfg(test)]
mod tests {
    use background_dispatch::{
        config::{Config, ENV_OVERFLOW, ENV_POLL_INTERVAL_MS, ENV_QUEUE_CAPACITY, ENV_WORKERS},
        errors::{ConfigError, JobError, StartError, SubmitError},
        model::{Lifecycle, Overflow},
        pool::DispatchPool,
    };
    use crossbeam::channel;
    use parking_lot::Mutex;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    fn init_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn fast_config(workers: usize) -> Config {
        Config::default()
            .with_workers(workers)
            .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_fifo_single_worker() {
        println!("\n=== TEST: FIFO with a single worker ===");
        init_logging();
        let pool = DispatchPool::start(Config::single_lane()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["A", "B", "C"] {
            let seen = seen.clone();
            pool.submit(move || -> Result<(), JobError> {
                seen.lock().push(name);
                Ok(())
            })
            .unwrap();
        }
        pool.drain();

        assert_eq!(*seen.lock(), vec!["A", "B", "C"]);
        pool.stop();
        println!("  ✓ Executed in submission order");
    }

    #[test]
    fn test_fifo_long_sequence() {
        println!("\n=== TEST: FIFO across 500 items ===");
        let pool = DispatchPool::start(Config::single_lane()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::with_capacity(500)));

        for i in 0..500usize {
            let seen = seen.clone();
            pool.submit_fn("append", move || -> Result<(), JobError> {
                seen.lock().push(i);
                Ok(())
            })
            .unwrap();
        }
        pool.drain();

        let expected: Vec<usize> = (0..500).collect();
        assert_eq!(*seen.lock(), expected);
        pool.stop();
    }

    #[test]
    fn test_failure_isolation() {
        println!("\n=== TEST: Failing jobs do not kill the worker ===");
        init_logging();
        let pool = DispatchPool::start(Config::single_lane()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit_fn("always-fails", || -> Result<(), String> {
            Err("database unreachable".to_owned())
        })
        .unwrap();
        pool.submit_fn("always-panics", || -> Result<(), JobError> {
            panic!("kaboom");
        })
        .unwrap();
        let c = counter.clone();
        pool.submit(move || -> Result<(), JobError> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        pool.drain();

        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The lone worker survived both failures and keeps going.
        let c = counter.clone();
        pool.submit(move || -> Result<(), JobError> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        pool.drain();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let metrics = pool.metrics();
        assert_eq!(metrics.failed_tasks, 2);
        assert_eq!(metrics.completed_tasks, 2);
        assert_eq!(metrics.workers, 1);
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);
        pool.stop();
        println!("  ✓ Errors and panics isolated");
    }

    #[test]
    fn test_graceful_shutdown_waits_for_running_job() {
        println!("\n=== TEST: stop() waits for the in-flight job ===");
        let pool = DispatchPool::start(fast_config(2)).unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = channel::bounded::<()>(1);

        let done = finished.clone();
        pool.submit_fn("slow", move || -> Result<(), JobError> {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(300));
            done.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.stop();

        assert!(finished.load(Ordering::SeqCst), "stop returned before the job finished");
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(pool.lifecycle(), Lifecycle::Stopped);
        println!("  ✓ Job completed and all workers exited");
    }

    #[test]
    fn test_stop_right_after_submit_runs_job() {
        println!("\n=== TEST: stop() immediately after submit() ===");
        const ROUNDS: usize = 500;
        let mut lost = 0;

        for _ in 0..ROUNDS {
            let pool = DispatchPool::start(
                Config::single_lane().with_poll_interval(Duration::from_millis(20)),
            )
            .unwrap();
            let ran = Arc::new(AtomicBool::new(false));
            let flag = ran.clone();
            pool.submit(move || -> Result<(), JobError> {
                thread::sleep(Duration::from_millis(1));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
            pool.stop();

            if !ran.load(Ordering::SeqCst) {
                lost += 1;
            }
        }

        assert_eq!(lost, 0, "{lost} of {ROUNDS} jobs submitted before stop() never ran");
        println!("  ✓ {ROUNDS} rounds, no job lost");
    }

    #[test]
    fn test_stop_runs_queued_backlog() {
        println!("\n=== TEST: stop() runs the backlog queued before it ===");
        let pool = DispatchPool::start(fast_config(2)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..200 {
            let c = counter.clone();
            pool.submit(move || -> Result<(), JobError> {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        pool.stop();

        assert_eq!(counter.load(Ordering::SeqCst), 200);
        assert_eq!(pool.metrics().queued_tasks, 0);
        assert!(pool.drain_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn test_last_handle_dropped_inside_job() {
        println!("\n=== TEST: Pool dropped from one of its own jobs ===");
        init_logging();
        let pool = Arc::new(DispatchPool::start(fast_config(2)).unwrap());
        let token = pool.shutdown_token();
        let (gate_tx, gate_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let inner = Arc::clone(&pool);
        pool.submit_fn("owner", move || -> Result<(), JobError> {
            gate_rx.recv_timeout(Duration::from_secs(5))?;
            // Last handle: runs `stop` on this worker thread.
            drop(inner);
            let _ = done_tx.send(());
            Ok(())
        })
        .unwrap();

        drop(pool);
        gate_tx.send(()).unwrap();

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("job did not get past dropping the pool");
        assert!(token.is_cancelled());
        println!("  ✓ Stop from a worker thread did not try to join itself");
    }

    #[test]
    fn test_stop_wakes_idle_workers() {
        println!("\n=== TEST: stop() does not wait out the poll interval ===");
        let config = Config::default()
            .with_workers(4)
            .with_poll_interval(Duration::from_secs(30));
        let pool = DispatchPool::start(config).unwrap();

        let started = Instant::now();
        pool.stop();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_idempotent_drain() {
        println!("\n=== TEST: Repeated drain ===");
        let pool = DispatchPool::start(fast_config(3)).unwrap();

        // Nothing submitted yet.
        pool.drain();

        for _ in 0..10 {
            pool.submit(|| -> Result<(), JobError> { Ok(()) }).unwrap();
        }
        pool.drain();

        let started = Instant::now();
        pool.drain();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(pool.metrics().completed_tasks, 10);
        pool.stop();
    }

    #[test]
    fn test_two_workers_hundred_items() {
        println!("\n=== TEST: 2 workers, 100 indexed items ===");
        let pool = DispatchPool::new(2).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100usize {
            let seen = seen.clone();
            pool.submit(move || -> Result<(), JobError> {
                seen.lock().push(i);
                Ok(())
            })
            .unwrap();
        }
        pool.drain();

        let mut seen = seen.lock().clone();
        assert_eq!(seen.len(), 100);
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        pool.stop();
        println!("  ✓ All 100 items ran exactly once");
    }

    #[test]
    fn test_submit_after_stop_is_rejected() {
        println!("\n=== TEST: Submit after stop ===");
        init_logging();
        let pool = DispatchPool::start(fast_config(2)).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        pool.stop();

        let flag = ran.clone();
        let result = pool.submit(move || -> Result<(), JobError> {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(result, Err(SubmitError::Stopped));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(pool.metrics().rejected_tasks, 1);
        assert_eq!(pool.metrics().total_submitted, 0);

        // Still consistent afterwards.
        pool.drain();
        pool.stop();
        assert_eq!(pool.lifecycle(), Lifecycle::Stopped);
        println!("  ✓ Rejected without side effects");
    }

    #[test]
    fn test_drain_timeout() {
        println!("\n=== TEST: Bounded drain ===");
        let pool = DispatchPool::start(fast_config(1)).unwrap();
        let (release_tx, release_rx) = channel::bounded::<()>(1);

        pool.submit_fn("gated", move || -> Result<(), JobError> {
            release_rx.recv()?;
            Ok(())
        })
        .unwrap();

        assert!(!pool.drain_timeout(Duration::from_millis(50)));
        release_tx.send(()).unwrap();
        assert!(pool.drain_timeout(Duration::from_secs(5)));
        pool.stop();
    }

    #[test]
    fn test_drop_stops_pool() {
        println!("\n=== TEST: Dropping a running pool ===");
        let token = {
            let pool = DispatchPool::start(fast_config(2)).unwrap();
            let token = pool.shutdown_token();
            assert!(!token.is_cancelled());
            token
        };
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_worker_thread_names() {
        println!("\n=== TEST: Worker threads carry the configured prefix ===");
        let pool = DispatchPool::start(fast_config(1).with_thread_prefix("notify")).unwrap();
        let name = Arc::new(Mutex::new(None));

        let slot = name.clone();
        pool.submit(move || -> Result<(), JobError> {
            *slot.lock() = thread::current().name().map(str::to_owned);
            Ok(())
        })
        .unwrap();
        pool.drain();

        assert_eq!(name.lock().as_deref(), Some("notify-0"));
        pool.stop();
    }

    #[test]
    fn test_zero_workers_rejected() {
        println!("\n=== TEST: Invalid configuration ===");
        let result = DispatchPool::new(0);
        assert!(matches!(result, Err(StartError::Config(ConfigError::ZeroWorkers))));

        let result = DispatchPool::start(Config::bounded(2, 0, Overflow::Reject));
        assert!(matches!(result, Err(StartError::Config(ConfigError::ZeroCapacity))));
    }

    #[test]
    fn test_config_from_lookup() {
        println!("\n=== TEST: Configuration from variables ===");
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_WORKERS, "3"),
            (ENV_QUEUE_CAPACITY, "128"),
            (ENV_OVERFLOW, "Reject"),
            (ENV_POLL_INTERVAL_MS, " 250 "),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.capacity, Some(128));
        assert_eq!(config.overflow, Overflow::Reject);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.thread_prefix, "dispatch-worker");

        let unbounded = Config::from_lookup(|key| {
            (key == ENV_QUEUE_CAPACITY).then(|| "unbounded".to_owned())
        })
        .unwrap();
        assert_eq!(unbounded.capacity, None);
        assert_eq!(unbounded, Config::default());
    }

    #[test]
    fn test_config_invalid_values() {
        println!("\n=== TEST: Invalid configuration variables ===");
        let err = Config::from_lookup(|key| (key == ENV_WORKERS).then(|| "many".to_owned())).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidVar {
                var: ENV_WORKERS,
                value: "many".to_owned()
            }
        );

        let err = Config::from_lookup(|key| (key == ENV_WORKERS).then(|| "0".to_owned())).unwrap_err();
        assert_eq!(err, ConfigError::ZeroWorkers);

        let err = Config::from_lookup(|key| (key == ENV_OVERFLOW).then(|| "drop".to_owned())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: ENV_OVERFLOW, .. }));
    }
}
