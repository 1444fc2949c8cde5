#[cfg(test)]
mod tests {
    use promise_await::{await_future, make_promise, spawn, use_await, Future};
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::{thread, time::Duration};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn jitter<R: Rng>(rng: &mut R) -> Duration {
        Duration::from_micros(rng.gen_range(0..300))
    }

    #[test]
    fn test_spawn_immediate_value() {
        init_tracing();
        let future = spawn(|| 42);
        assert_eq!(future.get().unwrap(), 42);
    }

    #[test]
    fn test_spawn_awaits_background_thread() {
        init_tracing();
        let future = spawn(|| {
            let (promise, future) = make_promise::<i32>();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                promise.set_value(7).unwrap();
            });
            await_future(future).unwrap()
        });
        assert_eq!(future.get().unwrap(), 7);
    }

    /// Completion and suspension race with random delays on both sides; each
    /// computation must resume exactly once and never stay suspended.
    #[test]
    fn test_handshake_race_resumes_exactly_once() {
        init_tracing();
        let mut rng = rand::thread_rng();
        for trial in 0..200 {
            let resumed = Arc::new(AtomicUsize::new(0));
            let (promise, inner) = make_promise::<usize>();
            let producer_delay = jitter(&mut rng);
            let consumer_delay = jitter(&mut rng);

            let producer = thread::spawn(move || {
                thread::sleep(producer_delay);
                promise.set_value(trial).unwrap();
            });
            let counter = resumed.clone();
            let future = spawn(move || {
                thread::sleep(consumer_delay);
                let value = await_future(inner).unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                value
            });

            assert!(
                future.wait_timeout(Duration::from_secs(10)).unwrap(),
                "trial {trial} never resumed"
            );
            assert_eq!(future.get().unwrap(), trial);
            producer.join().expect("The producer thread has panicked");
            assert_eq!(resumed.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_handshake_race_with_adapter() {
        init_tracing();
        let mut rng = rand::thread_rng();
        for trial in 0..100 {
            let delay = jitter(&mut rng);
            let future = spawn(move || {
                use_await(|handler| {
                    thread::spawn(move || {
                        thread::sleep(delay);
                        handler.resolve(trial);
                    });
                })
                .unwrap()
            });
            assert!(future.wait_timeout(Duration::from_secs(10)).unwrap());
            assert_eq!(future.get().unwrap(), trial);
        }
    }

    #[test]
    fn test_many_awaits_across_threads() {
        init_tracing();
        let futures: Vec<Future<usize>> = (0..16)
            .map(|i| {
                spawn(move || {
                    let mut total = 0;
                    for step in 0..5 {
                        let (promise, future) = make_promise();
                        thread::spawn(move || promise.set_value(step).unwrap());
                        total += await_future(future).unwrap();
                    }
                    total + i
                })
            })
            .collect();
        for (i, future) in futures.into_iter().enumerate() {
            assert_eq!(future.get().unwrap(), 10 + i);
        }
    }

    #[test]
    fn test_chained_spawns() {
        init_tracing();
        fn stage(n: usize) -> Future<usize> {
            spawn(move || {
                if n == 0 {
                    return 0;
                }
                await_future(stage(n - 1)).unwrap() + n
            })
        }
        assert_eq!(stage(10).get().unwrap(), 55);
    }
}
