#[cfg(test)]
mod tests {
    use promise_dispatch::{Dispatch, Dispatcher};
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            mpsc, Arc, Mutex,
        },
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    };

    fn pump_until_finished(dispatcher: &Dispatcher, workers: &[JoinHandle<()>]) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !workers.iter().all(|w| w.is_finished()) {
            assert!(Instant::now() < deadline, "workers never finished");
            dispatcher.pump();
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_enqueue_and_wait_blocks_until_pumped() {
        let dispatcher = Arc::new(Dispatcher::new());
        let consumer = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));

        let remote = dispatcher.clone();
        let slot = ran_on.clone();
        let worker = thread::spawn(move || {
            let seen = slot.clone();
            remote.enqueue_and_wait(Box::new(move || {
                *seen.lock().unwrap() = Some(thread::current().id());
            }));
            // Only reachable once the consumer ran the action.
            assert_eq!(*slot.lock().unwrap(), Some(consumer));
        });

        while dispatcher.pending() == 0 {
            thread::yield_now();
        }
        assert!(!worker.is_finished());
        pump_until_finished(&dispatcher, std::slice::from_ref(&worker));
        worker.join().expect("The worker thread has panicked");
        assert_eq!(*ran_on.lock().unwrap(), Some(consumer));
    }

    #[test]
    fn test_failing_action_still_releases_all_waiters() {
        let dispatcher = Arc::new(Dispatcher::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let workers: Vec<JoinHandle<()>> = (0..4)
            .map(|i| {
                let remote = dispatcher.clone();
                let ran = ran.clone();
                thread::spawn(move || {
                    remote.enqueue_and_wait(Box::new(move || {
                        if i == 2 {
                            panic!("action {} failed", i);
                        }
                        ran.fetch_add(1, Ordering::SeqCst);
                    }));
                })
            })
            .collect();

        pump_until_finished(&dispatcher, &workers);
        for worker in workers {
            worker.join().expect("The worker thread has panicked");
        }
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_enqueue_and_wait_from_consumer_loop_does_not_deadlock() {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let consumer = thread::spawn(move || {
            let dispatcher = Arc::new(Dispatcher::new());
            tx.send(dispatcher.clone()).expect("The test thread has gone");
            while !stop_flag.load(Ordering::SeqCst) {
                dispatcher.pump();
                thread::sleep(Duration::from_millis(1));
            }
            dispatcher.pump()
        });
        let dispatcher: Arc<Dispatcher> = rx.recv().expect("The consumer thread has gone");

        let order = Arc::new(Mutex::new(Vec::new()));
        let inner_dispatcher = dispatcher.clone();
        let outer_order = order.clone();
        dispatcher.enqueue_and_wait(Box::new(move || {
            outer_order.lock().unwrap().push("outer-start");
            let inner_order = outer_order.clone();
            inner_dispatcher.enqueue_and_wait(Box::new(move || {
                inner_order.lock().unwrap().push("inner");
            }));
            outer_order.lock().unwrap().push("outer-end");
        }));
        assert_eq!(*order.lock().unwrap(), vec!["outer-start", "inner", "outer-end"]);

        stop.store(true, Ordering::SeqCst);
        assert_eq!(consumer.join().expect("The consumer thread has panicked"), 0);
    }

    #[test]
    fn test_pump_from_producer_thread_panics() {
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.enqueue(Box::new(|| {}));
        let remote = dispatcher.clone();
        assert!(thread::spawn(move || remote.pump()).join().is_err());
        // The batch is still there for the consumer.
        assert_eq!(dispatcher.pump(), 1);
    }
}
