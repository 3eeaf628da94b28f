//! Thread-per-node scheduler
//!
//! Spawns a dedicated thread for each node and calls `work()` in a loop until
//! the node finishes. Nodes decoding different signal lines share no state,
//! so each line's decoder runs on its own thread while the decode of any one
//! line stays strictly sequential.

use super::errors::WorkError;
use super::node::ProcessNode;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Runtime scheduler that executes a set of nodes
pub struct Scheduler {
    threads: Vec<(String, JoinHandle<()>)>,
    stop_signal: Arc<AtomicBool>,
    completion_tx: StdSender<String>,
    completion_rx: StdReceiver<String>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = channel();
        Self {
            threads: Vec::new(),
            stop_signal: Arc::new(AtomicBool::new(false)),
            completion_tx,
            completion_rx,
        }
    }

    /// Start a node in its own thread
    pub fn start_process(&mut self, mut node: Box<dyn ProcessNode>) {
        let stop_signal = Arc::clone(&self.stop_signal);
        let completion_tx = self.completion_tx.clone();
        let name = node.name().to_string();
        let thread_name = name.clone();

        debug!("Starting process node: {}", name);

        let handle = thread::spawn(move || {
            let mut items_produced = 0usize;

            loop {
                if stop_signal.load(Ordering::Relaxed) || node.should_stop() {
                    break;
                }

                match node.work() {
                    Ok(n) => items_produced += n,
                    Err(WorkError::Shutdown) => {
                        debug!("[{}] Input exhausted", thread_name);
                        break;
                    }
                    Err(e) => {
                        error!("[{}] Work error: {}", thread_name, e);
                        break;
                    }
                }
            }

            info!("[{}] Shutdown. Produced {} items.", thread_name, items_produced);

            // Drop the node so its senders disconnect downstream
            drop(node);
            let _ = completion_tx.send(thread_name);
        });

        self.threads.push((name, handle));
    }

    /// Signal all nodes to stop
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Wait for all node threads to complete, joining them as they finish.
    pub fn wait(self) {
        let Scheduler {
            threads,
            completion_tx,
            completion_rx,
            ..
        } = self;

        // Channel closes once every thread's clone is dropped too
        drop(completion_tx);

        let total_threads = threads.len();
        let mut completed = 0;
        let mut threads_by_name: HashMap<String, JoinHandle<()>> = threads.into_iter().collect();

        info!("Waiting for {} threads to complete...", total_threads);

        while completed < total_threads {
            let Ok(thread_name) = completion_rx.recv() else {
                break;
            };
            completed += 1;
            if let Some(handle) = threads_by_name.remove(&thread_name) {
                match handle.join() {
                    Ok(()) => debug!(
                        "[{}] Thread completed ({}/{})",
                        thread_name, completed, total_threads
                    ),
                    Err(e) => error!(
                        "[{}] Thread panicked ({}/{}): {:?}",
                        thread_name, completed, total_threads, e
                    ),
                }
            }
        }

        // Threads that panicked before notifying
        for (thread_name, handle) in threads_by_name {
            if handle.join().is_err() {
                error!("[{}] Thread panicked", thread_name);
            }
        }

        info!("All {} threads completed", total_threads);
    }

    /// Get the number of running threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Get the names of all running threads
    pub fn thread_names(&self) -> Vec<String> {
        self.threads.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::node::WorkResult;
    use crate::runtime::{Receiver, Sender, bounded};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct TestSource {
        output: Sender<u32>,
        count: u32,
        max: u32,
    }

    impl ProcessNode for TestSource {
        fn name(&self) -> &str {
            "test_source"
        }

        fn work(&mut self) -> WorkResult<usize> {
            if self.count < self.max {
                self.output.send(self.count)?;
                self.count += 1;
                Ok(1)
            } else {
                self.output.close();
                Err(WorkError::Shutdown)
            }
        }
    }

    struct TestSink {
        input: Receiver<u32>,
        received: Arc<Mutex<Vec<u32>>>,
    }

    impl ProcessNode for TestSink {
        fn name(&self) -> &str {
            "test_sink"
        }

        fn work(&mut self) -> WorkResult<usize> {
            let value = self.input.recv()?;
            self.received.lock().unwrap().push(value);
            Ok(1)
        }
    }

    #[test]
    fn test_scheduler_runs_source_to_sink() {
        let mut scheduler = Scheduler::new();
        let (tx, rx) = bounded::<u32>(10);
        let received = Arc::new(Mutex::new(Vec::new()));

        scheduler.start_process(Box::new(TestSource {
            output: tx,
            count: 0,
            max: 5,
        }));
        scheduler.start_process(Box::new(TestSink {
            input: rx,
            received: Arc::clone(&received),
        }));
        assert_eq!(scheduler.num_threads(), 2);

        scheduler.wait();

        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    struct Idle;

    impl ProcessNode for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        fn work(&mut self) -> WorkResult<usize> {
            thread::sleep(Duration::from_millis(5));
            Ok(0)
        }
    }

    #[test]
    fn test_scheduler_stop_signal() {
        let mut scheduler = Scheduler::new();
        scheduler.start_process(Box::new(Idle));
        assert_eq!(scheduler.thread_names(), vec!["idle".to_string()]);

        thread::sleep(Duration::from_millis(20));
        scheduler.stop();

        let start = Instant::now();
        scheduler.wait();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
