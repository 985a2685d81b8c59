//! Non-realtime work offload for plugins.
//!
//! A [`Worker`] runs plugin-supplied work off the audio thread. In threaded
//! mode, work requests travel through a request ring to a dedicated thread
//! and completions come back through a response ring, delivered to the
//! plugin at the end of each cycle. In inline mode there is no thread: a
//! schedule call performs the work immediately on the caller, which is how
//! state restore and offline rendering run.
//!
//! The schedule side and the response side are separate types so the
//! realtime path is visible in the signatures: [`WorkerSched::Threaded`]
//! never takes a lock, while [`WorkerSched::Inline`] holds the global work
//! lock across the plugin's `work()` call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::ring::{self, RingError, RingReader, RingWriter};

/// Size of the request and response rings, and the largest admissible packet.
const MAX_PACKET_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerError {
    /// A packet did not fit in the communication ring.
    NoSpace,
    /// The worker has not been attached to a plugin.
    NotAttached,
    /// The plugin's work handler reported failure.
    Failed,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::NoSpace => f.write_str("no space in worker ring"),
            WorkerError::NotAttached => f.write_str("worker not attached to a plugin"),
            WorkerError::Failed => f.write_str("plugin work handler failed"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// The non-realtime half of a plugin's worker extension.
///
/// `work` may block and allocate; it is always called under the global work
/// lock so at most one `work` runs at a time. `work_response` and `end_run`
/// are called from the audio thread and must be realtime-safe.
pub trait WorkExecutor: Send + Sync {
    fn work(
        &self,
        respond: &mut dyn FnMut(&[u8]) -> Result<(), WorkerError>,
        data: &[u8],
    ) -> Result<(), WorkerError>;

    fn work_response(&self, data: &[u8]) -> Result<(), WorkerError>;

    fn end_run(&self) {}
}

/// Write one length-prefixed packet atomically.
fn write_packet(target: &mut RingWriter, data: &[u8]) -> Result<(), WorkerError> {
    let mut tx = target.begin_write();
    let result: Result<(), RingError> = (|| {
        target.amend_write(&mut tx, &(data.len() as u32).to_ne_bytes())?;
        target.amend_write(&mut tx, data)
    })();
    match result {
        Ok(()) => {
            target.commit_write(tx);
            Ok(())
        }
        Err(_) => Err(WorkerError::NoSpace),
    }
}

/// The schedule side of a worker, invoked by the plugin.
pub enum WorkerSched {
    /// Enqueue for the worker thread and wake it. Never blocks, never locks.
    Threaded {
        requests: RingWriter,
        wake: Sender<()>,
    },
    /// Perform the work immediately under the global work lock.
    Inline {
        lock: Arc<Mutex<()>>,
        exec: Option<Arc<dyn WorkExecutor>>,
        responses: RingWriter,
    },
}

impl WorkerSched {
    /// Point the inline path at the plugin's executor. No-op for the
    /// threaded path, which never calls the plugin itself.
    pub fn attach(&mut self, executor: Arc<dyn WorkExecutor>) {
        if let WorkerSched::Inline { exec, .. } = self {
            *exec = Some(executor);
        }
    }

    /// Schedule one unit of work. Realtime-safe in the threaded mode only.
    pub fn schedule(&mut self, data: &[u8]) -> Result<(), WorkerError> {
        match self {
            WorkerSched::Threaded { requests, wake } => {
                write_packet(requests, data)?;
                // A full wake channel means the thread is already signalled
                let _ = wake.try_send(());
                Ok(())
            }
            WorkerSched::Inline {
                lock,
                exec,
                responses,
            } => {
                let exec = exec.as_ref().ok_or(WorkerError::NotAttached)?;
                let _guard = lock.lock();
                exec.work(&mut |reply| write_packet(responses, reply), data)
            }
        }
    }
}

/// The response-drain side of a worker, owned by the process thread.
pub struct WorkerResponses {
    responses: RingReader,
    /// Scratch sized to the largest admissible packet; never grown on the
    /// audio thread.
    buf: Box<[u8]>,
    exec: Option<Arc<dyn WorkExecutor>>,
}

impl WorkerResponses {
    pub fn attach(&mut self, executor: Arc<dyn WorkExecutor>) {
        self.exec = Some(executor);
    }

    /// Deliver every completed response to the plugin. Called once per cycle
    /// after `run()`.
    pub fn emit_responses(&mut self) {
        let Some(exec) = &self.exec else { return };

        let mut size_buf = [0u8; 4];
        while self.responses.read(&mut size_buf).is_ok() {
            let size = u32::from_ne_bytes(size_buf) as usize;
            if size > self.buf.len() {
                // Oversized packet; drop it to keep the stream framed
                let _ = self.responses.skip(size as u32);
                continue;
            }
            if self.responses.read(&mut self.buf[..size]).is_err() {
                break;
            }
            if exec.work_response(&self.buf[..size]).is_err() {
                log::error!("Plugin dropped a work response");
            }
        }
    }

    /// Tell the plugin the cycle is over, after any responses.
    pub fn end_run(&self) {
        if let Some(exec) = &self.exec {
            exec.end_run();
        }
    }
}

/// A worker for running non-realtime tasks for a plugin.
pub struct Worker {
    threaded: bool,
    lock: Arc<Mutex<()>>,
    exec: Option<Arc<dyn WorkExecutor>>,
    requests_tx: Option<RingWriter>,
    requests_rx: Option<RingReader>,
    responses_tx: Option<RingWriter>,
    responses_rx: Option<RingReader>,
    wake_tx: Sender<()>,
    wake_rx: Option<Receiver<()>>,
    must_exit: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Create a worker. `lock` is the global lock guarding every call into
    /// the plugin's work handler.
    pub fn new(lock: Arc<Mutex<()>>, threaded: bool) -> Self {
        let (requests_tx, requests_rx) = ring::new(MAX_PACKET_SIZE);
        let (responses_tx, responses_rx) = ring::new(MAX_PACKET_SIZE);
        requests_tx.mlock();
        responses_tx.mlock();

        // Wakes coalesce: the thread drains every pending request per wake
        let (wake_tx, wake_rx) = channel::bounded(1);

        Self {
            threaded,
            lock,
            exec: None,
            requests_tx: Some(requests_tx),
            requests_rx: Some(requests_rx),
            responses_tx: Some(responses_tx),
            responses_rx: Some(responses_rx),
            wake_tx,
            wake_rx: Some(wake_rx),
            must_exit: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Attach the plugin's work executor. Must happen before `launch()` and
    /// before any scheduling.
    pub fn attach(&mut self, exec: Arc<dyn WorkExecutor>) {
        self.exec = Some(exec);
    }

    /// Take the schedule handle. For threaded workers this is the realtime
    /// path; for inline workers it performs work on the caller.
    pub fn scheduler(&mut self) -> WorkerSched {
        if self.threaded {
            WorkerSched::Threaded {
                requests: self.requests_tx.take().expect("scheduler already taken"),
                wake: self.wake_tx.clone(),
            }
        } else {
            WorkerSched::Inline {
                lock: self.lock.clone(),
                exec: self.exec.clone(),
                responses: self.responses_tx.take().expect("scheduler already taken"),
            }
        }
    }

    /// Take the response-drain handle for the process thread.
    pub fn responses(&mut self) -> WorkerResponses {
        WorkerResponses {
            responses: self.responses_rx.take().expect("responses already taken"),
            buf: vec![0u8; MAX_PACKET_SIZE as usize].into_boxed_slice(),
            exec: self.exec.clone(),
        }
    }

    /// Launch the worker thread. Does nothing for inline workers or if the
    /// thread is already running.
    pub fn launch(&mut self) -> Result<(), WorkerError> {
        if !self.threaded || self.thread.is_some() {
            return Ok(());
        }

        let exec = self.exec.clone().ok_or(WorkerError::NotAttached)?;
        let mut requests = self.requests_rx.take().expect("worker already launched");
        let mut responses = self.responses_tx.take().expect("worker already launched");
        let wake_rx = self.wake_rx.take().expect("worker already launched");
        let lock = self.lock.clone();
        let must_exit = self.must_exit.clone();

        let thread = std::thread::Builder::new()
            .name(String::from("worker"))
            .spawn(move || {
                let mut buf: Vec<u8> = Vec::new();
                while wake_rx.recv().is_ok() {
                    if must_exit.load(Ordering::Relaxed) {
                        break;
                    }

                    let mut size_buf = [0u8; 4];
                    while requests.read(&mut size_buf).is_ok() {
                        let size = u32::from_ne_bytes(size_buf) as usize;
                        buf.resize(size, 0);
                        if requests.read(&mut buf[..]).is_err() {
                            break;
                        }

                        let _guard = lock.lock();
                        if exec
                            .work(&mut |reply| write_packet(&mut responses, reply), &buf)
                            .is_err()
                        {
                            log::error!("Plugin work handler failed");
                        }
                    }
                }
            })
            .expect("Could not spawn worker thread");

        self.thread = Some(thread);
        Ok(())
    }

    /// Terminate the worker thread if it is running. Idempotent.
    pub fn exit(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.must_exit.store(true, Ordering::Relaxed);
            let _ = self.wake_tx.try_send(());
            if thread.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Doubles every request byte and responds with the result; counts
    /// delivered responses.
    struct Doubler {
        worked: AtomicUsize,
        responded: AtomicUsize,
        last_response: Mutex<Vec<u8>>,
    }

    impl Doubler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                worked: AtomicUsize::new(0),
                responded: AtomicUsize::new(0),
                last_response: Mutex::new(Vec::new()),
            })
        }
    }

    impl WorkExecutor for Doubler {
        fn work(
            &self,
            respond: &mut dyn FnMut(&[u8]) -> Result<(), WorkerError>,
            data: &[u8],
        ) -> Result<(), WorkerError> {
            self.worked.fetch_add(1, Ordering::SeqCst);
            let doubled: Vec<u8> = data.iter().map(|b| b.wrapping_mul(2)).collect();
            respond(&doubled)
        }

        fn work_response(&self, data: &[u8]) -> Result<(), WorkerError> {
            self.responded.fetch_add(1, Ordering::SeqCst);
            *self.last_response.lock() = data.to_vec();
            Ok(())
        }
    }

    #[test]
    fn inline_work_completes_within_the_call() {
        let exec = Doubler::new();
        let mut worker = Worker::new(Arc::new(Mutex::new(())), false);
        worker.attach(exec.clone());
        worker.launch().unwrap();

        let mut sched = worker.scheduler();
        let mut responses = worker.responses();

        sched.schedule(&[1, 2, 3]).unwrap();
        assert_eq!(exec.worked.load(Ordering::SeqCst), 1);

        // The response is delivered by the next drain, as in a cycle
        responses.emit_responses();
        responses.end_run();
        assert_eq!(exec.responded.load(Ordering::SeqCst), 1);
        assert_eq!(*exec.last_response.lock(), vec![2, 4, 6]);
    }

    #[test]
    fn threaded_work_arrives_by_a_later_drain() {
        let exec = Doubler::new();
        let mut worker = Worker::new(Arc::new(Mutex::new(())), true);
        worker.attach(exec.clone());

        let mut sched = worker.scheduler();
        let mut responses = worker.responses();
        worker.launch().unwrap();

        sched.schedule(&[10]).unwrap();
        sched.schedule(&[20]).unwrap();

        // Poll the drain like repeated cycles until both responses land
        let mut tries = 0;
        while exec.responded.load(Ordering::SeqCst) < 2 && tries < 500 {
            responses.emit_responses();
            std::thread::sleep(Duration::from_millis(1));
            tries += 1;
        }
        assert_eq!(exec.worked.load(Ordering::SeqCst), 2);
        assert_eq!(exec.responded.load(Ordering::SeqCst), 2);

        // Never more responses than the plugin emitted
        responses.emit_responses();
        assert_eq!(exec.responded.load(Ordering::SeqCst), 2);

        worker.exit();
    }

    #[test]
    fn exit_is_idempotent() {
        let exec = Doubler::new();
        let mut worker = Worker::new(Arc::new(Mutex::new(())), true);
        worker.attach(exec);
        worker.launch().unwrap();
        worker.exit();
        worker.exit();
    }

    #[test]
    fn unattached_inline_schedule_fails() {
        let mut worker = Worker::new(Arc::new(Mutex::new(())), false);
        let mut sched = worker.scheduler();
        assert_eq!(sched.schedule(&[0]), Err(WorkerError::NotAttached));
    }
}
