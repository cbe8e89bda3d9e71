//! Concurrent log tailing with a counted completion barrier.
//!
//! One worker per server log follows the file by polling and relays whole
//! lines into a single aggregator task, which writes them to the harness log
//! under the `kimchi::tail` target. Workers stop cooperatively: after
//! [`TailRegistry::stop_at_eof_all`] each drains what is currently in its
//! file and exits. [`TailRegistry::wait`] resolves only once every
//! registered worker has exited.
//!
//! A worker that cannot open or read its file records the failure in the
//! registry and exits. The first failure is kept; [`TailRegistry::check`]
//! and [`TailRegistry::guard`] let the caller stop the run on it.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::LogTailError;

/// Tracing target of relayed server log lines.
pub const TAIL_TARGET: &str = "kimchi::tail";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub label: String,
    pub text: String,
}

struct TailHandle {
    label: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Completion {
    active: AtomicUsize,
    done: Notify,
}

struct Failure {
    first: Mutex<Option<LogTailError>>,
    raised: watch::Sender<bool>,
}

impl Failure {
    fn new() -> Self {
        Self { first: Mutex::new(None), raised: watch::channel(false).0 }
    }

    fn record(&self, e: LogTailError) {
        tracing::error!(error = %e, "tail worker failed");
        self.first.lock().get_or_insert(e);
        self.raised.send_replace(true);
    }
}

/// Decrements the active count when a worker ends, however it ends.
struct Exit(Arc<Completion>);

impl Drop for Exit {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.done.notify_waiters();
    }
}

pub struct TailRegistry {
    poll: Duration,
    handles: Mutex<Vec<TailHandle>>,
    completion: Arc<Completion>,
    failure: Arc<Failure>,
    tx: mpsc::UnboundedSender<TailLine>,
    sink: JoinHandle<u64>,
}

impl TailRegistry {
    /// Start the aggregator. Must be called inside a tokio runtime.
    pub fn new(poll: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::with_sink(poll, tx, tokio::spawn(relay(rx)))
    }

    /// Like [`TailRegistry::new`] but lines go to `out` instead of the log.
    pub fn with_channel(poll: Duration, out: mpsc::UnboundedSender<TailLine>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TailLine>();
        let sink = tokio::spawn(async move {
            let mut n = 0;
            while let Some(line) = rx.recv().await {
                n += 1;
                let _ = out.send(line);
            }
            n
        });
        Self::with_sink(poll, tx, sink)
    }

    fn with_sink(
        poll: Duration,
        tx: mpsc::UnboundedSender<TailLine>,
        sink: JoinHandle<u64>,
    ) -> Self {
        Self {
            poll,
            handles: Mutex::new(Vec::new()),
            completion: Arc::default(),
            failure: Arc::new(Failure::new()),
            tx,
            sink,
        }
    }

    /// Spawn a worker for `path`. The file need not exist yet.
    pub fn follow(&self, label: impl Into<String>, path: impl AsRef<Path>) {
        let label = label.into();
        let path = path.as_ref().to_path_buf();
        let (stop, stop_rx) = watch::channel(false);

        // Count and register under the lock so a concurrent wait() either
        // sees this worker or was already past it.
        let mut handles = self.handles.lock();
        self.completion.active.fetch_add(1, Ordering::SeqCst);
        let exit = Exit(self.completion.clone());
        let failure = self.failure.clone();
        let worker = Worker {
            label: label.clone(),
            path,
            poll: self.poll,
            stop: stop_rx,
            tx: self.tx.clone(),
        };
        let task = tokio::spawn(async move {
            let _exit = exit;
            if let Err(e) = worker.run().await {
                failure.record(e);
            }
        });
        handles.push(TailHandle { label, stop, task });
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of workers that have not exited yet.
    pub fn active(&self) -> usize {
        self.completion.active.load(Ordering::SeqCst)
    }

    /// Take the first worker failure recorded so far.
    pub fn take_failure(&self) -> Option<LogTailError> {
        self.failure.first.lock().take()
    }

    /// `Err` with the first recorded worker failure, if there is one.
    pub fn check(&self) -> Result<(), LogTailError> {
        self.take_failure().map_or(Ok(()), Err)
    }

    /// Resolves once any worker has failed.
    pub async fn failed(&self) {
        let mut raised = self.failure.raised.subscribe();
        let _ = raised.wait_for(|f| *f).await;
    }

    /// Drive `fut` unless a worker fails first; then `fut` is dropped and
    /// the failure returned.
    pub async fn guard<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<LogTailError>,
    {
        tokio::pin!(fut);
        tokio::select! {
            biased;
            _ = self.failed() => match self.take_failure() {
                Some(e) => Err(e.into()),
                None => fut.await,
            },
            res = &mut fut => res,
        }
    }

    /// Ask every worker to drain its file and exit.
    pub fn stop_at_eof_all(&self) {
        for h in self.handles.lock().iter() {
            let _ = h.stop.send(true);
        }
    }

    /// Stop one worker by label. Returns `false` for an unknown label.
    pub fn stop_at_eof(&self, label: &str) -> bool {
        let handles = self.handles.lock();
        let found = handles.iter().filter(|h| h.label == label).count();
        for h in handles.iter().filter(|h| h.label == label) {
            let _ = h.stop.send(true);
        }
        found > 0
    }

    /// Completion barrier: resolves after every registered worker exited,
    /// then reports the first worker failure not already taken.
    pub async fn wait(&self) -> Result<(), LogTailError> {
        loop {
            let notified = self.completion.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.completion.active.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            if let Err(e) = h.task.await {
                self.failure.record(LogTailError::Join { label: h.label, reason: e.to_string() });
            }
        }
        self.check()
    }

    /// [`TailRegistry::wait`] with an optional upper bound.
    pub async fn wait_with_deadline(
        &self,
        deadline: Option<Duration>,
    ) -> Result<(), LogTailError> {
        match deadline {
            None => self.wait().await,
            Some(d) => tokio::time::timeout(d, self.wait())
                .await
                .map_err(|_| LogTailError::Deadline(d))?,
        }
    }

    /// Close the fan-in and return how many lines were relayed. Workers still
    /// running are aborted.
    pub async fn close(self) -> u64 {
        let Self { handles, tx, sink, .. } = self;
        for h in handles.into_inner() {
            h.task.abort();
        }
        drop(tx);
        sink.await.unwrap_or(0)
    }
}

async fn relay(mut rx: mpsc::UnboundedReceiver<TailLine>) -> u64 {
    let mut n = 0;
    while let Some(line) = rx.recv().await {
        n += 1;
        tracing::info!(target: TAIL_TARGET, "{} {}", line.label, line.text);
    }
    n
}

struct Worker {
    label: String,
    path: PathBuf,
    poll: Duration,
    stop: watch::Receiver<bool>,
    tx: mpsc::UnboundedSender<TailLine>,
}

impl Worker {
    async fn run(mut self) -> Result<(), LogTailError> {
        let Some(mut file) = self.open().await? else {
            tracing::debug!(label = %self.label, path = %self.path.display(), "log never appeared");
            return Ok(());
        };
        let mut pending = Vec::new();
        let mut buf = vec![0u8; 8192];
        loop {
            // Sampled before draining so that everything written before the
            // stop request is still relayed.
            let stopping = self.stopping();
            loop {
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|source| LogTailError::Read { path: self.path.clone(), source })?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&buf[..n]);
                self.emit_complete(&mut pending);
            }
            if stopping {
                if !pending.is_empty() {
                    self.emit(&pending);
                }
                return Ok(());
            }
            self.pause().await;
        }
    }

    /// Wait for the file to exist. `None` if stopped before it did.
    async fn open(&mut self) -> Result<Option<File>, LogTailError> {
        loop {
            match File::open(&self.path).await {
                Ok(f) => return Ok(Some(f)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if self.stopping() {
                        return Ok(None);
                    }
                    self.pause().await;
                }
                Err(source) => return Err(LogTailError::Open { path: self.path.clone(), source }),
            }
        }
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    async fn pause(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll) => {}
            changed = self.stop.changed() => {
                // Sender gone: nobody can stop us any more, fall back to polling.
                if changed.is_err() {
                    tokio::time::sleep(self.poll).await;
                }
            }
        }
    }

    fn emit_complete(&self, pending: &mut Vec<u8>) {
        while let Some(pos) = memchr::memchr(b'\n', pending) {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            self.emit(&line[..pos]);
        }
    }

    fn emit(&self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let text = String::from_utf8_lossy(raw).into_owned();
        let _ = self.tx.send(TailLine { label: self.label.clone(), text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn drains_lines_and_trailing_partial_on_stop(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nyx.log");
        let (out, mut lines) = mpsc::unbounded_channel();
        let reg = TailRegistry::with_channel(POLL, out);
        reg.follow("authority-0", &path);

        tokio::time::sleep(POLL * 3).await;
        let mut f = std::fs::File::create(&path)?;
        writeln!(f, "first")?;
        write!(f, "second\r\nthird-no-newline")?;
        f.flush()?;

        reg.stop_at_eof_all();
        reg.wait().await?;
        assert_eq!(reg.active(), 0);
        assert_eq!(reg.close().await, 3);

        let mut got = Vec::new();
        while let Ok(l) = lines.try_recv() {
            assert_eq!(l.label, "authority-0");
            got.push(l.text);
        }
        assert_eq!(got, vec!["first", "second", "third-no-newline"]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_worker_exits_on_stop() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let reg = TailRegistry::new(POLL);
        reg.follow("node-0", dir.path().join("never.log"));
        reg.stop_at_eof_all();
        reg.wait_with_deadline(Some(Duration::from_secs(5))).await?;
        assert_eq!(reg.close().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unstopped_worker_blocks_the_barrier() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let reg = TailRegistry::new(POLL);
        reg.follow("node-0", dir.path().join("a.log"));
        reg.follow("node-1", dir.path().join("b.log"));
        assert!(reg.stop_at_eof("node-0"));
        assert!(!reg.stop_at_eof("node-9"));

        let res = reg.wait_with_deadline(Some(Duration::from_millis(200))).await;
        assert!(matches!(res, Err(LogTailError::Deadline(_))));
        assert_eq!(reg.active(), 1);

        reg.stop_at_eof_all();
        reg.wait_with_deadline(Some(Duration::from_secs(5))).await?;
        assert_eq!(reg.active(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn open_failure_is_raised_while_running() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"not a directory")?;
        let reg = TailRegistry::new(POLL);
        reg.follow("authority-0", dir.path().join("a.log"));
        reg.follow("node-0", plain.join("nyx.log"));

        tokio::time::timeout(Duration::from_secs(5), reg.failed()).await?;
        let guarded = reg.guard(std::future::pending::<Result<(), LogTailError>>());
        let res = tokio::time::timeout(Duration::from_secs(5), guarded).await?;
        assert!(matches!(res, Err(LogTailError::Open { .. })), "{res:?}");
        assert!(reg.check().is_ok());

        reg.stop_at_eof_all();
        reg.wait_with_deadline(Some(Duration::from_secs(5))).await?;
        assert_eq!(reg.active(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failure_surfaces_at_the_barrier_when_not_taken(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"")?;
        let reg = TailRegistry::new(POLL);
        reg.follow("node-0", plain.join("nyx.log"));

        reg.stop_at_eof_all();
        let res = reg.wait_with_deadline(Some(Duration::from_secs(5))).await;
        assert!(matches!(res, Err(LogTailError::Open { .. })), "{res:?}");
        Ok(())
    }

    #[tokio::test]
    async fn guard_passes_through_without_failures() -> Result<(), Box<dyn std::error::Error>> {
        let reg = TailRegistry::new(POLL);
        let v = reg.guard(async { Ok::<_, LogTailError>(7) }).await?;
        assert_eq!(v, 7);
        Ok(())
    }
}
