//! A serial link to a board, driven by tokio.
//!
//! This submodule is only available with the [`std-system`](crate) feature flag.
//!
//! The serial device must already be configured for the board's baud rate (e.g. with `stty`);
//! it is then used as a plain file for both reading lines and writing frames.

use alloc::string::String;
use alloc::vec::Vec;

use std::fs::OpenOptions;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;

use crate::ast::Block;
use crate::board::BoardConfig;
use crate::session::{Feedback, Session, Settings};
use crate::upload::{Frame, LinkError, WriteGate};

/// Something the editor asks the link to do.
#[derive(Debug, Clone)]
pub enum Request<O> {
    /// Compile and start these scripts, keeping the others running.
    Run(Vec<(O, Block)>),
    /// Evaluate a clicked reporter.
    Evaluate(O, Block),
    StopAll,
    SuspendAll,
    ResumeAll,
    /// A script was deleted in the editor.
    RemoveChain(O),
    /// A raw line of lua for the board console.
    Raw(String),
}

/// A writer shared between the link loop and its helper tasks.
/// At most one write is in flight; contended writes are retried a bounded number of times.
pub struct SharedWriter<W> {
    writer: Arc<tokio::sync::Mutex<W>>,
    gate: Arc<Mutex<WriteGate>>,
    retry: Duration,
}
impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self { writer: self.writer.clone(), gate: self.gate.clone(), retry: self.retry }
    }
}
impl<W: AsyncWrite + Unpin> SharedWriter<W> {
    pub fn new(writer: W, settings: &Settings) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            gate: Arc::new(Mutex::new(WriteGate::new(settings.max_write_attempts))),
            retry: Duration::from_millis(settings.write_retry_ms),
        }
    }
    fn acquire(&self) -> Result<bool, LinkError> {
        match self.gate.lock() {
            Ok(mut gate) => gate.acquire(),
            Err(_) => Err(LinkError::Closed),
        }
    }
    fn release(&self) {
        if let Ok(mut gate) = self.gate.lock() {
            gate.release();
        }
    }
    pub async fn write(&self, frame: &Frame) -> Result<(), LinkError> {
        while !self.acquire()? {
            tokio::time::sleep(self.retry).await;
        }
        let bytes = frame.to_bytes();
        log::debug!("writing {} bytes ({frame:?})", bytes.len());
        let res = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&bytes).await?;
            writer.flush().await
        }.await;
        self.release();
        Ok(res?)
    }
}

/// Repeats the wake-up sequence until `ready` is set.
async fn wake_up<W: AsyncWrite + Unpin>(writer: SharedWriter<W>, ready: Arc<AtomicBool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if ready.load(Ordering::Relaxed) {
            break;
        }
        if let Err(e) = writer.write(&Frame::WakeUp).await {
            log::warn!("failed to wake the board: {e}");
        }
    }
}

/// Runs a session over an already open connection until the request channel closes or the link fails.
///
/// Every frame that the board must acknowledge arms a watchdog of [`Settings::ack_timeout_ms`];
/// if no line arrives before it expires, the session is told the board is unresponsive and the upload is abandoned.
pub async fn drive<R, W, O, F>(reader: R, writer: W, session: &mut Session<O, F>, requests: Receiver<Request<O>>) -> Result<(), LinkError>
where R: AsyncRead + Unpin, W: AsyncWrite + Unpin + Send + 'static, O: Ord + Clone, F: Feedback<O>
{
    let settings = *session.settings();
    let writer = SharedWriter::new(writer, &settings);
    let mut lines = BufReader::new(reader).lines();

    let ready = Arc::new(AtomicBool::new(false));
    session.wake_up();
    tokio::spawn(wake_up(writer.clone(), ready.clone(), Duration::from_millis(settings.wake_interval_ms)));
    let _stop_waking = OnDrop(Some({
        let ready = ready.clone();
        move || ready.store(true, Ordering::Relaxed)
    }));

    let mut ack_deadline: Option<Instant> = None;
    loop {
        let (deadline, lines) = (ack_deadline, &mut lines);
        let next_line = async move {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, lines.next_line()).await,
                None => Ok(lines.next_line().await),
            }
        };
        let frame = tokio::select! {
            line = next_line => match line {
                Ok(Ok(Some(line))) => {
                    let frame = session.handle_line(&line);
                    if line.trim_end() == crate::protocol::CHUNK_READY {
                        ack_deadline = None;
                    }
                    if !session.is_booting() {
                        ready.store(true, Ordering::Relaxed);
                    }
                    frame
                }
                Ok(Ok(None)) => {
                    session.link_failed(&LinkError::Closed);
                    return Err(LinkError::Closed);
                }
                Ok(Err(e)) => {
                    let e = LinkError::from(e);
                    session.link_failed(&e);
                    return Err(e);
                }
                Err(_) => {
                    ack_deadline = None;
                    session.link_failed(&LinkError::DeviceUnresponsive);
                    None
                }
            },
            request = requests.recv() => match request.ok() {
                Some(request) => handle_request(session, request),
                None => return Ok(()),
            },
        };

        if let Some(frame) = frame {
            if let Err(e) = writer.write(&frame).await {
                session.link_failed(&e);
                if let LinkError::WriteContention { .. } = e {
                    continue;
                }
                return Err(e);
            }
            if frame.expects_ack() {
                ack_deadline = settings.ack_timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
            }
        }
    }
}

fn handle_request<O: Ord + Clone, F: Feedback<O>>(session: &mut Session<O, F>, request: Request<O>) -> Option<Frame> {
    match request {
        Request::Run(chains) => session.run(&chains).ok().flatten(),
        Request::Evaluate(origin, block) => session.evaluate_reporter(origin, &block).ok(),
        Request::StopAll => Some(session.stop_all()),
        Request::SuspendAll => Some(session.suspend_all()),
        Request::ResumeAll => Some(session.resume_all()),
        Request::RemoveChain(origin) => {
            session.remove_chain(&origin);
            None
        }
        Request::Raw(line) => Some(Frame::Command(line)),
    }
}

pub(crate) struct OnDrop<F: FnOnce()>(pub(crate) Option<F>);
impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// A running connection to a board on a background thread.
pub struct BoardLink<O> {
    requests: Sender<Request<O>>,
    handle: thread::JoinHandle<Result<(), LinkError>>,
}
impl<O: Ord + Clone + Send + 'static> BoardLink<O> {
    /// Opens the serial device at `path` and starts talking to the board on it.
    pub fn open<F: Feedback<O> + Send + 'static>(path: &str, board: BoardConfig, settings: Settings, feedback: F) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let reader = file.try_clone()?;
        let (requests, receiver) = async_channel::unbounded();

        #[tokio::main(flavor = "current_thread")]
        async fn handler<O: Ord + Clone, F: Feedback<O>>(reader: std::fs::File, writer: std::fs::File, mut session: Session<O, F>, receiver: Receiver<Request<O>>) -> Result<(), LinkError> {
            let reader = tokio::fs::File::from_std(reader);
            let writer = tokio::fs::File::from_std(writer);
            drive(reader, writer, &mut session, receiver).await
        }
        let session = Session::new(board, settings, feedback);
        let handle = thread::spawn(move || handler(reader, file, session, receiver));

        Ok(Self { requests, handle })
    }
    /// Queues a request. Returns `false` if the link has already shut down.
    pub fn send(&self, request: Request<O>) -> bool {
        self.requests.send_blocking(request).is_ok()
    }
    /// Checks if the link thread has exited.
    pub fn is_closed(&self) -> bool {
        self.handle.is_finished()
    }
    /// Shuts the link down and waits for it to finish.
    pub fn close(self) -> Result<(), LinkError> {
        drop(self.requests);
        self.handle.join().unwrap_or(Err(LinkError::Closed))
    }
}
