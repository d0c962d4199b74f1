//! Chunked, acknowledged program upload over the serial link.
//!
//! The board is put into receive mode with `io.receive`, after which it prints `C` every time it can take another chunk.
//! Each chunk is a length byte followed by that many bytes of the program; a zero length ends the file,
//! and the board is then told to run it.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// The file the program is stored in on the board.
pub const AUTORUN_PATH: &str = "/sd/autorun.lua";
/// The largest payload a single framed chunk can carry.
pub const MAX_CHUNK_SIZE: usize = 254;

/// Something to write to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Pokes the board console until it shows its prompt.
    WakeUp,
    /// Puts the board into file receive mode.
    UploadStart,
    Chunk(Vec<u8>),
    /// Ends the file and runs it.
    Trailer,
    /// Ends a partly received file without running it and puts the board back into receive mode.
    Restart,
    StopAll,
    SuspendAll,
    ResumeAll,
    /// A single line of lua to run right away, outside of the uploaded program.
    Command(String),
}
impl Frame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::WakeUp => b"\r\n\r\n".to_vec(),
            Frame::UploadStart => format!("\rio.receive(\"{AUTORUN_PATH}\")\r").into_bytes(),
            Frame::Chunk(data) => {
                debug_assert!(data.len() <= MAX_CHUNK_SIZE);
                let mut res = Vec::with_capacity(data.len() + 1);
                res.push(data.len() as u8);
                res.extend_from_slice(data);
                res
            }
            Frame::Trailer => {
                let mut res = vec![0];
                res.extend_from_slice(format!("\r\ndofile(\"{AUTORUN_PATH}\")\r\n").as_bytes());
                res
            }
            Frame::Restart => {
                let mut res = vec![0];
                res.extend_from_slice(&Frame::UploadStart.to_bytes());
                res
            }
            Frame::StopAll => b"thread.stop()\r\n".to_vec(),
            Frame::SuspendAll => b"thread.suspend()\r\n".to_vec(),
            Frame::ResumeAll => b"thread.resume()\r\n".to_vec(),
            Frame::Command(line) => format!("{line}\r\n").into_bytes(),
        }
    }
    /// Checks if the board answers this frame with `C` before anything else may be sent.
    pub fn expects_ack(&self) -> bool {
        matches!(self, Frame::UploadStart | Frame::Restart | Frame::Chunk(_))
    }
}

#[derive(Debug)]
pub enum LinkError {
    /// The serial port stayed busy for too many write attempts. The board needs a manual reset.
    WriteContention { attempts: u32 },
    /// The board stopped acknowledging chunks.
    DeviceUnresponsive,
    /// The connection to the board is gone.
    Closed,
    #[cfg(feature = "std")]
    Io { error: std::io::Error },
}
#[cfg(feature = "std")]
impl From<std::io::Error> for LinkError { fn from(error: std::io::Error) -> Self { Self::Io { error } } }
impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkError::WriteContention { attempts } => write!(f, "could not write to the board after {attempts} attempts. Please reset the board"),
            LinkError::DeviceUnresponsive => write!(f, "the board stopped responding"),
            LinkError::Closed => write!(f, "the connection to the board was closed"),
            #[cfg(feature = "std")]
            LinkError::Io { error } => write!(f, "serial error: {error}"),
        }
    }
}

/// Keeps at most one write in flight and gives up after a bounded number of contended attempts.
#[derive(Debug, Clone)]
pub struct WriteGate {
    writing: bool,
    attempts: u32,
    max_attempts: u32,
}
impl WriteGate {
    pub fn new(max_attempts: u32) -> Self {
        Self { writing: false, attempts: 0, max_attempts }
    }
    /// Tries to start a write. `Ok(false)` means another write is still in flight and the caller should retry later.
    pub fn acquire(&mut self) -> Result<bool, LinkError> {
        if !self.writing {
            self.writing = true;
            self.attempts = 0;
            return Ok(true);
        }
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            log::error!("write still blocked after {} attempts", self.attempts);
            return Err(LinkError::WriteContention { attempts: self.attempts });
        }
        log::warn!("write in progress, retrying (attempt {})", self.attempts);
        Ok(false)
    }
    pub fn release(&mut self) {
        self.writing = false;
    }
    pub fn is_writing(&self) -> bool {
        self.writing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The board already has (or is receiving) this exact program.
    Skipped,
    /// Write [`Frame::UploadStart`] and feed every `C` to [`UploadChannel::chunk_ready`].
    Started { chunks: usize },
    /// Another upload is waiting for its next `C`. This program replaces it at that point, so nothing needs to be written now.
    Queued { chunks: usize },
}

struct Transfer {
    program: String,
    pending: VecDeque<Vec<u8>>,
}
impl Transfer {
    fn new(program: String, chunk_size: usize) -> Self {
        let pending = program.as_bytes().chunks(chunk_size).map(|x| x.to_vec()).collect();
        Self { program, pending }
    }
}

/// Splits programs into frames and hands them out one acknowledgement at a time.
pub struct UploadChannel {
    chunk_size: usize,
    current: Option<Transfer>,
    queued: Option<Transfer>,
    last_sent: Option<String>,
}
impl UploadChannel {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE), current: None, queued: None, last_sent: None }
    }
    /// Starts uploading `program`, unless it is byte-identical to the one last sent or currently being sent.
    ///
    /// The board must not see anything but chunks while it is receiving, so a different program sent during an upload
    /// is queued instead. The next `C` then ends the partial file with [`Frame::Restart`] and the queued program is sent from scratch.
    pub fn send(&mut self, program: String) -> SendStatus {
        if let Some(current) = self.current.as_ref() {
            if current.program == program {
                log::debug!("program already uploading, dropping queued program");
                self.queued = None;
                return SendStatus::Skipped;
            }
            let transfer = Transfer::new(program, self.chunk_size);
            let chunks = transfer.pending.len();
            log::debug!("upload in progress, queueing {} bytes in {} chunks", transfer.program.len(), chunks);
            self.queued = Some(transfer);
            return SendStatus::Queued { chunks };
        }
        if self.last_sent.as_deref() == Some(program.as_str()) {
            log::debug!("program unchanged, skipping upload");
            return SendStatus::Skipped;
        }
        let transfer = Transfer::new(program, self.chunk_size);
        let chunks = transfer.pending.len();
        log::debug!("uploading {} bytes in {} chunks", transfer.program.len(), chunks);
        self.current = Some(transfer);
        SendStatus::Started { chunks }
    }
    /// The board printed `C`. Returns the next frame to write, if an upload is in progress.
    /// After the last chunk this returns [`Frame::Trailer`] and the upload is complete.
    pub fn chunk_ready(&mut self) -> Option<Frame> {
        let transfer = self.current.as_mut()?;
        if let Some(queued) = self.queued.take() {
            *transfer = queued;
            return Some(Frame::Restart);
        }
        if let Some(chunk) = transfer.pending.pop_front() {
            return Some(Frame::Chunk(chunk));
        }
        let transfer = self.current.take()?;
        self.last_sent = Some(transfer.program);
        Some(Frame::Trailer)
    }
    pub fn is_uploading(&self) -> bool {
        self.current.is_some()
    }
    /// Abandons any upload in progress and forgets what was sent, so the next [`UploadChannel::send`] always transfers.
    pub fn forget(&mut self) {
        self.current = None;
        self.queued = None;
        self.last_sent = None;
    }
    /// Forgets the last fully sent program without touching an upload in progress.
    pub fn forget_sent(&mut self) {
        self.last_sent = None;
    }
    /// Abandons the upload in progress. The last fully sent program is still remembered.
    pub fn cancel(&mut self) {
        self.current = None;
        self.queued = None;
    }
}

#[test]
fn test_frame_bytes() {
    assert_eq!(Frame::UploadStart.to_bytes(), b"\rio.receive(\"/sd/autorun.lua\")\r");
    assert_eq!(Frame::Chunk(b"abc".to_vec()).to_bytes(), b"\x03abc");
    assert_eq!(Frame::Trailer.to_bytes(), b"\x00\r\ndofile(\"/sd/autorun.lua\")\r\n");
    assert_eq!(Frame::Restart.to_bytes(), b"\x00\rio.receive(\"/sd/autorun.lua\")\r");
    assert!(Frame::Restart.expects_ack());
    assert_eq!(Frame::StopAll.to_bytes(), b"thread.stop()\r\n");
    assert!(Frame::Chunk(vec![]).expects_ack());
    assert!(!Frame::Trailer.expects_ack());
}

#[test]
fn test_write_gate() {
    let mut gate = WriteGate::new(3);
    assert_eq!(gate.acquire().unwrap(), true);
    assert_eq!(gate.acquire().unwrap(), false);
    assert_eq!(gate.acquire().unwrap(), false);
    assert!(matches!(gate.acquire(), Err(LinkError::WriteContention { attempts: 3 })));
    gate.release();
    assert_eq!(gate.acquire().unwrap(), true);
}
