//! The editor side of a live connection to a board.
//!
//! A [`Session`] owns everything the editor believes about the board: which units are live, which ids belong to which scripts,
//! and how far the current upload has progressed. It never touches the serial port itself;
//! every operation returns the [`Frame`] to write, and every line read from the board goes through [`Session::handle_line`].

use alloc::vec::Vec;

use compact_str::{CompactString, format_compact};

use crate::ast::{Block, BlockKind};
use crate::board::BoardConfig;
use crate::compiler::{CompileError, Compiler, Context, Diagnostic};
use crate::protocol::{self, DownstreamEvent, UnitId, UnitRef};
use crate::registry::IdentityRegistry;
use crate::scheduler::{self, CompiledUnit};
use crate::upload::{Frame, LinkError, SendStatus, UploadChannel};
use crate::vecmap::VecMap;

/// Settings to use for a [`Session`].
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// The number of program bytes per upload chunk (default `254`, the most a frame can hold).
    pub chunk_size: usize,
    /// How many times a contended write is attempted before asking for a board reset (default `10`).
    pub max_write_attempts: u32,
    /// The pause between contended write attempts in milliseconds (default `100`).
    pub write_retry_ms: u64,
    /// Whether loops and waits yield to the other scripts (default `true`).
    pub should_yield: bool,
    /// How long to wait for the board to acknowledge a chunk in milliseconds (default `Some(5000)`).
    /// `None` waits forever.
    pub ack_timeout_ms: Option<u64>,
    /// How often the wake-up sequence is repeated while the board boots in milliseconds (default `2000`).
    pub wake_interval_ms: u64,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: 254,
            max_write_attempts: 10,
            write_retry_ms: 100,
            should_yield: true,
            ack_timeout_ms: Some(5000),
            wake_interval_ms: 2000,
        }
    }
}

/// A pin value as the editor's pin widgets display it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinReading {
    Digital(bool),
    Analog(CompactString),
}

/// Connection-level events worth showing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The board printed its prompt and is listening.
    Ready,
    Uploading { chunks: usize },
    Uploaded,
    /// The board already has this exact program, so nothing was sent.
    Unchanged,
    Stopped,
    Suspended,
    Resumed,
    /// A block compiled to nothing.
    Inert(Diagnostic),
    CompileFailed(CompactString),
    /// Writes kept failing. The board has to be reset by hand.
    ResetRequired,
    /// The board stopped acknowledging the upload.
    Unresponsive,
    Disconnected,
}

/// The visual feedback sink, implemented by whatever displays scripts to the user.
pub trait Feedback<O> {
    fn show_bubble(&mut self, origin: &O, content: &str);
    fn set_highlighted(&mut self, origin: &O, highlighted: bool);
    fn update_pin_widget(&mut self, pin: u32, value: PinReading);
    fn update_variable_watcher(&mut self, name: &str, value: &str);
    fn status(&mut self, status: Status);
    /// Board console output that is not part of the protocol, such as lua error messages.
    fn device_output(&mut self, line: &str) {
        let _ = line;
    }
}

/// Editor-side state of one board connection.
pub struct Session<O: Ord + Clone, F: Feedback<O>> {
    board: BoardConfig,
    settings: Settings,
    registry: IdentityRegistry<O>,
    units: VecMap<UnitId, CompiledUnit<O>>,
    upload: UploadChannel,
    feedback: F,
    adhoc: Option<O>,
    reported: Vec<Diagnostic>,
    booting: bool,
}
impl<O: Ord + Clone, F: Feedback<O>> Session<O, F> {
    pub fn new(board: BoardConfig, settings: Settings, feedback: F) -> Self {
        Self {
            upload: UploadChannel::new(settings.chunk_size),
            board, settings, feedback,
            registry: Default::default(),
            units: Default::default(),
            adhoc: None,
            reported: vec![],
            booting: false,
        }
    }
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn board(&self) -> &BoardConfig {
        &self.board
    }
    pub fn feedback(&self) -> &F {
        &self.feedback
    }
    pub fn feedback_mut(&mut self) -> &mut F {
        &mut self.feedback
    }
    pub fn registry(&self) -> &IdentityRegistry<O> {
        &self.registry
    }
    /// The units currently believed to be alive on the board.
    pub fn units(&self) -> impl Iterator<Item = &CompiledUnit<O>> {
        self.units.iter().map(|x| x.1)
    }
    pub fn is_uploading(&self) -> bool {
        self.upload.is_uploading()
    }
    pub fn is_booting(&self) -> bool {
        self.booting
    }

    fn report(&mut self, diagnostics: Vec<Diagnostic>) {
        for diagnostic in diagnostics {
            if !self.reported.contains(&diagnostic) {
                self.reported.push(diagnostic);
                self.feedback.status(Status::Inert(diagnostic));
            }
        }
    }

    /// Starts talking to a freshly connected board. The returned frame should be repeated every
    /// [`Settings::wake_interval_ms`] until [`Session::is_booting`] turns `false`.
    pub fn wake_up(&mut self) -> Frame {
        self.booting = true;
        Frame::WakeUp
    }

    /// Compiles and starts every chain in `chains`, keeping the other live units running.
    ///
    /// A chain that is already live is replaced in place under its existing id.
    /// If any chain fails to compile, nothing changes and the error is returned.
    /// Otherwise the returned frame (if any) starts the upload; feed the board's `C` lines to [`Session::handle_line`] to continue it.
    /// While another upload is in progress nothing is returned, and the new program takes over at the board's next `C`.
    pub fn run<'a>(&mut self, chains: &'a [(O, Block)]) -> Result<Option<Frame>, CompileError<'a>> {
        let mut compiler = Compiler::new(&self.board);
        let mut compiled = Vec::with_capacity(chains.len());
        let mut fresh = Vec::new();
        for (origin, block) in chains {
            if self.registry.id_of(origin).is_none() {
                fresh.push(origin.clone());
            }
            let id = self.registry.assign(origin.clone());
            compiler.start_unit();
            match compiler.compile(block, Context { unit: UnitRef::Id(id), should_yield: self.settings.should_yield }) {
                Ok(source) => compiled.push(CompiledUnit { id, source, origin: origin.clone() }),
                Err(e) => {
                    log::error!("failed to compile script: {e}");
                    for origin in fresh.iter() {
                        self.registry.free_origin(origin);
                    }
                    self.feedback.status(Status::CompileFailed(format_compact!("{e}")));
                    return Err(e);
                }
            }
        }
        let diagnostics = compiler.take_diagnostics();
        self.report(diagnostics);

        let to_start = compiled.iter().map(|x| x.id).collect::<Vec<_>>();
        for unit in compiled {
            self.units.insert(unit.id, unit);
        }
        let program = scheduler::build_program(self.units.iter().map(|x| x.1), &to_start);
        Ok(match self.upload.send(program) {
            SendStatus::Skipped => {
                self.feedback.status(Status::Unchanged);
                None
            }
            SendStatus::Started { chunks } => {
                self.feedback.status(Status::Uploading { chunks });
                Some(Frame::UploadStart)
            }
            SendStatus::Queued { chunks } => {
                self.feedback.status(Status::Uploading { chunks });
                None
            }
        })
    }

    /// Evaluates a clicked reporter on the board. The result comes back as a `pb:r:` bubble next to `origin`.
    /// Blocks that do not report a value, or that fail to compile, are reported through [`Status::CompileFailed`].
    pub fn evaluate_reporter<'a>(&mut self, origin: O, block: &'a Block) -> Result<Frame, CompileError<'a>> {
        let mut compiler = Compiler::new(&self.board);
        let compiled = match block.kind {
            BlockKind::Reporter | BlockKind::Predicate => compiler.compile(block, Context { unit: UnitRef::Adhoc, should_yield: false }),
            BlockKind::Command | BlockKind::Hat => Err(CompileError::NotAReporter { selector: &block.selector }),
        };
        let expr = match compiled {
            Ok(expr) => expr,
            Err(e) => {
                log::error!("failed to compile reporter: {e}");
                self.feedback.status(Status::CompileFailed(format_compact!("{e}")));
                return Err(e);
            }
        };
        let diagnostics = compiler.take_diagnostics();
        self.report(diagnostics);

        if let Some(previous) = self.adhoc.take() {
            self.feedback.set_highlighted(&previous, false);
        }
        self.feedback.set_highlighted(&origin, true);
        self.adhoc = Some(origin);
        Ok(Frame::Command(scheduler::adhoc_command(&expr)))
    }

    /// Stops everything on the board and forgets every unit, id, and highlight.
    /// The next run always uploads, even if the program did not change.
    pub fn stop_all(&mut self) -> Frame {
        self.clear();
        self.feedback.status(Status::Stopped);
        Frame::StopAll
    }
    pub fn suspend_all(&mut self) -> Frame {
        self.feedback.status(Status::Suspended);
        Frame::SuspendAll
    }
    pub fn resume_all(&mut self) -> Frame {
        self.feedback.status(Status::Resumed);
        Frame::ResumeAll
    }

    fn clear(&mut self) {
        for (_, unit) in core::mem::take(&mut self.units) {
            self.feedback.set_highlighted(&unit.origin, false);
        }
        if let Some(origin) = self.adhoc.take() {
            self.feedback.set_highlighted(&origin, false);
        }
        self.registry.clear();
        self.upload.forget();
    }

    /// The script `origin` was deleted in the editor. Its id is released and later lines about it are ignored.
    pub fn remove_chain(&mut self, origin: &O) {
        if let Some(id) = self.registry.free_origin(origin) {
            if self.units.remove(&id).is_some() {
                self.feedback.set_highlighted(origin, false);
            }
        }
    }

    /// The serial link failed. Any upload in progress is abandoned.
    pub fn link_failed(&mut self, error: &LinkError) {
        log::error!("{error}");
        self.upload.cancel();
        match error {
            LinkError::WriteContention { .. } => self.feedback.status(Status::ResetRequired),
            LinkError::DeviceUnresponsive => self.feedback.status(Status::Unresponsive),
            #[cfg(feature = "std")]
            LinkError::Io { .. } => self.feedback.status(Status::ResetRequired),
            LinkError::Closed => {
                self.clear();
                self.feedback.status(Status::Disconnected);
            }
        }
    }

    /// Handles one line read from the board, returning the frame to write in response (if any).
    pub fn handle_line(&mut self, line: &str) -> Option<Frame> {
        let event = protocol::parse(line);
        log::debug!("board: {event:?}");
        match event {
            DownstreamEvent::ChunkReady => {
                let frame = self.upload.chunk_ready();
                match frame {
                    Some(Frame::Trailer) => self.feedback.status(Status::Uploaded),
                    None => log::debug!("chunk request with no upload in progress"),
                    _ => (),
                }
                frame
            }
            DownstreamEvent::ReporterResult { unit: UnitRef::Adhoc, value } => {
                if let Some(origin) = self.adhoc.take() {
                    self.feedback.show_bubble(&origin, &value);
                    self.feedback.set_highlighted(&origin, false);
                }
                None
            }
            DownstreamEvent::ReporterResult { unit: UnitRef::Id(id), value } => {
                if let Some(origin) = self.registry.resolve(id) {
                    self.feedback.show_bubble(origin, &value);
                }
                None
            }
            DownstreamEvent::ThreadStarted { id, .. } => {
                if let Some(origin) = self.registry.resolve(id) {
                    self.feedback.set_highlighted(origin, true);
                }
                None
            }
            DownstreamEvent::ThreadEnded { id, .. } => {
                if let Some(origin) = self.registry.resolve(id) {
                    self.feedback.set_highlighted(origin, false);
                    if self.units.remove(&id).is_some() {
                        // the board no longer runs what was last sent, so running it again must upload
                        self.upload.forget_sent();
                    }
                }
                None
            }
            DownstreamEvent::PinValue { pin, value } => {
                let digital = self.board.pinout.as_ref().map(|x| x.is_digital(pin)).unwrap_or(false);
                let reading = match digital {
                    true => PinReading::Digital(matches!(value.as_str(), "1" | "true")),
                    false => PinReading::Analog(value),
                };
                self.feedback.update_pin_widget(pin, reading);
                None
            }
            DownstreamEvent::VariableValue { name, value } => {
                self.feedback.update_variable_watcher(&name, &value);
                None
            }
            DownstreamEvent::DeviceReady if self.booting => {
                self.booting = false;
                self.feedback.status(Status::Ready);
                None
            }
            DownstreamEvent::DeviceReady => {
                self.feedback.device_output(line);
                None
            }
            DownstreamEvent::Unrecognized(line) => {
                log::info!("board: {line}");
                self.feedback.device_output(&line);
                None
            }
        }
    }
}
