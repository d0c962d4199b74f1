use std::prelude::v1::*;
use std::fs::File;
use std::time::Duration;
use std::io::{self, BufRead, Read, Write as IoWrite, stdin, stdout};
use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::{fmt, thread};

use clap::Parser;

use crossterm::{cursor, execute, queue};
use crossterm::tty::IsTty;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{self, ClearType};
use crossterm::style::{ResetColor, SetForegroundColor, Color, Print};

use crate::ast::{Block, Project};
use crate::board::{BoardConfig, BoardConfigError};
use crate::compiler::{Compiler, Context};
use crate::protocol::UnitRef;
use crate::registry::IdentityRegistry;
use crate::scheduler::{self, CompiledUnit};
use crate::session::{Feedback, PinReading, Settings, Status};
use crate::std_system::{BoardLink, Request};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

macro_rules! crash {
    ($ret:literal : $($tt:tt)*) => {{
        eprint!($($tt)*);
        eprint!("\r\n");
        std::process::exit($ret);
    }}
}

struct AtExit<F: FnOnce()>(Option<F>);
impl<F: FnOnce()> AtExit<F> {
    fn new(f: F) -> Self { Self(Some(f)) }
}
impl<F: FnOnce()> Drop for AtExit<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() { f() }
    }
}

/// WhiteCat board actions that can be performed
#[derive(Parser, Debug)]
pub enum Mode {
    /// Compiles a (json) block file and prints the generated lua program to stdout
    Compile {
        /// Path to the (json) block file
        src: String,
        /// Path to the (json) board description
        #[clap(long)]
        board: Option<String>,
    },
    /// Compiles a (json) block file, uploads it to a board, and streams its feedback
    Run {
        /// Path to the (json) block file
        src: String,
        /// Path to the serial device the board is attached to (already set to the board's baud rate)
        #[clap(long)]
        device: String,
        /// Path to the (json) board description
        #[clap(long)]
        board: Option<String>,

        /// Disables yielding in loops and waits, which runs each script to completion before the next
        #[clap(long)]
        no_yield: bool,
    },
    /// Sends raw lua lines typed on stdin to the board console
    Repl {
        /// Path to the serial device the board is attached to (already set to the board's baud rate)
        #[clap(long)]
        device: String,
    },
}

#[derive(Debug)]
enum OpenProjectError {
    ParseError { error: serde_json::Error },
    NoScripts,
    BoardError { error: BoardConfigError },
}
impl From<BoardConfigError> for OpenProjectError { fn from(error: BoardConfigError) -> Self { Self::BoardError { error } } }
impl fmt::Display for OpenProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenProjectError::ParseError { error } => write!(f, "failed to parse block file: {error}"),
            OpenProjectError::NoScripts => write!(f, "block file had no scripts"),
            OpenProjectError::BoardError { error } => write!(f, "{error}"),
        }
    }
}

fn read_file(src: &str) -> io::Result<String> {
    let mut file = File::open(src)?;
    let mut s = String::new();
    file.read_to_string(&mut s)?;
    Ok(s)
}
fn open_project(content: &str) -> Result<Project, OpenProjectError> {
    let project: Project = match serde_json::from_str(content) {
        Ok(x) => x,
        Err(error) => return Err(OpenProjectError::ParseError { error }),
    };
    match project.scripts.is_empty() {
        true => Err(OpenProjectError::NoScripts),
        false => Ok(project),
    }
}
fn open_board(src: Option<&str>) -> Result<BoardConfig, OpenProjectError> {
    match src {
        Some(src) => {
            let content = read_file(src).unwrap_or_else(|_| crash!(1: "failed to read file '{src}'"));
            Ok(BoardConfig::from_json(&content)?)
        }
        None => Ok(BoardConfig::default()),
    }
}

/// Scripts are identified by their position in the block file.
fn script_chains(project: &Project) -> Vec<(usize, Block)> {
    project.scripts.iter().cloned().enumerate().collect()
}

fn compile_project(project: &Project, board: &BoardConfig, settings: Settings) -> String {
    let mut registry = IdentityRegistry::new();
    let mut compiler = Compiler::new(board);
    let mut units = Vec::with_capacity(project.scripts.len());
    for (origin, block) in project.scripts.iter().enumerate() {
        let id = registry.assign(origin);
        compiler.start_unit();
        match compiler.compile(block, Context { unit: UnitRef::Id(id), should_yield: settings.should_yield }) {
            Ok(source) => units.push(CompiledUnit { id, source, origin }),
            Err(e) => crash!(3: "script {origin}: {e}"),
        }
    }
    for diagnostic in compiler.diagnostics() {
        eprintln!("warning: {diagnostic}");
    }
    let to_start = units.iter().map(|x| x.id).collect::<Vec<_>>();
    scheduler::build_program(&units, &to_start)
}

enum Message {
    Line(String),
    Status(String),
}

/// Feedback that forwards everything to the terminal thread.
struct TermFeedback {
    sender: Sender<Message>,
}
impl TermFeedback {
    fn line(&self, line: String) {
        let _ = self.sender.send(Message::Line(line));
    }
}
impl Feedback<usize> for TermFeedback {
    fn show_bubble(&mut self, origin: &usize, content: &str) {
        self.line(format!("script {origin} > {content:?}"));
    }
    fn set_highlighted(&mut self, origin: &usize, highlighted: bool) {
        log::debug!("script {origin} {}", if highlighted { "running" } else { "stopped" });
    }
    fn update_pin_widget(&mut self, pin: u32, value: PinReading) {
        match value {
            PinReading::Digital(x) => self.line(format!("pin {pin} = {x}")),
            PinReading::Analog(x) => self.line(format!("pin {pin} = {x}")),
        }
    }
    fn update_variable_watcher(&mut self, name: &str, value: &str) {
        self.line(format!("{name} = {value}"));
    }
    fn status(&mut self, status: Status) {
        let text = match status {
            Status::Ready => "board ready".into(),
            Status::Uploading { chunks } => format!("uploading ({chunks} chunks)"),
            Status::Uploaded => "uploaded".into(),
            Status::Unchanged => "program unchanged".into(),
            Status::Stopped => "stopped".into(),
            Status::Suspended => "suspended".into(),
            Status::Resumed => "resumed".into(),
            Status::Inert(diagnostic) => format!("warning: {diagnostic}"),
            Status::CompileFailed(error) => format!("compile error: {error}"),
            Status::ResetRequired => "write failed, please reset the board".into(),
            Status::Unresponsive => "board stopped responding".into(),
            Status::Disconnected => "disconnected".into(),
        };
        let _ = self.sender.send(Message::Status(text));
    }
    fn device_output(&mut self, line: &str) {
        self.line(format!("board: {line}"));
    }
}

fn open_link(device: &str, board: BoardConfig, settings: Settings) -> (BoardLink<usize>, std::sync::mpsc::Receiver<Message>) {
    let (sender, receiver) = channel();
    let link = BoardLink::open(device, board, settings, TermFeedback { sender })
        .unwrap_or_else(|e| crash!(4: "failed to open '{device}': {e}"));
    (link, receiver)
}

fn run_proj_tty(project: &Project, device: &str, board: BoardConfig, settings: Settings) {
    let (link, messages) = open_link(device, board, settings);

    terminal::enable_raw_mode().unwrap_or_else(|e| crash!(5: "failed to enter raw mode: {e}"));
    let _ = execute!(stdout(), cursor::Hide);
    let _tty_mode_guard = AtExit::new(|| {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(stdout(), cursor::Show);
    });

    let old_panic_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |ctx| {
        let _ = terminal::disable_raw_mode();
        old_panic_hook(ctx);
    }));

    let mut term_size = terminal::size().unwrap_or((80, 24));
    let mut status = String::from("connecting (esc: stop all, p: suspend, c: resume, r: run again, ctrl-c: quit)");
    let mut update_flag = true;

    link.send(Request::Run(script_chains(project)));

    'program: loop {
        while event::poll(Duration::from_secs(0)).unwrap_or(false) {
            match event::read() {
                Ok(Event::Key(key)) => match key.code {
                    KeyCode::Char('c') if key.modifiers == KeyModifiers::CONTROL => break 'program,
                    KeyCode::Esc => { link.send(Request::StopAll); }
                    KeyCode::Char('p') => { link.send(Request::SuspendAll); }
                    KeyCode::Char('c') => { link.send(Request::ResumeAll); }
                    KeyCode::Char('r') => { link.send(Request::Run(script_chains(project))); }
                    _ => (),
                }
                Ok(Event::Resize(c, r)) => {
                    term_size = (c, r);
                    update_flag = true;
                }
                _ => (),
            }
        }

        loop {
            match messages.try_recv() {
                Ok(Message::Line(line)) => {
                    let _ = queue!(stdout(), terminal::Clear(ClearType::CurrentLine), Print(line), Print("\r\n"));
                    update_flag = true;
                }
                Ok(Message::Status(text)) => {
                    status = text;
                    update_flag = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'program,
            }
        }

        if update_flag {
            update_flag = false;
            let _ = queue!(stdout(),
                cursor::SavePosition,
                cursor::MoveTo(0, term_size.1.saturating_sub(1)),
                terminal::Clear(ClearType::CurrentLine),
                SetForegroundColor(Color::Blue),
                Print(&status),
                ResetColor,
                cursor::RestorePosition);
            let _ = stdout().flush();
        }

        thread::sleep(POLL_INTERVAL);
    }

    let _ = execute!(stdout(), terminal::Clear(ClearType::CurrentLine));
    if let Err(e) = link.close() {
        log::info!("link closed: {e}");
    }
}
fn run_proj_non_tty(project: &Project, device: &str, board: BoardConfig, settings: Settings) {
    let (link, messages) = open_link(device, board, settings);
    link.send(Request::Run(script_chains(project)));
    for message in messages {
        match message {
            Message::Line(line) => println!("{line}"),
            Message::Status(text) => println!("[{text}]"),
        }
    }
    if let Err(e) = link.close() {
        crash!(6: "{e}");
    }
}
fn run_repl(device: &str, settings: Settings) {
    let (link, messages) = open_link(device, BoardConfig::default(), settings);
    let printer = thread::spawn(move || {
        for message in messages {
            match message {
                Message::Line(line) => println!("{line}"),
                Message::Status(text) => println!("[{text}]"),
            }
        }
    });
    for line in stdin().lock().lines() {
        let line = match line {
            Ok(x) => x,
            Err(_) => break,
        };
        if !link.send(Request::Raw(line)) {
            break;
        }
    }
    if let Err(e) = link.close() {
        log::info!("link closed: {e}");
    }
    let _ = printer.join();
}

pub fn run(mode: Mode, settings: Settings) {
    match mode {
        Mode::Compile { src, board } => {
            let content = read_file(&src).unwrap_or_else(|_| crash!(1: "failed to read file '{src}'"));
            let project = open_project(&content).unwrap_or_else(|e| crash!(2: "{e}"));
            let board = open_board(board.as_deref()).unwrap_or_else(|e| crash!(2: "{e}"));

            print!("{}", compile_project(&project, &board, settings));
        }
        Mode::Run { src, device, board, no_yield } => {
            let content = read_file(&src).unwrap_or_else(|_| crash!(1: "failed to read file '{src}'"));
            let project = open_project(&content).unwrap_or_else(|e| crash!(2: "{e}"));
            let board = open_board(board.as_deref()).unwrap_or_else(|e| crash!(2: "{e}"));
            let settings = Settings { should_yield: settings.should_yield && !no_yield, ..settings };

            if stdout().is_tty() {
                run_proj_tty(&project, &device, board, settings);
            } else {
                run_proj_non_tty(&project, &device, board, settings);
            }
        }
        Mode::Repl { device } => run_repl(&device, settings),
    }
}

#[test]
fn test_open_project() {
    assert!(matches!(open_project("{\"scripts\": []}"), Err(OpenProjectError::NoScripts)));
    assert!(matches!(open_project("{\"scripts\": "), Err(OpenProjectError::ParseError { .. })));
    let project = open_project(r#"{"name": "blink", "scripts": [{"selector": "receiveGo", "kind": "hat"}]}"#).unwrap();
    assert_eq!(project.name, "blink");
    assert_eq!(script_chains(&project).len(), 1);
}
