use std::prelude::v1::*;

use compact_str::CompactString;

use crate::ast::*;
use crate::board::*;
use crate::session::*;

mod compiler;
mod upload;
mod lua;


fn load_project(json: &str) -> Project {
    serde_json::from_str(json).unwrap()
}
fn load_board() -> BoardConfig {
    BoardConfig::from_json(include_str!("projects/board.json")).unwrap()
}

fn lit(text: &str) -> Slot {
    Slot::Literal(text.into())
}
fn reporter(selector: &str, inputs: Vec<Slot>) -> Slot {
    Slot::NestedReporter(Box::new(Block::new(selector, BlockKind::Reporter, inputs)))
}
fn script(block: Block) -> Slot {
    Slot::NestedStatement(Some(Box::new(block)))
}
fn command(selector: &str, inputs: Vec<Slot>) -> Block {
    Block::new(selector, BlockKind::Command, inputs)
}

/// Everything a session asked the editor to show, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Shown {
    Bubble(usize, CompactString),
    Highlight(usize, bool),
    Pin(u32, PinReading),
    Variable(CompactString, CompactString),
    Status(Status),
    Output(CompactString),
}

#[derive(Default)]
struct Recorder {
    shown: Vec<Shown>,
}
impl Recorder {
    fn take(&mut self) -> Vec<Shown> {
        std::mem::take(&mut self.shown)
    }
}
impl Feedback<usize> for Recorder {
    fn show_bubble(&mut self, origin: &usize, content: &str) {
        self.shown.push(Shown::Bubble(*origin, content.into()));
    }
    fn set_highlighted(&mut self, origin: &usize, highlighted: bool) {
        self.shown.push(Shown::Highlight(*origin, highlighted));
    }
    fn update_pin_widget(&mut self, pin: u32, value: PinReading) {
        self.shown.push(Shown::Pin(pin, value));
    }
    fn update_variable_watcher(&mut self, name: &str, value: &str) {
        self.shown.push(Shown::Variable(name.into(), value.into()));
    }
    fn status(&mut self, status: Status) {
        self.shown.push(Shown::Status(status));
    }
    fn device_output(&mut self, line: &str) {
        self.shown.push(Shown::Output(line.into()));
    }
}
