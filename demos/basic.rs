use whitecat::ast::*;
use whitecat::board::*;
use whitecat::session::*;
use whitecat::std_system::*;

use std::time::Duration;
use std::thread;

// -----------------------------------------------------------------

const BOARD: &str = r#"{
    "name": "N1-ESP32",
    "pinout": { "digitalOutput": { "26": "GPIO26" } }
}"#;

const RUN_TIME: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------

struct Printer; // prints everything the board reports instead of showing it in an editor
impl Feedback<&'static str> for Printer {
    fn show_bubble(&mut self, origin: &&'static str, content: &str) {
        println!("{origin} says {content:?}");
    }
    fn set_highlighted(&mut self, origin: &&'static str, highlighted: bool) {
        println!("{origin} is {}", if highlighted { "running" } else { "done" });
    }
    fn update_pin_widget(&mut self, pin: u32, value: PinReading) {
        println!("pin {pin} = {value:?}");
    }
    fn update_variable_watcher(&mut self, name: &str, value: &str) {
        println!("{name} = {value}");
    }
    fn status(&mut self, status: Status) {
        println!("[{status:?}]");
    }
}

fn lit(text: &str) -> Slot {
    Slot::Literal(text.into())
}

fn main() {
    let device = match std::env::args().nth(1) {
        Some(x) => x,
        None => {
            eprintln!("usage: basic <serial device>");
            std::process::exit(1);
        }
    };
    let board = BoardConfig::from_json(BOARD).unwrap();

    // when green flag clicked: forever { set pin 26 to 1, wait 0.5, set pin 26 to 0, wait 0.5 }
    let body = Block::new("setPinDigital", BlockKind::Command, vec![lit("26"), lit("1")])
        .then(Block::new("doWait", BlockKind::Command, vec![lit("0.5")]))
        .then(Block::new("setPinDigital", BlockKind::Command, vec![lit("26"), lit("0")]))
        .then(Block::new("doWait", BlockKind::Command, vec![lit("0.5")]));
    let blink = Block::new("receiveGo", BlockKind::Hat, vec![])
        .then(Block::new("doForever", BlockKind::Command, vec![Slot::NestedStatement(Some(Box::new(body)))]));

    let link = BoardLink::open(&device, board, Settings::default(), Printer).unwrap();
    link.send(Request::Run(vec![("blink", blink)]));
    thread::sleep(RUN_TIME);

    link.send(Request::StopAll);
    if let Err(e) = link.close() {
        eprintln!("{e}");
    }
}
