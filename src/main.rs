use clap::Parser;

use whitecat::cli::{run, Mode};
use whitecat::session::Settings;

fn main() {
    macro_rules! crash {
        ($ret:literal : $($tt:tt)*) => {{
            eprintln!($($tt)*);
            std::process::exit($ret);
        }}
    }

    let hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        hook(panic_info);
        crash!(666: "unrecoverable error");
    }));

    env_logger::init();
    run(Mode::parse(), Settings::default());
}
