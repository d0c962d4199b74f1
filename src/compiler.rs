//! Lowers block chains into lua source.
//!
//! Every block is compiled inputs-first: literal slots stay as text, nested reporters become lua expressions,
//! C-slots become statement chains, and variadic slots are flattened in place.
//! The selector rule then splices those compiled arguments into its template, and the rest of the chain is appended after it.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::ast::{Block, Selector, Slot};
use crate::board::{BoardConfig, PinMode};
use crate::protocol::UnitRef;
use crate::value::{Literal, quote};
use crate::vecmap::VecMap;

/// Which unit the code being compiled belongs to, and whether it runs inside a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub unit: UnitRef,
    /// Loops and waits cooperatively yield when this is set.
    /// It is cleared for code that runs outside of the scheduler, such as message callbacks.
    pub should_yield: bool,
}

/// A problem in the block tree itself. Compilation of the whole request is abandoned.
#[derive(Debug)]
pub enum CompileError<'a> {
    UnknownSelector { selector: &'a str },
    MissingInput { selector: Selector, index: usize },
    WrongInputKind { selector: Selector, index: usize, expected: InputKind },
    UnsupportedOption { selector: Selector, option: &'a str },
    /// Only reporters and predicates have a value to show.
    NotAReporter { selector: &'a str },
}
impl fmt::Display for CompileError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileError::UnknownSelector { selector } => write!(f, "unknown block: {selector}"),
            CompileError::MissingInput { selector, index } => write!(f, "{selector} is missing input {index}"),
            CompileError::WrongInputKind { selector, index, expected } => write!(f, "{selector} expected {expected:?} for input {index}"),
            CompileError::UnsupportedOption { selector, option } => write!(f, "{selector} does not support option {option:?}"),
            CompileError::NotAReporter { selector } => write!(f, "{selector} does not report a value"),
        }
    }
}

/// The kind of argument a selector rule expected to find in an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Value,
    Script,
    Name,
}

/// Why a block was compiled to nothing instead of to working code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InertReason {
    NoPinout,
    UnknownPin { pin: u32 },
    DynamicPin,
    NoBroker,
}

/// A block that compiled to nothing. These are not errors: the rest of the script still runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostic {
    pub selector: Selector,
    pub reason: InertReason,
}
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.reason {
            InertReason::NoPinout => write!(f, "{}: the board has no pinout, so this block does nothing", self.selector),
            InertReason::UnknownPin { pin } => write!(f, "{}: the board has no suitable pin {pin}, so this block does nothing", self.selector),
            InertReason::DynamicPin => write!(f, "{}: pin numbers must be typed in directly, so this block does nothing", self.selector),
            InertReason::NoBroker => write!(f, "{}: no MQTT broker is configured, so this block does nothing", self.selector),
        }
    }
}

/// Remembers which pins straight-line code has already configured, so their direction is set only once.
///
/// Entries only stay valid until another coroutine may run or control flow may skip code,
/// so the cache is cleared at yield points and around nested scripts.
/// The generated guard also checks the device's own `cfg.p` table, so a stale miss only costs a few bytes.
#[derive(Debug, Clone, Default)]
pub struct PinModeCache {
    modes: VecMap<u32, PinMode>,
}
impl PinModeCache {
    /// Records that `pin` is now in `mode`. Returns `true` if a direction guard must be emitted.
    pub fn needs_guard(&mut self, pin: u32, mode: PinMode) -> bool {
        self.modes.insert(pin, mode) != Some(mode)
    }
    pub fn clear(&mut self) {
        self.modes.clear();
    }
}

enum Arg<'a> {
    Literal(&'a str),
    Name(&'a str),
    Expr(String),
    Script(String),
}

struct Args<'a> {
    selector: Selector,
    items: Vec<Arg<'a>>,
}
impl<'a> Args<'a> {
    fn get(&self, index: usize) -> Result<&Arg<'a>, CompileError<'a>> {
        self.items.get(index).ok_or(CompileError::MissingInput { selector: self.selector, index })
    }
    fn wrong(&self, index: usize, expected: InputKind) -> CompileError<'a> {
        CompileError::WrongInputKind { selector: self.selector, index, expected }
    }
    /// A value of its natural lua type.
    fn value(&self, index: usize) -> Result<String, CompileError<'a>> {
        Ok(match self.get(index)? {
            Arg::Literal(x) => Literal::classify(x).to_lua(),
            Arg::Name(x) => format!("vars[{}]", quote(x)),
            Arg::Expr(x) => x.clone(),
            Arg::Script(_) => return Err(self.wrong(index, InputKind::Value)),
        })
    }
    fn number(&self, index: usize) -> Result<String, CompileError<'a>> {
        match self.get(index)? {
            Arg::Literal(x) => Ok(Literal::classify(x).to_lua_number()),
            _ => self.value(index),
        }
    }
    /// A value where lua needs a string. Literals keep their exact text (e.g. `007`).
    fn string(&self, index: usize) -> Result<String, CompileError<'a>> {
        match self.get(index)? {
            Arg::Literal(x) => Ok(quote(x)),
            _ => Ok(format!("_s({})", self.value(index)?)),
        }
    }
    fn script(&self, index: usize) -> Result<&str, CompileError<'a>> {
        match self.get(index)? {
            Arg::Script(x) => Ok(x),
            Arg::Literal(x) if x.is_empty() => Ok(""),
            _ => Err(self.wrong(index, InputKind::Script)),
        }
    }
    fn name(&self, index: usize) -> Result<&'a str, CompileError<'a>> {
        match self.get(index)? {
            Arg::Literal(x) | Arg::Name(x) => Ok(*x),
            _ => Err(self.wrong(index, InputKind::Name)),
        }
    }
    /// A pin number, or `None` if it is only known at runtime.
    fn pin(&self, index: usize) -> Result<Option<u32>, CompileError<'a>> {
        Ok(match self.get(index)? {
            Arg::Literal(x) => x.trim().parse::<u32>().ok(),
            _ => None,
        })
    }
    fn values_from(&self, start: usize) -> Result<Vec<String>, CompileError<'a>> {
        (start..self.items.len()).map(|i| self.value(i)).collect()
    }
}

fn flatten<'a>(slots: &'a [Slot], out: &mut Vec<&'a Slot>) {
    for slot in slots {
        match slot {
            Slot::Variadic(x) => flatten(x, out),
            x => out.push(x),
        }
    }
}

fn monadic(func: &str, x: &str) -> Option<String> {
    Some(match func {
        "abs" => format!("math.abs({x})"),
        "ceiling" => format!("math.ceil({x})"),
        "floor" => format!("math.floor({x})"),
        "sqrt" => format!("math.sqrt({x})"),
        "sin" | "cos" | "tan" => format!("math.{func}(math.rad({x}))"),
        "asin" | "acos" | "atan" => format!("math.deg(math.{func}({x}))"),
        "ln" => format!("math.log({x})"),
        "log" => format!("math.log({x}, 10)"),
        "e^" => format!("math.exp({x})"),
        "10^" => format!("10 ^ ({x})"),
        _ => return None,
    })
}

/// Compiles block chains for one board.
pub struct Compiler<'b> {
    board: &'b BoardConfig,
    pins: PinModeCache,
    diagnostics: Vec<Diagnostic>,
}
impl<'b> Compiler<'b> {
    pub fn new(board: &'b BoardConfig) -> Self {
        Self { board, pins: Default::default(), diagnostics: vec![] }
    }
    /// Forgets everything learned about pin directions. Call this before compiling the next unit.
    pub fn start_unit(&mut self) {
        self.pins.clear();
    }
    /// The blocks that compiled to nothing so far, each reported once.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        core::mem::take(&mut self.diagnostics)
    }

    fn inert(&mut self, selector: Selector, reason: InertReason) {
        let diagnostic = Diagnostic { selector, reason };
        if !self.diagnostics.contains(&diagnostic) {
            log::warn!("{diagnostic}");
            self.diagnostics.push(diagnostic);
        }
    }

    /// Compiles `block` and every block chained below it.
    ///
    /// For a reporter this is a single lua expression; for anything else it is a sequence of newline-terminated statements.
    pub fn compile<'a>(&mut self, block: &'a Block, ctx: Context) -> Result<String, CompileError<'a>> {
        let mut code = String::new();
        for block in block.chain() {
            let selector = Selector::from_name(&block.selector).ok_or(CompileError::UnknownSelector { selector: &block.selector })?;
            if selector == Selector::SubscribeToMqttMessage {
                code += &self.compile_subscribe(block, ctx)?;
                break;
            }
            code += &self.compile_block(selector, block, ctx)?;
        }
        Ok(code)
    }

    fn compile_script<'a>(&mut self, script: Option<&'a Block>, ctx: Context) -> Result<String, CompileError<'a>> {
        self.pins.clear();
        let res = match script {
            Some(x) => self.compile(x, ctx)?,
            None => String::new(),
        };
        self.pins.clear();
        Ok(res)
    }

    fn input<'a>(&mut self, slot: &'a Slot, ctx: Context) -> Result<Arg<'a>, CompileError<'a>> {
        Ok(match slot {
            Slot::Literal(x) => Arg::Literal(x),
            Slot::UpvarName(x) => Arg::Name(x),
            Slot::NestedReporter(x) => Arg::Expr(self.compile(x, ctx)?),
            Slot::NestedStatement(x) => Arg::Script(self.compile_script(x.as_deref(), ctx)?),
            Slot::Variadic(_) => unreachable!(),
        })
    }

    fn args<'a>(&mut self, selector: Selector, slots: &[&'a Slot], ctx: Context) -> Result<Args<'a>, CompileError<'a>> {
        let mut items = Vec::with_capacity(slots.len());
        for (i, &slot) in slots.iter().enumerate() {
            // the right side of and/or may be skipped at runtime
            let snapshot = match (selector, i) {
                (Selector::ReportAnd | Selector::ReportOr, 1) => Some(self.pins.clone()),
                _ => None,
            };
            items.push(self.input(slot, ctx)?);
            if let Some(snapshot) = snapshot {
                self.pins = snapshot;
            }
        }
        Ok(Args { selector, items })
    }

    fn compile_block<'a>(&mut self, selector: Selector, block: &'a Block, ctx: Context) -> Result<String, CompileError<'a>> {
        let mut slots = Vec::with_capacity(block.inputs.len());
        flatten(&block.inputs, &mut slots);

        if selector.yields() {
            self.pins.clear();
        }
        let args = self.args(selector, &slots, ctx)?;
        if selector.yields() {
            self.pins.clear();
        }

        let yield_point = if ctx.should_yield { "c.yield()\n" } else { "" };
        let unit_tag = |tag: &str| quote(&format!("{tag}:{}:", ctx.unit));

        Ok(match selector {
            Selector::ReceiveGo => String::new(),
            Selector::DoWait => match ctx.should_yield {
                true => format!("do local t = tmr.read() while tmr.getdiffnow(nil, t) < {} * 1000000 do c.yield() end end\n", args.number(0)?),
                false => format!("tmr.delay(tmr.SYS_TIMER, {} * tmr.SEC)\n", args.number(0)?),
            }
            Selector::DoWaitUntil => match ctx.should_yield {
                true => format!("while not {} do c.yield() end\n", args.value(0)?),
                false => format!("while not {} do end\n", args.value(0)?),
            }
            Selector::DoForever => format!("while true do\n{}{yield_point}end\n", args.script(0)?),
            Selector::DoRepeat => format!("for i = 1, {} do\n{}{yield_point}end\n", args.number(0)?, args.script(1)?),
            Selector::DoIf => format!("if {} then\n{}end\n", args.value(0)?, args.script(1)?),
            Selector::DoIfElse => format!("if {} then\n{}else\n{}end\n", args.value(0)?, args.script(1)?, args.script(2)?),
            Selector::DoStopThis => "do return end\n".into(),
            Selector::DoStopAll => "do for k in pairs(cr) do print(\"dc:\" .. k .. \":\") cr[k] = nil end cn = 0 return end\n".into(),
            Selector::DoRun => {
                self.pins.clear();
                match args.get(0)? {
                    Arg::Expr(f) => format!("{f}({})\n", args.values_from(1)?.join(", ")),
                    _ => String::new(),
                }
            }
            Selector::Evaluate => {
                self.pins.clear();
                match args.get(0)? {
                    Arg::Expr(f) => format!("{f}({})", args.values_from(1)?.join(", ")),
                    _ => "nil".into(),
                }
            }
            Selector::ReifyScript => format!("(function()\n{}end)", args.script(0)?),
            Selector::ReifyReporter => match args.items.is_empty() {
                true => "(function() end)".into(),
                false => format!("(function() return {} end)", args.value(0)?),
            }
            Selector::DoReport => format!("do local r = {} print({} .. _s(r)) return r end\n", args.value(0)?, unit_tag("pb")),

            Selector::ReportSum => format!("({} + {})", args.number(0)?, args.number(1)?),
            Selector::ReportDifference => format!("({} - {})", args.number(0)?, args.number(1)?),
            Selector::ReportProduct => format!("({} * {})", args.number(0)?, args.number(1)?),
            Selector::ReportQuotient => format!("({} / {})", args.number(0)?, args.number(1)?),
            Selector::ReportModulus => format!("({} % {})", args.number(0)?, args.number(1)?),
            Selector::ReportMonadic => {
                let func = match args.get(0)? {
                    Arg::Literal(x) => x.trim(),
                    _ => return Err(args.wrong(0, InputKind::Name)),
                };
                let res = monadic(func, &args.number(1)?).ok_or(CompileError::UnsupportedOption { selector, option: func })?;
                format!("({res})")
            }
            Selector::ReportRandom => format!("math.random({}, {})", args.number(0)?, args.number(1)?),
            Selector::ReportLessThan => format!("({} < {})", args.value(0)?, args.value(1)?),
            Selector::ReportEquals => format!("({} == {})", args.value(0)?, args.value(1)?),
            Selector::ReportGreaterThan => format!("({} > {})", args.value(0)?, args.value(1)?),
            Selector::ReportAnd => format!("({} and {})", args.value(0)?, args.value(1)?),
            Selector::ReportOr => format!("({} or {})", args.value(0)?, args.value(1)?),
            Selector::ReportNot => format!("(not {})", args.value(0)?),
            Selector::ReportTrue => "true".into(),
            Selector::ReportFalse => "false".into(),
            Selector::ReportJoinWords => match args.items.len() {
                0 => "\"\"".into(),
                n => format!("({})", (0..n).map(|i| args.string(i)).collect::<Result<Vec<_>, _>>()?.join(" .. ")),
            }
            Selector::RunLua => {
                let func = match args.get(0)? {
                    Arg::Literal(code) => format!("(function() {code} end)"),
                    _ => format!("load({})", args.string(0)?),
                };
                self.pins.clear();
                format!("do local f = {func}() if f ~= nil then print({} .. _s(f)) end end\n", unit_tag("pb"))
            }

            Selector::ReportGetVar => format!("vars[{}]", quote(args.name(0)?)),
            Selector::DoSetVar => {
                let name = args.name(0)?;
                let var = format!("vars[{}]", quote(name));
                format!("{var} = {} print({} .. _s({var}))\n", args.value(1)?, quote(&format!("vv:{name}:")))
            }
            Selector::DoChangeVar => {
                let name = args.name(0)?;
                let var = format!("vars[{}]", quote(name));
                format!("{var} = (tonumber({var}) or 0) + {} print({} .. _s({var}))\n", args.number(1)?, quote(&format!("vv:{name}:")))
            }
            Selector::ReportNewList => {
                let items = args.values_from(0)?;
                match items.is_empty() {
                    true => "{length = 0}".into(),
                    false => format!("{{{}, length = {}}}", items.join(", "), items.len()),
                }
            }
            Selector::ReportListItem => format!("_lg({}, {})", args.value(1)?, args.value(0)?),
            Selector::ReportListLength => format!("_ll({})", args.value(0)?),
            Selector::ReportListContainsItem => format!("_lh({}, {})", args.value(0)?, args.value(1)?),
            Selector::AddListItem => format!("_la({}, {})\n", args.value(1)?, args.value(0)?),
            Selector::DeleteListItem => format!("_ld({}, {})\n", args.value(1)?, args.value(0)?),
            Selector::InsertListItem => format!("_li({}, {}, {})\n", args.value(2)?, args.value(1)?, args.value(0)?),
            Selector::ReplaceListItem => format!("_lr({}, {}, {})\n", args.value(1)?, args.value(0)?, args.value(2)?),

            Selector::SetPinDigital => match self.pin_name(selector, &args, Pins::DigitalOutput)? {
                None => String::new(),
                Some((pin, name)) => {
                    let level = match args.get(1)? {
                        Arg::Literal(x) => match Literal::classify(x) {
                            Literal::Bool(true) => "1".into(),
                            Literal::Number(x) if x.get() == 1.0 => "1".into(),
                            _ => "0".into(),
                        }
                        _ => format!("_d({})", args.value(1)?),
                    };
                    let guard = self.guard(pin, PinMode::Output, || format!("pio.pin.setdir(pio.OUTPUT, pio.{name})"));
                    format!("{guard}do local v = {level} pio.pin.setval(v, pio.{name}) print(\"pv:{pin}:\" .. v) end\n")
                }
            }
            Selector::SetPinAnalog => match self.pin_name(selector, &args, Pins::AnalogOutput)? {
                None => String::new(),
                Some((pin, name)) => {
                    let guard = self.guard(pin, PinMode::Pwm, || format!("cfg.w[{pin}] = pwm.attach(pio.{name}, 1000, 0) cfg.w[{pin}]:start()"));
                    format!("{guard}do local v = {} cfg.w[{pin}]:setduty(v / 100) print(\"pv:{pin}:\" .. v) end\n", args.number(1)?)
                }
            }
            Selector::GetPinDigital => match self.pin_name(selector, &args, Pins::DigitalInput)? {
                None => "nil".into(),
                Some((pin, name)) => {
                    let read = format!("pio.pin.getval(pio.{name})");
                    match self.guard(pin, PinMode::Input, || format!("pio.pin.setdir(pio.INPUT, pio.{name})")) {
                        guard if guard.is_empty() => read,
                        guard => format!("(function() {guard}return {read} end)()"),
                    }
                }
            }
            Selector::GetPinAnalog => match self.pin_name(selector, &args, Pins::AnalogInput)? {
                None => "nil".into(),
                Some((pin, channel)) => {
                    let read = format!("cfg.a[{pin}]:read()");
                    match self.guard(pin, PinMode::Analog, || format!("cfg.a[{pin}] = adc.setup(adc.ADC1, adc.AVDD, 3220):setupchan(12, {channel})")) {
                        guard if guard.is_empty() => read,
                        guard => format!("(function() {guard}return {read} end)()"),
                    }
                }
            }

            Selector::SubscribeToMqttMessage => unreachable!(),
            Selector::PublishMqttMessage => match self.board.mqtt_connection_code() {
                None => {
                    self.inert(selector, InertReason::NoBroker);
                    String::new()
                }
                Some(connect) => format!("{connect} cfg.m:publish({}, {}, mqtt.QOS0)\n", args.string(1)?, args.string(0)?),
            }
        })
    }

    /// The hat's own chain runs inside the MQTT callback, where yielding is impossible.
    fn compile_subscribe<'a>(&mut self, block: &'a Block, ctx: Context) -> Result<String, CompileError<'a>> {
        let selector = Selector::SubscribeToMqttMessage;
        let mut slots = Vec::with_capacity(block.inputs.len());
        flatten(&block.inputs, &mut slots);
        let args = self.args(selector, &slots, ctx)?;

        let connect = match self.board.mqtt_connection_code() {
            Some(x) => x,
            None => {
                self.inert(selector, InertReason::NoBroker);
                return Ok(String::new());
            }
        };
        let body = self.compile_script(block.next.as_deref(), Context { should_yield: false, ..ctx })?;
        let matches = match args.get(0)? {
            Arg::Literal(x) if x.is_empty() => "true".to_string(),
            _ => format!("p == {}", args.string(0)?),
        };
        let topic = args.string(1)?;
        let key = quote(&ctx.unit.to_string());
        Ok(format!(
            "{connect} msg[{key}] = {{t = {topic}, f = function(p) if {matches} then print({} .. p)\n{body}print({} .. p) end end}} _ms({topic})\n",
            quote(&format!("rc:{}:", ctx.unit)), quote(&format!("dc:{}:", ctx.unit)),
        ))
    }

    fn pin_name<'a>(&mut self, selector: Selector, args: &Args<'a>, pins: Pins) -> Result<Option<(u32, String)>, CompileError<'a>> {
        let board = self.board;
        let pinout = match &board.pinout {
            Some(x) => x,
            None => {
                self.inert(selector, InertReason::NoPinout);
                return Ok(None);
            }
        };
        let pin = match args.pin(0)? {
            Some(x) => x,
            None => {
                self.inert(selector, InertReason::DynamicPin);
                return Ok(None);
            }
        };
        let table = match pins {
            Pins::DigitalOutput => &pinout.digital_output,
            Pins::DigitalInput => &pinout.digital_input,
            Pins::AnalogOutput => &pinout.analog_output,
            Pins::AnalogInput => &pinout.analog_input,
        };
        match table.get(&pin) {
            Some(name) => Ok(Some((pin, name.to_string()))),
            None => {
                self.inert(selector, InertReason::UnknownPin { pin });
                Ok(None)
            }
        }
    }

    fn guard<F: FnOnce() -> String>(&mut self, pin: u32, mode: PinMode, configure: F) -> String {
        match self.pins.needs_guard(pin, mode) {
            true => format!("if cfg.p[{pin}] ~= {code} then {} cfg.p[{pin}] = {code} end ", configure(), code = mode.code()),
            false => String::new(),
        }
    }
}

#[derive(Clone, Copy)]
enum Pins {
    DigitalOutput,
    DigitalInput,
    AnalogOutput,
    AnalogInput,
}
