//! A host-side model of what the generated program does on the board.
//!
//! The board keeps its state in lua globals (`cr`, `cn`, `vars`, `cfg.p`).
//! Here that state lives in an explicit [`Device`] that is passed by reference to every coroutine the [`Trampoline`] resumes,
//! which makes scheduling behavior observable in tests and lets a fake board drive a [`crate::session::Session`].

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use compact_str::{CompactString, format_compact};
use educe::Educe;
use num_traits::FromPrimitive;

use crate::board::PinMode;
use crate::protocol::UnitId;
use crate::vecmap::VecMap;

/// Lifecycle of a unit on the board. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Running,
    Dead,
}

/// The result of resuming a coroutine once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoStatus {
    Yielded,
    Returned,
}

/// The body of a unit. Each call runs until the next yield point or the end of the script.
pub trait Coroutine {
    fn resume(&mut self, device: &mut Device) -> CoStatus;
}
impl<F: FnMut(&mut Device) -> CoStatus> Coroutine for F {
    fn resume(&mut self, device: &mut Device) -> CoStatus {
        self(device)
    }
}

/// Mutable board state: pins, their configured modes, variables, and the lines printed to the console.
#[derive(Debug, Default)]
pub struct Device {
    pub pins: BTreeMap<u32, i64>,
    pub pin_modes: BTreeMap<u32, PinMode>,
    pub vars: BTreeMap<CompactString, CompactString>,
    output: Vec<CompactString>,
}
impl Device {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn print(&mut self, line: CompactString) {
        self.output.push(line);
    }
    /// Takes every line printed since the last call.
    pub fn take_output(&mut self) -> Vec<CompactString> {
        core::mem::take(&mut self.output)
    }
    /// Applies a raw `cfg.p` mode code. Returns `true` if the pin had to be reconfigured.
    /// Unknown codes leave the pin untouched.
    pub fn configure_pin(&mut self, pin: u32, code: u8) -> bool {
        match PinMode::from_u8(code) {
            Some(mode) => self.pin_modes.insert(pin, mode) != Some(mode),
            None => {
                log::warn!("unknown pin mode {code} for pin {pin}");
                false
            }
        }
    }
    /// Drives a digital output, coercing the level the same way generated code does.
    pub fn write_digital(&mut self, pin: u32, level: i64) {
        self.configure_pin(pin, PinMode::Output.code());
        let level = if level == 1 { 1 } else { 0 };
        self.pins.insert(pin, level);
        self.print(format_compact!("pv:{pin}:{level}"));
    }
    pub fn read_digital(&mut self, pin: u32) -> i64 {
        self.configure_pin(pin, PinMode::Input.code());
        self.pins.get(&pin).copied().unwrap_or(0)
    }
    pub fn set_var(&mut self, name: &str, value: CompactString) {
        self.print(format_compact!("vv:{name}:{value}"));
        self.vars.insert(name.into(), value);
    }
}

#[derive(Debug)]
struct Bound<Co> {
    co: Co,
    state: UnitState,
    resumes: usize,
}

/// Mirrors the generated trampoline: a table of registered coroutines and a live count.
#[derive(Debug, Educe)]
#[educe(Default)]
pub struct Trampoline<Co: Coroutine> {
    declared: VecMap<UnitId, Co>,
    table: VecMap<UnitId, Bound<Co>>,
    live: usize,
}
impl<Co: Coroutine> Trampoline<Co> {
    pub fn new() -> Self {
        Self::default()
    }
    /// Binds the body of unit `id`. Nothing runs until it is started.
    pub fn declare(&mut self, id: UnitId, co: Co) {
        self.declared.insert(id, co);
    }
    /// Registers the most recently declared body of `id`, replacing a running one in place, and resumes it once.
    /// Returns `false` if nothing was declared for `id`.
    pub fn start(&mut self, id: UnitId, device: &mut Device) -> bool {
        let co = match self.declared.remove(&id) {
            Some(x) => x,
            None => return false,
        };
        if !self.table.contains_key(&id) {
            self.live += 1;
        }
        self.table.insert(id, Bound { co, state: UnitState::Pending, resumes: 0 });
        if let Some(bound) = self.table.get_mut(&id) {
            Self::resume(id, bound, device);
        }
        true
    }
    fn resume(id: UnitId, bound: &mut Bound<Co>, device: &mut Device) {
        if bound.state == UnitState::Pending {
            device.print(format_compact!("rc:{id}:"));
            bound.state = UnitState::Running;
        }
        bound.resumes += 1;
        if bound.co.resume(device) == CoStatus::Returned {
            bound.state = UnitState::Dead;
        }
    }
    /// One trip around the table: every coroutine that is not dead is resumed once,
    /// and every dead one is reported and dropped.
    pub fn pass(&mut self, device: &mut Device) {
        let mut dead = Vec::new();
        for (id, bound) in self.table.iter_mut() {
            match bound.state {
                UnitState::Dead => dead.push(*id),
                _ => Self::resume(*id, bound, device),
            }
        }
        for id in dead {
            self.table.remove(&id);
            self.live -= 1;
            device.print(format_compact!("dc:{id}:"));
        }
    }
    /// Runs passes until no live coroutine is left or `max_passes` is reached. Returns the number of passes made.
    pub fn run(&mut self, device: &mut Device, max_passes: usize) -> usize {
        let mut passes = 0;
        while self.live > 0 && passes < max_passes {
            self.pass(device);
            passes += 1;
        }
        passes
    }
    /// Drops every coroutine without reporting them, like `thread.stop()`.
    pub fn stop_all(&mut self) {
        self.table.clear();
        self.live = 0;
    }
    pub fn live_count(&self) -> usize {
        self.live
    }
    /// The state of a registered unit. Units that were never started, or were dropped after dying, are `None`.
    pub fn state(&self, id: UnitId) -> Option<UnitState> {
        match self.table.get(&id) {
            Some(x) => Some(x.state),
            None => self.declared.get(&id).map(|_| UnitState::Pending),
        }
    }
    pub fn resumes(&self, id: UnitId) -> usize {
        self.table.get(&id).map(|x| x.resumes).unwrap_or(0)
    }
}

/// A list with explicit length, following the same rules as the list helpers in generated code.
///
/// Indices are 1-based. Any index outside `[1, len]` turns the operation into a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceList<T> {
    items: Vec<T>,
}
impl<T: PartialEq> DeviceList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    fn slot(&self, index: i64) -> Option<usize> {
        match index >= 1 && index as usize <= self.items.len() {
            true => Some(index as usize - 1),
            false => None,
        }
    }
    pub fn item(&self, index: i64) -> Option<&T> {
        self.slot(index).map(|i| &self.items[i])
    }
    pub fn contains(&self, value: &T) -> bool {
        self.items.contains(value)
    }
    pub fn add(&mut self, value: T) {
        self.items.push(value);
    }
    /// Inserts before `index`. Returns `false` (and does nothing) if `index` is out of range.
    pub fn insert(&mut self, index: i64, value: T) -> bool {
        match self.slot(index) {
            Some(i) => {
                self.items.insert(i, value);
                true
            }
            None => false,
        }
    }
    pub fn delete(&mut self, index: i64) -> bool {
        match self.slot(index) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }
    pub fn delete_all(&mut self) {
        self.items.clear();
    }
    pub fn replace(&mut self, index: i64, value: T) -> bool {
        match self.slot(index) {
            Some(i) => {
                self.items[i] = value;
                true
            }
            None => false,
        }
    }
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}
