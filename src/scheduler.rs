//! Combines compiled units into a single program that runs them as cooperative coroutines.
//!
//! The program declares one coroutine per unit, starts the requested ones, and then runs a trampoline
//! that resumes every live coroutine in turn until none are left.
//! The coroutine table `cr` and live count `cn` survive re-uploads, so re-running a script swaps its coroutine in place
//! without restarting the others.

use alloc::string::{String, ToString};
use core::fmt::Write;

use crate::protocol::UnitId;
use crate::value::quote;

/// A script compiled for the board, ready to be wrapped as a coroutine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit<O> {
    pub id: UnitId,
    pub source: String,
    /// Editor-side handle of the script this came from.
    pub origin: O,
}

/// Global state shared by every program, created only if an earlier program has not already done so.
pub const STATE_INIT: &str = "vars = vars or {} msg = msg or {} cfg = cfg or {} cfg.p = cfg.p or {} cfg.a = cfg.a or {} cfg.w = cfg.w or {} cfg.s = cfg.s or {}";

/// Runtime helpers referenced by compiled code.
///
/// Lists are tables with an explicit `length` field. Out-of-range indices make every list operation a no-op.
pub const HELPERS: &str = r#"function _r(v) local ok, e = c.resume(v) if not ok then print(e) end end
function _s(v) if type(v) == "table" then local t = {} for i = 1, (v.length or #v) do t[i] = _s(v[i]) end return table.concat(t, ",") end return tostring(v) end
function _d(v) if v == true or v == 1 then return 1 end return 0 end
function _ix(l, i) if i == "last" then return l.length end if i == "any" or i == "random" then if l.length < 1 then return nil end return math.random(l.length) end local n = tonumber(i) if n == nil then return nil end return math.floor(n) end
function _lg(l, i) if type(l) ~= "table" then return nil end i = _ix(l, i) if i == nil or i < 1 or i > l.length then return nil end return l[i] end
function _ll(l) if type(l) ~= "table" then return 0 end return l.length end
function _lh(l, x) if type(l) ~= "table" then return false end for i = 1, l.length do if l[i] == x then return true end end return false end
function _la(l, x) if type(l) ~= "table" then return end l.length = l.length + 1 l[l.length] = x end
function _ld(l, i) if type(l) ~= "table" then return end if i == "all" then for k = 1, l.length do l[k] = nil end l.length = 0 return end i = _ix(l, i) if i == nil or i < 1 or i > l.length then return end for k = i, l.length - 1 do l[k] = l[k + 1] end l[l.length] = nil l.length = l.length - 1 end
function _li(l, i, x) if type(l) ~= "table" then return end i = _ix(l, i) if i == nil or i < 1 or i > l.length then return end for k = l.length, i, -1 do l[k + 1] = l[k] end l[i] = x l.length = l.length + 1 end
function _lr(l, i, x) if type(l) ~= "table" then return end i = _ix(l, i) if i == nil or i < 1 or i > l.length then return end l[i] = x end
function _ms(t) if not cfg.s[t] then cfg.m:subscribe(t, mqtt.QOS0, function(l, p) for _, e in pairs(msg) do if e.t == t then e.f(p) end end end) cfg.s[t] = true end end
"#;

/// Resumes every live coroutine until all of them are dead, reporting each death with a `dc` line.
pub const TRAMPOLINE: &str = "while cn > 0 do\nfor k, v in pairs(cr) do if c.status(v) ~= \"dead\" then _r(v) else print(\"dc:\" .. k .. \":\") cr[k] = nil cn = cn - 1 end end\nend\n";

/// Everything that precedes the unit declarations of a program.
pub fn prelude() -> String {
    format!("-- wc:{}\nc = coroutine\nif cr == nil then cr = {{}} cn = 0 end\n{STATE_INIT}\n{HELPERS}", crate::fingerprint())
}

/// The name of the global holding the coroutine of unit `id`.
pub fn coroutine_name(id: UnitId) -> String {
    format!("c{id}")
}

/// Builds the full program for `units`, starting only the units listed in `to_start`.
///
/// Units that are not started are still declared, so a later start statement can refer to them.
pub fn build_program<'a, O: 'a, I: IntoIterator<Item = &'a CompiledUnit<O>>>(units: I, to_start: &[UnitId]) -> String {
    let mut res = prelude();
    for unit in units {
        let name = coroutine_name(unit.id);
        write!(res, "{name} = c.create(function() print(\"rc:{}:\")\n{}end)\n", unit.id, unit.source).ok();
    }
    for &id in to_start {
        let name = coroutine_name(id);
        write!(res, "if cr[{id}] == nil then cn = cn + 1 end cr[{id}] = {name} _r({name})\n").ok();
    }
    res.push_str(TRAMPOLINE);
    res
}

/// A one-line command that evaluates `expr` right away and reports it as an ad-hoc `pb:r:` bubble.
///
/// This can arrive before any program has been uploaded, so it sets up the shared state itself
/// and falls back to `tostring` if the program helpers are missing.
/// Multi-line expressions (such as ones holding user lua with `--` comments) are sent as a quoted chunk for `load`.
pub fn adhoc_command(expr: &str) -> String {
    let expr = match expr.contains(['\r', '\n']) {
        false => expr.to_string(),
        true => format!("load({})()", quote(&format!("return {expr}"))),
    };
    format!("{STATE_INIT} print(\"pb:r:\" .. (_s or tostring)({expr}))")
}
