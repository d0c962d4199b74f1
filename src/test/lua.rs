use std::prelude::v1::*;

use mlua::Lua;

use crate::compiler::*;
use crate::protocol::UnitRef;
use crate::scheduler::*;

use super::*;

/// Just enough of the board's libraries for generated programs to run on a desktop lua.
/// Everything printed lands in `out`, and the status of a coroutine after each resume lands in `trace`.
const BOARD_STUBS: &str = r#"
out = {}
trace = {}
dirs = {}
levels = {}
function print(s) out[#out + 1] = tostring(s) end
pio = { OUTPUT = 0, INPUT = 1, pin = {} }
for i = 0, 39 do pio["GPIO" .. i] = i end
function pio.pin.setdir(d, p) dirs[p] = d end
function pio.pin.setval(v, p) levels[p] = v end
function pio.pin.getval(p) return levels[p] or 0 end
tmr = { SEC = 1000000, SYS_TIMER = 0 }
function tmr.read() return 0 end
function tmr.getdiffnow(_, t) return 1e12 end
function tmr.delay() end
local real = coroutine
coroutine = setmetatable({
    resume = function(co, ...)
        local res = table.pack(real.resume(co, ...))
        trace[#trace + 1] = real.status(co)
        return table.unpack(res, 1, res.n)
    end,
}, { __index = real })
"#;

fn board_lua() -> Lua {
    let lua = Lua::new();
    lua.load(BOARD_STUBS).exec().unwrap();
    lua
}
fn strings(lua: &Lua, name: &str) -> Vec<String> {
    lua.globals().get::<_, Vec<String>>(name).unwrap()
}

#[test]
fn test_lua_repeat_pin_digital() {
    let project = load_project(include_str!("projects/blink.json"));
    let board = load_board();
    let mut compiler = Compiler::new(&board);
    let source = compiler.compile(&project.scripts[0], Context { unit: UnitRef::Id(2), should_yield: true }).unwrap();
    let unit = CompiledUnit { id: 2, source, origin: 0usize };
    let program = build_program([&unit], &[2]);

    let lua = board_lua();
    lua.load(program.as_str()).exec().unwrap();

    assert_eq!(strings(&lua, "out"), ["rc:2:", "pv:4:1", "pv:4:1", "pv:4:1", "dc:2:"]);
    // the start resume leaves it running, then the trampoline finishes it in exactly 3 resumes
    assert_eq!(strings(&lua, "trace"), ["suspended", "suspended", "suspended", "dead"]);
    assert_eq!(lua.load("return dirs[4], cfg.p[4], levels[4], cn").eval::<(i64, i64, i64, i64)>().unwrap(), (0, 0, 1, 0));
}

#[test]
fn test_lua_hot_update() {
    let project = load_project(include_str!("projects/counter.json"));
    let board = load_board();
    let mut compiler = Compiler::new(&board);
    let units = project.scripts.iter().enumerate().map(|(i, script)| {
        compiler.start_unit();
        let source = compiler.compile(script, Context { unit: UnitRef::Id(i as u32), should_yield: true }).unwrap();
        CompiledUnit { id: i as u32, source, origin: i }
    }).collect::<Vec<_>>();

    // declare everything but leave the trampoline for later, as a re-upload would find it
    let lua = board_lua();
    let program = build_program(&units, &[0, 1]);
    let setup = program.strip_suffix(TRAMPOLINE).unwrap();
    lua.load(setup).exec().unwrap();
    assert_eq!(lua.load("return cn").eval::<i64>().unwrap(), 2);

    // running unit 1 again swaps it in place without adding to the live count
    let program = build_program(&units, &[1]);
    lua.load(program.strip_suffix(TRAMPOLINE).unwrap()).exec().unwrap();
    assert_eq!(lua.load("return cn").eval::<i64>().unwrap(), 2);
    assert_eq!(strings(&lua, "out").iter().filter(|x| *x == "rc:1:").count(), 2);
    assert_eq!(strings(&lua, "out").iter().filter(|x| *x == "rc:0:").count(), 1);
}

#[test]
fn test_lua_list_insert_bounds() {
    let lua = board_lua();
    lua.load(prelude().as_str()).exec().unwrap();
    lua.load(r#"vars["l"] = { "a", "b", length = 2 }"#).exec().unwrap();

    let board = load_board();
    let mut compiler = Compiler::new(&board);
    let ctx = Context { unit: UnitRef::Id(0), should_yield: true };
    for index in ["10", "0", "3"] {
        let insert = command("insertListItem", vec![lit("x"), lit(index), reporter("reportGetVar", vec![lit("l")])]);
        lua.load(compiler.compile(&insert, ctx).unwrap().as_str()).exec().unwrap();
        assert_eq!(lua.load(r#"return vars["l"].length"#).eval::<i64>().unwrap(), 2, "index {index}");
    }
    assert_eq!(lua.load(r#"return _s(vars["l"])"#).eval::<String>().unwrap(), "a,b");

    let insert = command("insertListItem", vec![lit("x"), lit("2"), reporter("reportGetVar", vec![lit("l")])]);
    lua.load(compiler.compile(&insert, ctx).unwrap().as_str()).exec().unwrap();
    assert_eq!(lua.load(r#"return _s(vars["l"])"#).eval::<String>().unwrap(), "a,x,b");
}

#[test]
fn test_lua_adhoc_command() {
    let lua = board_lua();
    lua.load(adhoc_command("(1 + 2)").as_str()).exec().unwrap();
    lua.load(adhoc_command("(function() return 4 -- four\nend)()").as_str()).exec().unwrap();
    assert_eq!(strings(&lua, "out"), ["pb:r:3", "pb:r:4"]);
}
