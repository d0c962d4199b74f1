use std::prelude::v1::*;

use crate::ast::*;
use crate::board::*;
use crate::compiler::*;
use crate::protocol::UnitRef;

use super::*;

fn ctx(id: u32) -> Context {
    Context { unit: UnitRef::Id(id), should_yield: true }
}
fn compile_with(board: &BoardConfig, block: &Block, ctx: Context) -> String {
    let mut compiler = Compiler::new(board);
    compiler.compile(block, ctx).unwrap()
}

#[test]
fn test_repeat_pin_digital() {
    let project = load_project(include_str!("projects/blink.json"));
    let code = compile_with(&load_board(), &project.scripts[0], ctx(2));
    assert_eq!(code, concat!(
        "for i = 1, 3 do\n",
        "if cfg.p[4] ~= 0 then pio.pin.setdir(pio.OUTPUT, pio.GPIO4) cfg.p[4] = 0 end ",
        "do local v = 1 pio.pin.setval(v, pio.GPIO4) print(\"pv:4:\" .. v) end\n",
        "c.yield()\n",
        "end\n",
    ));
}

#[test]
fn test_loops_always_yield() {
    let board = load_board();
    let body = command("doSetVar", vec![lit("x"), lit("1")]);
    for loop_block in [
        command("doForever", vec![script(body.clone())]),
        command("doForever", vec![Slot::NestedStatement(None)]),
        command("doRepeat", vec![lit("10"), script(body.clone())]),
        command("doRepeat", vec![reporter("reportGetVar", vec![lit("n")]), Slot::NestedStatement(None)]),
    ] {
        let code = compile_with(&board, &loop_block, ctx(0));
        assert!(code.ends_with("c.yield()\nend\n"), "{code}");
    }

    let project = load_project(include_str!("projects/counter.json"));
    let code = compile_with(&board, &project.scripts[0], ctx(0));
    assert_eq!(code, concat!(
        "vars[\"count\"] = 0 print(\"vv:count:\" .. _s(vars[\"count\"]))\n",
        "while true do\n",
        "vars[\"count\"] = (tonumber(vars[\"count\"]) or 0) + 1 print(\"vv:count:\" .. _s(vars[\"count\"]))\n",
        "do local t = tmr.read() while tmr.getdiffnow(nil, t) < 0.5 * 1000000 do c.yield() end end\n",
        "c.yield()\n",
        "end\n",
    ));
}

#[test]
fn test_no_yield_outside_scheduler() {
    let board = load_board();
    let ctx = Context { unit: UnitRef::Id(1), should_yield: false };
    assert_eq!(compile_with(&board, &command("doWait", vec![lit("2")]), ctx), "tmr.delay(tmr.SYS_TIMER, 2 * tmr.SEC)\n");
    assert_eq!(compile_with(&board, &command("doForever", vec![Slot::NestedStatement(None)]), ctx), "while true do\nend\n");
    assert_eq!(compile_with(&board, &command("doWaitUntil", vec![reporter("reportTrue", vec![])]), ctx), "while not true do end\n");
}

#[test]
fn test_pin_guard_once() {
    let project = load_project(include_str!("projects/inputs.json"));
    let code = compile_with(&load_board(), &project.scripts[0], ctx(0));
    assert_eq!(code.matches("pio.pin.setdir(pio.INPUT, pio.GPIO5)").count(), 1);
    assert_eq!(code, concat!(
        "vars[\"a\"] = (function() if cfg.p[5] ~= 1 then pio.pin.setdir(pio.INPUT, pio.GPIO5) cfg.p[5] = 1 end return pio.pin.getval(pio.GPIO5) end)() print(\"vv:a:\" .. _s(vars[\"a\"]))\n",
        "vars[\"b\"] = pio.pin.getval(pio.GPIO5) print(\"vv:b:\" .. _s(vars[\"b\"]))\n",
    ));
}

#[test]
fn test_pin_guard_invalidation() {
    let board = load_board();
    let set = || command("setPinDigital", vec![lit("4"), lit("0")]);
    let guards = |code: &str| code.matches("pio.pin.setdir(pio.OUTPUT, pio.GPIO4)").count();

    // a wait lets other scripts reconfigure the pin
    let chain = set().then(command("doWait", vec![lit("1")])).then(set());
    assert_eq!(guards(&compile_with(&board, &chain, ctx(0))), 2);

    // a nested body may or may not run
    let chain = set().then(command("doIf", vec![reporter("reportTrue", vec![]), script(set())])).then(set());
    assert_eq!(guards(&compile_with(&board, &chain, ctx(0))), 3);

    // switching direction always needs a guard
    let chain = set()
        .then(command("doSetVar", vec![lit("x"), reporter("getPinDigital", vec![lit("5")])]))
        .then(command("setPinDigital", vec![lit("5"), lit("1")]));
    let code = compile_with(&board, &chain, ctx(0));
    assert_eq!(code.matches("cfg.p[5] ~= 1").count(), 1);
    assert_eq!(code.matches("cfg.p[5] ~= 0").count(), 1);

    // the right side of and/or might be skipped
    let read = || reporter("getPinDigital", vec![lit("5")]);
    let chain = command("doSetVar", vec![lit("x"), reporter("reportAnd", vec![reporter("reportFalse", vec![]), read()])])
        .then(command("doSetVar", vec![lit("y"), read()]));
    assert_eq!(compile_with(&board, &chain, ctx(0)).matches("pio.pin.setdir(pio.INPUT, pio.GPIO5)").count(), 2);

    // separate units never share guards
    let mut compiler = Compiler::new(&board);
    let first = compiler.compile(&set(), ctx(0)).unwrap();
    compiler.start_unit();
    let second = compiler.compile(&set(), ctx(1)).unwrap();
    assert_eq!(guards(&first), 1);
    assert_eq!(guards(&second), 1);
}

#[test]
fn test_pin_levels() {
    let board = load_board();
    let level = |slot: Slot| {
        let code = compile_with(&board, &command("setPinDigital", vec![lit("26"), slot]), ctx(0));
        let start = code.find("local v = ").unwrap() + "local v = ".len();
        let end = code[start..].find(" pio.pin.setval").unwrap();
        code[start..start + end].to_string()
    };
    assert_eq!(level(lit("true")), "1");
    assert_eq!(level(lit("1")), "1");
    assert_eq!(level(lit("false")), "0");
    assert_eq!(level(lit("7")), "0");
    assert_eq!(level(lit("")), "0");
    assert_eq!(level(reporter("reportGetVar", vec![lit("on")])), "_d(vars[\"on\"])");

    let code = compile_with(&board, &command("setPinAnalog", vec![lit("26"), lit("50")]), ctx(0));
    assert_eq!(code, "if cfg.p[26] ~= 2 then cfg.w[26] = pwm.attach(pio.GPIO26, 1000, 0) cfg.w[26]:start() cfg.p[26] = 2 end do local v = 50 cfg.w[26]:setduty(v / 100) print(\"pv:26:\" .. v) end\n");

    let code = compile_with(&board, &command("doSetVar", vec![lit("t"), reporter("getPinAnalog", vec![lit("36")])]), ctx(0));
    assert!(code.starts_with("vars[\"t\"] = (function() if cfg.p[36] ~= 3 then cfg.a[36] = adc.setup(adc.ADC1, adc.AVDD, 3220):setupchan(12, adc.ADC1_CH0) cfg.p[36] = 3 end return cfg.a[36]:read() end)()"), "{code}");
}

#[test]
fn test_inert_blocks() {
    let bare = BoardConfig::default();
    let mut compiler = Compiler::new(&bare);
    let chain = command("setPinDigital", vec![lit("4"), lit("1")])
        .then(command("setPinDigital", vec![lit("4"), lit("0")]))
        .then(command("publishMQTTmessage", vec![lit("hi"), lit("cats")]))
        .then(command("doSetVar", vec![lit("x"), reporter("getPinDigital", vec![lit("5")])]));
    let code = compiler.compile(&chain, ctx(0)).unwrap();
    assert_eq!(code, "vars[\"x\"] = nil print(\"vv:x:\" .. _s(vars[\"x\"]))\n");
    assert_eq!(compiler.diagnostics(), &[
        Diagnostic { selector: Selector::SetPinDigital, reason: InertReason::NoPinout },
        Diagnostic { selector: Selector::PublishMqttMessage, reason: InertReason::NoBroker },
        Diagnostic { selector: Selector::GetPinDigital, reason: InertReason::NoPinout },
    ]);

    let board = load_board();
    let mut compiler = Compiler::new(&board);
    let chain = command("setPinDigital", vec![lit("99"), lit("1")])
        .then(command("setPinDigital", vec![reporter("reportGetVar", vec![lit("p")]), lit("1")]))
        .then(command("setPinAnalog", vec![lit("4"), lit("10")]));
    assert_eq!(compiler.compile(&chain, ctx(0)).unwrap(), "");
    assert_eq!(compiler.take_diagnostics(), vec![
        Diagnostic { selector: Selector::SetPinDigital, reason: InertReason::UnknownPin { pin: 99 } },
        Diagnostic { selector: Selector::SetPinDigital, reason: InertReason::DynamicPin },
        Diagnostic { selector: Selector::SetPinAnalog, reason: InertReason::UnknownPin { pin: 4 } },
    ]);
    assert!(compiler.diagnostics().is_empty());
}

#[test]
fn test_compile_errors() {
    let board = load_board();
    let mut compiler = Compiler::new(&board);

    let block = command("doSetVar", vec![lit("x"), lit("1")]).then(command("doTurnLeft", vec![]));
    assert!(matches!(compiler.compile(&block, ctx(0)), Err(CompileError::UnknownSelector { selector: "doTurnLeft" })));

    let block = command("doIf", vec![]);
    assert!(matches!(compiler.compile(&block, ctx(0)), Err(CompileError::MissingInput { selector: Selector::DoIf, index: 0 })));

    let block = command("doForever", vec![lit("oops")]);
    assert!(matches!(compiler.compile(&block, ctx(0)), Err(CompileError::WrongInputKind { selector: Selector::DoForever, index: 0, expected: InputKind::Script })));

    let block = Block::new("reportMonadic", BlockKind::Reporter, vec![lit("cbrt"), lit("8")]);
    let err = compiler.compile(&block, ctx(0)).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOption { selector: Selector::ReportMonadic, option: "cbrt" }));
    assert_eq!(format!("{err}"), "reportMonadic does not support option \"cbrt\"");
}

#[test]
fn test_expressions() {
    let board = load_board();
    let expr = |selector: &str, inputs: Vec<Slot>| compile_with(&board, &Block::new(selector, BlockKind::Reporter, inputs), ctx(0));

    assert_eq!(expr("reportSum", vec![lit("007"), lit("")]), "(7 + 0)");
    assert_eq!(expr("reportQuotient", vec![reporter("reportGetVar", vec![lit("a")]), lit("0.5")]), "(vars[\"a\"] / 0.5)");
    assert_eq!(expr("reportMonadic", vec![lit("sin"), lit("90")]), "(math.sin(math.rad(90)))");
    assert_eq!(expr("reportMonadic", vec![lit("log"), lit("100")]), "(math.log(100, 10))");
    assert_eq!(expr("reportEquals", vec![lit("cat"), lit("3")]), "(\"cat\" == 3)");
    assert_eq!(expr("reportNot", vec![lit("true")]), "(not true)");
    assert_eq!(expr("reportJoinWords", vec![Slot::Variadic(vec![lit("007"), lit(" x"), reporter("reportSum", vec![lit("1"), lit("2")])])]), "(\"007\" .. \" x\" .. _s((1 + 2)))");
    assert_eq!(expr("reportJoinWords", vec![Slot::Variadic(vec![])]), "\"\"");
    assert_eq!(expr("reportNewList", vec![Slot::Variadic(vec![lit("a"), lit("2")])]), "{\"a\", 2, length = 2}");
    assert_eq!(expr("reportNewList", vec![Slot::Variadic(vec![])]), "{length = 0}");
    assert_eq!(expr("reportListItem", vec![lit("last"), reporter("reportGetVar", vec![lit("l")])]), "_lg(vars[\"l\"], \"last\")");
    assert_eq!(expr("reifyReporter", vec![reporter("reportSum", vec![lit("1"), lit("1")])]), "(function() return (1 + 1) end)");
    assert_eq!(expr("reportGetVar", vec![lit("say \"hi\"\n")]), "vars[\"say \\\"hi\\\"\\n\"]");
}

#[test]
fn test_statements() {
    let board = load_board();
    let stmt = |block: Block| compile_with(&board, &block, ctx(3));

    assert_eq!(stmt(command("doReport", vec![lit("5")])), "do local r = 5 print(\"pb:3:\" .. _s(r)) return r end\n");
    assert_eq!(stmt(command("doStopThis", vec![])), "do return end\n");
    assert_eq!(stmt(command("doIfElse", vec![reporter("reportTrue", vec![]), Slot::NestedStatement(None), script(command("doStopThis", vec![]))])), "if true then\nelse\ndo return end\nend\n");
    assert_eq!(stmt(command("insertListItem", vec![lit("x"), lit("10"), reporter("reportGetVar", vec![lit("l")])])), "_li(vars[\"l\"], 10, \"x\")\n");
    assert_eq!(stmt(command("deleteListItem", vec![lit("all"), reporter("reportGetVar", vec![lit("l")])])), "_ld(vars[\"l\"], \"all\")\n");
    assert_eq!(stmt(command("runLua", vec![lit("return 1 + 1")])), "do local f = (function() return 1 + 1 end)() if f ~= nil then print(\"pb:3:\" .. _s(f)) end end\n");
    assert_eq!(stmt(command("doRun", vec![reporter("reifyScript", vec![script(command("doStopThis", vec![]))])])), "(function()\ndo return end\nend)()\n");
    assert!(stmt(command("doStopAll", vec![])).contains("print(\"dc:\" .. k .. \":\")"));

    let adhoc = compile_with(&board, &command("doReport", vec![lit("1")]), Context { unit: UnitRef::Adhoc, should_yield: false });
    assert!(adhoc.contains("print(\"pb:r:\" .. _s(r))"));
}

#[test]
fn test_messaging() {
    let board = load_board();
    let connect = board.mqtt_connection_code().unwrap();

    let publish = command("publishMQTTmessage", vec![lit("hello"), lit("cats")]);
    assert_eq!(compile_with(&board, &publish, ctx(0)), format!("{connect} cfg.m:publish(\"cats\", \"hello\", mqtt.QOS0)\n"));

    let hat = Block::new("subscribeToMQTTmessage", BlockKind::Hat, vec![lit(""), lit("cats")])
        .then(command("doForever", vec![script(command("doWait", vec![lit("1")]))]));
    let code = compile_with(&board, &hat, ctx(4));
    assert!(code.starts_with(&format!("{connect} msg[\"4\"] = {{t = \"cats\", f = function(p) if true then print(\"rc:4:\" .. p)\n")), "{code}");
    assert!(code.ends_with("print(\"dc:4:\" .. p) end end} _ms(\"cats\")\n"), "{code}");
    assert!(!code.contains("c.yield()"));
    assert!(code.contains("tmr.delay(tmr.SYS_TIMER, 1 * tmr.SEC)"));

    let filtered = Block::new("subscribeToMQTTmessage", BlockKind::Hat, vec![lit("on"), lit("cats")]);
    assert!(compile_with(&board, &filtered, ctx(4)).contains("if p == \"on\" then"));
}
