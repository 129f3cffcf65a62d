//! End-to-end scenarios driving the interpreter the way an embedding host
//! would: register native ensembles, evaluate scripts, pump the event loop,
//! and run the `tclsh` binary on script files.

use std::io::Write;
use std::process::{Command, Stdio};

use tcl::eventloop::{EventOutcome, ALL_EVENTS, DONT_WAIT, TIME_EVENTS};
use tcl::interp::{CmdResult, Interp};
use tcl::subcmd::{self, SubCmd};
use tcl::value::Obj;

// ── Ensemble dispatch scenario ────────────────────────────────────────────

fn foo_bar(interp: &mut Interp, _: &[Obj]) -> CmdResult {
    interp.set_var("last", Obj::new_string("bar"));
    Ok(Obj::empty())
}

fn foo_baz(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    interp.set_var("baz_args", Obj::new_list(argv.to_vec()));
    Ok(Obj::empty())
}

static FOO_TABLE: &[SubCmd] = &[
    SubCmd { name: "bar", args: "", min_args: 0, max_args: 0, flags: 0, func: foo_bar },
    SubCmd { name: "baz", args: "a ?b?", min_args: 1, max_args: 2, flags: 0, func: foo_baz },
];

fn foo_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    subcmd::call_subcmd(interp, FOO_TABLE, argv)
}

#[test]
fn ensemble_dispatch_end_to_end() {
    let mut interp = Interp::new();
    interp.register("cmd.foo", foo_cmd);

    let err = interp.eval("cmd.foo ba").unwrap_err();
    let msg = err.message();
    assert!(msg.contains("ambiguous"), "got: {msg}");
    assert!(msg.contains("bar") && msg.contains("baz"));

    let err = interp.eval("cmd.foo bar x").unwrap_err();
    assert_eq!(err.message(), "wrong # args: should be \"cmd.foo bar\"");

    interp.eval("cmd.foo baz x").unwrap();
    assert_eq!(&*interp.get_var("baz_args").unwrap().string(), "x");
}

// ── Event loop scenarios ──────────────────────────────────────────────────

#[test]
fn chained_timers_fire_across_calls() {
    let mut interp = Interp::new();
    interp.eval("set fired {}").unwrap();
    interp
        .eval("after 0 {lappend fired A; after 0 {lappend fired B}}")
        .unwrap();
    // Timer A fires; the timer it schedules must wait for the next call.
    interp.process_events(TIME_EVENTS | DONT_WAIT).unwrap();
    assert_eq!(&*interp.get_var("fired").unwrap().string(), "A");
    interp.process_events(TIME_EVENTS | DONT_WAIT).unwrap();
    assert_eq!(&*interp.get_var("fired").unwrap().string(), "A B");
    assert_eq!(
        interp.process_events(ALL_EVENTS).unwrap(),
        EventOutcome::NothingToDo
    );
}

#[test]
fn vwait_drives_timers_to_completion() {
    let mut interp = Interp::new();
    interp.eval("set steps {}").unwrap();
    interp.eval("after 5 {lappend steps one; after 5 {lappend steps two; set done 1}}").unwrap();
    interp.eval("vwait done").unwrap();
    assert_eq!(&*interp.get_var("steps").unwrap().string(), "one two");
}

// ── Reference lifecycle scenario ──────────────────────────────────────────

#[test]
fn reference_lifecycle_with_finalizer() {
    let mut interp = Interp::new();
    interp.eval("set log {}").unwrap();
    interp.eval("proc cleanup {ref val} {lappend log $val}").unwrap();

    let anchored = interp.eval("ref keepme cleanup").unwrap();
    interp.set_var("held", anchored);
    interp.eval("ref loseme cleanup").unwrap();
    interp.eval("set scratch 0").unwrap();

    assert_eq!(interp.eval("collect").unwrap().get_int().unwrap(), 1);
    assert_eq!(&*interp.get_var("log").unwrap().string(), "loseme");
    assert_eq!(&*interp.eval("getref $held").unwrap().string(), "keepme");

    // Dropping the anchor frees the second reference on the next sweep.
    interp.eval("unset held; set scratch 1").unwrap();
    assert_eq!(interp.eval("collect").unwrap().get_int().unwrap(), 1);
    assert_eq!(&*interp.get_var("log").unwrap().string(), "loseme keepme");
}

// ── Shimmering across commands ────────────────────────────────────────────

#[test]
fn values_shimmer_between_string_and_int() {
    let mut interp = Interp::new();
    interp.eval("set x 0x10").unwrap();
    assert_eq!(interp.eval("incr x").unwrap().get_int().unwrap(), 17);
    interp.eval("lappend x tail").unwrap();
    assert_eq!(&*interp.get_var("x").unwrap().string(), "17 tail");
}

// ── tclsh binary ──────────────────────────────────────────────────────────

fn tclsh() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_tclsh"))
}

#[test]
fn tclsh_runs_a_script_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "set greeting {{hello from a file}}").unwrap();
    writeln!(file, "proc id {{x}} {{set out $x}}").unwrap();
    writeln!(file, "id 42").unwrap();
    let status = Command::new(tclsh())
        .arg(file.path())
        .status()
        .expect("spawn tclsh");
    assert!(status.success());
}

#[test]
fn tclsh_reports_script_errors() {
    let output = Command::new(tclsh())
        .args(["-e", "no_such_cmd"])
        .output()
        .expect("spawn tclsh");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid command name \"no_such_cmd\""));
}

#[test]
fn tclsh_repl_evaluates_stdin() {
    let mut child = Command::new(tclsh())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn tclsh");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"set x repl-works\nset x\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("repl-works"));
}
