//! The core command set.
//!
//! Everything here is a thin native wrapper over the interpreter and value
//! layers: variables (`set`, `unset`, `incr`, `exists`), lists (`list`,
//! `llength`, `lindex`, `lappend`), scripted commands (`proc`, `rename`),
//! references (`ref`, `getref`, `setref`, `finalize`, `collect`), and the
//! ensemble commands `array`, `package`, `clock`, and `info`, each a static
//! dispatch table.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::interp::{wrong_num_args, CmdError, CmdResult, Interp};
use crate::subcmd::{self, SubCmd};
use crate::value::Obj;

pub fn register_core(interp: &mut Interp) {
    interp.register("set", set_cmd);
    interp.register("unset", unset_cmd);
    interp.register("incr", incr_cmd);
    interp.register("exists", exists_cmd);
    interp.register("list", list_cmd);
    interp.register("llength", llength_cmd);
    interp.register("lindex", lindex_cmd);
    interp.register("lappend", lappend_cmd);
    interp.register("proc", proc_cmd);
    interp.register("rename", rename_cmd);
    interp.register("break", break_cmd);
    interp.register("continue", continue_cmd);
    interp.register("ref", ref_cmd);
    interp.register("getref", getref_cmd);
    interp.register("setref", setref_cmd);
    interp.register("finalize", finalize_cmd);
    interp.register("collect", collect_cmd);
    interp.register("array", array_cmd);
    interp.register("package", package_cmd);
    interp.register("clock", clock_cmd);
    interp.register("info", info_cmd);
}

// ── Variables ─────────────────────────────────────────────────────────────

fn set_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    match argv.len() {
        2 => {
            let name = argv[1].string();
            interp
                .get_var(&name)
                .ok_or_else(|| CmdError::Msg(format!("can't read \"{name}\": no such variable")))
        }
        3 => {
            interp.set_var(argv[1].string().to_string(), argv[2].clone());
            Ok(argv[2].clone())
        }
        _ => Err(wrong_num_args("set", "varName ?newValue?")),
    }
}

fn unset_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let mut names = &argv[1..];
    let mut complain = true;
    if let Some(first) = names.first() {
        if &*first.string() == "-nocomplain" {
            complain = false;
            names = &names[1..];
        }
    }
    if names.is_empty() && complain {
        return Err(wrong_num_args("unset", "?-nocomplain? varName ?varName ...?"));
    }
    for name in names {
        let name = name.string();
        if !interp.unset_var(&name) && complain {
            return Err(CmdError::Msg(format!(
                "can't unset \"{name}\": no such variable"
            )));
        }
    }
    Ok(Obj::empty())
}

fn incr_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() < 2 || argv.len() > 3 {
        return Err(wrong_num_args("incr", "varName ?increment?"));
    }
    let delta = match argv.get(2) {
        Some(step) => step.get_int()?,
        None => 1,
    };
    let name = argv[1].string();
    let current = match interp.get_var(&name) {
        Some(value) => value.get_int()?,
        // An unset variable starts from zero.
        None => 0,
    };
    // Two's-complement wraparound at the i64 boundary, never a panic.
    let result = Obj::new_int(current.wrapping_add(delta));
    interp.set_var(name.to_string(), result.clone());
    Ok(result)
}

fn exists_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 2 {
        return Err(wrong_num_args("exists", "varName"));
    }
    let exists = interp.get_var(&argv[1].string()).is_some();
    Ok(Obj::new_int(exists as i64))
}

// ── Lists ─────────────────────────────────────────────────────────────────

fn list_cmd(_: &mut Interp, argv: &[Obj]) -> CmdResult {
    Ok(Obj::new_list(argv[1..].to_vec()))
}

fn llength_cmd(_: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 2 {
        return Err(wrong_num_args("llength", "list"));
    }
    Ok(Obj::new_int(argv[1].list_len()? as i64))
}

fn lindex_cmd(_: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 3 {
        return Err(wrong_num_args("lindex", "list index"));
    }
    let items = argv[1].list_elements()?;
    let index = argv[2].get_int()?;
    if index < 0 || index as usize >= items.len() {
        return Ok(Obj::empty());
    }
    Ok(items[index as usize].clone())
}

fn lappend_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() < 2 {
        return Err(wrong_num_args("lappend", "varName ?value ...?"));
    }
    let name = argv[1].string();
    // Copy on write: the variable may share its value with script words.
    // The temporary handle must drop before the append so the value is
    // genuinely unshared.
    let fresh = interp.get_var(&name).unwrap_or_else(Obj::empty).unshared();
    for item in &argv[2..] {
        fresh.list_append(item.clone())?;
    }
    interp.set_var(name.to_string(), fresh.clone());
    Ok(fresh)
}

// ── Scripted commands ─────────────────────────────────────────────────────

fn proc_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 4 {
        return Err(wrong_num_args("proc", "name args body"));
    }
    let params = argv[2]
        .list_elements()?
        .iter()
        .map(|p| p.string().to_string())
        .collect();
    interp.register_proc(&argv[1].string(), params, argv[3].clone());
    Ok(Obj::empty())
}

fn rename_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 3 {
        return Err(wrong_num_args("rename", "oldName newName"));
    }
    interp.rename(&argv[1].string(), &argv[2].string())?;
    Ok(Obj::empty())
}

fn break_cmd(_: &mut Interp, _: &[Obj]) -> CmdResult {
    Err(CmdError::Break)
}

fn continue_cmd(_: &mut Interp, _: &[Obj]) -> CmdResult {
    Err(CmdError::Continue)
}

// ── References ────────────────────────────────────────────────────────────

fn ref_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() < 2 || argv.len() > 3 {
        return Err(wrong_num_args("ref", "value ?finalizer?"));
    }
    let finalizer = argv.get(2).cloned();
    Ok(interp.new_reference(argv[1].clone(), finalizer))
}

fn reference_arg(obj: &Obj) -> Result<u64, CmdError> {
    obj.reference_id()
        .ok_or_else(|| CmdError::Msg(format!("expected reference but got \"{}\"", obj.string())))
}

fn getref_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 2 {
        return Err(wrong_num_args("getref", "reference"));
    }
    let id = reference_arg(&argv[1])?;
    Ok(interp.reference(id)?.value.clone())
}

fn setref_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 3 {
        return Err(wrong_num_args("setref", "reference newValue"));
    }
    let id = reference_arg(&argv[1])?;
    interp.set_reference(id, argv[2].clone())?;
    Ok(argv[2].clone())
}

fn finalize_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() < 2 || argv.len() > 3 {
        return Err(wrong_num_args("finalize", "reference ?command?"));
    }
    let id = reference_arg(&argv[1])?;
    match argv.get(2) {
        None => Ok(interp
            .reference(id)?
            .finalizer
            .clone()
            .unwrap_or_else(Obj::empty)),
        Some(command) => {
            // An empty command clears the finalizer.
            let finalizer = if command.length() == 0 {
                None
            } else {
                Some(command.clone())
            };
            interp.set_finalizer(id, finalizer)?;
            Ok(command.clone())
        }
    }
}

fn collect_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 1 {
        return Err(wrong_num_args("collect", ""));
    }
    Ok(Obj::new_int(interp.collect() as i64))
}

// ── array ensemble ────────────────────────────────────────────────────────

static ARRAY_TABLE: &[SubCmd] = &[
    SubCmd { name: "exists", args: "arrayName", min_args: 1, max_args: 1, flags: 0, func: array_exists },
    SubCmd { name: "get", args: "arrayName", min_args: 1, max_args: 1, flags: 0, func: array_get },
    SubCmd { name: "names", args: "arrayName", min_args: 1, max_args: 1, flags: 0, func: array_names },
    SubCmd { name: "set", args: "arrayName list", min_args: 2, max_args: 2, flags: 0, func: array_set },
    SubCmd { name: "size", args: "arrayName", min_args: 1, max_args: 1, flags: 0, func: array_size },
    SubCmd { name: "unset", args: "arrayName", min_args: 1, max_args: 1, flags: 0, func: array_unset },
];

fn array_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    subcmd::call_subcmd(interp, ARRAY_TABLE, argv)
}

fn array_exists(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let exists = match interp.get_var(&argv[0].string()) {
        Some(value) => value.dict_len().is_ok(),
        None => false,
    };
    Ok(Obj::new_int(exists as i64))
}

fn array_get(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let Some(value) = interp.get_var(&argv[0].string()) else {
        return Ok(Obj::new_list(Vec::new()));
    };
    let mut pairs = Vec::new();
    for key in value.dict_keys()? {
        if let Some(item) = value.dict_get(&key)? {
            pairs.push(Obj::new_string(key));
            pairs.push(item);
        }
    }
    Ok(Obj::new_list(pairs))
}

fn array_names(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let Some(value) = interp.get_var(&argv[0].string()) else {
        return Ok(Obj::new_list(Vec::new()));
    };
    let names = value.dict_keys()?.into_iter().map(Obj::new_string).collect();
    Ok(Obj::new_list(names))
}

fn array_set(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let items = argv[1].list_elements()?;
    if items.len() % 2 != 0 {
        return Err(CmdError::from("list must have an even number of elements"));
    }
    let name = argv[0].string();
    let dict = match interp.get_var(&name) {
        Some(existing) => existing.unshared(),
        None => Obj::new_dict(),
    };
    for pair in items.chunks(2) {
        dict.dict_set(pair[0].string().to_string(), pair[1].clone())?;
    }
    interp.set_var(name.to_string(), dict);
    Ok(Obj::empty())
}

fn array_size(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let size = match interp.get_var(&argv[0].string()) {
        Some(value) => value.dict_len()?,
        None => 0,
    };
    Ok(Obj::new_int(size as i64))
}

fn array_unset(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    interp.unset_var(&argv[0].string());
    Ok(Obj::empty())
}

// ── package ensemble ──────────────────────────────────────────────────────

static PACKAGE_TABLE: &[SubCmd] = &[
    SubCmd { name: "provide", args: "name ?version?", min_args: 1, max_args: 2, flags: 0, func: package_provide },
    SubCmd { name: "require", args: "name", min_args: 1, max_args: 1, flags: 0, func: package_require },
    SubCmd { name: "names", args: "", min_args: 0, max_args: 0, flags: 0, func: package_names },
];

fn package_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    subcmd::call_subcmd(interp, PACKAGE_TABLE, argv)
}

fn package_provide(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let version = argv
        .get(1)
        .cloned()
        .unwrap_or_else(|| Obj::new_string("1.0"));
    interp.package_provide(&argv[0].string(), version.clone());
    Ok(version)
}

fn package_require(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let name = argv[0].string();
    interp
        .package_version(&name)
        .ok_or_else(|| CmdError::Msg(format!("can't find package \"{name}\"")))
}

fn package_names(interp: &mut Interp, _: &[Obj]) -> CmdResult {
    let mut names = interp.package_names();
    names.sort();
    Ok(Obj::new_list(names.into_iter().map(Obj::new_string).collect()))
}

// ── clock ensemble ────────────────────────────────────────────────────────

static CLOCK_TABLE: &[SubCmd] = &[
    SubCmd { name: "seconds", args: "", min_args: 0, max_args: 0, flags: 0, func: clock_seconds },
    SubCmd { name: "millis", args: "", min_args: 0, max_args: 0, flags: 0, func: clock_millis },
    SubCmd { name: "micros", args: "", min_args: 0, max_args: 0, flags: 0, func: clock_micros },
];

fn clock_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    subcmd::call_subcmd(interp, CLOCK_TABLE, argv)
}

fn epoch_micros() -> Result<u128, CmdError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .map_err(|e| CmdError::Msg(format!("clock unavailable: {e}")))
}

fn clock_seconds(_: &mut Interp, _: &[Obj]) -> CmdResult {
    Ok(Obj::new_int((epoch_micros()? / 1_000_000) as i64))
}

fn clock_millis(_: &mut Interp, _: &[Obj]) -> CmdResult {
    Ok(Obj::new_int((epoch_micros()? / 1_000) as i64))
}

fn clock_micros(_: &mut Interp, _: &[Obj]) -> CmdResult {
    Ok(Obj::new_int(epoch_micros()? as i64))
}

// ── info ensemble ─────────────────────────────────────────────────────────

static INFO_TABLE: &[SubCmd] = &[
    SubCmd { name: "commands", args: "", min_args: 0, max_args: 0, flags: 0, func: info_commands },
    SubCmd { name: "exists", args: "varName", min_args: 1, max_args: 1, flags: 0, func: info_exists },
    SubCmd { name: "globals", args: "", min_args: 0, max_args: 0, flags: 0, func: info_globals },
    SubCmd { name: "version", args: "", min_args: 0, max_args: 0, flags: 0, func: info_version },
];

fn info_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    subcmd::call_subcmd(interp, INFO_TABLE, argv)
}

fn info_commands(interp: &mut Interp, _: &[Obj]) -> CmdResult {
    // Table order varies with the hash salt; sort for stable script output.
    let mut names = interp.command_names();
    names.sort();
    Ok(Obj::new_list(names.into_iter().map(Obj::new_string).collect()))
}

fn info_exists(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let exists = interp.get_var(&argv[0].string()).is_some();
    Ok(Obj::new_int(exists as i64))
}

fn info_globals(interp: &mut Interp, _: &[Obj]) -> CmdResult {
    let mut names = interp.var_names();
    names.sort();
    Ok(Obj::new_list(names.into_iter().map(Obj::new_string).collect()))
}

fn info_version(_: &mut Interp, _: &[Obj]) -> CmdResult {
    Ok(Obj::new_string(env!("CARGO_PKG_VERSION")))
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reads_and_writes() {
        let mut interp = Interp::new();
        interp.eval("set x hello").unwrap();
        assert_eq!(&*interp.eval("set x").unwrap().string(), "hello");
        let err = interp.eval("set missing").unwrap_err();
        assert_eq!(err.message(), "can't read \"missing\": no such variable");
    }

    #[test]
    fn unset_complains_unless_asked_not_to() {
        let mut interp = Interp::new();
        interp.eval("set x 1; unset x").unwrap();
        assert_eq!(interp.eval("exists x").unwrap().get_int().unwrap(), 0);
        let err = interp.eval("unset x").unwrap_err();
        assert_eq!(err.message(), "can't unset \"x\": no such variable");
        interp.eval("unset -nocomplain x").unwrap();
    }

    #[test]
    fn incr_defaults_creates_and_steps() {
        let mut interp = Interp::new();
        assert_eq!(interp.eval("incr fresh").unwrap().get_int().unwrap(), 1);
        assert_eq!(interp.eval("incr fresh 10").unwrap().get_int().unwrap(), 11);
        interp.eval("set s text").unwrap();
        let err = interp.eval("incr s").unwrap_err();
        assert_eq!(err.message(), "expected integer but got \"text\"");
    }

    #[test]
    fn incr_wraps_at_the_i64_boundary() {
        let mut interp = Interp::new();
        interp.eval("set x 9223372036854775807").unwrap();
        assert_eq!(
            interp.eval("incr x").unwrap().get_int().unwrap(),
            i64::MIN
        );
        interp.eval("set y -9223372036854775808").unwrap();
        assert_eq!(
            interp.eval("incr y -1").unwrap().get_int().unwrap(),
            i64::MAX
        );
    }

    #[test]
    fn list_commands_round_trip() {
        let mut interp = Interp::new();
        interp.eval("set l {a {b c} d}").unwrap();
        assert_eq!(interp.eval("llength $l").unwrap().get_int().unwrap(), 3);
        assert_eq!(&*interp.eval("lindex $l 1").unwrap().string(), "b c");
        assert_eq!(&*interp.eval("lindex $l 9").unwrap().string(), "");
        interp.eval("lappend l e").unwrap();
        assert_eq!(&*interp.eval("set l").unwrap().string(), "a {b c} d e");
    }

    #[test]
    fn lappend_starts_empty_and_copies_on_write() {
        let mut interp = Interp::new();
        interp.eval("lappend fresh a b").unwrap();
        assert_eq!(&*interp.get_var("fresh").unwrap().string(), "a b");
        // A second handle on the old value must not see the append.
        let before = interp.get_var("fresh").unwrap();
        interp.eval("lappend fresh c").unwrap();
        assert_eq!(&*before.string(), "a b");
        assert_eq!(&*interp.get_var("fresh").unwrap().string(), "a b c");
    }

    #[test]
    fn array_ensemble_round_trip() {
        let mut interp = Interp::new();
        assert_eq!(interp.eval("array exists a").unwrap().get_int().unwrap(), 0);
        interp.eval("array set a {x 1 y 2}").unwrap();
        assert_eq!(interp.eval("array exists a").unwrap().get_int().unwrap(), 1);
        assert_eq!(interp.eval("array size a").unwrap().get_int().unwrap(), 2);
        // Key order follows the per-table salt; accept either layout.
        let got = interp.eval("array get a").unwrap().string().to_string();
        assert!(got == "x 1 y 2" || got == "y 2 x 1", "got {got:?}");
        let names = interp.eval("array names a").unwrap().string().to_string();
        assert!(names == "x y" || names == "y x");
        interp.eval("array unset a").unwrap();
        assert_eq!(interp.eval("array exists a").unwrap().get_int().unwrap(), 0);
    }

    #[test]
    fn array_set_rejects_odd_list() {
        let mut interp = Interp::new();
        let err = interp.eval("array set a {x 1 y}").unwrap_err();
        assert_eq!(err.message(), "list must have an even number of elements");
    }

    #[test]
    fn package_provide_and_require() {
        let mut interp = Interp::new();
        interp.eval("package provide widget 2.1").unwrap();
        assert_eq!(&*interp.eval("package require widget").unwrap().string(), "2.1");
        assert_eq!(&*interp.eval("package names").unwrap().string(), "widget");
        let err = interp.eval("package require nothere").unwrap_err();
        assert_eq!(err.message(), "can't find package \"nothere\"");
    }

    #[test]
    fn clock_values_are_sane() {
        let mut interp = Interp::new();
        let seconds = interp.eval("clock seconds").unwrap().get_int().unwrap();
        let millis = interp.eval("clock millis").unwrap().get_int().unwrap();
        // 2020-01-01 as a floor; millis must dominate seconds.
        assert!(seconds > 1_577_836_800);
        assert!(millis / 1000 >= seconds - 1);
    }

    #[test]
    fn info_ensemble_reports_state() {
        let mut interp = Interp::new();
        interp.eval("set g 1").unwrap();
        assert_eq!(interp.eval("info exists g").unwrap().get_int().unwrap(), 1);
        assert_eq!(interp.eval("info exists h").unwrap().get_int().unwrap(), 0);
        assert_eq!(&*interp.eval("info globals").unwrap().string(), "g");
        let commands = interp.eval("info commands").unwrap();
        assert!(commands.list_elements().unwrap().iter().any(|c| &*c.string() == "set"));
        assert_eq!(
            &*interp.eval("info version").unwrap().string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn reference_commands_round_trip() {
        let mut interp = Interp::new();
        let r = interp.eval("ref payload").unwrap();
        interp.set_var("r", r);
        assert_eq!(&*interp.eval("getref $r").unwrap().string(), "payload");
        interp.eval("setref $r updated").unwrap();
        assert_eq!(&*interp.eval("getref $r").unwrap().string(), "updated");
        assert_eq!(&*interp.eval("finalize $r").unwrap().string(), "");
        interp.eval("finalize $r cleanup").unwrap();
        assert_eq!(&*interp.eval("finalize $r").unwrap().string(), "cleanup");
        let err = interp.eval("getref not_a_ref").unwrap_err();
        assert_eq!(err.message(), "expected reference but got \"not_a_ref\"");
    }

    #[test]
    fn collect_command_reports_count() {
        let mut interp = Interp::new();
        interp.eval("ref junk").unwrap();
        // The result register still roots the last reference; clear it.
        interp.eval("set pad 0").unwrap();
        assert_eq!(interp.eval("collect").unwrap().get_int().unwrap(), 1);
        assert_eq!(interp.eval("collect").unwrap().get_int().unwrap(), 0);
    }
}
