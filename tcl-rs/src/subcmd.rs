//! Ensemble sub-command dispatch.
//!
//! Corresponds to `jim-subcmd.c`.
//!
//! An ensemble command (`array get`, `clock seconds`, ...) routes its first
//! argument through a static table of [`SubCmd`] entries.  The dispatcher
//! handles prefix matching, the `-help`/`-commands` pseudo-subcommands,
//! arity checking against each entry's declared bounds, and memoizes the
//! resolved entry on the argument value itself so a hot loop re-invoking
//! the same value object never re-scans the table.

use std::cell::Cell;

use crate::interp::{CmdError, CmdResult, Interp, NativeFn};
use crate::value::Obj;

/// Entry is matchable by exact name but omitted from listings and help.
pub const SUBCMD_HIDDEN: u32 = 1 << 0;
/// Handler receives the untrimmed argument vector (command and sub-command
/// names included) instead of the usual offset-by-2 slice.
pub const SUBCMD_FULL_ARGV: u32 = 1 << 1;

/// One row of an ensemble's dispatch table.
pub struct SubCmd {
    pub name: &'static str,
    /// Usage suffix rendered after "cmd sub" in errors and help.
    pub args: &'static str,
    pub min_args: usize,
    /// Inclusive upper bound on extra arguments; `-1` means unbounded.
    pub max_args: i64,
    pub flags: u32,
    pub func: NativeFn,
}

/// Outcome of [`parse_subcmd`].
pub enum Resolved {
    /// A real table entry, arity-checked and ready to call.
    Entry(&'static SubCmd),
    /// `-help` or `-commands` was handled; this is the finished result.
    Immediate(Obj),
}

thread_local! {
    // Table scans performed (cache misses); observed by tests.
    static SCANS: Cell<u64> = const { Cell::new(0) };
}

#[cfg(test)]
fn scan_count() -> u64 {
    SCANS.with(|c| c.get())
}

/// Resolve `argv[1]` against `table` per the ensemble rules.
pub fn parse_subcmd(table: &'static [SubCmd], argv: &[Obj]) -> Result<Resolved, CmdError> {
    let cmd_name = match argv.first() {
        Some(obj) => obj.string(),
        None => return Err(CmdError::from("empty ensemble invocation")),
    };
    if argv.len() < 2 {
        return Err(CmdError::Msg(format!(
            "wrong # args: should be \"{cmd_name} command ...\"\n\
             Use \"{cmd_name} -help ?command?\" for help"
        )));
    }

    // Memoization fast path: a resolution cached against this exact table
    // skips straight to the arity check.
    let table_id = table.as_ptr() as usize;
    if let Some((cached_table, index)) = argv[1].subcmd_cache() {
        if cached_table == table_id && index < table.len() {
            let entry = &table[index];
            check_arity(&cmd_name, entry, argv)?;
            return Ok(Resolved::Entry(entry));
        }
    }

    let sub = argv[1].string();
    if &*sub == "-help" {
        if argv.len() >= 3 {
            let index = search(table, &argv[2].string())?;
            return Ok(Resolved::Immediate(Obj::new_string(usage(
                &cmd_name,
                &table[index],
            ))));
        }
        return Ok(Resolved::Immediate(Obj::new_string(format!(
            "Usage: \"{cmd_name} command ...\", where command is one of: {}",
            visible_names(table).join(", ")
        ))));
    }
    if &*sub == "-commands" {
        return Ok(Resolved::Immediate(Obj::new_string(
            visible_names(table).join(" "),
        )));
    }

    let index = search(table, &sub)?;
    argv[1].cache_subcmd(table_id, index);
    let entry = &table[index];
    check_arity(&cmd_name, entry, argv)?;
    Ok(Resolved::Entry(entry))
}

/// Resolve and run in one step; the usual entry point for ensemble
/// command handlers.
pub fn call_subcmd(interp: &mut Interp, table: &'static [SubCmd], argv: &[Obj]) -> CmdResult {
    let entry = match parse_subcmd(table, argv)? {
        Resolved::Immediate(result) => return Ok(result),
        Resolved::Entry(entry) => entry,
    };
    let result = if entry.flags & SUBCMD_FULL_ARGV != 0 {
        (entry.func)(interp, argv)
    } else {
        (entry.func)(interp, &argv[2..])
    };
    match result {
        // The sentinel routes through the same usage-error path as an
        // arity violation.
        Err(CmdError::WrongArgs) => {
            Err(usage_error(&argv[0].string(), entry))
        }
        other => other,
    }
}

/// Find `sub` in the table: exact match wins, then a unique prefix.
fn search(table: &[SubCmd], sub: &str) -> Result<usize, CmdError> {
    SCANS.with(|c| c.set(c.get() + 1));
    let mut prefix_match = None;
    let mut ambiguous = false;
    for (i, entry) in table.iter().enumerate() {
        if entry.name == sub {
            return Ok(i);
        }
        if entry.flags & SUBCMD_HIDDEN == 0 && entry.name.starts_with(sub) {
            ambiguous = prefix_match.is_some();
            prefix_match = Some(i);
        }
    }
    if ambiguous {
        return Err(CmdError::Msg(format!(
            "ambiguous sub-command \"{sub}\": should be one of {}",
            visible_names(table).join(", ")
        )));
    }
    match prefix_match {
        Some(i) => Ok(i),
        None => Err(CmdError::Msg(format!(
            "unknown sub-command \"{sub}\": should be one of {}",
            visible_names(table).join(", ")
        ))),
    }
}

fn visible_names(table: &[SubCmd]) -> Vec<&'static str> {
    table
        .iter()
        .filter(|e| e.flags & SUBCMD_HIDDEN == 0)
        .map(|e| e.name)
        .collect()
}

fn check_arity(cmd_name: &str, entry: &SubCmd, argv: &[Obj]) -> Result<(), CmdError> {
    let extra = argv.len() - 2;
    if extra < entry.min_args || (entry.max_args >= 0 && extra as i64 > entry.max_args) {
        return Err(usage_error(cmd_name, entry));
    }
    Ok(())
}

fn usage(cmd_name: &str, entry: &SubCmd) -> String {
    if entry.args.is_empty() {
        format!("Usage: \"{cmd_name} {}\"", entry.name)
    } else {
        format!("Usage: \"{cmd_name} {} {}\"", entry.name, entry.args)
    }
}

fn usage_error(cmd_name: &str, entry: &SubCmd) -> CmdError {
    if entry.args.is_empty() {
        CmdError::Msg(format!("wrong # args: should be \"{cmd_name} {}\"", entry.name))
    } else {
        CmdError::Msg(format!(
            "wrong # args: should be \"{} {} {}\"",
            cmd_name, entry.name, entry.args
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
