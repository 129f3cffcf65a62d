//! Interpreter state: command registry, global variables, evaluation.
//!
//! Corresponds to the `Jim_Interp` core in `jim.c`.
//!
//! One [`Interp`] owns every table the core needs — commands, globals,
//! packages, the reference registry — plus the event loop; there are no
//! ambient process-wide tables, so a host may run several interpreters side
//! by side.  Everything here is single-threaded and cooperative.
//!
//! Script evaluation is deliberately minimal: a script splits into commands
//! at top-level newlines/semicolons, each command tokenizes with the list
//! quoting rules, and a bare word of the form `$name` substitutes a global
//! variable.  The full textual parser and expression compiler are external
//! collaborators, out of scope here.

use std::any::Any;
use std::rc::Rc;

use crate::eventloop::EventLoop;
use crate::hash::HashTable;
use crate::value::{self, Obj};

// ── Command results ───────────────────────────────────────────────────────

/// How a command completed, when not with a value.
#[derive(Debug, Clone)]
pub enum CmdError {
    /// A rendered error message — the interpreter's error channel.
    Msg(String),
    /// Distinguished "invalid arguments" sentinel: the caller (normally the
    /// ensemble dispatcher) renders the matched entry's usage string.
    WrongArgs,
    /// Tcl's `break` completion code.
    Break,
    /// Tcl's `continue` completion code.
    Continue,
}

impl CmdError {
    /// Render as a user-facing message at the top level, where completion
    /// codes have escaped their construct.
    pub fn message(&self) -> String {
        match self {
            CmdError::Msg(m) => m.clone(),
            CmdError::WrongArgs => "wrong # args".to_owned(),
            CmdError::Break => "invoked \"break\" outside of a loop".to_owned(),
            CmdError::Continue => "invoked \"continue\" outside of a loop".to_owned(),
        }
    }
}

impl From<String> for CmdError {
    fn from(m: String) -> CmdError {
        CmdError::Msg(m)
    }
}

impl From<&str> for CmdError {
    fn from(m: &str) -> CmdError {
        CmdError::Msg(m.to_owned())
    }
}

pub type CmdResult = Result<Obj, CmdError>;

/// Render the conventional arity complaint for a command.
pub fn wrong_num_args(name: &str, usage: &str) -> CmdError {
    if usage.is_empty() {
        CmdError::Msg(format!("wrong # args: should be \"{name}\""))
    } else {
        CmdError::Msg(format!("wrong # args: should be \"{name} {usage}\""))
    }
}

// ── Command registry entries ──────────────────────────────────────────────

/// Native command handler.
pub type NativeFn = fn(&mut Interp, &[Obj]) -> CmdResult;

/// Private data attached to a native command, handed back through
/// [`Interp::command_priv`] during the call.
pub type CmdPriv = Rc<dyn Any>;

/// Delete hook run when a definition is destroyed (unregistered or dropped
/// off the shadow chain).
pub type CmdDeleteFn = fn(&CmdPriv);

enum CmdImpl {
    Native {
        func: NativeFn,
        priv_data: Option<CmdPriv>,
        on_delete: Option<CmdDeleteFn>,
    },
    /// A scripted command: argument names plus a body evaluated at the top
    /// level.  (The full stack-frame machinery is out of scope; arguments
    /// are bound as globals saved and restored around the call.)
    Proc { params: Vec<String>, body: Obj },
}

/// One command-table entry.  Redefinition chains the old definition as
/// `prev`, supporting scoped shadowing; `unregister` pops the chain.
pub struct Cmd {
    imp: CmdImpl,
    prev: Option<Box<Cmd>>,
}

impl Cmd {
    fn run_delete_hook(&self) {
        if let CmdImpl::Native { priv_data: Some(data), on_delete: Some(hook), .. } = &self.imp {
            hook(data);
        }
    }
}

impl Drop for Cmd {
    fn drop(&mut self) {
        self.run_delete_hook();
        // Unchain iteratively so deep shadow chains cannot recurse.
        let mut prev = self.prev.take();
        while let Some(mut cmd) = prev {
            prev = cmd.prev.take();
        }
    }
}

/// What [`Interp::invoke`] clones out of the registry before calling, so the
/// handler is free to mutate the command table underneath itself.
enum Invocable {
    Native { func: NativeFn, priv_data: Option<CmdPriv> },
    Proc { params: Vec<String>, body: Obj },
}

// ── References ────────────────────────────────────────────────────────────

/// Registry record behind a reference value — the one value kind that may
/// form cycles, tracked separately so ordinary values stay un-scanned.
pub struct RefRecord {
    pub value: Obj,
    pub finalizer: Option<Obj>,
}

// ── Interp ────────────────────────────────────────────────────────────────

/// A Tcl-family interpreter instance.
pub struct Interp {
    commands: HashTable<String, Cmd>,
    globals: HashTable<String, Obj>,
    packages: HashTable<String, Obj>,
    references: HashTable<u64, RefRecord>,
    next_ref_id: u64,
    pub(crate) events: EventLoop,
    /// Most recent command result.
    pub result: Obj,
    current_priv: Option<CmdPriv>,
    /// Set by the host's signal machinery; observed by `vwait`.
    signal_pending: bool,
    /// Once the `bgerror` hook asks to stop reporting, background errors
    /// stay silent for the rest of this interpreter's life.
    bg_report_disabled: bool,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    /// A fresh interpreter with the core command set registered.
    pub fn new() -> Interp {
        let mut interp = Interp {
            commands: HashTable::new(),
            globals: HashTable::new(),
            packages: HashTable::new(),
            references: HashTable::new(),
            next_ref_id: 1,
            events: EventLoop::new(),
            result: Obj::empty(),
            current_priv: None,
            signal_pending: false,
            bg_report_disabled: false,
        };
        crate::commands::register_core(&mut interp);
        crate::eventloop::register_event_commands(&mut interp);
        interp
    }

    // ── Command registry ──────────────────────────────────────────────────

    /// Install a native command, shadowing (not destroying) any existing
    /// definition.
    pub fn register(&mut self, name: &str, func: NativeFn) {
        self.register_with(name, func, None, None);
    }

    pub fn register_with(
        &mut self,
        name: &str,
        func: NativeFn,
        priv_data: Option<CmdPriv>,
        on_delete: Option<CmdDeleteFn>,
    ) {
        let imp = CmdImpl::Native { func, priv_data, on_delete };
        self.install(name, imp);
    }

    /// Install a scripted command.
    pub fn register_proc(&mut self, name: &str, params: Vec<String>, body: Obj) {
        self.install(name, CmdImpl::Proc { params, body });
    }

    fn install(&mut self, name: &str, imp: CmdImpl) {
        let prev = self.commands.remove(&name.to_owned()).map(Box::new);
        let cmd = Cmd { imp, prev };
        // Key was just removed (or absent), so add cannot fail.
        let _ = self.commands.add(name.to_owned(), cmd);
    }

    /// Remove the current definition; a shadowed previous definition, if
    /// any, becomes visible again.  `true` if the name existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        match self.commands.remove(&name.to_owned()) {
            None => false,
            Some(mut cmd) => {
                if let Some(prev) = cmd.prev.take() {
                    let _ = self.commands.add(name.to_owned(), *prev);
                }
                true
            }
        }
    }

    /// Rename a command; an empty new name deletes it.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), String> {
        if new.is_empty() {
            if !self.unregister(old) {
                return Err(format!("can't delete \"{old}\": command doesn't exist"));
            }
            return Ok(());
        }
        match self.commands.remove(&old.to_owned()) {
            None => Err(format!("can't rename \"{old}\": command doesn't exist")),
            Some(cmd) => {
                self.commands.remove(&new.to_owned());
                let _ = self.commands.add(new.to_owned(), cmd);
                Ok(())
            }
        }
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains(&name.to_owned())
    }

    /// Names of all registered commands, in table order.
    pub fn command_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.commands.len());
        let mut cursor = self.commands.cursor();
        while let Some(name) = cursor.next(&self.commands) {
            names.push(name);
        }
        names
    }

    /// The private data of the native command currently executing.
    pub fn command_priv(&self) -> Option<CmdPriv> {
        self.current_priv.clone()
    }

    /// The private data registered for a named command.
    pub fn get_private_data(&self, name: &str) -> Option<CmdPriv> {
        match self.commands.find(&name.to_owned()) {
            Some(Cmd { imp: CmdImpl::Native { priv_data, .. }, .. }) => priv_data.clone(),
            _ => None,
        }
    }

    // ── Variables ─────────────────────────────────────────────────────────

    pub fn set_var(&mut self, name: impl Into<String>, value: Obj) {
        self.globals.replace(name.into(), value);
    }

    /// A shared handle onto the variable's value, or `None` if unset.
    pub fn get_var(&self, name: &str) -> Option<Obj> {
        self.globals.find(&name.to_owned()).cloned()
    }

    pub fn unset_var(&mut self, name: &str) -> bool {
        self.globals.remove(&name.to_owned()).is_some()
    }

    pub fn var_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.globals.len());
        let mut cursor = self.globals.cursor();
        while let Some(name) = cursor.next(&self.globals) {
            names.push(name);
        }
        names
    }

    // ── Packages ──────────────────────────────────────────────────────────

    pub fn package_provide(&mut self, name: &str, version: Obj) {
        self.packages.replace(name.to_owned(), version);
    }

    pub fn package_version(&self, name: &str) -> Option<Obj> {
        self.packages.find(&name.to_owned()).cloned()
    }

    pub fn package_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.packages.len());
        let mut cursor = self.packages.cursor();
        while let Some(name) = cursor.next(&self.packages) {
            names.push(name);
        }
        names
    }

    // ── Signals ───────────────────────────────────────────────────────────

    /// Mark a pending signal condition; `vwait` observes it between waits.
    pub fn set_signal_pending(&mut self, pending: bool) {
        self.signal_pending = pending;
    }

    pub fn signal_pending(&self) -> bool {
        self.signal_pending
    }

    // ── Invocation ────────────────────────────────────────────────────────

    /// Look up `argv[0]` and run the handler.
    pub fn invoke(&mut self, argv: &[Obj]) -> CmdResult {
        let Some(name_obj) = argv.first() else {
            return Ok(Obj::empty());
        };
        let name = name_obj.string();
        let invocable = match self.commands.find(&name.to_string()) {
            Some(cmd) => match &cmd.imp {
                CmdImpl::Native { func, priv_data, .. } => {
                    Invocable::Native { func: *func, priv_data: priv_data.clone() }
                }
                CmdImpl::Proc { params, body } => {
                    Invocable::Proc { params: params.clone(), body: body.clone() }
                }
            },
            None => return Err(CmdError::Msg(format!("invalid command name \"{name}\""))),
        };
        let result = match invocable {
            Invocable::Native { func, priv_data } => {
                let saved = std::mem::replace(&mut self.current_priv, priv_data);
                let result = func(self, argv);
                self.current_priv = saved;
                match result {
                    // A bare sentinel from a plain (non-ensemble) command
                    // still renders as an arity complaint.
                    Err(CmdError::WrongArgs) => {
                        Err(CmdError::Msg(format!("wrong # args: should be \"{name} ...\"")))
                    }
                    other => other,
                }
            }
            Invocable::Proc { params, body } => self.invoke_proc(&name, &params, &body, argv),
        };
        if let Ok(value) = &result {
            self.result = value.clone();
        }
        result
    }

    fn invoke_proc(&mut self, name: &str, params: &[String], body: &Obj, argv: &[Obj]) -> CmdResult {
        let args = &argv[1..];
        if args.len() != params.len() {
            return Err(wrong_num_args(name, &params.join(" ")));
        }
        // Arguments are bound as globals for the duration of the call.
        let mut saved = Vec::with_capacity(params.len());
        for (param, arg) in params.iter().zip(args) {
            saved.push((param.clone(), self.get_var(param)));
            self.set_var(param.clone(), arg.clone());
        }
        let result = self.eval(&body.string());
        for (param, old) in saved {
            match old {
                Some(value) => self.set_var(param, value),
                None => {
                    self.unset_var(&param);
                }
            }
        }
        result
    }

    // ── Evaluation ────────────────────────────────────────────────────────

    /// Evaluate a script: one command per top-level newline/semicolon.
    /// Returns the last command's result.
    pub fn eval(&mut self, script: &str) -> CmdResult {
        let mut last = Ok(Obj::empty());
        for command in split_commands(script) {
            let words = self.substitute(parse_words(&command)?)?;
            if words.is_empty() {
                continue;
            }
            last = self.invoke(&words);
            if last.is_err() {
                return last;
            }
        }
        last
    }

    pub fn eval_obj(&mut self, script: &Obj) -> CmdResult {
        self.eval(&script.string())
    }

    fn substitute(&self, words: Vec<Word>) -> Result<Vec<Obj>, CmdError> {
        let mut out = Vec::with_capacity(words.len());
        for word in words {
            match word {
                Word::Braced(text) => out.push(Obj::new_string(text)),
                Word::Plain(text) => {
                    // A leading `\$` is a literal dollar sign, not a read.
                    if let Some(name) = text.strip_prefix('$') {
                        match self.get_var(name) {
                            Some(value) => out.push(value),
                            None => {
                                return Err(CmdError::Msg(format!(
                                    "can't read \"{name}\": no such variable"
                                )));
                            }
                        }
                    } else {
                        out.push(Obj::new_string(value::unescape_str(&text)));
                    }
                }
            }
        }
        Ok(out)
    }

    // ── Background evaluation ─────────────────────────────────────────────

    /// Evaluate an event-handler script at the top-level scope.  A non-normal
    /// completion is funneled through the `bgerror` hook rather than
    /// aborting the event loop.
    pub fn eval_background(&mut self, script: &Obj) {
        if let Err(err) = self.eval_obj(script) {
            self.report_background_error(&err.message());
        }
    }

    /// Invoke the user's `bgerror` hook, falling back to the diagnostic
    /// stream.  A hook completing with the break code permanently disables
    /// further automatic reporting — a deliberate noise-reduction policy
    /// scripts may trigger on purpose.
    pub fn report_background_error(&mut self, msg: &str) {
        if self.bg_report_disabled {
            return;
        }
        if self.has_command("bgerror") {
            let argv = [Obj::new_string("bgerror"), Obj::new_string(msg)];
            match self.invoke(&argv) {
                Ok(_) => {
                    self.result = Obj::empty();
                    return;
                }
                Err(CmdError::Break) => {
                    self.bg_report_disabled = true;
                    self.result = Obj::empty();
                    return;
                }
                Err(_) => {}
            }
        }
        eprintln!("background error: {msg}");
        self.result = Obj::empty();
    }

    // ── References ────────────────────────────────────────────────────────

    /// Create a reference value wrapping `value`, registered in the live
    /// set the collector walks.
    pub fn new_reference(&mut self, value: Obj, finalizer: Option<Obj>) -> Obj {
        let id = self.next_ref_id;
        self.next_ref_id += 1;
        let _ = self.references.add(id, RefRecord { value, finalizer });
        Obj::new_reference(id)
    }

    pub fn reference(&self, id: u64) -> Result<&RefRecord, String> {
        self.references
            .find(&id)
            .ok_or_else(|| format!("invalid reference id {}", value::format_reference(id)))
    }

    pub fn set_reference(&mut self, id: u64, value: Obj) -> Result<(), String> {
        match self.references.find_mut(&id) {
            Some(record) => {
                record.value = value;
                Ok(())
            }
            None => Err(format!("invalid reference id {}", value::format_reference(id))),
        }
    }

    pub fn set_finalizer(&mut self, id: u64, finalizer: Option<Obj>) -> Result<(), String> {
        match self.references.find_mut(&id) {
            Some(record) => {
                record.finalizer = finalizer;
                Ok(())
            }
            None => Err(format!("invalid reference id {}", value::format_reference(id))),
        }
    }

    /// On-demand cycle collection over the reference registry.
    ///
    /// Mark: reference ids reachable from the roots (global variables, the
    /// interpreter result, pending event-handler scripts), transitively
    /// through registry records; an id embedded in a cached string form
    /// counts too.  Sweep: unmarked records are dropped and their finalizers
    /// run in the background as `finalizer <refstring> <value>`.
    ///
    /// Returns the number of references collected.
    pub fn collect(&mut self) -> usize {
        let mut queue: Vec<u64> = Vec::new();
        for name in self.var_names() {
            if let Some(value) = self.get_var(&name) {
                mark_obj(&value, &mut queue);
            }
        }
        mark_obj(&self.result, &mut queue);
        for script in self.events.script_roots() {
            mark_obj(&script, &mut queue);
        }

        let mut marked: HashTable<u64, ()> = HashTable::new();
        while let Some(id) = queue.pop() {
            if marked.add(id, ()).is_err() {
                continue;
            }
            if let Some(record) = self.references.find(&id) {
                mark_obj(&record.value, &mut queue);
                if let Some(finalizer) = &record.finalizer {
                    mark_obj(finalizer, &mut queue);
                }
            }
        }

        let mut dead = Vec::new();
        let mut cursor = self.references.cursor();
        while let Some(id) = cursor.next(&self.references) {
            if !marked.contains(&id) {
                dead.push(id);
            }
        }
        let collected = dead.len();
        for id in dead {
            if let Some(record) = self.references.remove(&id) {
                if let Some(finalizer) = record.finalizer {
                    let call = value::format_list(&[
                        finalizer,
                        Obj::new_reference(id),
                        record.value,
                    ]);
                    self.eval_background(&Obj::new_string(call));
                }
            }
        }
        collected
    }

    /// Live (uncollected) reference count, for diagnostics and tests.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

/// Collect reference ids reachable from one value.  The string form of a
/// container embeds the string forms of its children, so one textual scan
/// covers the whole tree, reference reps included.
fn mark_obj(obj: &Obj, out: &mut Vec<u64>) {
    value::scan_references(&obj.string(), &mut |id| out.push(id));
}

// ── Command/word splitting ────────────────────────────────────────────────

/// Split a script into commands at top-level newlines and semicolons,
/// skipping blank lines and `#` comments.
fn split_commands(script: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut depth = 0i64;
    let mut in_quote = false;
    let mut chars = script.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' if depth == 0 => {
                in_quote = !in_quote;
                current.push(c);
            }
            '{' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            '}' if !in_quote => {
                depth -= 1;
                current.push(c);
            }
            '\n' | ';' if depth <= 0 && !in_quote => {
                push_command(&mut commands, &mut current);
            }
            _ => current.push(c),
        }
    }
    push_command(&mut commands, &mut current);
    commands
}

fn push_command(commands: &mut Vec<String>, current: &mut String) {
    let text = current.trim();
    if !text.is_empty() && !text.starts_with('#') {
        commands.push(text.to_owned());
    }
    current.clear();
}

/// One tokenized word, tagged so substitution can skip braced words.
enum Word {
    /// Bare or double-quoted: subject to `$name` substitution.
    Plain(String),
    /// Brace-quoted: taken verbatim.
    Braced(String),
}

/// Tokenize one command into words with the list quoting rules.
fn parse_words(command: &str) -> Result<Vec<Word>, CmdError> {
    let mut words = Vec::new();
    let mut chars = command.char_indices().peekable();
    loop {
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        let Some(&(start, first)) = chars.peek() else {
            break;
        };
        match first {
            '{' => {
                chars.next();
                let mut depth = 1usize;
                let mut end = None;
                while let Some((i, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end =
                    end.ok_or_else(|| CmdError::Msg("unmatched open brace".to_owned()))?;
                words.push(Word::Braced(command[start + 1..end].to_owned()));
            }
            '"' => {
                chars.next();
                let mut word = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        // Escapes stay raw here; substitute() resolves them.
                        '\\' => {
                            word.push('\\');
                            if let Some((_, next)) = chars.next() {
                                word.push(next);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => word.push(c),
                    }
                }
                if !closed {
                    return Err(CmdError::Msg("unmatched open quote".to_owned()));
                }
                words.push(Word::Plain(word));
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    chars.next();
                    word.push(c);
                    // An escaped character never terminates the word.
                    if c == '\\' {
                        if let Some((_, next)) = chars.next() {
                            word.push(next);
                        }
                    }
                }
                words.push(Word::Plain(word));
            }
        }
    }
    Ok(words)
}

// ── Tests ─────────────────────────────────────────────────────────────────
