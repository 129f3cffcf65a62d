//! Cooperative event loop: file handlers, timers, `process_events`.
//!
//! Corresponds to `jim-eventloop.c`.
//!
//! Single-threaded and cooperative throughout.  The only blocking point is
//! the `poll(2)` readiness wait inside [`Interp::process_events`]; handlers
//! run to completion on the caller's thread between waits.  File handlers
//! live in an unordered list (newest first); timers in a list sorted by
//! absolute due time on a microsecond clock anchored at loop creation.
//! Script-level access goes through the `vwait`, `update`, and `after`
//! commands registered by [`register_event_commands`].

use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::interp::{CmdError, CmdResult, Interp};
use crate::value::Obj;

// ── Flags and masks ───────────────────────────────────────────────────────

/// `process_events`: dispatch ready file handlers.
pub const FILE_EVENTS: u32 = 1 << 0;
/// `process_events`: fire due timers.
pub const TIME_EVENTS: u32 = 1 << 1;
/// `process_events`: poll with a zero wait budget instead of blocking.
pub const DONT_WAIT: u32 = 1 << 2;
pub const ALL_EVENTS: u32 = FILE_EVENTS | TIME_EVENTS;

/// File-handler interest masks.
pub const READABLE: u32 = 1 << 0;
pub const WRITABLE: u32 = 1 << 1;
pub const EXCEPTION: u32 = 1 << 2;

/// Host callback form of a handler; receives the ready mask (0 for timers).
pub type EventCallback = Rc<dyn Fn(&mut Interp, u32) -> Result<(), CmdError>>;

/// What a handler does when it fires.
#[derive(Clone)]
pub enum EventAction {
    /// Script evaluated in the background at the top-level scope.
    Script(Obj),
    Callback(EventCallback),
}

struct FileHandler {
    id: u64,
    fd: i32,
    mask: u32,
    action: EventAction,
    /// Runs when the registration is destroyed, whatever the path:
    /// explicit delete, removal after a failing callback, or teardown.
    finalizer: Option<EventAction>,
}

struct Timer {
    id: u64,
    due_us: u64,
    action: EventAction,
    /// Runs after the callback on fire, or alone on cancel/teardown.
    finalizer: Option<EventAction>,
}

/// What one `process_events` step accomplished.  `NothingToDo` is distinct
/// from `Fired(0)`: the former means no handler could ever become ready
/// under the given flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    NothingToDo,
    Fired(usize),
}

// ── EventLoop ─────────────────────────────────────────────────────────────

pub struct EventLoop {
    files: Vec<FileHandler>,
    /// Sorted by `due_us`; ties keep arrival order.
    timers: Vec<Timer>,
    next_file_id: u64,
    next_timer_id: u64,
    origin: Instant,
}

impl EventLoop {
    pub fn new() -> EventLoop {
        EventLoop {
            files: Vec::new(),
            timers: Vec::new(),
            next_file_id: 1,
            next_timer_id: 1,
            origin: Instant::now(),
        }
    }

    /// Microseconds since the loop was created; monotonic.
    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Register interest in `fd` for the events in `mask`.  Newest handlers
    /// sit at the list head, so they are scanned first on dispatch.
    pub fn create_file_handler(
        &mut self,
        fd: i32,
        mask: u32,
        action: EventAction,
        finalizer: Option<EventAction>,
    ) {
        let id = self.next_file_id;
        self.next_file_id += 1;
        self.files.insert(0, FileHandler { id, fd, mask, action, finalizer });
    }

    /// Unlink every handler matching descriptor and mask.  The caller owns
    /// the removed registrations and must run their finalizers.
    fn take_file_handlers(&mut self, fd: i32, mask: u32) -> Vec<FileHandler> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.files.len());
        for handler in self.files.drain(..) {
            if handler.fd == fd && handler.mask & mask != 0 {
                removed.push(handler);
            } else {
                kept.push(handler);
            }
        }
        self.files = kept;
        removed
    }

    /// Schedule `action` to fire once, `delay_us` from now.  Ids are
    /// strictly increasing; ties on due time keep creation order.
    pub fn create_timer(
        &mut self,
        delay_us: u64,
        action: EventAction,
        finalizer: Option<EventAction>,
    ) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let due_us = self.now_us() + delay_us;
        let at = self
            .timers
            .iter()
            .position(|t| t.due_us > due_us)
            .unwrap_or(self.timers.len());
        self.timers.insert(at, Timer { id, due_us, action, finalizer });
        id
    }

    fn take_timer(&mut self, id: u64) -> Option<Timer> {
        let at = self.timers.iter().position(|t| t.id == id)?;
        Some(self.timers.remove(at))
    }

    pub fn timer_ids(&self) -> Vec<u64> {
        self.timers.iter().map(|t| t.id).collect()
    }

    pub fn timer_script(&self, id: u64) -> Option<Obj> {
        let timer = self.timers.iter().find(|t| t.id == id)?;
        match &timer.action {
            EventAction::Script(script) => Some(script.clone()),
            EventAction::Callback(_) => Some(Obj::empty()),
        }
    }

    /// Unlink the first timer whose script renders exactly as `script`.
    fn take_timer_by_script(&mut self, script: &str) -> Option<Timer> {
        let at = self.timers.iter().position(|t| match &t.action {
            EventAction::Script(s) => &*s.string() == script,
            EventAction::Callback(_) => false,
        })?;
        Some(self.timers.remove(at))
    }

    /// Handler and finalizer scripts still pending, used as collection roots.
    pub fn script_roots(&self) -> Vec<Obj> {
        let mut roots = Vec::new();
        let actions = self
            .timers
            .iter()
            .flat_map(|t| [Some(&t.action), t.finalizer.as_ref()])
            .chain(self.files.iter().flat_map(|f| [Some(&f.action), f.finalizer.as_ref()]));
        for action in actions.flatten() {
            if let EventAction::Script(s) = action {
                roots.push(s.clone());
            }
        }
        roots
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

fn poll_events(mask: u32) -> libc::c_short {
    let mut events = 0;
    if mask & READABLE != 0 {
        events |= libc::POLLIN;
    }
    if mask & WRITABLE != 0 {
        events |= libc::POLLOUT;
    }
    if mask & EXCEPTION != 0 {
        events |= libc::POLLPRI;
    }
    events
}

fn ready_mask(revents: libc::c_short) -> u32 {
    let mut mask = 0;
    if revents & (libc::POLLIN | libc::POLLHUP) != 0 {
        mask |= READABLE;
    }
    if revents & libc::POLLOUT != 0 {
        mask |= WRITABLE;
    }
    if revents & (libc::POLLPRI | libc::POLLERR) != 0 {
        mask |= EXCEPTION;
    }
    mask
}

// ── Interp-level driving ──────────────────────────────────────────────────

impl Interp {
    pub fn create_file_handler(
        &mut self,
        fd: i32,
        mask: u32,
        action: EventAction,
        finalizer: Option<EventAction>,
    ) {
        self.events.create_file_handler(fd, mask, action, finalizer);
    }

    /// Remove and finalize every handler matching descriptor and mask;
    /// returns how many were dropped.
    pub fn delete_file_handler(&mut self, fd: i32, mask: u32) -> usize {
        let removed = self.events.take_file_handlers(fd, mask);
        let count = removed.len();
        for handler in removed {
            self.run_finalizer(handler.finalizer);
        }
        count
    }

    pub fn create_timer(
        &mut self,
        delay_us: u64,
        action: EventAction,
        finalizer: Option<EventAction>,
    ) -> u64 {
        self.events.create_timer(delay_us, action, finalizer)
    }

    /// Cancel a timer and run its finalizer, reporting the remaining
    /// time-to-fire in microseconds (clamped to zero), or `None` for an
    /// unknown id.
    pub fn delete_timer(&mut self, id: u64) -> Option<u64> {
        let now = self.events.now_us();
        let timer = self.events.take_timer(id)?;
        let remaining = timer.due_us.saturating_sub(now);
        self.run_finalizer(timer.finalizer);
        Some(remaining)
    }

    /// Finalize and drop every remaining registration.  Also runs when the
    /// interpreter itself is dropped.
    pub fn teardown_events(&mut self) {
        let files = std::mem::take(&mut self.events.files);
        let timers = std::mem::take(&mut self.events.timers);
        for handler in files {
            self.run_finalizer(handler.finalizer);
        }
        for timer in timers {
            self.run_finalizer(timer.finalizer);
        }
    }

    fn run_finalizer(&mut self, finalizer: Option<EventAction>) {
        if let Some(action) = finalizer {
            if let Err(err) = self.run_action(&action, 0) {
                self.report_background_error(&err.message());
            }
        }
    }

    /// One scheduling step: wait (per the flags) for readiness, dispatch
    /// ready file handlers, then fire due timers.
    ///
    /// Returns how many handlers fired, [`EventOutcome::NothingToDo`] when
    /// the flags select no pending work at all, or an error when the OS
    /// wait itself fails (interrupts included) — a "cannot wait" condition
    /// distinct from an idle return.
    pub fn process_events(&mut self, flags: u32) -> Result<EventOutcome, String> {
        let want_files = flags & FILE_EVENTS != 0 && !self.events.files.is_empty();
        let want_timers = flags & TIME_EVENTS != 0 && !self.events.timers.is_empty();
        if !want_files && !want_timers {
            return Ok(EventOutcome::NothingToDo);
        }

        // Wait budget in milliseconds; -1 blocks indefinitely.
        let timeout_ms: i32 = if flags & DONT_WAIT != 0 {
            0
        } else if want_timers {
            let due = self.events.timers[0].due_us;
            let wait_us = due.saturating_sub(self.events.now_us());
            wait_us.div_ceil(1000).min(i32::MAX as u64) as i32
        } else {
            -1
        };

        let mut fds: Vec<libc::pollfd> = Vec::new();
        if want_files {
            for handler in &self.events.files {
                fds.push(libc::pollfd {
                    fd: handler.fd,
                    events: poll_events(handler.mask),
                    revents: 0,
                });
            }
        }
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let errno = std::io::Error::last_os_error();
            return Err(format!("cannot wait for events: {errno}"));
        }

        let mut fired = 0;

        // Dispatch file handlers against the readiness snapshot.  Handlers
        // may add or remove registrations, so each firing restarts the scan
        // of the live list; ids keep one handler from firing twice per call.
        let ready: Vec<(i32, u32)> = fds
            .iter()
            .filter(|p| p.revents != 0)
            .map(|p| (p.fd, ready_mask(p.revents)))
            .collect();
        let mut fired_ids: Vec<u64> = Vec::new();
        for (fd, mask) in ready {
            loop {
                let next = self
                    .events
                    .files
                    .iter()
                    .find(|h| h.fd == fd && h.mask & mask != 0 && !fired_ids.contains(&h.id))
                    .map(|h| (h.id, h.action.clone()));
                let Some((id, action)) = next else {
                    break;
                };
                fired_ids.push(id);
                fired += 1;
                if let Err(err) = self.run_action(&action, mask) {
                    // A failing handler loses its registration (finalizer
                    // included); the loop itself keeps running.
                    let at = self.events.files.iter().position(|h| h.id == id);
                    let finalizer = at.map(|at| self.events.files.remove(at).finalizer);
                    self.report_background_error(&err.message());
                    if let Some(finalizer) = finalizer {
                        self.run_finalizer(finalizer);
                    }
                }
            }
        }

        // Fire due timers.  The watermark pins the id range to timers that
        // existed when this step began, so a callback rescheduling itself
        // with zero delay cannot starve everything else within one call.
        if flags & TIME_EVENTS != 0 {
            let watermark = self.events.next_timer_id;
            loop {
                let now = self.events.now_us();
                let at = self
                    .events
                    .timers
                    .iter()
                    .position(|t| t.due_us <= now && t.id < watermark);
                let Some(at) = at else {
                    break;
                };
                let timer = self.events.timers.remove(at);
                fired += 1;
                if let Err(err) = self.run_action(&timer.action, 0) {
                    self.report_background_error(&err.message());
                }
                // Firing destroys the registration: callback, then finalizer.
                self.run_finalizer(timer.finalizer);
            }
        }

        Ok(EventOutcome::Fired(fired))
    }

    fn run_action(&mut self, action: &EventAction, mask: u32) -> Result<(), CmdError> {
        match action {
            EventAction::Script(script) => self.eval_obj(script).map(|_| ()),
            EventAction::Callback(func) => func(self, mask),
        }
    }
}

impl Drop for Interp {
    fn drop(&mut self) {
        self.teardown_events();
    }
}

// ── Script-level commands ─────────────────────────────────────────────────

pub fn register_event_commands(interp: &mut Interp) {
    interp.register("vwait", vwait_cmd);
    interp.register("update", update_cmd);
    interp.register("after", after_cmd);
}

/// `vwait name` — drive the loop until the named global changes (value
/// identity, creation, or unset), a signal is flagged, or the wait fails.
fn vwait_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() != 2 {
        return Err(crate::interp::wrong_num_args("vwait", "name"));
    }
    let name = argv[1].string();
    let initial = interp.get_var(&name);
    loop {
        if interp.signal_pending() {
            interp.set_signal_pending(false);
            return Err(CmdError::from("vwait interrupted by signal"));
        }
        match interp.process_events(ALL_EVENTS)? {
            // No handler can ever touch the variable now; waiting further
            // would hang forever.
            EventOutcome::NothingToDo => break,
            EventOutcome::Fired(_) => {}
        }
        let current = interp.get_var(&name);
        let changed = match (&initial, &current) {
            (None, None) => false,
            (Some(a), Some(b)) => !a.same(b),
            _ => true,
        };
        if changed {
            break;
        }
    }
    Ok(Obj::empty())
}

/// `update ?idletasks?` — drain everything currently ready, never blocking.
fn update_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    let flags = match argv.len() {
        1 => ALL_EVENTS | DONT_WAIT,
        2 if &*argv[1].string() == "idletasks" => TIME_EVENTS | DONT_WAIT,
        2 => {
            return Err(CmdError::Msg(format!(
                "bad option \"{}\": must be idletasks",
                argv[1].string()
            )));
        }
        _ => return Err(crate::interp::wrong_num_args("update", "?idletasks?")),
    };
    loop {
        match interp.process_events(flags)? {
            EventOutcome::Fired(n) if n > 0 => {}
            _ => break,
        }
    }
    Ok(Obj::empty())
}

/// `after ms`, `after ms script ...`, `after cancel id|script`,
/// `after info ?id?`.
fn after_cmd(interp: &mut Interp, argv: &[Obj]) -> CmdResult {
    if argv.len() < 2 {
        return Err(crate::interp::wrong_num_args(
            "after",
            "ms|cancel|info ?arg ...?",
        ));
    }
    if let Ok(ms) = argv[1].get_int() {
        let ms = ms.max(0) as u64;
        if argv.len() == 2 {
            // Pure sleep; the one foreground suspension besides vwait.
            std::thread::sleep(Duration::from_millis(ms));
            return Ok(Obj::empty());
        }
        let script = join_scripts(&argv[2..]);
        let id = interp.create_timer(ms * 1000, EventAction::Script(script), None);
        return Ok(Obj::new_string(format_after_handle(id)));
    }
    match &*argv[1].string() {
        "cancel" => {
            if argv.len() != 3 {
                return Err(crate::interp::wrong_num_args("after", "cancel id|script"));
            }
            let target = argv[2].string();
            match parse_after_handle(&target) {
                Some(id) => {
                    interp.delete_timer(id);
                }
                None => {
                    if let Some(timer) = interp.events.take_timer_by_script(&target) {
                        interp.run_finalizer(timer.finalizer);
                    }
                }
            }
            Ok(Obj::empty())
        }
        "info" => match argv.len() {
            2 => {
                let handles: Vec<Obj> = interp
                    .events
                    .timer_ids()
                    .into_iter()
                    .map(|id| Obj::new_string(format_after_handle(id)))
                    .collect();
                Ok(Obj::new_list(handles))
            }
            3 => {
                let target = argv[2].string();
                let script = parse_after_handle(&target)
                    .and_then(|id| interp.events.timer_script(id))
                    .ok_or_else(|| {
                        CmdError::Msg(format!("event \"{target}\" doesn't exist"))
                    })?;
                Ok(Obj::new_list(vec![script, Obj::new_string("timer")]))
            }
            _ => Err(crate::interp::wrong_num_args("after", "info ?id?")),
        },
        other => Err(CmdError::Msg(format!(
            "bad argument \"{other}\": must be cancel, info, or a time"
        ))),
    }
}

fn join_scripts(parts: &[Obj]) -> Obj {
    if parts.len() == 1 {
        return parts[0].clone();
    }
    let joined = parts
        .iter()
        .map(|p| p.string().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    Obj::new_string(joined)
}

fn format_after_handle(id: u64) -> String {
    format!("after#{id}")
}

fn parse_after_handle(s: &str) -> Option<u64> {
    s.strip_prefix("after#")?.parse().ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────
