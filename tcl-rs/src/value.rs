//! Runtime value representation.
//!
//! Corresponds to the `Jim_Obj` machinery in `jim.c`.
//!
//! Every datum flowing through the interpreter is an [`Obj`]: a cheap,
//! reference-counted handle onto a shared record holding a lazily-computed
//! string form and an internal representation ([`Rep`]).  Sharing is by
//! handle clone, never by deep copy; code that wants to mutate a value in
//! place must go through [`Obj::unshared`] first (copy-on-write).
//!
//! The original's per-type vtable (free / duplicate / string hooks) maps to
//! the [`Rep`] enum for the kinds the core knows about, plus the [`ObjKind`]
//! trait object for open extensibility.  A kind's *free hook* is its `Drop`
//! impl: it runs exactly once, either when the last handle is released or
//! when the rep is replaced by a conversion.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::hash::HashTable;

// ── Kind trait (open extensibility) ───────────────────────────────────────

/// Behavior bundle for value kinds the core does not know about.
///
/// Host code wraps its own resources (channel handles, compiled patterns, …)
/// in an `ObjKind` and stores them via [`Obj::new_foreign`].  Resource
/// release belongs in the implementor's `Drop`.
pub trait ObjKind {
    /// Kind name, for diagnostics.
    fn name(&self) -> &'static str;
    /// Materialize the string form.  Called at most once per mutation cycle;
    /// the result is cached on the value.
    fn stringify(&self) -> String;
    /// Duplicate hook, invoked only when a shared value must be mutated.
    fn duplicate(&self) -> Box<dyn ObjKind>;
}

// ── Internal representation ───────────────────────────────────────────────

/// The internal representation of a value.
///
/// `None` means the cached string form is the only authoritative form; the
/// value invariant is that a record never has *neither* a string nor a rep.
pub enum Rep {
    None,
    Int(i64),
    Double(f64),
    List(Vec<Obj>),
    Dict(HashTable<String, Obj>),
    /// Memoized ensemble resolution: identity of the sub-command table this
    /// word was resolved against, plus the entry index.  Implicitly
    /// invalidated whenever any other conversion replaces the rep.
    Subcmd { table: usize, index: usize },
    /// Handle into the interpreter's reference registry (the only value kind
    /// that may participate in cycles).
    Reference { id: u64 },
    Foreign(Box<dyn ObjKind>),
}

impl Rep {
    fn kind_name(&self) -> &'static str {
        match self {
            Rep::None => "string",
            Rep::Int(_) => "int",
            Rep::Double(_) => "double",
            Rep::List(_) => "list",
            Rep::Dict(_) => "dict",
            Rep::Subcmd { .. } => "subcmd",
            Rep::Reference { .. } => "reference",
            Rep::Foreign(k) => k.name(),
        }
    }

    /// Duplicate for copy-on-write.  Container kinds clone shallowly (their
    /// elements stay shared); foreign kinds go through their duplicate hook.
    fn duplicate(&self) -> Rep {
        match self {
            Rep::None => Rep::None,
            Rep::Int(n) => Rep::Int(*n),
            Rep::Double(x) => Rep::Double(*x),
            Rep::List(items) => Rep::List(items.clone()),
            Rep::Dict(table) => Rep::Dict(table.clone()),
            Rep::Subcmd { table, index } => Rep::Subcmd { table: *table, index: *index },
            Rep::Reference { id } => Rep::Reference { id: *id },
            Rep::Foreign(k) => Rep::Foreign(k.duplicate()),
        }
    }
}

// ── Obj ───────────────────────────────────────────────────────────────────

struct ObjInner {
    /// Cached string form; `None` until materialized or after a mutation
    /// invalidated it.
    string: RefCell<Option<Rc<str>>>,
    rep: RefCell<Rep>,
}

/// A reference-counted interpreter value.
///
/// Cloning an `Obj` is the *share* operation (refcount increment); dropping
/// it is *release*.  The record is freed, and the rep's free hook runs, on
/// the drop that brings the count to zero.
pub struct Obj {
    inner: Rc<ObjInner>,
}

impl Clone for Obj {
    fn clone(&self) -> Self {
        Obj { inner: Rc::clone(&self.inner) }
    }
}

impl Obj {
    fn from_parts(string: Option<Rc<str>>, rep: Rep) -> Obj {
        debug_assert!(string.is_some() || !matches!(rep, Rep::None));
        Obj {
            inner: Rc::new(ObjInner {
                string: RefCell::new(string),
                rep: RefCell::new(rep),
            }),
        }
    }

    // ── Constructors ──────────────────────────────────────────────────────

    pub fn new_string(s: impl Into<String>) -> Obj {
        let s: String = s.into();
        Obj::from_parts(Some(Rc::from(s.as_str())), Rep::None)
    }

    pub fn new_int(n: i64) -> Obj {
        Obj::from_parts(None, Rep::Int(n))
    }

    pub fn new_double(x: f64) -> Obj {
        Obj::from_parts(None, Rep::Double(x))
    }

    pub fn new_list(items: Vec<Obj>) -> Obj {
        Obj::from_parts(None, Rep::List(items))
    }

    pub fn new_dict() -> Obj {
        Obj::from_parts(None, Rep::Dict(HashTable::new()))
    }

    pub fn new_reference(id: u64) -> Obj {
        Obj::from_parts(None, Rep::Reference { id })
    }

    pub fn new_foreign(kind: Box<dyn ObjKind>) -> Obj {
        Obj::from_parts(None, Rep::Foreign(kind))
    }

    /// The canonical empty value.
    pub fn empty() -> Obj {
        Obj::new_string("")
    }

    // ── Sharing ───────────────────────────────────────────────────────────

    /// Current reference count (shared handles onto the same record).
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// `true` when more than one handle refers to this record; mutation
    /// requires an unshared value.
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.inner) > 1
    }

    /// `true` when both handles refer to the same record.
    pub fn same(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy-on-write entry point: returns `self` when unshared, otherwise a
    /// fresh duplicate (per-kind duplicate hook) safe to mutate.
    pub fn unshared(&self) -> Obj {
        if !self.is_shared() {
            return self.clone();
        }
        let string = self.inner.string.borrow().clone();
        let rep = self.inner.rep.borrow().duplicate();
        Obj::from_parts(string, rep)
    }

    // ── String form ───────────────────────────────────────────────────────

    /// The cached string form, materializing it through the rep's stringify
    /// exactly once.
    pub fn string(&self) -> Rc<str> {
        if let Some(s) = self.inner.string.borrow().as_ref() {
            return Rc::clone(s);
        }
        let s: Rc<str> = Rc::from(self.stringify_rep().as_str());
        *self.inner.string.borrow_mut() = Some(Rc::clone(&s));
        s
    }

    /// Byte length of the string form (terminator excluded).
    pub fn length(&self) -> usize {
        self.string().len()
    }

    /// Name of the current internal-representation kind.
    pub fn kind_name(&self) -> &'static str {
        self.inner.rep.borrow().kind_name()
    }

    fn stringify_rep(&self) -> String {
        match &*self.inner.rep.borrow() {
            // Invariant: Rep::None always has a cached string.
            Rep::None => String::new(),
            Rep::Int(n) => n.to_string(),
            Rep::Double(x) => format_double(*x),
            Rep::List(items) => format_list(items),
            Rep::Dict(table) => {
                let mut items = Vec::with_capacity(table.len() * 2);
                let mut cursor = table.cursor();
                while let Some(key) = cursor.next(table) {
                    if let Some(val) = table.find(&key) {
                        items.push(Obj::new_string(key));
                        items.push(val.clone());
                    }
                }
                format_list(&items)
            }
            Rep::Subcmd { .. } => String::new(),
            Rep::Reference { id } => format_reference(*id),
            Rep::Foreign(k) => k.stringify(),
        }
    }

    /// Drop the cached string after an in-place rep mutation.  Must never be
    /// called while the rep is `Rep::None` (that would leave the value with
    /// neither form).
    fn invalidate_string(&self) {
        debug_assert!(!matches!(&*self.inner.rep.borrow(), Rep::None));
        *self.inner.string.borrow_mut() = None;
    }

    /// Replace the rep, running the previous kind's free hook (its `Drop`).
    /// The string form is materialized first so the value stays printable
    /// when the new rep cannot regenerate it (e.g. a sub-command cache).
    fn set_rep(&self, rep: Rep) {
        self.string();
        *self.inner.rep.borrow_mut() = rep;
    }

    // ── Conversions ───────────────────────────────────────────────────────

    /// Interpret as a 64-bit integer, converting (and caching) the rep.
    /// Fails with a conversion error; never truncates.
    pub fn get_int(&self) -> Result<i64, String> {
        match &*self.inner.rep.borrow() {
            Rep::Int(n) => return Ok(*n),
            Rep::Double(x) if x.fract() == 0.0 && x.abs() < 9.3e18 => {
                return Ok(*x as i64);
            }
            _ => {}
        }
        let s = self.string();
        let t = s.trim();
        let parsed = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else if let Some(hex) = t.strip_prefix("-0x").or_else(|| t.strip_prefix("-0X")) {
            i64::from_str_radix(hex, 16).ok().map(|n| -n)
        } else {
            t.parse::<i64>().ok()
        };
        match parsed {
            Some(n) => {
                self.set_rep(Rep::Int(n));
                Ok(n)
            }
            None => Err(format!("expected integer but got \"{s}\"")),
        }
    }

    /// Interpret as a double, converting (and caching) the rep.
    pub fn get_double(&self) -> Result<f64, String> {
        match &*self.inner.rep.borrow() {
            Rep::Int(n) => return Ok(*n as f64),
            Rep::Double(x) => return Ok(*x),
            _ => {}
        }
        let s = self.string();
        match s.trim().parse::<f64>() {
            Ok(x) => {
                self.set_rep(Rep::Double(x));
                Ok(x)
            }
            Err(_) => Err(format!("expected floating-point number but got \"{s}\"")),
        }
    }

    /// Interpret as a boolean: numeric values by non-zero-ness, otherwise
    /// the usual word forms.
    pub fn get_bool(&self) -> Result<bool, String> {
        match &*self.inner.rep.borrow() {
            Rep::Int(n) => return Ok(*n != 0),
            Rep::Double(x) => return Ok(*x != 0.0),
            _ => {}
        }
        let s = self.string();
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            _ => {
                if let Ok(n) = self.get_int() {
                    Ok(n != 0)
                } else {
                    Err(format!("expected boolean but got \"{s}\""))
                }
            }
        }
    }

    // ── List access ───────────────────────────────────────────────────────

    /// Convert to the list rep if needed and return the elements (shared
    /// handles, cheap to clone).
    pub fn list_elements(&self) -> Result<Vec<Obj>, String> {
        if let Rep::List(items) = &*self.inner.rep.borrow() {
            return Ok(items.clone());
        }
        let items = parse_list(&self.string())?;
        self.set_rep(Rep::List(items.clone()));
        Ok(items)
    }

    pub fn list_len(&self) -> Result<usize, String> {
        Ok(self.list_elements()?.len())
    }

    /// Append an element in place.  Caller must hold an unshared value.
    pub fn list_append(&self, item: Obj) -> Result<(), String> {
        debug_assert!(!self.is_shared());
        let mut items = self.list_elements()?;
        items.push(item);
        *self.inner.rep.borrow_mut() = Rep::List(items);
        self.invalidate_string();
        Ok(())
    }

    // ── Dict access ───────────────────────────────────────────────────────

    fn ensure_dict(&self) -> Result<(), String> {
        if matches!(&*self.inner.rep.borrow(), Rep::Dict(_)) {
            return Ok(());
        }
        let items = self.list_elements()?;
        if items.len() % 2 != 0 {
            return Err("missing value to go with key".to_owned());
        }
        let mut table = HashTable::new();
        for pair in items.chunks(2) {
            table.replace(pair[0].string().to_string(), pair[1].clone());
        }
        self.set_rep(Rep::Dict(table));
        Ok(())
    }

    pub fn dict_get(&self, key: &str) -> Result<Option<Obj>, String> {
        self.ensure_dict()?;
        match &*self.inner.rep.borrow() {
            Rep::Dict(table) => Ok(table.find(&key.to_owned()).cloned()),
            _ => unreachable!("ensure_dict"),
        }
    }

    pub fn dict_keys(&self) -> Result<Vec<String>, String> {
        self.ensure_dict()?;
        match &*self.inner.rep.borrow() {
            Rep::Dict(table) => {
                let mut keys = Vec::with_capacity(table.len());
                let mut cursor = table.cursor();
                while let Some(key) = cursor.next(table) {
                    keys.push(key);
                }
                Ok(keys)
            }
            _ => unreachable!("ensure_dict"),
        }
    }

    pub fn dict_len(&self) -> Result<usize, String> {
        self.ensure_dict()?;
        match &*self.inner.rep.borrow() {
            Rep::Dict(table) => Ok(table.len()),
            _ => unreachable!("ensure_dict"),
        }
    }

    /// Insert or overwrite a key.  Caller must hold an unshared value.
    pub fn dict_set(&self, key: impl Into<String>, val: Obj) -> Result<(), String> {
        debug_assert!(!self.is_shared());
        self.ensure_dict()?;
        if let Rep::Dict(table) = &mut *self.inner.rep.borrow_mut() {
            table.replace(key.into(), val);
        }
        self.invalidate_string();
        Ok(())
    }

    /// Remove a key; `true` if it existed.  Caller must hold an unshared
    /// value.
    pub fn dict_unset(&self, key: &str) -> Result<bool, String> {
        debug_assert!(!self.is_shared());
        self.ensure_dict()?;
        let removed = match &mut *self.inner.rep.borrow_mut() {
            Rep::Dict(table) => table.remove(&key.to_owned()).is_some(),
            _ => unreachable!("ensure_dict"),
        };
        if removed {
            self.invalidate_string();
        }
        Ok(removed)
    }

    // ── Specialized reps ──────────────────────────────────────────────────

    /// Replace the rep with an integer in place (used by `incr` on an
    /// unshared value).
    pub fn set_int(&self, n: i64) {
        debug_assert!(!self.is_shared());
        *self.inner.rep.borrow_mut() = Rep::Int(n);
        self.invalidate_string();
    }

    /// The memoized sub-command resolution, if this value carries one.
    pub fn subcmd_cache(&self) -> Option<(usize, usize)> {
        match &*self.inner.rep.borrow() {
            Rep::Subcmd { table, index } => Some((*table, *index)),
            _ => None,
        }
    }

    /// Cache a sub-command resolution on this value.
    pub fn cache_subcmd(&self, table: usize, index: usize) {
        self.set_rep(Rep::Subcmd { table, index });
    }

    /// The reference id, if this value is (convertible to) a reference.
    pub fn reference_id(&self) -> Option<u64> {
        if let Rep::Reference { id } = &*self.inner.rep.borrow() {
            return Some(*id);
        }
        let id = parse_reference(&self.string())?;
        self.set_rep(Rep::Reference { id });
        Some(id)
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj({}:{:?})", self.kind_name(), self.string())
    }
}

impl From<i64> for Obj {
    fn from(n: i64) -> Obj {
        Obj::new_int(n)
    }
}

impl From<f64> for Obj {
    fn from(x: f64) -> Obj {
        Obj::new_double(x)
    }
}

impl From<&str> for Obj {
    fn from(s: &str) -> Obj {
        Obj::new_string(s)
    }
}

impl From<String> for Obj {
    fn from(s: String) -> Obj {
        Obj::new_string(s)
    }
}

impl From<bool> for Obj {
    fn from(b: bool) -> Obj {
        Obj::new_int(if b { 1 } else { 0 })
    }
}

// ── Double formatting ─────────────────────────────────────────────────────

/// Print a double the Tcl way: integral values keep a trailing `.0` so the
/// string still reads back as a double.
fn format_double(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

// ── Reference string form ─────────────────────────────────────────────────

const REF_PREFIX: &str = "<reference.";

/// `<reference.<12-digit id>>` — fixed width so the collector can recognize
/// ids embedded in arbitrary cached strings.
pub fn format_reference(id: u64) -> String {
    format!("{REF_PREFIX}{id:012}>")
}

fn parse_reference(s: &str) -> Option<u64> {
    let rest = s.trim().strip_prefix(REF_PREFIX)?;
    let digits = rest.strip_suffix('>')?;
    if digits.len() != 12 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Scan an arbitrary string for embedded reference ids (used by `collect`'s
/// mark phase: a reference smuggled through a string form must stay alive).
pub fn scan_references(s: &str, mark: &mut impl FnMut(u64)) {
    let mut rest = s;
    while let Some(at) = rest.find(REF_PREFIX) {
        let tail = &rest[at + REF_PREFIX.len()..];
        let b = tail.as_bytes();
        if b.len() >= 13 && b[12] == b'>' && b[..12].iter().all(u8::is_ascii_digit) {
            if let Ok(id) = tail[..12].parse::<u64>() {
                mark(id);
            }
        }
        rest = &rest[at + REF_PREFIX.len()..];
    }
}

// ── List syntax ───────────────────────────────────────────────────────────
//
// Tcl's list quoting lives in the value layer (it is how lists and dicts
// stringify), not in the out-of-scope script parser.

/// Render elements as a Tcl list string.
pub fn format_list(items: &[Obj]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        format_list_element(&item.string(), &mut out);
    }
    out
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars().any(|c| {
            c.is_whitespace() || matches!(c, '{' | '}' | '"' | '\\' | '$' | ';' | '[' | ']')
        })
}

fn braces_balanced(s: &str) -> bool {
    let mut depth: i64 = 0;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn format_list_element(s: &str, out: &mut String) {
    if !needs_quoting(s) {
        out.push_str(s);
    } else if braces_balanced(s) && !s.ends_with('\\') {
        out.push('{');
        out.push_str(s);
        out.push('}');
    } else {
        for c in s.chars() {
            match c {
                ' ' | '\t' | '{' | '}' | '"' | '\\' | '$' | ';' | '[' | ']' => {
                    out.push('\\');
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                _ => out.push(c),
            }
        }
        if s.is_empty() {
            out.push_str("{}");
        }
    }
}

/// Parse a Tcl list string into elements.
pub fn parse_list(s: &str) -> Result<Vec<Obj>, String> {
    let mut items = Vec::new();
    let mut chars = s.char_indices().peekable();
    let bytes = s;
    loop {
        // Skip inter-element whitespace.
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
                let end = end.ok_or_else(|| "unmatched open brace in list".to_owned())?;
                // Braced elements are taken verbatim, escapes included.
                items.push(Obj::new_string(&bytes[start + 1..end]));
                if let Some(&(_, c)) = chars.peek() {
                    if !c.is_whitespace() {
                        return Err("list element in braces followed by non-space".to_owned());
                    }
                }
            }
            '"' => {
                chars.next();
                let mut word = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => word.push(unescape(chars.next().map(|(_, c2)| c2))),
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => word.push(c),
                    }
                }
                if !closed {
                    return Err("unmatched open quote in list".to_owned());
                }
                items.push(Obj::new_string(word));
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    chars.next();
                    if c == '\\' {
                        word.push(unescape(chars.next().map(|(_, c2)| c2)));
                    } else {
                        word.push(c);
                    }
                }
                items.push(Obj::new_string(word));
            }
        }
    }
    Ok(items)
}

fn unescape(c: Option<char>) -> char {
    match c {
        Some('n') => '\n',
        Some('t') => '\t',
        Some('r') => '\r',
        Some(other) => other,
        None => '\\',
    }
}

/// Resolve every backslash escape in a word.
pub(crate) fn unescape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(unescape(chars.next()));
        } else {
            out.push(c);
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn share_release_refcount() {
        let v = Obj::new_int(7);
        assert_eq!(v.refcount(), 1);
        assert!(!v.is_shared());
        let shared = v.clone();
        assert_eq!(v.refcount(), 2);
        assert!(v.is_shared());
        drop(shared);
        assert_eq!(v.refcount(), 1);
    }

    thread_local! {
        static FREED: Cell<u32> = const { Cell::new(0) };
    }

    struct Counting;

    impl Drop for Counting {
        fn drop(&mut self) {
            FREED.with(|c| c.set(c.get() + 1));
        }
    }

    impl ObjKind for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn stringify(&self) -> String {
            "counting".to_owned()
        }
        fn duplicate(&self) -> Box<dyn ObjKind> {
            Box::new(Counting)
        }
    }

    #[test]
    fn free_hook_runs_exactly_once_at_zero() {
        FREED.with(|c| c.set(0));
        let v = Obj::new_foreign(Box::new(Counting));
        let a = v.clone();
        let b = v.clone();
        drop(v);
        drop(a);
        assert_eq!(FREED.with(Cell::get), 0);
        drop(b);
        assert_eq!(FREED.with(Cell::get), 1);
    }

    #[test]
    fn string_materialized_once_and_cached() {
        let v = Obj::new_int(42);
        let a = v.string();
        let b = v.string();
        assert_eq!(&*a, "42");
        // Same cached allocation on the second call.
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn mutation_invalidates_string() {
        let v = Obj::new_list(vec![Obj::new_string("a")]);
        assert_eq!(&*v.string(), "a");
        v.list_append(Obj::new_string("b")).unwrap();
        assert_eq!(&*v.string(), "a b");
    }

    #[test]
    fn int_conversion_and_shimmer() {
        let v = Obj::new_string(" 17 ");
        assert_eq!(v.get_int().unwrap(), 17);
        assert_eq!(v.kind_name(), "int");
        // String form survives the conversion.
        assert_eq!(&*v.string(), " 17 ");
    }

    #[test]
    fn int_conversion_rejects_garbage() {
        assert!(Obj::new_string("12abc").get_int().is_err());
        assert!(Obj::new_string("").get_int().is_err());
    }

    #[test]
    fn hex_int() {
        assert_eq!(Obj::new_string("0x10").get_int().unwrap(), 16);
        assert_eq!(Obj::new_string("-0x10").get_int().unwrap(), -16);
    }

    #[test]
    fn double_and_bool_conversions() {
        assert_eq!(Obj::new_string("2.5").get_double().unwrap(), 2.5);
        assert!(Obj::new_string("yes").get_bool().unwrap());
        assert!(!Obj::new_string("off").get_bool().unwrap());
        assert!(Obj::new_string("maybe").get_bool().is_err());
    }

    #[test]
    fn double_display_keeps_point() {
        assert_eq!(&*Obj::new_double(3.0).string(), "3.0");
        assert_eq!(&*Obj::new_double(3.25).string(), "3.25");
    }

    #[test]
    fn unshared_copies_when_shared() {
        let v = Obj::new_list(vec![Obj::new_int(1)]);
        let kept = v.clone();
        let dup = v.unshared();
        assert!(!dup.same(&v));
        dup.list_append(Obj::new_int(2)).unwrap();
        assert_eq!(&*kept.string(), "1");
        assert_eq!(&*dup.string(), "1 2");
    }

    #[test]
    fn unshared_is_identity_when_unique() {
        let v = Obj::new_int(1);
        let same = v.unshared();
        assert!(same.same(&v));
    }

    #[test]
    fn list_round_trip() {
        let items = vec![
            Obj::new_string("plain"),
            Obj::new_string("two words"),
            Obj::new_string(""),
            Obj::new_string("brace{inside"),
        ];
        let s = format_list(&items);
        let back = parse_list(&s).unwrap();
        assert_eq!(back.len(), items.len());
        for (a, b) in items.iter().zip(&back) {
            assert_eq!(a.string(), b.string());
        }
    }

    #[test]
    fn parse_list_braces_and_quotes() {
        let items = parse_list("a {b c} \"d e\" f").unwrap();
        let words: Vec<String> = items.iter().map(|o| o.string().to_string()).collect();
        assert_eq!(words, ["a", "b c", "d e", "f"]);
    }

    #[test]
    fn parse_list_unbalanced() {
        assert!(parse_list("{a b").is_err());
        assert!(parse_list("\"a b").is_err());
    }

    #[test]
    fn dict_from_list_and_back() {
        let v = Obj::new_string("a 1 b 2");
        assert_eq!(v.dict_len().unwrap(), 2);
        assert_eq!(&*v.dict_get("b").unwrap().unwrap().string(), "2");
        assert!(v.dict_get("missing").unwrap().is_none());
    }

    #[test]
    fn dict_odd_list_fails() {
        assert!(Obj::new_string("a 1 b").dict_len().is_err());
    }

    #[test]
    fn reference_round_trip() {
        let v = Obj::new_reference(7);
        let s = v.string();
        assert_eq!(&*s, "<reference.000000000007>");
        let parsed = Obj::new_string(&*s);
        assert_eq!(parsed.reference_id(), Some(7));
        assert_eq!(Obj::new_string("<reference.x>").reference_id(), None);
    }

    #[test]
    fn scan_references_in_text() {
        let mut found = Vec::new();
        let text = format!("x {} y {} z", format_reference(3), format_reference(12));
        scan_references(&text, &mut |id| found.push(id));
        assert_eq!(found, [3, 12]);
    }

    #[test]
    fn subcmd_cache_set_and_reset() {
        let v = Obj::new_string("rea");
        v.cache_subcmd(0xbeef, 2);
        assert_eq!(v.subcmd_cache(), Some((0xbeef, 2)));
        // Any other conversion replaces the rep and drops the cache.
        assert!(v.get_int().is_err());
        v.set_rep(Rep::Int(1));
        assert_eq!(v.subcmd_cache(), None);
        // The original spelling survives as the cached string.
        assert_eq!(&*Obj::new_string("rea").string(), "rea");
    }
}
