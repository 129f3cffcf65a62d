//! An embeddable Tcl-family interpreter core.
//!
//! The crate is organized around four mechanisms:
//!
//! - [`value`] — shared, refcounted dynamic values ([`value::Obj`]) with a
//!   lazily cached string form and convert-on-demand internal reps;
//! - [`hash`] — the chained open-hashing table behind every registry;
//! - [`interp`] — the interpreter instance: command registry, global
//!   variables, references, and minimal script evaluation;
//! - [`eventloop`] — the cooperative poll-based event loop and the `vwait`,
//!   `update`, and `after` commands;
//!
//! plus [`subcmd`] (ensemble dispatch tables) and [`commands`] (the core
//! command set).  A host embeds the interpreter like so:
//!
//! ```
//! use tcl::interp::Interp;
//!
//! let mut interp = Interp::new();
//! let result = interp.eval("set greeting {hello, world}").unwrap();
//! assert_eq!(&*result.string(), "hello, world");
//! ```

pub mod commands;
pub mod eventloop;
pub mod hash;
pub mod interp;
pub mod subcmd;
pub mod value;

pub use eventloop::{EventAction, EventOutcome};
pub use interp::{CmdError, CmdResult, Interp};
pub use value::Obj;
