//! Live session statistics
//!
//! Keeps a bounded history of per-block band energy and the event onsets
//! seen during a live session, for status display.

pub mod store;
