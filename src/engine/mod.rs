//! Run engine.
//!
//! Coordinates one polling cycle per entry point:
//! fetch → score → select → reconcile → submit → persist.

pub mod runner;
