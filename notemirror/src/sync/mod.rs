pub mod backoff;
mod clock;
pub mod detect;
pub mod engine;
pub mod fingerprint;
pub mod folders;
pub mod invalidate;
pub mod mirror;
pub mod paths;
pub mod quarantine;
pub mod reconcile;
pub mod remote;
pub mod state;
