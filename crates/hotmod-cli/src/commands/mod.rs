//! Command implementations

pub mod call;
pub mod inspect;
pub mod pack;
pub mod watch;
