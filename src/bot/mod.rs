//! Command handling for inbound chat messages.

pub mod dispatcher;
pub mod handlers;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;
pub use handlers::{build_dispatcher, Timetable};
