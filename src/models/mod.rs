pub mod action;
pub mod messages;

pub use action::*;
pub use messages::*;
