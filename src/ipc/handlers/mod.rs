pub mod attendance;
pub mod core;
pub mod events;
pub mod reports;
pub mod roster;
pub mod sheet;
