pub mod commands;
pub mod poll;
pub mod reactions;
