pub mod event;
pub mod occurrence;
pub mod rule;
pub mod source;
