pub mod ban;
pub mod kick;
