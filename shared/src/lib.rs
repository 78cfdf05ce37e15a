pub mod dns;
pub mod protocol;
pub mod types;
