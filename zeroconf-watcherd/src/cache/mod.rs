pub mod facts;
pub mod table;
