pub mod advertise;
pub mod browser;
pub mod packets;
pub mod traffic;
pub mod transport;
