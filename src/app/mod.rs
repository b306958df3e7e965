pub mod images;
pub mod ports;
