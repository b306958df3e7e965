pub mod derivation;
pub mod image_consumer;
pub mod resize;
