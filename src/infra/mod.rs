pub mod db;
pub mod descriptors;
pub mod queue;
pub mod storage;
