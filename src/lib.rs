pub mod cache;
pub mod db;
pub mod forms;
pub mod seed;
pub mod types;
