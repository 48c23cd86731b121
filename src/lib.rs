pub mod bridge;
pub mod channels;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod fanout;
pub mod feed;
pub mod model;
pub mod orders;
pub mod policy;
pub mod push;
pub mod settings;
