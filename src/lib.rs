pub mod canon;
pub mod config;
pub mod converge;
pub mod db;
pub mod dofile;
pub mod ipc;
pub mod progress;
pub mod rules;
pub mod run;
mod signal;
pub mod stamp;
pub mod store;
pub mod work;
