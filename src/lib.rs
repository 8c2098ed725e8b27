pub mod archive;
pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod finalize;
pub mod fs_util;
pub mod merge;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod recipe;
pub mod step;
pub mod tools;
