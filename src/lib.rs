pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod tracing;

pub mod util {
    pub mod env;
    pub mod text;
}
