pub mod config;
pub mod util;

pub mod model;
