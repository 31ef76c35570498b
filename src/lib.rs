pub mod projdata;
pub mod image;
pub mod system_matrix;
pub mod projector;
pub mod objective;
pub mod filter;
pub mod osmaposl;
pub mod config;
pub mod io;
pub mod utils;
