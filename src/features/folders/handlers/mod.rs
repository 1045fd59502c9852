mod folder_handler;

pub use folder_handler::*;
