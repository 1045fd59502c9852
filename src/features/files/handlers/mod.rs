mod file_handler;
mod upload_handler;

pub use file_handler::*;
pub use upload_handler::*;
