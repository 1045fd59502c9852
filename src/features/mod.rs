pub mod files;
pub mod folders;
