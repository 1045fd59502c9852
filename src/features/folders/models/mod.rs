mod folder;

pub use folder::{FolderRecord, NewFolderRecord};
