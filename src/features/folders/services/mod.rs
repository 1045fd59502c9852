mod destination_resolver;
mod folder_service;

pub use destination_resolver::DestinationResolver;
pub use folder_service::{FolderOutcome, FolderRejection, FolderService};
