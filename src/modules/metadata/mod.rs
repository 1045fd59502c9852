//! Photo detection and EXIF metadata extraction

mod extractor;

pub use extractor::{PhotoMetadata, PhotoMetadataExtractor};
