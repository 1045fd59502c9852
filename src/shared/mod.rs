pub mod constants;
pub mod paths;
pub mod test_helpers;
pub mod types;
pub mod validation;
