pub mod assembly;
pub mod taxonomy;
