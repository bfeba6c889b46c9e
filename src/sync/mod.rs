pub mod segment;
pub mod timeline;
