pub mod analysis;
pub mod beat;
pub mod decode;
pub mod features;
