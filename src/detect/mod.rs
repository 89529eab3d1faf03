mod backend;
mod result;
mod stub;

pub use backend::Detector;
pub use result::{BoundingBox, Detection};
pub use stub::ScriptedDetector;
