mod backend;
mod backends;
mod nms;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use nms::non_max_suppression;
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection};
