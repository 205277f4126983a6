mod adapter;
mod backend;
pub mod backends;
mod labels;
mod result;

pub use adapter::InferenceAdapter;
pub use backend::{Device, DetectorBackend, ModelTask};
pub use backends::{load_backend, StubBackend};
pub use labels::{class_label, COCO_CLASSES, DEFAULT_TRACKED_CLASSES, SKELETON};
pub use result::{non_max_suppression, BBox, ClassId, Detection, Keypoint};
