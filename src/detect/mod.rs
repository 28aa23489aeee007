mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ScriptedBackend, StubBackend, StubLotConfig};
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractConfig};
pub use registry::BackendRegistry;
pub use result::{CocoIndexing, Detection, ObjectClass};
