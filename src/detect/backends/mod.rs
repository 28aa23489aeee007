pub mod scripted;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::ScriptedBackend;
pub use stub::{StubBackend, StubLotConfig};

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackend, TractConfig};
