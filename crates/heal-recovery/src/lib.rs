pub mod finalize;
pub mod orchestrator;
pub mod replace;
pub mod staging;
pub mod tree;
pub mod verify;

pub use finalize::*;
pub use orchestrator::*;
pub use replace::*;
pub use staging::*;
pub use tree::*;
pub use verify::*;
