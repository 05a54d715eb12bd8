pub mod engine;
pub mod errors;
pub mod ids;
pub mod model;
pub mod snapshot;
pub mod types;

pub use engine::*;
pub use errors::*;
pub use ids::*;
pub use model::*;
pub use snapshot::*;
pub use types::*;
