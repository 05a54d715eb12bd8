pub mod capture;
pub mod catalog;
pub mod contract;
pub mod memory;
pub mod traits;

pub use capture::*;
pub use catalog::*;
pub use memory::*;
pub use traits::*;
