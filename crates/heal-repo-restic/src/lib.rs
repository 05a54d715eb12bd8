pub mod process;
pub mod restic;

pub use process::*;
pub use restic::*;
