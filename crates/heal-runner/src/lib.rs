pub mod config;
pub mod doctor;
pub mod lifecycle;
pub mod runner;
pub mod scheduler;
pub mod watch;

pub use config::*;
pub use doctor::*;
pub use lifecycle::*;
pub use runner::*;
pub use scheduler::*;
pub use watch::*;
