// Frontend daemon: platform selection, launch contract, process plumbing and supervision

pub mod launch;
pub mod platform;
pub mod process;
pub mod supervisor;

pub use launch::{BuildMode, LaunchCommand};
pub use process::{DaemonExit, Spawner, SystemSpawner};
pub use supervisor::{DaemonLifecycle, ShutdownOutcome, Supervisor, SupervisorStatus};
