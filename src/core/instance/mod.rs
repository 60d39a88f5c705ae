pub mod manager;
pub mod model;
pub mod registry;

pub use manager::InstanceManager;
pub use model::{Instance, InstanceState};
pub use registry::{InstanceRegistry, RunningInstance};
