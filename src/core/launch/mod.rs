pub mod plan;

pub use plan::LaunchDefaults;
pub use plan::LaunchOverrides;
pub use plan::LaunchPlan;
pub use plan::LaunchPlanner;
