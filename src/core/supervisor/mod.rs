pub mod console;
pub mod policy;
pub mod process;
pub mod runner;
pub mod state;

pub use console::{ConsoleLog, LogLine, LogStream};
pub use policy::RestartPolicy;
pub use process::{ChildProcess, ExitOutcome, ProcessSpawner, TokioSpawner};
pub use runner::{ProcessSupervisor, SupervisorHandle};
pub use state::{SupervisorState, Transition};
