pub mod runtime;

pub use runtime::CommandProbe;
pub use runtime::JavaInstallation;
pub use runtime::JavaLocator;
pub use runtime::JavaProbe;
pub use runtime::JavaRuntime;
pub use runtime::RuntimeArchive;
pub use runtime::required_java_for_minecraft_version;
