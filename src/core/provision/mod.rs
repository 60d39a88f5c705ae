pub mod identity;
pub mod provisioner;
pub mod scope;

pub use identity::IdentityProvider;
pub use identity::ServiceIdentity;
pub use identity::SystemIdentityProvider;
pub use provisioner::ProvisionerConfig;
pub use provisioner::RuntimeImage;
pub use provisioner::RuntimeProvisioner;
pub use scope::ScopedRoot;
