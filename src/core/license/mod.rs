pub mod eula;

pub use eula::{EULA_FILE_NAME, LicenseAcceptance, LicenseGate, LicenseToken};
