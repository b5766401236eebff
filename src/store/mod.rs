//! Remote secret store contract.

/// Infisical CLI implementation.
pub mod infisical;

use crate::error::Result;

pub use infisical::InfisicalCli;

/// Remote secret store scoped to one project.
///
/// Reads return `Ok(None)` for absent secrets; absence is not an error.
pub trait SecretStore {
    /// Reads one secret by logical name.
    fn get_secret(&self, name: &str) -> Result<Option<String>>;
    /// Publishes a secret unless one already exists; returns true when written.
    fn set_secret_if_absent(&self, name: &str, value: &str) -> Result<bool>;
    /// Full export in dotenv `KEY=VALUE` lines.
    fn bulk_export(&self) -> Result<Option<String>>;
    /// Runs the out-of-band login flow, blocking until it completes.
    fn interactive_login(&self) -> Result<()>;
}

impl<T: SecretStore + ?Sized> SecretStore for &T {
    fn get_secret(&self, name: &str) -> Result<Option<String>> {
        (**self).get_secret(name)
    }

    fn set_secret_if_absent(&self, name: &str, value: &str) -> Result<bool> {
        (**self).set_secret_if_absent(name, value)
    }

    fn bulk_export(&self) -> Result<Option<String>> {
        (**self).bulk_export()
    }

    fn interactive_login(&self) -> Result<()> {
        (**self).interactive_login()
    }
}
