#![deny(missing_docs)]
//! zt-vault provisions a per-workspace encrypted secrets vault.

/// Audit log module.
pub mod audit;
/// Command-line interface.
pub mod cli;
/// Interactive prompting and progress output.
pub mod console;
/// Error types.
pub mod error;
/// Secure filesystem helpers.
pub mod fs_secure;
/// Host collaborator contracts and system drivers.
pub mod host;
/// Workspace identity and manifest discovery.
pub mod identity;
/// Secret manifest schema.
pub mod manifest;
/// Passphrase hashing and verification.
pub mod passphrase;
/// Runtime path layout.
pub mod paths;
/// Injected host settings.
pub mod settings;
/// Remote secret store contract and client.
pub mod store;
/// Vault lifecycle.
pub mod vault;
