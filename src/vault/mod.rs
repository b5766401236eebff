//! Vault lifecycle for one workspace's encrypted container.

/// Container creation, unlock and teardown.
pub mod container;
/// Environment binding persistence and emission.
pub mod env;
/// Top-level `up` / `down` / `env` sequencing.
pub mod lifecycle;
/// Per-workspace advisory lock.
pub mod lock;
/// Mount supervisor.
pub mod mount;
/// Secret synchronizer.
pub mod sync;

pub use container::{ContainerManager, UnlockedContainer};
pub use env::{BindingOrigin, EnvBinding, EnvBindings, EnvEmitter};
pub use lifecycle::{UpOutcome, UpReport, VaultLifecycle};
pub use lock::WorkspaceLock;
pub use mount::MountSupervisor;
pub use sync::{SecretSynchronizer, SyncReport};
