use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Manifest file name searched for in each candidate directory.
pub const MANIFEST_FILE_NAME: &str = "secrets.yml";
/// Prefix of every workspace mapping name.
pub const MAPPER_PREFIX: &str = "zt_vault_";

const TOKEN_HEX_LEN: usize = 8;

/// Device-mapper name for one workspace's unlocked container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapperName(String);

impl MapperName {
    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Plaintext device node exposed once the mapping is open.
    pub fn device_path(&self) -> PathBuf {
        Path::new("/dev/mapper").join(&self.0)
    }
}

impl fmt::Display for MapperName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the mapping name from the workspace's absolute path.
///
/// Only the path bytes feed the digest, so the result is stable across
/// restarts and unaffected by the environment.
pub fn mapper_name(cwd: &Path) -> MapperName {
    let digest = md5::compute(path_bytes(cwd));
    let hex = format!("{digest:x}");
    MapperName(format!("{MAPPER_PREFIX}{}", &hex[..TOKEN_HEX_LEN]))
}

/// Candidate manifest locations, in lookup order.
pub fn manifest_search_paths(cwd: &Path, workspace_root: &Path) -> Vec<PathBuf> {
    vec![
        cwd.join(MANIFEST_FILE_NAME),
        workspace_root.join(MANIFEST_FILE_NAME),
    ]
}

/// Returns the first existing manifest, checking `cwd` before the workspace root.
pub fn resolve_manifest_path(cwd: &Path, workspace_root: &Path) -> Option<PathBuf> {
    manifest_search_paths(cwd, workspace_root)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().as_bytes().to_vec()
}
