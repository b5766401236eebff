#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use secrecy::SecretString;
use zt_vault::{
    console::Console,
    error::{Result, VaultError},
    host::{BlockEncryption, FilesystemService, FormatRequest, LoopbackManager, MountRequest, OpenRequest},
    identity::MapperName,
    settings::VaultSettings,
    store::SecretStore,
};

/// Settings rooted in a temp home with a 1 MiB image.
pub fn test_settings(root: &Path) -> VaultSettings {
    let mut settings = VaultSettings::new(root.join("home"), "dev");
    settings.workspace_root = root.join("workspace");
    settings.image_size_mib = 1;
    settings.use_sudo = false;
    settings
}

/// One fake loop device; `inode` follows the backing file across renames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopAttachment {
    pub device: PathBuf,
    pub image: PathBuf,
    pub inode: Option<u64>,
}

fn inode_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|metadata| metadata.ino())
}

#[derive(Default)]
pub struct HostState {
    pub calls: Mutex<Vec<String>>,
    pub luks_passphrase: Mutex<Option<String>>,
    pub attached: Mutex<Vec<LoopAttachment>>,
    pub open_mapping: Mutex<Option<String>>,
    pub mounted: Mutex<Option<PathBuf>>,
    pub mounts: Mutex<Vec<MountRequest>>,
    pub chowns: Mutex<Vec<(PathBuf, String)>>,
    pub next_loop: Mutex<u32>,
    pub fail_mkfs: Mutex<bool>,
    pub fail_mount: Mutex<bool>,
    pub fail_mount_probe: Mutex<bool>,
    pub node_never_appears: Mutex<bool>,
    pub busy_loops: Mutex<bool>,
}

/// In-memory loop/LUKS/mount host.
#[derive(Clone, Default)]
pub struct FakeHost {
    pub state: Arc<HostState>,
}

impl FakeHost {
    pub fn with_container(passphrase: &str) -> Self {
        let host = Self::default();
        *host.state.luks_passphrase.lock().unwrap() = Some(passphrase.to_owned());
        host
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().unwrap().clear();
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn attached(&self) -> Vec<LoopAttachment> {
        self.state.attached.lock().unwrap().clone()
    }

    pub fn is_mapping_open(&self) -> bool {
        self.state.open_mapping.lock().unwrap().is_some()
    }

    pub fn mark_mounted(&self, path: &Path) {
        *self.state.mounted.lock().unwrap() = Some(path.to_path_buf());
    }

    pub fn mark_mapping_open(&self, mapper: &MapperName) {
        *self.state.open_mapping.lock().unwrap() = Some(mapper.as_str().to_owned());
    }

    pub fn attach_loop(&self, image: &Path) -> PathBuf {
        let mut next = self.state.next_loop.lock().unwrap();
        let device = PathBuf::from(format!("/dev/loop{next}"));
        *next += 1;
        self.state.attached.lock().unwrap().push(LoopAttachment {
            device: device.clone(),
            image: image.to_path_buf(),
            inode: inode_of(image),
        });
        device
    }

    fn record(&self, call: String) {
        self.state.calls.lock().unwrap().push(call);
    }
}

impl LoopbackManager for FakeHost {
    fn attach(&self, image: &Path) -> Result<PathBuf> {
        self.record(format!("attach {}", image.display()));
        Ok(self.attach_loop(image))
    }

    fn detach(&self, device: &Path) -> Result<()> {
        self.record(format!("detach {}", device.display()));
        if *self.state.busy_loops.lock().unwrap() {
            return Err(VaultError::command_failed("losetup", "device is busy"));
        }
        self.state
            .attached
            .lock()
            .unwrap()
            .retain(|attachment| attachment.device != device);
        Ok(())
    }

    fn backing_devices(&self, image: &Path) -> Result<Vec<PathBuf>> {
        self.record(format!("backing {}", image.display()));
        let inode = inode_of(image);
        Ok(self
            .state
            .attached
            .lock()
            .unwrap()
            .iter()
            .filter(|attachment| {
                attachment.image == image || (inode.is_some() && attachment.inode == inode)
            })
            .map(|attachment| attachment.device.clone())
            .collect())
    }
}

impl BlockEncryption for FakeHost {
    fn format(&self, request: &FormatRequest<'_>) -> Result<()> {
        self.record(format!("format {}", request.device.display()));
        *self.state.luks_passphrase.lock().unwrap() = Some(request.passphrase.to_owned());
        Ok(())
    }

    fn open(&self, request: &OpenRequest<'_>) -> Result<PathBuf> {
        self.record(format!("open {}", request.mapper));
        let stored = self.state.luks_passphrase.lock().unwrap().clone();
        if stored.as_deref() != Some(request.passphrase) {
            return Err(VaultError::CommandFailed {
                program: "cryptsetup".to_owned(),
                detail: "No key available with this passphrase.".to_owned(),
            });
        }
        *self.state.open_mapping.lock().unwrap() = Some(request.mapper.as_str().to_owned());
        if *self.state.node_never_appears.lock().unwrap() {
            return Err(VaultError::DeviceNotReady(request.mapper.device_path()));
        }
        Ok(request.mapper.device_path())
    }

    fn close(&self, mapper: &MapperName) -> Result<()> {
        self.record(format!("close {mapper}"));
        *self.state.open_mapping.lock().unwrap() = None;
        Ok(())
    }

    fn is_open(&self, mapper: &MapperName) -> Result<bool> {
        self.record(format!("status {mapper}"));
        Ok(self.state.open_mapping.lock().unwrap().as_deref() == Some(mapper.as_str()))
    }
}

impl FilesystemService for FakeHost {
    fn make_filesystem(&self, device: &Path) -> Result<()> {
        self.record(format!("mkfs {}", device.display()));
        if *self.state.fail_mkfs.lock().unwrap() {
            return Err(VaultError::CommandFailed {
                program: "mkfs.ext4".to_owned(),
                detail: "injected mkfs failure".to_owned(),
            });
        }
        Ok(())
    }

    fn mount(&self, request: &MountRequest) -> Result<()> {
        self.record(format!("mount {}", request.mount_point.display()));
        if *self.state.fail_mount.lock().unwrap() {
            return Err(VaultError::CommandFailed {
                program: "mount".to_owned(),
                detail: "injected mount failure".to_owned(),
            });
        }
        self.state.mounts.lock().unwrap().push(request.clone());
        *self.state.mounted.lock().unwrap() = Some(request.mount_point.clone());
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        self.record(format!("umount {}", mount_point.display()));
        *self.state.mounted.lock().unwrap() = None;
        Ok(())
    }

    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        self.record("is_mount_point".to_owned());
        if *self.state.fail_mount_probe.lock().unwrap() {
            return Err(VaultError::Io(std::io::Error::other("injected probe failure")));
        }
        Ok(self.state.mounted.lock().unwrap().as_deref() == Some(path))
    }

    fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()> {
        self.record(format!("chown {}", path.display()));
        self.state
            .chowns
            .lock()
            .unwrap()
            .push((path.to_path_buf(), owner.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
pub struct StoreState {
    pub secrets: Mutex<HashMap<String, String>>,
    pub bulk: Mutex<Option<String>>,
    pub unreachable: Mutex<bool>,
    pub reject_writes: Mutex<bool>,
    pub appear_on_login: Mutex<Option<(String, String)>>,
    pub get_calls: Mutex<Vec<String>>,
    pub set_calls: Mutex<Vec<(String, String)>>,
    pub bulk_calls: Mutex<usize>,
    pub login_calls: Mutex<usize>,
}

/// In-memory remote secret store.
#[derive(Clone, Default)]
pub struct FakeStore {
    pub state: Arc<StoreState>,
}

impl FakeStore {
    pub fn with_secrets(secrets: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut map = store.state.secrets.lock().unwrap();
            for (name, value) in secrets {
                map.insert((*name).to_owned(), (*value).to_owned());
            }
        }
        store
    }

    pub fn unreachable() -> Self {
        let store = Self::default();
        *store.state.unreachable.lock().unwrap() = true;
        store
    }

    pub fn set_bulk(&self, bulk: &str) {
        *self.state.bulk.lock().unwrap() = Some(bulk.to_owned());
    }

    pub fn secret(&self, name: &str) -> Option<String> {
        self.state.secrets.lock().unwrap().get(name).cloned()
    }

    pub fn set_calls(&self) -> Vec<(String, String)> {
        self.state.set_calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.state.get_calls.lock().unwrap().len()
            + self.state.set_calls.lock().unwrap().len()
            + *self.state.bulk_calls.lock().unwrap()
            + *self.state.login_calls.lock().unwrap()
    }

    fn offline_error() -> VaultError {
        VaultError::CommandFailed {
            program: "infisical".to_owned(),
            detail: "network unreachable".to_owned(),
        }
    }
}

impl SecretStore for FakeStore {
    fn get_secret(&self, name: &str) -> Result<Option<String>> {
        self.state.get_calls.lock().unwrap().push(name.to_owned());
        if *self.state.unreachable.lock().unwrap() {
            return Err(Self::offline_error());
        }
        Ok(self.secret(name))
    }

    fn set_secret_if_absent(&self, name: &str, value: &str) -> Result<bool> {
        self.state
            .set_calls
            .lock()
            .unwrap()
            .push((name.to_owned(), value.to_owned()));
        if *self.state.unreachable.lock().unwrap() || *self.state.reject_writes.lock().unwrap() {
            return Err(Self::offline_error());
        }
        let mut secrets = self.state.secrets.lock().unwrap();
        if secrets.contains_key(name) {
            return Ok(false);
        }
        secrets.insert(name.to_owned(), value.to_owned());
        Ok(true)
    }

    fn bulk_export(&self) -> Result<Option<String>> {
        *self.state.bulk_calls.lock().unwrap() += 1;
        if *self.state.unreachable.lock().unwrap() {
            return Err(Self::offline_error());
        }
        Ok(self.state.bulk.lock().unwrap().clone())
    }

    fn interactive_login(&self) -> Result<()> {
        *self.state.login_calls.lock().unwrap() += 1;
        if let Some((name, value)) = self.state.appear_on_login.lock().unwrap().take() {
            self.state.secrets.lock().unwrap().insert(name, value);
        }
        Ok(())
    }
}

/// Console that replays scripted answers and records everything shown.
#[derive(Default)]
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    pub fn answering(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|answer| (*answer).to_owned()).collect()),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn progress_lines(&self) -> Vec<String> {
        self.progress.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }
}

impl Console for ScriptedConsole {
    fn read_secret(&self, prompt: &str) -> Result<SecretString> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .map(SecretString::from)
            .ok_or_else(|| VaultError::Prompt("no scripted answer left".to_owned()))
    }

    fn progress(&self, message: &str) {
        self.progress.lock().unwrap().push(message.to_owned());
    }
}
