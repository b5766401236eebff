mod common;

use std::fs;

use common::{test_settings, FakeHost, FakeStore, ScriptedConsole};
use zt_vault::{
    audit::{AuditEvent, AuditLog},
    error::VaultError,
    manifest::Manifest,
    passphrase::{hash_passphrase, TrustBasis, CONFIRM_PROMPT, PASSPHRASE_PROMPT},
    settings::{VaultSettings, DEFAULT_HASH_SECRET_NAME},
    vault::{BindingOrigin, UpOutcome, VaultLifecycle},
};

const MANIFEST: &str = r#"
config:
  infisical_project_id: proj-123
secrets:
  - name: DB_PASSWORD
    file: db_password
    env: DB_PASSWORD_FILE
  - name: API_TOKEN
    file: tokens/api
  - name: MISSING_ONE
    file: missing
    env: MISSING_FILE
"#;

struct Workspace {
    _temp_dir: tempfile::TempDir,
    settings: VaultSettings,
    cwd: std::path::PathBuf,
    manifest: Manifest,
}

fn workspace() -> Workspace {
    let temp_dir = tempfile::tempdir().unwrap();
    let settings = test_settings(temp_dir.path());
    let cwd = temp_dir.path().join("project");
    fs::create_dir_all(&cwd).unwrap();
    fs::create_dir_all(&settings.home).unwrap();
    Workspace {
        _temp_dir: temp_dir,
        settings,
        cwd,
        manifest: Manifest::from_yaml_str(MANIFEST).unwrap(),
    }
}

fn existing_image(workspace: &Workspace) {
    let paths = workspace.settings.paths();
    fs::create_dir_all(paths.vault_dir()).unwrap();
    fs::write(paths.image(), b"luks").unwrap();
}

fn remote_with_hash(passphrase: &str) -> FakeStore {
    let store = FakeStore::with_secrets(&[("DB_PASSWORD", "hunter2"), ("API_TOKEN", "tok-1")]);
    store.state.secrets.lock().unwrap().insert(
        DEFAULT_HASH_SECRET_NAME.to_owned(),
        hash_passphrase(passphrase).unwrap().to_string(),
    );
    store
}

fn audit_events(workspace: &Workspace) -> Vec<AuditEvent> {
    AuditLog::new(workspace.settings.paths().audit_file())
        .unwrap()
        .events()
        .unwrap()
}

#[test]
fn fresh_workspace_bootstraps_creates_and_populates() {
    let workspace = workspace();
    let host = FakeHost::default();
    let store = FakeStore::with_secrets(&[("DB_PASSWORD", "hunter2"), ("API_TOKEN", "tok-1")]);
    store.set_bulk("GLOBAL_KEY='abc'\nOTHER=\"x y\"");
    let console = ScriptedConsole::answering(&["s3cret", "s3cret"]);

    let lifecycle = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console);
    let report = lifecycle.up(&workspace.manifest, &store).unwrap();

    let UpOutcome::Provisioned {
        created,
        trust,
        sync,
    } = &report.outcome
    else {
        panic!("expected provisioning, got {:?}", report.outcome);
    };
    assert!(*created);
    assert_eq!(*trust, TrustBasis::Bootstrapped { published: true });
    assert!(sync.bulk_exported);
    assert_eq!(sync.materialized, vec!["DB_PASSWORD", "API_TOKEN"]);
    assert_eq!(sync.skipped, vec!["MISSING_ONE"]);

    assert_eq!(*store.state.login_calls.lock().unwrap(), 1);
    let published = store.set_calls();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, DEFAULT_HASH_SECRET_NAME);
    assert!(published[0].1.starts_with("$6$"));
    assert_eq!(console.prompts(), vec![PASSPHRASE_PROMPT, CONFIRM_PROMPT]);

    let paths = workspace.settings.paths();
    assert!(paths.image().is_file());
    assert!(!paths.partial_image().exists());
    assert_eq!(fs::metadata(paths.image()).unwrap().len(), 1024 * 1024);
    assert_eq!(host.count("format "), 1);
    assert_eq!(host.count("mkfs "), 1);
    assert_eq!(host.count("mount "), 1);
    assert_eq!(
        host.state.chowns.lock().unwrap().clone(),
        vec![(paths.secrets_dir(), "dev".to_owned())]
    );
    assert_eq!(host.attached().len(), 1, "kept loop device stays attached");

    let secrets = paths.secrets_dir();
    assert_eq!(fs::read_to_string(secrets.join("db_password")).unwrap(), "hunter2");
    assert_eq!(fs::read_to_string(secrets.join("tokens/api")).unwrap(), "tok-1");
    assert!(!secrets.join("missing").exists());

    let db_file = secrets.join("db_password");
    assert_eq!(
        report.lines,
        vec![format!(r#"export DB_PASSWORD_FILE="{}""#, db_file.display())]
    );

    let shell = fs::read_to_string(paths.env_file()).unwrap();
    assert!(shell.starts_with("GLOBAL_KEY='abc'\nOTHER=\"x y\"\n"));
    let shell_exports = shell
        .lines()
        .filter(|line| line.starts_with("export "))
        .map(str::to_owned)
        .collect::<Vec<_>>();
    assert_eq!(report.lines, shell_exports);
    assert_eq!(sync.bindings.count(BindingOrigin::Bulk), 2);

    let events = audit_events(&workspace);
    assert!(events.iter().any(|event| matches!(
        event,
        AuditEvent::PassphraseBootstrapped { published: true, .. }
    )));
    assert!(events
        .iter()
        .any(|event| matches!(event, AuditEvent::ContainerCreated { size_mib: 1, .. })));
    assert!(events.iter().any(|event| matches!(
        event,
        AuditEvent::SecretsSynced {
            materialized: 2,
            skipped: 1,
            ..
        }
    )));
    assert!(console
        .progress_lines()
        .iter()
        .any(|line| line == "Vault secured."));
}

#[cfg(unix)]
#[test]
fn materialized_files_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let workspace = workspace();
    let host = FakeHost::default();
    let store = FakeStore::with_secrets(&[("DB_PASSWORD", "hunter2"), ("API_TOKEN", "tok-1")]);
    let console = ScriptedConsole::answering(&["pw", "pw"]);
    VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap();

    let paths = workspace.settings.paths();
    for file in [
        paths.secrets_dir().join("db_password"),
        paths.secrets_dir().join("tokens/api"),
        paths.env_file(),
        paths.bindings_file(),
    ] {
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "{}", file.display());
    }
}

#[test]
fn existing_hash_and_container_unlock_without_publishing() {
    let workspace = workspace();
    existing_image(&workspace);
    let host = FakeHost::with_container("correct");
    let store = remote_with_hash("correct");
    let console = ScriptedConsole::answering(&["correct"]);

    let report = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap();

    assert!(matches!(
        report.outcome,
        UpOutcome::Provisioned {
            created: false,
            trust: TrustBasis::RemoteHash,
            ..
        }
    ));
    assert!(store.set_calls().is_empty());
    assert_eq!(*store.state.login_calls.lock().unwrap(), 0);
    assert_eq!(host.count("format "), 0);
    assert_eq!(host.count("mkfs "), 0);
    assert_eq!(host.count("open "), 1);
    assert_eq!(host.count("mount "), 1);
    assert_eq!(console.prompts(), vec![PASSPHRASE_PROMPT]);
}

#[test]
fn wrong_passphrases_are_reprompted_until_correct() {
    let workspace = workspace();
    existing_image(&workspace);
    let host = FakeHost::with_container("correct");
    let store = remote_with_hash("correct");
    let console = ScriptedConsole::answering(&["nope", "still nope", "wrong", "correct"]);

    let report = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap();

    assert!(matches!(report.outcome, UpOutcome::Provisioned { .. }));
    assert_eq!(console.prompts().len(), 4);
    assert_eq!(
        console
            .progress_lines()
            .iter()
            .filter(|line| *line == "Wrong passphrase.")
            .count(),
        3
    );
    assert_eq!(host.count("open "), 1, "rejected candidates never reach decryption");
}

#[test]
fn offline_mode_with_correct_passphrase_mounts() {
    let workspace = workspace();
    existing_image(&workspace);
    let host = FakeHost::with_container("local");
    let store = FakeStore::unreachable();
    let console = ScriptedConsole::answering(&["local"]);

    let report = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap();

    let UpOutcome::Provisioned { trust, sync, .. } = &report.outcome else {
        panic!("expected provisioning");
    };
    assert_eq!(*trust, TrustBasis::Offline);
    assert!(!sync.bulk_exported);
    assert!(sync.materialized.is_empty());
    assert_eq!(sync.skipped.len(), 3);
    assert_eq!(console.prompts(), vec![PASSPHRASE_PROMPT]);
    assert!(console.progress_lines().contains(&"Offline mode.".to_owned()));
    assert_eq!(*store.state.login_calls.lock().unwrap(), 0);
    assert!(report.lines.is_empty());
    assert!(audit_events(&workspace)
        .iter()
        .any(|event| matches!(event, AuditEvent::ContainerUnlocked { offline: true, .. })));
}

#[test]
fn offline_mode_with_wrong_passphrase_fails_and_detaches() {
    let workspace = workspace();
    existing_image(&workspace);
    let host = FakeHost::with_container("local");
    let store = FakeStore::unreachable();
    let console = ScriptedConsole::answering(&["guess"]);

    let error = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap_err();

    assert!(matches!(error, VaultError::DecryptionFailed));
    assert!(host.attached().is_empty(), "loop device must be detached");
    assert!(!host.is_mapping_open());
    assert_eq!(host.count("mount "), 0);
    assert!(audit_events(&workspace)
        .iter()
        .any(|event| matches!(event, AuditEvent::DecryptionFailed { .. })));
}

#[test]
fn already_mounted_only_probes_and_emits() {
    let workspace = workspace();
    let host = FakeHost::default();
    let store = FakeStore::with_secrets(&[("DB_PASSWORD", "hunter2"), ("API_TOKEN", "tok-1")]);
    store.set_bulk("GLOBAL_KEY=abc");
    let console = ScriptedConsole::answering(&["pw", "pw"]);
    let lifecycle = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console);
    let first = lifecycle.up(&workspace.manifest, &store).unwrap();

    host.clear_calls();
    let store_calls_before = store.total_calls();
    let second = lifecycle.up(&workspace.manifest, &store).unwrap();

    assert_eq!(second.outcome, UpOutcome::AlreadyMounted);
    assert_eq!(host.calls(), vec!["is_mount_point".to_owned()]);
    assert_eq!(store.total_calls(), store_calls_before);
    assert_eq!(console.remaining(), 0);
    assert_eq!(console.prompts().len(), 2);
    assert_eq!(first.lines, second.lines);
    assert_eq!(lifecycle.env().unwrap(), first.lines);
}

#[test]
fn hash_published_elsewhere_is_picked_up_after_login() {
    let workspace = workspace();
    let host = FakeHost::default();
    let store = FakeStore::default();
    *store.state.appear_on_login.lock().unwrap() = Some((
        DEFAULT_HASH_SECRET_NAME.to_owned(),
        hash_passphrase("team").unwrap().to_string(),
    ));
    let console = ScriptedConsole::answering(&["team"]);

    let report = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap();

    assert!(matches!(
        report.outcome,
        UpOutcome::Provisioned {
            created: true,
            trust: TrustBasis::RemoteHash,
            ..
        }
    ));
    assert!(store.set_calls().is_empty());
    assert_eq!(console.prompts(), vec![PASSPHRASE_PROMPT]);
}

#[test]
fn accepted_bootstrap_passphrase_verifies_on_later_runs() {
    let workspace = workspace();
    let host = FakeHost::default();
    let store = FakeStore::default();
    let console = ScriptedConsole::answering(&["chosen", "chosen"]);
    let lifecycle = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console);
    lifecycle.up(&workspace.manifest, &store).unwrap();
    lifecycle.down().unwrap();

    let later = ScriptedConsole::answering(&["other", "chosen"]);
    let report = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &later)
        .up(&workspace.manifest, &store)
        .unwrap();

    assert!(matches!(
        report.outcome,
        UpOutcome::Provisioned {
            created: false,
            trust: TrustBasis::RemoteHash,
            ..
        }
    ));
    assert_eq!(later.prompts().len(), 2);
    assert_eq!(store.set_calls().len(), 1);
}

#[test]
fn mount_failure_releases_transient_devices() {
    let workspace = workspace();
    existing_image(&workspace);
    let host = FakeHost::with_container("correct");
    *host.state.fail_mount.lock().unwrap() = true;
    let store = remote_with_hash("correct");
    let console = ScriptedConsole::answering(&["correct"]);

    let error = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap_err();

    assert!(matches!(error, VaultError::CommandFailed { ref program, .. } if program == "mount"));
    assert!(host.attached().is_empty());
    assert!(!host.is_mapping_open());
    assert_eq!(*store.state.bulk_calls.lock().unwrap(), 0);
}

#[test]
fn stale_mapping_is_closed_before_unlock() {
    let workspace = workspace();
    existing_image(&workspace);
    let host = FakeHost::with_container("correct");
    let lifecycle_probe = VaultLifecycle::new(
        &workspace.settings,
        &workspace.cwd,
        &host,
        &ScriptedConsole::default(),
    )
    .mapper()
    .clone();
    host.mark_mapping_open(&lifecycle_probe);
    host.attach_loop(&workspace.settings.paths().image());
    let store = remote_with_hash("correct");
    let console = ScriptedConsole::answering(&["correct"]);

    VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap();

    let calls = host.calls();
    let close_at = calls.iter().position(|call| call.starts_with("close ")).unwrap();
    let open_at = calls.iter().position(|call| call.starts_with("open ")).unwrap();
    assert!(close_at < open_at);
    assert_eq!(host.attached().len(), 1, "stale loop device was detached");
}

#[test]
fn down_unmounts_closes_and_is_repeatable() {
    let workspace = workspace();
    let host = FakeHost::default();
    let store = FakeStore::default();
    let console = ScriptedConsole::answering(&["pw", "pw"]);
    let lifecycle = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console);
    lifecycle.up(&workspace.manifest, &store).unwrap();

    assert!(lifecycle.down().unwrap());
    assert!(host.attached().is_empty());
    assert!(!host.is_mapping_open());
    assert_eq!(host.count("umount "), 1);

    assert!(!lifecycle.down().unwrap());
    assert_eq!(host.count("umount "), 1);
    assert!(console
        .progress_lines()
        .iter()
        .filter(|line| *line == "Vault locked.")
        .count()
        == 2);
    assert!(audit_events(&workspace)
        .iter()
        .any(|event| matches!(event, AuditEvent::VaultLocked { was_mounted: true, .. })));
}

#[test]
fn down_on_untouched_workspace_is_tolerant() {
    let workspace = workspace();
    let host = FakeHost::default();
    let console = ScriptedConsole::default();

    let removed = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .down()
        .unwrap();

    assert!(!removed);
    assert_eq!(host.count("umount "), 0);
    assert_eq!(host.count("close "), 0);
}

#[test]
fn down_from_another_workspace_reports_held_image() {
    let workspace = workspace();
    let host = FakeHost::default();
    let store = FakeStore::default();
    let console = ScriptedConsole::answering(&["pw", "pw"]);
    VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .up(&workspace.manifest, &store)
        .unwrap();

    *host.state.busy_loops.lock().unwrap() = true;
    let other_cwd = workspace.cwd.with_file_name("other-project");
    let other_console = ScriptedConsole::default();
    assert!(VaultLifecycle::new(&workspace.settings, &other_cwd, &host, &other_console)
        .down()
        .unwrap());

    assert!(other_console
        .progress_lines()
        .iter()
        .any(|line| line.starts_with("Vault image is still attached")));
    assert!(host.is_mapping_open());
}

#[test]
fn env_before_any_up_is_empty() {
    let workspace = workspace();
    let host = FakeHost::default();
    let console = ScriptedConsole::default();
    let lines = VaultLifecycle::new(&workspace.settings, &workspace.cwd, &host, &console)
        .env()
        .unwrap();
    assert!(lines.is_empty());
    assert!(host.calls().is_empty());
}
