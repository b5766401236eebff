use std::fmt;

use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha_crypt::{sha512_crypt_b64, Sha512Params};

use crate::{
    console::Console,
    error::{Result, VaultError},
    store::SecretStore,
};

/// Prompt shown for every passphrase entry.
pub const PASSPHRASE_PROMPT: &str = "Enter master passphrase: ";
/// Prompt shown for the bootstrap confirmation.
pub const CONFIRM_PROMPT: &str = "Confirm master passphrase: ";

const SHA512_SCHEME: &str = "6";
const ROUNDS_PREFIX: &str = "rounds=";
const SALT_LEN: usize = 16;
const CRYPT_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Parsed `$6$[rounds=N$]<salt>$<digest>` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassphraseHash {
    rounds: Option<u32>,
    salt: String,
    digest: String,
}

impl PassphraseHash {
    /// Parses a stored crypt string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let unsupported = || VaultError::UnsupportedHash(scheme_label(raw));
        let fields = raw.split('$').collect::<Vec<_>>();
        if fields.first() != Some(&"") || fields.get(1) != Some(&SHA512_SCHEME) {
            return Err(unsupported());
        }

        let (rounds, salt, digest) = match fields.as_slice() {
            [_, _, salt, digest] => (None, *salt, *digest),
            [_, _, rounds, salt, digest] => {
                let count = rounds
                    .strip_prefix(ROUNDS_PREFIX)
                    .and_then(|value| value.parse::<u32>().ok())
                    .ok_or_else(unsupported)?;
                (Some(count), *salt, *digest)
            }
            _ => return Err(unsupported()),
        };
        if salt.is_empty() || digest.is_empty() {
            return Err(unsupported());
        }
        Ok(Self {
            rounds,
            salt: salt.to_owned(),
            digest: digest.to_owned(),
        })
    }

    /// Salt embedded in the record.
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Explicit round count, when the record carries one.
    pub fn rounds(&self) -> Option<u32> {
        self.rounds
    }

    /// Hashes `passphrase` with this record's salt and rounds and compares.
    pub fn matches(&self, passphrase: &str) -> Result<bool> {
        let candidate = crypt_sha512(passphrase, &self.salt, self.rounds)?;
        Ok(candidate == *self)
    }
}

impl fmt::Display for PassphraseHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${SHA512_SCHEME}$")?;
        if let Some(rounds) = self.rounds {
            write!(f, "{ROUNDS_PREFIX}{rounds}$")?;
        }
        write!(f, "{}${}", self.salt, self.digest)
    }
}

/// Hashes a new passphrase with a fresh random salt.
pub fn hash_passphrase(passphrase: &str) -> Result<PassphraseHash> {
    crypt_sha512(passphrase, &generate_salt(), None)
}

/// Checks a candidate against a stored record.
pub fn verify_passphrase(passphrase: &str, stored: &str) -> Result<bool> {
    PassphraseHash::parse(stored)?.matches(passphrase)
}

fn crypt_sha512(passphrase: &str, salt: &str, rounds: Option<u32>) -> Result<PassphraseHash> {
    let params = match rounds {
        Some(count) => Sha512Params::new(count as usize).map_err(|error| {
            VaultError::UnsupportedHash(format!("invalid rounds {count}: {error:?}"))
        })?,
        None => Sha512Params::default(),
    };
    let digest = sha512_crypt_b64(passphrase.as_bytes(), salt.as_bytes(), &params)
        .map_err(|error| VaultError::UnsupportedHash(format!("sha512-crypt: {error:?}")))?;
    Ok(PassphraseHash {
        rounds,
        salt: salt.to_owned(),
        digest,
    })
}

fn generate_salt() -> String {
    let mut bytes = [0_u8; SALT_LEN];
    rand::thread_rng().fill(&mut bytes);
    bytes
        .iter()
        .map(|byte| CRYPT_ALPHABET[usize::from(byte % 64)] as char)
        .collect()
}

fn scheme_label(raw: &str) -> String {
    match raw.split('$').nth(1) {
        Some(scheme) if raw.starts_with('$') && !scheme.is_empty() => format!("scheme `{scheme}`"),
        _ => "not a crypt string".to_owned(),
    }
}

/// How trust in the returned passphrase was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustBasis {
    /// Matched the remotely stored hash.
    RemoteHash,
    /// Chosen now; its hash was offered to the remote store.
    Bootstrapped {
        /// The create-if-absent write stored the record.
        published: bool,
    },
    /// Unverified; decryption of the existing container decides.
    Offline,
}

/// Plaintext passphrase the caller uses to open or create the container.
pub struct VerifiedPassphrase {
    passphrase: SecretString,
    basis: TrustBasis,
}

impl VerifiedPassphrase {
    /// Exposes the plaintext.
    pub fn expose(&self) -> &str {
        self.passphrase.expose_secret()
    }

    /// Trust basis.
    pub fn basis(&self) -> TrustBasis {
        self.basis
    }
}

impl fmt::Debug for VerifiedPassphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedPassphrase")
            .field("basis", &self.basis)
            .finish_non_exhaustive()
    }
}

/// Establishes trust in a user-supplied passphrase.
///
/// The verifier reads the remote hash record, bootstraps it on a fresh
/// workspace and falls back to offline mode when only a local container
/// exists. It never opens the container itself.
pub struct PassphraseVerifier<'a, S: ?Sized, C: ?Sized> {
    store: &'a S,
    console: &'a C,
    hash_secret_name: &'a str,
}

impl<'a, S, C> PassphraseVerifier<'a, S, C>
where
    S: SecretStore + ?Sized,
    C: Console + ?Sized,
{
    /// Constructs a verifier.
    pub fn new(store: &'a S, console: &'a C, hash_secret_name: &'a str) -> Self {
        Self {
            store,
            console,
            hash_secret_name,
        }
    }

    /// Runs the prompt loop until a usable passphrase is obtained.
    pub fn establish(&self, container_exists: bool) -> Result<VerifiedPassphrase> {
        let mut remote = self.fetch_hash();
        if remote.is_none() {
            if container_exists {
                self.console.progress("Offline mode.");
            } else {
                self.console.progress("Setup: remote login required...");
                self.store.interactive_login()?;
                remote = self.fetch_hash();
            }
        }

        let remote = remote.map(|raw| PassphraseHash::parse(&raw)).transpose()?;
        loop {
            let candidate = self.console.read_secret(PASSPHRASE_PROMPT)?;
            match &remote {
                Some(hash) => {
                    if hash.matches(candidate.expose_secret())? {
                        return Ok(VerifiedPassphrase {
                            passphrase: candidate,
                            basis: TrustBasis::RemoteHash,
                        });
                    }
                    self.console.progress("Wrong passphrase.");
                }
                None if container_exists => {
                    return Ok(VerifiedPassphrase {
                        passphrase: candidate,
                        basis: TrustBasis::Offline,
                    });
                }
                None => {
                    let confirmation = self.console.read_secret(CONFIRM_PROMPT)?;
                    if candidate.expose_secret() != confirmation.expose_secret() {
                        self.console.progress("No match.");
                        continue;
                    }
                    if candidate.expose_secret().is_empty() {
                        self.console.progress("Passphrase cannot be empty.");
                        continue;
                    }
                    let published = self.publish(candidate.expose_secret())?;
                    return Ok(VerifiedPassphrase {
                        passphrase: candidate,
                        basis: TrustBasis::Bootstrapped { published },
                    });
                }
            }
        }
    }

    fn fetch_hash(&self) -> Option<String> {
        match self.store.get_secret(self.hash_secret_name) {
            Ok(value) => value.filter(|raw| !raw.trim().is_empty()),
            Err(error) => {
                tracing::warn!(%error, "passphrase hash lookup failed");
                None
            }
        }
    }

    fn publish(&self, passphrase: &str) -> Result<bool> {
        let record = hash_passphrase(passphrase)?.to_string();
        match self
            .store
            .set_secret_if_absent(self.hash_secret_name, &record)
        {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.console
                    .progress("Remote passphrase hash already exists; keeping the stored record.");
                Ok(false)
            }
            Err(error) => {
                tracing::warn!(%error, "publishing passphrase hash failed");
                self.console
                    .progress("Could not publish passphrase hash; continuing locally.");
                Ok(false)
            }
        }
    }
}
