use std::fs;

use crate::{
    error::Result,
    fs_secure::write_private_file_atomic,
    manifest::is_env_identifier,
    paths::VaultPaths,
};

/// Prefix marking a shell assignment line.
pub const EXPORT_MARKER: &str = "export ";

/// Where a binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingOrigin {
    /// A line of the bulk dotenv export; the value is the secret itself.
    Bulk,
    /// A manifest entry; the value is the materialized file path.
    Entry,
}

/// One environment variable assignment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnvBinding {
    /// Variable name.
    pub name: String,
    /// Assigned value.
    pub value: String,
    /// Source of the binding.
    pub origin: BindingOrigin,
    /// Export line as written to the shell file, when it carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
}

impl EnvBinding {
    /// Renders `export NAME="value"` with the value safely double-quoted.
    pub fn render(&self) -> String {
        format!("{EXPORT_MARKER}{}=\"{}\"", self.name, escape_double_quoted(&self.value))
    }
}

/// Ordered binding list persisted next to the shell file.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnvBindings {
    /// Bindings in emission order: bulk block first, then entries.
    pub bindings: Vec<EnvBinding>,
}

impl EnvBindings {
    /// Appends one binding.
    ///
    /// Entry bindings get a rendered export line. Bulk bindings added this
    /// way have none; only [`parse_dotenv`] keeps bulk export lines.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>, origin: BindingOrigin) {
        let mut binding = EnvBinding {
            name: name.into(),
            value: value.into(),
            origin,
            line: None,
        };
        if origin == BindingOrigin::Entry {
            binding.line = Some(binding.render());
        }
        self.bindings.push(binding);
    }

    /// Export lines in shell-file order.
    pub fn export_lines(&self) -> Vec<String> {
        self.bindings
            .iter()
            .filter_map(|binding| binding.line.clone())
            .collect()
    }

    /// Number of bindings with `origin`.
    pub fn count(&self, origin: BindingOrigin) -> usize {
        self.bindings
            .iter()
            .filter(|binding| binding.origin == origin)
            .count()
    }
}

/// Parses dotenv `KEY=VALUE` lines into bulk bindings.
///
/// Comments, blank lines and invalid keys are skipped. An `export ` prefix
/// and one pair of matching surrounding quotes are removed from the value.
/// A raw line that starts with the export marker is kept verbatim as the
/// binding's export line.
pub fn parse_dotenv(raw: &str) -> Vec<EnvBinding> {
    raw.lines()
        .filter_map(|raw_line| {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix(EXPORT_MARKER).unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if !is_env_identifier(key) {
                return None;
            }
            Some(EnvBinding {
                name: key.to_owned(),
                value: strip_quotes(value.trim()).to_owned(),
                origin: BindingOrigin::Bulk,
                line: raw_line
                    .starts_with(EXPORT_MARKER)
                    .then(|| raw_line.to_owned()),
            })
        })
        .collect()
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        if matches!(character, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

/// Writes the shell binding file and its structured twin.
///
/// The shell file starts with the raw bulk export, followed by the export
/// line of every entry binding. The export-prefixed lines of the shell file
/// and [`EnvBindings::export_lines`] are the same list.
pub fn write_binding_files(
    paths: &VaultPaths,
    bulk_raw: Option<&str>,
    bindings: &EnvBindings,
) -> Result<()> {
    let mut shell = String::new();
    if let Some(raw) = bulk_raw {
        shell.push_str(raw);
        if !raw.ends_with('\n') {
            shell.push('\n');
        }
    }
    for line in bindings
        .bindings
        .iter()
        .filter(|binding| binding.origin == BindingOrigin::Entry)
        .filter_map(|binding| binding.line.as_deref())
    {
        shell.push_str(line);
        shell.push('\n');
    }
    write_private_file_atomic(&paths.env_file(), shell.as_bytes())?;
    write_private_file_atomic(&paths.bindings_file(), &serde_json::to_vec_pretty(bindings)?)?;
    Ok(())
}

/// Re-emits previously written bindings. Never mutates anything.
pub struct EnvEmitter<'a> {
    paths: &'a VaultPaths,
}

impl<'a> EnvEmitter<'a> {
    /// Constructs an emitter over the vault layout.
    pub fn new(paths: &'a VaultPaths) -> Self {
        Self { paths }
    }

    /// Export lines for the calling shell; empty when nothing was written.
    pub fn lines(&self) -> Result<Vec<String>> {
        let structured = self.paths.bindings_file();
        if structured.is_file() {
            let bindings: EnvBindings = serde_json::from_slice(&fs::read(&structured)?)?;
            return Ok(bindings.export_lines());
        }

        let shell = self.paths.env_file();
        if !shell.is_file() {
            return Ok(Vec::new());
        }
        Ok(fs::read_to_string(&shell)?
            .lines()
            .filter(|line| line.starts_with(EXPORT_MARKER))
            .map(str::to_owned)
            .collect())
    }
}
