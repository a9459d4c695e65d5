//! Destination folder handling.
//!
//! Before a run, [`prepare_destination`] asks the caller's
//! [`ConfirmationPolicy`] whether to write into a non-empty folder or create
//! a missing one. During the run a [`DocumentSink`] receives each document.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use sso_shared::{AssembledDocument, Result, SsoError, sanitize_shorthand};

/// Files that do not count as existing content.
const IGNORED_ENTRIES: &[&str] = &[".gitignore"];

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/// A question put to the operator about the destination folder.
#[derive(Debug)]
pub enum DestinationPrompt<'a> {
    /// The folder already holds files that may be overwritten.
    NonEmpty {
        path: &'a Path,
        existing: Vec<String>,
    },
    /// The folder does not exist yet.
    Missing { path: &'a Path },
}

impl std::fmt::Display for DestinationPrompt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonEmpty { path, existing } => {
                writeln!(
                    f,
                    "Target save location {} contains existing files, which may be overwritten. Files:",
                    path.display()
                )?;
                for name in existing {
                    writeln!(f, "\t{name}")?;
                }
                write!(f, "Continue?")
            }
            Self::Missing { path } => write!(
                f,
                "Target save location {} does not exist! Create folder?",
                path.display()
            ),
        }
    }
}

/// Decides whether a run may proceed into its destination.
pub trait ConfirmationPolicy: Send + Sync {
    fn confirm(&self, prompt: &DestinationPrompt<'_>) -> bool;
}

/// Always proceed.
pub struct AutoAccept;

impl ConfirmationPolicy for AutoAccept {
    fn confirm(&self, _prompt: &DestinationPrompt<'_>) -> bool {
        true
    }
}

/// Never proceed when a question has to be asked.
pub struct AutoReject;

impl ConfirmationPolicy for AutoReject {
    fn confirm(&self, _prompt: &DestinationPrompt<'_>) -> bool {
        false
    }
}

/// Delegates to a closure, e.g. an interactive terminal prompt.
pub struct CallbackPolicy<F>(F);

impl<F> CallbackPolicy<F>
where
    F: Fn(&DestinationPrompt<'_>) -> bool + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<F> ConfirmationPolicy for CallbackPolicy<F>
where
    F: Fn(&DestinationPrompt<'_>) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &DestinationPrompt<'_>) -> bool {
        (self.0)(prompt)
    }
}

/// Validate the destination folder, asking `policy` when needed.
///
/// An empty folder (or one holding only `.gitignore`) is used as-is. A
/// declined prompt is [`SsoError::UserAbort`].
pub fn prepare_destination(path: &Path, policy: &dyn ConfirmationPolicy) -> Result<()> {
    if path.is_dir() {
        let existing = existing_entries(path)?;
        if existing.is_empty() {
            debug!(path = %path.display(), "destination is empty");
            return Ok(());
        }

        let count = existing.len();
        if policy.confirm(&DestinationPrompt::NonEmpty { path, existing }) {
            info!(path = %path.display(), existing = count, "writing into non-empty destination");
            Ok(())
        } else {
            Err(SsoError::UserAbort(format!(
                "declined to overwrite files in {}",
                path.display()
            )))
        }
    } else if path.exists() {
        Err(SsoError::config(format!(
            "destination {} exists and is not a directory",
            path.display()
        )))
    } else if policy.confirm(&DestinationPrompt::Missing { path }) {
        std::fs::create_dir_all(path).map_err(|e| SsoError::io(path, e))?;
        info!(path = %path.display(), "created destination folder");
        Ok(())
    } else {
        Err(SsoError::UserAbort(format!(
            "declined to create {}",
            path.display()
        )))
    }
}

fn existing_entries(path: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(path).map_err(|e| SsoError::io(path, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SsoError::io(path, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !IGNORED_ENTRIES.contains(&name.as_str()) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives finished documents.
pub trait DocumentSink: Send + Sync {
    /// Persist `document`, returning where it went.
    fn write(&self, document: &AssembledDocument) -> Result<PathBuf>;
}

/// Writes each document to `{root}/{shorthand}.html`.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, shorthand: &str) -> PathBuf {
        self.root.join(format!("{}.html", sanitize_shorthand(shorthand)))
    }
}

impl DocumentSink for DirectorySink {
    fn write(&self, document: &AssembledDocument) -> Result<PathBuf> {
        let target = self.path_for(&document.shorthand);
        let temp = self
            .root
            .join(format!(".{}.html.tmp", sanitize_shorthand(&document.shorthand)));

        let content = match &document.subsidiary_link {
            Some(link) => format!("Subsidiary Legislation Link: {link}\n{}", document.html),
            None => document.html.clone(),
        };

        // Write to temp file first, then rename over the target
        std::fs::write(&temp, content).map_err(|e| SsoError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| SsoError::io(&target, e))?;

        debug!(path = %target.display(), bytes = document.html.len(), "document written");
        Ok(target)
    }
}
