//! Errors raised while loading rule databases and dispatching requests.

use std::path::PathBuf;

/// A rule database could not be (fully) loaded.
///
/// Entries parsed before the failure stay in the index; only the remainder of
/// the offending file is dropped.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read rule database {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin} is not a magic database (bad signature)")]
    BadSignature { origin: String },

    #[error(
        "malformed rule database {origin} in section {section:?}: {reason} \
         ({sections_loaded} sections kept)"
    )]
    Malformed {
        origin: String,
        section: Option<String>,
        reason: String,
        sections_loaded: usize,
    },
}

impl LoadError {
    /// Number of entries that were kept despite the error.
    pub fn sections_loaded(&self) -> usize {
        match self {
            LoadError::Malformed {
                sections_loaded, ..
            } => *sections_loaded,
            _ => 0,
        }
    }
}

/// Errors from the request dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request dispatcher has been shut down")]
    Closed,
}
