//! Build errors
//!
//! Every failure aborts the whole build; there is no partial bundle.

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Errors raised while discovering, compiling or checking the module graph
#[derive(Debug, Error)]
pub enum BuildError {
    /// A specifier (or the entry path) could not be mapped to a readable file
    #[error("cannot resolve '{specifier}'{}: {reason}", importer_suffix(.importer.as_ref()))]
    Resolution {
        specifier: String,
        /// Module that wrote the import, `None` for the entry
        importer: Option<PathBuf>,
        reason: String,
    },

    /// The compiler could not produce specifiers and code for a module
    #[error("failed to parse {}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A circular import that the selected runtime cannot execute
    #[error("circular dependency detected: {}", CycleChain(.chain))]
    Cycle { chain: Vec<PathBuf> },

    /// The module graph broke one of its own invariants
    #[error("inconsistent module graph: {message}")]
    InvalidGraph { message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn resolution(
        specifier: impl Into<String>,
        importer: Option<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            importer,
            reason: reason.into(),
        }
    }

    pub fn invalid_graph(message: impl Into<String>) -> Self {
        Self::InvalidGraph {
            message: message.into(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

fn importer_suffix(importer: Option<&PathBuf>) -> String {
    importer
        .map(|path| format!(" imported from {}", path.display()))
        .unwrap_or_default()
}

/// Renders `a.js -> b.js -> a.js`
struct CycleChain<'a>(&'a [PathBuf]);

impl fmt::Display for CycleChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, path) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}
