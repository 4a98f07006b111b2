use std::io;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`TkvsError`]
pub type Result<T> = std::result::Result<T, TkvsError>;

/// Error variants used throughout the store.
///
/// The protocol-facing variants map onto the three response paths a session
/// can take: `InvalidMessage` becomes an ERROR response followed by
/// disconnect, `Operation` and `FailedTransaction` become FAILED responses
/// (rolling back any open transaction first), and `Comm` ends the session
/// silently.
#[derive(Error)]
pub enum TkvsError {
    /// the peer violated the wire protocol; the session cannot continue
    #[error("{}", .0)]
    InvalidMessage(String),

    /// a well-formed command could not be carried out; the session continues
    #[error("{}", .0)]
    Operation(String),

    /// a transaction could not proceed and has been rolled back
    #[error("{}", .0)]
    FailedTransaction(String),

    /// variant for I/O errors on the client socket
    #[error("communication error")]
    Comm {
        /// source of the I/O error
        #[from]
        source: io::Error,
    },

    /// variant for errors when parsing command line arguments to some other type
    #[error("{}", .0)]
    Parsing(String),
}

/// a custom Debug implementation that will write the entire error chain
impl std::fmt::Debug for TkvsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// writes the entire error chain of the given error `e`, to the formatter.
fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by: {}", cause)?;
        current = cause.source();
    }
    Ok(())
}
