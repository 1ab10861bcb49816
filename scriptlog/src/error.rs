/// Error type for the collaborators the engine drives: connections, sources, script runners,
/// changelog stores and hooks.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(rusqlite::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A single statement of a script failed.
    #[error("Error executing: {statement}.  Cause: {source}")]
    Statement {
        statement: String,
        #[source]
        source: Box<Error>,
    },
    /// A failure reported by a nested operation, e.g. a hook that runs another migration.
    #[error("{0}")]
    Migration(Box<MigrationError>),
    #[error("{0}")]
    Generic(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(value)
    }
}

impl From<MigrationError> for Error {
    fn from(value: MigrationError) -> Self {
        Self::Migration(Box::new(value))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

impl Error {
    /// Strip every [MigrationError::Execution] layer, returning the first cause that is not one.
    pub fn into_root_cause(self) -> Error {
        let mut current = self;
        loop {
            match current {
                Error::Migration(inner) => match *inner {
                    MigrationError::Execution(cause) => current = cause,
                    other => return Error::Migration(Box::new(other)),
                },
                other => return other,
            }
        }
    }
}

// Manual PartialEq implementation because std::io::Error doesn't implement PartialEq
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            #[cfg(feature = "sqlite")]
            (Self::Rusqlite(a), Self::Rusqlite(b)) => a == b,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind() && a.to_string() == b.to_string(),
            (
                Self::Statement {
                    statement: a,
                    source: a_source,
                },
                Self::Statement {
                    statement: b,
                    source: b_source,
                },
            ) => a == b && a_source == b_source,
            (Self::Migration(a), Self::Migration(b)) => a == b,
            (Self::Generic(a), Self::Generic(b)) => a == b,
            _ => false,
        }
    }
}

/// The error returned by every migration operation.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MigrationError {
    /// The changelog table is missing, so nothing can be reconciled against it.
    #[error(
        "Change log doesn't exist, no migrations applied.  Try running 'up' instead. \
        If you manage the change log in a separate db, the log table has to be created manually."
    )]
    ChangelogMissing,
    /// Applying the batch failed. Holds the innermost underlying cause.
    #[error("Error executing command.  Cause: {0}")]
    Execution(#[source] Error),
}

impl MigrationError {
    /// Wrap `cause` exactly once, flattening any execution errors already inside it.
    pub fn execution(cause: impl Into<Error>) -> Self {
        Self::Execution(cause.into().into_root_cause())
    }

    /// The underlying cause of an execution failure.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            Self::Execution(cause) => Some(cause),
            Self::ChangelogMissing => None,
        }
    }
}

impl From<Error> for MigrationError {
    fn from(value: Error) -> Self {
        Self::execution(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_wraps_plain_cause_once() {
        let err = MigrationError::execution(Error::Generic("boom".to_string()));
        assert_eq!(err, MigrationError::Execution(Error::Generic("boom".to_string())));
        assert_eq!(err.to_string(), "Error executing command.  Cause: boom");
    }

    #[test]
    fn execution_flattens_nested_wrappers() {
        let inner = MigrationError::execution(Error::Generic("disk full".to_string()));
        let middle = MigrationError::execution(inner);
        let outer = MigrationError::execution(middle);
        assert_eq!(
            outer,
            MigrationError::Execution(Error::Generic("disk full".to_string()))
        );
        assert_eq!(outer.to_string(), "Error executing command.  Cause: disk full");
    }

    #[test]
    fn execution_keeps_nested_prerequisite_error() {
        let err = MigrationError::execution(MigrationError::ChangelogMissing);
        assert_eq!(
            err,
            MigrationError::Execution(Error::Migration(Box::new(
                MigrationError::ChangelogMissing
            )))
        );
    }

    #[test]
    fn statement_error_names_statement() {
        let err = Error::Statement {
            statement: "DROP TABLE nope".to_string(),
            source: Box::new(Error::Generic("no such table: nope".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Error executing: DROP TABLE nope.  Cause: no such table: nope"
        );
    }

    #[test]
    fn cause_is_absent_for_prerequisite_error() {
        assert!(MigrationError::ChangelogMissing.cause().is_none());
        let err = MigrationError::execution(Error::Generic("x".to_string()));
        assert_eq!(err.cause(), Some(&Error::Generic("x".to_string())));
    }
}
