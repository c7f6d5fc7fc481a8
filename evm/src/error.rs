use std::{fmt, process::ExitCode};

use error_stack::Report;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// The chain changed between two fetches that must observe the same state.
    ///
    /// This is the only error retried by the hot path.
    Consistency,
    /// A collaborator returned data that breaks its contract.
    Protocol,
    /// Node RPC request failed.
    Rpc,
    /// Archive gateway request failed.
    Archive,
    /// Fork navigation failed.
    Navigation,
    /// Invalid configuration or request.
    Configuration,
    /// Fatal error. Should not retry.
    Fatal,
}

pub type Result<T> = error_stack::Result<T, DataSourceError>;

pub trait DataSourceErrorExt {
    /// Returns true if the error is a retryable inconsistency.
    ///
    /// The frame stack is scanned from the most recent context. `Fatal` and `Protocol` frames
    /// stop the search, other contexts are looked through.
    fn is_consistency_error(&self) -> bool;
}

impl DataSourceError {
    /// Creates a consistency error for the block with the given name.
    pub fn consistency(block: impl fmt::Display) -> Report<Self> {
        Report::new(DataSourceError::Consistency).attach_printable(format!(
            "seems like the chain node navigated to another branch while we were fetching block {block}"
        ))
    }
}

impl DataSourceErrorExt for Report<DataSourceError> {
    fn is_consistency_error(&self) -> bool {
        for frame in self.frames() {
            match frame.downcast_ref::<DataSourceError>() {
                Some(DataSourceError::Consistency) => return true,
                Some(DataSourceError::Fatal | DataSourceError::Protocol) => return false,
                _ => {}
            }
        }
        false
    }
}

impl error_stack::Context for DataSourceError {}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::Consistency => f.write_str("data source error: consistency"),
            DataSourceError::Protocol => f.write_str("data source error: protocol violation"),
            DataSourceError::Rpc => f.write_str("data source error: rpc request"),
            DataSourceError::Archive => f.write_str("data source error: archive request"),
            DataSourceError::Navigation => f.write_str("data source error: fork navigation"),
            DataSourceError::Configuration => f.write_str("data source error: configuration"),
            DataSourceError::Fatal => f.write_str("data source error: fatal"),
        }
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.current_context() {
                    DataSourceError::Configuration => ExitCode::from(78),
                    DataSourceError::Protocol => ExitCode::from(76),
                    _ => ExitCode::FAILURE,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use error_stack::{Report, ResultExt};

    use super::{DataSourceError, DataSourceErrorExt};

    #[derive(Debug)]
    struct Wrapper;

    impl error_stack::Context for Wrapper {}

    impl std::fmt::Display for Wrapper {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("wrapper")
        }
    }

    #[test]
    fn test_consistency_is_detected_through_other_contexts() {
        let err = Err::<(), _>(DataSourceError::consistency(10))
            .change_context(Wrapper)
            .change_context(DataSourceError::Navigation)
            .unwrap_err();
        assert!(err.is_consistency_error());
    }

    #[test]
    fn test_fatal_hides_consistency() {
        let err = DataSourceError::consistency(10).change_context(DataSourceError::Fatal);
        assert!(!err.is_consistency_error());

        let err = Report::new(DataSourceError::Rpc);
        assert!(!err.is_consistency_error());
    }
}
