use std::fmt;

/// Machine-readable error codes surfaced to the host application and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ProjectLoadFailed,
    ConfigParseError,
    TableNotFound,
    RowNotFound,
    ColumnNotFound,
    DocumentNotFound,
    BlockNotFound,
    VariantNotFound,
    IndexOutOfRange,
    InvalidCommand,
    EvaluationFailed,
    ProjectSaveFailed,
    LockContention,
    ExportFailed,
    WorkerClosed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ProjectLoadFailed => "E1001",
            Self::ConfigParseError => "E1002",
            Self::TableNotFound => "E2001",
            Self::RowNotFound => "E2002",
            Self::ColumnNotFound => "E2003",
            Self::DocumentNotFound => "E2004",
            Self::BlockNotFound => "E2005",
            Self::VariantNotFound => "E2006",
            Self::IndexOutOfRange => "E2007",
            Self::InvalidCommand => "E2008",
            Self::EvaluationFailed => "E4001",
            Self::ProjectSaveFailed => "E5001",
            Self::LockContention => "E5002",
            Self::ExportFailed => "E5003",
            Self::WorkerClosed => "E9002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ProjectLoadFailed => "Project file could not be loaded",
            Self::ConfigParseError => "Config file parse error",
            Self::TableNotFound => "Table not found",
            Self::RowNotFound => "Row not found",
            Self::ColumnNotFound => "Column not found",
            Self::DocumentNotFound => "Document not found",
            Self::BlockNotFound => "Block not found",
            Self::VariantNotFound => "Variant not found",
            Self::IndexOutOfRange => "Index out of range",
            Self::InvalidCommand => "Command does not match project state",
            Self::EvaluationFailed => "Formula evaluation failed",
            Self::ProjectSaveFailed => "Project save failed",
            Self::LockContention => "Lock contention",
            Self::ExportFailed => "Derived export failed",
            Self::WorkerClosed => "Persistence worker is not running",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ProjectLoadFailed => Some("Check that the file exists and is a tessera project."),
            Self::ConfigParseError => Some("Fix syntax in .tessera/config.toml and retry."),
            Self::TableNotFound
            | Self::RowNotFound
            | Self::ColumnNotFound
            | Self::DocumentNotFound
            | Self::BlockNotFound
            | Self::VariantNotFound => None,
            Self::IndexOutOfRange | Self::InvalidCommand => {
                Some("The command was built against a different project state; rebuild it.")
            }
            Self::EvaluationFailed => {
                Some("Fix the reported formula; previous values stay visible until then.")
            }
            Self::ProjectSaveFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Another process is saving this project; retry shortly."),
            Self::ExportFailed => Some("The export is retried automatically after a delay."),
            Self::WorkerClosed => Some("Reopen the project to restart background persistence."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ProjectLoadFailed,
            ErrorCode::ConfigParseError,
            ErrorCode::TableNotFound,
            ErrorCode::RowNotFound,
            ErrorCode::ColumnNotFound,
            ErrorCode::DocumentNotFound,
            ErrorCode::BlockNotFound,
            ErrorCode::VariantNotFound,
            ErrorCode::IndexOutOfRange,
            ErrorCode::InvalidCommand,
            ErrorCode::EvaluationFailed,
            ErrorCode::ProjectSaveFailed,
            ErrorCode::LockContention,
            ErrorCode::ExportFailed,
            ErrorCode::WorkerClosed,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::EvaluationFailed.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }
}
