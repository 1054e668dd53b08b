use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::{sql::SqlError, types::PageNo};

/// The structural element that failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CorruptField {
    Header,
    PageSize,
    ReservedBytes,
    PageNumber,
    PageType,
    ShortRead,
    CellPointer,
    PayloadSize,
    Rowid,
    LocalPayload,
    OverflowPage,
    SerialType,
    Payload,
    PageCycle,
    Depth,
    Cipher,
    Wal,
}

impl CorruptField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorruptField::Header => "Header",
            CorruptField::PageSize => "PageSize",
            CorruptField::ReservedBytes => "ReservedBytes",
            CorruptField::PageNumber => "PageNumber",
            CorruptField::PageType => "PageType",
            CorruptField::ShortRead => "ShortRead",
            CorruptField::CellPointer => "CellPointer",
            CorruptField::PayloadSize => "PayloadSize",
            CorruptField::Rowid => "Rowid",
            CorruptField::LocalPayload => "LocalPayload",
            CorruptField::OverflowPage => "OverflowPage",
            CorruptField::SerialType => "SerialType",
            CorruptField::Payload => "Payload",
            CorruptField::PageCycle => "PageCycle",
            CorruptField::Depth => "Depth",
            CorruptField::Cipher => "Cipher",
            CorruptField::Wal => "Wal",
        }
    }
}

impl fmt::Display for CorruptField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far an error reaches. Ordered from harmless to run-aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    None,
    /// Warnings and contained corruption.
    Ignorable,
    /// A source-level failure that does not endanger the whole run.
    Normal,
    /// I/O, allocation or locking failures. Aborts the run.
    Critical,
}

#[derive(Error, Debug)]
pub enum RepairError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted page {page}: {field} ({detail})")]
    Corruption {
        page: PageNo,
        field: CorruptField,
        detail: String,
    },

    #[error("Material is corrupted: {element}")]
    MaterialCorrupt { element: &'static str },

    #[error("Element of material is empty: {element}")]
    MaterialEmpty { element: &'static str },

    #[error("File is not a database: {path}")]
    NotADatabase { path: String },

    #[error("Database file is empty: {path}")]
    EmptyFile { path: String },

    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    #[error("Lock error: {details}")]
    Lock { details: String },

    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Crawl was interrupted")]
    Interrupted,

    #[error("Nothing could be recovered")]
    NothingRecovered,
}

impl RepairError {
    pub fn corruption(page: PageNo, field: CorruptField, detail: impl Into<String>) -> Self {
        RepairError::Corruption {
            page,
            field,
            detail: detail.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RepairError::Corruption { .. }
                | RepairError::MaterialCorrupt { .. }
                | RepairError::NotADatabase { .. }
        )
    }

    pub fn severity(&self) -> Severity {
        match self {
            RepairError::Corruption { .. }
            | RepairError::MaterialCorrupt { .. }
            | RepairError::MaterialEmpty { .. }
            | RepairError::NotADatabase { .. }
            | RepairError::EmptyFile { .. }
            | RepairError::Interrupted => Severity::Ignorable,
            RepairError::Sql(_) | RepairError::Config { .. } => {
                Severity::Normal
            }
            RepairError::Io(_) | RepairError::Lock { .. } | RepairError::NothingRecovered => {
                Severity::Critical
            }
        }
    }

    /// The report for a structural failure, if this is one.
    pub fn as_report(&self) -> Option<CorruptionReport> {
        match self {
            RepairError::Corruption {
                page,
                field,
                detail,
            } => Some(CorruptionReport {
                page: *page,
                field: *field,
                detail: detail.clone(),
            }),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;

/// A contained structural failure: which page, which field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptionReport {
    pub page: PageNo,
    pub field: CorruptField,
    pub detail: String,
}

/// Keeps the worst error seen during a multi-step operation.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    severity: Option<Severity>,
    error: Option<RepairError>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or(Severity::None)
    }

    pub fn error(&self) -> Option<&RepairError> {
        self.error.as_ref()
    }

    /// Record `error` at its own severity, keeping it only if it is worse.
    pub fn try_upgrade(&mut self, error: RepairError) {
        let severity = error.severity();
        self.try_upgrade_with(error, severity);
    }

    pub fn try_upgrade_with(&mut self, error: RepairError, severity: Severity) {
        if severity > self.severity() {
            self.severity = Some(severity);
            self.error = Some(error);
        }
    }

    pub fn take(&mut self) -> Option<RepairError> {
        self.severity = None;
        self.error.take()
    }
}
