//! PDF corruption findings
//!
//! Every defect the checker finds is an [`Anomaly`]: what kind of damage it
//! is, how serious, where it was found and whether it was fixed.

use crate::parser::objects::ObjectId;
use crate::parser::xref_types::XRefAnomaly;
use std::fmt;
use thiserror::Error;

/// Types of PDF corruption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AnomalyKind {
    /// Cross-reference data disagrees with the file
    XRefCorruption,
    MissingRoot,
    /// A reference to an object that does not exist
    DanglingReference,
    /// A well-known key holding a value of the wrong type
    TypeViolation,
    PageTreeInconsistency,
    /// Not reachable from the trailer
    OrphanObject,
    StreamLengthMismatch,
    StreamDecodeError,
    UnsupportedFilter,
    Encrypted,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnomalyKind::XRefCorruption => "xref corruption",
            AnomalyKind::MissingRoot => "missing root",
            AnomalyKind::DanglingReference => "dangling reference",
            AnomalyKind::TypeViolation => "type violation",
            AnomalyKind::PageTreeInconsistency => "page tree inconsistency",
            AnomalyKind::OrphanObject => "orphan object",
            AnomalyKind::StreamLengthMismatch => "stream length mismatch",
            AnomalyKind::StreamDecodeError => "stream decode error",
            AnomalyKind::UnsupportedFilter => "unsupported filter",
            AnomalyKind::Encrypted => "encrypted",
        };
        f.write_str(name)
    }
}

/// Severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Severity {
    /// Informational, never fails a check
    Notice,
    /// Damage that leaves the document usable; corrected in fix mode when possible
    Fixable,
    /// The document cannot be processed further
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Notice => "notice",
            Severity::Fixable => "fixable",
            Severity::Fatal => "fatal",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Resolution {
    #[default]
    Unresolved,
    Fixed,
}

/// Where an anomaly was found
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Location {
    /// Holding object; `None` for the trailer or the file as a whole
    pub object: Option<ObjectId>,
    /// Path inside the object, e.g. `/Kids[2]`
    pub path: Option<String>,
    /// Byte offset in the input file
    pub position: Option<usize>,
}

impl Location {
    pub fn object(id: ObjectId) -> Self {
        Self {
            object: Some(id),
            ..Self::default()
        }
    }

    pub fn trailer() -> Self {
        Self {
            path: Some("trailer".to_string()),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut written = false;
        if let Some(id) = self.object {
            write!(f, "object {id}")?;
            written = true;
        }
        if let Some(path) = &self.path {
            if written {
                f.write_str(" ")?;
            }
            f.write_str(path)?;
            written = true;
        }
        if let Some(position) = self.position {
            if written {
                f.write_str(" ")?;
            }
            write!(f, "(byte {position})")?;
            written = true;
        }
        if !written {
            f.write_str("document")?;
        }
        Ok(())
    }
}

/// One finding of the checker
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub location: Location,
    pub message: String,
    pub resolution: Resolution,
}

impl Anomaly {
    pub fn new(kind: AnomalyKind, severity: Severity, location: Location, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            location,
            message: message.into(),
            resolution: Resolution::Unresolved,
        }
    }

    pub fn notice(kind: AnomalyKind, location: Location, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Notice, location, message)
    }

    pub fn fixable(kind: AnomalyKind, location: Location, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Fixable, location, message)
    }

    pub fn fatal(kind: AnomalyKind, location: Location, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Fatal, location, message)
    }

    /// A parse-time cross-reference disagreement
    pub fn from_xref(anomaly: &XRefAnomaly) -> Self {
        let location = Location {
            object: anomaly.object,
            path: None,
            position: anomaly.position,
        };
        Self::fixable(AnomalyKind::XRefCorruption, location, anomaly.message.clone())
    }

    pub fn is_fixed(&self) -> bool {
        self.resolution == Resolution::Fixed
    }

    /// Fatal, or fixable and still unresolved
    pub fn is_outstanding(&self) -> bool {
        match self.severity {
            Severity::Notice => false,
            Severity::Fixable => !self.is_fixed(),
            Severity::Fatal => true,
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}: {}", self.severity, self.kind, self.location, self.message)?;
        if self.is_fixed() {
            f.write_str(" (fixed)")?;
        }
        Ok(())
    }
}

/// Aggregated outcome of a check
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ValidationReport {
    pub anomalies: Vec<Anomaly>,
    pub objects_checked: usize,
    pub streams_checked: usize,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, anomaly: Anomaly) {
        self.anomalies.push(anomaly);
    }

    pub fn extend(&mut self, anomalies: impl IntoIterator<Item = Anomaly>) {
        self.anomalies.extend(anomalies);
    }

    /// No anomalies beyond notices
    pub fn is_clean(&self) -> bool {
        self.anomalies.iter().all(|a| a.severity == Severity::Notice)
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.anomalies.iter().filter(|a| a.kind == kind).count()
    }

    pub fn of_kind(&self, kind: AnomalyKind) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter().filter(move |a| a.kind == kind)
    }

    pub fn fatal(&self) -> Option<&Anomaly> {
        self.anomalies.iter().find(|a| a.severity == Severity::Fatal)
    }

    pub fn fixed_count(&self) -> usize {
        self.anomalies.iter().filter(|a| a.is_fixed()).count()
    }

    /// Anomalies that still need attention
    pub fn outstanding(&self) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter().filter(|a| a.is_outstanding())
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding().next().is_some()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} objects, {} streams checked: {} anomalies, {} fixed",
            self.objects_checked,
            self.streams_checked,
            self.anomalies.len(),
            self.fixed_count()
        )?;
        for anomaly in &self.anomalies {
            writeln!(f, "  {anomaly}")?;
        }
        Ok(())
    }
}

/// Check failures
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("fatal anomaly: {0}")]
    Fatal(Anomaly),

    #[error("{unresolved} anomalies left unresolved in strict mode")]
    Strict { unresolved: usize },
}
