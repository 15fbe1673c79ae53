//! XRef Entry Type Definitions
//!
//! Entry kinds shared by classic tables, cross-reference streams and the
//! linear-scan recovery path.

use super::objects::ObjectId;

/// Cross-reference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Type 0 / `f`: free object
    Free { next: u32, generation: u16 },
    /// Type 1 / `n`: object stored at a byte offset
    InUse { offset: usize, generation: u16 },
    /// Type 2: object stored inside an object stream
    Compressed { stream_number: u32, index: u32 },
}

impl XRefEntry {
    /// Build an entry from the three fields of a cross-reference stream row.
    /// Unknown types are treated as references to the null object.
    pub fn from_stream_fields(kind: u64, field2: u64, field3: u64) -> Option<Self> {
        match kind {
            0 => Some(XRefEntry::Free {
                next: field2 as u32,
                generation: field3 as u16,
            }),
            1 => Some(XRefEntry::InUse {
                offset: field2 as usize,
                generation: field3 as u16,
            }),
            2 => Some(XRefEntry::Compressed {
                stream_number: field2 as u32,
                index: field3 as u32,
            }),
            _ => None,
        }
    }

    pub fn is_in_use(&self) -> bool {
        !matches!(self, XRefEntry::Free { .. })
    }

    /// Generation of the object this entry describes; compressed objects are always 0
    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Free { generation, .. } | XRefEntry::InUse { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }

    pub fn offset(&self) -> Option<usize> {
        match self {
            XRefEntry::InUse { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// A disagreement between the cross-reference data and the file contents
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct XRefAnomaly {
    /// The object concerned, when the problem is tied to one
    pub object: Option<ObjectId>,
    /// Byte offset the problem was found at
    pub position: Option<usize>,
    pub message: String,
}

impl XRefAnomaly {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            object: None,
            position: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn for_object(mut self, id: ObjectId) -> Self {
        self.object = Some(id);
        self
    }
}

impl std::fmt::Display for XRefAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(id) = self.object {
            write!(f, "object {id}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(position) = self.position {
            write!(f, " (byte {position})")?;
        }
        Ok(())
    }
}
