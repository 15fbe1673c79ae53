//! Repair actions and the commit pass that applies them
//!
//! Checks never mutate the document. They describe each correction as a
//! [`FixAction`] attached to a [`Finding`]; [`commit`] then applies the
//! actions of all findings in one sequential pass.

use super::corruption::{Anomaly, Resolution};
use crate::parser::objects::{IndirectObject, PdfDictionary, PdfObject};
use crate::parser::trailer::PdfTrailer;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

/// One step from a top-level value to a nested one
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

impl PathStep {
    pub fn key(key: impl Into<String>) -> Self {
        PathStep::Key(key.into())
    }
}

/// Render a path the way locations show it, e.g. `/Kids[2]`
pub fn format_path(path: &[PathStep]) -> String {
    let mut out = String::new();
    for step in path {
        match step {
            PathStep::Key(key) => {
                out.push('/');
                out.push_str(key);
            }
            PathStep::Index(index) => out.push_str(&format!("[{index}]")),
        }
    }
    out
}

/// The top-level value a fix edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    Trailer,
    Object(u32),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Trailer => f.write_str("trailer"),
            Target::Object(number) => write!(f, "object {number}"),
        }
    }
}

/// A single edit to the document
#[derive(Debug, Clone, PartialEq)]
pub enum FixAction {
    /// Drop the dictionary entry or array element at `path`
    Remove { target: Target, path: Vec<PathStep> },
    /// Set the value at `path`, inserting a missing dictionary key
    Replace {
        target: Target,
        path: Vec<PathStep>,
        value: PdfObject,
    },
    /// Swap a stream's dictionary and raw bytes
    ReplaceStream {
        object: u32,
        dict: PdfDictionary,
        data: Vec<u8>,
    },
}

impl FixAction {
    pub fn remove(target: Target, path: Vec<PathStep>) -> Self {
        FixAction::Remove { target, path }
    }

    pub fn replace(target: Target, path: Vec<PathStep>, value: PdfObject) -> Self {
        FixAction::Replace {
            target,
            path,
            value,
        }
    }

    /// Set a top-level key of an object's dictionary
    pub fn set_key(object: u32, key: &str, value: PdfObject) -> Self {
        Self::replace(Target::Object(object), vec![PathStep::key(key)], value)
    }

    pub fn target(&self) -> Target {
        match self {
            FixAction::Remove { target, .. } | FixAction::Replace { target, .. } => *target,
            FixAction::ReplaceStream { object, .. } => Target::Object(*object),
        }
    }

    /// Removing an array element shifts its siblings, so these run last
    fn array_removal(&self) -> Option<(Target, &[PathStep], usize)> {
        match self {
            FixAction::Remove { target, path } => match path.split_last() {
                Some((PathStep::Index(index), parent)) => Some((*target, parent, *index)),
                _ => None,
            },
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            FixAction::Remove { target, path } => format!("removed {target} {}", format_path(path)),
            FixAction::Replace {
                target,
                path,
                value,
            } => format!("set {target} {} to {}", format_path(path), value.type_name()),
            FixAction::ReplaceStream { object, data, .. } => {
                format!("replaced stream data of object {object} ({} bytes)", data.len())
            }
        }
    }
}

/// An anomaly together with the edits that resolve it
#[derive(Debug, Clone)]
pub struct Finding {
    pub anomaly: Anomaly,
    pub fixes: Vec<FixAction>,
}

impl Finding {
    pub fn new(anomaly: Anomaly) -> Self {
        Self {
            anomaly,
            fixes: Vec::new(),
        }
    }

    pub fn with_fix(mut self, fix: FixAction) -> Self {
        self.fixes.push(fix);
        self
    }
}

impl From<Anomaly> for Finding {
    fn from(anomaly: Anomaly) -> Self {
        Finding::new(anomaly)
    }
}

enum Edit {
    Remove,
    Replace(PdfObject),
}

fn value_at_mut<'v>(root: &'v mut PdfObject, path: &[PathStep]) -> Option<&'v mut PdfObject> {
    let mut current = root;
    for step in path {
        current = match step {
            PathStep::Key(key) => current.as_dict_mut()?.get_mut(key)?,
            PathStep::Index(index) => current.as_array_mut()?.0.get_mut(*index)?,
        };
    }
    Some(current)
}

fn apply_at(root: &mut PdfObject, path: &[PathStep], edit: Edit) -> bool {
    let Some((last, parent_path)) = path.split_last() else {
        return match edit {
            Edit::Replace(value) => {
                *root = value;
                true
            }
            Edit::Remove => false,
        };
    };
    let Some(parent) = value_at_mut(root, parent_path) else {
        return false;
    };
    match (last, edit) {
        (PathStep::Key(key), Edit::Remove) => parent
            .as_dict_mut()
            .is_some_and(|dict| dict.remove(key).is_some()),
        (PathStep::Key(key), Edit::Replace(value)) => match parent.as_dict_mut() {
            Some(dict) => {
                dict.insert(key.clone(), value);
                true
            }
            None => false,
        },
        (PathStep::Index(index), Edit::Remove) => match parent.as_array_mut() {
            Some(array) if *index < array.len() => {
                array.0.remove(*index);
                true
            }
            _ => false,
        },
        (PathStep::Index(index), Edit::Replace(value)) => {
            match parent.as_array_mut().and_then(|a| a.0.get_mut(*index)) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        }
    }
}

fn apply_to_trailer(trailer: &mut PdfTrailer, path: &[PathStep], edit: Edit) -> bool {
    let mut root = PdfObject::Dictionary(std::mem::take(&mut trailer.dict));
    // The trailer dictionary itself is never replaced wholesale
    let applied = !path.is_empty() && apply_at(&mut root, path, edit);
    if let PdfObject::Dictionary(dict) = root {
        trailer.dict = dict;
    }
    applied
}

/// Apply one action. Returns false when its target no longer exists.
pub fn apply(
    action: &FixAction,
    objects: &mut BTreeMap<u32, IndirectObject>,
    trailer: &mut PdfTrailer,
) -> bool {
    match action {
        FixAction::Remove { target, path } => match target {
            Target::Trailer => apply_to_trailer(trailer, path, Edit::Remove),
            Target::Object(number) => objects
                .get_mut(number)
                .is_some_and(|o| apply_at(&mut o.object, path, Edit::Remove)),
        },
        FixAction::Replace {
            target,
            path,
            value,
        } => match target {
            Target::Trailer => apply_to_trailer(trailer, path, Edit::Replace(value.clone())),
            Target::Object(number) => objects
                .get_mut(number)
                .is_some_and(|o| apply_at(&mut o.object, path, Edit::Replace(value.clone()))),
        },
        FixAction::ReplaceStream { object, dict, data } => {
            match objects.get_mut(object).and_then(|o| o.object.as_stream_mut()) {
                Some(stream) => {
                    stream.dict = dict.clone();
                    stream.set_data(data.clone());
                    true
                }
                None => false,
            }
        }
    }
}

/// Apply the fixes of every finding and mark fully applied findings as
/// fixed. Edits run in ascending object order; array element removals run
/// after everything else, highest index first, so earlier indices stay
/// valid. Returns a line per applied edit.
pub fn commit(
    findings: &mut [Finding],
    objects: &mut BTreeMap<u32, IndirectObject>,
    trailer: &mut PdfTrailer,
    verbose: bool,
) -> Vec<String> {
    let mut ordered: Vec<(usize, &FixAction)> = findings
        .iter()
        .enumerate()
        .flat_map(|(i, finding)| finding.fixes.iter().map(move |fix| (i, fix)))
        .collect();

    ordered.sort_by(|(_, a), (_, b)| {
        let key = |action: &FixAction| match action.array_removal() {
            None => (false, action.target(), Vec::new(), Reverse(0)),
            Some((target, parent, index)) => (true, target, parent.to_vec(), Reverse(index)),
        };
        key(a).cmp(&key(b))
    });

    let mut applied = vec![0usize; findings.len()];
    let mut log = Vec::new();
    for (finding, action) in ordered {
        if apply(action, objects, trailer) {
            applied[finding] += 1;
            let line = action.describe();
            if verbose {
                tracing::info!("{line}");
            } else {
                tracing::debug!("{line}");
            }
            log.push(line);
        } else {
            tracing::warn!(action = %action.describe(), "fix target is gone, skipped");
        }
    }

    for (finding, count) in findings.iter_mut().zip(applied) {
        if !finding.fixes.is_empty() && count == finding.fixes.len() {
            finding.anomaly.resolution = Resolution::Fixed;
        }
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{ObjectId, PdfArray};
    use crate::recovery::corruption::{AnomalyKind, Location};

    fn arena(entries: Vec<(u32, PdfObject)>) -> BTreeMap<u32, IndirectObject> {
        entries
            .into_iter()
            .map(|(n, o)| (n, IndirectObject::new(ObjectId::new(n, 0), o)))
            .collect()
    }

    fn dict(pairs: &[(&str, PdfObject)]) -> PdfObject {
        let mut dict = PdfDictionary::new();
        for (key, value) in pairs {
            dict.insert(*key, value.clone());
        }
        PdfObject::Dictionary(dict)
    }

    fn reference(n: u32) -> PdfObject {
        PdfObject::Reference(ObjectId::new(n, 0))
    }

    fn finding(fixes: Vec<FixAction>) -> Finding {
        let anomaly = Anomaly::fixable(AnomalyKind::DanglingReference, Location::default(), "test");
        Finding { anomaly, fixes }
    }

    #[test]
    fn test_format_path() {
        let path = vec![PathStep::key("Kids"), PathStep::Index(2), PathStep::key("Type")];
        assert_eq!(format_path(&path), "/Kids[2]/Type");
        assert_eq!(format_path(&[]), "");
    }

    #[test]
    fn test_replace_inserts_missing_key() {
        let mut objects = arena(vec![(1, dict(&[]))]);
        let mut trailer = PdfTrailer::default();
        let action = FixAction::set_key(1, "Type", PdfObject::Name(crate::parser::objects::PdfName::new("Catalog")));
        assert!(apply(&action, &mut objects, &mut trailer));
        assert_eq!(objects[&1].object.as_dict().unwrap().get_type(), Some("Catalog"));
    }

    #[test]
    fn test_missing_target_is_not_applied() {
        let mut objects = arena(vec![(1, PdfObject::Integer(3))]);
        let mut trailer = PdfTrailer::default();
        assert!(!apply(
            &FixAction::set_key(1, "Type", PdfObject::Null),
            &mut objects,
            &mut trailer
        ));
        assert!(!apply(
            &FixAction::set_key(9, "Type", PdfObject::Null),
            &mut objects,
            &mut trailer
        ));
    }

    #[test]
    fn test_array_removals_keep_indices_valid() {
        let kids = PdfObject::Array(PdfArray(vec![
            reference(3),
            reference(4),
            reference(5),
            reference(6),
        ]));
        let mut objects = arena(vec![(2, dict(&[("Kids", kids)]))]);
        let mut trailer = PdfTrailer::default();

        let kid = |i| FixAction::remove(Target::Object(2), vec![PathStep::key("Kids"), PathStep::Index(i)]);
        // Ascending indices across separate findings would shift if applied naively
        let mut findings = vec![
            finding(vec![kid(0)]),
            finding(vec![kid(2)]),
            finding(vec![FixAction::set_key(2, "Count", PdfObject::Integer(2))]),
        ];
        let log = commit(&mut findings, &mut objects, &mut trailer, false);

        assert_eq!(log.len(), 3);
        let node = objects[&2].object.as_dict().unwrap();
        assert_eq!(
            node.get("Kids").unwrap().as_array().unwrap().0,
            vec![reference(4), reference(6)]
        );
        assert!(findings.iter().all(|f| f.anomaly.is_fixed()));
    }

    #[test]
    fn test_trailer_entry_removal() {
        let mut objects = BTreeMap::new();
        let mut trailer = PdfTrailer::synthesize(ObjectId::new(1, 0), Some(ObjectId::new(7, 0)), 8);
        let mut findings = vec![finding(vec![FixAction::remove(
            Target::Trailer,
            vec![PathStep::key("Info")],
        )])];
        commit(&mut findings, &mut objects, &mut trailer, true);
        assert_eq!(trailer.info(), None);
        assert!(findings[0].anomaly.is_fixed());
    }

    #[test]
    fn test_partially_applied_finding_stays_unresolved() {
        let mut objects = arena(vec![(1, dict(&[]))]);
        let mut trailer = PdfTrailer::default();
        let mut findings = vec![finding(vec![
            FixAction::set_key(1, "Count", PdfObject::Integer(0)),
            FixAction::set_key(42, "Count", PdfObject::Integer(0)),
        ])];
        commit(&mut findings, &mut objects, &mut trailer, false);
        assert!(!findings[0].anomaly.is_fixed());
    }

    #[test]
    fn test_replace_stream_updates_length() {
        let mut stream_dict = PdfDictionary::new();
        stream_dict.insert("Length", PdfObject::Integer(99));
        let stream = crate::parser::objects::PdfStream::new(stream_dict.clone(), b"abc".to_vec());
        let mut objects = arena(vec![(5, PdfObject::Stream(stream))]);
        let mut trailer = PdfTrailer::default();

        let action = FixAction::ReplaceStream {
            object: 5,
            dict: stream_dict,
            data: b"abcdef".to_vec(),
        };
        assert!(apply(&action, &mut objects, &mut trailer));
        let stream = objects[&5].object.as_stream().unwrap();
        assert_eq!(stream.raw_data(), b"abcdef");
        assert_eq!(stream.declared_length(), Some(6));
    }
}
