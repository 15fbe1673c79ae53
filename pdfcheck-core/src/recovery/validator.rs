//! Structural validation of the object graph
//!
//! Walks everything reachable from the trailer, checks reference integrity,
//! the catalog, the page tree and the types of well-known keys. The
//! validator only reads; every problem it can correct carries the
//! [`FixAction`]s that [`commit`](super::repair::commit) applies later.

use super::corruption::{Anomaly, AnomalyKind, Location};
use super::repair::{format_path, Finding, FixAction, PathStep, Target};
use crate::parser::objects::{IndirectObject, ObjectId, PdfArray, PdfDictionary, PdfName, PdfObject};
use crate::parser::trailer::PdfTrailer;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Page trees nested deeper than this are not descended
const MAX_TREE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Name,
    Integer,
    Number,
    Text,
    Dict,
    Array,
    DictOrArray,
    /// Array of four numbers
    Rect,
    Stream,
    /// A stream or an array of streams
    Streams,
}

impl Expect {
    fn describe(self) -> &'static str {
        match self {
            Expect::Name => "a name",
            Expect::Integer => "an integer",
            Expect::Number => "a number",
            Expect::Text => "a string",
            Expect::Dict => "a dictionary",
            Expect::Array => "an array",
            Expect::DictOrArray => "a dictionary or array",
            Expect::Rect => "a rectangle",
            Expect::Stream => "a stream",
            Expect::Streams => "a stream or array of streams",
        }
    }
}

struct KeyRule {
    key: &'static str,
    expect: Expect,
}

const fn rule(key: &'static str, expect: Expect) -> KeyRule {
    KeyRule { key, expect }
}

const CATALOG_KEYS: &[KeyRule] = &[
    rule("Version", Expect::Name),
    rule("PageLabels", Expect::Dict),
    rule("Names", Expect::Dict),
    rule("Dests", Expect::Dict),
    rule("ViewerPreferences", Expect::Dict),
    rule("PageLayout", Expect::Name),
    rule("PageMode", Expect::Name),
    rule("Outlines", Expect::Dict),
    rule("Threads", Expect::Array),
    rule("OpenAction", Expect::DictOrArray),
    rule("AA", Expect::Dict),
    rule("URI", Expect::Dict),
    rule("AcroForm", Expect::Dict),
    rule("Metadata", Expect::Stream),
    rule("StructTreeRoot", Expect::Dict),
    rule("MarkInfo", Expect::Dict),
    rule("Lang", Expect::Text),
    rule("OCProperties", Expect::Dict),
];

// Kids, Count and Parent are checked by the page tree walk
const PAGES_KEYS: &[KeyRule] = &[
    rule("Resources", Expect::Dict),
    rule("MediaBox", Expect::Rect),
    rule("CropBox", Expect::Rect),
    rule("Rotate", Expect::Integer),
];

const PAGE_KEYS: &[KeyRule] = &[
    rule("Resources", Expect::Dict),
    rule("MediaBox", Expect::Rect),
    rule("CropBox", Expect::Rect),
    rule("BleedBox", Expect::Rect),
    rule("TrimBox", Expect::Rect),
    rule("ArtBox", Expect::Rect),
    rule("Contents", Expect::Streams),
    rule("Rotate", Expect::Integer),
    rule("Annots", Expect::Array),
    rule("Thumb", Expect::Stream),
    rule("Group", Expect::Dict),
    rule("Metadata", Expect::Stream),
    rule("UserUnit", Expect::Number),
];

const INFO_KEYS: &[KeyRule] = &[
    rule("Title", Expect::Text),
    rule("Author", Expect::Text),
    rule("Subject", Expect::Text),
    rule("Keywords", Expect::Text),
    rule("Creator", Expect::Text),
    rule("Producer", Expect::Text),
    rule("CreationDate", Expect::Text),
    rule("ModDate", Expect::Text),
    rule("Trapped", Expect::Name),
];

type References = Vec<(Vec<PathStep>, ObjectId)>;

fn collect_references(value: &PdfObject, path: &mut Vec<PathStep>, out: &mut References) {
    match value {
        PdfObject::Reference(id) => out.push((path.clone(), *id)),
        PdfObject::Array(array) => {
            for (index, item) in array.iter().enumerate() {
                path.push(PathStep::Index(index));
                collect_references(item, path, out);
                path.pop();
            }
        }
        PdfObject::Dictionary(dict) => collect_dict_references(dict, path, out),
        PdfObject::Stream(stream) => collect_dict_references(&stream.dict, path, out),
        _ => {}
    }
}

fn collect_dict_references(dict: &PdfDictionary, path: &mut Vec<PathStep>, out: &mut References) {
    for (key, value) in dict.iter() {
        path.push(PathStep::key(key.as_str()));
        collect_references(value, path, out);
        path.pop();
    }
}

fn references_in(value: &PdfObject) -> References {
    let mut out = Vec::new();
    collect_references(value, &mut Vec::new(), &mut out);
    out
}

/// Remove a reference from its holder: dictionary entries and page tree
/// kids are dropped, other array slots become null
fn drop_reference(target: Target, path: Vec<PathStep>) -> FixAction {
    let in_kids = matches!(
        path.as_slice(),
        [.., PathStep::Key(key), PathStep::Index(_)] if key == "Kids"
    );
    let in_array = matches!(path.last(), Some(PathStep::Index(_)));
    if in_array && !in_kids {
        FixAction::replace(target, path, PdfObject::Null)
    } else {
        FixAction::remove(target, path)
    }
}

fn describe(value: Option<&PdfObject>) -> &'static str {
    value.map_or("missing", PdfObject::type_name)
}

fn name(value: &str) -> PdfObject {
    PdfObject::Name(PdfName::new(value))
}

/// Read-only structural checks over a parsed document
pub struct StructureValidator<'a> {
    objects: &'a BTreeMap<u32, IndirectObject>,
    trailer: &'a PdfTrailer,
    findings: Vec<Finding>,
}

impl<'a> StructureValidator<'a> {
    pub fn new(objects: &'a BTreeMap<u32, IndirectObject>, trailer: &'a PdfTrailer) -> Self {
        Self {
            objects,
            trailer,
            findings: Vec::new(),
        }
    }

    /// Run every check. Findings come back in discovery order.
    pub fn run(mut self) -> Vec<Finding> {
        self.check_references();
        if let Some((root, catalog)) = self.check_catalog() {
            self.check_page_tree(root, catalog);
            self.check_keys(Target::Object(root.number), &[], catalog, CATALOG_KEYS);
        }
        self.check_info();
        self.findings
    }

    fn lookup(&self, id: ObjectId) -> Option<&'a PdfObject> {
        self.objects
            .get(&id.number)
            .filter(|o| o.id == id)
            .map(|o| &o.object)
    }

    fn resolve(&self, value: &'a PdfObject) -> Option<&'a PdfObject> {
        match value {
            PdfObject::Reference(id) => self.lookup(*id),
            other => Some(other),
        }
    }

    fn locate(&self, target: Target, path: &[PathStep]) -> Location {
        match target {
            Target::Trailer => Location::trailer().with_path(format!("trailer{}", format_path(path))),
            Target::Object(number) => {
                let id = self
                    .objects
                    .get(&number)
                    .map_or(ObjectId::new(number, 0), |o| o.id);
                let location = Location::object(id);
                if path.is_empty() {
                    location
                } else {
                    location.with_path(format_path(path))
                }
            }
        }
    }

    fn push(&mut self, finding: Finding) {
        tracing::debug!("{}", finding.anomaly);
        self.findings.push(finding);
    }

    fn fixable(&mut self, kind: AnomalyKind, target: Target, path: &[PathStep], message: String, fix: FixAction) {
        let anomaly = Anomaly::fixable(kind, self.locate(target, path), message);
        self.push(Finding::new(anomaly).with_fix(fix));
    }

    fn fatal(&mut self, kind: AnomalyKind, location: Location, message: String) {
        self.push(Anomaly::fatal(kind, location, message).into());
    }

    fn check_references(&mut self) {
        let trailer_refs = {
            let mut out = Vec::new();
            collect_dict_references(&self.trailer.dict, &mut Vec::new(), &mut out);
            out
        };
        let object_refs: BTreeMap<u32, References> = self
            .objects
            .iter()
            .map(|(&number, o)| (number, references_in(&o.object)))
            .collect();

        let holders = std::iter::once((Target::Trailer, &trailer_refs)).chain(
            object_refs
                .iter()
                .map(|(&number, refs)| (Target::Object(number), refs)),
        );
        for (holder, refs) in holders {
            // One finding per (holder, target), fixing every place it is named
            let mut dangling: BTreeMap<ObjectId, Vec<Vec<PathStep>>> = BTreeMap::new();
            for (path, id) in refs {
                if self.lookup(*id).is_none() {
                    dangling.entry(*id).or_default().push(path.clone());
                }
            }
            for (id, paths) in dangling {
                let message = match self.objects.get(&id.number) {
                    Some(present) => format!(
                        "reference to {id}, but object {} has generation {}",
                        id.number, present.id.generation
                    ),
                    None => format!("reference to {id}, which does not exist"),
                };
                let anomaly = Anomaly::fixable(
                    AnomalyKind::DanglingReference,
                    self.locate(holder, &paths[0]),
                    message,
                );
                let mut finding = Finding::new(anomaly);
                for path in paths {
                    finding = finding.with_fix(drop_reference(holder, path));
                }
                self.push(finding);
            }
        }

        let mut reached: HashSet<u32> = HashSet::new();
        let mut queue: VecDeque<ObjectId> = trailer_refs.iter().map(|(_, id)| *id).collect();
        while let Some(id) = queue.pop_front() {
            if self.lookup(id).is_none() || !reached.insert(id.number) {
                continue;
            }
            if let Some(refs) = object_refs.get(&id.number) {
                queue.extend(refs.iter().map(|(_, id)| *id));
            }
        }

        for (&number, object) in self.objects {
            if !reached.contains(&number) {
                self.push(
                    Anomaly::notice(
                        AnomalyKind::OrphanObject,
                        Location::object(object.id),
                        "not reachable from the trailer",
                    )
                    .into(),
                );
            }
        }
    }

    fn check_catalog(&mut self) -> Option<(ObjectId, &'a PdfDictionary)> {
        let root = match self.trailer.root() {
            Ok(root) => root,
            Err(e) => {
                self.fatal(AnomalyKind::MissingRoot, Location::trailer(), e.to_string());
                return None;
            }
        };
        let Some(PdfObject::Dictionary(catalog)) = self.lookup(root) else {
            self.fatal(
                AnomalyKind::MissingRoot,
                Location::object(root),
                format!("Root {root} is missing or not a dictionary"),
            );
            return None;
        };

        match catalog.get("Type") {
            Some(PdfObject::Name(kind)) if kind.as_str() == "Catalog" => {}
            other => self.fixable(
                AnomalyKind::TypeViolation,
                Target::Object(root.number),
                &[PathStep::key("Type")],
                format!("catalog Type is {}, expected /Catalog", describe(other)),
                FixAction::set_key(root.number, "Type", name("Catalog")),
            ),
        }
        Some((root, catalog))
    }

    fn check_page_tree(&mut self, root: ObjectId, catalog: &'a PdfDictionary) {
        let location = Location::object(root).with_path("/Pages");
        let pages = match catalog.get("Pages") {
            Some(PdfObject::Reference(id)) => *id,
            other => {
                self.fatal(
                    AnomalyKind::PageTreeInconsistency,
                    location,
                    format!("Pages is {}, expected a reference to the page tree", describe(other)),
                );
                return;
            }
        };
        let Some(PdfObject::Dictionary(node)) = self.lookup(pages) else {
            self.fatal(
                AnomalyKind::PageTreeInconsistency,
                location,
                format!("page tree root {pages} is missing or not a dictionary"),
            );
            return;
        };
        if let Some(PdfObject::Name(kind)) = node.get("Type") {
            if kind.as_str() != "Pages" {
                self.fatal(
                    AnomalyKind::PageTreeInconsistency,
                    Location::object(pages),
                    format!("page tree root has Type /{}", kind.as_str()),
                );
                return;
            }
        }

        let mut visited = HashSet::from([pages.number]);
        let count = self.walk_pages(pages, node, None, &mut visited, 0);
        tracing::debug!(pages = count, "page tree walked");
    }

    /// Check one node and its subtree; returns the number of pages below it
    fn walk_pages(
        &mut self,
        id: ObjectId,
        node: &'a PdfDictionary,
        parent: Option<ObjectId>,
        visited: &mut HashSet<u32>,
        depth: usize,
    ) -> usize {
        let target = Target::Object(id.number);
        let is_leaf = match node.get("Type") {
            Some(PdfObject::Name(kind)) if kind.as_str() == "Pages" => false,
            Some(PdfObject::Name(kind)) if kind.as_str() == "Page" => true,
            other => {
                let leaf = !node.contains_key("Kids");
                let role = if leaf { "Page" } else { "Pages" };
                self.fixable(
                    AnomalyKind::TypeViolation,
                    target,
                    &[PathStep::key("Type")],
                    format!("page tree node Type is {}, /{role} inferred", describe(other)),
                    FixAction::set_key(id.number, "Type", name(role)),
                );
                leaf
            }
        };

        let parent_path = [PathStep::key("Parent")];
        match (parent, node.get("Parent")) {
            (None, None) => {}
            (None, Some(value)) => {
                let dangling = matches!(value, PdfObject::Reference(r) if self.lookup(*r).is_none());
                if !dangling {
                    self.fixable(
                        AnomalyKind::PageTreeInconsistency,
                        target,
                        &parent_path,
                        "page tree root has a Parent".to_string(),
                        FixAction::remove(target, parent_path.to_vec()),
                    );
                }
            }
            (Some(expected), Some(PdfObject::Reference(actual))) if *actual == expected => {}
            (Some(expected), Some(PdfObject::Reference(actual))) => self.fixable(
                AnomalyKind::PageTreeInconsistency,
                target,
                &parent_path,
                format!("Parent is {actual}, but the node is listed by {expected}"),
                FixAction::set_key(id.number, "Parent", PdfObject::Reference(expected)),
            ),
            (Some(expected), other) => self.fixable(
                AnomalyKind::TypeViolation,
                target,
                &parent_path,
                format!("Parent is {}, expected a reference to {expected}", describe(other)),
                FixAction::set_key(id.number, "Parent", PdfObject::Reference(expected)),
            ),
        }

        if is_leaf {
            self.check_keys(target, &[], node, PAGE_KEYS);
            return 1;
        }

        let mut count = 0;
        match node.get("Kids") {
            Some(PdfObject::Array(kids)) => {
                count = self.walk_kids(id, kids, visited, depth);
            }
            other => self.fixable(
                AnomalyKind::TypeViolation,
                target,
                &[PathStep::key("Kids")],
                format!("Kids is {}, expected an array", describe(other)),
                FixAction::set_key(id.number, "Kids", PdfObject::Array(PdfArray::new())),
            ),
        }

        let count_path = [PathStep::key("Count")];
        let fixed_count = FixAction::set_key(id.number, "Count", PdfObject::Integer(count as i64));
        match node.get("Count") {
            Some(PdfObject::Integer(n)) if *n == count as i64 => {}
            Some(PdfObject::Integer(n)) => self.fixable(
                AnomalyKind::PageTreeInconsistency,
                target,
                &count_path,
                format!("Count is {n}, but the subtree holds {count} pages"),
                fixed_count,
            ),
            other => self.fixable(
                AnomalyKind::TypeViolation,
                target,
                &count_path,
                format!("Count is {}, expected an integer", describe(other)),
                fixed_count,
            ),
        }

        self.check_keys(target, &[], node, PAGES_KEYS);
        count
    }

    fn walk_kids(&mut self, id: ObjectId, kids: &'a PdfArray, visited: &mut HashSet<u32>, depth: usize) -> usize {
        let target = Target::Object(id.number);
        let mut count = 0;
        for (index, kid) in kids.iter().enumerate() {
            let path = vec![PathStep::key("Kids"), PathStep::Index(index)];
            let kid_id = match kid {
                PdfObject::Reference(kid_id) => *kid_id,
                other => {
                    self.fixable(
                        AnomalyKind::PageTreeInconsistency,
                        target,
                        &path,
                        format!("kid is a {}, not a reference", other.type_name()),
                        FixAction::remove(target, path.clone()),
                    );
                    continue;
                }
            };
            // Dangling kids are reported by the reference check
            let Some(kid_object) = self.lookup(kid_id) else {
                continue;
            };
            if depth >= MAX_TREE_DEPTH {
                self.push(
                    Anomaly::notice(
                        AnomalyKind::PageTreeInconsistency,
                        self.locate(target, &path),
                        format!("page tree deeper than {MAX_TREE_DEPTH} levels, {kid_id} not checked"),
                    )
                    .into(),
                );
                continue;
            }
            if !visited.insert(kid_id.number) {
                self.fixable(
                    AnomalyKind::PageTreeInconsistency,
                    target,
                    &path,
                    format!("{kid_id} already appears in the page tree"),
                    FixAction::remove(target, path.clone()),
                );
                continue;
            }
            let PdfObject::Dictionary(kid_node) = kid_object else {
                self.fixable(
                    AnomalyKind::PageTreeInconsistency,
                    target,
                    &path,
                    format!("kid {kid_id} is a {}, not a dictionary", kid_object.type_name()),
                    FixAction::remove(target, path.clone()),
                );
                continue;
            };
            if let Some(PdfObject::Name(kind)) = kid_node.get("Type") {
                if kind.as_str() != "Page" && kind.as_str() != "Pages" {
                    self.fixable(
                        AnomalyKind::PageTreeInconsistency,
                        target,
                        &path,
                        format!("kid {kid_id} has Type /{}", kind.as_str()),
                        FixAction::remove(target, path.clone()),
                    );
                    continue;
                }
            }
            count += self.walk_pages(kid_id, kid_node, Some(id), visited, depth + 1);
        }
        count
    }

    fn check_info(&mut self) {
        let info_path = [PathStep::key("Info")];
        match self.trailer.dict.get("Info") {
            None => {}
            Some(PdfObject::Reference(id)) => match self.lookup(*id) {
                None => {}
                Some(PdfObject::Dictionary(info)) => {
                    self.check_keys(Target::Object(id.number), &[], info, INFO_KEYS)
                }
                Some(other) => self.fixable(
                    AnomalyKind::TypeViolation,
                    Target::Trailer,
                    &info_path,
                    format!("Info {id} is a {}, expected a dictionary", other.type_name()),
                    FixAction::remove(Target::Trailer, info_path.to_vec()),
                ),
            },
            Some(PdfObject::Dictionary(info)) => {
                self.check_keys(Target::Trailer, &info_path, info, INFO_KEYS)
            }
            Some(other) => self.fixable(
                AnomalyKind::TypeViolation,
                Target::Trailer,
                &info_path,
                format!("Info is a {}, expected a dictionary", other.type_name()),
                FixAction::remove(Target::Trailer, info_path.to_vec()),
            ),
        }
    }

    fn matches(&self, value: &PdfObject, expect: Expect) -> bool {
        match expect {
            Expect::Name => matches!(value, PdfObject::Name(_)),
            Expect::Integer => matches!(value, PdfObject::Integer(_)),
            Expect::Number => matches!(value, PdfObject::Integer(_) | PdfObject::Real(_)),
            Expect::Text => matches!(value, PdfObject::String(_)),
            Expect::Dict => matches!(value, PdfObject::Dictionary(_)),
            Expect::Array => matches!(value, PdfObject::Array(_)),
            Expect::DictOrArray => matches!(value, PdfObject::Dictionary(_) | PdfObject::Array(_)),
            Expect::Rect => match value {
                PdfObject::Array(items) => {
                    items.len() == 4
                        && items.iter().all(|item| {
                            self.resolve(item)
                                .is_some_and(|v| matches!(v, PdfObject::Integer(_) | PdfObject::Real(_)))
                        })
                }
                _ => false,
            },
            Expect::Stream => matches!(value, PdfObject::Stream(_)),
            Expect::Streams => matches!(value, PdfObject::Stream(_) | PdfObject::Array(_)),
        }
    }

    /// Check well-known keys of `dict`, found at `base` inside `target`.
    /// Malformed entries are optional ones and get removed; a bad element
    /// of a content array becomes null.
    fn check_keys(&mut self, target: Target, base: &[PathStep], dict: &'a PdfDictionary, rules: &[KeyRule]) {
        for rule in rules {
            let Some(value) = dict.get(rule.key) else {
                continue;
            };
            let Some(resolved) = self.resolve(value) else {
                continue;
            };
            if resolved.is_null() {
                continue;
            }
            let mut path = base.to_vec();
            path.push(PathStep::key(rule.key));

            if !self.matches(resolved, rule.expect) {
                self.fixable(
                    AnomalyKind::TypeViolation,
                    target,
                    &path,
                    format!(
                        "{} is a {}, expected {}",
                        rule.key,
                        resolved.type_name(),
                        rule.expect.describe()
                    ),
                    FixAction::remove(target, path.clone()),
                );
                continue;
            }

            if let (Expect::Streams, PdfObject::Array(items)) = (rule.expect, resolved) {
                // An indirect array is edited in its own object
                let (array_target, array_base) = match value {
                    PdfObject::Reference(array_id) => (Target::Object(array_id.number), Vec::new()),
                    _ => (target, path.clone()),
                };
                for (index, item) in items.iter().enumerate() {
                    let element = self.resolve(item);
                    if element.map_or(true, |e| matches!(e, PdfObject::Stream(_) | PdfObject::Null)) {
                        continue;
                    }
                    let mut element_path = array_base.clone();
                    element_path.push(PathStep::Index(index));
                    self.fixable(
                        AnomalyKind::TypeViolation,
                        array_target,
                        &element_path,
                        format!("{} element {index} is not a stream", rule.key),
                        FixAction::replace(array_target, element_path.clone(), PdfObject::Null),
                    );
                }
            }
        }
    }
}
