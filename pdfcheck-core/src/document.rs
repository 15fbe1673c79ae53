use crate::error::Result;
use crate::parser::header::PdfHeader;
use crate::parser::objects::{Correction, IndirectObject, ObjectId, PdfDictionary, PdfObject};
use crate::parser::reader::PdfReader;
use crate::parser::trailer::PdfTrailer;
use crate::parser::xref_types::XRefAnomaly;
use crate::parser::{ParseOptions, ParseResult};
use crate::recovery::{
    check_streams, commit, Anomaly, AnomalyKind, CheckError, CheckOptions, Finding, Location, Resolution,
    Severity, StructureValidator, ValidationReport, XRefMode,
};
use crate::writer::{self, WriterConfig};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A parsed PDF file held in memory.
///
/// Owns every indirect object, the trailer and what the parser learned
/// about the file. [`check`](Document::check) validates and, in fix mode,
/// repairs it in place; [`serialize`](Document::serialize) writes a fresh
/// file.
///
/// # Example
///
/// ```rust,no_run
/// use pdfcheck::{Document, ParseOptions};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let document = Document::open("input.pdf", &ParseOptions::default())?;
/// println!("PDF {} with {} objects", document.version(), document.object_count());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    path: Option<PathBuf>,
    header: PdfHeader,
    objects: BTreeMap<u32, IndirectObject>,
    trailer: PdfTrailer,
    root: ObjectId,
    info: Option<ObjectId>,
    encrypted: bool,
    xref_mode: XRefMode,
    parse_anomalies: Vec<XRefAnomaly>,
    corrections: Vec<Correction>,
    repairs: Vec<String>,
}

/// Text fields and dates of the Info dictionary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    /// Application that created the original document
    pub creator: Option<String>,
    /// Application that wrote the PDF
    pub producer: Option<String>,
    pub creation_date: Option<DateTime<FixedOffset>>,
    pub modification_date: Option<DateTime<FixedOffset>>,
}

impl DocumentInfo {
    fn from_dict(dict: &PdfDictionary) -> Self {
        let text = |key: &str| match dict.get(key) {
            Some(PdfObject::String(s)) => Some(s.to_text()),
            _ => None,
        };
        let date = |key: &str| match dict.get(key) {
            Some(PdfObject::String(s)) => parse_pdf_date(&s.to_text()),
            _ => None,
        };
        Self {
            title: text("Title"),
            author: text("Author"),
            subject: text("Subject"),
            keywords: text("Keywords"),
            creator: text("Creator"),
            producer: text("Producer"),
            creation_date: date("CreationDate"),
            modification_date: date("ModDate"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What the catalog says about the document
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSummary {
    pub root: ObjectId,
    /// `Count` of the page tree root
    pub page_count: Option<i64>,
    /// `Version` entry overriding the header
    pub version: Option<String>,
    pub page_layout: Option<String>,
    pub page_mode: Option<String>,
    pub has_outlines: bool,
    pub has_names: bool,
    pub has_acroform: bool,
    pub has_metadata: bool,
}

/// Parse a PDF date string `D:YYYYMMDDHHmmSSOHH'mm'`. Every field after the
/// year is optional.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    let text = text.strip_prefix("D:").unwrap_or(text);
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits < 4 {
        return None;
    }
    let (stamp, zone) = text.split_at(digits);
    let field = |start: usize, len: usize, default: u32| -> Option<u32> {
        match stamp.get(start..start + len) {
            Some(value) => value.parse().ok(),
            None => Some(default),
        }
    };

    let year: i32 = stamp.get(0..4)?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 2, 1)?, field(6, 2, 1)?)?;
    let time = date.and_hms_opt(field(8, 2, 0)?, field(10, 2, 0)?, field(12, 2, 0)?)?;

    let offset = match zone.as_bytes().first() {
        Some(&sign @ (b'+' | b'-')) => {
            let parts: Vec<&str> = zone[1..].split('\'').filter(|p| !p.is_empty()).collect();
            let hours: i32 = parts.first().and_then(|h| h.parse().ok()).unwrap_or(0);
            let minutes: i32 = parts.get(1).and_then(|m| m.parse().ok()).unwrap_or(0);
            let seconds = hours * 3600 + minutes * 60;
            FixedOffset::east_opt(if sign == b'-' { -seconds } else { seconds })?
        }
        _ => FixedOffset::east_opt(0)?,
    };
    offset.from_local_datetime(&time).single()
}

impl Document {
    /// Read and parse the file at `path`
    pub fn open(path: impl AsRef<Path>, options: &ParseOptions) -> ParseResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "file read");
        let mut document = Self::from_bytes(&data, options)?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Parse a file already in memory
    pub fn from_bytes(data: &[u8], options: &ParseOptions) -> ParseResult<Self> {
        let parsed = PdfReader::new(data, options).read()?;
        tracing::debug!(
            objects = parsed.objects.len(),
            xref = %parsed.xref_mode,
            anomalies = parsed.anomalies.len(),
            corrections = parsed.corrections.len(),
            "document parsed"
        );
        Ok(Self {
            path: None,
            header: parsed.header,
            objects: parsed.objects,
            trailer: parsed.trailer,
            root: parsed.root,
            info: parsed.info,
            encrypted: parsed.encrypted,
            xref_mode: parsed.xref_mode,
            parse_anomalies: parsed.anomalies,
            corrections: parsed.corrections,
            repairs: Vec::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Header version as `x.y`
    pub fn version(&self) -> String {
        self.header.version.to_string()
    }

    pub fn header(&self) -> &PdfHeader {
        &self.header
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// `Size` as declared by the trailer
    pub fn declared_size(&self) -> Option<u32> {
        self.trailer.size().ok()
    }

    /// The two file identifiers, hex encoded
    pub fn file_ids(&self) -> Option<(String, String)> {
        self.trailer
            .file_ids()
            .map(|(first, second)| (hex::encode_upper(&first.bytes), hex::encode_upper(&second.bytes)))
    }

    pub(crate) fn file_ids_object(&self) -> Option<&PdfObject> {
        self.trailer.file_ids().and(self.trailer.id())
    }

    pub fn info(&self) -> DocumentInfo {
        let dict = match self.trailer.dict.get("Info") {
            Some(PdfObject::Dictionary(dict)) => Some(dict),
            Some(PdfObject::Reference(_)) => self.info.and_then(|id| self.get(id)).and_then(PdfObject::as_dict),
            _ => None,
        };
        dict.map(DocumentInfo::from_dict).unwrap_or_default()
    }

    pub fn info_id(&self) -> Option<ObjectId> {
        self.info
    }

    pub fn catalog_summary(&self) -> CatalogSummary {
        let catalog = self.get(self.root).and_then(PdfObject::as_dict);
        let entry = |key: &str| catalog.and_then(|c| c.get(key));
        let name = |key: &str| match entry(key) {
            Some(PdfObject::Name(name)) => Some(name.as_str().to_string()),
            _ => None,
        };
        let page_count = match entry("Pages") {
            Some(PdfObject::Reference(id)) => self
                .get(*id)
                .and_then(PdfObject::as_dict)
                .and_then(|pages| pages.get("Count"))
                .and_then(PdfObject::as_integer),
            _ => None,
        };

        CatalogSummary {
            root: self.root,
            page_count,
            version: name("Version"),
            page_layout: name("PageLayout"),
            page_mode: name("PageMode"),
            has_outlines: entry("Outlines").is_some(),
            has_names: entry("Names").is_some(),
            has_acroform: entry("AcroForm").is_some(),
            has_metadata: entry("Metadata").is_some(),
        }
    }

    /// Every object in PDF syntax, stream data elided
    pub fn dump(&self) -> String {
        self.objects.values().map(render_object).collect()
    }

    pub fn dump_object(&self, id: ObjectId) -> Option<String> {
        self.objects
            .get(&id.number)
            .filter(|o| o.id == id)
            .map(render_object)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Disagreements between the cross-reference data and the file
    pub fn parse_anomalies(&self) -> &[XRefAnomaly] {
        &self.parse_anomalies
    }

    /// Corrections applied by the parser in fix mode
    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    /// Edits applied by [`check`](Document::check) in fix mode
    pub fn repairs(&self) -> &[String] {
        &self.repairs
    }

    pub fn xref_mode(&self) -> XRefMode {
        self.xref_mode
    }

    /// Look up an object; the generation must match
    pub fn get(&self, id: ObjectId) -> Option<&PdfObject> {
        self.objects
            .get(&id.number)
            .filter(|o| o.id == id)
            .map(|o| &o.object)
    }

    pub fn objects(&self) -> &BTreeMap<u32, IndirectObject> {
        &self.objects
    }

    pub fn trailer(&self) -> &PdfTrailer {
        &self.trailer
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    /// Validate structure and streams. In fix mode every fixable anomaly
    /// that can be corrected is corrected in place.
    pub fn check(&mut self, options: &CheckOptions) -> std::result::Result<ValidationReport, CheckError> {
        let mut report = ValidationReport::new();
        report.objects_checked = self.objects.len();

        // The serializer rebuilds the cross-reference section from scratch
        report.extend(self.parse_anomalies.iter().map(|xref| {
            let mut anomaly = Anomaly::from_xref(xref);
            if options.fix {
                anomaly.resolution = Resolution::Fixed;
            }
            anomaly
        }));
        if self.encrypted {
            report.push(Anomaly::notice(
                AnomalyKind::Encrypted,
                Location::trailer().with_path("/Encrypt"),
                "document is encrypted, stream contents are not decoded",
            ));
        }

        let findings = StructureValidator::new(&self.objects, &self.trailer).run();
        report.extend(self.settle(findings, options)?);

        let streams = check_streams(&self.objects, options, self.encrypted);
        report.streams_checked = streams.streams_checked;
        report.extend(self.settle(streams.findings, options)?);

        self.info = self
            .trailer
            .info()
            .filter(|&id| self.get(id).and_then(PdfObject::as_dict).is_some());

        for anomaly in report.outstanding() {
            tracing::warn!("{anomaly}");
        }
        tracing::debug!(
            anomalies = report.anomalies.len(),
            fixed = report.fixed_count(),
            "check finished"
        );

        if options.strict {
            let unresolved = report.outstanding().count();
            if unresolved > 0 {
                return Err(CheckError::Strict { unresolved });
            }
        }
        Ok(report)
    }

    /// Abort on a fatal finding, otherwise commit the fixes in fix mode
    fn settle(
        &mut self,
        mut findings: Vec<Finding>,
        options: &CheckOptions,
    ) -> std::result::Result<Vec<Anomaly>, CheckError> {
        if let Some(fatal) = findings.iter().find(|f| f.anomaly.severity == Severity::Fatal) {
            return Err(CheckError::Fatal(fatal.anomaly.clone()));
        }
        if options.fix {
            let log = commit(&mut findings, &mut self.objects, &mut self.trailer, options.verbose);
            self.repairs.extend(log);
        }
        Ok(findings.into_iter().map(|f| f.anomaly).collect())
    }

    /// Write the document to `path` with a table cross-reference section
    pub fn serialize(&self, path: impl AsRef<Path>) -> Result<()> {
        self.serialize_with(path, &WriterConfig::default())
    }

    pub fn serialize_with(&self, path: impl AsRef<Path>, config: &WriterConfig) -> Result<()> {
        writer::write_file_atomic(self, path.as_ref(), config)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_with(&WriterConfig::default())
    }

    pub fn to_bytes_with(&self, config: &WriterConfig) -> Result<Vec<u8>> {
        writer::write_to_vec(self, config)
    }
}

fn render_object(object: &IndirectObject) -> String {
    format!(
        "{} {} obj\n{}\nendobj\n",
        object.id.number,
        object.id.generation,
        writer::to_pdf_syntax(&object.object)
    )
}
