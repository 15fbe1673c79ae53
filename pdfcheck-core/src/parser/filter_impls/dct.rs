//! DCTDecode (JPEG) stream checking and repair
//!
//! JPEG payloads are never decoded here; a viewer does that. The segment
//! structure is walked instead (ISO/IEC 10918-1 Annex B) to find damage
//! that makes the image unreadable, and a repair pass rebuilds the byte
//! stream when the damage is limited to framing.

use crate::parser::lexer::find_bytes;
use crate::parser::{ParseError, ParseResult};
use std::collections::BTreeSet;
use std::fmt;

/// JPEG markers
const SOI: u8 = 0xD8; // Start of Image
const EOI: u8 = 0xD9; // End of Image
const SOS: u8 = 0xDA; // Start of Scan
const DQT: u8 = 0xDB; // Define Quantization Table
const DHT: u8 = 0xC4; // Define Huffman Table
const TEM: u8 = 0x01;

/// One defect found in a JPEG payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegProblem {
    pub position: usize,
    pub kind: JpegProblemKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JpegProblemKind {
    /// Bytes before the SOI marker
    GarbageBeforeSoi { bytes: usize },
    /// No SOI, but a segment that may follow it was found
    MissingSoi,
    /// Nothing recognizable as JPEG
    NotJpeg,
    /// Bytes where a marker was expected
    BadFraming { skipped: usize },
    /// A marker cut off at the end of the data
    TruncatedMarker,
    /// A segment whose declared length runs past the data
    TruncatedSegment { marker: u8 },
    /// Data after the EOI marker
    TrailingData { bytes: usize },
    MissingEoi,
    InvalidSegment { marker: u8, reason: String },
    MissingFrame,
    MissingScan,
    UndefinedQuantTable(u8),
    UndefinedHuffmanTable { class: u8, id: u8 },
}

impl JpegProblemKind {
    /// Damage the repair pass can remove without touching image data
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            JpegProblemKind::GarbageBeforeSoi { .. }
                | JpegProblemKind::MissingSoi
                | JpegProblemKind::BadFraming { .. }
                | JpegProblemKind::TruncatedMarker
                | JpegProblemKind::TruncatedSegment { .. }
                | JpegProblemKind::TrailingData { .. }
                | JpegProblemKind::MissingEoi
        )
    }
}

impl fmt::Display for JpegProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            JpegProblemKind::GarbageBeforeSoi { bytes } => write!(f, "{bytes} bytes before SOI")?,
            JpegProblemKind::MissingSoi => write!(f, "missing SOI marker")?,
            JpegProblemKind::NotJpeg => write!(f, "no JPEG markers found")?,
            JpegProblemKind::BadFraming { skipped } => {
                write!(f, "{skipped} bytes break the marker framing")?
            }
            JpegProblemKind::TruncatedMarker => write!(f, "truncated marker")?,
            JpegProblemKind::TruncatedSegment { marker } => {
                write!(f, "segment 0xFF{marker:02X} runs past the end of the data")?
            }
            JpegProblemKind::TrailingData { bytes } => write!(f, "{bytes} bytes after EOI")?,
            JpegProblemKind::MissingEoi => write!(f, "missing EOI marker")?,
            JpegProblemKind::InvalidSegment { marker, reason } => {
                write!(f, "invalid segment 0xFF{marker:02X}: {reason}")?
            }
            JpegProblemKind::MissingFrame => write!(f, "no frame header (SOF)")?,
            JpegProblemKind::MissingScan => write!(f, "no scan (SOS)")?,
            JpegProblemKind::UndefinedQuantTable(id) => {
                write!(f, "quantization table {id} used but not defined")?
            }
            JpegProblemKind::UndefinedHuffmanTable { class, id } => {
                let class = if *class == 0 { "DC" } else { "AC" };
                write!(f, "{class} Huffman table {id} used but not defined")?
            }
        }
        write!(f, " at byte {}", self.position)
    }
}

/// Outcome of [`check_jpeg`]
#[derive(Debug, Clone, Default)]
pub struct JpegCheck {
    pub problems: Vec<JpegProblem>,
}

impl JpegCheck {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    /// Damaged, and every defect is one [`repair_jpeg`] removes
    pub fn is_repairable(&self) -> bool {
        !self.problems.is_empty() && self.problems.iter().all(|p| p.kind.is_repairable())
    }
}

/// A rebuilt JPEG and the defects that were removed
#[derive(Debug, Clone)]
pub struct JpegRepair {
    pub data: Vec<u8>,
    pub fixed: Vec<JpegProblem>,
}

/// Walk the segment structure and report every defect
pub fn check_jpeg(data: &[u8]) -> JpegCheck {
    let walker = Walker::new(data, false).run();
    JpegCheck {
        problems: walker.problems,
    }
}

/// Rebuild `data` without framing damage. Fails when the image itself is
/// incomplete (no frame, no scan, undefined tables).
pub fn repair_jpeg(data: &[u8]) -> ParseResult<JpegRepair> {
    let walker = Walker::new(data, true).run();
    if walker.problems.is_empty() {
        return Ok(JpegRepair {
            data: data.to_vec(),
            fixed: Vec::new(),
        });
    }
    if let Some(fatal) = walker.problems.iter().find(|p| !p.kind.is_repairable()) {
        return Err(ParseError::StreamDecodeError(format!("JPEG cannot be repaired: {fatal}")));
    }

    let repaired = walker.out.unwrap_or_default();
    let recheck = check_jpeg(&repaired);
    if let Some(left) = recheck.problems.first() {
        return Err(ParseError::StreamDecodeError(format!(
            "JPEG still damaged after repair: {left}"
        )));
    }
    Ok(JpegRepair {
        data: repaired,
        fixed: walker.problems,
    })
}

struct Frame {
    marker: u8,
    quant_refs: Vec<u8>,
}

impl Frame {
    fn arithmetic(&self) -> bool {
        self.marker >= 0xC9
    }

    fn progressive(&self) -> bool {
        matches!(self.marker, 0xC2 | 0xC6 | 0xCA | 0xCE)
    }
}

struct Walker<'a> {
    data: &'a [u8],
    out: Option<Vec<u8>>,
    problems: Vec<JpegProblem>,
    quant: [bool; 4],
    huffman: [[bool; 4]; 2],
    reported: BTreeSet<(u8, u8, u8)>,
    frame: Option<Frame>,
    scans: usize,
}

impl<'a> Walker<'a> {
    fn new(data: &'a [u8], repair: bool) -> Self {
        Self {
            data,
            out: repair.then(|| Vec::with_capacity(data.len() + 2)),
            problems: Vec::new(),
            quant: [false; 4],
            huffman: [[false; 4]; 2],
            reported: BTreeSet::new(),
            frame: None,
            scans: 0,
        }
    }

    fn problem(&mut self, position: usize, kind: JpegProblemKind) {
        self.problems.push(JpegProblem { position, kind });
    }

    fn emit(&mut self, bytes: &[u8]) {
        if let Some(out) = &mut self.out {
            out.extend_from_slice(bytes);
        }
    }

    fn finish_without_eoi(&mut self, position: usize) {
        self.problem(position, JpegProblemKind::MissingEoi);
        self.emit(&[0xFF, EOI]);
    }

    fn run(mut self) -> Self {
        let Some(mut pos) = self.find_start() else {
            return self;
        };
        let len = self.data.len();

        loop {
            if pos >= len {
                self.finish_without_eoi(len);
                break;
            }
            if self.data[pos] != 0xFF {
                match self.resync(pos) {
                    Some(next) => {
                        self.problem(pos, JpegProblemKind::BadFraming { skipped: next - pos });
                        pos = next;
                        continue;
                    }
                    None => {
                        self.problem(pos, JpegProblemKind::BadFraming { skipped: len - pos });
                        self.finish_without_eoi(len);
                        break;
                    }
                }
            }

            // Fill bytes before a marker
            while pos + 1 < len && self.data[pos + 1] == 0xFF {
                pos += 1;
            }
            if pos + 1 >= len {
                self.problem(pos, JpegProblemKind::TruncatedMarker);
                self.emit(&[0xFF, EOI]);
                break;
            }

            let marker = self.data[pos + 1];
            match marker {
                EOI => {
                    self.emit(&[0xFF, EOI]);
                    let tail = &self.data[pos + 2..];
                    if tail.iter().any(|&b| !matches!(b, 0 | b' ' | b'\t' | b'\r' | b'\n')) {
                        self.problem(pos + 2, JpegProblemKind::TrailingData { bytes: tail.len() });
                    }
                    break;
                }
                m if (0xD0..=0xD7).contains(&m) || m == TEM => {
                    self.emit(&[0xFF, m]);
                    pos += 2;
                }
                0x00 | SOI => {
                    // A stuffed byte or a second SOI outside any scan
                    let next = self.resync(pos + 2).unwrap_or(len);
                    self.problem(pos, JpegProblemKind::BadFraming { skipped: next - pos });
                    pos = next;
                }
                _ => match self.segment(pos, marker) {
                    Some(next) => pos = next,
                    None => break,
                },
            }
        }

        if self.frame.is_none() && !self.problems.iter().any(|p| p.kind == JpegProblemKind::NotJpeg) {
            self.problem(0, JpegProblemKind::MissingFrame);
        }
        if self.frame.is_some() && self.scans == 0 {
            self.problem(0, JpegProblemKind::MissingScan);
        }
        self
    }

    /// Position just past SOI, emitting SOI
    fn find_start(&mut self) -> Option<usize> {
        let data = self.data;
        self.emit(&[0xFF, SOI]);
        if data.starts_with(&[0xFF, SOI]) {
            return Some(2);
        }
        if let Some(i) = find_bytes(data, &[0xFF, SOI, 0xFF]) {
            self.problem(0, JpegProblemKind::GarbageBeforeSoi { bytes: i });
            return Some(i + 2);
        }
        let segment = (0..data.len().saturating_sub(3)).find(|&i| {
            data[i] == 0xFF && matches!(data[i + 1], 0xC0..=0xC2 | DHT | DQT | 0xE0..=0xEF | 0xFE)
        });
        match segment {
            Some(i) => {
                self.problem(0, JpegProblemKind::MissingSoi);
                Some(i)
            }
            None => {
                self.problem(0, JpegProblemKind::NotJpeg);
                None
            }
        }
    }

    /// Next position holding a marker that can follow a complete segment
    fn resync(&self, from: usize) -> Option<usize> {
        let data = self.data;
        (from..data.len().saturating_sub(1)).find(|&i| {
            data[i] == 0xFF
                && matches!(data[i + 1], 0xC0..=0xCF | 0xD0..=0xD7 | EOI..=0xDF | 0xE0..=0xEF | 0xFE)
        })
    }

    /// Handle the marker segment at `pos`; `None` ends the walk
    fn segment(&mut self, pos: usize, marker: u8) -> Option<usize> {
        let data = self.data;
        let len = data.len();
        if pos + 4 > len {
            self.problem(pos, JpegProblemKind::TruncatedSegment { marker });
            self.emit(&[0xFF, EOI]);
            return None;
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if length < 2 {
            let next = self.resync(pos + 2).unwrap_or(len);
            self.problem(pos, JpegProblemKind::BadFraming { skipped: next - pos });
            return Some(next);
        }
        let end = pos + 2 + length;
        if end > len {
            self.problem(pos, JpegProblemKind::TruncatedSegment { marker });
            self.emit(&[0xFF, EOI]);
            return None;
        }

        let body = &data[pos + 4..end];
        match marker {
            DQT => self.define_quant(pos, body),
            DHT => self.define_huffman(pos, body),
            m if is_sof(m) => self.read_frame(pos, m, body),
            _ => {}
        }
        self.emit(&data[pos..end]);

        if marker != SOS {
            return Some(end);
        }
        self.read_scan_header(pos, body);
        self.scans += 1;

        match entropy_end(data, end) {
            Some(next) => {
                self.emit(&data[end..next]);
                Some(next)
            }
            None => {
                let mut stop = len;
                if stop > end && data[stop - 1] == 0xFF {
                    stop -= 1;
                }
                self.emit(&data[end..stop]);
                self.finish_without_eoi(len);
                None
            }
        }
    }

    fn invalid(&mut self, pos: usize, marker: u8, reason: &str) {
        self.problem(
            pos,
            JpegProblemKind::InvalidSegment {
                marker,
                reason: reason.to_string(),
            },
        );
    }

    fn define_quant(&mut self, pos: usize, body: &[u8]) {
        let mut i = 0;
        while i < body.len() {
            let precision = body[i] >> 4;
            let id = (body[i] & 0x0F) as usize;
            let size = if precision == 0 { 64 } else { 128 };
            if id > 3 || i + 1 + size > body.len() {
                self.invalid(pos, DQT, "malformed table");
                return;
            }
            self.quant[id] = true;
            i += 1 + size;
        }
    }

    fn define_huffman(&mut self, pos: usize, body: &[u8]) {
        let mut i = 0;
        while i < body.len() {
            let class = (body[i] >> 4) as usize;
            let id = (body[i] & 0x0F) as usize;
            if class > 1 || id > 3 || i + 17 > body.len() {
                self.invalid(pos, DHT, "malformed table");
                return;
            }
            let symbols: usize = body[i + 1..i + 17].iter().map(|&c| c as usize).sum();
            if i + 17 + symbols > body.len() {
                self.invalid(pos, DHT, "symbol count runs past the segment");
                return;
            }
            self.huffman[class][id] = true;
            i += 17 + symbols;
        }
    }

    fn read_frame(&mut self, pos: usize, marker: u8, body: &[u8]) {
        if self.frame.is_some() {
            self.invalid(pos, marker, "second frame header");
            return;
        }
        if body.len() < 6 {
            self.invalid(pos, marker, "frame header too short");
            return;
        }
        let components = body[5] as usize;
        if components == 0 || body.len() < 6 + 3 * components {
            self.invalid(pos, marker, "bad component count");
            return;
        }
        if u16::from_be_bytes([body[3], body[4]]) == 0 {
            self.invalid(pos, marker, "zero width");
            return;
        }
        let quant_refs = (0..components).map(|c| body[6 + 3 * c + 2]).collect();
        self.frame = Some(Frame { marker, quant_refs });
    }

    fn read_scan_header(&mut self, pos: usize, body: &[u8]) {
        let Some(frame) = &self.frame else {
            self.problem(pos, JpegProblemKind::MissingFrame);
            return;
        };
        let arithmetic = frame.arithmetic();
        let progressive = frame.progressive();
        let quant_refs = frame.quant_refs.clone();

        let count = body.first().copied().unwrap_or(0) as usize;
        if count == 0 || body.len() < 1 + 2 * count + 3 {
            self.invalid(pos, SOS, "scan header too short");
            return;
        }

        let mut missing = Vec::new();
        for table in quant_refs {
            if table > 3 || !self.quant[table as usize] {
                missing.push((2, 0, table));
            }
        }

        if !arithmetic {
            let spectral_start = body[1 + 2 * count];
            let spectral_end = body[2 + 2 * count];
            let refining = body[3 + 2 * count] >> 4 != 0;
            let needs_dc = spectral_start == 0 && !(progressive && refining);
            let needs_ac = spectral_end > 0;
            for c in 0..count {
                let tables = body[2 + 2 * c];
                let (dc, ac) = (tables >> 4, tables & 0x0F);
                if needs_dc && (dc > 3 || !self.huffman[0][dc as usize]) {
                    missing.push((0, 0, dc));
                }
                if needs_ac && (ac > 3 || !self.huffman[1][ac as usize]) {
                    missing.push((1, 1, ac));
                }
            }
        }

        for (kind, class, id) in missing {
            if !self.reported.insert((kind, class, id)) {
                continue;
            }
            let problem = if kind == 2 {
                JpegProblemKind::UndefinedQuantTable(id)
            } else {
                JpegProblemKind::UndefinedHuffmanTable { class, id }
            };
            self.problem(pos, problem);
        }
    }
}

fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, DHT | 0xC8 | 0xCC)
}

/// Offset of the first marker after entropy-coded data starting at `from`
fn entropy_end(data: &[u8], from: usize) -> Option<usize> {
    let mut p = from;
    while p + 1 < data.len() {
        if data[p] == 0xFF {
            match data[p + 1] {
                0x00 | 0xD0..=0xD7 => p += 2,
                0xFF => p += 1,
                _ => return Some(p),
            }
        } else {
            p += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::tiny_jpeg;

    #[test]
    fn test_valid_jpeg() {
        let check = check_jpeg(&tiny_jpeg());
        assert!(check.is_valid(), "{:?}", check.problems);
    }

    #[test]
    fn test_missing_eoi_repaired() {
        let mut data = tiny_jpeg();
        data.truncate(data.len() - 2);
        let check = check_jpeg(&data);
        assert_eq!(check.problems.len(), 1);
        assert_eq!(check.problems[0].kind, JpegProblemKind::MissingEoi);
        assert!(check.is_repairable());

        let repair = repair_jpeg(&data).unwrap();
        assert_eq!(repair.data, tiny_jpeg());
        assert_eq!(repair.fixed.len(), 1);
    }

    #[test]
    fn test_partial_trailing_marker() {
        let mut data = tiny_jpeg();
        data.pop();
        let check = check_jpeg(&data);
        assert_eq!(check.problems[0].kind, JpegProblemKind::MissingEoi);
        assert_eq!(repair_jpeg(&data).unwrap().data, tiny_jpeg());
    }

    #[test]
    fn test_garbage_before_soi_and_after_eoi() {
        let mut data = b"junk".to_vec();
        data.extend_from_slice(&tiny_jpeg());
        data.extend_from_slice(b"more junk");
        let check = check_jpeg(&data);
        assert_eq!(
            check.problems.iter().map(|p| p.kind.clone()).collect::<Vec<_>>(),
            vec![
                JpegProblemKind::GarbageBeforeSoi { bytes: 4 },
                JpegProblemKind::TrailingData { bytes: 9 }
            ]
        );
        assert_eq!(repair_jpeg(&data).unwrap().data, tiny_jpeg());
    }

    #[test]
    fn test_trailing_whitespace_is_fine() {
        let mut data = tiny_jpeg();
        data.extend_from_slice(b"\r\n");
        assert!(check_jpeg(&data).is_valid());
    }

    #[test]
    fn test_missing_soi_reinserted() {
        let data = tiny_jpeg()[2..].to_vec();
        let check = check_jpeg(&data);
        assert_eq!(check.problems[0].kind, JpegProblemKind::MissingSoi);
        assert_eq!(repair_jpeg(&data).unwrap().data, tiny_jpeg());
    }

    #[test]
    fn test_bytes_breaking_framing_dropped() {
        let good = tiny_jpeg();
        // insert junk between the DQT and SOF segments
        let sof = 2 + 4 + 1 + 64;
        let mut data = good[..sof].to_vec();
        data.extend_from_slice(&[0x12, 0x34, 0x56]);
        data.extend_from_slice(&good[sof..]);

        let check = check_jpeg(&data);
        assert_eq!(check.problems[0].kind, JpegProblemKind::BadFraming { skipped: 3 });
        assert_eq!(repair_jpeg(&data).unwrap().data, good);
    }

    #[test]
    fn test_undefined_huffman_table_not_repairable() {
        let mut data = tiny_jpeg();
        // point the scan at DC table 1
        let sos = find_bytes(&data, &[0xFF, SOS]).unwrap();
        data[sos + 6] = 0x10;
        let check = check_jpeg(&data);
        assert_eq!(
            check.problems[0].kind,
            JpegProblemKind::UndefinedHuffmanTable { class: 0, id: 1 }
        );
        assert!(!check.is_repairable());
        assert!(repair_jpeg(&data).is_err());
    }

    #[test]
    fn test_no_scan() {
        let data = tiny_jpeg();
        let sos = find_bytes(&data, &[0xFF, SOS]).unwrap();
        let mut cut = data[..sos].to_vec();
        cut.extend_from_slice(&[0xFF, EOI]);
        let check = check_jpeg(&cut);
        assert_eq!(check.problems[0].kind, JpegProblemKind::MissingScan);
        assert!(repair_jpeg(&cut).is_err());
    }

    #[test]
    fn test_not_jpeg() {
        let check = check_jpeg(b"plain text");
        assert_eq!(check.problems.len(), 1);
        assert_eq!(check.problems[0].kind, JpegProblemKind::NotJpeg);
    }

    #[test]
    fn test_truncated_segment() {
        let data = tiny_jpeg();
        let cut = &data[..2 + 4 + 10];
        let check = check_jpeg(cut);
        assert!(check
            .problems
            .iter()
            .any(|p| p.kind == JpegProblemKind::TruncatedSegment { marker: DQT }));
        // with the tables gone there is no frame left to save
        assert!(repair_jpeg(cut).is_err());
    }

    #[test]
    fn test_problem_display() {
        let problem = JpegProblem {
            position: 12,
            kind: JpegProblemKind::UndefinedQuantTable(2),
        };
        assert_eq!(problem.to_string(), "quantization table 2 used but not defined at byte 12");
    }
}
