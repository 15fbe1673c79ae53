//! PDF Stream Filters
//!
//! Handles decompression and decoding of PDF streams according to ISO 32000-1 Section 7.4.
//! Image filters (DCT, JPX, CCITT, JBIG2) are opaque here: decoding stops in
//! front of them and hands back the encoded image payload.

use super::objects::{PdfArray, PdfDictionary, PdfName, PdfObject};
use super::{ParseError, ParseResult};

#[cfg(feature = "compression")]
use flate2::{write::ZlibEncoder, Compression, Decompress, FlushDecompress, Status};
#[cfg(feature = "compression")]
use std::io::Write;

/// Supported PDF filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    ASCIIHexDecode,
    ASCII85Decode,
    LZWDecode,
    FlateDecode,
    RunLengthDecode,
    CCITTFaxDecode,
    JBIG2Decode,
    DCTDecode,
    JPXDecode,
    Crypt,
}

impl Filter {
    /// Parse filter from name; inline-image abbreviations are accepted
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ASCIIHexDecode" | "AHx" => Some(Filter::ASCIIHexDecode),
            "ASCII85Decode" | "A85" => Some(Filter::ASCII85Decode),
            "LZWDecode" | "LZW" => Some(Filter::LZWDecode),
            "FlateDecode" | "Fl" => Some(Filter::FlateDecode),
            "RunLengthDecode" | "RL" => Some(Filter::RunLengthDecode),
            "CCITTFaxDecode" | "CCF" => Some(Filter::CCITTFaxDecode),
            "JBIG2Decode" => Some(Filter::JBIG2Decode),
            "DCTDecode" | "DCT" => Some(Filter::DCTDecode),
            "JPXDecode" => Some(Filter::JPXDecode),
            "Crypt" => Some(Filter::Crypt),
            _ => None,
        }
    }

    /// Full filter name as written by the serializer
    pub fn name(&self) -> &'static str {
        match self {
            Filter::ASCIIHexDecode => "ASCIIHexDecode",
            Filter::ASCII85Decode => "ASCII85Decode",
            Filter::LZWDecode => "LZWDecode",
            Filter::FlateDecode => "FlateDecode",
            Filter::RunLengthDecode => "RunLengthDecode",
            Filter::CCITTFaxDecode => "CCITTFaxDecode",
            Filter::JBIG2Decode => "JBIG2Decode",
            Filter::DCTDecode => "DCTDecode",
            Filter::JPXDecode => "JPXDecode",
            Filter::Crypt => "Crypt",
        }
    }

    /// Image codecs; they must be the last filter of a chain
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            Filter::DCTDecode | Filter::JPXDecode | Filter::CCITTFaxDecode | Filter::JBIG2Decode
        )
    }

    /// Filters [`encode`] can produce
    pub fn can_encode(&self) -> bool {
        matches!(
            self,
            Filter::ASCIIHexDecode
                | Filter::ASCII85Decode
                | Filter::LZWDecode
                | Filter::FlateDecode
                | Filter::RunLengthDecode
        )
    }
}

/// Decode parameters (`DecodeParms`) that affect the generic filters
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
    /// 1 = none, 2 = TIFF, 10-15 = PNG
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
    /// LZW only
    pub early_change: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
            early_change: true,
        }
    }
}

impl DecodeParams {
    pub fn from_dict(dict: Option<&PdfDictionary>) -> Self {
        let mut params = Self::default();
        let Some(dict) = dict else {
            return params;
        };
        let positive = |key: &str| {
            dict.get(key)
                .and_then(PdfObject::as_integer)
                .and_then(|n| usize::try_from(n).ok())
                .filter(|&n| n > 0)
        };
        if let Some(p) = dict.get("Predictor").and_then(PdfObject::as_integer) {
            params.predictor = p;
        }
        if let Some(colors) = positive("Colors") {
            params.colors = colors;
        }
        if let Some(bpc) = positive("BitsPerComponent") {
            params.bits_per_component = bpc;
        }
        if let Some(columns) = positive("Columns") {
            params.columns = columns;
        }
        if let Some(ec) = dict.get("EarlyChange").and_then(PdfObject::as_integer) {
            params.early_change = ec != 0;
        }
        params
    }

    pub fn has_predictor(&self) -> bool {
        self.predictor > 1
    }

    /// Bytes per row of samples, without the PNG tag byte
    fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    /// Bytes per complete pixel, at least 1
    fn pixel_bytes(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// One stage of a stream's filter chain
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub filter: Filter,
    pub params: DecodeParams,
    /// The `DecodeParms` dictionary as written, image codecs need it verbatim
    pub raw_params: Option<PdfDictionary>,
}

impl FilterSpec {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            params: DecodeParams::default(),
            raw_params: None,
        }
    }
}

/// Read `Filter` and `DecodeParms` into an ordered chain
pub fn filter_chain(dict: &PdfDictionary) -> ParseResult<Vec<FilterSpec>> {
    let names: Vec<&PdfName> = match dict.get("Filter") {
        None | Some(PdfObject::Null) => return Ok(Vec::new()),
        Some(PdfObject::Name(name)) => vec![name],
        Some(PdfObject::Array(array)) => array
            .iter()
            .map(|obj| {
                obj.as_name().ok_or_else(|| {
                    ParseError::StreamDecodeError(format!(
                        "Filter array holds a {}",
                        obj.type_name()
                    ))
                })
            })
            .collect::<ParseResult<_>>()?,
        Some(other) => {
            return Err(ParseError::StreamDecodeError(format!(
                "Filter must be a name or array, found {}",
                other.type_name()
            )))
        }
    };

    let params: Vec<Option<&PdfDictionary>> = match dict.get("DecodeParms").or_else(|| dict.get("DP")) {
        Some(PdfObject::Dictionary(d)) => vec![Some(d)],
        Some(PdfObject::Array(array)) => array
            .iter()
            .map(|obj| match obj {
                PdfObject::Dictionary(d) => Some(d),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let filter = Filter::from_name(name.as_str())
                .ok_or_else(|| ParseError::UnsupportedFilter(name.as_str().to_string()))?;
            let raw = params.get(i).copied().flatten();
            Ok(FilterSpec {
                filter,
                params: DecodeParams::from_dict(raw),
                raw_params: raw.cloned(),
            })
        })
        .collect()
}

/// Write a chain back into `dict`, dropping `DecodeParms` that no longer apply
pub fn store_filter_chain(dict: &mut PdfDictionary, chain: &[FilterSpec]) {
    dict.remove("DP");
    match chain {
        [] => {
            dict.remove("Filter");
            dict.remove("DecodeParms");
        }
        [single] => {
            dict.insert("Filter", PdfObject::Name(PdfName::new(single.filter.name())));
            match &single.raw_params {
                Some(params) => dict.insert("DecodeParms", PdfObject::Dictionary(params.clone())),
                None => {
                    dict.remove("DecodeParms");
                }
            }
        }
        chain => {
            let names = chain
                .iter()
                .map(|spec| PdfObject::Name(PdfName::new(spec.filter.name())))
                .collect();
            dict.insert("Filter", PdfObject::Array(PdfArray(names)));
            if chain.iter().any(|spec| spec.raw_params.is_some()) {
                let params = chain
                    .iter()
                    .map(|spec| {
                        spec.raw_params
                            .clone()
                            .map_or(PdfObject::Null, PdfObject::Dictionary)
                    })
                    .collect();
                dict.insert("DecodeParms", PdfObject::Array(PdfArray(params)));
            } else {
                dict.remove("DecodeParms");
            }
        }
    }
}

/// Decode stream data according to specified filters
pub fn decode_stream(data: &[u8], dict: &PdfDictionary) -> ParseResult<Vec<u8>> {
    let chain = filter_chain(dict)?;
    decode_chain(data, &chain)
}

/// Run `data` through `chain`, stopping in front of a trailing image codec
pub fn decode_chain(data: &[u8], chain: &[FilterSpec]) -> ParseResult<Vec<u8>> {
    let mut result = data.to_vec();
    for (i, spec) in chain.iter().enumerate() {
        if spec.filter.is_image() {
            if i + 1 != chain.len() {
                return Err(ParseError::StreamDecodeError(format!(
                    "{} must be the last filter",
                    spec.filter.name()
                )));
            }
            break;
        }
        result = apply_filter(&result, spec)?;
    }
    Ok(result)
}

/// Apply a single filter (and its predictor) to data
pub fn apply_filter(data: &[u8], spec: &FilterSpec) -> ParseResult<Vec<u8>> {
    let decoded = match spec.filter {
        Filter::FlateDecode => decode_flate(data)?,
        Filter::LZWDecode => decode_lzw(data, spec.params.early_change)?,
        Filter::ASCIIHexDecode => decode_ascii_hex(data)?,
        Filter::ASCII85Decode => decode_ascii85(data)?,
        Filter::RunLengthDecode => decode_run_length(data)?,
        Filter::Crypt => {
            let identity = spec
                .raw_params
                .as_ref()
                .and_then(|p| p.get("Name"))
                .and_then(PdfObject::as_name)
                .map_or(true, |n| n.as_str() == "Identity");
            if !identity {
                return Err(ParseError::UnsupportedFilter("Crypt".to_string()));
            }
            return Ok(data.to_vec());
        }
        image => return Ok(pass_through(data, image)),
    };

    if matches!(spec.filter, Filter::FlateDecode | Filter::LZWDecode) && spec.params.has_predictor() {
        return decode_predictor(&decoded, &spec.params);
    }
    Ok(decoded)
}

fn pass_through(data: &[u8], filter: Filter) -> Vec<u8> {
    tracing::trace!("{} payload passed through opaque", filter.name());
    data.to_vec()
}

/// Encode `data` with one of the generic filters (no predictor)
pub fn encode(data: &[u8], filter: Filter) -> ParseResult<Vec<u8>> {
    match filter {
        Filter::FlateDecode => encode_flate(data),
        Filter::LZWDecode => encode_lzw(data),
        Filter::ASCIIHexDecode => Ok(encode_ascii_hex(data)),
        Filter::ASCII85Decode => Ok(encode_ascii85(data)),
        Filter::RunLengthDecode => Ok(encode_run_length(data)),
        other => Err(ParseError::UnsupportedFilter(format!(
            "cannot encode with {}",
            other.name()
        ))),
    }
}

/// Inflate as much of a zlib stream as possible.
/// Returns the recovered bytes and, if the stream did not end cleanly, why.
#[cfg(feature = "compression")]
pub fn inflate_prefix(data: &[u8]) -> (Vec<u8>, Option<String>) {
    let (out, error) = inflate_with(data, true);
    match error {
        // Some writers emit raw deflate without the zlib header
        Some(_) if out.is_empty() => {
            let (raw, raw_error) = inflate_with(data, false);
            if raw_error.is_none() || !raw.is_empty() {
                return (raw, raw_error);
            }
            (out, error)
        }
        _ => (out, error),
    }
}

#[cfg(feature = "compression")]
fn inflate_with(data: &[u8], zlib_header: bool) -> (Vec<u8>, Option<String>) {
    let mut inflater = Decompress::new(zlib_header);
    let mut out: Vec<u8> = Vec::with_capacity(data.len().saturating_mul(4).max(64));
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(1024));
        }
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let input = &data[consumed.min(data.len())..];
        match inflater.decompress_vec(input, &mut out, FlushDecompress::None) {
            Ok(Status::StreamEnd) => return (out, None),
            Ok(_) => {
                let stalled = inflater.total_in() as usize == consumed && inflater.total_out() == produced;
                if stalled && out.len() < out.capacity() {
                    return (out, Some("deflate stream is truncated".to_string()));
                }
            }
            Err(e) => return (out, Some(format!("corrupt deflate stream: {e}"))),
        }
    }
}

/// Decode FlateDecode (zlib/deflate) compressed data
#[cfg(feature = "compression")]
fn decode_flate(data: &[u8]) -> ParseResult<Vec<u8>> {
    match inflate_prefix(data) {
        (out, None) => Ok(out),
        (out, Some(reason)) => Err(ParseError::StreamDecodeError(format!(
            "Flate decode error after {} bytes: {reason}",
            out.len()
        ))),
    }
}

#[cfg(not(feature = "compression"))]
fn decode_flate(_data: &[u8]) -> ParseResult<Vec<u8>> {
    Err(ParseError::StreamDecodeError(
        "FlateDecode requires 'compression' feature".to_string(),
    ))
}

#[cfg(feature = "compression")]
fn encode_flate(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(not(feature = "compression"))]
fn encode_flate(_data: &[u8]) -> ParseResult<Vec<u8>> {
    Err(ParseError::UnsupportedFilter(
        "FlateDecode requires 'compression' feature".to_string(),
    ))
}

fn decode_lzw(data: &[u8], early_change: bool) -> ParseResult<Vec<u8>> {
    use weezl::{decode::Decoder, BitOrder};

    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };
    decoder
        .decode(data)
        .map_err(|e| ParseError::StreamDecodeError(format!("LZW decode error: {e:?}")))
}

fn encode_lzw(data: &[u8]) -> ParseResult<Vec<u8>> {
    use weezl::{encode::Encoder, BitOrder};

    Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
        .encode(data)
        .map_err(|e| ParseError::StreamDecodeError(format!("LZW encode error: {e:?}")))
}

/// Decode ASCIIHexDecode data
fn decode_ascii_hex(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;

    for &ch in data {
        if ch == b'>' {
            break;
        }
        if super::lexer::is_whitespace(ch) {
            continue;
        }
        let value = hex_digit_value(ch).ok_or_else(|| {
            ParseError::StreamDecodeError(format!("Invalid hex digit: {}", ch as char))
        })?;
        match pending.take() {
            Some(high) => result.push((high << 4) | value),
            None => pending = Some(value),
        }
    }
    // Odd number of digits, pad with 0
    if let Some(high) = pending {
        result.push(high << 4);
    }

    Ok(result)
}

fn encode_ascii_hex(data: &[u8]) -> Vec<u8> {
    let mut out = hex::encode_upper(data).into_bytes();
    out.push(b'>');
    out
}

/// Get value of hex digit
fn hex_digit_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

/// Decode ASCII85Decode data
fn decode_ascii85(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut filled = 0;

    let body = data.strip_prefix(b"<~").unwrap_or(data);
    let mut bytes = body.iter().copied().filter(|&b| !super::lexer::is_whitespace(b));

    while let Some(c) = bytes.next() {
        match c {
            b'~' => {
                if bytes.next() == Some(b'>') {
                    break;
                }
                return Err(ParseError::StreamDecodeError(
                    "Invalid ASCII85 end marker".to_string(),
                ));
            }
            b'z' if filled == 0 => result.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[filled] = c - b'!';
                filled += 1;
                if filled == 5 {
                    result.extend_from_slice(&ascii85_group(&group)?);
                    filled = 0;
                }
            }
            _ => {
                return Err(ParseError::StreamDecodeError(format!(
                    "Invalid ASCII85 character: {}",
                    c as char
                )));
            }
        }
    }

    // A final partial group of n digits carries n - 1 bytes
    if filled > 1 {
        for slot in group.iter_mut().skip(filled) {
            *slot = 84;
        }
        let value = ascii85_group(&group)?;
        result.extend_from_slice(&value[..filled - 1]);
    }

    Ok(result)
}

fn ascii85_group(group: &[u8; 5]) -> ParseResult<[u8; 4]> {
    let value = group.iter().fold(0u64, |acc, &digit| acc * 85 + digit as u64);
    u32::try_from(value)
        .map(u32::to_be_bytes)
        .map_err(|_| ParseError::StreamDecodeError("ASCII85 group out of range".to_string()))
}

fn encode_ascii85(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 5 / 4 + 2);
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        let mut value = u32::from_be_bytes(word);
        if chunk.len() == 4 && value == 0 {
            out.push(b'z');
            continue;
        }
        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = (value % 85) as u8 + b'!';
            value /= 85;
        }
        out.extend_from_slice(&digits[..chunk.len() + 1]);
    }
    out.extend_from_slice(b"~>");
    out
}

fn decode_run_length(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        i += 1;
        match length {
            0..=127 => {
                let count = length + 1;
                let literal = data.get(i..i + count).ok_or_else(|| {
                    ParseError::StreamDecodeError("RunLengthDecode literal run truncated".to_string())
                })?;
                output.extend_from_slice(literal);
                i += count;
            }
            128 => break,
            _ => {
                let byte = *data.get(i).ok_or_else(|| {
                    ParseError::StreamDecodeError("RunLengthDecode repeat run truncated".to_string())
                })?;
                i += 1;
                output.resize(output.len() + 257 - length, byte);
            }
        }
    }

    Ok(output)
}

fn encode_run_length(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 128 + 2);
    let mut i = 0;
    while i < data.len() {
        let mut run = 1;
        while i + run < data.len() && data[i + run] == data[i] && run < 128 {
            run += 1;
        }
        if run > 1 {
            out.push((257 - run) as u8);
            out.push(data[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < data.len() && i - start < 128 {
            if i + 1 < data.len() && data[i + 1] == data[i] {
                break;
            }
            i += 1;
        }
        if i == start {
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&data[start..i]);
    }
    out.push(128);
    out
}

/// Undo a TIFF (2) or PNG (10-15) predictor
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> ParseResult<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff_predictor(data, params),
        10..=15 => decode_png_predictor(data, params),
        other => Err(ParseError::StreamDecodeError(format!(
            "Unsupported predictor: {other}"
        ))),
    }
}

fn decode_tiff_predictor(data: &[u8], params: &DecodeParams) -> ParseResult<Vec<u8>> {
    if params.bits_per_component != 8 {
        return Err(ParseError::StreamDecodeError(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }
    let row_bytes = params.row_bytes();
    let colors = params.colors;
    let mut output = data.to_vec();
    for row in output.chunks_mut(row_bytes) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    Ok(output)
}

fn decode_png_predictor(data: &[u8], params: &DecodeParams) -> ParseResult<Vec<u8>> {
    let row_bytes = params.row_bytes();
    let bpp = params.pixel_bytes();
    let stride = row_bytes + 1;

    let mut output = Vec::with_capacity(data.len() / stride * row_bytes);
    let mut previous = vec![0u8; row_bytes];
    let mut current = vec![0u8; row_bytes];

    for row in data.chunks(stride) {
        if row.len() < 2 {
            break;
        }
        let tag = row[0];
        let encoded = &row[1..];
        current[..encoded.len()].copy_from_slice(encoded);
        current[encoded.len()..].fill(0);

        for i in 0..row_bytes {
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(ParseError::StreamDecodeError(format!(
                        "Invalid PNG predictor tag: {other}"
                    )))
                }
            };
            current[i] = current[i].wrapping_add(predicted);
        }

        output.extend_from_slice(&current[..encoded.len()]);
        std::mem::swap(&mut previous, &mut current);
    }

    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
