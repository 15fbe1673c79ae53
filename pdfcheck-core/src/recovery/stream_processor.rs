//! Per-stream content checks
//!
//! Every stream is checked independently and read-only, on the rayon pool
//! unless [`CheckOptions::parallel`] is off. In fix mode a repaired stream
//! comes back as one [`FixAction::ReplaceStream`] shared by all anomalies it
//! resolves.

use super::corruption::{Anomaly, AnomalyKind, Location, Severity};
use super::repair::{Finding, FixAction};
use super::CheckOptions;
use crate::parser::filter_impls::{check_jpeg, repair_jpeg};
use crate::parser::filters::{decode_chain, encode, filter_chain, store_filter_chain, Filter, FilterSpec};
use crate::parser::objects::{IndirectObject, ObjectId, PdfDictionary, PdfObject, PdfStream};
use crate::parser::{ParseError, ParseResult};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Outcome of the stream pass, findings in ascending object order
#[derive(Debug, Default)]
pub struct StreamReport {
    pub findings: Vec<Finding>,
    pub streams_checked: usize,
}

/// Check every stream of the arena
pub fn check_streams(
    objects: &BTreeMap<u32, IndirectObject>,
    options: &CheckOptions,
    encrypted: bool,
) -> StreamReport {
    let streams: Vec<(ObjectId, &PdfStream)> = objects
        .values()
        .filter_map(|o| o.object.as_stream().map(|s| (o.id, s)))
        .collect();

    let checker = StreamChecker {
        objects,
        options,
        encrypted,
    };
    let per_stream: Vec<Vec<Finding>> = if options.parallel {
        streams
            .par_iter()
            .map(|(id, stream)| checker.check(*id, stream))
            .collect()
    } else {
        streams
            .iter()
            .map(|(id, stream)| checker.check(*id, stream))
            .collect()
    };

    StreamReport {
        findings: per_stream.into_iter().flatten().collect(),
        streams_checked: streams.len(),
    }
}

struct StreamChecker<'a> {
    objects: &'a BTreeMap<u32, IndirectObject>,
    options: &'a CheckOptions,
    encrypted: bool,
}

impl StreamChecker<'_> {
    fn declared_length(&self, stream: &PdfStream) -> Option<i64> {
        match stream.dict.get("Length")? {
            PdfObject::Integer(n) => Some(*n),
            PdfObject::Reference(id) => self
                .objects
                .get(&id.number)
                .filter(|o| o.id == *id)
                .and_then(|o| o.object.as_integer()),
            _ => None,
        }
    }

    fn check(&self, id: ObjectId, stream: &PdfStream) -> Vec<Finding> {
        let mut findings = Vec::new();
        let location = Location::object(id);
        let raw = stream.raw_data();

        let declared = self.declared_length(stream);
        if declared != Some(raw.len() as i64) {
            let declared = declared.map_or_else(|| "missing".to_string(), |n| n.to_string());
            let anomaly = Anomaly::fixable(
                AnomalyKind::StreamLengthMismatch,
                location.clone().with_path("/Length"),
                format!("declared Length {declared}, stream holds {} bytes", raw.len()),
            );
            findings.push(Finding::new(anomaly).with_fix(FixAction::set_key(
                id.number,
                "Length",
                PdfObject::Integer(raw.len() as i64),
            )));
        }

        let chain = match filter_chain(&stream.dict) {
            Ok(chain) => chain,
            Err(ParseError::UnsupportedFilter(name)) => {
                let severity = if self.options.validate_content {
                    Severity::Fatal
                } else {
                    Severity::Notice
                };
                findings.push(
                    Anomaly::new(
                        AnomalyKind::UnsupportedFilter,
                        severity,
                        location.with_path("/Filter"),
                        format!("unsupported filter /{name}, stream left opaque"),
                    )
                    .into(),
                );
                return findings;
            }
            Err(e) => {
                findings.push(Anomaly::fixable(AnomalyKind::StreamDecodeError, location, e.to_string()).into());
                return findings;
            }
        };

        // Encrypted content cannot be decoded
        if self.encrypted || chain.is_empty() {
            return findings;
        }

        let fix = self.options.fix;
        let mut resolved_by_rewrite: Vec<Anomaly> = Vec::new();

        let mut payload = match decode_chain(raw, &chain) {
            Ok(payload) => payload,
            Err(e) => {
                let anomaly = Anomaly::fixable(AnomalyKind::StreamDecodeError, location.clone(), e.to_string());
                let salvaged = if fix { salvage_flate(raw, &chain) } else { None };
                match salvaged {
                    Some(payload) => {
                        resolved_by_rewrite.push(anomaly);
                        payload
                    }
                    None => {
                        findings.push(anomaly.into());
                        return findings;
                    }
                }
            }
        };

        if chain.last().is_some_and(|spec| spec.filter == Filter::DCTDecode) {
            let check = check_jpeg(&payload);
            if !check.is_valid() {
                let problems: Vec<String> = check.problems.iter().map(ToString::to_string).collect();
                let anomaly = Anomaly::fixable(
                    AnomalyKind::StreamDecodeError,
                    location.clone(),
                    format!("damaged JPEG data: {}", problems.join("; ")),
                );
                let repaired = if fix && check.is_repairable() {
                    repair_jpeg(&payload).ok()
                } else {
                    None
                };
                match repaired {
                    Some(repair) => {
                        payload = repair.data;
                        resolved_by_rewrite.push(anomaly);
                    }
                    None => findings.push(anomaly.into()),
                }
            }
        }

        if resolved_by_rewrite.is_empty() {
            return findings;
        }
        match rewrite(stream, &chain, &payload) {
            Ok((dict, data)) => {
                let action = FixAction::ReplaceStream {
                    object: id.number,
                    dict,
                    data,
                };
                findings.extend(
                    resolved_by_rewrite
                        .into_iter()
                        .map(|anomaly| Finding::new(anomaly).with_fix(action.clone())),
                );
            }
            Err(e) => {
                tracing::warn!(object = %id, error = %e, "repaired stream could not be re-encoded");
                findings.extend(resolved_by_rewrite.into_iter().map(Finding::from));
            }
        }
        findings
    }
}

/// Re-encode `payload` through the generic filters of `chain`. Predictors
/// are dropped; an image codec at the end keeps its parameters.
fn rewrite(
    stream: &PdfStream,
    chain: &[FilterSpec],
    payload: &[u8],
) -> ParseResult<(PdfDictionary, Vec<u8>)> {
    let mut data = payload.to_vec();
    let mut new_chain = Vec::with_capacity(chain.len());
    for spec in chain {
        if spec.filter.is_image() {
            new_chain.push(spec.clone());
        } else if spec.filter.can_encode() {
            new_chain.push(FilterSpec::new(spec.filter));
        } else {
            return Err(ParseError::UnsupportedFilter(format!(
                "cannot re-encode with {}",
                spec.filter.name()
            )));
        }
    }
    for spec in new_chain.iter().rev().filter(|spec| !spec.filter.is_image()) {
        data = encode(&data, spec.filter)?;
    }

    let mut dict = stream.dict.clone();
    store_filter_chain(&mut dict, &new_chain);
    dict.insert("Length", PdfObject::Integer(data.len() as i64));
    Ok((dict, data))
}

/// Decode a stream whose leading Flate layer is truncated, using whatever
/// prefix still inflates
#[cfg(feature = "compression")]
fn salvage_flate(raw: &[u8], chain: &[FilterSpec]) -> Option<Vec<u8>> {
    use crate::parser::filters::{decode_predictor, inflate_prefix};

    let (first, rest) = chain.split_first()?;
    if first.filter != Filter::FlateDecode {
        return None;
    }
    let (prefix, _) = inflate_prefix(raw);
    if prefix.is_empty() {
        return None;
    }
    let inflated = if first.params.has_predictor() {
        decode_predictor(&prefix, &first.params).ok()?
    } else {
        prefix
    };
    decode_chain(&inflated, rest).ok()
}

#[cfg(not(feature = "compression"))]
fn salvage_flate(_raw: &[u8], _chain: &[FilterSpec]) -> Option<Vec<u8>> {
    None
}
