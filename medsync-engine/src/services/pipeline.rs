//! Streaming fetch/parse pipeline
//!
//! Pull-based incremental parsers shared by the source adapters. Each call
//! consumes at most one page worth of records from a reader positioned at
//! the caller's checkpoint; peak memory is bounded by the page size, never
//! by the total dataset size. Restart is only possible from a checkpoint
//! boundary, not mid-page.
//!
//! Malformed individual records are skipped with a logged reason. A
//! structurally unparsable container fails the whole page as a
//! permanent-record error; the job proceeds to the next unit.

use crate::error::SyncError;
use crate::models::RawRecord;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::io::BufRead;
use tracing::warn;

/// One page worth of parsed records
#[derive(Debug)]
pub struct ParsedChunk {
    pub records: Vec<RawRecord>,
    /// Bytes consumed from the reader up to the last complete record
    pub bytes_consumed: u64,
    /// True when the underlying stream ended inside this chunk
    pub exhausted: bool,
}

/// Incrementally parse XML `<record_tag>` elements
///
/// Flattens each record element to its leaf-element text values keyed by
/// leaf name. Returns after `max_records` complete records or end of
/// stream, whichever comes first; `bytes_consumed` always points just past
/// the last complete record so the caller can checkpoint there.
pub fn parse_xml_page<R: BufRead>(
    reader: R,
    record_tag: &str,
    locator_prefix: &str,
    max_records: usize,
) -> Result<ParsedChunk, SyncError> {
    let mut xml = Reader::from_reader(reader);
    let config = xml.config_mut();
    config.trim_text_start = true;
    config.trim_text_end = true;
    // Resume can start mid-document (byte-offset checkpoints), so end-tag
    // balance cannot be enforced against the fragment.
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut buf = Vec::new();
    let mut records = Vec::new();
    let mut bytes_consumed: u64 = 0;
    let mut exhausted = false;

    let mut in_record = false;
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current_leaf: Option<String> = None;
    let mut index: usize = 0;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == record_tag {
                    in_record = true;
                    fields.clear();
                    current_leaf = None;
                } else if in_record {
                    current_leaf = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if in_record {
                    if let Some(leaf) = &current_leaf {
                        let text = e
                            .unescape()
                            .map_err(|err| {
                                SyncError::PermanentRecord(format!(
                                    "unescapable text in {}: {}",
                                    locator_prefix, err
                                ))
                            })?
                            .into_owned();
                        fields
                            .entry(leaf.clone())
                            .and_modify(|v| {
                                v.push(' ');
                                v.push_str(&text);
                            })
                            .or_insert(text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == record_tag && in_record {
                    in_record = false;
                    if fields.is_empty() {
                        warn!(
                            locator = %format!("{}:{}", locator_prefix, index),
                            "Skipping empty record element"
                        );
                    } else {
                        records.push(RawRecord {
                            locator: format!("{}:{}", locator_prefix, index),
                            fields: std::mem::take(&mut fields),
                        });
                    }
                    index += 1;
                    bytes_consumed = xml.buffer_position() as u64;
                    if records.len() >= max_records {
                        break;
                    }
                } else if in_record {
                    current_leaf = None;
                }
            }
            Ok(Event::Eof) => {
                exhausted = true;
                bytes_consumed = xml.buffer_position() as u64;
                break;
            }
            Ok(_) => {}
            Err(err) => {
                // Structural corruption: the whole page fails, not the job
                return Err(SyncError::PermanentRecord(format!(
                    "unparsable XML container {}: {}",
                    locator_prefix, err
                )));
            }
        }
        buf.clear();
    }

    Ok(ParsedChunk {
        records,
        bytes_consumed,
        exhausted,
    })
}

/// Incrementally parse JSON-lines records
///
/// Each line is one JSON object; top-level scalar fields become record
/// fields. Malformed lines are skipped with a logged reason; the stream
/// continues.
pub fn parse_jsonl_page<R: BufRead>(
    mut reader: R,
    locator_prefix: &str,
    max_records: usize,
) -> Result<ParsedChunk, SyncError> {
    let mut records = Vec::new();
    let mut bytes_consumed: u64 = 0;
    let mut exhausted = false;
    let mut index: usize = 0;

    while records.len() < max_records {
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            exhausted = true;
            break;
        }
        bytes_consumed += read as u64;
        let locator = format!("{}:{}", locator_prefix, index);
        index += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Object(object)) => {
                let mut record = RawRecord::new(&locator);
                for (key, value) in object {
                    match value {
                        serde_json::Value::String(s) => {
                            record.fields.insert(key, s);
                        }
                        serde_json::Value::Number(n) => {
                            record.fields.insert(key, n.to_string());
                        }
                        serde_json::Value::Bool(b) => {
                            record.fields.insert(key, b.to_string());
                        }
                        _ => {}
                    }
                }
                records.push(record);
            }
            Ok(_) => {
                warn!(locator = %locator, "Skipping non-object JSON line");
            }
            Err(err) => {
                warn!(locator = %locator, error = %err, "Skipping malformed JSON line");
            }
        }
    }

    Ok(ParsedChunk {
        records,
        bytes_consumed,
        exhausted,
    })
}

/// Incrementally parse delimiter-separated rows with fixed column names
///
/// Rows with a column-count mismatch are skipped with a logged reason.
pub fn parse_delimited_page<R: BufRead>(
    mut reader: R,
    delimiter: char,
    columns: &[&str],
    locator_prefix: &str,
    max_records: usize,
) -> Result<ParsedChunk, SyncError> {
    let mut records = Vec::new();
    let mut bytes_consumed: u64 = 0;
    let mut exhausted = false;
    let mut index: usize = 0;

    while records.len() < max_records {
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            exhausted = true;
            break;
        }
        bytes_consumed += read as u64;
        let locator = format!("{}:{}", locator_prefix, index);
        index += 1;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }

        let values: Vec<&str> = trimmed.split(delimiter).collect();
        if values.len() != columns.len() {
            warn!(
                locator = %locator,
                expected = columns.len(),
                got = values.len(),
                "Skipping row with column-count mismatch"
            );
            continue;
        }

        let mut record = RawRecord::new(&locator);
        for (column, value) in columns.iter().zip(values) {
            record.fields.insert((*column).to_string(), value.to_string());
        }
        records.push(record);
    }

    Ok(ParsedChunk {
        records,
        bytes_consumed,
        exhausted,
    })
}
