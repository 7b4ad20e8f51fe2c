//! Serialized output for event streams and reports.
//!
//! Progress events go out as newline-delimited JSON, one event per line.
//! One-shot reports (cache stats, metrics) can be pretty-printed instead.

use serde::Serialize;
use std::io::{self, Write};

use crate::progress::ProgressEvent;

/// How records are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFormat {
    /// One JSON document per record, optionally pretty
    Json,
    /// One compact JSON object per line
    Ndjson,
}

impl WriteFormat {
    /// Parse format from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "ndjson" | "jsonl" | "jsonlines" => Some(Self::Ndjson),
            _ => None,
        }
    }

    /// HTTP content type of a stream in this format.
    pub fn content_type(self) -> &'static str {
        match self {
            WriteFormat::Json => "application/json",
            WriteFormat::Ndjson => "application/x-ndjson",
        }
    }
}

/// Writes serializable records and keeps a tally of progress events.
pub struct EventWriter<W: Write> {
    writer: W,
    format: WriteFormat,
    pretty: bool,
    records_written: usize,
    items_finished: usize,
}

impl<W: Write> EventWriter<W> {
    /// `pretty` only affects [`WriteFormat::Json`].
    pub fn new(writer: W, format: WriteFormat, pretty: bool) -> Self {
        Self {
            writer,
            format,
            pretty,
            records_written: 0,
            items_finished: 0,
        }
    }

    /// NDJSON writer, the layout used for event streams.
    pub fn ndjson(writer: W) -> Self {
        Self::new(writer, WriteFormat::Ndjson, false)
    }

    /// Write one record followed by a newline.
    pub fn write<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        if self.pretty && self.format == WriteFormat::Json {
            serde_json::to_writer_pretty(&mut self.writer, record).map_err(io::Error::other)?;
        } else {
            serde_json::to_writer(&mut self.writer, record).map_err(io::Error::other)?;
        }
        writeln!(self.writer)?;
        self.records_written += 1;
        Ok(())
    }

    /// Write a progress event. Item events are flushed immediately so a
    /// tailing reader sees them as they happen.
    pub fn write_event(&mut self, event: &ProgressEvent) -> io::Result<()> {
        self.write(event)?;
        if event.is_item_terminal() {
            self.items_finished += 1;
        }
        self.writer.flush()
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Completed or failed items seen so far.
    pub fn items_finished(&self) -> usize {
        self.items_finished
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Serialize one record as a single NDJSON line, newline included.
pub fn to_ndjson_line<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}
