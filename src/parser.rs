//! Streaming XML reader that yields one record tree per top-level element.

use crate::config::INPUT_BUFFER_SIZE;
use crate::error::ParseError;
use crate::tree::{RecordNode, TreeBuilder};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};

pub struct WikiReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    builder: TreeBuilder,
    finished: bool,
}

impl WikiReader<Box<dyn BufRead>> {
    /// Opens a dump on disk. Files ending in `.bz2` are decompressed on the fly;
    /// multistream archives are read to the end.
    pub fn open(path: &str) -> Result<Self, ParseError> {
        let file = File::open(path)?;
        let inner: Box<dyn BufRead> = if path.ends_with(".bz2") {
            Box::new(BufReader::with_capacity(
                INPUT_BUFFER_SIZE,
                MultiBzDecoder::new(file),
            ))
        } else {
            Box::new(BufReader::with_capacity(INPUT_BUFFER_SIZE, file))
        };
        Ok(Self::from_reader(inner))
    }
}

impl<R: BufRead> WikiReader<R> {
    pub fn from_reader(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.trim_text(false);
        reader.expand_empty_elements(false);
        Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
            builder: TreeBuilder::new(),
            finished: false,
        }
    }

    /// Pulls events until the next top-level record is complete.
    ///
    /// Returns `Ok(None)` once the document is exhausted. Any error is final:
    /// later calls return `Ok(None)`.
    pub fn next_record(&mut self) -> Result<Option<RecordNode>, ParseError> {
        if self.finished {
            return Ok(None);
        }
        let result = self.pull();
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    fn pull(&mut self) -> Result<Option<RecordNode>, ParseError> {
        loop {
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(source) => return Err(xml_error(&self.reader, source)),
            };

            let record = match event {
                Event::Start(e) => {
                    let (name, attrs) = element_parts(&self.reader, &e)?;
                    self.builder.open(&name, attrs);
                    None
                }
                Event::Empty(e) => {
                    let (name, attrs) = element_parts(&self.reader, &e)?;
                    self.builder.open(&name, attrs);
                    self.builder.close()
                }
                Event::End(_) => self.builder.close(),
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| xml_error(&self.reader, e))?;
                    self.builder.text(&text);
                    None
                }
                Event::CData(c) => {
                    let bytes = c.into_inner();
                    self.builder.text(&String::from_utf8_lossy(&bytes));
                    None
                }
                Event::Eof => return self.end_of_input(),
                Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => None,
            };
            self.buf.clear();

            if record.is_some() {
                return Ok(record);
            }
        }
    }

    fn end_of_input(&self) -> Result<Option<RecordNode>, ParseError> {
        if !self.builder.has_root() {
            return Err(ParseError::EmptyDocument);
        }
        if !self.builder.is_complete() {
            let element = self.builder.open_element().unwrap_or_default().to_string();
            let depth = self.builder.depth() + 1;
            return Err(ParseError::UnexpectedEof { element, depth });
        }
        Ok(None)
    }

    pub fn records_read(&self) -> u64 {
        self.builder.records_emitted()
    }

    pub fn peak_depth(&self) -> usize {
        self.builder.peak_depth()
    }

    /// Byte offset into the (decompressed) input.
    pub fn position(&self) -> usize {
        self.reader.buffer_position()
    }
}

impl<R: BufRead> Iterator for WikiReader<R> {
    type Item = Result<RecordNode, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Drives `reader` to the end, handing every record to `on_record`.
///
/// Stops at the first parse error or callback error; returns the number of
/// records delivered.
pub fn for_each_record<R, E, F>(reader: &mut WikiReader<R>, mut on_record: F) -> Result<u64, E>
where
    R: BufRead,
    E: From<ParseError>,
    F: FnMut(RecordNode) -> Result<(), E>,
{
    let mut delivered = 0;
    while let Some(record) = reader.next_record()? {
        on_record(record)?;
        delivered += 1;
    }
    Ok(delivered)
}

fn element_parts<R>(
    reader: &Reader<R>,
    e: &BytesStart<'_>,
) -> Result<(String, Vec<(String, String)>), ParseError> {
    let decoder = reader.decoder();
    let name = decoder
        .decode(e.name().as_ref())
        .map_err(|err| xml_error(reader, err))?
        .into_owned();

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(reader, err))?;
        let key = decoder
            .decode(attr.key.as_ref())
            .map_err(|err| xml_error(reader, err))?
            .into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| xml_error(reader, err))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok((name, attrs))
}

fn xml_error<R>(reader: &Reader<R>, source: impl Into<quick_xml::Error>) -> ParseError {
    ParseError::Xml {
        position: reader.buffer_position(),
        source: source.into(),
    }
}
