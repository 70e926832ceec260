// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Object writer — the serialisation primitives image embedding is built on,
// with an implementation over an in-memory `lopdf::Document`.
//
// An image object is written as: begin dictionary → fields → allocate the
// length object → begin stream → stream the data → end stream → patch the
// length object with the byte count.

use bildwerk_core::error::{BildwerkError, Result};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::trace;

/// Low-level object output used by the image embedder.
pub trait ObjectWriter {
    /// Reserve an object number for an object written later.
    fn alloc_id(&mut self) -> ObjectId;

    /// Open a dictionary. Only one may be open at a time.
    fn begin_dict(&mut self) -> Result<()>;

    /// Set a key in the open dictionary.
    fn put(&mut self, key: &str, value: Object) -> Result<()>;

    /// Close the open dictionary as a standalone object.
    fn end_dict(&mut self) -> Result<ObjectId>;

    /// Turn the open dictionary into a stream whose `/Length` refers to
    /// `length`.
    fn begin_stream(&mut self, length: ObjectId) -> Result<()>;

    /// Append payload bytes to the open stream.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Close the stream, returning its object id and payload length.
    fn end_stream(&mut self) -> Result<(ObjectId, u64)>;

    /// Store the final byte count in a reserved length object.
    fn patch_length(&mut self, length: ObjectId, value: u64) -> Result<()>;

    /// Add a complete object (colour space arrays, lookup streams).
    fn add_object(&mut self, object: Object) -> ObjectId;

    /// Drop any open dictionary or stream after a failed write.
    fn abort(&mut self);
}

/// Writer state between primitive calls.
#[derive(Debug, Default)]
enum Pending {
    #[default]
    Idle,
    Dict(Dictionary),
    Stream {
        dict: Dictionary,
        length: ObjectId,
        data: Vec<u8>,
    },
}

/// [`ObjectWriter`] that adds objects to a `lopdf::Document`.
pub struct PdfObjectWriter {
    doc: Document,
    pending: Pending,
}

impl PdfObjectWriter {
    /// Write into a fresh PDF 1.7 document.
    pub fn new() -> Self {
        Self::with_document(Document::with_version("1.7"))
    }

    /// Write into an existing document.
    pub fn with_document(doc: Document) -> Self {
        Self {
            doc,
            pending: Pending::Idle,
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Hand back the document once every object has been written.
    pub fn into_document(self) -> Result<Document> {
        match self.pending {
            Pending::Idle => Ok(self.doc),
            _ => Err(BildwerkError::PdfError(
                "document taken while an object is still open".into(),
            )),
        }
    }
}

impl Default for PdfObjectWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn state_error(expected: &str) -> BildwerkError {
    BildwerkError::PdfError(format!("object writer: expected {expected}"))
}

impl ObjectWriter for PdfObjectWriter {
    fn alloc_id(&mut self) -> ObjectId {
        self.doc.new_object_id()
    }

    fn begin_dict(&mut self) -> Result<()> {
        match self.pending {
            Pending::Idle => {
                self.pending = Pending::Dict(Dictionary::new());
                Ok(())
            }
            _ => Err(state_error("no open object")),
        }
    }

    fn put(&mut self, key: &str, value: Object) -> Result<()> {
        match &mut self.pending {
            Pending::Dict(dict) => {
                dict.set(key, value);
                Ok(())
            }
            _ => Err(state_error("an open dictionary")),
        }
    }

    fn end_dict(&mut self) -> Result<ObjectId> {
        match std::mem::take(&mut self.pending) {
            Pending::Dict(dict) => Ok(self.doc.add_object(dict)),
            other => {
                self.pending = other;
                Err(state_error("an open dictionary"))
            }
        }
    }

    fn begin_stream(&mut self, length: ObjectId) -> Result<()> {
        match std::mem::take(&mut self.pending) {
            Pending::Dict(dict) => {
                self.pending = Pending::Stream {
                    dict,
                    length,
                    data: Vec::new(),
                };
                Ok(())
            }
            other => {
                self.pending = other;
                Err(state_error("an open dictionary"))
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.pending {
            Pending::Stream { data, .. } => {
                data.try_reserve(bytes.len())
                    .map_err(|_| BildwerkError::exhausted("stream data", bytes.len()))?;
                data.extend_from_slice(bytes);
                Ok(())
            }
            _ => Err(state_error("an open stream")),
        }
    }

    fn end_stream(&mut self) -> Result<(ObjectId, u64)> {
        match std::mem::take(&mut self.pending) {
            Pending::Stream { dict, length, data } => {
                let len = data.len() as u64;
                // Stream::new stores a literal length; point it at the
                // reserved object instead.
                let mut stream = Stream::new(dict, data).with_compression(false);
                stream.dict.set("Length", Object::Reference(length));
                let id = self.doc.add_object(stream);
                trace!(?id, len, "Stream object written");
                Ok((id, len))
            }
            other => {
                self.pending = other;
                Err(state_error("an open stream"))
            }
        }
    }

    fn patch_length(&mut self, length: ObjectId, value: u64) -> Result<()> {
        let value = i64::try_from(value)
            .map_err(|_| BildwerkError::PdfError(format!("stream length {value} out of range")))?;
        self.doc.objects.insert(length, Object::Integer(value));
        Ok(())
    }

    fn add_object(&mut self, object: Object) -> ObjectId {
        self.doc.add_object(object)
    }

    fn abort(&mut self) {
        if !matches!(self.pending, Pending::Idle) {
            trace!("Open object discarded");
        }
        self.pending = Pending::Idle;
    }
}
