//! HPACK (RFC 7541) header compression, kept behind a thin context wrapping
//! the `hpack` crate's encoder/decoder. Two independent contexts exist per
//! connection — one per direction — each owning its own dynamic table.

use crate::error::ConnectionError;
use bytes::Bytes;

/// A single decoded or to-be-encoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Encodes outbound header lists against this connection's encode-direction
/// dynamic table.
pub struct Encoder {
    inner: hpack::Encoder<'static>,
    table_size: usize,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder").field("table_size", &self.table_size).finish()
    }
}

impl Encoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: hpack::Encoder::new(),
            table_size: crate::settings::DEFAULT_HEADER_TABLE_SIZE as usize,
        }
    }

    /// Applies a `SETTINGS_HEADER_TABLE_SIZE` value advertised by the peer.
    /// The dynamic-table-size-update instruction this produces must precede
    /// the next header block; `hpack::Encoder` handles that internally.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.table_size = size;
        self.inner.set_max_table_size(size);
    }

    pub fn encode<'a>(&mut self, headers: impl IntoIterator<Item = &'a HeaderField>) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .into_iter()
            .map(|h| (h.name.as_ref(), h.value.as_ref()))
            .collect();
        self.inner.encode(pairs)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes inbound header blocks against this connection's decode-direction
/// dynamic table. Header blocks must be fed to this decoder in strict wire
/// order even if the owning stream has since been reset.
pub struct Decoder {
    inner: hpack::Decoder<'static>,
    max_table_size: usize,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder").field("max_table_size", &self.max_table_size).finish()
    }
}

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: hpack::Decoder::new(),
            max_table_size: crate::settings::DEFAULT_HEADER_TABLE_SIZE as usize,
        }
    }

    /// Our own `SETTINGS_HEADER_TABLE_SIZE`, i.e. the ceiling the peer's
    /// dynamic-table-size-update instructions must not exceed.
    pub fn set_max_allowed_table_size(&mut self, size: usize) {
        self.max_table_size = size;
        self.inner.set_max_table_size(size);
    }

    /// Decodes one complete header block (HEADERS + any CONTINUATIONs,
    /// already reassembled by the caller). Any decode failure is a
    /// connection-fatal COMPRESSION_ERROR per RFC 7541 4.2.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, ConnectionError> {
        self.inner
            .decode(block)
            .map(|pairs| {
                pairs
                    .into_iter()
                    .map(|(name, value)| HeaderField::new(name, value))
                    .collect()
            })
            .map_err(|err| ConnectionError::compression(format!("HPACK decode error: {err:?}")))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-connection pair of HPACK contexts: one per direction. Confined to
/// the connection task — this is an ownership boundary, not a lock.
#[derive(Debug)]
pub struct Context {
    pub encoder: Encoder,
    pub decoder: Decoder,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: Encoder::new(),
            decoder: Decoder::new(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
