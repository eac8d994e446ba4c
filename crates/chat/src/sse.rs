//! Incremental server-sent-event decoding.
//!
//! Bytes arrive in arbitrary chunks. The decoder carries incomplete UTF-8
//! sequences and incomplete records over to the next chunk. Agent streams are
//! framed as blank-line separated blocks; completions streams are framed one
//! `data: ` line per record.

use std::collections::VecDeque;

use futures::{Stream, StreamExt, stream};

const BLOCK_SEPARATOR: &str = "\n\n";
const LINE_SEPARATOR: &str = "\n";
const DATA_PREFIX: &str = "data: ";
const DEFAULT_EVENT_TYPE: &str = "message";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Framing {
    /// `key: value` lines terminated by a blank line.
    #[default]
    Blocks,
    /// Every `data: ` line is a record of its own.
    DataLines,
}

/// One decoded `{event, data}` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: Option<String>,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: Option<String>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    framing: Framing,
    pending_bytes: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder for completions streams, where records end at a single newline.
    pub fn data_lines() -> Self {
        Self {
            framing: Framing::DataLines,
            ..Self::default()
        }
    }

    /// Feeds one chunk and returns every record it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.decode_utf8(chunk);

        let separator = match self.framing {
            Framing::Blocks => BLOCK_SEPARATOR,
            Framing::DataLines => LINE_SEPARATOR,
        };
        let mut events = Vec::new();
        while let Some(index) = self.buffer.find(separator) {
            let record = self.buffer[..index].to_string();
            self.buffer.drain(..index + separator.len());
            let event = match self.framing {
                Framing::Blocks => parse_block(&record),
                Framing::DataLines => parse_data_line(&record),
            };
            events.extend(event);
        }
        events
    }

    /// Ends the stream. Unterminated trailing content is discarded.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() || !self.pending_bytes.is_empty() {
            tracing::debug!(
                buffered_chars = self.buffer.len(),
                pending_bytes = self.pending_bytes.len(),
                "discarding unterminated record at end of stream"
            );
        }
        self.buffer.clear();
        self.pending_bytes.clear();
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);

        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending_bytes.clear();
                    return;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    // `valid_up_to` marks the end of the valid prefix.
                    if let Ok(valid) = std::str::from_utf8(&self.pending_bytes[..valid_up_to]) {
                        self.buffer.push_str(valid);
                    }

                    match error.error_len() {
                        // Incomplete sequence at the tail: wait for the next chunk.
                        None => {
                            self.pending_bytes.drain(..valid_up_to);
                            return;
                        }
                        Some(invalid_len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid_up_to + invalid_len);
                        }
                    }
                }
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = DEFAULT_EVENT_TYPE;
    let mut data = None;

    for line in block.split('\n') {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        match key {
            "event" => event = value,
            "data" => data = Some(value.to_string()),
            _ => {}
        }
    }

    // A bare `message` block with no data is a keep-alive.
    if event == DEFAULT_EVENT_TYPE && data.is_none() {
        return None;
    }

    Some(SseEvent::new(event, data))
}

fn parse_data_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    Some(SseEvent::new(DEFAULT_EVENT_TYPE, Some(data.to_string())))
}

struct DecodeState<S> {
    source: S,
    decoder: SseDecoder,
    ready: VecDeque<SseEvent>,
    finished: bool,
}

/// Adapts a byte stream into a lazy stream of decoded events.
///
/// A source error is yielded once and ends the stream. Dropping the returned
/// stream drops the source, which releases the underlying reader.
pub fn decode_event_stream<S, B, E>(source: S) -> impl Stream<Item = Result<SseEvent, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    decode_with(source, SseDecoder::new())
}

/// Like [`decode_event_stream`], but yields one `message` record per `data: `
/// line, for completions servers that end records with a single newline.
pub fn decode_data_line_stream<S, B, E>(source: S) -> impl Stream<Item = Result<SseEvent, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    decode_with(source, SseDecoder::data_lines())
}

fn decode_with<S, B, E>(source: S, decoder: SseDecoder) -> impl Stream<Item = Result<SseEvent, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        source,
        decoder,
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.ready.extend(events);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    state.decoder.finish();
                    return Some((Err(error), state));
                }
                None => {
                    state.finished = true;
                    state.decoder.finish();
                }
            }
        }
    })
}
