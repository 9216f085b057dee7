//! ICY (Shoutcast) protocol metadata handling.
//!
//! This module encapsulates the in-band metadata block format in both
//! directions: formatting and interleaving blocks into listener output, and
//! stripping them back out of an upstream relay feed.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use bytes::{Buf, Bytes, BytesMut};
use regex::Regex;

use super::StreamMetadata;
use crate::protocol_constants::{
    ICY_BLOCK_UNIT, ICY_MAX_METADATA_LEN, ICY_STREAM_TITLE, ICY_STREAM_URL,
};

/// Bytes `Key='';` adds around a title value.
const TITLE_OVERHEAD: usize = ICY_STREAM_TITLE.len() + 4;

/// Matches `key='value';` pairs, allowing `\'` inside values.
///
/// Any other backslash is an ordinary character.
fn pair_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\w+)='((?:\\'|[^'])*)';").ok())
        .as_ref()
}

fn escaped(c: char) -> Option<&'static str> {
    match c {
        '\'' => Some("\\'"),
        _ => None,
    }
}

/// Appends `value` escaped, stopping before the escaped text exceeds `budget` bytes.
///
/// Truncation happens on whole characters so an escape sequence is never split.
fn push_escaped(out: &mut String, value: &str, budget: usize) {
    let mut used = 0;
    for c in value.chars() {
        let len = escaped(c).map_or(c.len_utf8(), str::len);
        if used + len > budget {
            log::debug!("[ICY] Metadata value truncated to {} bytes", used);
            break;
        }
        match escaped(c) {
            Some(seq) => out.push_str(seq),
            None => out.push(c),
        }
        used += len;
    }
}

fn unescape(value: &str) -> String {
    value.replace("\\'", "'")
}

/// Encodes and decodes ICY metadata blocks.
///
/// Stateless: every call works on a single block.
pub struct IcyFormatter;

impl IcyFormatter {
    /// Formats metadata into an ICY metadata block.
    ///
    /// A single zero byte means "no metadata". Otherwise the first byte is the
    /// number of 16-byte units, followed by `StreamTitle='...';` (and
    /// `StreamUrl='...';` when set) NUL-padded to that length. Titles that
    /// would overflow the 255-unit limit are cut short.
    #[must_use]
    pub fn encode(metadata: &StreamMetadata) -> Vec<u8> {
        let url = metadata
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|u| {
                let mut part = format!("{ICY_STREAM_URL}='");
                push_escaped(
                    &mut part,
                    u,
                    ICY_MAX_METADATA_LEN - TITLE_OVERHEAD - ICY_STREAM_URL.len() - 4,
                );
                part.push_str("';");
                part
            });
        let url_len = url.as_ref().map_or(0, String::len);

        let mut text = String::new();
        if let Some(title) = metadata.title.as_deref().filter(|t| !t.is_empty()) {
            text.push_str(ICY_STREAM_TITLE);
            text.push_str("='");
            push_escaped(
                &mut text,
                title,
                ICY_MAX_METADATA_LEN - TITLE_OVERHEAD - url_len,
            );
            text.push_str("';");
        }
        if let Some(url) = url {
            text.push_str(&url);
        }

        if text.is_empty() {
            return vec![0];
        }

        log::trace!("[ICY] Encoded metadata block: {}", text);

        let units = text.len().div_ceil(ICY_BLOCK_UNIT);
        let mut block = Vec::with_capacity(1 + units * ICY_BLOCK_UNIT);
        // units <= 255 because text is bounded by ICY_MAX_METADATA_LEN
        block.push(units as u8);
        block.extend_from_slice(text.as_bytes());
        block.resize(1 + units * ICY_BLOCK_UNIT, 0);
        block
    }

    /// Decodes a metadata block (length byte included) into key/value pairs.
    ///
    /// Never fails: a truncated buffer is decoded as far as it goes, and text
    /// that does not look like `key='value';` is ignored.
    #[must_use]
    pub fn decode(block: &[u8]) -> BTreeMap<String, String> {
        let Some(&units) = block.first() else {
            return BTreeMap::new();
        };
        let len = units as usize * ICY_BLOCK_UNIT;
        if len == 0 {
            return BTreeMap::new();
        }
        let end = (1 + len).min(block.len());
        Self::decode_payload(&block[1..end])
    }

    /// Decodes the payload of a metadata block (length byte already consumed).
    #[must_use]
    pub fn decode_payload(payload: &[u8]) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end_matches('\0');
        let Some(pattern) = pair_pattern() else {
            return pairs;
        };
        for cap in pattern.captures_iter(text) {
            pairs.insert(cap[1].to_string(), unescape(&cap[2]));
        }
        pairs
    }
}

/// Stateful interleaver for ICY metadata blocks in listener output.
///
/// Tracks the audio byte position so a block lands after exactly every
/// `metaint` audio bytes, and caches the formatted block while metadata is
/// unchanged. Uses a reusable scratch buffer on the hot path.
///
/// Each instance serves a single listener connection.
pub struct IcyInterleaver {
    metaint: usize,
    bytes_since_meta: usize,
    cached_block: Vec<u8>,
    cached_for: Option<StreamMetadata>,
    output_buffer: BytesMut,
}

impl IcyInterleaver {
    /// Creates an interleaver for the given metadata interval.
    ///
    /// A `metaint` of zero is treated as one so the loop always progresses.
    #[must_use]
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint: metaint.max(1),
            bytes_since_meta: 0,
            cached_block: vec![0],
            cached_for: None,
            output_buffer: BytesMut::new(),
        }
    }

    fn block_for(&mut self, metadata: &StreamMetadata) -> usize {
        if self.cached_for.as_ref() != Some(metadata) {
            self.cached_block = IcyFormatter::encode(metadata);
            self.cached_for = Some(metadata.clone());
        }
        self.cached_block.len()
    }

    /// Writes `chunk` with metadata blocks inserted at every `metaint` boundary.
    pub fn interleave(&mut self, chunk: &[u8], metadata: &StreamMetadata) -> Bytes {
        let block_len = self.block_for(metadata);
        let insertions = (self.bytes_since_meta + chunk.len()) / self.metaint;
        self.output_buffer
            .reserve(chunk.len() + insertions * block_len);

        let mut remaining = chunk;
        while !remaining.is_empty() {
            let until_meta = self.metaint - self.bytes_since_meta;
            if remaining.len() < until_meta {
                self.output_buffer.extend_from_slice(remaining);
                self.bytes_since_meta += remaining.len();
                break;
            }
            self.output_buffer
                .extend_from_slice(&remaining[..until_meta]);
            self.output_buffer.extend_from_slice(&self.cached_block);
            remaining = &remaining[until_meta..];
            self.bytes_since_meta = 0;
        }

        self.output_buffer.split().freeze()
    }

    /// Audio bytes written since the last metadata block.
    #[must_use]
    pub fn bytes_since_meta(&self) -> usize {
        self.bytes_since_meta
    }
}

/// Output of [`IcyDemuxer::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxItem {
    /// Audio bytes with metadata removed.
    Audio(Bytes),
    /// A non-empty metadata block, decoded.
    Metadata(BTreeMap<String, String>),
}

enum DemuxState {
    Audio { remaining: usize },
    Length,
    Payload { remaining: usize, buf: BytesMut },
}

/// Splits an upstream ICY stream into audio and metadata.
///
/// Blocks may straddle any number of network reads; state carries over
/// between calls to [`feed`](Self::feed).
pub struct IcyDemuxer {
    metaint: usize,
    state: DemuxState,
}

impl IcyDemuxer {
    #[must_use]
    pub fn new(metaint: usize) -> Self {
        let metaint = metaint.max(1);
        Self {
            metaint,
            state: DemuxState::Audio { remaining: metaint },
        }
    }

    /// Consumes one network read and returns what it contained, in order.
    pub fn feed(&mut self, mut data: Bytes) -> Vec<DemuxItem> {
        let mut items = Vec::new();
        while !data.is_empty() {
            match &mut self.state {
                DemuxState::Audio { remaining } => {
                    let n = (*remaining).min(data.len());
                    items.push(DemuxItem::Audio(data.split_to(n)));
                    *remaining -= n;
                    if *remaining == 0 {
                        self.state = DemuxState::Length;
                    }
                }
                DemuxState::Length => {
                    let units = data.get_u8() as usize;
                    self.state = if units == 0 {
                        DemuxState::Audio {
                            remaining: self.metaint,
                        }
                    } else {
                        DemuxState::Payload {
                            remaining: units * ICY_BLOCK_UNIT,
                            buf: BytesMut::with_capacity(units * ICY_BLOCK_UNIT),
                        }
                    };
                }
                DemuxState::Payload { remaining, buf } => {
                    let n = (*remaining).min(data.len());
                    buf.extend_from_slice(&data.split_to(n));
                    *remaining -= n;
                    if *remaining == 0 {
                        let pairs = IcyFormatter::decode_payload(buf);
                        self.state = DemuxState::Audio {
                            remaining: self.metaint,
                        };
                        items.push(DemuxItem::Metadata(pairs));
                    }
                }
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod codec {
        use super::*;

        #[test]
        fn empty_metadata_is_single_zero_byte() {
            assert_eq!(IcyFormatter::encode(&StreamMetadata::default()), vec![0]);
            assert_eq!(
                IcyFormatter::encode(&StreamMetadata::titled("")),
                vec![0]
            );
        }

        #[test]
        fn title_is_padded_to_block_units() {
            let block = IcyFormatter::encode(&StreamMetadata::titled("Test Song"));
            // "StreamTitle='Test Song';" is 24 bytes -> two units
            assert_eq!(block[0], 2);
            assert_eq!(block.len(), 33);
            assert_eq!(&block[1..25], b"StreamTitle='Test Song';");
            assert!(block[25..].iter().all(|&b| b == 0));
        }

        #[test]
        fn quotes_are_escaped_and_restored() {
            let title = "It's Bob's \\ song";
            let block = IcyFormatter::encode(&StreamMetadata::titled(title));
            let text = String::from_utf8_lossy(&block[1..]);
            assert!(text.contains("It\\'s Bob\\'s"));

            let decoded = IcyFormatter::decode(&block);
            assert_eq!(decoded.get(ICY_STREAM_TITLE).map(String::as_str), Some(title));
        }

        #[test]
        fn backslashes_pass_through_unchanged() {
            let block = IcyFormatter::encode(&StreamMetadata::titled("AC\\DC"));
            assert_eq!(block[0], 2);
            assert_eq!(&block[1..21], b"StreamTitle='AC\\DC';");

            let mut upstream = vec![3u8];
            upstream.extend_from_slice(b"StreamTitle='AC\\DC';StreamUrl='C:\\';");
            upstream.resize(49, 0);
            let decoded = IcyFormatter::decode(&upstream);
            assert_eq!(decoded.get("StreamTitle").unwrap(), "AC\\DC");
            assert_eq!(decoded.get("StreamUrl").unwrap(), "C:\\");
        }

        #[test]
        fn url_is_encoded_after_title() {
            let metadata = StreamMetadata {
                title: Some("Song".into()),
                url: Some("http://example.com".into()),
            };
            let decoded = IcyFormatter::decode(&IcyFormatter::encode(&metadata));
            assert_eq!(decoded.get("StreamTitle").unwrap(), "Song");
            assert_eq!(decoded.get("StreamUrl").unwrap(), "http://example.com");
        }

        #[test]
        fn oversized_title_is_truncated_to_fit() {
            let title = "'".repeat(5000);
            let block = IcyFormatter::encode(&StreamMetadata::titled(title));
            assert_eq!(block[0], 255);
            assert_eq!(block.len(), 1 + ICY_MAX_METADATA_LEN);
            let decoded = IcyFormatter::decode(&block);
            let restored = decoded.get(ICY_STREAM_TITLE).unwrap();
            assert!(!restored.is_empty());
            assert!(restored.chars().all(|c| c == '\''));
        }

        #[test]
        fn decode_tolerates_garbage() {
            assert!(IcyFormatter::decode(&[]).is_empty());
            assert!(IcyFormatter::decode(&[0]).is_empty());
            // Declares 16 bytes but only carries 5
            assert!(IcyFormatter::decode(&[1, b'h', b'e', b'l', b'l', b'o']).is_empty());
            let mut partial = vec![2u8];
            partial.extend_from_slice(b"junk StreamTitle='ok'; trailing");
            let decoded = IcyFormatter::decode(&partial);
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded.get("StreamTitle").unwrap(), "ok");
        }
    }

    mod interleaver {
        use super::*;

        #[test]
        fn inserts_block_every_metaint_bytes() {
            let metaint = 100;
            let mut interleaver = IcyInterleaver::new(metaint);
            let metadata = StreamMetadata::titled("A");
            let block = IcyFormatter::encode(&metadata);

            // 3 * 100 + 42 audio bytes across uneven chunks
            let mut out = Vec::new();
            let mut audio = Vec::new();
            for (i, size) in [7usize, 150, 1, 99, 85].into_iter().enumerate() {
                let chunk: Vec<u8> = (0..size).map(|j| ((i * 31 + j) % 251) as u8 + 1).collect();
                audio.extend_from_slice(&chunk);
                out.extend_from_slice(&interleaver.interleave(&chunk, &metadata));
            }
            assert_eq!(audio.len(), 342);
            assert_eq!(out.len(), 342 + 3 * block.len());
            assert_eq!(interleaver.bytes_since_meta(), 42);

            let stride = metaint + block.len();
            for k in 0..3 {
                let audio_part = &out[k * stride..k * stride + metaint];
                assert_eq!(audio_part, &audio[k * metaint..(k + 1) * metaint]);
                assert_eq!(&out[k * stride + metaint..(k + 1) * stride], &block[..]);
            }
        }

        #[test]
        fn block_follows_metadata_changes() {
            let mut interleaver = IcyInterleaver::new(10);
            let first = interleaver.interleave(&[1; 10], &StreamMetadata::titled("A"));
            let second = interleaver.interleave(&[1; 10], &StreamMetadata::titled("B"));
            assert_ne!(first[10..], second[10..]);
            assert!(String::from_utf8_lossy(&second[11..]).contains("StreamTitle='B';"));
        }
    }

    mod demuxer {
        use super::*;

        fn collect(items: Vec<DemuxItem>, audio: &mut Vec<u8>, titles: &mut Vec<String>) {
            for item in items {
                match item {
                    DemuxItem::Audio(bytes) => audio.extend_from_slice(&bytes),
                    DemuxItem::Metadata(pairs) => {
                        titles.push(pairs.get(ICY_STREAM_TITLE).cloned().unwrap_or_default())
                    }
                }
            }
        }

        #[test]
        fn strips_blocks_split_across_reads() {
            let metaint = 16;
            let mut interleaver = IcyInterleaver::new(metaint);
            let audio_in: Vec<u8> = (0..40u8).collect();
            let mut wire = Vec::new();
            wire.extend_from_slice(&interleaver.interleave(&audio_in[..20], &StreamMetadata::titled("One")));
            wire.extend_from_slice(&interleaver.interleave(&audio_in[20..], &StreamMetadata::titled("Two")));

            let mut demuxer = IcyDemuxer::new(metaint);
            let mut audio = Vec::new();
            let mut titles = Vec::new();
            for piece in wire.chunks(3) {
                collect(
                    demuxer.feed(Bytes::copy_from_slice(piece)),
                    &mut audio,
                    &mut titles,
                );
            }
            assert_eq!(audio, audio_in);
            assert_eq!(titles, vec!["One".to_string(), "Two".to_string()]);
        }

        #[test]
        fn zero_length_block_produces_no_metadata() {
            let mut demuxer = IcyDemuxer::new(4);
            let items = demuxer.feed(Bytes::from_static(&[1, 2, 3, 4, 0, 5, 6]));
            assert_eq!(
                items,
                vec![
                    DemuxItem::Audio(Bytes::from_static(&[1, 2, 3, 4])),
                    DemuxItem::Audio(Bytes::from_static(&[5, 6])),
                ]
            );
        }
    }
}
