//! Packed variable-length string storage.
//!
//! Layout of a buffer holding `n` words:
//!
//! ```text
//! +-----------------------------+---------------------------+
//! | header: (n + 1) x u64 (LE)  | payload: concatenated text |
//! +-----------------------------+---------------------------+
//! ```
//!
//! `header[0] == 0`, `header[n]` is the payload length, and word `i` is
//! `payload[header[i]..header[i + 1]]`. Offsets are byte offsets into the
//! payload.

use tracing::debug;

use crate::array::NumericArray;
use crate::buffer::TypedBuffer;
use crate::dtype::ElementType;
use crate::error::{BufferError, Result};
use crate::region::Region;
use crate::workspace::Workspace;

/// Width of one header offset.
pub const OFFSET_WIDTH: usize = 8;

/// How text is turned into payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEncoding {
    /// Standard UTF-8.
    #[default]
    Utf8,
    /// One byte per character, keeping the low 8 bits of each code point.
    /// Lossless only for text in the Latin-1 range.
    Latin1Truncating,
}

impl StringEncoding {
    fn encoded_len(self, s: &str) -> usize {
        match self {
            StringEncoding::Utf8 => s.len(),
            StringEncoding::Latin1Truncating => s.chars().count(),
        }
    }

    fn encode_into(self, s: &str, out: &mut [u8]) {
        match self {
            StringEncoding::Utf8 => out.copy_from_slice(s.as_bytes()),
            StringEncoding::Latin1Truncating => {
                for (dst, c) in out.iter_mut().zip(s.chars()) {
                    *dst = (c as u32 & 0xFF) as u8;
                }
            }
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            StringEncoding::Utf8 => Ok(String::from_utf8(bytes.to_vec())?),
            StringEncoding::Latin1Truncating => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    fn decode_lossy(self, bytes: &[u8]) -> String {
        match self {
            StringEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            StringEncoding::Latin1Truncating => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

fn header_len(num_words: usize) -> Result<usize> {
    num_words
        .checked_add(1)
        .and_then(|n| n.checked_mul(OFFSET_WIDTH))
        .ok_or(BufferError::AllocationFailed { bytes: usize::MAX })
}

fn read_offset(bytes: &[u8], slot: usize) -> u64 {
    let at = slot * OFFSET_WIDTH;
    let mut raw = [0u8; OFFSET_WIDTH];
    raw.copy_from_slice(&bytes[at..at + OFFSET_WIDTH]);
    u64::from_le_bytes(raw)
}

fn write_offset(bytes: &mut [u8], slot: usize, value: u64) {
    let at = slot * OFFSET_WIDTH;
    bytes[at..at + OFFSET_WIDTH].copy_from_slice(&value.to_le_bytes());
}

fn packed_len<S: AsRef<str>>(strings: &[S], encoding: StringEncoding) -> Result<usize> {
    strings
        .iter()
        .try_fold(header_len(strings.len())?, |total, s| {
            total.checked_add(encoding.encoded_len(s.as_ref()))
        })
        .ok_or(BufferError::AllocationFailed { bytes: usize::MAX })
}

fn write_packed<S: AsRef<str>>(bytes: &mut [u8], strings: &[S], encoding: StringEncoding) {
    let header = strings.len().saturating_add(1) * OFFSET_WIDTH;
    let mut cursor = 0usize;
    for (slot, s) in strings.iter().enumerate() {
        write_offset(bytes, slot, cursor as u64);
        let n = encoding.encoded_len(s.as_ref());
        let at = header + cursor;
        encoding.encode_into(s.as_ref(), &mut bytes[at..at + n]);
        cursor += n;
    }
    write_offset(bytes, strings.len(), cursor as u64);
}

/// Byte range of word `index` within the whole region.
fn word_range(bytes: &[u8], num_words: usize, index: usize) -> Result<std::ops::Range<usize>> {
    let start = read_offset(bytes, index);
    let end = read_offset(bytes, index + 1);
    if end < start {
        return Err(BufferError::CorruptHeader(format!(
            "word {index} ends at {end} before it starts at {start}"
        )));
    }
    let len = end - start;
    if len > isize::MAX as u64 {
        return Err(BufferError::TooLarge { len });
    }
    let header = (num_words + 1) * OFFSET_WIDTH;
    let begin = usize::try_from(start)
        .ok()
        .and_then(|s| s.checked_add(header))
        .ok_or(BufferError::TooLarge { len: start })?;
    let finish = begin
        .checked_add(len as usize)
        .filter(|&f| f <= bytes.len())
        .ok_or_else(|| {
            BufferError::CorruptHeader(format!(
                "word {index} spans past the {} byte region",
                bytes.len()
            ))
        })?;
    Ok(begin..finish)
}

/// A buffer of `num_words` strings packed behind an offset header.
#[derive(Debug)]
pub struct Utf8Buffer {
    region: Region,
    num_words: usize,
    encoding: StringEncoding,
}

impl Utf8Buffer {
    /// Room for `num_words` empty strings: a zeroed header and no payload.
    pub fn with_words(num_words: usize) -> Result<Self> {
        let region = Region::heap(header_len(num_words)?)?;
        debug!(num_words, bytes = region.len(), "string buffer allocated");
        Ok(Self {
            region,
            num_words,
            encoding: StringEncoding::Utf8,
        })
    }

    /// Like [`with_words`](Self::with_words), inside `workspace`.
    pub fn with_words_in(workspace: &Workspace, num_words: usize) -> Result<Self> {
        let region = Region::in_workspace(workspace, header_len(num_words)?, true)?;
        Ok(Self {
            region,
            num_words,
            encoding: StringEncoding::Utf8,
        })
    }

    /// Pack `strings` in order as UTF-8.
    pub fn from_strings<S: AsRef<str>>(strings: &[S]) -> Result<Self> {
        Self::from_strings_with(strings, StringEncoding::Utf8)
    }

    /// Pack `strings` in order with the given encoding.
    ///
    /// The total size is computed first so the region is allocated once.
    pub fn from_strings_with<S: AsRef<str>>(
        strings: &[S],
        encoding: StringEncoding,
    ) -> Result<Self> {
        let total = packed_len(strings, encoding)?;
        let region = Region::heap(total)?;
        region.write(|bytes| write_packed(bytes, strings, encoding))?;
        debug!(num_words = strings.len(), bytes = total, ?encoding, "string buffer packed");
        Ok(Self {
            region,
            num_words: strings.len(),
            encoding,
        })
    }

    /// Pack `strings` as UTF-8 inside `workspace`.
    pub fn from_strings_in<S: AsRef<str>>(workspace: &Workspace, strings: &[S]) -> Result<Self> {
        let encoding = StringEncoding::Utf8;
        let total = packed_len(strings, encoding)?;
        let region = Region::in_workspace(workspace, total, true)?;
        region.write(|bytes| write_packed(bytes, strings, encoding))?;
        Ok(Self {
            region,
            num_words: strings.len(),
            encoding,
        })
    }

    /// Adopt caller-prepared header and payload bytes, trusting `num_words`.
    ///
    /// Only the header's size is checked here; malformed offsets surface as
    /// `CorruptHeader` when the affected word is read.
    pub fn from_raw_bytes(bytes: Vec<u8>, num_words: usize) -> Result<Self> {
        Self::from_raw_bytes_with(bytes, num_words, StringEncoding::Utf8)
    }

    pub fn from_raw_bytes_with(
        bytes: Vec<u8>,
        num_words: usize,
        encoding: StringEncoding,
    ) -> Result<Self> {
        let header = header_len(num_words)?;
        if bytes.len() < header {
            return Err(BufferError::CorruptHeader(format!(
                "{} words need a {header} byte header, got {} bytes",
                num_words,
                bytes.len()
            )));
        }
        Ok(Self {
            region: Region::from_vec(bytes),
            num_words,
            encoding,
        })
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn encoding(&self) -> StringEncoding {
        self.encoding
    }

    /// Size of header plus payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.region.len()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.num_words {
            return Err(BufferError::IndexOutOfRange {
                index,
                len: self.num_words,
            });
        }
        Ok(())
    }

    /// Decode word `index`.
    ///
    /// # Errors
    /// `IndexOutOfRange` when `index >= num_words`, `CorruptHeader` or
    /// `TooLarge` for an inconsistent header, and `Encoding` if a UTF-8
    /// buffer holds invalid bytes.
    pub fn get_string(&self, index: usize) -> Result<String> {
        self.check_index(index)?;
        let (num_words, encoding) = (self.num_words, self.encoding);
        self.region.read(|bytes| {
            let range = word_range(bytes, num_words, index)?;
            encoding.decode(&bytes[range])
        })?
    }

    /// Decode word `index`, replacing invalid UTF-8 sequences.
    pub fn get_string_lossy(&self, index: usize) -> Result<String> {
        self.check_index(index)?;
        let (num_words, encoding) = (self.num_words, self.encoding);
        self.region.read(|bytes| {
            let range = word_range(bytes, num_words, index)?;
            Ok(encoding.decode_lossy(&bytes[range]))
        })?
    }

    /// Decode every word under a single read lock.
    pub fn strings(&self) -> Result<Vec<String>> {
        let (num_words, encoding) = (self.num_words, self.encoding);
        self.region.read(|bytes| {
            (0..num_words)
                .map(|i| encoding.decode(&bytes[word_range(bytes, num_words, i)?]))
                .collect()
        })?
    }

    /// The `num_words + 1` header offsets.
    pub fn header(&self) -> Result<Vec<u64>> {
        let num_words = self.num_words;
        self.region
            .read(|bytes| (0..=num_words).map(|slot| read_offset(bytes, slot)).collect())
    }

    /// Payload length as recorded in the final header slot.
    pub fn payload_len(&self) -> Result<u64> {
        let num_words = self.num_words;
        self.region.read(|bytes| read_offset(bytes, num_words))
    }

    /// A non-owning buffer over the same header and payload.
    pub fn view(&self) -> Result<Self> {
        Ok(Self {
            region: self.region.view(0, self.region.len())?,
            num_words: self.num_words,
            encoding: self.encoding,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }
}

impl TypedBuffer for Utf8Buffer {
    fn element_type(&self) -> ElementType {
        ElementType::Utf8
    }

    fn element_size(&self) -> usize {
        1
    }

    fn len(&self) -> usize {
        self.num_words
    }

    fn owns_memory(&self) -> bool {
        self.region.owns_memory()
    }

    fn is_attached(&self) -> bool {
        self.region.is_attached()
    }

    /// Strings never convert to numbers.
    fn as_type(&self, target: ElementType) -> Result<NumericArray> {
        Err(BufferError::UnsupportedConversion {
            from: ElementType::Utf8,
            to: target,
        })
    }

    fn to_le_bytes(&self) -> Result<Vec<u8>> {
        self.region.to_vec()
    }

    fn duplicate(&self) -> Result<Self> {
        let bytes = self.region.to_vec()?;
        Ok(Self {
            region: Region::copy_of(&bytes)?,
            num_words: self.num_words,
            encoding: self.encoding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;

    #[test]
    fn test_pack_and_read_back() {
        let b = Utf8Buffer::from_strings(&["a", "bb", "ccc"]).unwrap();
        assert_eq!(b.num_words(), 3);
        assert_eq!(b.header().unwrap(), vec![0, 1, 3, 6]);
        assert_eq!(b.get_string(0).unwrap(), "a");
        assert_eq!(b.get_string(1).unwrap(), "bb");
        assert_eq!(b.get_string(2).unwrap(), "ccc");
        assert_eq!(b.byte_len(), 4 * OFFSET_WIDTH + 6);
    }

    #[test]
    fn test_index_bounds() {
        let b = Utf8Buffer::from_strings(&["x", "y"]).unwrap();
        assert!(b.get_string(1).is_ok());
        assert!(matches!(
            b.get_string(2),
            Err(BufferError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(b.get_string(100).is_err());
    }

    #[test]
    fn test_empty_collection() {
        let empty: [&str; 0] = [];
        let b = Utf8Buffer::from_strings(&empty).unwrap();
        assert_eq!(b.num_words(), 0);
        assert_eq!(b.header().unwrap(), vec![0]);
        assert!(matches!(
            b.get_string(0),
            Err(BufferError::IndexOutOfRange { .. })
        ));
        assert!(b.is_empty());
    }

    #[test]
    fn test_with_words_are_empty_strings() {
        let b = Utf8Buffer::with_words(3).unwrap();
        assert_eq!(b.header().unwrap(), vec![0; 4]);
        assert_eq!(b.strings().unwrap(), vec![String::new(); 3]);
        assert_eq!(b.payload_len().unwrap(), 0);
    }

    #[test]
    fn test_multibyte_utf8() {
        let b = Utf8Buffer::from_strings(&["héllo", "€", ""]).unwrap();
        assert_eq!(b.header().unwrap(), vec![0, 6, 9, 9]);
        assert_eq!(b.strings().unwrap(), vec!["héllo", "€", ""]);
    }

    #[test]
    fn test_latin1_truncating() {
        let b = Utf8Buffer::from_strings_with(&["héllo", "€"], StringEncoding::Latin1Truncating)
            .unwrap();
        assert_eq!(b.header().unwrap(), vec![0, 5, 6]);
        assert_eq!(b.get_string(0).unwrap(), "héllo");
        // U+20AC keeps only its low byte, 0xAC.
        assert_eq!(b.get_string(1).unwrap(), "\u{AC}");
    }

    #[test]
    fn test_duplicate_keeps_word_count() {
        let b = Utf8Buffer::from_strings(&["one", "two"]).unwrap();
        let d = b.duplicate().unwrap();
        assert_eq!(d.num_words(), b.num_words());
        assert_eq!(d.strings().unwrap(), vec!["one", "two"]);
        assert!(d.owns_memory());
        d.region().write(|bytes| bytes[3 * OFFSET_WIDTH] = b'X').unwrap();
        assert_eq!(b.get_string(0).unwrap(), "one");
        assert_eq!(d.get_string(0).unwrap(), "Xne");
    }

    #[test]
    fn test_view_does_not_own() {
        let b = Utf8Buffer::from_strings(&["v"]).unwrap();
        let v = b.view().unwrap();
        assert!(!v.owns_memory());
        assert_eq!(v.get_string(0).unwrap(), "v");
        drop(v);
        assert_eq!(b.get_string(0).unwrap(), "v");
        let v = b.view().unwrap();
        drop(b);
        assert!(matches!(v.get_string(0), Err(BufferError::SourceReleased)));
    }

    #[test]
    fn test_raw_bytes_roundtrip() {
        let b = Utf8Buffer::from_strings(&["ab", "c"]).unwrap();
        let raw = Utf8Buffer::from_raw_bytes(b.to_le_bytes().unwrap(), 2).unwrap();
        assert_eq!(raw.strings().unwrap(), vec!["ab", "c"]);
        assert!(matches!(
            Utf8Buffer::from_raw_bytes(vec![0; 8], 1),
            Err(BufferError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_corrupt_headers() {
        let mut bytes = vec![0u8; 16];
        bytes[..8].copy_from_slice(&5u64.to_le_bytes());
        let backwards = Utf8Buffer::from_raw_bytes(bytes, 1).unwrap();
        assert!(matches!(
            backwards.get_string(0),
            Err(BufferError::CorruptHeader(_))
        ));

        let mut bytes = vec![0u8; 16];
        bytes[8..].copy_from_slice(&u64::MAX.to_le_bytes());
        let huge = Utf8Buffer::from_raw_bytes(bytes, 1).unwrap();
        assert!(matches!(huge.get_string(0), Err(BufferError::TooLarge { .. })));

        let mut bytes = vec![0u8; 16];
        bytes[8..].copy_from_slice(&4u64.to_le_bytes());
        let short = Utf8Buffer::from_raw_bytes(bytes, 1).unwrap();
        assert!(matches!(short.get_string(0), Err(BufferError::CorruptHeader(_))));
    }

    #[test]
    fn test_invalid_utf8_payload() {
        let mut bytes = vec![0u8; 17];
        bytes[8..16].copy_from_slice(&1u64.to_le_bytes());
        bytes[16] = 0xFF;
        let b = Utf8Buffer::from_raw_bytes(bytes, 1).unwrap();
        assert!(matches!(b.get_string(0), Err(BufferError::Encoding(_))));
        assert_eq!(b.get_string_lossy(0).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn test_strings_are_not_numeric() {
        let b = Utf8Buffer::from_strings(&["1"]).unwrap();
        assert!(matches!(
            b.as_type(ElementType::Int32),
            Err(BufferError::UnsupportedConversion {
                from: ElementType::Utf8,
                to: ElementType::Int32
            })
        ));
        assert_eq!(b.element_size(), 1);
        assert_eq!(ElementType::Utf8.size_in_bytes(), 0);
    }

    #[test]
    fn test_workspace_strings() {
        let ws = Workspace::new(WorkspaceConfig::new(512)).unwrap();
        let b = Utf8Buffer::from_strings_in(&ws, &["w", "s"]).unwrap();
        assert!(b.is_attached());
        assert_eq!(b.strings().unwrap(), vec!["w", "s"]);
        ws.reset();
        assert!(matches!(b.get_string(0), Err(BufferError::StaleHandle { .. })));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn header_invariants_hold(words in proptest::collection::vec(".*", 0..12)) {
                let b = Utf8Buffer::from_strings(&words).unwrap();
                let header = b.header().unwrap();
                prop_assert_eq!(header.len(), words.len() + 1);
                prop_assert_eq!(header[0], 0);
                prop_assert!(header.windows(2).all(|w| w[0] <= w[1]));
                let payload: usize = words.iter().map(|w| w.len()).sum();
                prop_assert_eq!(header[words.len()], payload as u64);
                prop_assert_eq!(b.strings().unwrap(), words);
            }

            #[test]
            fn duplicate_matches_source(words in proptest::collection::vec("[a-z]{0,8}", 1..8)) {
                let b = Utf8Buffer::from_strings(&words).unwrap();
                let d = b.duplicate().unwrap();
                prop_assert_eq!(d.num_words(), b.num_words());
                prop_assert_eq!(d.to_le_bytes().unwrap(), b.to_le_bytes().unwrap());
            }
        }
    }
}
