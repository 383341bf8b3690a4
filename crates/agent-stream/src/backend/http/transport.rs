/// Splits a chunked response body into lines.
///
/// Chunk boundaries may fall anywhere, including inside a multi-byte UTF-8
/// sequence or between `\r` and `\n`.
#[derive(Default)]
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=idx).collect();
            lines.push(decode_line_bytes(&line_bytes[..idx]));
        }
        lines
    }

    /// Returns the trailing partial line once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line_bytes(&rest))
    }
}

fn decode_line_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_partial_chunk_boundaries() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(b"data: {\"type\":\"assis").is_empty());
        let lines = decoder.push_chunk(b"tant\"}\r\n\r\ndata: next");
        assert_eq!(lines, vec!["data: {\"type\":\"assistant\"}".to_string(), String::new()]);
        assert_eq!(decoder.finish().as_deref(), Some("data: next"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn multibyte_sequences_split_across_chunks_survive() {
        let text = "héllo\n".as_bytes();
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(&text[..2]).is_empty());
        assert_eq!(decoder.push_chunk(&text[2..]), vec!["héllo".to_string()]);
    }
}
