use std::io::{self, BufRead, BufReader, Write};

use flate2::read::MultiGzDecoder;

use crate::error::KiraError;
use crate::transport::{ByteStream, Transport};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const READ_BUFFER: usize = 256 * 1024;

#[derive(Debug, Default, Clone)]
pub struct FastqRecord {
    pub header: Vec<u8>,
    pub sequence: Vec<u8>,
    pub separator: Vec<u8>,
    pub quality: Vec<u8>,
}

impl FastqRecord {
    pub fn bases(&self) -> u64 {
        trim_newline(&self.sequence).len() as u64
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.header)?;
        out.write_all(&self.sequence)?;
        out.write_all(&self.separator)?;
        out.write_all(&self.quality)
    }

    fn validate(&self, index: u64) -> Result<(), KiraError> {
        if !self.header.starts_with(b"@") {
            return Err(KiraError::Decode(format!(
                "record {index}: header does not start with '@'"
            )));
        }
        if !self.separator.starts_with(b"+") {
            return Err(KiraError::Decode(format!(
                "record {index}: separator does not start with '+'"
            )));
        }
        let seq = trim_newline(&self.sequence).len();
        let qual = trim_newline(&self.quality).len();
        if seq != qual {
            return Err(KiraError::Decode(format!(
                "record {index}: sequence length {seq} differs from quality length {qual}"
            )));
        }
        Ok(())
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub fn decode_stream(stream: ByteStream) -> Result<Box<dyn BufRead + Send>, KiraError> {
    let mut raw = BufReader::with_capacity(READ_BUFFER, stream);
    let head = raw.fill_buf().map_err(|err| read_error("", err))?;
    if head.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(BufReader::with_capacity(
            READ_BUFFER,
            MultiGzDecoder::new(raw),
        )))
    } else {
        Ok(Box::new(raw))
    }
}

fn read_error(url: &str, err: io::Error) -> KiraError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            KiraError::Decode(format!("{url}: {err}"))
        }
        _ => KiraError::TransportExhausted {
            url: url.to_string(),
            attempts: 1,
            cause: err.to_string(),
        },
    }
}

/// Reads an ordered list of file parts as one record stream, decoding each part on its own.
///
/// This is not a plain byte concatenation: the end of a part always ends the current line,
/// so a part whose last line lacks a trailing newline gets one. Lane-split FASTQ parts
/// always end on a record boundary, so only malformed splits are affected.
pub struct RecordReader<'a, T: Transport> {
    transport: &'a T,
    urls: &'a [String],
    next_part: usize,
    current: Option<Box<dyn BufRead + Send>>,
    records: u64,
}

impl<'a, T: Transport> RecordReader<'a, T> {
    pub fn new(transport: &'a T, urls: &'a [String]) -> Self {
        Self {
            transport,
            urls,
            next_part: 0,
            current: None,
            records: 0,
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records
    }

    fn current_url(&self) -> &str {
        self.next_part
            .checked_sub(1)
            .and_then(|idx| self.urls.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn open_next_part(&mut self) -> Result<bool, KiraError> {
        let Some(url) = self.urls.get(self.next_part) else {
            self.current = None;
            return Ok(false);
        };
        tracing::debug!(
            part = self.next_part + 1,
            parts = self.urls.len(),
            url = url.as_str(),
            "opening part"
        );
        let stream = self
            .transport
            .fetch(url, &[], &[("Accept-Encoding", "identity")])?;
        self.current = Some(decode_stream(stream)?);
        self.next_part += 1;
        Ok(true)
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<bool, KiraError> {
        buf.clear();
        loop {
            if self.current.is_none() && !self.open_next_part()? {
                return Ok(false);
            }
            let read = match self.current.as_mut() {
                Some(reader) => reader.read_until(b'\n', buf),
                None => continue,
            };
            let read = read.map_err(|err| read_error(self.current_url(), err))?;
            if read == 0 {
                self.current = None;
                continue;
            }
            if !buf.ends_with(b"\n") {
                buf.push(b'\n');
            }
            return Ok(true);
        }
    }

    pub fn read_record(&mut self, record: &mut FastqRecord) -> Result<bool, KiraError> {
        loop {
            if !self.read_line(&mut record.header)? {
                return Ok(false);
            }
            if !trim_newline(&record.header).iter().all(u8::is_ascii_whitespace) {
                break;
            }
        }
        let index = self.records + 1;
        for line in [
            &mut record.sequence,
            &mut record.separator,
            &mut record.quality,
        ] {
            if !self.read_line(line)? {
                return Err(KiraError::Decode(format!(
                    "record {index}: input ended inside a record"
                )));
            }
        }
        record.validate(index)?;
        self.records = index;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;

    use assert_matches::assert_matches;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    struct MapTransport(HashMap<String, Vec<u8>>);

    impl Transport for MapTransport {
        fn fetch(
            &self,
            url: &str,
            _query: &[(&str, &str)],
            _headers: &[(&str, &str)],
        ) -> Result<ByteStream, KiraError> {
            let body = self.0.get(url).cloned().ok_or_else(|| KiraError::HttpStatus {
                url: url.to_string(),
                status: 404,
                message: "missing".to_string(),
            })?;
            Ok(Box::new(Cursor::new(body)))
        }
    }

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(transport: &MapTransport, urls: &[String]) -> Result<Vec<FastqRecord>, KiraError> {
        let mut reader = RecordReader::new(transport, urls);
        let mut out = Vec::new();
        let mut record = FastqRecord::default();
        while reader.read_record(&mut record)? {
            out.push(record.clone());
        }
        Ok(out)
    }

    #[test]
    fn mixed_compression_parts_form_one_stream() {
        let transport = MapTransport(HashMap::from([
            ("a".to_string(), gz(b"@r1\nACGT\n+\nIIII\n@r2\nAC")),
            ("b".to_string(), b"\n+\nII\n@r3\nA\n+\nI".to_vec()),
        ]));
        let urls = vec!["a".to_string(), "b".to_string()];
        let records = read_all(&transport, &urls);
        // "AC" is closed at the end of part a, so part b starts with an empty separator
        assert_matches!(records, Err(KiraError::Decode(_)));

        let transport = MapTransport(HashMap::from([
            ("a".to_string(), gz(b"@r1\nACGT\n+\nIIII\n@r2\nAC\n")),
            ("b".to_string(), b"+\nII\n@r3\nA\n+\nI".to_vec()),
        ]));
        let records = read_all(&transport, &urls).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].bases(), 2);
        assert_eq!(records[2].quality, b"I\n");
    }

    #[test]
    fn truncated_record_is_decode_error() {
        let transport = MapTransport(HashMap::from([(
            "a".to_string(),
            b"@r1\nACGT\n+\nIIII\n@r2\nACGT\n".to_vec(),
        )]));
        let urls = vec!["a".to_string()];
        assert_matches!(read_all(&transport, &urls), Err(KiraError::Decode(_)));
    }

    #[test]
    fn length_mismatch_is_decode_error() {
        let transport = MapTransport(HashMap::from([(
            "a".to_string(),
            b"@r1\nACGT\n+\nIII\n".to_vec(),
        )]));
        let urls = vec!["a".to_string()];
        assert_matches!(read_all(&transport, &urls), Err(KiraError::Decode(_)));
    }

    #[test]
    fn corrupt_gzip_is_decode_error() {
        let mut body = gz(b"@r1\nACGT\n+\nIIII\n");
        let len = body.len();
        body.truncate(len - 12);
        let transport = MapTransport(HashMap::from([("a".to_string(), body)]));
        let urls = vec!["a".to_string()];
        assert_matches!(read_all(&transport, &urls), Err(KiraError::Decode(_)));
    }

    #[test]
    fn trailing_blank_lines_are_ignored() {
        let transport = MapTransport(HashMap::from([(
            "a".to_string(),
            b"@r1\nACGT\n+\nIIII\n\n\n".to_vec(),
        )]));
        let urls = vec!["a".to_string()];
        assert_eq!(read_all(&transport, &urls).unwrap().len(), 1);
    }
}
