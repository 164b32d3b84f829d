//! Line-oriented text codec for capture logs.
//!
//! ```text
//! cnf time: 1414141414.123456
//! msg 0.000000 0 0 0 sensors/idle
//!
//! msg 1.250000 1 0 3 sensors/temp
//! 31 32 33
//! ```
//!
//! A log starts with zero or more `cnf` header lines followed by records. Each
//! record is a metadata line and a payload line of space separated hex octets;
//! the payload line is always present, empty for zero-length payloads.
//! Decoding is strict: anything that does not match the grammar is reported as
//! [`LogError::Format`] or [`LogError::TruncatedPayload`] with its line number.
use crate::error::LogError;
use crate::record::{LogHeader, LogRecord, MAX_PAYLOAD_LEN, Qos};
use std::fmt::Write as _;
use std::io::{BufRead, Seek, SeekFrom, Write};
use std::time::Duration;

const HEADER_PREFIX: &str = "cnf ";
const HEADER_TIME: &str = "cnf time: ";
const RECORD_TAG: &str = "msg";

fn push_time(out: &mut String, d: Duration) {
    let _ = write!(out, "{}.{:06}", d.as_secs(), d.subsec_micros());
}

/// Render the header line, including its newline.
pub fn encode_header(header: &LogHeader) -> String {
    let mut out = String::from(HEADER_TIME);
    push_time(&mut out, header.record_start);
    out.push('\n');
    out
}

/// Render both lines of a record, including the trailing newline.
pub fn encode_record(rec: &LogRecord) -> Result<String, LogError> {
    if rec.topic.is_empty() || rec.topic.chars().any(char::is_whitespace) {
        return Err(LogError::InvalidTopic(rec.topic.clone()));
    }
    if rec.payload.len() > MAX_PAYLOAD_LEN {
        return Err(LogError::PayloadTooLarge(rec.payload.len()));
    }
    let mut out = String::with_capacity(rec.topic.len() + 40 + rec.payload.len() * 3);
    out.push_str(RECORD_TAG);
    out.push(' ');
    push_time(&mut out, rec.relative_time);
    let _ = write!(
        out,
        " {} {} {} {}\n",
        rec.qos,
        u8::from(rec.retain),
        rec.payload.len(),
        rec.topic
    );
    for (i, b) in rec.payload.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out.push('\n');
    Ok(out)
}

/// Parse `<sec>.<usec>` where usec is an integer microsecond count.
fn parse_time(field: &str, line: usize) -> Result<Duration, LogError> {
    let (sec, usec) = field
        .split_once('.')
        .ok_or_else(|| LogError::format(line, format!("timestamp {field:?} has no '.'")))?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(sec) || !digits(usec) {
        return Err(LogError::format(line, format!("timestamp {field:?} is not numeric")));
    }
    let sec: u64 = sec
        .parse()
        .map_err(|_| LogError::format(line, format!("seconds out of range in {field:?}")))?;
    let usec: u32 = usec
        .parse()
        .ok()
        .filter(|u| *u < 1_000_000)
        .ok_or_else(|| LogError::format(line, format!("microseconds out of range in {field:?}")))?;
    Ok(Duration::new(sec, usec * 1_000))
}

fn parse_header(text: &str, line: usize) -> Result<LogHeader, LogError> {
    let field = text
        .strip_prefix(HEADER_TIME)
        .ok_or_else(|| LogError::format(line, format!("unknown header line {text:?}")))?;
    Ok(LogHeader { record_start: parse_time(field.trim(), line)? })
}

struct Meta {
    relative_time: Duration,
    qos: Qos,
    retain: bool,
    len: usize,
    topic: String,
}

fn parse_meta(text: &str, line: usize) -> Result<Meta, LogError> {
    let fields: Vec<&str> = text.split_ascii_whitespace().collect();
    if fields.len() != 6 || fields[0] != RECORD_TAG {
        return Err(LogError::format(line, format!("expected record line, got {text:?}")));
    }
    let relative_time = parse_time(fields[1], line)?;
    let qos = fields[2]
        .parse::<u8>()
        .ok()
        .and_then(|q| Qos::try_from(q).ok())
        .ok_or_else(|| LogError::format(line, format!("invalid qos {:?}", fields[2])))?;
    let retain = match fields[3] {
        "0" => false,
        "1" => true,
        other => return Err(LogError::format(line, format!("invalid retain flag {other:?}"))),
    };
    let len = fields[4]
        .parse::<usize>()
        .ok()
        .filter(|n| *n <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| LogError::format(line, format!("invalid payload length {:?}", fields[4])))?;
    Ok(Meta { relative_time, qos, retain, len, topic: fields[5].to_string() })
}

fn parse_payload(text: &str, expected: usize, line: usize) -> Result<Vec<u8>, LogError> {
    let mut out = Vec::with_capacity(expected);
    for tok in text.split_ascii_whitespace() {
        if out.len() == expected {
            return Err(LogError::format(line, format!("more than {expected} payload bytes")));
        }
        if tok.len() != 2 || !tok.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LogError::format(line, format!("invalid hex octet {tok:?}")));
        }
        let b = u8::from_str_radix(tok, 16)
            .map_err(|_| LogError::format(line, format!("invalid hex octet {tok:?}")))?;
        out.push(b);
    }
    if out.len() < expected {
        return Err(LogError::TruncatedPayload { line, expected, found: out.len() });
    }
    Ok(out)
}

/// Streaming reader over a capture log.
///
/// Records are decoded lazily, one per [`LogReader::next_record`] call, so a
/// format error surfaces only after every preceding record was handed out.
pub struct LogReader<R> {
    inner: R,
    line_no: usize,
    buf: Vec<u8>,
    pending: Option<(usize, String)>,
    headers_done: bool,
}

impl<R: BufRead> LogReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line_no: 0, buf: Vec::new(), pending: None, headers_done: false }
    }

    /// Next line without its line terminator, `None` at end of input.
    fn next_line(&mut self) -> Result<Option<(usize, String)>, LogError> {
        if let Some(p) = self.pending.take() {
            return Ok(Some(p));
        }
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        let text = std::str::from_utf8(&self.buf)
            .map_err(|_| LogError::format(self.line_no, "invalid UTF-8"))?;
        Ok(Some((self.line_no, text.trim_end_matches(['\n', '\r']).to_string())))
    }

    /// Consume the leading header lines. The last one wins if several are
    /// present. Must be called before the first record to see the header;
    /// [`LogReader::next_record`] skips the headers otherwise.
    pub fn read_header(&mut self) -> Result<Option<LogHeader>, LogError> {
        let mut header = None;
        while let Some((line, text)) = self.next_line()? {
            if text.starts_with(HEADER_PREFIX) {
                header = Some(parse_header(&text, line)?);
            } else {
                self.pending = Some((line, text));
                break;
            }
        }
        self.headers_done = true;
        Ok(header)
    }

    /// Decode the next record, `None` at a clean end of input.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>, LogError> {
        if !self.headers_done {
            self.read_header()?;
        }
        let (line, text) = loop {
            match self.next_line()? {
                None => return Ok(None),
                Some((_, t)) if t.trim().is_empty() => continue,
                Some(l) => break l,
            }
        };
        if text.starts_with(HEADER_PREFIX) {
            return Err(LogError::format(line, "header line after the first record"));
        }
        let meta = parse_meta(&text, line)?;
        let payload = match self.next_line()? {
            Some((pl, ptext)) => parse_payload(&ptext, meta.len, pl)?,
            None if meta.len == 0 => {
                return Err(LogError::format(line + 1, "missing payload line"));
            }
            None => {
                return Err(LogError::TruncatedPayload {
                    line: line + 1,
                    expected: meta.len,
                    found: 0,
                });
            }
        };
        Ok(Some(LogRecord {
            relative_time: meta.relative_time,
            qos: meta.qos,
            retain: meta.retain,
            topic: meta.topic,
            payload,
        }))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: BufRead + Seek> LogReader<R> {
    /// Seek back to the start of the log for another pass.
    pub fn rewind(&mut self) -> Result<(), LogError> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.line_no = 0;
        self.pending = None;
        self.headers_done = false;
        Ok(())
    }
}

/// Appends header and records to a log, flushing after every write.
pub struct LogWriter<W: Write> {
    inner: W,
}

impl<W: Write> LogWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_header(&mut self, header: &LogHeader) -> Result<(), LogError> {
        self.inner.write_all(encode_header(header).as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Both lines go out in a single write; nothing is written when the
    /// record cannot be encoded.
    pub fn write_record(&mut self, rec: &LogRecord) -> Result<(), LogError> {
        let text = encode_record(rec)?;
        self.inner.write_all(text.as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), LogError> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn rec(t: Duration, qos: Qos, retain: bool, topic: &str, payload: &[u8]) -> LogRecord {
        LogRecord { relative_time: t, qos, retain, topic: topic.into(), payload: payload.to_vec() }
    }

    fn reader(text: &str) -> LogReader<Cursor<Vec<u8>>> {
        LogReader::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn record_encoding_matches_format() {
        let r = rec(Duration::new(12, 34_000), Qos::AtLeastOnce, true, "a/b", &[0x00, 0xab, 0x7f]);
        assert_eq!(encode_record(&r).unwrap(), "msg 12.000034 1 1 3 a/b\n00 ab 7f\n");
        let empty = rec(Duration::ZERO, Qos::AtMostOnce, false, "x", &[]);
        assert_eq!(encode_record(&empty).unwrap(), "msg 0.000000 0 0 0 x\n\n");
        let h = LogHeader { record_start: Duration::new(1_414_141_414, 5_000) };
        assert_eq!(encode_header(&h), "cnf time: 1414141414.000005\n");
    }

    #[test]
    fn records_survive_a_write_read_cycle() {
        let all_bytes: Vec<u8> = (0..=255u8).collect();
        let records = vec![
            rec(Duration::ZERO, Qos::AtMostOnce, false, "t/0", &[]),
            rec(Duration::new(0, 500_000_000), Qos::AtLeastOnce, true, "t/1", b"hello"),
            rec(Duration::new(1, 200_000_000), Qos::ExactlyOnce, false, "t/2", &all_bytes),
            rec(Duration::new(1, 200_000_000), Qos::ExactlyOnce, true, "t/+/x", &[b'\n', b' ']),
        ];
        let header = LogHeader { record_start: Duration::new(1000, 500_000_000) };

        let mut w = LogWriter::new(Vec::new());
        w.write_header(&header).unwrap();
        for r in &records {
            w.write_record(r).unwrap();
        }

        let mut r = LogReader::new(Cursor::new(w.into_inner()));
        assert_eq!(r.read_header().unwrap(), Some(header));
        let mut back = Vec::new();
        while let Some(rec) = r.next_record().unwrap() {
            back.push(rec);
        }
        assert_eq!(back, records);
    }

    #[test]
    fn header_is_optional_and_last_one_wins() {
        let mut r = reader("msg 0.000001 0 0 1 a\nff\n");
        assert_eq!(r.read_header().unwrap(), None);
        assert_eq!(r.next_record().unwrap().unwrap().payload, vec![0xff]);

        let mut r = reader("cnf time: 1.000000\ncnf time: 2.000003\nmsg 0.0 0 0 0 a\n\n");
        let h = r.read_header().unwrap().unwrap();
        assert_eq!(h.record_start, Duration::new(2, 3_000));
        assert!(r.next_record().unwrap().is_some());
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn next_record_skips_unread_headers() {
        let mut r = reader("cnf time: 5.000000\nmsg 0.000000 2 1 0 a\n\n");
        let first = r.next_record().unwrap().unwrap();
        assert_eq!(first.qos, Qos::ExactlyOnce);
        assert!(first.retain);
    }

    #[test]
    fn out_of_range_flags_are_format_errors() {
        for bad in [
            "msg 0.000000 3 0 0 a\n\n",
            "msg 0.000000 0 2 0 a\n\n",
            "msg abc.000000 0 0 0 a\n\n",
            "msg 1.x 0 0 0 a\n\n",
            "msg 1.1000000 0 0 0 a\n\n",
            "msg 1 0 0 0 a\n\n",
            "msg 0.000000 0 0 0\n\n",
            "rec 0.000000 0 0 0 a\n\n",
        ] {
            let err = reader(bad).next_record().unwrap_err();
            assert!(matches!(err, LogError::Format { line: 1, .. }), "{bad:?} -> {err}");
            assert!(err.is_corrupt());
        }
    }

    #[test]
    fn invalid_utf8_is_a_format_error_with_its_line() {
        let mut r = LogReader::new(Cursor::new(b"msg 0.000000 0 0 1 a\xff\n01\n".to_vec()));
        let err = r.next_record().unwrap_err();
        assert!(matches!(err, LogError::Format { line: 1, .. }), "{err}");
        assert!(err.is_corrupt());

        let mut r = LogReader::new(Cursor::new(b"cnf time: 1.000000\nmsg 0.0 0 0 0 \xc3\x28\n\n".to_vec()));
        assert!(r.read_header().unwrap().is_some());
        assert!(matches!(r.next_record(), Err(LogError::Format { line: 2, .. })));
    }

    #[test]
    fn short_payload_is_truncation() {
        let err = reader("msg 0.000000 0 0 3 a\n01 02\n").next_record().unwrap_err();
        match err {
            LogError::TruncatedPayload { line, expected, found } => {
                assert_eq!((line, expected, found), (2, 3, 2));
            }
            other => panic!("unexpected {other}"),
        }
        let err = reader("msg 0.000000 0 0 1 a\n").next_record().unwrap_err();
        assert!(matches!(err, LogError::TruncatedPayload { found: 0, .. }));
    }

    #[test]
    fn empty_record_without_payload_line_is_a_format_error() {
        let err = reader("msg 0.000000 0 0 0 a\n").next_record().unwrap_err();
        match err {
            LogError::Format { line, ref reason } => {
                assert_eq!(line, 2);
                assert_eq!(reason, "missing payload line");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn bad_payload_tokens_are_rejected() {
        for bad in ["msg 0.0 0 0 1 a\n0102\n", "msg 0.0 0 0 1 a\nzz\n", "msg 0.0 0 0 1 a\n01 02\n"] {
            let err = reader(bad).next_record().unwrap_err();
            assert!(matches!(err, LogError::Format { line: 2, .. }), "{bad:?} -> {err}");
        }
    }

    #[test]
    fn records_before_an_error_are_still_returned() {
        let mut r = reader("msg 0.000000 0 0 0 ok\n\nmsg 0.100000 7 0 0 bad\n\n");
        assert_eq!(r.next_record().unwrap().unwrap().topic, "ok");
        assert!(matches!(r.next_record(), Err(LogError::Format { line: 3, .. })));
    }

    #[test]
    fn late_header_is_rejected() {
        let mut r = reader("msg 0.0 0 0 0 a\n\ncnf time: 1.0\n");
        r.next_record().unwrap();
        assert!(matches!(r.next_record(), Err(LogError::Format { line: 3, .. })));
    }

    #[test]
    fn trailing_blank_lines_and_crlf_are_tolerated() {
        let mut r = reader("msg 0.000000 0 0 2 a\r\n0A 0b\r\n\n\n");
        assert_eq!(r.next_record().unwrap().unwrap().payload, vec![0x0a, 0x0b]);
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn unrepresentable_topics_are_not_written() {
        let mut w = LogWriter::new(Vec::new());
        let err = w
            .write_record(&rec(Duration::ZERO, Qos::AtMostOnce, false, "has space", b"x"))
            .unwrap_err();
        assert!(matches!(err, LogError::InvalidTopic(_)));
        assert!(w.get_ref().is_empty());
    }

    #[test]
    fn rewind_restarts_from_the_header() {
        let mut r = reader("cnf time: 7.000000\nmsg 0.0 0 0 0 a\n\n");
        r.read_header().unwrap();
        r.next_record().unwrap().unwrap();
        assert!(r.next_record().unwrap().is_none());
        r.rewind().unwrap();
        assert_eq!(r.read_header().unwrap().unwrap().record_start, Duration::from_secs(7));
        assert_eq!(r.next_record().unwrap().unwrap().topic, "a");
    }
}
