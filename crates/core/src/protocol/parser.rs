use bytes::Bytes;

use super::{MessageKind, ParseOutcome, RtspMessage, RtspParser};

/// Default RTSP/1.0 text parser.
///
/// Handles both requests and responses. A message is complete once the
/// blank-line header terminator has arrived and, when `Content-Length` is
/// declared, the full body with it. Stray CRLF pairs before the start line
/// are skipped and counted as consumed.
pub struct TextParser;

impl RtspParser for TextParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        let mut skip = 0;
        while buf.len() >= skip + 2 && &buf[skip..skip + 2] == b"\r\n" {
            skip += 2;
        }
        let buf = &buf[skip..];

        let Some(head_len) = find_header_end(buf) else {
            return ParseOutcome::Incomplete;
        };

        let head = String::from_utf8_lossy(&buf[..head_len]);
        let mut lines = head.lines();

        let start_line = lines.next().unwrap_or("");
        let kind = match parse_start_line(start_line) {
            Some(kind) => kind,
            None => return malformed(start_line, skip + head_len),
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let Some(colon) = line.find(':') else {
                return malformed(start_line, skip + head_len);
            };
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }

        let content_length = match headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, value)| value.parse::<usize>())
        {
            Some(Ok(length)) => length,
            Some(Err(_)) => return malformed(start_line, skip + head_len),
            None => 0,
        };

        if buf.len() < head_len + content_length {
            return ParseOutcome::Incomplete;
        }

        let body = Bytes::copy_from_slice(&buf[head_len..head_len + content_length]);

        ParseOutcome::Message {
            message: RtspMessage {
                kind,
                headers,
                body,
            },
            consumed: skip + head_len + content_length,
        }
    }
}

/// Index just past the `\r\n\r\n` header terminator, if present.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_start_line(line: &str) -> Option<MessageKind> {
    if line.starts_with("RTSP/") {
        let mut parts = line.splitn(3, ' ');
        let version = parts.next()?.to_string();
        let status = parts.next()?.parse::<u16>().ok()?;
        let phrase = parts.next().unwrap_or("").to_string();
        return Some(MessageKind::Response {
            version,
            status,
            phrase,
        });
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }
    Some(MessageKind::Request {
        method: parts[0].to_string(),
        uri: parts[1].to_string(),
        version: parts[2].to_string(),
    })
}

/// The salvaged message for an unparseable head: the raw start line, no
/// headers, no body.
fn malformed(start_line: &str, consumed: usize) -> ParseOutcome {
    ParseOutcome::Malformed {
        message: RtspMessage {
            kind: MessageKind::Request {
                method: start_line.to_string(),
                uri: String::new(),
                version: String::new(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
        },
        consumed,
    }
}
