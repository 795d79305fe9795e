use bytes::Bytes;

/// A parsed RTSP message — request or response (RFC 2326 §6, §7).
///
/// Both directions share the header/body shape; only the start line
/// differs. Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug, Clone)]
pub struct RtspMessage {
    /// Request line or status line.
    pub kind: MessageKind,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`header`](Self::header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Message body, as declared by `Content-Length`. Empty when absent.
    pub body: Bytes,
}

/// Start line of an RTSP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// `Method SP Request-URI SP RTSP-Version`
    Request {
        method: String,
        uri: String,
        version: String,
    },
    /// `RTSP-Version SP Status-Code SP Reason-Phrase`
    Response {
        version: String,
        status: u16,
        phrase: String,
    },
}

impl RtspMessage {
    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which pairs requests with responses
    /// (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.header("CSeq")
    }

    /// Body bytes, or `None` when the message carries no content.
    pub fn content(&self) -> Option<&[u8]> {
        if self.body.is_empty() {
            None
        } else {
            Some(&self.body)
        }
    }

    /// Whether this is a request with the given method.
    pub fn is_request(&self, method: &str) -> bool {
        matches!(&self.kind, MessageKind::Request { method: m, .. } if m == method)
    }
}
