//! Reply parsing (RFC 959 §4.2).
//!
//! One physical reply line is one logical reply: continuation lines
//! (`NNN-text`) are not reassembled, and a line longer than the receive
//! buffer arrives truncated.

use crate::ftp::error::{FtpError, FtpResult};
use serde::{Deserialize, Serialize};

/// A single server reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpReply {
    pub code: u16,
    /// Second whitespace-delimited token, for replies that embed data
    /// (`213 3582`, `257 "/home"`). Only filled by
    /// [`parse_reply_with_argument`].
    pub argument: Option<String>,
    /// The reply exactly as received, line terminator included.
    pub raw: String,
}

impl FtpReply {
    /// Reply text without the line terminator.
    pub fn text(&self) -> &str {
        self.raw.trim_end_matches(['\r', '\n'])
    }

    /// Free text after the code.
    pub fn message(&self) -> &str {
        self.text().get(4..).unwrap_or("").trim()
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn is_negative(&self) -> bool {
        self.code >= 400
    }

    /// The embedded argument, or a `ParseError` naming the reply.
    pub fn require_argument(&self) -> FtpResult<&str> {
        self.argument
            .as_deref()
            .ok_or_else(|| FtpError::parse_error(format!("Reply has no argument: '{}'", self.text())))
    }

    /// Turn anything but `expected` into a `ServerError` carrying the code.
    pub fn expect_code(self, expected: u16) -> FtpResult<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(FtpError::from_reply(self.code, self.text()))
        }
    }
}

/// Parse the leading 3-digit code of a reply.
pub fn parse_reply(raw: &str) -> FtpResult<FtpReply> {
    let line = raw.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(FtpError::protocol_error("Empty reply"));
    }
    let code = parse_code(line)?;
    Ok(FtpReply {
        code,
        argument: None,
        raw: raw.to_string(),
    })
}

/// Parse a reply that must carry a second token (SIZE, PWD, MKD).
pub fn parse_reply_with_argument(raw: &str) -> FtpResult<FtpReply> {
    let mut reply = parse_reply(raw)?;
    let argument = reply
        .text()
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| {
            FtpError::parse_error(format!("Reply is missing its argument: '{}'", reply.text()))
                .with_code(reply.code)
        })?;
    reply.argument = Some(argument);
    Ok(reply)
}

/// Parse a reply argument as a byte count (`213 <size>`).
pub fn parse_size_argument(reply: &FtpReply) -> FtpResult<u64> {
    let arg = reply.require_argument()?;
    arg.parse::<u64>()
        .map_err(|_| FtpError::parse_error(format!("Cannot parse size from '{}'", reply.text())))
}

/// Extract the quoted path of a 257 reply (`257 "/a b" created`). Falls
/// back to the bare argument when the server does not quote.
pub fn parse_quoted_path(reply: &FtpReply) -> FtpResult<String> {
    let text = reply.text();
    if let Some(start) = text.find('"') {
        let rest = &text[start + 1..];
        let mut path = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                // RFC 959: an embedded quote is doubled.
                if chars.peek() == Some(&'"') {
                    chars.next();
                    path.push('"');
                    continue;
                }
                return Ok(path);
            }
            path.push(c);
        }
        return Err(FtpError::parse_error(format!("Unterminated path in '{}'", text)));
    }
    reply.require_argument().map(str::to_string)
}

fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .ok_or_else(|| FtpError::parse_error(format!("Reply too short: '{}'", line)))?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FtpError::parse_error(format!("Invalid reply code in: '{}'", line)));
    }
    // A fourth character, if any, must separate the code from the text.
    if let Some(sep) = line.as_bytes().get(3) {
        if !matches!(sep, b' ' | b'-') {
            return Err(FtpError::parse_error(format!("Invalid reply code in: '{}'", line)));
        }
    }
    digits
        .parse::<u16>()
        .map_err(|_| FtpError::parse_error(format!("Invalid reply code in: '{}'", line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;

    #[test]
    fn size_reply_yields_code_and_argument() {
        let reply = parse_reply_with_argument("213 3582\r\n").unwrap();
        assert_eq!(reply.code, 213);
        assert_eq!(reply.argument.as_deref(), Some("3582"));
        assert_eq!(parse_size_argument(&reply).unwrap(), 3582);
    }

    #[test]
    fn plain_reply_has_no_argument() {
        let reply = parse_reply("220 Service ready\r\n").unwrap();
        assert_eq!(reply.code, 220);
        assert!(reply.argument.is_none());
        assert_eq!(reply.message(), "Service ready");
        assert_eq!(reply.raw, "220 Service ready\r\n");
    }

    #[test]
    fn missing_argument_is_parse_error() {
        let err = parse_reply_with_argument("213\r\n").unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ParseError);
    }

    #[test]
    fn non_numeric_code_is_parse_error() {
        let err = parse_reply("2x0 hello").unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ParseError);
        let err = parse_reply("2200 hello").unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ParseError);
    }

    #[test]
    fn empty_reply_is_protocol_error() {
        let err = parse_reply("\r\n").unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ProtocolError);
    }

    #[test]
    fn continuation_line_is_taken_as_is() {
        let reply = parse_reply("220-Welcome\r\n").unwrap();
        assert_eq!(reply.code, 220);
    }

    #[test]
    fn non_numeric_size_is_parse_error() {
        let reply = parse_reply_with_argument("213 lots\r\n").unwrap();
        assert_eq!(
            parse_size_argument(&reply).unwrap_err().kind,
            FtpErrorKind::ParseError
        );
    }

    #[test]
    fn quoted_path_with_doubled_quote() {
        let reply = parse_reply_with_argument("257 \"/srv/my \"\"quoted\"\" dir\" created\r\n").unwrap();
        assert_eq!(parse_quoted_path(&reply).unwrap(), "/srv/my \"quoted\" dir");
    }

    #[test]
    fn unquoted_path_falls_back_to_argument() {
        let reply = parse_reply_with_argument("257 /home/ftp\r\n").unwrap();
        assert_eq!(parse_quoted_path(&reply).unwrap(), "/home/ftp");
    }

    #[test]
    fn expect_code_passes_server_code() {
        let err = parse_reply("550 Nope\r\n").unwrap().expect_code(213).unwrap_err();
        assert_eq!(err.code, Some(550));
        assert_eq!(err.kind, FtpErrorKind::ServerError);
    }
}
