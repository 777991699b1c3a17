//! Response parsing for the AT protocol.
//!
//! Lines from the controller are one of:
//! - Acknowledgements: `OK`, `ERROR`
//! - Data: `+STATE=2`, `+TEMP: 2,4250,3100`, or a bare `+ENABLE` push
//! - Echoes of our own commands: `AT+STATE?`

/// Parsed response line.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The in-flight command succeeded.
    Ok,

    /// The in-flight command was rejected.
    Error,

    /// A value for a mnemonic, either answering a query or pushed by a subscription.
    Data {
        /// Mnemonic without the `+` prefix.
        mnemonic: String,
        /// Payload after the separator; `None` for a bare push.
        payload: Option<String>,
    },

    /// An echoed `AT+...` command.
    Echo(String),

    /// Unknown/unrecognized line.
    Unknown(String),
}

impl Response {
    /// Classify one line.
    ///
    /// `=` and `:` are accepted as separators, whitespace after them is
    /// ignored and a trailing `?` on the mnemonic is stripped.
    pub fn parse(line: &str) -> Response {
        let text = line.trim();

        match text {
            "OK" => return Response::Ok,
            "ERROR" => return Response::Error,
            _ => {}
        }

        if text.starts_with("AT") {
            return Response::Echo(text.to_string());
        }

        let Some(body) = text.strip_prefix('+') else {
            return Response::Unknown(text.to_string());
        };

        let (head, payload) = match body.find(['=', ':']) {
            Some(pos) => (&body[..pos], Some(body[pos + 1..].trim().to_string())),
            None => (body, None),
        };

        let mnemonic = head.trim().trim_end_matches('?');
        if mnemonic.is_empty() || !mnemonic.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Response::Unknown(text.to_string());
        }

        Response::Data {
            mnemonic: mnemonic.to_string(),
            payload,
        }
    }

    /// Check if this completes the in-flight command.
    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ok | Response::Error)
    }

    /// Get the mnemonic if this is a Data response.
    pub fn mnemonic(&self) -> Option<&str> {
        match self {
            Response::Data { mnemonic, .. } => Some(mnemonic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(mnemonic: &str, payload: Option<&str>) -> Response {
        Response::Data {
            mnemonic: mnemonic.to_string(),
            payload: payload.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_acks() {
        assert_eq!(Response::parse("OK"), Response::Ok);
        assert_eq!(Response::parse(" ERROR "), Response::Error);
        assert!(Response::parse("OK").is_ack());
    }

    #[test]
    fn test_parse_data_separators() {
        assert_eq!(Response::parse("+CHCUR=65"), data("CHCUR", Some("65")));
        assert_eq!(Response::parse("+CHCUR:65"), data("CHCUR", Some("65")));
        assert_eq!(Response::parse("+TEMP: 2,4250,3100"), data("TEMP", Some("2,4250,3100")));
    }

    #[test]
    fn test_parse_bare_push() {
        let response = Response::parse("+ENABLE");
        assert_eq!(response, data("ENABLE", None));
        assert_eq!(response.mnemonic(), Some("ENABLE"));
    }

    #[test]
    fn test_parse_strips_query_marker() {
        assert_eq!(Response::parse("+STATE?"), data("STATE", None));
        assert_eq!(Response::parse("+STATE?=2"), data("STATE", Some("2")));
    }

    #[test]
    fn test_parse_quoted_payload_kept() {
        assert_eq!(
            Response::parse("+BUILDTIME=\"Nov 30 2025\""),
            data("BUILDTIME", Some("\"Nov 30 2025\""))
        );
    }

    #[test]
    fn test_parse_echo() {
        assert_eq!(Response::parse("AT+STATE?"), Response::Echo("AT+STATE?".to_string()));
    }

    #[test]
    fn test_parse_garbage() {
        let garbage = "\u{fffd}\u{fffd}x";
        assert_eq!(Response::parse(garbage), Response::Unknown(garbage.to_string()));
        assert_eq!(Response::parse("+=1"), Response::Unknown("+=1".to_string()));
        assert_eq!(Response::parse("+A B=1"), Response::Unknown("+A B=1".to_string()));
    }
}
