//! ManageSieve response parser.
//!
//! Pure byte-to-object transforms. Every entry point can be called again on
//! the same buffer once more bytes have arrived.

#![allow(clippy::missing_errors_doc)]

mod helpers;
mod types;

pub use types::{Payload, Reply, Response, ResponseKind};

use crate::parser::ParseOutcome;
use crate::parser::tokenizer::{TokenError, TokenResult, Tokenizer};
use crate::types::Status;

use helpers::{parse_capability_lines, parse_script_body, parse_script_lines, parse_status_line};

/// Response parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one complete response of the given kind from the start of
    /// `input`.
    ///
    /// # Example
    ///
    /// ```
    /// use sieveledger_managesieve::parser::{ParseOutcome, ResponseKind, ResponseParser};
    ///
    /// let input = b"\"IMPLEMENTATION\" \"Example\"\r\nOK\r\n";
    /// match ResponseParser::parse(ResponseKind::Capabilities, input) {
    ///     ParseOutcome::Parsed { value, consumed } => {
    ///         assert!(value.is_ok());
    ///         assert_eq!(consumed, input.len());
    ///     }
    ///     other => panic!("unexpected {other:?}"),
    /// }
    ///
    /// assert!(ResponseParser::parse(ResponseKind::Simple, b"OK").is_incomplete());
    /// ```
    #[must_use]
    pub fn parse(kind: ResponseKind, input: &[u8]) -> ParseOutcome<Response> {
        ParseOutcome::run(input, |t| Self::parse_kind(kind, t))
    }

    /// Parses one step of an `AUTHENTICATE` exchange: either a server
    /// challenge string or the final status line.
    #[must_use]
    pub fn parse_sasl_step(input: &[u8]) -> ParseOutcome<Reply> {
        ParseOutcome::run(input, |t| {
            if t.is_string() {
                let challenge = t.extract_string()?;
                t.extract_line_break()?;
                Ok(Reply::Challenge(challenge))
            } else {
                parse_status_line(t, Payload::None).map(Reply::Complete)
            }
        })
    }

    fn parse_kind(kind: ResponseKind, t: &mut Tokenizer<'_>) -> TokenResult<Response> {
        match kind {
            ResponseKind::Simple => parse_status_line(t, Payload::None),
            ResponseKind::Capabilities => {
                let caps = parse_capability_lines(t)?;
                let start = t.position();
                let response = parse_status_line(t, Payload::None)?;
                if response.status == Status::Ok && caps.implementation().is_none() {
                    return Err(TokenError::Syntax {
                        position: start,
                        message: "Capability listing lacks IMPLEMENTATION".to_string(),
                    });
                }
                Ok(Response {
                    payload: Payload::Capabilities(caps),
                    ..response
                })
            }
            ResponseKind::ListScripts => {
                let scripts = parse_script_lines(t)?;
                parse_status_line(t, Payload::Scripts(scripts))
            }
            ResponseKind::GetScript => {
                let payload = parse_script_body(t)?.map_or(Payload::None, Payload::Script);
                parse_status_line(t, payload)
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::types::{ResponseCode, ScriptEntry};
    use proptest::prelude::*;

    fn parsed(kind: ResponseKind, input: &[u8]) -> Response {
        match ResponseParser::parse(kind, input) {
            ParseOutcome::Parsed { value, consumed } => {
                assert_eq!(consumed, input.len(), "trailing bytes left");
                value
            }
            other => panic!("expected parsed response, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_ok() {
        let r = parsed(ResponseKind::Simple, b"OK\r\n");
        assert_eq!(r.status, Status::Ok);
        assert_eq!(r.message, None);
    }

    #[test]
    fn test_status_case_insensitive_with_message() {
        let r = parsed(ResponseKind::Simple, b"no \"Script not found\"\r\n");
        assert_eq!(r.status, Status::No);
        assert_eq!(r.message(), "Script not found");
    }

    #[test]
    fn test_status_with_code_and_literal_message() {
        let r = parsed(
            ResponseKind::Simple,
            b"NO (NONEXISTENT) {14}\r\nNo such script\r\n",
        );
        assert_eq!(r.code, Some(ResponseCode::NonExistent));
        assert_eq!(r.message(), "No such script");
    }

    #[test]
    fn test_status_code_only() {
        let r = parsed(ResponseKind::Simple, b"OK (WARNINGS)\r\n");
        assert_eq!(r.code, Some(ResponseCode::Warnings));
        assert_eq!(r.message, None);
    }

    #[test]
    fn test_bye_referral() {
        let r = parsed(
            ResponseKind::Simple,
            b"BYE (REFERRAL \"sieve://other.example.com:4190\") \"Try elsewhere\"\r\n",
        );
        assert_eq!(r.status, Status::Bye);
        let err = r.into_result().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Referral { ref host, port: Some(4190) } if host == "other.example.com"
        ));
    }

    #[test]
    fn test_bare_text_message() {
        let r = parsed(ResponseKind::Simple, b"OK Logout completed\r\n");
        assert_eq!(r.message(), "Logout completed");
    }

    #[test]
    fn test_status_incomplete() {
        let cases: [&[u8]; 9] = [
            b"",
            b"O",
            b"OK",
            b"OK\r",
            b"OK ",
            b"OK \"msg",
            b"NO (TRY",
            b"NO (TRYLATER)\r",
            b"BYE \"x\"\r",
        ];
        for input in cases {
            assert!(
                ResponseParser::parse(ResponseKind::Simple, input).is_incomplete(),
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_status_syntax_error() {
        let cases: [&[u8]; 4] = [
            b"FOO\r\n",
            b"NOTHING\r\n",
            b"OK \"a\nb\"\r\n",
            b"OK (\"x\")\r\n",
        ];
        for input in cases {
            assert!(
                matches!(
                    ResponseParser::parse(ResponseKind::Simple, input),
                    ParseOutcome::Fatal(crate::Error::Parse { .. })
                ),
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_capabilities() {
        let input = b"\"IMPLEMENTATION\" \"Example1 ManageSieved v001\"\r\n\
\"SIEVE\" \"fileinto vacation\"\r\n\
\"SASL\" \"PLAIN\"\r\n\
\"STARTTLS\"\r\n\
\"VERSION\" \"1.0\"\r\n\
OK\r\n";
        let r = parsed(ResponseKind::Capabilities, input);
        let caps = r.capabilities().unwrap();
        assert_eq!(caps.implementation(), Some("Example1 ManageSieved v001"));
        assert!(caps.has_starttls());
        assert_eq!(caps.sasl(), ["PLAIN"]);
        assert_eq!(caps.entries().len(), 5);
    }

    #[test]
    fn test_capabilities_without_implementation_is_fatal() {
        assert!(matches!(
            ResponseParser::parse(ResponseKind::Capabilities, b"\"SASL\" \"PLAIN\"\r\nOK\r\n"),
            ParseOutcome::Fatal(_)
        ));
        // A refusal need not carry a listing
        let r = parsed(ResponseKind::Capabilities, b"NO \"go away\"\r\n");
        assert_eq!(r.status, Status::No);
    }

    #[test]
    fn test_list_scripts() {
        let input = b"\"summer_script\"\r\n\"vacation_script\"\r\n{13}\r\nclever\"script\r\n\"main_script\" ACTIVE\r\nOK\r\n";
        let r = parsed(ResponseKind::ListScripts, input);
        assert_eq!(
            r.payload,
            Payload::Scripts(vec![
                ScriptEntry::new("summer_script", false),
                ScriptEntry::new("vacation_script", false),
                ScriptEntry::new("clever\"script", false),
                ScriptEntry::new("main_script", true),
            ])
        );
    }

    #[test]
    fn test_list_scripts_bad_flag() {
        assert!(matches!(
            ResponseParser::parse(ResponseKind::ListScripts, b"\"a\" PASSIVE\r\nOK\r\n"),
            ParseOutcome::Fatal(_)
        ));
    }

    #[test]
    fn test_get_script() {
        let input = b"{54}\r\n#this is my wonderful script\r\nreject \"I reject all\";\r\n\r\nOK\r\n";
        let r = parsed(ResponseKind::GetScript, input);
        assert_eq!(
            r.payload,
            Payload::Script("#this is my wonderful script\r\nreject \"I reject all\";\r\n".to_string())
        );
    }

    #[test]
    fn test_get_script_nonexistent() {
        let r = parsed(
            ResponseKind::GetScript,
            b"NO (NONEXISTENT) \"There is no script by that name\"\r\n",
        );
        assert_eq!(r.payload, Payload::None);
        assert!(matches!(
            r.into_result(),
            Err(crate::Error::No { code: Some(ResponseCode::NonExistent), .. })
        ));
    }

    #[test]
    fn test_sasl_step() {
        match ResponseParser::parse_sasl_step(b"{12}\r\nVXNlcm5hbWU6\r\n") {
            ParseOutcome::Parsed { value: Reply::Challenge(c), .. } => assert_eq!(c, "VXNlcm5hbWU6"),
            other => panic!("unexpected {other:?}"),
        }
        match ResponseParser::parse_sasl_step(b"OK (SASL \"dj1=\")\r\n") {
            ParseOutcome::Parsed { value: Reply::Complete(r), .. } => {
                assert_eq!(r.code, Some(ResponseCode::Sasl("dj1=".to_string())));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(ResponseParser::parse_sasl_step(b"\"VXNl").is_incomplete());
    }

    #[test]
    fn test_consumed_stops_at_response_end() {
        match ResponseParser::parse(ResponseKind::Simple, b"OK\r\nNO\r\n") {
            ParseOutcome::Parsed { consumed, .. } => assert_eq!(consumed, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_any_prefix_is_incomplete(cut in 0usize..1000) {
            let input: &[u8] = b"\"a\"\r\n{5}\r\nb\r\nc\r\n\"d\" ACTIVE\r\nOK (WARNINGS) \"done\"\r\n";
            let cut = cut % input.len();
            prop_assert!(ResponseParser::parse(ResponseKind::ListScripts, &input[..cut]).is_incomplete());
        }
    }
}
