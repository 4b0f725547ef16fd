//! Parser helper functions.

use crate::parser::tokenizer::{Token, TokenError, TokenResult, Tokenizer};
use crate::types::{Capabilities, ResponseCode, ScriptEntry, Status};

use super::types::{Payload, Response};

/// Parses a status line: `OK|NO|BYE [SP "(" code ")"] [SP string] CRLF`.
pub fn parse_status_line(t: &mut Tokenizer<'_>, payload: Payload) -> TokenResult<Response> {
    let status = parse_status_word(t)?;

    if t.is_eof() {
        return Err(TokenError::Incomplete);
    }

    let mut response = Response {
        status,
        code: None,
        message: None,
        payload,
    };

    if t.peek() == Some(b'\r') {
        t.extract_line_break()?;
        return Ok(response);
    }

    t.extract_space()?;

    if t.peek() == Some(b'(') {
        response.code = Some(parse_response_code(t)?);

        if t.peek() == Some(b'\r') {
            t.extract_line_break()?;
            return Ok(response);
        }
        t.extract_space()?;
    }

    response.message = Some(if t.is_string() {
        t.extract_string()?
    } else {
        // Some servers send the message as bare text
        t.extract_token(b"\r\n")?.to_string()
    });

    t.extract_line_break()?;
    Ok(response)
}

fn parse_status_word(t: &mut Tokenizer<'_>) -> TokenResult<Status> {
    for (word, status) in [("OK", Status::Ok), ("NO", Status::No), ("BYE", Status::Bye)] {
        if t.starts_with(word)? {
            // The word must end here, "NOTHING" is not "NO"
            match t.peek_at(word.len()) {
                None => return Err(TokenError::Incomplete),
                Some(b' ' | b'\r') => {
                    t.skip(word.len());
                    return Ok(status);
                }
                Some(_) => {}
            }
        }
    }

    if t.is_eof() {
        return Err(TokenError::Incomplete);
    }

    Err(TokenError::Syntax {
        position: t.position(),
        message: "Expected OK, NO or BYE".to_string(),
    })
}

/// Parses `"(" name *(SP string) ")"`.
pub fn parse_response_code(t: &mut Tokenizer<'_>) -> TokenResult<ResponseCode> {
    match t.next_token()? {
        Token::Atom("(") => {}
        _ => return Err(syntax(t, "Expected (")),
    }

    let name = match t.next_token()? {
        Token::Atom(name) if name != ")" && name != "(" => name,
        _ => return Err(syntax(t, "Expected response code name")),
    };

    let mut args = Vec::new();
    loop {
        match t.next_token()? {
            Token::Atom(")") => break,
            Token::Space => args.push(t.extract_string()?),
            _ => return Err(syntax(t, "Expected ) after response code")),
        }
    }

    Ok(ResponseCode::from_parts(name, args))
}

/// Parses capability lines: `string [SP string] CRLF`, repeated.
pub fn parse_capability_lines(t: &mut Tokenizer<'_>) -> TokenResult<Capabilities> {
    let mut entries = Vec::new();

    while t.is_string() {
        let key = t.extract_string()?;

        let value = match t.peek() {
            None => return Err(TokenError::Incomplete),
            Some(b'\r') => None,
            Some(_) => {
                t.extract_space()?;
                Some(t.extract_string()?)
            }
        };

        t.extract_line_break()?;
        entries.push((key, value));
    }

    Ok(Capabilities::from_entries(entries))
}

/// Parses listing lines: `string [SP "ACTIVE"] CRLF`, repeated.
pub fn parse_script_lines(t: &mut Tokenizer<'_>) -> TokenResult<Vec<ScriptEntry>> {
    let mut scripts = Vec::new();

    while t.is_string() {
        let name = t.extract_string()?;

        let active = match t.peek() {
            None => return Err(TokenError::Incomplete),
            Some(b'\r') => false,
            Some(_) => {
                t.extract_space()?;
                let flag = t.extract_token(b"\r")?;
                if !flag.eq_ignore_ascii_case("ACTIVE") {
                    return Err(syntax(t, "Expected ACTIVE"));
                }
                true
            }
        };

        t.extract_line_break()?;
        scripts.push(ScriptEntry { name, active });
    }

    Ok(scripts)
}

/// Parses an optional script body: `string CRLF`.
pub fn parse_script_body(t: &mut Tokenizer<'_>) -> TokenResult<Option<String>> {
    if !t.is_string() {
        return Ok(None);
    }

    let body = t.extract_string()?;
    t.extract_line_break()?;
    Ok(Some(body))
}

fn syntax(t: &Tokenizer<'_>, message: &str) -> TokenError {
    TokenError::Syntax {
        position: t.position(),
        message: message.to_string(),
    }
}
