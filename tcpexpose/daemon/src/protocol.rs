//! Control protocol
//!
//! Requests are ASCII text: four whitespace-separated tokens
//! `src_ip dst_ip src_port dst_port`. Any whitespace separates tokens; a
//! newline also ends a request, discarding a partial one.
//! Responses are newline-delimited JSON, one trace sample per line.

use crate::types::{Quartet, TraceSample};
use std::net::IpAddr;
use thiserror::Error;

/// Tokens per flush request
pub const TOKENS_PER_REQUEST: usize = 4;

/// Longest token accepted; no address or port is longer
const MAX_TOKEN_LEN: usize = 64;

/// A request whose tokens do not describe a quartet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("token longer than {MAX_TOKEN_LEN} bytes")]
    TokenTooLong,
}

/// Incremental request tokenizer
///
/// Bytes may arrive split anywhere; a token is complete once whitespace
/// follows it or the stream ends. Tokens never carry over a newline, so a
/// short line cannot shift the requests that follow it.
#[derive(Debug, Default)]
pub struct RequestParser {
    partial: Vec<u8>,
    /// The token being read exceeded `MAX_TOKEN_LEN`
    overlong: bool,
    tokens: Vec<String>,
    /// A token of the current group was too long
    poisoned: bool,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume bytes read from the client
    ///
    /// # Returns
    ///
    /// One entry per completed group of four tokens
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Quartet, RequestError>> {
        let mut requests = Vec::new();

        for &byte in data {
            if byte == b'\n' {
                self.complete_token(&mut requests);
                self.discard_group();
            } else if byte.is_ascii_whitespace() {
                self.complete_token(&mut requests);
            } else if self.partial.len() < MAX_TOKEN_LEN {
                self.partial.push(byte);
            } else {
                self.overlong = true;
            }
        }

        requests
    }

    /// Complete the trailing token at end of stream
    pub fn finish(&mut self) -> Vec<Result<Quartet, RequestError>> {
        let mut requests = Vec::new();
        self.complete_token(&mut requests);
        requests
    }

    /// Tokens waiting for the rest of their request
    pub fn pending_tokens(&self) -> usize {
        self.tokens.len()
    }

    fn complete_token(&mut self, requests: &mut Vec<Result<Quartet, RequestError>>) {
        if self.partial.is_empty() {
            return;
        }

        let token = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        self.poisoned |= std::mem::take(&mut self.overlong);
        self.tokens.push(token);

        if self.tokens.len() == TOKENS_PER_REQUEST {
            let tokens = std::mem::take(&mut self.tokens);
            let request = if std::mem::take(&mut self.poisoned) {
                Err(RequestError::TokenTooLong)
            } else {
                parse_request(&tokens)
            };
            requests.push(request);
        }
    }

    /// Drop the tokens of an unfinished request
    fn discard_group(&mut self) {
        self.tokens.clear();
        self.poisoned = false;
    }
}

/// Parse `src_ip dst_ip src_port dst_port`
pub fn parse_request<S: AsRef<str>>(tokens: &[S]) -> Result<Quartet, RequestError> {
    let [src_ip, dst_ip, src_port, dst_port] = tokens else {
        return Err(RequestError::InvalidAddress(
            tokens.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" "),
        ));
    };

    Ok(Quartet::new(
        parse_addr(src_ip.as_ref())?,
        parse_addr(dst_ip.as_ref())?,
        parse_port(src_port.as_ref())?,
        parse_port(dst_port.as_ref())?,
    ))
}

fn parse_addr(token: &str) -> Result<IpAddr, RequestError> {
    token
        .parse()
        .map_err(|_| RequestError::InvalidAddress(token.to_string()))
}

fn parse_port(token: &str) -> Result<u16, RequestError> {
    token
        .parse()
        .map_err(|_| RequestError::InvalidPort(token.to_string()))
}

/// Render samples as newline-terminated JSON documents
pub fn encode_samples(samples: &[TraceSample]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(samples.len() * 512);
    for sample in samples {
        serde_json::to_writer(&mut out, sample)?;
        out.push(b'\n');
    }
    Ok(out)
}
