use std::{
    collections::HashMap,
    fmt,
    io::{self, Cursor, Read},
};

use axum::http::HeaderMap;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use tokio::signal::unix::{signal, SignalKind};

pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

/// Top three bits of the last signature byte. A canonical Ed25519 `s` never sets them.
const NON_CANONICAL_MASK: u8 = 0b1110_0000;

pub async fn wait_for_shutdown() {
    let (Ok(mut int), Ok(mut quit), Ok(mut term)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::error!("could not install signal handlers, graceful shutdown disabled");
        return std::future::pending().await;
    };
    tokio::select! {
        _ = int.recv() => {},
        _ = quit.recv() => {},
        _ = term.recv() => {}
    }
}

/// Read access to request headers by name.
pub trait HeaderSource {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderSource for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Exact name first, then the lowercase name, then the smallest key that
/// matches ignoring case, so duplicates in different cases resolve the same
/// way every time.
impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| self.get(&name.to_ascii_lowercase()))
            .or_else(|| {
                self.iter()
                    .filter(|(key, _)| key.eq_ignore_ascii_case(name))
                    .min_by_key(|(key, _)| key.as_str())
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

/// A request body that can be inspected without being used up.
pub struct RequestBody {
    inner: Box<dyn Read + Send>,
}

impl RequestBody {
    pub fn new<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Box::new(reader),
        }
    }

    /// Reads the stream to the end, appending everything to `sink`.
    ///
    /// An unread copy of whatever was read is put back in place of the
    /// stream before this returns, whether or not the read failed.
    pub fn tee_into(&mut self, sink: &mut Vec<u8>) -> io::Result<()> {
        let mut replay = Replay {
            body: self,
            copy: Vec::new(),
        };
        replay.body.inner.read_to_end(&mut replay.copy)?;
        sink.extend_from_slice(&replay.copy);
        Ok(())
    }
}

struct Replay<'a> {
    body: &'a mut RequestBody,
    copy: Vec<u8>,
}

impl Drop for Replay<'_> {
    fn drop(&mut self) {
        let copy = std::mem::take(&mut self.copy);
        self.body.inner = Box::new(Cursor::new(copy));
    }
}

impl Read for RequestBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::from(text.into_bytes())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum VerificationOutcome {
    Authorized,
    Denied(DenyReason),
}

impl VerificationOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DenyReason {
    #[error("Missing X-Signature-Ed25519 header")]
    MissingSignature,
    #[error("Malformed X-Signature-Ed25519 header: {0}")]
    MalformedSignature(#[from] SignatureFormatError),
    #[error("Missing X-Signature-Timestamp header")]
    MissingTimestamp,
    #[error("Signature does not match request")]
    SignatureMismatch(#[from] ed25519_dalek::SignatureError),
    #[error("Failed to read request body: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed authorizer event: {0}")]
    MalformedEvent(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SignatureFormatError {
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected 64 bytes, got {0}")]
    Length(usize),
    #[error("non-canonical encoding")]
    NonCanonical,
}

/// Checks that the request was signed by the holder of `key`.
///
/// The signed message is the timestamp header followed by the raw body.
/// `body` is left fully readable afterwards.
pub fn verify(
    headers: &impl HeaderSource,
    body: &mut RequestBody,
    key: &VerifyingKey,
) -> VerificationOutcome {
    match validate_discord_sig(headers, body, key) {
        Ok(()) => VerificationOutcome::Authorized,
        Err(reason) => VerificationOutcome::Denied(reason),
    }
}

fn validate_discord_sig(
    headers: &impl HeaderSource,
    body: &mut RequestBody,
    key: &VerifyingKey,
) -> Result<(), DenyReason> {
    let sig_hex = non_empty(headers, SIGNATURE_HEADER).ok_or(DenyReason::MissingSignature)?;
    let sig = parse_signature(sig_hex)?;
    let timestamp = non_empty(headers, TIMESTAMP_HEADER).ok_or(DenyReason::MissingTimestamp)?;
    let mut to_be_verified = timestamp.as_bytes().to_vec();
    body.tee_into(&mut to_be_verified)?;
    key.verify(&to_be_verified, &sig)?;
    Ok(())
}

fn non_empty<'a>(headers: &'a impl HeaderSource, name: &str) -> Option<&'a str> {
    headers.header(name).filter(|value| !value.is_empty())
}

fn parse_signature(sig_hex: &str) -> Result<Signature, SignatureFormatError> {
    let sig_arr: [u8; SIGNATURE_LENGTH] = hex::decode(sig_hex)?
        .try_into()
        .map_err(|bytes: Vec<u8>| SignatureFormatError::Length(bytes.len()))?;
    if sig_arr[SIGNATURE_LENGTH - 1] & NON_CANONICAL_MASK != 0 {
        return Err(SignatureFormatError::NonCanonical);
    }
    Ok(Signature::from_bytes(&sig_arr))
}
