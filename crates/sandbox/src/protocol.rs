//! Line-oriented request/response framing spoken with sandbox children.
//!
//! Request: one JSON object on a single line, flushed.
//!
//! Response: zero or more free-text diagnostic lines followed by exactly
//! one terminal line:
//!
//! | Terminal          | Meaning                                     |
//! |-------------------|---------------------------------------------|
//! | `GENERATED`       | generation succeeded                        |
//! | `RESULT:<float>`  | ranking succeeded with the given similarity |
//! | `EXCEPTION`       | the child caught an exception               |
//!
//! A diagnostic line containing `NSFW` anywhere flags the current
//! generation as NSFW. All parsing of this scheme lives here; the
//! process host only moves bytes.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, Lines};

use crate::error::SandboxError;

pub const GENERATED: &str = "GENERATED";
pub const EXCEPTION: &str = "EXCEPTION";
pub const RESULT_PREFIX: &str = "RESULT:";
pub const NSFW_MARKER: &str = "NSFW";

/// Serialize `request` as a single JSON line and flush it.
pub async fn write_request<W, T>(writer: &mut W, request: &T) -> Result<(), SandboxError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one generation response. Returns the NSFW flag on `GENERATED`.
pub async fn read_generation<R>(lines: &mut Lines<R>, label: &str) -> Result<bool, SandboxError>
where
    R: AsyncBufRead + Unpin,
{
    let mut nsfw = false;
    loop {
        let line = next_line(lines, label).await?;
        match line.trim() {
            GENERATED => return Ok(nsfw),
            EXCEPTION => return Err(SandboxError::ComputeFault(label.to_string())),
            diagnostic => {
                if diagnostic.contains(NSFW_MARKER) {
                    nsfw = true;
                }
                tracing::debug!(sandbox = label, line = diagnostic, "Sandbox diagnostic");
            }
        }
    }
}

/// Read one ranking response and return the similarity.
pub async fn read_ranking<R>(lines: &mut Lines<R>, label: &str) -> Result<f32, SandboxError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = next_line(lines, label).await?;
        let line = line.trim();
        if line == EXCEPTION {
            return Err(SandboxError::ComputeFault(label.to_string()));
        }
        if let Some(raw) = line.strip_prefix(RESULT_PREFIX) {
            return parse_similarity(raw);
        }
        tracing::debug!(sandbox = label, line, "Sandbox diagnostic");
    }
}

fn parse_similarity(raw: &str) -> Result<f32, SandboxError> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| SandboxError::Protocol(format!("unparsable similarity '{raw}'")))?;
    if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
        return Err(SandboxError::Protocol(format!(
            "similarity {value} outside [-1, 1]"
        )));
    }
    Ok(value)
}

async fn next_line<R>(lines: &mut Lines<R>, label: &str) -> Result<String, SandboxError>
where
    R: AsyncBufRead + Unpin,
{
    lines
        .next_line()
        .await?
        .ok_or_else(|| SandboxError::ChildExited(label.to_string()))
}
