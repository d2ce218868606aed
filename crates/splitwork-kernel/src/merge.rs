//! Line merger: fan N inputs back into one stream, one line per turn.
//!
//! Inputs are visited round-robin starting at index 0. Each turn copies
//! exactly one line from the current input; an input that reports EOF is
//! dropped and skipped from then on.
//!
//! Terminators are normalised so lines from different inputs never run
//! together: a line that arrived without `\n` gets one as soon as anything
//! else is written after it. The merged stream therefore ends without a
//! newline only when the very last line written lacked one.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;

use crate::error::{Result, SplitworkError};
use crate::line_reader::{DEFAULT_CHUNK_SIZE, LineEnding, LineReader};
use crate::split::LineTally;

/// Merge lines from `inputs` round-robin into `output`.
///
/// Fails with `InvalidArgument` before writing anything if `inputs` is empty.
/// The output and every input are dropped (closed) on return.
pub fn merge_lines<R, W>(mut output: W, inputs: Vec<R>, chunk_size: usize) -> Result<LineTally>
where
    R: Read,
    W: Write,
{
    if inputs.is_empty() {
        return Err(SplitworkError::invalid("input file list is empty"));
    }

    let n = inputs.len();
    let mut readers: Vec<Option<LineReader<R>>> = inputs
        .into_iter()
        .map(|input| Some(LineReader::with_chunk_size(input, chunk_size)))
        .collect();
    let mut open = n;
    let mut tally = LineTally::new(n);
    let mut line = Vec::new();
    let mut owes_separator = false;
    let mut cursor = 0;

    while open > 0 {
        if let Some(reader) = readers[cursor].as_mut() {
            line.clear();
            let ending = reader
                .read_line(&mut line)
                .map_err(|source| SplitworkError::Read { index: cursor, source })?;

            match ending {
                None => {
                    tracing::trace!(input = cursor, "merge input exhausted");
                    readers[cursor] = None;
                    open -= 1;
                }
                Some(ending) => {
                    if owes_separator {
                        write_out(&mut output, b"\n")?;
                    }
                    write_out(&mut output, &line)?;
                    owes_separator = ending == LineEnding::Eof;
                    tally.record(cursor, line.len());
                }
            }
        }
        cursor = (cursor + 1) % n;
    }

    output
        .flush()
        .map_err(|source| SplitworkError::Write { index: 0, source })?;
    tracing::trace!(lines = tally.total_lines(), bytes = tally.bytes, inputs = n, "merge finished");
    Ok(tally)
}

fn write_out<W: Write>(output: &mut W, bytes: &[u8]) -> Result<()> {
    output
        .write_all(bytes)
        .map_err(|source| SplitworkError::Write { index: 0, source })
}

/// Descriptor entry point: merge `inputs` into `output` with the default chunk size.
pub fn merge(output: OwnedFd, inputs: Vec<OwnedFd>) -> Result<LineTally> {
    merge_with_chunk_size(output, inputs, DEFAULT_CHUNK_SIZE)
}

/// Descriptor entry point with an explicit chunk size.
pub fn merge_with_chunk_size(
    output: OwnedFd,
    inputs: Vec<OwnedFd>,
    chunk_size: usize,
) -> Result<LineTally> {
    let inputs: Vec<File> = inputs.into_iter().map(File::from).collect();
    merge_lines(File::from(output), inputs, chunk_size)
}
