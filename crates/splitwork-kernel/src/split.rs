//! Line splitter: fan one stream out to N outputs, one whole line at a time.
//!
//! Line `i` of the input goes to output `i mod N`. A line is written with a
//! single `write_all` only after its terminator (or EOF) has been read, so no
//! output ever sees a fragment of a line that belongs to another output.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;

use crate::error::{Result, SplitworkError};
use crate::line_reader::{DEFAULT_CHUNK_SIZE, LineEnding, LineReader};

/// Per-descriptor line counts and total bytes moved by one split or merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTally {
    /// Lines written to (split) or read from (merge) each descriptor, by index.
    pub lines: Vec<u64>,
    /// Total line bytes moved, excluding separators added by the merger.
    pub bytes: u64,
}

impl LineTally {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            lines: vec![0; slots],
            bytes: 0,
        }
    }

    /// Total number of lines across all descriptors.
    pub fn total_lines(&self) -> u64 {
        self.lines.iter().sum()
    }

    pub(crate) fn record(&mut self, slot: usize, len: usize) {
        self.lines[slot] += 1;
        self.bytes += len as u64;
    }
}

/// Split lines from `input` round-robin across `outputs`.
///
/// Fails with `InvalidArgument` before reading anything if `outputs` is empty.
/// Every output is dropped (closed) on return, whether or not it received a
/// line and whether or not the split succeeded.
pub fn split_lines<R, W>(input: R, mut outputs: Vec<W>, chunk_size: usize) -> Result<LineTally>
where
    R: Read,
    W: Write,
{
    if outputs.is_empty() {
        return Err(SplitworkError::invalid("output file list is empty"));
    }

    let n = outputs.len();
    let mut reader = LineReader::with_chunk_size(input, chunk_size);
    let mut tally = LineTally::new(n);
    let mut line = Vec::new();
    let mut cursor = 0;

    loop {
        line.clear();
        let ending = reader
            .read_line(&mut line)
            .map_err(|source| SplitworkError::Read { index: 0, source })?;
        let Some(ending) = ending else {
            break;
        };

        outputs[cursor]
            .write_all(&line)
            .and_then(|()| outputs[cursor].flush())
            .map_err(|source| SplitworkError::Write { index: cursor, source })?;
        tally.record(cursor, line.len());

        if ending == LineEnding::Eof {
            break;
        }
        cursor = (cursor + 1) % n;
    }

    tracing::trace!(lines = tally.total_lines(), bytes = tally.bytes, outputs = n, "split finished");
    Ok(tally)
}

/// Descriptor entry point: split `input` across `outputs` with the default chunk size.
pub fn split(input: OwnedFd, outputs: Vec<OwnedFd>) -> Result<LineTally> {
    split_with_chunk_size(input, outputs, DEFAULT_CHUNK_SIZE)
}

/// Descriptor entry point with an explicit chunk size.
pub fn split_with_chunk_size(
    input: OwnedFd,
    outputs: Vec<OwnedFd>,
    chunk_size: usize,
) -> Result<LineTally> {
    let outputs: Vec<File> = outputs.into_iter().map(File::from).collect();
    split_lines(File::from(input), outputs, chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use splitwork_testutil::{ChunkedReader, FailingWriter};

    fn split_str(content: &str, n: usize, chunk: usize) -> Vec<String> {
        let mut outputs = vec![Vec::new(); n];
        {
            let sinks: Vec<&mut Vec<u8>> = outputs.iter_mut().collect();
            split_lines(content.as_bytes(), sinks, chunk).unwrap();
        }
        outputs
            .into_iter()
            .map(|o| String::from_utf8(o).unwrap())
            .collect()
    }

    #[rstest]
    #[case::simple_round_robin("1\n2\n3\n4\n5\n6\n", &["1\n4\n", "2\n5\n", "3\n6\n"])]
    #[case::single_line_multi_output("12345\n", &["12345\n", "", ""])]
    #[case::single_line_without_eol("12345", &["12345", "", ""])]
    #[case::empty_lines("\n\n12345", &["\n", "\n", "12345"])]
    #[case::uneven("a\nb\nc\nd\n", &["a\nd\n", "b\n", "c\n"])]
    #[case::empty_content("", &["", "", ""])]
    fn test_split_cases(#[case] content: &str, #[case] expected: &[&str]) {
        for chunk in [1, 2, 7, DEFAULT_CHUNK_SIZE] {
            assert_eq!(split_str(content, expected.len(), chunk), expected, "chunk={chunk}");
        }
    }

    #[test]
    fn test_single_output_is_identity() {
        let content = "a\nb\n12345";
        assert_eq!(split_str(content, 1, 3), vec![content]);
    }

    #[test]
    fn test_multibuffer_line_not_split() {
        let content = format!("{}\n", "a".repeat(5000));
        let outputs = split_str(&content, 2, DEFAULT_CHUNK_SIZE);
        assert_eq!(outputs[0], content);
        assert_eq!(outputs[1], "");
    }

    #[test]
    fn test_each_line_is_one_write() {
        let source = ChunkedReader::new(b"alpha\nbeta\ngamma\n".to_vec(), 3);
        let mut outputs = vec![FailingWriter::recording(), FailingWriter::recording()];
        {
            let sinks: Vec<&mut FailingWriter> = outputs.iter_mut().collect();
            split_lines(source, sinks, 4).unwrap();
        }
        assert_eq!(outputs[0].writes(), vec![b"alpha\n".to_vec(), b"gamma\n".to_vec()]);
        assert_eq!(outputs[1].writes(), vec![b"beta\n".to_vec()]);
    }

    #[test]
    fn test_tally_counts_lines_per_output() {
        let sinks = vec![Vec::new(), Vec::new()];
        let tally = split_lines(&b"a\nb\nc"[..], sinks, 16).unwrap();
        assert_eq!(tally.lines, vec![2, 1]);
        assert_eq!(tally.bytes, 5);
        assert_eq!(tally.total_lines(), 3);
    }

    #[test]
    fn test_no_outputs_rejected_before_reading() {
        let source = ChunkedReader::new(b"data\n".to_vec(), 8);
        let outputs: Vec<Vec<u8>> = Vec::new();
        let err = split_lines(&source, outputs, 8).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(source.reads(), 0);
    }

    #[test]
    fn test_write_error_names_output() {
        let outputs = vec![FailingWriter::recording(), FailingWriter::broken()];
        let err = split_lines(&b"ok\nfails\nnever\n"[..], outputs, 16).unwrap_err();
        match err {
            SplitworkError::Write { index, .. } => assert_eq!(index, 1),
            other => panic!("expected write error, got {other:?}"),
        }
    }
}
