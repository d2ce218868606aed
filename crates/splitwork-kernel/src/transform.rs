//! The per-worker routine: reads whole lines from one pipe, writes to another.
//!
//! The kernel treats a transform as opaque. It runs inside its own forked
//! process, so a transform that fails or panics only takes its worker down;
//! the merger sees that worker's output close and moves on.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};

/// A routine run once per worker process.
///
/// `input` yields the lines assigned to this worker (round-robin, whole
/// lines only). Everything written to `output` is merged back in turn order,
/// so a transform that wants strict output ordering must emit exactly one
/// line per input line.
pub trait Transform {
    /// Consume `input` to EOF and write the transformed stream to `output`.
    fn apply(&self, input: &mut File, output: &mut File) -> anyhow::Result<()>;
}

impl<T: Transform + ?Sized> Transform for &T {
    fn apply(&self, input: &mut File, output: &mut File) -> anyhow::Result<()> {
        (**self).apply(input, output)
    }
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn apply(&self, input: &mut File, output: &mut File) -> anyhow::Result<()> {
        (**self).apply(input, output)
    }
}

/// Transform backed by a closure. Build one with [`transform_fn`].
#[derive(Clone)]
pub struct FnTransform<F>(F);

/// Wrap a closure as a [`Transform`].
///
/// ```no_run
/// use std::io::{BufRead, BufReader, Write};
/// use splitwork_kernel::transform_fn;
///
/// let upper = transform_fn(|input, output| {
///     for line in BufReader::new(input).lines() {
///         writeln!(output, "{}", line?.to_uppercase())?;
///     }
///     Ok(())
/// });
/// # let _ = upper;
/// ```
pub fn transform_fn<F>(f: F) -> FnTransform<F>
where
    F: Fn(&mut File, &mut File) -> anyhow::Result<()>,
{
    FnTransform(f)
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&mut File, &mut File) -> anyhow::Result<()>,
{
    fn apply(&self, input: &mut File, output: &mut File) -> anyhow::Result<()> {
        (self.0)(input, output)
    }
}

/// Copies input to output unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, input: &mut File, output: &mut File) -> anyhow::Result<()> {
        io::copy(input, output).context("identity copy failed")?;
        Ok(())
    }
}

/// Runs an external program with the worker's pipes as its stdin and stdout.
///
/// The program's stderr is inherited. A non-zero exit (or death by signal)
/// is reported as a transform failure.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl ExternalCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name, for logs and error messages.
    pub fn program(&self) -> &OsString {
        &self.program
    }
}

impl Transform for ExternalCommand {
    fn apply(&self, input: &mut File, output: &mut File) -> anyhow::Result<()> {
        let name = self.program.to_string_lossy();
        let stdin = input.try_clone().context("failed to duplicate worker input")?;
        let stdout = output.try_clone().context("failed to duplicate worker output")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("{name}: failed to spawn"))?;

        let status = child
            .wait()
            .with_context(|| format!("{name}: failed to wait"))?;
        if !status.success() {
            bail!("{name}: {status}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, Write};

    fn run(transform: &dyn Transform, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut source = tempfile::tempfile()?;
        source.write_all(input)?;
        source.rewind()?;
        let mut sink = tempfile::tempfile()?;

        transform.apply(&mut source, &mut sink)?;

        sink.rewind()?;
        let mut out = Vec::new();
        sink.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_identity_copies() {
        assert_eq!(run(&Identity, b"a\nb\n").unwrap(), b"a\nb\n");
    }

    #[test]
    fn test_closure_transform() {
        let double = transform_fn(|input, output| {
            let mut buf = Vec::new();
            input.read_to_end(&mut buf)?;
            output.write_all(&buf)?;
            output.write_all(&buf)?;
            Ok(())
        });
        assert_eq!(run(&double, b"x\n").unwrap(), b"x\nx\n");
    }

    #[test]
    fn test_closure_error_propagates() {
        let failing = transform_fn(|_, _| bail!("refusing input"));
        let err = run(&failing, b"x\n").unwrap_err();
        assert!(err.to_string().contains("refusing input"));
    }

    #[test]
    fn test_external_command_builder() {
        let cmd = ExternalCommand::new("sed").arg("-e").args(["s/a/b/"]);
        assert_eq!(cmd.program(), "sed");
        assert_eq!(cmd.args, vec![OsString::from("-e"), OsString::from("s/a/b/")]);
    }
}
