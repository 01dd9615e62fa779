// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::CommandTemplateError;
use camino::Utf8Path;
use std::fmt;

/// A coverage tool command line with `{runner}`, `{args}` and `{output}` slots.
///
/// `{args}` expands to the runner's arguments quoted for a Windows command line, with quotes
/// escaped so the whole string can sit inside a double-quoted argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandTemplate {
    parts: Vec<TemplatePart>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum TemplatePart {
    Literal(String),
    Runner,
    Args,
    Output,
}

impl CommandTemplate {
    /// The OpenCover console form.
    pub const DEFAULT: &'static str =
        r#"-target:"{runner}" -targetargs:"{args}" -register:user -output:"{output}""#;

    /// Parses a template.
    pub fn new(template: &str) -> Result<Self, CommandTemplateError> {
        let mut parts = Vec::new();
        let mut rest = template;
        let mut offset = 0;
        while let Some(start) = rest.find('{') {
            if start > 0 {
                parts.push(TemplatePart::Literal(rest[..start].to_owned()));
            }
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or(CommandTemplateError::Unclosed {
                offset: offset + start,
            })?;
            parts.push(match &after[..end] {
                "runner" => TemplatePart::Runner,
                "args" => TemplatePart::Args,
                "output" => TemplatePart::Output,
                other => {
                    return Err(CommandTemplateError::UnknownPlaceholder {
                        placeholder: other.to_owned(),
                    });
                }
            });
            let consumed = start + 1 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_owned()));
        }
        if !parts.contains(&TemplatePart::Runner) {
            return Err(CommandTemplateError::MissingRunner);
        }
        Ok(Self { parts })
    }

    /// Fills in the slots.
    pub fn render(&self, runner: &Utf8Path, args: &[String], output: &Utf8Path) -> String {
        let mut rendered = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(literal) => rendered.push_str(literal),
                TemplatePart::Runner => rendered.push_str(runner.as_str()),
                TemplatePart::Args => {
                    let quoted: Vec<_> = args.iter().map(|arg| quote_windows_arg(arg)).collect();
                    rendered.push_str(&quoted.join(" ").replace('"', "\\\""));
                }
                TemplatePart::Output => rendered.push_str(output.as_str()),
            }
        }
        rendered
    }
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            parts: vec![
                TemplatePart::Literal("-target:\"".to_owned()),
                TemplatePart::Runner,
                TemplatePart::Literal("\" -targetargs:\"".to_owned()),
                TemplatePart::Args,
                TemplatePart::Literal("\" -register:user -output:\"".to_owned()),
                TemplatePart::Output,
                TemplatePart::Literal("\"".to_owned()),
            ],
        }
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                TemplatePart::Literal(literal) => f.write_str(literal)?,
                TemplatePart::Runner => f.write_str("{runner}")?,
                TemplatePart::Args => f.write_str("{args}")?,
                TemplatePart::Output => f.write_str("{output}")?,
            }
        }
        Ok(())
    }
}

/// Quotes an argument the way the Microsoft C runtime parses it.
pub fn quote_windows_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '"']) {
        return arg.to_owned();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            c => {
                quoted.extend(std::iter::repeat_n('\\', backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat_n('\\', backslashes * 2));
    quoted.push('"');
    quoted
}

/// A fully built command: the program to launch and its arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunnerCommand {
    program: String,
    args: Vec<String>,
    raw_args: Option<String>,
}

impl RunnerCommand {
    /// Builds the command for a runner.
    ///
    /// With a coverage tool, the tool is launched with `template` rendered as its command line.
    /// Otherwise the runner is launched with `args`. Either way, `launcher` (for example `mono`)
    /// is put in front.
    pub fn build(
        runner: &Utf8Path,
        args: Vec<String>,
        launcher: Option<&str>,
        coverage: Option<CoverageCommand<'_>>,
    ) -> Result<Self, CommandTemplateError> {
        let (target, target_args, raw_args) = match coverage {
            Some(coverage) => {
                let rendered = coverage.template.render(runner, &args, coverage.output);
                let (split, raw) = split_rendered(rendered)?;
                (coverage.tool.to_string(), split, raw)
            }
            None => (runner.to_string(), args, None),
        };

        let Some(launcher) = launcher else {
            return Ok(Self {
                program: target,
                args: target_args,
                raw_args,
            });
        };
        let mut words = shell_words::split(launcher)
            .map_err(|error| CommandTemplateError::Split {
                command_line: launcher.to_owned(),
                error,
            })?
            .into_iter();
        let program = words.next().ok_or_else(|| CommandTemplateError::EmptyLauncher {
            launcher: launcher.to_owned(),
        })?;
        let mut all_args: Vec<String> = words.collect();
        all_args.push(target);
        all_args.extend(target_args);
        Ok(Self {
            program,
            args: all_args,
            raw_args,
        })
    }

    /// Returns the program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments passed individually.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the verbatim command-line tail, if any. Only set on Windows.
    pub fn raw_args(&self) -> Option<&str> {
        self.raw_args.as_deref()
    }

    /// Converts this into a tokio command.
    pub fn to_tokio(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        #[cfg(windows)]
        if let Some(raw) = &self.raw_args {
            command.raw_arg(raw);
        }
        command
    }
}

impl fmt::Display for RunnerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_words::quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_words::quote(arg))?;
        }
        if let Some(raw) = &self.raw_args {
            write!(f, " {raw}")?;
        }
        Ok(())
    }
}

/// The coverage tool slot of a [`RunnerCommand`].
#[derive(Clone, Copy, Debug)]
pub struct CoverageCommand<'a> {
    /// The coverage tool executable.
    pub tool: &'a Utf8Path,
    /// The tool's command line.
    pub template: &'a CommandTemplate,
    /// Where the tool writes coverage results.
    pub output: &'a Utf8Path,
}

// Split arguments, and the verbatim tail.
type SplitCommandLine = (Vec<String>, Option<String>);

// Windows programs parse their own command line, so it's passed through untouched there.
#[cfg(windows)]
fn split_rendered(rendered: String) -> Result<SplitCommandLine, CommandTemplateError> {
    Ok((Vec::new(), Some(rendered)))
}

#[cfg(not(windows))]
fn split_rendered(rendered: String) -> Result<SplitCommandLine, CommandTemplateError> {
    match shell_words::split(&rendered) {
        Ok(split) => Ok((split, None)),
        Err(error) => Err(CommandTemplateError::Split {
            command_line: rendered,
            error,
        }),
    }
}
