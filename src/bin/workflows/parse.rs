use anyhow::{bail, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Status,
    Build,
    Validate,
    Enable,
    Disable,
    Activate,
    Print,
    Help,
}

impl Command {
    fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "status" => Command::Status,
            "build" => Command::Build,
            "validate" => Command::Validate,
            "enable" => Command::Enable,
            "disable" => Command::Disable,
            "activate" => Command::Activate,
            "print" => Command::Print,
            "help" | "-h" | "--help" => Command::Help,
            other => bail!("unknown command '{}'\n\n{}", other, crate::usage()),
        })
    }

    fn accepts(self, flag: Flag) -> bool {
        matches!(
            (self, flag),
            (Command::Validate | Command::Activate, Flag::Base)
                | (Command::Build, Flag::Output)
                | (Command::Status, Flag::Json)
        )
    }

    /// Inclusive bounds on positional arguments.
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Command::Status | Command::Help => (0, Some(0)),
            Command::Print => (0, Some(1)),
            Command::Build
            | Command::Validate
            | Command::Enable
            | Command::Disable
            | Command::Activate => (1, None),
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Build => "build",
            Command::Validate => "validate",
            Command::Enable => "enable",
            Command::Disable => "disable",
            Command::Activate => "activate",
            Command::Print => "print",
            Command::Help => "help",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flag {
    /// `-c <name>`: pin the base device tree.
    Base,
    /// `-o <path>`: output file for `build`.
    Output,
    /// `--json`: machine-readable `status`.
    Json,
}

impl Flag {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "-c" => Some(Flag::Base),
            "-o" => Some(Flag::Output),
            "--json" => Some(Flag::Json),
            _ => None,
        }
    }

    fn takes_value(self) -> bool {
        !matches!(self, Flag::Json)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flag::Base => "-c",
            Flag::Output => "-o",
            Flag::Json => "--json",
        })
    }
}

/// What the next token may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// A flag or a positional.
    Any,
    /// The value of the given flag.
    Value(Flag),
    /// Positionals only (after `--`).
    Positional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub(crate) command: Command,
    pub(crate) args: Vec<String>,
    pub(crate) base: Option<String>,
    pub(crate) output: Option<String>,
    pub(crate) json: bool,
}

impl Invocation {
    fn new(command: Command) -> Self {
        Self {
            command,
            args: Vec::new(),
            base: None,
            output: None,
            json: false,
        }
    }

    fn set(&mut self, flag: Flag, value: Option<&str>) -> Result<()> {
        let slot = match flag {
            Flag::Base => &mut self.base,
            Flag::Output => &mut self.output,
            Flag::Json => {
                self.json = true;
                return Ok(());
            }
        };
        if slot.is_some() {
            bail!("{} given more than once", flag);
        }
        *slot = value.map(str::to_string);
        Ok(())
    }
}

pub(crate) fn parse_invocation(args: &[String]) -> Result<Invocation> {
    let Some((first, rest)) = args.split_first() else {
        bail!(crate::usage());
    };
    let mut inv = Invocation::new(Command::parse(first)?);

    let mut expect = Expect::Any;
    for token in rest {
        expect = match expect {
            Expect::Value(flag) => {
                inv.set(flag, Some(token.as_str()))?;
                Expect::Any
            }
            Expect::Positional => {
                inv.args.push(token.clone());
                Expect::Positional
            }
            Expect::Any if token == "--" => Expect::Positional,
            Expect::Any => match Flag::from_token(token) {
                Some(flag) if !inv.command.accepts(flag) => bail!(
                    "option {} is not accepted by `{}`",
                    flag,
                    inv.command.name()
                ),
                Some(flag) if flag.takes_value() => Expect::Value(flag),
                Some(flag) => {
                    inv.set(flag, None)?;
                    Expect::Any
                }
                None if token.len() > 1 && token.starts_with('-') => {
                    bail!("unknown option '{}'\n\n{}", token, crate::usage())
                }
                None => {
                    inv.args.push(token.clone());
                    Expect::Any
                }
            },
        };
    }
    if let Expect::Value(flag) = expect {
        bail!("option {} requires a value", flag);
    }

    let (min, max) = inv.command.arity();
    let count = inv.args.len();
    if count < min || max.is_some_and(|max| count > max) {
        bail!(
            "wrong number of arguments for `{}`\n\n{}",
            inv.command.name(),
            crate::usage()
        );
    }
    if inv.output.is_some() && count > 1 {
        bail!("-o can only be used when building a single source");
    }
    Ok(inv)
}
