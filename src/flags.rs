//! Command-line switch registry.
//!
//! Switches are declared with a help string before parsing. Arguments take the
//! form `--name` or `--name=value`; a bare switch is stored with an empty
//! value, so callers can tell "absent" (`None`) from "present" (`Some("")`).

use std::collections::BTreeMap;
use std::fmt::Write;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlagError {
    #[error("Invalid flag: {0}")]
    UnknownFlag(String),
    #[error("help requested")]
    HelpRequested,
}

#[derive(Debug, Clone, Default)]
pub struct Flags {
    names: BTreeMap<String, String>,
    values: BTreeMap<String, String>,
}

impl Flags {
    /// A registry holding the switches every program understands.
    pub fn new() -> Self {
        let mut flags = Self::default();
        flags.define(
            "--queue",
            "Type of queue to use, can be graphics/compute/transfer.",
        );
        flags.define("--secondary", "Use secondary command buffer.");
        flags.define("--debug_utils", "Add debug utils names and labels.");
        flags
    }

    pub fn define(&mut self, name: &str, help: &str) {
        self.names.insert(name.to_string(), help.to_string());
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Parses arguments (without the program name). Later occurrences of a
    /// switch overwrite earlier ones.
    pub fn parse<I, S>(&mut self, args: I) -> Result<(), FlagError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = match arg.split_once('=') {
                Some((k, v)) => (k, v),
                None => (arg, ""),
            };
            if key == "--help" || key == "-h" {
                return Err(FlagError::HelpRequested);
            }
            if !self.is_declared(key) {
                return Err(FlagError::UnknownFlag(key.to_string()));
            }
            self.values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Parses a full argument vector, skipping the program name. Any error
    /// prints usage to standard error and exits with status 1.
    pub fn init<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Err(e) = self.parse(args.into_iter().skip(1)) {
            let invalid = match &e {
                FlagError::UnknownFlag(name) => Some(name.as_str()),
                FlagError::HelpRequested => None,
            };
            self.exit_with_usage(invalid);
        }
    }

    /// Value of a declared switch. Asking for an undeclared name prints usage
    /// and exits with status 1.
    pub fn get(&self, name: &str) -> Option<&str> {
        match self.lookup(name) {
            Ok(v) => v,
            Err(_) => self.exit_with_usage(Some(name)),
        }
    }

    /// Like [`Flags::get`] but undeclared names are simply absent.
    pub fn try_get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn lookup(&self, name: &str) -> Result<Option<&str>, FlagError> {
        if !self.is_declared(name) {
            return Err(FlagError::UnknownFlag(name.to_string()));
        }
        Ok(self.try_get(name))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn usage(&self, invalid: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(flag) = invalid {
            let _ = writeln!(out, "Invalid flag: {}", flag);
        }
        out.push_str("Flags:\n");
        for (name, help) in &self.names {
            let _ = writeln!(out, "  {}: {}", name, help);
        }
        out
    }

    fn exit_with_usage(&self, invalid: Option<&str>) -> ! {
        eprint!("{}", self.usage(invalid));
        std::process::exit(1);
    }
}
