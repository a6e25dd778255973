pub mod enums;
pub mod rust_gen;
pub mod shared;
pub mod writer;

use crate::model::{Direction, ProtocolModel};
use serde_derive::{Deserialize, Serialize};
use shared::builder::{PlanBuildError, PlanBuilder};
use thiserror::Error;
use tracing::debug;
use writer::CodeWriter;

/// What a decoder does when it meets bad input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    #[default]
    Silent,
    /// Log the failing field, then return the error.
    Report,
    /// Panic. Only for input produced by a trusted peer.
    Abort,
}

/// Generator switches. The YAML config file uses the same kebab-case keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GeneratorOptions {
    pub generate_enums: bool,
    pub generate_demarshallers: bool,
    pub assert_on_error: bool,
    pub print_error: bool,
    /// Generate decoders for messages a server receives (client messages).
    pub server: bool,
    /// Generate decoders for messages a client receives (server messages).
    pub client: bool,
    /// Line emitted verbatim as a `use` item at the top of the output.
    pub include: Option<String>,
    pub keep_identical_file: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("nothing to generate: enable enums and/or demarshallers")]
    NoOutput,
    #[error("demarshallers need --server and/or --client")]
    NoRole,
    #[error("--assert-on-error and --print-error are mutually exclusive")]
    ConflictingPolicy,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid options: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build decode plan: {0}")]
    Plan(#[from] PlanBuildError),
    #[error("{symbol} = {value} does not fit in {int_type}")]
    ValueTooLarge {
        symbol: String,
        value: u64,
        int_type: String,
    },
    #[error("failed to format output")]
    Format(#[from] std::fmt::Error),
}

impl GeneratorOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.generate_enums && !self.generate_demarshallers {
            return Err(ConfigError::NoOutput);
        }
        if self.generate_demarshallers && !self.server && !self.client {
            return Err(ConfigError::NoRole);
        }
        if self.assert_on_error && self.print_error {
            return Err(ConfigError::ConflictingPolicy);
        }
        Ok(())
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        if self.assert_on_error {
            ErrorPolicy::Abort
        } else if self.print_error {
            ErrorPolicy::Report
        } else {
            ErrorPolicy::Silent
        }
    }

    /// Message directions to decode. A role decodes what it receives.
    pub fn decoded_directions(&self) -> Vec<Direction> {
        let mut directions = Vec::new();
        if self.client {
            directions.push(Direction::Server);
        }
        if self.server {
            directions.push(Direction::Client);
        }
        directions
    }

    /// Overlays `overrides` on these options: flags set there win.
    pub fn merged_with(mut self, overrides: &GeneratorOptions) -> Self {
        self.generate_enums |= overrides.generate_enums;
        self.generate_demarshallers |= overrides.generate_demarshallers;
        self.assert_on_error |= overrides.assert_on_error;
        self.print_error |= overrides.print_error;
        self.server |= overrides.server;
        self.client |= overrides.client;
        self.keep_identical_file |= overrides.keep_identical_file;
        if overrides.include.is_some() {
            self.include = overrides.include.clone();
        }
        self
    }
}

/// Generates the full output text for an annotated model.
pub fn generate(
    model: &ProtocolModel,
    options: &GeneratorOptions,
    source_name: &str,
) -> Result<String, GenerateError> {
    options.validate()?;

    let mut w = CodeWriter::new();
    w.comment(format!("Generated from {source_name} by idl-gen, do not edit."))?;
    w.blank()?;
    if options.generate_demarshallers {
        w.line("#![allow(dead_code, unused_variables, unused_mut)]")?;
        w.blank()?;
    }
    if let Some(include) = &options.include {
        w.line(format!("use {};", include.trim().trim_end_matches(';')))?;
        w.blank()?;
    }

    if options.generate_enums {
        let tables = enums::Enumerator::new(model).tables();
        debug!(tables = tables.len(), "emitting enums");
        enums::emit_enums(&tables, &mut w)?;
    }

    if options.generate_demarshallers {
        let directions = options.decoded_directions();
        let ir = PlanBuilder::new(model).build(&directions)?;
        debug!(messages = ir.messages.len(), "emitting demarshallers");
        rust_gen::emit_demarshallers(&ir, &directions, options.error_policy(), &mut w)?;
    }

    Ok(w.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> GeneratorOptions {
        GeneratorOptions {
            generate_demarshallers: true,
            server: true,
            ..Default::default()
        }
    }

    #[test]
    fn validate_rejects_bad_combinations() {
        assert_eq!(GeneratorOptions::default().validate(), Err(ConfigError::NoOutput));
        let no_role = GeneratorOptions {
            generate_demarshallers: true,
            ..Default::default()
        };
        assert_eq!(no_role.validate(), Err(ConfigError::NoRole));
        let both = GeneratorOptions {
            assert_on_error: true,
            print_error: true,
            ..options()
        };
        assert_eq!(both.validate(), Err(ConfigError::ConflictingPolicy));
        assert_eq!(options().validate(), Ok(()));
    }

    #[test]
    fn roles_select_received_directions() {
        assert_eq!(options().decoded_directions(), vec![Direction::Client]);
        let client = GeneratorOptions {
            client: true,
            server: false,
            ..options()
        };
        assert_eq!(client.decoded_directions(), vec![Direction::Server]);
    }

    #[test]
    fn policy_follows_flags() {
        assert_eq!(options().error_policy(), ErrorPolicy::Silent);
        let abort = GeneratorOptions {
            assert_on_error: true,
            ..options()
        };
        assert_eq!(abort.error_policy(), ErrorPolicy::Abort);
        let report = GeneratorOptions {
            print_error: true,
            ..options()
        };
        assert_eq!(report.error_policy(), ErrorPolicy::Report);
    }

    #[test]
    fn merge_keeps_file_values_unless_overridden() {
        let file = GeneratorOptions {
            generate_enums: true,
            include: Some("crate::prelude::*".into()),
            ..Default::default()
        };
        let flags = GeneratorOptions {
            client: true,
            ..Default::default()
        };
        let merged = file.clone().merged_with(&flags);
        assert!(merged.generate_enums);
        assert!(merged.client);
        assert_eq!(merged.include.as_deref(), Some("crate::prelude::*"));

        let flags = GeneratorOptions {
            include: Some("other::*".into()),
            ..Default::default()
        };
        assert_eq!(file.merged_with(&flags).include.as_deref(), Some("other::*"));
    }
}
