/* High-level reflection API */

use crate::demarshaller::{DecodeOptions, DecodeStats, Demarshaller};
use crate::errors::{ReflectError, ReflectResult};
use crate::value::Value;
use idl_gen::codegen::shared::builder::PlanBuilder;
use idl_gen::codegen::shared::ir::{DemarshalIr, MessagePlan};
use idl_gen::model::{self, Direction, ProtocolModel};

/// Loaded protocol plus the decode plan of every message in both directions.
pub struct Reflector {
    model: ProtocolModel,
    ir: DemarshalIr,
    options: DecodeOptions,
}

impl Reflector {
    pub fn new(model: ProtocolModel) -> ReflectResult<Self> {
        Self::with_options(model, DecodeOptions::default())
    }

    pub fn with_options(model: ProtocolModel, options: DecodeOptions) -> ReflectResult<Self> {
        let ir = PlanBuilder::new(&model).build(&[Direction::Server, Direction::Client])?;
        Ok(Self { model, ir, options })
    }

    /// Parses and analyzes a protocol description.
    pub fn from_yaml(source: &str) -> ReflectResult<Self> {
        Self::new(model::load(source)?)
    }

    pub fn model(&self) -> &ProtocolModel {
        &self.model
    }

    pub fn ir(&self) -> &DemarshalIr {
        &self.ir
    }

    pub fn set_options(&mut self, options: DecodeOptions) {
        self.options = options;
    }

    pub fn demarshaller(&self) -> Demarshaller<'_> {
        Demarshaller::with_options(&self.ir, self.options)
    }

    pub fn message_plan(
        &self,
        channel: &str,
        direction: Direction,
        message: &str,
    ) -> ReflectResult<&MessagePlan> {
        self.ir
            .message_by_name(channel, direction, message)
            .ok_or_else(|| ReflectError::UnknownMessage {
                channel: channel.to_string(),
                direction: direction.to_string(),
                message: message.to_string(),
            })
    }

    /// Maps a channel and message given by name or by numeric value to names.
    pub fn resolve_names(
        &self,
        channel: &str,
        direction: Direction,
        message: &str,
    ) -> ReflectResult<(String, String)> {
        let unknown = || ReflectError::UnknownMessage {
            channel: channel.to_string(),
            direction: direction.to_string(),
            message: message.to_string(),
        };
        let found = self
            .model
            .channels
            .iter()
            .find(|c| c.name == channel || channel.parse::<u64>().ok() == Some(c.value))
            .ok_or_else(unknown)?;
        let msg = self
            .model
            .messages(found, direction)
            .into_iter()
            .find(|m| m.name == message || message.parse::<u64>().ok() == Some(m.value))
            .ok_or_else(unknown)?;
        Ok((found.name.clone(), msg.name.clone()))
    }

    /// Decodes `buf` as one message of `channel`, inherited messages included.
    pub fn decode(
        &self,
        channel: &str,
        direction: Direction,
        message: &str,
        buf: &[u8],
    ) -> ReflectResult<Value> {
        let plan = self.message_plan(channel, direction, message)?;
        Ok(self.demarshaller().decode_message(plan, buf)?)
    }

    pub fn decode_with_stats(
        &self,
        channel: &str,
        direction: Direction,
        message: &str,
        buf: &[u8],
    ) -> ReflectResult<(Value, DecodeStats)> {
        let plan = self.message_plan(channel, direction, message)?;
        Ok(self.demarshaller().decode_message_with_stats(plan, buf)?)
    }

    /// Decodes `buf` as one named struct.
    pub fn decode_type(&self, type_name: &str, buf: &[u8]) -> ReflectResult<Value> {
        let unknown = || ReflectError::UnknownType {
            type_name: type_name.to_string(),
        };
        let index = self.ir.type_index(type_name).ok_or_else(unknown)?;
        let result = self.demarshaller().decode_type(index, buf).ok_or_else(unknown)?;
        Ok(result?)
    }
}
