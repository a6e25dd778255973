/* Analyze command - layout table and decode plan for a protocol file */

use crate::codegen::shared::builder::PlanBuilder;
use crate::model::{self, Direction, Layout, ProtocolModel};
use anyhow::{Context, anyhow, bail};
use std::fmt::Write;
use std::path::Path;

/* Execute the analyze command */
pub fn run(protocol: &Path, print_ir: bool, message: Option<&str>) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(protocol)
        .with_context(|| format!("failed to read {}", protocol.display()))?;
    let model = model::load(&source).with_context(|| format!("in {}", protocol.display()))?;

    print!("{}", layout_report(&model)?);

    if print_ir || message.is_some() {
        let ir = PlanBuilder::new(&model).build(&[Direction::Server, Direction::Client])?;
        if let Some(selector) = message {
            let (channel, direction, name) = parse_selector(selector)?;
            let plan = ir
                .message_by_name(channel, direction, name)
                .ok_or_else(|| anyhow!("no {direction} message '{name}' on channel '{channel}'"))?;
            println!("{}", serde_json::to_string_pretty(plan)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&ir)?);
        }
    }
    Ok(())
}

/// `CHANNEL/DIR/NAME`, DIR being `server` or `client`.
pub fn parse_selector(selector: &str) -> anyhow::Result<(&str, Direction, &str)> {
    let parts: Vec<&str> = selector.split('/').collect();
    let [channel, direction, name] = parts.as_slice() else {
        bail!("expected CHANNEL/DIR/NAME, got '{selector}'");
    };
    let direction = match *direction {
        "server" => Direction::Server,
        "client" => Direction::Client,
        other => bail!("direction must be 'server' or 'client', got '{other}'"),
    };
    Ok((*channel, direction, *name))
}

pub fn layout_report(model: &ProtocolModel) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "protocol {}", model.name)?;
    writeln!(out, "\n[types]")?;
    for named in model.types.values() {
        writeln!(out, "  {:<32} {}", named.name, describe(&named.layout))?;
    }
    for channel in &model.channels {
        writeln!(out, "\n[channel {} = {}]", channel.name, channel.value)?;
        for direction in [Direction::Server, Direction::Client] {
            for message in model.messages(channel, direction) {
                let inherited = if message.channel != channel.name {
                    format!(" (from {})", message.channel)
                } else {
                    String::new()
                };
                writeln!(
                    out,
                    "  {:<6} {:<5} {:<24} {}{inherited}",
                    direction.as_str(),
                    message.value,
                    message.name,
                    describe(&message.body.layout)
                )?;
            }
        }
    }
    Ok(out)
}

fn describe(layout: &Layout) -> String {
    match (layout.fixed_size, &layout.variable_cause) {
        (Some(size), _) => format!("fixed {size}"),
        (None, Some(cause)) => format!("min {} (variable: {cause})", layout.min_size),
        (None, None) => format!("min {}", layout.min_size),
    }
}
