/* Binary for decoding one message from a file and printing it as JSON */

use anyhow::Context;
use clap::Parser as ClapParser;
use idl_gen::model::Direction;
use idl_reflect::{DecodeOptions, Reflector};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "idl-reflect")]
#[command(about = "Decode a protocol message and print it as JSON")]
struct Args {
    /* Protocol description (YAML) */
    #[arg(short = 'f', long = "protocol", required = true)]
    protocol: PathBuf,

    /* Binary message body to decode */
    #[arg(short, long, required = true)]
    data_file: PathBuf,

    /* Channel the message arrived on, by name or value */
    #[arg(long, required_unless_present = "struct_name")]
    channel: Option<String>,

    /* `server` for server-to-client messages, `client` for the other way */
    #[arg(long, value_parser = ["server", "client"], default_value = "server")]
    direction: String,

    /* Message type, by name or value */
    #[arg(short = 't', long = "type", requires = "channel")]
    msg_type: Option<String>,

    /* Decode as a named struct instead of a message */
    #[arg(long = "struct", conflicts_with = "msg_type")]
    struct_name: Option<String>,

    /* Fail when pointers nest deeper than this */
    #[arg(long)]
    max_pointer_depth: Option<usize>,

    /* Pretty print JSON output */
    #[arg(short, long)]
    pretty: bool,

    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();

    let source = std::fs::read_to_string(&args.protocol)
        .with_context(|| format!("failed to read {}", args.protocol.display()))?;
    let mut reflector = Reflector::from_yaml(&source)?;
    reflector.set_options(DecodeOptions {
        max_pointer_depth: args.max_pointer_depth,
        ..Default::default()
    });

    let data = std::fs::read(&args.data_file)
        .with_context(|| format!("failed to read {}", args.data_file.display()))?;

    let value = match (&args.struct_name, &args.channel, &args.msg_type) {
        (Some(struct_name), _, _) => reflector.decode_type(struct_name, &data)?,
        (None, Some(channel), Some(msg_type)) => {
            let direction = if args.direction == "client" {
                Direction::Client
            } else {
                Direction::Server
            };
            let (channel, message) = reflector.resolve_names(channel, direction, msg_type)?;
            reflector.decode(&channel, direction, &message, &data)?
        }
        _ => anyhow::bail!("pass --struct, or --channel together with --type"),
    };

    let json = value.to_json_shared();
    let json = if args.pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    println!("{json}");
    Ok(())
}
