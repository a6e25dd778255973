use clap::{Parser, Subcommand};
use idl_gen::cmds;
use idl_gen::codegen::GeneratorOptions;
use idl_gen::config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "idl-gen")]
#[command(about = "Enumeration and demarshaller generator for SPICE protocol descriptions", long_about = None)]
struct Cli {
    /* Log at debug level unless RUST_LOG says otherwise */
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /* Generate enumerations and/or demarshallers */
    Codegen {
        /* Protocol description (YAML) */
        protocol: PathBuf,

        /* Destination file */
        dest: PathBuf,

        #[arg(short = 'e', long = "generate-enums")]
        generate_enums: bool,

        #[arg(short = 'd', long = "generate-demarshallers")]
        generate_demarshallers: bool,

        /* Panic on malformed input instead of returning an error */
        #[arg(short = 'a', long = "assert-on-error")]
        assert_on_error: bool,

        /* Report the failing field before returning an error */
        #[arg(short = 'p', long = "print-error")]
        print_error: bool,

        /* Decode messages a server receives */
        #[arg(short = 's', long = "server")]
        server: bool,

        /* Decode messages a client receives */
        #[arg(short = 'c', long = "client")]
        client: bool,

        /* Leave the destination untouched when the output is identical */
        #[arg(short = 'k', long = "keep-identical-file")]
        keep_identical_file: bool,

        /* Extra `use` line placed at the top of the output */
        #[arg(short = 'i', long = "include", value_name = "LINE")]
        include: Option<String>,

        /* YAML file with default options; flags given here win */
        #[arg(long = "config", value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /* Print layouts of every type and message */
    Analyze {
        protocol: PathBuf,

        /* Print the decode plan as JSON */
        #[arg(long = "print-ir")]
        print_ir: bool,

        /* Print the decode plan of one message only */
        #[arg(long = "message", value_name = "CHANNEL/DIR/NAME")]
        message: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Codegen {
            protocol,
            dest,
            generate_enums,
            generate_demarshallers,
            assert_on_error,
            print_error,
            server,
            client,
            keep_identical_file,
            include,
            config,
        } => {
            let flags = GeneratorOptions {
                generate_enums,
                generate_demarshallers,
                assert_on_error,
                print_error,
                server,
                client,
                include,
                keep_identical_file,
            };
            let options = config::resolve_options(config.as_deref(), &flags)?;
            cmds::codegen::run(&protocol, &dest, &options)?;
        }

        Commands::Analyze {
            protocol,
            print_ir,
            message,
        } => {
            cmds::analyze::run(&protocol, print_ir, message.as_deref())?;
        }
    }

    Ok(())
}
