//! Runs idl-gen over the test protocols so the generated decoders are
//! compiled and exercised like any downstream user would.

use idl_gen::codegen::{generate, GeneratorOptions};
use idl_gen::model;
use std::{
    env,
    error::Error,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

/// One `pub mod` in the output file.
struct Module {
    name: &'static str,
    options: GeneratorOptions,
}

fn modules(with_client_messages: bool) -> Vec<Module> {
    let decode = GeneratorOptions {
        generate_demarshallers: true,
        ..Default::default()
    };
    let mut modules = vec![
        Module {
            name: "ids",
            options: GeneratorOptions {
                generate_enums: true,
                ..Default::default()
            },
        },
        Module {
            name: "server_messages",
            options: GeneratorOptions {
                client: true,
                ..decode.clone()
            },
        },
        Module {
            name: "server_messages_abort",
            options: GeneratorOptions {
                client: true,
                assert_on_error: true,
                ..decode.clone()
            },
        },
    ];
    if with_client_messages {
        modules.push(Module {
            name: "client_messages",
            options: GeneratorOptions {
                server: true,
                ..decode
            },
        });
    }
    modules
}

fn render(source_path: &Path, with_client_messages: bool) -> Result<String, Box<dyn Error>> {
    println!("cargo:rerun-if-changed={}", source_path.display());
    let source = fs::read_to_string(source_path)?;
    let model = model::load(&source)?;
    let file_name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or("protocol path has no file name")?;

    let mut out = String::new();
    for module in modules(with_client_messages) {
        let text = generate(&model, &module.options, file_name)?;
        writeln!(out, "pub mod {} {{", module.name)?;
        out.push_str(&text);
        writeln!(out, "}}")?;
        writeln!(out)?;
    }
    Ok(out)
}

fn main() -> Result<(), Box<dyn Error>> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let workspace_root = manifest_dir
        .parent()
        .ok_or("failed to determine workspace root")?;
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let protocols = [
        ("spice.rs", workspace_root.join("idl_gen/tests/data/spice.yaml"), true),
        ("wire.rs", workspace_root.join("idl_reflect/tests/data/wire.yaml"), false),
    ];
    for (output, source, with_client_messages) in protocols {
        let text = render(&source, with_client_messages)?;
        fs::write(out_dir.join(output), text)?;
    }
    println!(
        "cargo:rerun-if-changed={}",
        manifest_dir.join("build.rs").display()
    );
    Ok(())
}
