use clap::{Parser, ValueEnum};
use std::{
    fs,
    io::{stderr, stdout, Write},
    path::PathBuf,
    process::exit,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Target {
    /// SPIR-V binary.
    Spirv,
    /// Metal Shading Language source.
    Msl,
    /// GLSL source (one entry point per run).
    Glsl,
    /// HLSL source.
    Hlsl,
}

#[derive(Parser, Debug)]
#[command(version, about = "Compile WGSL shaders to SPIR-V, MSL, GLSL or HLSL.")]
struct Args {
    #[arg(help = "Input WGSL file path.")]
    input: PathBuf,

    #[arg(
        short,
        long,
        help = "Output file path. The output is printed to stdout if this \
        path is not given."
    )]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Target::Spirv)]
    target: Target,

    #[arg(long, help = "Include debug names in the output.")]
    debug: bool,

    #[arg(long, help = "Run the validator before emission.")]
    validate: bool,

    #[arg(
        long,
        help = "Entry point to emit; required for GLSL when the module has \
        more than one."
    )]
    entry_point: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let source = fs::read_to_string(&args.input).unwrap_or_else(|e| {
        writeln!(stderr(), "error: failed to read input file: {}", e).unwrap();
        exit(1);
    });

    let tu = wgslc::parse(&source).unwrap_or_else(|e| {
        writeln!(stderr(), "{}", e.emit_to_string(&source)).unwrap();
        exit(1);
    });
    let (module, warnings) = wgslc::lower(&tu).unwrap_or_else(|e| {
        writeln!(stderr(), "{}", e.emit_to_string(&source)).unwrap();
        exit(1);
    });
    for warning in &warnings {
        writeln!(
            stderr(),
            "{}",
            wgslc::format_error(&format!("warning: {}", warning), warning.span, &source)
        )
        .unwrap();
    }
    if args.validate {
        if let Some(error) = wgslc::validate(&module).into_iter().next() {
            writeln!(stderr(), "error: {}", error).unwrap();
            exit(1);
        }
    }

    let output = match args.target {
        Target::Spirv => {
            let options = wgslc::spv::Options {
                flags: if args.debug {
                    wgslc::spv::WriterFlags::DEBUG
                } else {
                    wgslc::spv::WriterFlags::empty()
                },
                ..Default::default()
            };
            wgslc::generate_spirv(&module, &options).unwrap_or_else(|e| {
                writeln!(stderr(), "error: {}", e).unwrap();
                exit(1);
            })
        }
        Target::Msl => {
            let options = wgslc::msl::Options::default();
            let (text, _) = wgslc::generate_msl(&module, &options).unwrap_or_else(|e| {
                writeln!(stderr(), "error: {}", e).unwrap();
                exit(1);
            });
            text.into_bytes()
        }
        Target::Glsl => {
            let entry_point = match args.entry_point {
                Some(name) => name,
                None if module.entry_points.len() == 1 => {
                    module.entry_points[0].name.clone()
                }
                None => {
                    writeln!(
                        stderr(),
                        "error: --entry-point is required for GLSL output"
                    )
                    .unwrap();
                    exit(1);
                }
            };
            let options = wgslc::glsl::Options {
                entry_point,
                ..Default::default()
            };
            let (text, _) = wgslc::generate_glsl(&module, &options).unwrap_or_else(|e| {
                writeln!(stderr(), "error: {}", e).unwrap();
                exit(1);
            });
            text.into_bytes()
        }
        Target::Hlsl => {
            let options = wgslc::hlsl::Options {
                entry_point: args.entry_point,
                ..Default::default()
            };
            let (text, _) = wgslc::generate_hlsl(&module, &options).unwrap_or_else(|e| {
                writeln!(stderr(), "error: {}", e).unwrap();
                exit(1);
            });
            text.into_bytes()
        }
    };

    match args.output {
        Some(path) => fs::write(path, output).unwrap_or_else(|e| {
            writeln!(stderr(), "error: failed to write output file: {}", e).unwrap();
            exit(1);
        }),
        None => stdout().write_all(&output).unwrap_or_else(|e| {
            writeln!(stderr(), "error: failed to write output: {}", e).unwrap();
            exit(1);
        }),
    }
}
