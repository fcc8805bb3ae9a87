use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser as CliParser;

use litua::lang::lexer::Lexer;
use litua::lang::parser::Parser;
use litua::runtime::bridge::Config;
use litua::runtime::{discover_hook_files, Runtime};

#[derive(CliParser, Debug)]
#[command(name = "litua")]
#[command(version)]
#[command(about = "Read a text document as a tree and apply Lua hooks to its nodes")]
struct Settings {
    // helpful for debugging
    #[arg(long, help = "Print the token stream and stop")]
    dump_lexed: bool,
    #[arg(long, help = "Print the parsed tree and stop")]
    dump_parsed: bool,

    // configuration
    #[arg(long, value_name = "DIR", help = "Directory to look for hooks*.lua files in")]
    hooks_dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Addition to the Lua package.path for hook scripts")]
    add_require_path: Option<PathBuf>,

    // optional argument
    #[arg(short = 'o', long, value_name = "PATH", help = "Where to write the transformed document")]
    destination: Option<PathBuf>,

    // positional argument
    source: PathBuf,
}

fn derive_destination_filepath(source: &Path) -> PathBuf {
    source.with_extension("out")
}

fn run(conf: &Settings) -> anyhow::Result<()> {
    let source_text = fs::read_to_string(&conf.source)
        .with_context(|| format!("cannot read source document '{}'", conf.source.display()))?;

    if conf.dump_lexed {
        for token in Lexer::new(&source_text).tokenize()? {
            println!("{token}");
        }
        return Ok(());
    }

    if conf.dump_parsed {
        let tokens = Lexer::new(&source_text).tokenize()?;
        let document = Parser::new(tokens).parse()?;
        println!("{document:#?}");
        return Ok(());
    }

    let derived_dst = derive_destination_filepath(&conf.source);
    let dst = conf.destination.as_deref().unwrap_or(derived_dst.as_path());

    let default_hooks_dir = PathBuf::from(".");
    let hooks_dir = match &conf.hooks_dir {
        Some(dir) => dir.as_path(),
        None => conf.source.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(default_hooks_dir.as_path()),
    };

    let hook_files = discover_hook_files(hooks_dir)
        .with_context(|| format!("cannot list hooks directory '{}'", hooks_dir.display()))?;

    let config = Config {
        source: conf.source.clone(),
        destination: dst.to_path_buf(),
        hook_files: hook_files.clone(),
        lua_path_addition: conf.add_require_path.as_ref().map(|p| p.display().to_string()),
    };

    let runtime = Runtime::new(config)?;
    for hook_file in &hook_files {
        println!("loading hook file '{}'", hook_file.display());
        runtime.load_hook_file(hook_file)?;
    }

    let output = runtime.transform(&source_text)?;

    fs::write(dst, output)
        .with_context(|| format!("cannot write destination '{}'", dst.display()))?;

    println!("file '{}' read", conf.source.display());
    println!("file '{}' written", dst.display());
    Ok(())
}

fn main() -> ExitCode {
    let conf = Settings::parse();

    match run(&conf) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            for cause in err.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
