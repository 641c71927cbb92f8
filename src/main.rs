use clap::Parser;
use sav3::SaveFile;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sav3", version, about = "SAV3 save-file decoder")]
struct Cli {
    /// Save file to decode
    save: PathBuf,

    /// Write the decompressed image here
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Write the string table here, one name per line
    #[arg(long, value_name = "PATH")]
    names: Option<PathBuf>,

    /// Write the record tree as JSON here instead of stdout
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Suppress stdout output (dump sinks are still written)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let save = SaveFile::open(&cli.save)?;

    if let Some(path) = &cli.image {
        fs::write(path, save.image())?;
        if !cli.quiet {
            println!("  wrote image   {} ({} B)", path.display(), save.image().len());
        }
    }

    if let Some(path) = &cli.names {
        let mut dump = save.names().join("\n");
        dump.push('\n');
        fs::write(path, dump)?;
        if !cli.quiet {
            println!("  wrote names   {} ({} entries)", path.display(), save.names().len());
        }
    }

    let json = save.to_json()?;
    match &cli.json {
        Some(path) => {
            fs::write(path, &json)?;
            if !cli.quiet {
                println!("  wrote json    {} ({} B)", path.display(), json.len());
            }
        }
        None if !cli.quiet => println!("{json}"),
        None => {}
    }

    if !cli.quiet {
        eprintln!(
            "Decoded {}: image {} B, {} name(s), {} group(s), {} unknown type(s)",
            cli.save.display(),
            save.image().len(),
            save.names().len(),
            save.groups().len(),
            save.unknown_types().len(),
        );
        for name in save.unknown_types() {
            eprintln!("  unknown type: {name}");
        }
    }

    Ok(())
}
