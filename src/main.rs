use classload::jvm::Error;
use classload::loader::{ClassLoader, Phase, Settings};

use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::{fs, io};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use walkdir::WalkDir;

fn main() -> io::Result<()> {
    env_logger::init();

    let matches = Command::new("JVM class loader")
        .version(crate_version!())
        .about("Loads, validates, and verifies JVM class files")
        .arg(
            Arg::new("phase")
                .long("phase")
                .value_name("PHASE")
                .value_parser(["load", "link"])
                .default_value("link")
                .help("How far to take each input class"),
        )
        .arg(
            Arg::new("classpath")
                .long("classpath")
                .value_name("DIRECTORY")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Directory of class files to load before the inputs (repeatable)"),
        )
        .arg(
            Arg::new("no verify")
                .long("no-verify")
                .action(ArgAction::SetTrue)
                .help("Skip bytecode verification when linking"),
        )
        .arg(
            Arg::new("enable preview")
                .long("enable-preview")
                .action(ArgAction::SetTrue)
                .help("Accept preview class files of the newest major version"),
        )
        .arg(
            Arg::new("max major")
                .long("max-major")
                .value_name("VERSION")
                .value_parser(value_parser!(u16))
                .help("Newest class file major version to accept"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class files to define")
                .required(true)
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let mut settings = Settings::new();
    settings.verify = !matches.get_flag("no verify");
    settings.enable_preview = matches.get_flag("enable preview");
    if let Some(max_major) = matches.get_one::<u16>("max major") {
        settings.max_major_version = *max_major;
    }
    let phase: Phase = match matches.get_one::<String>("phase").map(|phase| phase.parse()) {
        Some(Ok(phase)) => phase,
        Some(Err(msg)) => {
            eprintln!("{}", msg);
            exit(2)
        }
        None => Phase::Link,
    };
    log::debug!("Running with {:?}", settings);
    let loader = ClassLoader::new(settings);

    // Classes on the classpath only need to be loaded to take part in the hierarchy
    for directory in matches.get_many::<PathBuf>("classpath").into_iter().flatten() {
        for class_file in find_class_files(directory) {
            let outcome = fs::read(&class_file)
                .map_err(Error::IoError)
                .and_then(|bytes| loader.define_class(&bytes, Phase::Load));
            match outcome {
                Ok(class) => log::info!("Loaded {} from {:?}", class.name(), class_file),
                Err(err) => log::warn!("Skipping classpath entry {:?}: {}", class_file, err),
            }
        }
    }
    log::info!("Classpath supplied {} classes", loader.len());

    let mut count_fail = 0;
    let stdout = StandardStream::stdout(ColorChoice::Auto);
    for input in matches.get_many::<PathBuf>("INPUT").into_iter().flatten() {
        let outcome = fs::read(input)
            .map_err(Error::IoError)
            .and_then(|bytes| loader.define_class(&bytes, phase));

        let (color, summary, message) = match outcome {
            Ok(class) => (Color::Green, b"OK".as_ref(), class.name().to_string()),
            Err(err) => {
                count_fail += 1;
                (Color::Red, b"FAILED".as_ref(), err.to_string())
            }
        };

        // Print out the result
        let mut s = stdout.lock();
        s.write_all(b" - ")?;
        s.set_color(ColorSpec::new().set_bold(true))?;
        s.write_all(input.to_string_lossy().as_bytes())?;
        s.set_color(ColorSpec::new().set_dimmed(true))?;
        s.write_all(b" [")?;
        s.set_color(ColorSpec::new().set_fg(Some(color)))?;
        s.write_all(summary)?;
        s.set_color(ColorSpec::new().set_dimmed(true))?;
        s.write_all(b"] ")?;
        s.reset()?;
        s.write_all(message.as_bytes())?;
        s.write_all(b"\n")?;
    }

    // Exit code
    exit(if count_fail > 0 { 1 } else { 0 })
}

/// All `.class` files under a directory
fn find_class_files(directory: &Path) -> Vec<PathBuf> {
    WalkDir::new(directory)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|e| e.is_file() && e.extension().map_or(false, |ex| ex == "class"))
        .collect()
}
