use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Error, Result, bail};
use dvi_svg::{FontDataHelper, RenderOptions, dvi2html, dvi2text};
use log::info;

const USAGE: &str =
    "usage: dvi-svg <input.dvi> [--fonts <bundle.tar.gz|dir>] [--text] [--no-merge] [-o <output>]";

enum Invocation {
    Convert(Args),
    Help,
}

struct Args {
    input: PathBuf,
    fonts: Option<PathBuf>,
    output: Option<PathBuf>,
    text: bool,
    merge_text: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Invocation> {
    let mut input = None;
    let mut fonts = None;
    let mut output = None;
    let mut text = false;
    let mut merge_text = true;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fonts" => fonts = Some(args.next().context("--fonts needs a path")?.into()),
            "-o" | "--output" => output = Some(args.next().context("-o needs a path")?.into()),
            "--text" => text = true,
            "--no-merge" => merge_text = false,
            "-h" | "--help" => return Ok(Invocation::Help),
            _ if arg.starts_with('-') => bail!("unknown option {arg}\n{USAGE}"),
            _ if input.is_none() => input = Some(PathBuf::from(arg)),
            _ => bail!("more than one input file given\n{USAGE}"),
        }
    }

    Ok(Invocation::Convert(Args {
        input: input.ok_or_else(|| Error::msg(USAGE))?,
        fonts,
        output,
        text,
        merge_text,
    }))
}

/// Fonts from `path` if given, backed by the built-in Computer Modern metrics.
fn load_fonts(path: Option<&Path>) -> Result<FontDataHelper> {
    let Some(path) = path else {
        return Ok(FontDataHelper::builtin()?);
    };
    let fonts = if path.is_dir() {
        FontDataHelper::from_dir(path)?
    } else {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font bundle {}", path.display()))?;
        FontDataHelper::from_tar_gz(&bytes)?
    };
    Ok(fonts.with_builtin()?)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = match parse_args(std::env::args().skip(1))? {
        Invocation::Convert(args) => args,
        Invocation::Help => {
            println!("{USAGE}");
            return Ok(());
        }
    };

    let fonts = load_fonts(args.fonts.as_deref())?;
    if fonts.is_empty() {
        info!("no font files given, using built-in metrics only");
    }

    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let input = BufReader::new(input);
    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let output = BufWriter::new(output);

    let options = RenderOptions {
        merge_text: args.merge_text,
        ..RenderOptions::default()
    };
    let mut output = if args.text {
        dvi2text(input, output, &fonts, &options)
    } else {
        dvi2html(input, output, &fonts, &options)
    }
    .with_context(|| format!("failed to convert {}", args.input.display()))?;
    output.flush()?;

    Ok(())
}
