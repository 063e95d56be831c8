use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sha2::{Digest, Sha256};
use thumbsmith_contracts::images::{ImageCategory, InlineImage};
use thumbsmith_engine::{
    ImageGeneration, ImageInputs, IntakeReport, LocalFile, Studio, StudioConfig,
};

const SAFE_PROMPT_MAX_CHARS: usize = 30;
const LIST_PROMPT_MAX_CHARS: usize = 72;

#[derive(Debug, Parser)]
#[command(
    name = "thumbsmith",
    version,
    about = "YouTube thumbnail prompt and image generator"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true)]
    text_model: Option<String>,
    #[arg(long, global = true)]
    image_model: Option<String>,
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Backend request timeout in seconds, clamped to 15..=300.
    #[arg(long, global = true)]
    timeout: Option<f64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a thumbnail prompt from a topic and optional images.
    Prompt(PromptArgs),
    /// Generate a 16:9 thumbnail image.
    Image(ImageArgs),
    /// List, delete or export saved results.
    #[command(subcommand)]
    History(HistoryCommand),
}

#[derive(Debug, Args)]
struct PromptArgs {
    #[arg(long, default_value = "")]
    topic: String,
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
    #[arg(long = "element")]
    elements: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct ImageArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
    #[arg(long = "element")]
    elements: Vec<PathBuf>,
    /// File or directory to write the image to. Defaults to the current directory.
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    Prompts,
    Images,
    DeletePrompt(IdArgs),
    DeleteImage(IdArgs),
    ExportImage(ExportArgs),
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: u64,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long)]
    id: u64,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("thumbsmith error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    run_cli(Cli::parse())
}

fn run_cli(cli: Cli) -> Result<i32> {
    let config = studio_config(&cli.global);
    let studio = Studio::open(&config)?;
    for note in studio.fallback_notes() {
        eprintln!("note: {note}");
    }
    match cli.command {
        Command::Prompt(args) => run_prompt(&studio, args),
        Command::Image(args) => run_image(&studio, args),
        Command::History(command) => run_history(&studio, command),
    }
}

fn studio_config(global: &GlobalArgs) -> StudioConfig {
    let mut config = StudioConfig::from_env();
    if let Some(data_dir) = global.data_dir.as_ref() {
        config.data_dir = data_dir.clone();
    }
    config.text_model = global.text_model.clone();
    config.image_model = global.image_model.clone();
    match global.timeout {
        Some(seconds) => config.with_timeout(seconds),
        None => config,
    }
}

fn collect_inputs(studio: &Studio, references: &[PathBuf], elements: &[PathBuf]) -> ImageInputs {
    let mut inputs = ImageInputs::new();
    for (category, paths) in [
        (ImageCategory::StyleReference, references),
        (ImageCategory::CustomElement, elements),
    ] {
        if paths.is_empty() {
            continue;
        }
        let files = paths.iter().map(LocalFile::new).collect::<Vec<_>>();
        let report = studio.add_images(&mut inputs, category, &files);
        print_intake_report(category, &report);
    }
    inputs
}

fn print_intake_report(category: ImageCategory, report: &IntakeReport) {
    for warning in &report.warnings {
        eprintln!("warning ({}): {warning}", category.label());
    }
}

fn run_prompt(studio: &Studio, args: PromptArgs) -> Result<i32> {
    let inputs = collect_inputs(studio, &args.references, &args.elements);
    let record = studio.prompt_tool().generate(&args.topic, &inputs)?;
    println!("{}", record.prompt);
    eprintln!("saved prompt #{}", record.id);
    Ok(0)
}

fn run_image(studio: &Studio, args: ImageArgs) -> Result<i32> {
    let inputs = collect_inputs(studio, &args.references, &args.elements);
    match studio.image_tool().generate(&args.prompt, &inputs)? {
        ImageGeneration::Answer(answer) => println!("{answer}"),
        ImageGeneration::Image(record) => {
            let path = resolve_output_path(args.save.as_deref(), &record.prompt, &record.image_src);
            write_image(&record.image_src, &path)?;
            println!("{}", path.display());
            eprintln!("saved image #{}", record.id);
        }
    }
    Ok(0)
}

fn run_history(studio: &Studio, command: HistoryCommand) -> Result<i32> {
    match command {
        HistoryCommand::Prompts => {
            for record in studio.prompt_tool().history() {
                println!(
                    "{}\t{}\t{}",
                    record.id,
                    record.timestamp,
                    one_line(&record.prompt, LIST_PROMPT_MAX_CHARS)
                );
            }
        }
        HistoryCommand::Images => {
            for record in studio.image_tool().history() {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id,
                    record.timestamp,
                    record.image_src.mime_type(),
                    one_line(&record.prompt, LIST_PROMPT_MAX_CHARS)
                );
            }
        }
        HistoryCommand::DeletePrompt(args) => {
            report_deleted(args.id, studio.prompt_tool().delete(args.id)?.is_some());
        }
        HistoryCommand::DeleteImage(args) => {
            report_deleted(args.id, studio.image_tool().delete(args.id)?.is_some());
        }
        HistoryCommand::ExportImage(args) => {
            let Some(record) = studio.image_tool().get(args.id) else {
                bail!("no image with id {}", args.id);
            };
            let path = resolve_output_path(args.out.as_deref(), &record.prompt, &record.image_src);
            write_image(&record.image_src, &path)?;
            println!("{}", path.display());
        }
    }
    Ok(0)
}

fn report_deleted(id: u64, removed: bool) {
    if removed {
        println!("Deleted #{id}");
    } else {
        println!("Nothing to delete for #{id}");
    }
}

/// An existing directory (or no path at all) gets the default file name.
fn resolve_output_path(target: Option<&Path>, prompt: &str, image: &InlineImage) -> PathBuf {
    let file_name = thumbnail_file_name(prompt, image);
    match target {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(file_name),
    }
}

fn write_image(image: &InlineImage, path: &Path) -> Result<()> {
    let bytes = image.decode()?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn thumbnail_file_name(prompt: &str, image: &InlineImage) -> String {
    let safe = prompt
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .take(SAFE_PROMPT_MAX_CHARS)
        .collect::<String>();
    let safe = if safe.is_empty() {
        "generated".to_string()
    } else {
        safe
    };
    let digest = Sha256::digest(image.base64_payload().as_bytes());
    format!(
        "thumbnail_{safe}_{}.{}",
        hex::encode(&digest[..4]),
        image.extension()
    )
}

fn one_line(value: &str, max_chars: usize) -> String {
    let flat = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    flat.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use clap::Parser;
    use thumbsmith_contracts::images::InlineImage;

    use super::{one_line, resolve_output_path, run_cli, thumbnail_file_name, Cli, Command};

    fn offline_cli(data_dir: &std::path::Path, rest: &[&str]) -> Result<Cli> {
        let data_dir = data_dir.to_string_lossy().to_string();
        let mut args = vec![
            "thumbsmith",
            "--data-dir",
            data_dir.as_str(),
            "--text-model",
            "dryrun-text",
            "--image-model",
            "dryrun-image",
        ];
        args.extend_from_slice(rest);
        Ok(Cli::try_parse_from(args)?)
    }

    #[test]
    fn file_name_uses_safe_prompt_and_hash() -> Result<()> {
        let image = InlineImage::from_base64("image/jpeg", "AAEC")?;
        let name = thumbnail_file_name("Epic space battle! (4K)", &image);
        assert!(name.starts_with("thumbnail_Epic_space_battle___4K__"));
        assert!(name.ends_with(".jpg"));

        let long = thumbnail_file_name(&"a".repeat(80), &image);
        assert!(long.starts_with(&format!("thumbnail_{}_", "a".repeat(30))));

        let empty = thumbnail_file_name("", &image);
        assert!(empty.starts_with("thumbnail_generated_"));
        assert_eq!(empty.len(), "thumbnail_generated_".len() + 8 + ".jpg".len());
        Ok(())
    }

    #[test]
    fn existing_directory_gets_default_name() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let image = InlineImage::from_base64("image/png", "AAEC")?;
        let in_dir = resolve_output_path(Some(temp.path()), "cats", &image);
        assert_eq!(in_dir.parent(), Some(temp.path()));

        let explicit = temp.path().join("cover.png");
        assert_eq!(resolve_output_path(Some(explicit.as_path()), "cats", &image), explicit);
        Ok(())
    }

    #[test]
    fn parses_repeated_image_flags() -> Result<()> {
        let cli = Cli::try_parse_from([
            "thumbsmith",
            "prompt",
            "--topic",
            "cats",
            "--reference",
            "a.png",
            "--reference",
            "b.png",
            "--element",
            "face.jpg",
            "--timeout",
            "30",
        ])?;
        assert_eq!(cli.global.timeout, Some(30.0));
        let Command::Prompt(args) = cli.command else {
            panic!("expected prompt command");
        };
        assert_eq!(args.topic, "cats");
        assert_eq!(args.references.len(), 2);
        assert_eq!(args.elements.len(), 1);
        Ok(())
    }

    #[test]
    fn offline_image_run_saves_and_exports() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let data_dir = temp.path().join("data");
        let out_dir = temp.path().join("out");
        fs::create_dir_all(&out_dir)?;
        let out = out_dir.to_string_lossy().to_string();

        let code = run_cli(offline_cli(
            &data_dir,
            &["image", "--prompt", "neon city", "--save", out.as_str()],
        )?)?;
        assert_eq!(code, 0);
        let saved = fs::read_dir(&out_dir)?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(saved.len(), 1);
        let name = saved[0].file_name().to_string_lossy().to_string();
        assert!(name.starts_with("thumbnail_neon_city_"));
        assert!(name.ends_with(".png"));

        let history = fs::read_to_string(data_dir.join("imageHistory.json"))?;
        let records: serde_json::Value = serde_json::from_str(&history)?;
        let id = records[0]["id"].as_u64().unwrap().to_string();
        let export = temp.path().join("export.png");
        let export_arg = export.to_string_lossy().to_string();
        run_cli(offline_cli(
            &data_dir,
            &["history", "export-image", "--id", id.as_str(), "--out", export_arg.as_str()],
        )?)?;
        assert_eq!(fs::read(&export)?, fs::read(saved[0].path())?);

        run_cli(offline_cli(&data_dir, &["history", "delete-image", "--id", id.as_str()])?)?;
        let after: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(data_dir.join("imageHistory.json"))?)?;
        assert_eq!(after, serde_json::json!([]));
        Ok(())
    }

    #[test]
    fn list_lines_are_flattened_and_cut() {
        assert_eq!(one_line("a\n  b", 10), "a b");
        assert_eq!(one_line("abcdef", 3), "abc…");
    }
}
