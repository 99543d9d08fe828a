use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bria_contracts::events::{EventKind, EventWriter};
use bria_contracts::normalize::normalize_response;
use bria_engine::{
    remove_background, BriaClient, BriaConfig, GenerativeFillOptions, HdGenerationOptions,
    ImageSource, LifestyleShotOptions, LocalDiffusion, LocalOptions, PackshotOptions,
};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(name = "bria", version, about = "Bria image generation and editing client")]
struct Cli {
    /// API key; falls back to BRIA_API_KEY / BRIA_API_TOKEN.
    #[arg(long, global = true, hide_env_values = true, env = "BRIA_API_KEY")]
    api_key: Option<String>,
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Append request events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Write one receipt per call into this directory.
    #[arg(long, global = true)]
    out: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    GenFill(GenFillArgs),
    EraseForeground(EraseArgs),
    Lifestyle(LifestyleArgs),
    Packshot(PackshotArgs),
    Enhance(EnhanceArgs),
    RemoveBg(RemoveBgArgs),
    LocalGenerate(LocalGenerateArgs),
    LocalInpaint(LocalInpaintArgs),
    Normalize(NormalizeArgs),
    Capabilities,
}

#[derive(Debug, Args)]
struct ImageInputArgs {
    #[arg(long, conflicts_with = "image_url", required_unless_present = "image_url")]
    image: Option<PathBuf>,
    #[arg(long)]
    image_url: Option<String>,
}

impl ImageInputArgs {
    fn source(&self) -> Result<ImageSource> {
        let bytes = self.image.as_deref().map(read_bytes).transpose()?;
        Ok(ImageSource::from_parts(bytes, self.image_url.clone())?)
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value_t = 1)]
    num_results: u32,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long)]
    model_version: Option<String>,
    /// Run the prompt through the enhancer first.
    #[arg(long)]
    enhance: bool,
    /// Extra body field, `key=value`; the value is parsed as JSON when possible.
    #[arg(long = "param")]
    params: Vec<String>,
}

#[derive(Debug, Args)]
struct GenFillArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    mask: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value_t = 1)]
    num_results: u32,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long)]
    content_moderation: bool,
    #[arg(long = "param")]
    params: Vec<String>,
}

#[derive(Debug, Args)]
struct EraseArgs {
    #[command(flatten)]
    input: ImageInputArgs,
    #[arg(long)]
    content_moderation: bool,
}

#[derive(Debug, Args)]
struct LifestyleArgs {
    #[command(flatten)]
    input: ImageInputArgs,
    #[arg(long)]
    scene: String,
    #[arg(long, default_value = "original")]
    placement_type: String,
    #[arg(long, default_value_t = 1)]
    num_results: u32,
    #[arg(long)]
    content_moderation: bool,
    #[arg(long = "param")]
    params: Vec<String>,
}

#[derive(Debug, Args)]
struct PackshotArgs {
    #[command(flatten)]
    input: ImageInputArgs,
    #[arg(long, default_value = "#FFFFFF")]
    background_color: String,
    #[arg(long)]
    sku: Option<String>,
    #[arg(long)]
    force_rmbg: bool,
    #[arg(long)]
    content_moderation: bool,
    #[arg(long = "param")]
    params: Vec<String>,
}

#[derive(Debug, Args)]
struct EnhanceArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long = "param")]
    params: Vec<String>,
}

#[derive(Debug, Args)]
struct RemoveBgArgs {
    #[arg(long)]
    image: PathBuf,
}

#[derive(Debug, Args)]
struct LocalArgs {
    #[arg(long, default_value_t = 1)]
    num_images: u32,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value_t = 25)]
    steps: u32,
    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f64,
}

impl LocalArgs {
    fn options(&self) -> LocalOptions {
        LocalOptions {
            num_images: self.num_images,
            seed: self.seed,
            model_name: self.model.clone(),
            steps: self.steps,
            guidance_scale: self.guidance_scale,
        }
    }
}

#[derive(Debug, Args)]
struct LocalGenerateArgs {
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    local: LocalArgs,
}

#[derive(Debug, Args)]
struct LocalInpaintArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    mask: PathBuf,
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    local: LocalArgs,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    /// JSON response body to normalize; `-` reads stdin.
    input: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("bria error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = BriaConfig::from_env()
        .with_api_key(cli.api_key.clone())
        .with_api_base(cli.api_base.clone());
    let events = cli.events.as_ref().map(|path| {
        EventWriter::new(path, uuid::Uuid::new_v4().to_string())
    });
    tracing::debug!(?config, "configuration resolved");

    let output = match cli.command {
        Command::Generate(args) => {
            let client = build_client(&config, events.as_ref(), cli.out.as_deref())?;
            let extra = parse_params(&args.params)?;
            let prompt = if args.enhance {
                client.enhance_prompt(&args.prompt, &Map::new())?
            } else {
                args.prompt.clone()
            };
            let mut options = HdGenerationOptions {
                num_results: args.num_results,
                aspect_ratio: args.aspect_ratio,
                seed: args.seed,
                negative_prompt: args.negative_prompt,
                extra,
                ..HdGenerationOptions::default()
            };
            if let Some(version) = args.model_version {
                options.model_version = version;
            }
            client.generate_hd_image(&prompt, &options)?.into_value()
        }
        Command::GenFill(args) => {
            let client = build_client(&config, events.as_ref(), cli.out.as_deref())?;
            let options = GenerativeFillOptions {
                num_results: args.num_results,
                seed: args.seed,
                negative_prompt: args.negative_prompt,
                content_moderation: args.content_moderation,
                extra: parse_params(&args.params)?,
                ..GenerativeFillOptions::default()
            };
            let image = read_bytes(&args.image)?;
            let mask = read_bytes(&args.mask)?;
            client
                .generative_fill(&image, &mask, &args.prompt, &options)?
                .into_value()
        }
        Command::EraseForeground(args) => {
            let client = build_client(&config, events.as_ref(), cli.out.as_deref())?;
            client
                .erase_foreground(&args.input.source()?, args.content_moderation)?
                .into_value()
        }
        Command::Lifestyle(args) => {
            let client = build_client(&config, events.as_ref(), cli.out.as_deref())?;
            let options = LifestyleShotOptions {
                placement_type: args.placement_type,
                num_results: args.num_results,
                content_moderation: args.content_moderation,
                extra: parse_params(&args.params)?,
                ..LifestyleShotOptions::default()
            };
            client
                .lifestyle_shot_by_text(&args.input.source()?, &args.scene, &options)?
                .into_value()
        }
        Command::Packshot(args) => {
            let client = build_client(&config, events.as_ref(), cli.out.as_deref())?;
            let options = PackshotOptions {
                background_color: args.background_color,
                sku: args.sku,
                force_rmbg: args.force_rmbg,
                content_moderation: args.content_moderation,
                extra: parse_params(&args.params)?,
            };
            client
                .create_packshot(&args.input.source()?, &options)?
                .into_value()
        }
        Command::Enhance(args) => {
            let client = build_client(&config, events.as_ref(), cli.out.as_deref())?;
            let enhanced = client.enhance_prompt(&args.prompt, &parse_params(&args.params)?)?;
            json!({ "prompt": enhanced, "original": args.prompt })
        }
        Command::RemoveBg(args) => remove_background(&read_bytes(&args.image)?)?.to_value(),
        Command::LocalGenerate(args) => {
            let local = detect_local(&config, events.as_ref());
            local
                .generate_hd_local(&args.prompt, &args.local.options())?
                .to_value()
        }
        Command::LocalInpaint(args) => {
            let local = detect_local(&config, events.as_ref());
            let image = read_bytes(&args.image)?;
            let mask = read_bytes(&args.mask)?;
            local
                .inpaint_local(&image, &mask, &args.prompt, &args.local.options())?
                .to_value()
        }
        Command::Normalize(args) => {
            let raw = read_json_input(&args.input)?;
            normalize_response(&raw).to_value()
        }
        Command::Capabilities => {
            let local = detect_local(&config, events.as_ref());
            let client = BriaClient::new(config.clone())?;
            let endpoints = client
                .catalogue()
                .list()
                .map(|endpoint| {
                    json!({
                        "name": endpoint.name,
                        "path": endpoint.path,
                        "summary": endpoint.summary,
                    })
                })
                .collect::<Vec<Value>>();
            json!({
                "api_key_configured": config.api_key.is_some(),
                "api_base": config.api_base,
                "endpoints": endpoints,
                "local": local.capability().to_value(),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn build_client(
    config: &BriaConfig,
    events: Option<&EventWriter>,
    out: Option<&Path>,
) -> Result<BriaClient> {
    let mut client = BriaClient::new(config.clone())?;
    if let Some(events) = events {
        client = client.with_events(events.clone());
    }
    if let Some(out) = out {
        client = client.with_receipts_dir(out);
    }
    Ok(client)
}

fn detect_local(config: &BriaConfig, events: Option<&EventWriter>) -> LocalDiffusion {
    let local = LocalDiffusion::from_config(config);
    if let Some(events) = events {
        let payload = local
            .capability()
            .to_value()
            .as_object()
            .cloned()
            .unwrap_or_default();
        if let Err(err) = events.record(EventKind::LocalCapability, payload) {
            tracing::warn!(error = %err, "event journal write failed");
        }
    }
    local
}

fn parse_params(raw: &[String]) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("--param expects key=value, got '{item}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("--param key must not be empty ('{item}')");
        }
        let value = serde_json::from_str::<Value>(value.trim())
            .unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed reading {}", path.display()))
}

fn read_json_input(path: &Path) -> Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed reading stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?
    };
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&raw).context("input is not valid JSON")
}
