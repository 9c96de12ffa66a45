use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};

use pagecast::render::{
    AsyncRenderer, ColorMode, ImageBuffer, ImageFileFormat, PageId, PageProvider, PdfDocument,
    PixelFormat, RenderOptions, RenderQuality, Renderer,
};
use pagecast::settings::{self, Settings};

#[derive(Parser, Debug)]
#[command(name = "pagecast", version)]
struct Cli {
    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log debug output.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Settings file to use instead of the user config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print page count and page sizes.
    Info(InfoArgs),
    /// Render one page to an image file.
    Page(PageArgs),
    /// Render one page as a grid of tile images.
    Tiles(TilesArgs),
    /// Write a thumbnail of every page.
    Thumbnails(ThumbnailArgs),
    /// Render many pages on the background scheduler.
    Batch(BatchArgs),
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Input document.
    doc: PathBuf,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Resolution in dots per inch. Overrides --quality.
    #[arg(long)]
    dpi: Option<f32>,

    /// Resolution preset.
    #[arg(long, value_enum)]
    quality: Option<QualityChoice>,

    /// Colour processing.
    #[arg(long, value_enum)]
    color: Option<ColorChoiceArg>,

    /// Keep an alpha channel instead of painting the background.
    #[arg(long)]
    transparent: bool,

    /// JPEG quality (1-100) for .jpg outputs.
    #[arg(long, default_value_t = ImageFileFormat::DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,
}

#[derive(Parser, Debug)]
struct PageArgs {
    /// Input document.
    doc: PathBuf,

    /// Page index (0-based).
    #[arg(long, default_value_t = 0)]
    page: usize,

    /// Output image; format follows the extension.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Parser, Debug)]
struct TilesArgs {
    /// Input document.
    doc: PathBuf,

    /// Page index (0-based).
    #[arg(long, default_value_t = 0)]
    page: usize,

    /// Output directory.
    #[arg(long)]
    out_dir: PathBuf,

    /// Tile width in points; defaults to the configured tile size.
    #[arg(long)]
    tile_width: Option<u32>,

    /// Tile height in points; defaults to the configured tile size.
    #[arg(long)]
    tile_height: Option<u32>,

    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Parser, Debug)]
struct ThumbnailArgs {
    /// Input document.
    doc: PathBuf,

    /// Output directory.
    #[arg(long)]
    out_dir: PathBuf,

    #[arg(long)]
    max_width: Option<u32>,

    #[arg(long)]
    max_height: Option<u32>,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// Input document.
    doc: PathBuf,

    /// Output directory.
    #[arg(long)]
    out_dir: PathBuf,

    /// Pages to render (0-based, comma separated); all pages by default.
    #[arg(long, value_delimiter = ',')]
    pages: Vec<usize>,

    /// Worker threads; defaults to the configured count.
    #[arg(long)]
    workers: Option<usize>,

    /// Give up after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum QualityChoice {
    Draft,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl From<QualityChoice> for RenderQuality {
    fn from(choice: QualityChoice) -> Self {
        match choice {
            QualityChoice::Draft => Self::Draft,
            QualityChoice::Low => Self::Low,
            QualityChoice::Medium => Self::Medium,
            QualityChoice::High => Self::High,
            QualityChoice::VeryHigh => Self::VeryHigh,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ColorChoiceArg {
    Rgb,
    Cmyk,
    Grayscale,
    Monochrome,
}

impl From<ColorChoiceArg> for ColorMode {
    fn from(choice: ColorChoiceArg) -> Self {
        match choice {
            ColorChoiceArg::Rgb => Self::Rgb,
            ColorChoiceArg::Cmyk => Self::Cmyk,
            ColorChoiceArg::Grayscale => Self::Grayscale,
            ColorChoiceArg::Monochrome => Self::Monochrome,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref(), cli.verbose)?;

    let settings = match &cli.config {
        Some(path) => settings::load_settings_from_path(path)?,
        None => settings::load_settings(),
    };

    match cli.cmd {
        Command::Info(args) => cmd_info(&args),
        Command::Page(args) => cmd_page(&args, &settings),
        Command::Tiles(args) => cmd_tiles(&args, &settings),
        Command::Thumbnails(args) => cmd_thumbnails(&args, &settings),
        Command::Batch(args) => cmd_batch(&args, &settings),
    }
}

fn init_logging(log_file: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    match log_file {
        Some(path) => WriteLogger::init(
            level,
            Config::default(),
            File::create(path).with_context(|| format!("create log file '{}'", path.display()))?,
        )?,
        None => TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)?,
    }
    Ok(())
}

fn open_document(path: &Path) -> anyhow::Result<Arc<PdfDocument>> {
    let doc = PdfDocument::open(path).with_context(|| format!("open document '{}'", path.display()))?;
    Ok(Arc::new(doc))
}

fn sync_renderer(doc: &Arc<PdfDocument>, settings: &Settings) -> anyhow::Result<Renderer> {
    let provider: Arc<dyn PageProvider> = doc.clone();
    let renderer = Renderer::from_factory(provider, &doc.factory(), Arc::new(settings.render_cache()))?;
    Ok(renderer)
}

fn render_options(args: &RenderArgs, settings: &Settings) -> anyhow::Result<RenderOptions> {
    let mut builder = settings.render_options()?.to_builder();
    if let Some(quality) = args.quality {
        builder = builder.quality(quality.into());
    }
    if let Some(dpi) = args.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(color) = args.color {
        builder = builder.color_mode(color.into());
    }
    if args.transparent {
        builder = builder
            .render_transparent(true)
            .pixel_format(PixelFormat::Rgba32);
    }
    Ok(builder.build()?)
}

fn output_format(path: &Path, jpeg_quality: u8) -> anyhow::Result<ImageFileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .with_context(|| format!("output '{}' has no extension", path.display()))?;
    match ImageFileFormat::from_extension(ext) {
        Some(ImageFileFormat::Jpeg(_)) => Ok(ImageFileFormat::Jpeg(jpeg_quality)),
        Some(format) => Ok(format),
        None => anyhow::bail!("unsupported output format '{ext}'"),
    }
}

fn write_image(image: &ImageBuffer, path: &Path, format: ImageFileFormat) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image
        .save(path, format)
        .with_context(|| format!("write image '{}'", path.display()))?;
    eprintln!("wrote {}", path.display());
    Ok(())
}

fn cmd_info(args: &InfoArgs) -> anyhow::Result<()> {
    let doc = open_document(&args.doc)?;
    println!("{}: {} pages", args.doc.display(), doc.page_count());
    for page in doc.page_ids() {
        if let Some(info) = doc.page_info(page) {
            println!("  {page}: {:.1} x {:.1} pt", info.width, info.height);
        }
    }
    Ok(())
}

fn cmd_page(args: &PageArgs, settings: &Settings) -> anyhow::Result<()> {
    let doc = open_document(&args.doc)?;
    let mut renderer = sync_renderer(&doc, settings)?;
    let options = render_options(&args.render, settings)?;
    let format = output_format(&args.out, args.render.jpeg_quality)?;

    let image = renderer.render(PageId(args.page), &options)?;
    write_image(&image, &args.out, format)
}

fn cmd_tiles(args: &TilesArgs, settings: &Settings) -> anyhow::Result<()> {
    let doc = open_document(&args.doc)?;
    let mut renderer = sync_renderer(&doc, settings)?;
    let options = render_options(&args.render, settings)?;
    let page = PageId(args.page);

    let tiles = renderer.render_tiles(
        page,
        args.tile_width.unwrap_or(settings.tile_width),
        args.tile_height.unwrap_or(settings.tile_height),
        &options,
    )?;
    info!("Rendered {} tiles of {page}", tiles.len());

    for (tile, result) in tiles {
        let image = result.with_context(|| format!("tile {},{}", tile.tile_x, tile.tile_y))?;
        let path = args
            .out_dir
            .join(format!("page{}-tile{}-{}.png", args.page, tile.tile_y, tile.tile_x));
        write_image(&image, &path, ImageFileFormat::Png)?;
    }
    Ok(())
}

fn cmd_thumbnails(args: &ThumbnailArgs, settings: &Settings) -> anyhow::Result<()> {
    let doc = open_document(&args.doc)?;
    let mut renderer = sync_renderer(&doc, settings)?;
    let mut progress = |current: usize, total: usize, message: &str| {
        info!("[{}/{total}] {message}", current + 1);
        true
    };

    let thumbnails = renderer.render_all_thumbnails(
        args.max_width.unwrap_or(settings.thumbnail_max_width),
        args.max_height.unwrap_or(settings.thumbnail_max_height),
        Some(&mut progress),
    );

    let mut failed = 0;
    for (index, result) in thumbnails.into_iter().enumerate() {
        match result {
            Ok(image) => {
                let path = args.out_dir.join(format!("thumb{index}.png"));
                write_image(&image, &path, ImageFileFormat::Png)?;
            }
            Err(e) => {
                eprintln!("page {index}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} thumbnails failed");
    }
    Ok(())
}

fn cmd_batch(args: &BatchArgs, settings: &Settings) -> anyhow::Result<()> {
    let doc = open_document(&args.doc)?;
    let options = render_options(&args.render, settings)?;
    let mut config = settings.scheduler_config();
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let provider: Arc<dyn PageProvider> = doc.clone();
    let scheduler = AsyncRenderer::with_config(
        provider,
        doc.factory(),
        Arc::new(settings.render_cache()),
        config,
    )
    .context("start render workers")?;

    let jobs = if args.pages.is_empty() {
        scheduler.queue_all(&options)
    } else {
        let pages: Vec<PageId> = args.pages.iter().copied().map(PageId).collect();
        scheduler.queue_batch(&pages, &options)
    };
    info!(
        "Queued {} jobs on {} workers",
        jobs.len(),
        scheduler.worker_count()
    );

    if !scheduler.wait_all(args.timeout.map(Duration::from_secs)) {
        let unfinished = scheduler.pending_count() + scheduler.active_count();
        scheduler.cancel_all();
        anyhow::bail!("timed out with {unfinished} jobs unfinished");
    }

    let mut failed = 0;
    for job in &jobs {
        match job.result() {
            Ok(image) => {
                let path = args.out_dir.join(format!("page{}.png", job.page().0));
                write_image(&image, &path, ImageFileFormat::Png)?;
            }
            Err(e) => {
                eprintln!("{}: {e}", job.page());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} pages failed", jobs.len());
    }
    Ok(())
}
