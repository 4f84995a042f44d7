use std::path::PathBuf;
use clap::{Parser, Subcommand};
use log::{debug, warn};
use txt2img::{GenerationEvent, GenerationRequest, Txt2ImgBackend, Txt2ImgConfig};

#[derive(Parser, Debug)]
#[command(name = "txt2img", version, about = "Generate images from text prompts")]
struct Cli
{   /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>

  , /// Directory holding the persisted gallery (default `.txt2img`)
    #[arg(long)]
    gallery_dir: Option<PathBuf>

  , #[command(subcommand)]
    command: Command
}

#[derive(Subcommand, Debug)]
enum Command
{   /// Submit a prompt and wait for the images
    Generate
    {   #[arg(short, long)]
        prompt: String
      , #[arg(long)]
        negative_prompt: Option<String>
      , /// e.g. 512x512, 768x768, 1024x1024
        #[arg(long)]
        dimensions: Option<String>
      , #[arg(long)]
        steps: Option<u32>
      , #[arg(long)]
        guidance: Option<f32>
      , /// DPMSolverMultistep, K_EULER, K_EULER_ANCESTRAL, PNDM
        #[arg(long)]
        scheduler: Option<String>
      , #[arg(long)]
        outputs: Option<u32>
    }
  , /// List gallery images, newest first
    Gallery
    {   #[arg(long, default_value_t = 1)]
        page: usize
    }
  , /// Show one gallery image
    Show
    {   id: String
    }
  , /// Remove every gallery image
    Reset
}

fn load_config(cli: &Cli)
  -> Result<Txt2ImgConfig, txt2img::Error>
{   let mut config = match &cli.config
    {   Some(path) => Txt2ImgConfig::from_file(path)?
      , None => Txt2ImgConfig::default()
    };
    if let Some(dir) = &cli.gallery_dir
    {   config.gallery.path = Some(dir.clone());
    }
    // every subcommand reads or writes the same gallery across runs
    Ok(config.with_persistent_gallery())
}

fn init_logging(config: &Txt2ImgConfig)
{   let default_filter = if config.provider.verbose.unwrap_or(false)
    {   "debug"
    } else
    {   "info"
    };
    env_logger::Builder::from_env(
      env_logger::Env::default().default_filter_or(default_filter)
    ).init();
}

/// Drive one generation to its end, canceling on Ctrl-C
async fn generate(
  backend: &Txt2ImgBackend
, request: GenerationRequest
) -> Result<(), txt2img::Error>
{   let mut events = backend.generate(request).await?;
    let mut job_id: Option<String> = None;

    loop
    {   let event = tokio::select!
        { event = events.recv() => event
        , _ = tokio::signal::ctrl_c() => {
            match &job_id
            {   Some(id) => {
                  warn!("Interrupted, canceling {}", id);
                  let mut reply = backend.cancel(id.clone()).await?;
                  if let Some(result) = reply.recv().await
                  {   result?;
                  }
                }
              , None => warn!("Interrupted before submission finished")
            }
            return Err(txt2img::Error::Other("interrupted".to_string()));
          }
        };

        match event
        {   Some(GenerationEvent::Submitted(prediction)) => {
              println!("Submitted {} ({})", prediction.id, prediction.status);
              job_id = Some(prediction.id);
            }
          , Some(GenerationEvent::Update(prediction)) => {
              println!("Status: {}", prediction.status);
              if let Some(logs) = prediction.logs.as_deref()
              {   if let Some(last) = logs.lines().last()
                  {   println!("  {}", last);
                  }
              }
            }
          , Some(GenerationEvent::Completed { items, .. }) => {
              for item in &items
              {   println!("{}  {}", item.id, item.url);
              }
              println!("{} image(s) added to the gallery", items.len());
              return Ok(());
            }
          , Some(GenerationEvent::Failed(e)) => return Err(e)
          , None => {
              return Err(txt2img::Error::Other(
                "backend stopped before the job finished".to_string()
              ));
            }
        }
    }
}

async fn print_page(backend: &Txt2ImgBackend, page: usize)
  -> Result<(), txt2img::Error>
{   let mut reply = backend.get_gallery_page(page).await?;
    let page = match reply.recv().await
    {   Some(result) => result?
      , None => return Err(txt2img::Error::Timeout)
    };
    if page.total_items == 0
    {   println!("No images yet. Generate your first!");
        return Ok(());
    }
    println!(
      "Page {} / {} ({} images)",
      page.page, page.total_pages, page.total_items
    );
    for item in &page.items
    {   println!(
          "{}  {}  {}  {}",
          item.id,
          item.created_at.format("%Y-%m-%d %H:%M"),
          item.dimensions,
          item.prompt
        );
    }
    Ok(())
}

async fn show(backend: &Txt2ImgBackend, id: &str)
  -> Result<(), txt2img::Error>
{   let mut reply = backend.get_gallery().await?;
    let items = match reply.recv().await
    {   Some(result) => result?
      , None => return Err(txt2img::Error::Timeout)
    };
    let gallery = txt2img::Gallery::from_items(items);
    let item = gallery.find(id).ok_or_else(|| {
      txt2img::Error::InvalidInput(format!("no image with id {}", id))
    })?;
    println!("{}", serde_json::to_string_pretty(item).map_err(|e| {
      txt2img::Error::ParseError(e.to_string())
    })?);
    Ok(())
}

async fn reset(backend: &Txt2ImgBackend)
  -> Result<(), txt2img::Error>
{   let mut reply = backend.reset_gallery().await?;
    match reply.recv().await
    {   Some(result) => result?
      , None => return Err(txt2img::Error::Timeout)
    }
    println!("Gallery cleared");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>>
{   let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config);
    debug!("Configuration: {:?}", config);

    let backend = Txt2ImgBackend::from_config(config)?;
    let result = match cli.command
    {   Command::Generate
        {   prompt
          , negative_prompt
          , dimensions
          , steps
          , guidance
          , scheduler
          , outputs
        } => {
          let request = GenerationRequest
          {   prompt
            , negative_prompt
            , image_dimensions: dimensions
            , num_inference_steps: steps
            , guidance_scale: guidance
            , scheduler
            , num_outputs: outputs
          };
          generate(&backend, request).await
        }
      , Command::Gallery { page } => print_page(&backend, page).await
      , Command::Show { id } => show(&backend, &id).await
      , Command::Reset => reset(&backend).await
    };

    backend.shutdown().await?;
    result?;
    Ok(())
}
