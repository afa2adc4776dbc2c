use std::{path::PathBuf, sync::Arc};

use log::{error, info};

use sid_surfer_audio::{
    config::{self, Config},
    manifest::Manifest,
    session::Session,
    track_resolver::AssetFetcher,
};

fn resolve_config(path: Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    match path.or_else(config::default_config_path) {
        Some(path) => {
            info!("Using config {}", path.display());
            Ok(config::load_or_create_config(&path)?)
        }
        None => {
            info!("No config directory available, using defaults");
            Ok(Config::default())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = resolve_config(std::env::args_os().nth(1).map(PathBuf::from))?;
    let manifest = Manifest::load(&config.session.manifest_path)?;
    let fetcher = Arc::new(AssetFetcher::new(&config.fetch));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut session = Session::headless(&config, fetcher, manifest);
        if let Err(err) = session.run_until_shutdown().await {
            error!("Session stopped: {}", err);
            return Err(err);
        }
        Ok(())
    })?;
    Ok(())
}
