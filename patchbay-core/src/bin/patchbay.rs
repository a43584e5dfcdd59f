use std::io::{Error, ErrorKind};
use std::path::Path;

use patchbay_audio::{JsonPluginCatalog, PluginProvider};
use patchbay_core::logging::init_logging;
use patchbay_core::{Config, EngineDocument};

const USAGE: &str = "usage: patchbay [-v|--verbose] <command>

commands:
  validate <state.json>    check a saved engine document
  plugins <catalog.json>   list the plugins in a scanner catalog
  devices                  list audio and MIDI devices (system-devices builds)
  config                   print the effective engine settings";

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    let positional: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with('-'))
        .collect();

    if verbose {
        let path = init_logging(true)?;
        eprintln!("logging to {}", path.display());
    }

    match positional.as_slice() {
        ["validate", path] => validate(Path::new(path)),
        ["plugins", path] => plugins(Path::new(path)),
        ["devices"] => devices(),
        ["config"] => {
            print_config(&Config::load());
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            Err(Error::new(ErrorKind::InvalidInput, "unrecognised command"))
        }
    }
}

fn validate(path: &Path) -> std::io::Result<()> {
    let json = std::fs::read_to_string(path)?;
    let document = EngineDocument::from_json(&json).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

    println!("engine {} (format {})", document.engine_id, document.version);
    println!("buffer size: {} frames", document.buffer_size.as_samples());
    for channel in document.all_channels() {
        println!(
            "  {:>3}  {:<10} {:<24} plugins={} connections={} sends={}",
            channel.id.to_string(),
            channel.variant.kind().to_string(),
            channel.name,
            channel.plugins.len(),
            channel.connections.len(),
            channel.sends.len()
        );
        for plugin in channel.plugins.iter().filter(|p| !p.installed) {
            println!("       missing plugin {} ({})", plugin.id, plugin.blueprint);
        }
    }
    Ok(())
}

fn plugins(path: &Path) -> std::io::Result<()> {
    let catalog = JsonPluginCatalog::load(path)?;
    let infos = catalog
        .quick_scan()
        .map_err(|e| Error::new(ErrorKind::Other, e))?;
    for info in &infos {
        let params = catalog
            .introspect(&info.blueprint)
            .map(|p| p.parameters.len())
            .unwrap_or(0);
        let category = format!("{:?}", info.blueprint.category());
        println!("{:<14} {} ({} parameters)", category, info.blueprint, params);
    }
    println!("{} plugins", infos.len());
    Ok(())
}

#[cfg(feature = "system-devices")]
fn devices() -> std::io::Result<()> {
    use patchbay_audio::devices::SystemDevices;
    use patchbay_audio::DeviceProvider;

    let provider = SystemDevices::new();
    let audio = provider
        .audio_devices()
        .map_err(|e| Error::new(ErrorKind::Other, e))?;
    let midi = provider
        .midi_devices()
        .map_err(|e| Error::new(ErrorKind::Other, e))?;

    println!("audio:");
    for d in &audio {
        let default = match (d.is_default_input, d.is_default_output) {
            (true, true) => " [default in/out]",
            (true, false) => " [default in]",
            (false, true) => " [default out]",
            (false, false) => "",
        };
        println!("  {} in={} out={}{}", d.name, d.input_channels, d.output_channels, default);
    }
    println!("midi:");
    for d in &midi {
        println!("  {}{}", d.name, if d.is_input { " (input)" } else { "" });
    }
    Ok(())
}

#[cfg(not(feature = "system-devices"))]
fn devices() -> std::io::Result<()> {
    Err(Error::new(
        ErrorKind::Unsupported,
        "built without the system-devices feature",
    ))
}

fn print_config(config: &Config) {
    let settings = config.engine_settings("<output device>");
    let monitor = &settings.monitor;
    println!("buffer_size = {}", settings.buffer_size.as_samples());
    println!("sample_rate = {}", settings.sample_rate);
    println!("strict_start_validation = {}", settings.strict_start_validation);
    println!("auto_connect_to_master = {}", settings.auto_connect_to_master);
    println!("queue_capacity = {}", settings.queue_capacity);
    println!("operation_budget_ms = {}", settings.operation_budget.as_millis());
    println!("health_tick_ms = {}", settings.health_tick.as_millis());
    println!("monitor.base_interval_ms = {}", monitor.base_interval.as_millis());
}
