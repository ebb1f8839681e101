use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wakeline::stream::{AudioInputStream, AudioOutputStream, AudioSample};
use wakeline::voice::{AudioCapture, AudioPlayback, DEFAULT_SAMPLE_RATE, f32_to_sample, samples_to_wav};
use wakeline::wake_word::classifier::calculate_energy;
use wakeline::{Config, Pipeline};

/// wakeline - Always-listening wake word front end for a voice assistant
#[derive(Parser)]
#[command(name = "wakeline", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/wakeline/config.toml)
    #[arg(short, long, env = "WAKELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,wakeline=info",
        1 => "info,wakeline=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_thread_names(true)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    tracing::info!(config = ?cli.config, "starting wakeline");

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let pipeline = Pipeline::start(&config).context("failed to start pipeline")?;

    tracing::info!("wakeline ready - say \"{}\"", config.assistant.trigger_word);

    // Run until interrupted
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    pipeline.shutdown();
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let seconds = usize::try_from(duration.max(1))?;
    let stream = AudioInputStream::new(usize::try_from(DEFAULT_SAMPLE_RATE)? * (seconds + 1));
    let meter = stream.create_reader();
    let writer = stream
        .create_writer()
        .context("input stream already has a writer")?;

    let mut capture = AudioCapture::new(writer, DEFAULT_SAMPLE_RATE)?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = meter.read_available();
        let energy = calculate_energy(&samples);
        let peak = samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .map_or(0.0, |p| f32::from(p) / 32768.0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let bar: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            bar
        );
    }

    capture.stop();

    if let Some(path) = output {
        let wav = samples_to_wav(&stream.snapshot(), sample_rate)?;
        std::fs::write(&path, wav)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nSaved {} samples to {}", stream.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = DEFAULT_SAMPLE_RATE;
    let tone = sine(440.0, sample_rate, 2);

    let stream = AudioOutputStream::new(tone.len());
    let writer = stream
        .create_writer()
        .context("output stream already has a writer")?;
    let mut playback = AudioPlayback::new(stream.create_reader(), sample_rate)?;

    println!("Playing {} samples at {} Hz...", tone.len(), sample_rate);

    writer.write(&tone);
    playback.start()?;

    // Poll for completion with timeout
    let start = Instant::now();
    let timeout = Duration::from_millis(2500);
    while playback.pending_samples() > 0 && start.elapsed() < timeout {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Small delay to ensure audio finishes
    tokio::time::sleep(Duration::from_millis(100)).await;
    playback.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Generate a sine tone at 30% volume
#[allow(clippy::cast_precision_loss)]
fn sine(frequency: f32, sample_rate: u32, seconds: u32) -> Vec<AudioSample> {
    (0..sample_rate * seconds)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            f32_to_sample((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3)
        })
        .collect()
}
