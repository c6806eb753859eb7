use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use iamf::structs::layout::{OutputLayout, SoundSystem};

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = concat!(env!("CARGO_PKG_VERSION"), " (iamf ", env!("IAMF_VERSION"), ", built ", env!("BUILD_TIMESTAMP"), ")"),
    about      = "Tools for inspecting and decoding IAMF immersive audio bitstreams",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decode the specified IAMF stream into PCM audio.
    Decode(DecodeArgs),

    /// Print descriptor information
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Input IAMF OBU stream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file. Defaults to the input name with the format's extension.
    #[arg(long, value_name = "PATH")]
    pub output_path: Option<PathBuf>,

    /// Audio format for output.
    #[arg(long, value_enum, default_value_t = AudioFormat::Wav)]
    pub format: AudioFormat,

    /// Output loudspeaker layout.
    #[arg(long, value_enum, default_value_t = Layout::A)]
    pub layout: Layout,

    /// Friendly label of the mix presentation to decode.
    #[arg(long, value_name = "NAME")]
    pub label: Option<String>,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input IAMF OBU stream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Print the summary as YAML.
    #[arg(long)]
    pub yaml: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum AudioFormat {
    /// RIFF WAVE, 16-bit.
    Wav,
    /// Raw PCM format (16-bit little-endian).
    Pcm,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm => "pcm",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum Layout {
    /// Stereo (0+2+0).
    A,
    /// 5.1 (0+5+0).
    B,
    /// 5.1.2 (2+5+0).
    C,
    /// 5.1.4 (4+5+0).
    D,
    /// 4+5+1.
    E,
    /// 3+7+0.
    F,
    /// 4+9+0.
    G,
    /// 22.2 (9+10+3).
    H,
    /// 7.1 (0+7+0).
    I,
    /// 7.1.4 (4+7+0).
    J,
    Ext712,
    Ext312,
    Mono,
    Binaural,
}

impl From<Layout> for OutputLayout {
    fn from(layout: Layout) -> Self {
        let ss = match layout {
            Layout::A => SoundSystem::A,
            Layout::B => SoundSystem::B,
            Layout::C => SoundSystem::C,
            Layout::D => SoundSystem::D,
            Layout::E => SoundSystem::E,
            Layout::F => SoundSystem::F,
            Layout::G => SoundSystem::G,
            Layout::H => SoundSystem::H,
            Layout::I => SoundSystem::I,
            Layout::J => SoundSystem::J,
            Layout::Ext712 => SoundSystem::Ext712,
            Layout::Ext312 => SoundSystem::Ext312,
            Layout::Mono => SoundSystem::Mono,
            Layout::Binaural => return OutputLayout::Binaural,
        };
        OutputLayout::SoundSystem(ss)
    }
}
