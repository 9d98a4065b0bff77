use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use firmwave_core::{DecodeResult, Decoder, Encoder, EncoderConfig, ModemConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "firmwave")]
#[command(about = "Transfer firmware images over QPSK audio")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModemArgs {
    /// Sample rate in Hz (must be 6, 8, 12 or 16 times the symbol rate)
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    /// Symbol rate in baud
    #[arg(long, default_value_t = 8_000)]
    symbol_rate: u32,

    /// Packet payload size in bytes (multiple of 4)
    #[arg(long, default_value_t = 256)]
    packet_size: usize,

    /// Block (flash page) size in bytes (multiple of the packet size)
    #[arg(long, default_value_t = 2048)]
    block_size: usize,

    /// CRC-32 seed shared with the receiver (hex accepted)
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    seed: u32,
}

impl ModemArgs {
    fn config(&self) -> ModemConfig {
        ModemConfig {
            sample_rate: self.sample_rate,
            symbol_rate: self.symbol_rate,
            packet_size: self.packet_size,
            block_size: self.block_size,
            fifo_capacity: 1024,
        }
    }
}

fn parse_u32(value: &str) -> Result<u32, String> {
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|e| e.to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a firmware image into a WAV file
    Encode {
        /// Input binary file
        #[arg(value_name = "INPUT.BIN")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[command(flatten)]
        modem: ModemArgs,

        /// Seconds of carrier between blocks, covering the receiver's
        /// flash write
        #[arg(long, default_value_t = 0.1)]
        block_gap: f32,

        /// Peak output amplitude in (0, 1]
        #[arg(long, default_value_t = 1.0)]
        amplitude: f32,
    },

    /// Decode a WAV recording back into the firmware image
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output binary file
        #[arg(value_name = "OUTPUT.BIN")]
        output: PathBuf,

        #[command(flatten)]
        modem: ModemArgs,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode {
            input,
            output,
            modem,
            block_gap,
            amplitude,
        } => encode(&input, &output, modem.config(), modem.seed, block_gap, amplitude),
        Commands::Decode {
            input,
            output,
            modem,
        } => decode(&input, &output, modem.config(), modem.seed),
    }
}

fn encode(
    input: &PathBuf,
    output: &PathBuf,
    modem: ModemConfig,
    seed: u32,
    block_gap: f32,
    amplitude: f32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut data = fs::read(input)?;

    // pad the trailing partial block, same fill as flash erase state
    while data.len() % modem.block_size != 0 {
        data.push(0xFF);
    }

    let encoder = Encoder::new(EncoderConfig {
        modem,
        crc_seed: seed,
        block_gap,
        amplitude,
    })?;
    let samples = encoder.encode(&data)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: modem.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;
    for sample in &samples {
        writer.write_sample((sample * 32767.0) as i16)?;
    }
    writer.finalize()?;

    println!(
        "Encoded {} bytes into {} samples ({:.1} s)",
        data.len(),
        samples.len(),
        samples.len() as f32 / modem.sample_rate as f32
    );
    Ok(())
}

fn decode(
    input: &PathBuf,
    output: &PathBuf,
    modem: ModemConfig,
    seed: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(input)?;
    let spec = reader.spec();

    if spec.sample_rate != modem.sample_rate {
        return Err(format!(
            "WAV sample rate {} does not match configured {}",
            spec.sample_rate, modem.sample_rate
        )
        .into());
    }

    let channels = spec.channels as usize;
    let samples = read_mono_samples(&mut reader, channels)?;

    let mut decoder = Decoder::new(modem, seed)?;
    let mut image = Vec::new();
    let mut ended = false;

    // feed the decoder the way a capture driver would: a chunk at a time,
    // draining events after each chunk
    'stream: for chunk in samples.chunks(256) {
        decoder.push_slice(chunk);
        loop {
            match decoder.process() {
                DecodeResult::None => break,
                DecodeResult::PacketComplete => {}
                DecodeResult::BlockComplete => {
                    image.extend(decoder.block_data().iter().flat_map(|w| w.to_le_bytes()));
                }
                DecodeResult::End => {
                    ended = true;
                    break 'stream;
                }
                DecodeResult::Error => {
                    let kind = decoder
                        .error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown".into());
                    return Err(format!("decode failed: {}", kind).into());
                }
            }
        }
    }

    if !ended {
        return Err("recording ended before the end marker".into());
    }

    fs::write(output, &image)?;
    println!("Decoded {} bytes", image.len());
    Ok(())
}

fn read_mono_samples(
    reader: &mut hound::WavReader<std::io::BufReader<fs::File>>,
    channels: usize,
) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => {
            reader.samples::<f32>().collect::<Result<_, _>>()?
        }
        (format, bits) => {
            return Err(format!("unsupported WAV format: {:?} {} bit", format, bits).into())
        }
    };

    if channels <= 1 {
        return Ok(interleaved);
    }
    Ok(interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}
