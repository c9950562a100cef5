#[cfg(windows)]
mod record {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use capture_sync::platform::{
        self, AudioSettingsBuilder, ContainerSettingsBuilder, MediaTranscoderConsumer,
        VideoSettingsBuilder, capture_item, d3d11, winrt::WinRT,
    };
    use clap::Parser;
    use windows::Graphics::SizeInt32;

    #[derive(Parser)]
    #[command(name = "Screen Recorder")]
    #[command(version = "1.0")]
    #[command(about = "Records the screen and the microphone")]
    struct Cli {
        /// Record the foreground window instead of the primary monitor
        #[arg(long)]
        foreground_window: bool,

        /// Leave the microphone out
        #[arg(long)]
        no_audio: bool,

        /// Output file path
        #[arg(long, default_value = "video.mp4")]
        path: String,

        /// Video bitrate in bits per second
        #[arg(long, default_value_t = 9_000_000)]
        bitrate: u32,

        /// Video frame rate
        #[arg(long, default_value_t = 60)]
        frame_rate: u32,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    }

    pub fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let cli = Cli::parse();
        let _winrt = WinRT::new()?;

        let item = if cli.foreground_window {
            capture_item::foreground_window()?
        } else {
            capture_item::primary_monitor()?
        };

        // Encoders want even dimensions
        let size = item.Size()?;
        let target_size = SizeInt32 { Width: size.Width & !1, Height: size.Height & !1 };
        println!("Capture size: {}x{}", target_size.Width, target_size.Height);

        let (d3d_device, _context) = d3d11::create_d3d_device()?;
        let device = d3d11::create_direct3d_device(&d3d_device)?;
        let session = platform::start_capture(&device, &item, target_size, !cli.no_audio)?;

        let video_settings = VideoSettingsBuilder::new(target_size.Width as u32, target_size.Height as u32)
            .bitrate(cli.bitrate)
            .frame_rate(cli.frame_rate);
        let consumer = MediaTranscoderConsumer::new(
            &cli.path,
            video_settings,
            AudioSettingsBuilder::default().disabled(cli.no_audio),
            ContainerSettingsBuilder::default(),
        )?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        {
            let stop_flag = stop_flag.clone();
            ctrlc::set_handler(move || {
                stop_flag.store(true, Ordering::SeqCst);
            })?;
        }

        let encode = session.encode_in_background(consumer)?;
        let origin = session.ready().wait()?;
        println!("Recording started at {origin}, press Ctrl+C to stop");

        let start = Instant::now();
        while !stop_flag.load(Ordering::SeqCst) && !encode.is_finished() {
            if cli.seconds.is_some_and(|seconds| start.elapsed() >= Duration::from_secs(seconds)) {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        session.stop();
        encode.wait()?;
        println!("Saved {} after {:.2} seconds", cli.path, start.elapsed().as_secs_f64());

        Ok(())
    }
}

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    record::main()
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This demo records with Windows Graphics Capture and only runs on Windows");
}
