use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tokio::sync::mpsc;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use telly::config::Config;
use telly::config::LoggingConfig;
use telly::diagnostics::TracingSink;
use telly::engine::Collaborators;
use telly::engine::Orchestrator;
use telly::host::DeviceAccess;
use telly::host::HostPowerSource;
use telly::host::SignalPowerSource;
use telly::store::ConfigStore;
use telly::store::FileConfigStore;
use telly::store::FileKeyStore;
use telly::store::KeyStore;
use telly::webos::ClientEventReceiver;
use telly::webos::SoundOutput;
use telly::webos::TvClient;
use telly::webos::TvCommand;
use telly::webos::TvInput;
use telly::webos::WebSocketConnector;
use telly::wol::LanWaker;
use telly::wol::MacAddress;
use telly::wol::WakeSender;
use telly::TvConfiguration;

#[derive(Parser)]
#[command(name = "telly")]
#[command(about = "Keep an LG webOS TV in step with this computer", long_about = None)]
struct Cli {
    /// Path to telly.toml
    #[arg(short, long, default_value = "telly.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon until interrupted
    Run,
    /// Save the TV to control
    Setup {
        /// Display name
        #[arg(long, default_value = "TV")]
        name: String,
        /// TV address on the local network
        #[arg(long)]
        ip: IpAddr,
        /// TV hardware address, any common delimiter
        #[arg(long)]
        mac: String,
        /// Input the computer is plugged into (HDMI_1, DP_1, USBC_1, ...)
        #[arg(long, default_value = "HDMI_1")]
        input: TvInput,
        /// Connect when the daemon starts
        #[arg(long)]
        auto_connect: bool,
        /// Turn the TV on when the computer wakes
        #[arg(long)]
        wake_with_host: bool,
        /// Turn the TV off when the computer sleeps
        #[arg(long)]
        sleep_with_host: bool,
        /// Switch to the input after waking the TV
        #[arg(long)]
        switch_input: bool,
        /// Label the input as a PC
        #[arg(long)]
        pc_mode: bool,
    },
    /// Print the saved TV
    Show,
    /// Forget the saved TV and its pairing key
    Clear,
    /// Send a wake packet to the saved TV
    Wake,
    /// Connect and print what the TV reports
    Status,
    /// Send one command to the saved TV
    Send {
        #[command(subcommand)]
        action: Action,
    },
}

#[derive(Subcommand)]
enum Action {
    PowerOff,
    ScreenOn,
    ScreenOff,
    VolumeUp,
    VolumeDown,
    /// Set the volume (0-100)
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        level: u8,
    },
    Mute,
    Unmute,
    /// Switch input (HDMI_1, DP_1, USBC_1, ...)
    Input { input: TvInput },
    /// Route audio (tv_speaker, external_arc, external_optical, headphone)
    SoundOutput { output: SoundOutput },
}

impl Action {
    fn command(&self) -> TvCommand {
        match self {
            Action::PowerOff => TvCommand::PowerOff,
            Action::ScreenOn => TvCommand::ScreenOn,
            Action::ScreenOff => TvCommand::ScreenOff,
            Action::VolumeUp => TvCommand::VolumeUp,
            Action::VolumeDown => TvCommand::VolumeDown,
            Action::Volume { level } => TvCommand::SetVolume(*level),
            Action::Mute => TvCommand::Mute,
            Action::Unmute => TvCommand::Unmute,
            Action::Input { input } => TvCommand::SetInput(*input),
            Action::SoundOutput { output } => TvCommand::SetSoundOutput(*output),
        }
    }
}

struct Stores {
    configs: Arc<FileConfigStore>,
    keys: Arc<FileKeyStore>,
}

impl Stores {
    fn saved(&self) -> Result<TvConfiguration> {
        match self.configs.load()? {
            Some(tv) => Ok(tv),
            None => bail!("no TV saved; run `telly setup` first"),
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(logging.targets())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_logging(&config.logging);

    let dir = config.storage.resolve_dir()?;
    let stores = Stores {
        configs: Arc::new(FileConfigStore::new(dir.join("device.toml"))),
        keys: Arc::new(FileKeyStore::new(dir.join("pairing-keys.toml"))),
    };

    match cli.command {
        Commands::Run => run(&config, stores).await,
        Commands::Setup {
            name,
            ip,
            mac,
            input,
            auto_connect,
            wake_with_host,
            sleep_with_host,
            switch_input,
            pc_mode,
        } => {
            let mac: MacAddress = mac.parse()?;
            let mut tv = TvConfiguration::new(name, ip, mac.to_string());
            tv.preferred_input = input;
            tv.auto_connect = auto_connect;
            tv.wake_with_host = wake_with_host;
            tv.sleep_with_host = sleep_with_host;
            tv.switch_input_on_wake = switch_input;
            tv.enable_pc_mode = pc_mode;
            stores.configs.save(&tv).context("saving TV")?;
            println!("Saved {} ({}) in {}", tv.name, tv.ip_address, dir.display());
            Ok(())
        }
        Commands::Show => {
            let tv = stores.saved()?;
            print!("{}", toml::to_string(&tv)?);
            let paired = stores.keys.load_key(&tv.key_address())?.is_some();
            println!("paired = {}", paired);
            Ok(())
        }
        Commands::Clear => {
            if let Some(tv) = stores.configs.load()? {
                stores.keys.delete_key(&tv.key_address())?;
            }
            stores.configs.clear()?;
            println!("Cleared saved TV");
            Ok(())
        }
        Commands::Wake => {
            let tv = stores.saved()?;
            LanWaker::new()
                .wake(&tv.mac_address)
                .await
                .with_context(|| format!("waking {}", tv.name))?;
            println!("Sent wake packet to {}", tv.mac_address);
            Ok(())
        }
        Commands::Status => status(&config, &stores).await,
        Commands::Send { action } => {
            let tv = stores.saved()?;
            let (client, _events) = connect(&config, &stores, &tv).await?;
            let result = client.request(action.command()).await;
            client.disconnect();
            result.with_context(|| format!("sending {}", action.command().uri()))?;
            Ok(())
        }
    }
}

async fn connect(
    config: &Config,
    stores: &Stores,
    tv: &TvConfiguration,
) -> Result<(TvClient, ClientEventReceiver)> {
    let (client, events) = TvClient::new(
        Arc::new(WebSocketConnector::new()),
        stores.keys.clone(),
        config.client.options(),
    );
    client
        .connect(tv)
        .await
        .with_context(|| format!("connecting to {} at {}", tv.name, tv.ip_address))?;
    Ok((client, events))
}

async fn status(config: &Config, stores: &Stores) -> Result<()> {
    let tv = stores.saved()?;
    let (client, _events) = connect(config, stores, &tv).await?;

    // Responses land in the snapshot as they arrive.
    for command in [
        TvCommand::GetForegroundApp,
        TvCommand::GetInputList,
        TvCommand::GetVolume,
        TvCommand::GetSoundOutput,
    ] {
        if let Err(e) = client.request(command.clone()).await {
            warn!(uri = command.uri(), error = %e, "status query failed");
        }
    }
    let snapshot = client.snapshot();
    client.disconnect();

    println!("{} ({})", tv.name, tv.ip_address);
    if let Some(transport) = snapshot.capabilities.transport {
        println!("  transport:    {}", transport.scheme());
    }
    match &snapshot.foreground {
        Some(source) => println!("  showing:      {}", source),
        None => println!("  showing:      unknown"),
    }
    match snapshot.volume {
        Some(volume) => println!(
            "  volume:       {}{}",
            volume,
            if snapshot.muted == Some(true) { " (muted)" } else { "" }
        ),
        None => println!("  volume:       unknown"),
    }
    println!("  sound output: {}", snapshot.sound_output);
    let mut icons: Vec<_> = snapshot.capabilities.input_icons.iter().collect();
    icons.sort_by_key(|(input, _)| input.wire_id());
    for (input, icon) in icons {
        println!("  {:<13} {}", format!("{}:", input), icon);
    }
    Ok(())
}

async fn run(config: &Config, stores: Stores) -> Result<()> {
    info!("telly starting");

    let (client, client_events) = TvClient::new(
        Arc::new(WebSocketConnector::new()),
        stores.keys.clone(),
        config.client.options(),
    );
    let orchestrator = Orchestrator::new(
        Collaborators {
            tv: Arc::new(client),
            waker: Arc::new(LanWaker::new()),
            configs: stores.configs.clone(),
            access: Arc::new(DeviceAccess::new(
                config.automation.media_keys_device.clone(),
            )),
            sink: Arc::new(TracingSink),
        },
        config.automation.settings(&config.diagnostics),
    );

    if config.automation.media_keys {
        orchestrator.set_media_keys_enabled(true);
    }

    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let subscription = SignalPowerSource::new()
        .subscribe(host_tx)
        .context("subscribing to host power events")?;

    let startup = orchestrator.clone();
    tokio::spawn(async move {
        startup.auto_connect().await;
    });

    orchestrator
        .run(host_rx, client_events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to wait for Ctrl+C");
            }
        })
        .await;

    subscription.cancel();
    info!("telly stopped");
    Ok(())
}
