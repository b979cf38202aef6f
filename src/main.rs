use ollie_remote::app::App;
use ollie_remote::domain::settings::SettingsService;
use ollie_remote::infrastructure::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Ollie Remote");
    if let Some(path) = settings_service.path() {
        info!("Settings file: {}", path.display());
    }

    let result = run(App::new(settings.clone()), &settings).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

#[cfg(windows)]
async fn run(
    app: App,
    settings: &ollie_remote::domain::settings::Settings,
) -> anyhow::Result<()> {
    use ollie_remote::infrastructure::bluetooth::connection::WinRtConnector;
    use ollie_remote::infrastructure::gamepad::GamepadSource;

    let connector = WinRtConnector::new(&settings.link, app.event_sender());
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    app.run(&connector, GamepadSource::new(), shutdown).await
}

#[cfg(not(windows))]
async fn run(
    _app: App,
    _settings: &ollie_remote::domain::settings::Settings,
) -> anyhow::Result<()> {
    anyhow::bail!("Ollie Remote needs the Windows Bluetooth LE and gamepad APIs")
}
