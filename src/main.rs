use log::error;
use timetable_solver::config::AppConfig;
use timetable_solver::server;

#[tokio::main]
async fn main() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if let Err(e) = server::run_server(config).await {
        error!("{e}");
        std::process::exit(1);
    }
}
