use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    sensor_proxyd::init_tracing();

    if let Err(e) = sensor_proxyd::run_daemon().await {
        error!("[sensor-proxyd] {}", e);
        std::process::exit(1);
    }
}
