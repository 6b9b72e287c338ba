//! lanlens CLI
//!
//! Scans the local network, watches it passively and manages the device
//! database.

#[tokio::main]
async fn main() {
    if let Err(e) = lanlens::logging::init_logging() {
        eprintln!("[WARN] Failed to initialize structured logging: {}", e);
    }

    match lanlens::run(std::env::args()).await {
        Ok(()) => {}
        Err(e) => {
            lanlens::log_error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
