mod app;

use std::process::ExitCode;

use tracing::{error, info};

fn main() -> ExitCode {
    app::init_tracing();
    info!("=== Overlay Host Startup ===");

    let wiring = match app::build_app() {
        Ok(wiring) => wiring,
        Err(err) => {
            overlay::report_fatal(app::fatal_reporter().as_ref(), &err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = app::run(wiring) {
        error!(error = %err, "app_failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
