//! Deck Desktop: application entry.

mod app;

use eframe::egui;

fn main() -> eframe::Result<()> {
    app::install_logger();
    let (controller, config) = match app::build_controller() {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("startup failed: {:#}", e);
            eprintln!("deck-desktop: {:#}", e);
            std::process::exit(1);
        }
    };
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 700.0])
            .with_min_inner_size([720.0, 480.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Ollama Chat & Control",
        options,
        Box::new(move |cc| Box::new(app::DeckApp::new(cc, controller, &config))),
    )
}
