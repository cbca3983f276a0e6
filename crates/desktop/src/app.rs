//! Deck Desktop: egui app state and UI.

use eframe::egui;
use lib::config::Config;
use lib::controller::Controller;
use lib::exec::OLLAMA_COMMANDS;
use lib::metrics::{ResourceSampler, ResourceUsage};
use lib::session::ChatEntry;
use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

const CHAT_INPUT_ROW_HEIGHT: f32 = 36.0;
const LOG_BUFFER_MAX_LINES: usize = 2000;
const COMMAND_OUTPUT_MAX_LINES: usize = 5000;

/// Resource label refresh period.
const RESOURCE_INTERVAL: Duration = Duration::from_secs(1);

/// Repaint period while a worker may deliver events.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES for display in the Logs screen.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let line = format!(
            "{} [{}] {}",
            clock_time(),
            record.level(),
            record.args()
        );
        push_log_line(line);
    }

    fn flush(&self) {}
}

/// UTC wall-clock time as HH:MM:SS.mmm.
fn clock_time() -> String {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = t.as_secs();
    let millis = t.subsec_millis();
    let h = (secs / 3600) % 24;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, millis)
}

static LOGGER: DesktopLogger = DesktopLogger;

pub fn install_logger() {
    let _ = LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Debug);
    log::info!("desktop started");
}

/// Load startup config and build the controller. A broken config file falls back to defaults.
pub fn build_controller() -> anyhow::Result<(Controller, Config)> {
    let config = match lib::config::load_config(None) {
        Ok((config, path)) => {
            log::info!("config: {}", path.display());
            config
        }
        Err(e) => {
            log::warn!("using default config: {:#}", e);
            Config::default()
        }
    };
    let controller = Controller::new(&config)?;
    Ok((controller, config))
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Chat,
    Settings,
    Website,
    Logs,
}

pub struct DeckApp {
    controller: Controller,
    current_screen: Screen,
    /// Current input text for the chat box.
    chat_input: String,
    /// API URL being edited; applied by "Save & Test".
    api_url_input: String,
    ai_name_input: String,
    /// Selected entry in OLLAMA_COMMANDS.
    palette_index: usize,
    custom_command: String,
    website_url: String,
    /// Last failure opening the website, if any.
    website_error: Option<String>,
    sampler: ResourceSampler,
    usage: ResourceUsage,
    last_sample: Option<Instant>,
}

impl DeckApp {
    /// Space between the main screen title and the content below.
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    /// Space between the bottom of the content and the window edge.
    const SCREEN_FOOTER_SPACING: f32 = 24.0;

    pub fn new(_cc: &eframe::CreationContext<'_>, mut controller: Controller, config: &Config) -> Self {
        controller.check_connection();
        controller.refresh_models();
        let settings = controller.settings();
        Self {
            api_url_input: settings.api_url.clone(),
            ai_name_input: settings.ai_name.clone(),
            controller,
            current_screen: Screen::default(),
            chat_input: String::new(),
            palette_index: 0,
            custom_command: String::new(),
            website_url: config.ui.website_url.clone(),
            website_error: None,
            sampler: ResourceSampler::new(),
            usage: ResourceUsage::default(),
            last_sample: None,
        }
    }

    fn sample_resources(&mut self) {
        let due = self
            .last_sample
            .map(|t| t.elapsed() >= RESOURCE_INTERVAL)
            .unwrap_or(true);
        if due {
            self.usage = self.sampler.sample();
            self.last_sample = Some(Instant::now());
        }
    }

    fn send_chat_input(&mut self) {
        let message = std::mem::take(&mut self.chat_input);
        self.controller.send_message(&message);
    }

    /// Renders one chat entry as a framed bubble; user entries are filled darker and bold.
    fn render_chat_entry(ui: &mut egui::Ui, entry: &ChatEntry) {
        let is_user = matches!(entry, ChatEntry::User(_));
        let frame = egui::Frame::none()
            .fill(if is_user {
                ui.style().visuals.extreme_bg_color
            } else {
                ui.style().visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                ui.style()
                    .visuals
                    .widgets
                    .noninteractive
                    .bg_stroke
                    .color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        frame.show(ui, |ui| {
            let width = ui.available_width();
            ui.set_min_width(width);
            match entry {
                ChatEntry::User(_) => {
                    ui.label(egui::RichText::new(entry.to_string()).strong());
                }
                ChatEntry::Assistant { .. } => {
                    ui.label(entry.to_string());
                }
                ChatEntry::System(_) => {
                    ui.label(egui::RichText::new(entry.to_string()).italics().weak());
                }
            }
        });
    }

    /// Chat screen: transcript fills the space, input row pinned at the bottom.
    fn ui_chat(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Chat");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let available = ui.available_height();
        let messages_height =
            (available - CHAT_INPUT_ROW_HEIGHT - 8.0 - Self::SCREEN_FOOTER_SPACING).max(80.0);
        egui::ScrollArea::vertical()
            .max_height(messages_height)
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for entry in self.controller.chat_log() {
                    Self::render_chat_entry(ui, entry);
                    ui.add_space(8.0);
                }
                if self.controller.chat_log().is_empty() {
                    ui.label("No messages yet.");
                }
            });

        ui.add_space(8.0);
        let running = self.controller.is_chat_running();
        ui.horizontal(|ui| {
            let button_space = if running { 200.0 } else { 170.0 };
            let input = ui.add_sized(
                [
                    (ui.available_width() - button_space).max(100.0),
                    CHAT_INPUT_ROW_HEIGHT,
                ],
                egui::TextEdit::singleline(&mut self.chat_input).hint_text("Type a message"),
            );
            let mut send_now = false;
            if input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                send_now = true;
                input.request_focus();
            }
            if ui.button("Send").clicked() {
                send_now = true;
            }
            if ui.button("Stop Chat").clicked() {
                self.controller.stop_response();
            }
            if running {
                ui.spinner();
            }
            if send_now {
                self.send_chat_input();
            }
        });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_settings_screen(&mut self, ui: &mut egui::Ui) {
        const ROW_SPACING: f32 = 10.0;
        ui.add_space(24.0);
        ui.heading("Settings");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        ui.horizontal(|ui| {
            ui.label("Ollama API URL:");
            ui.add(egui::TextEdit::singleline(&mut self.api_url_input).desired_width(360.0));
            if ui.button("Save & Test").clicked() {
                let url = self.api_url_input.clone();
                self.controller.apply_api_url(&url);
                self.api_url_input = self.controller.settings().api_url.clone();
            }
        });
        ui.add_space(ROW_SPACING);

        ui.horizontal(|ui| {
            ui.label("AI Name:");
            if ui
                .add(egui::TextEdit::singleline(&mut self.ai_name_input).desired_width(200.0))
                .changed()
            {
                self.controller.set_ai_name(self.ai_name_input.clone());
            }
        });
        ui.add_space(ROW_SPACING);

        let models: Vec<String> = self.controller.models().to_vec();
        let current = self.controller.settings().model.clone();
        let mut picked: Option<String> = None;
        ui.horizontal(|ui| {
            ui.label("Model:");
            egui::ComboBox::from_id_source("model_select")
                .selected_text(current.as_deref().unwrap_or("—"))
                .width(240.0)
                .show_ui(ui, |ui| {
                    for m in &models {
                        let selected = current.as_deref() == Some(m.as_str());
                        if ui.selectable_label(selected, m).clicked() {
                            picked = Some(m.clone());
                        }
                    }
                });
            if ui.button("↻ Refresh Models").clicked() {
                self.controller.refresh_models();
            }
        });
        if let Some(m) = picked {
            self.controller.set_model(Some(m));
        }
        ui.add_space(ROW_SPACING);

        let mut global = self.controller.settings().global_history;
        if ui
            .checkbox(&mut global, "Use Global History (all models share one chat)")
            .changed()
        {
            self.controller.set_global_history(global);
        }
        ui.label(
            egui::RichText::new(format!(
                "History file: {}",
                self.controller.history_path().display()
            ))
            .weak(),
        );
        ui.add_space(ROW_SPACING);

        ui.horizontal(|ui| {
            if ui.button("Clear Chat History").clicked() {
                self.controller.clear_history();
            }
            if ui.button("New Session").clicked() {
                self.controller.new_session();
            }
        });
        ui.add_space(ROW_SPACING);
        ui.separator();
        ui.add_space(ROW_SPACING);

        ui.horizontal(|ui| {
            egui::ComboBox::from_id_source("command_select")
                .selected_text(OLLAMA_COMMANDS[self.palette_index])
                .width(240.0)
                .show_ui(ui, |ui| {
                    for (i, c) in OLLAMA_COMMANDS.iter().enumerate() {
                        ui.selectable_value(&mut self.palette_index, i, *c);
                    }
                });
            if ui.button("Run Command").clicked() {
                self.controller.run_command(OLLAMA_COMMANDS[self.palette_index]);
            }
            if ui.button("Stop Command").clicked() {
                self.controller.stop_command();
            }
            if self.controller.is_command_running() {
                ui.spinner();
            }
        });
        ui.add_space(ROW_SPACING);

        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.custom_command)
                    .hint_text("Enter custom command here...")
                    .desired_width(360.0),
            );
            if ui.button("Run Custom Command").clicked() {
                let cmd = self.custom_command.clone();
                self.controller.run_command(&cmd);
            }
        });
        ui.add_space(ROW_SPACING);

        let available = ui.available_height();
        let scroll_height = (available - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .id_source("command_output")
            .max_height(scroll_height)
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                let log = self.controller.command_log();
                let start = log.len().saturating_sub(COMMAND_OUTPUT_MAX_LINES);
                for line in &log[start..] {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if log.is_empty() {
                    ui.label("No command output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_website_screen(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Ollama Website");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
        ui.label("Browse the model library in your web browser.");
        ui.add_space(8.0);
        ui.hyperlink_to(self.website_url.as_str(), self.website_url.as_str());
        ui.add_space(8.0);
        if ui.button("Open Ollama Website").clicked() {
            self.website_error = match open::that(&self.website_url) {
                Ok(()) => None,
                Err(e) => {
                    log::warn!("opening {}: {}", self.website_url, e);
                    Some(format!("Could not open browser: {}", e))
                }
            };
        }
        if let Some(ref err) = self.website_error {
            ui.add_space(8.0);
            ui.colored_label(egui::Color32::RED, err);
        }
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let available = ui.available_height();
        let scroll_height = (available - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }
}

impl eframe::App for DeckApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.controller.poll();
        self.sample_resources();
        if self.controller.is_chat_running() || self.controller.is_command_running() {
            ctx.request_repaint_after(WORKER_POLL_INTERVAL);
        } else {
            ctx.request_repaint_after(RESOURCE_INTERVAL);
        }

        // Header with title, connection status, and resource usage
        let connected = self.controller.is_connected();
        let usage = self.usage.to_string();
        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(16.0);
                    ui.horizontal(|ui| {
                        ui.heading("Deck");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            ui.label(usage);
                            ui.add_space(16.0);
                            if connected {
                                ui.colored_label(egui::Color32::GREEN, "● Connected");
                            } else {
                                ui.colored_label(egui::Color32::RED, "● Disconnected");
                            }
                        });
                    });
                    ui.add_space(16.0);
                });
        });

        let current_screen = &mut self.current_screen;
        egui::SidePanel::left("sidebar")
            .resizable(false)
            .exact_width(140.0)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                    .show(ui, |ui| {
                        ui.add_space(24.0);
                        for (screen, label) in [
                            (Screen::Chat, "Chat"),
                            (Screen::Settings, "Settings"),
                            (Screen::Website, "Website"),
                            (Screen::Logs, "Logs"),
                        ] {
                            if ui.selectable_label(*current_screen == screen, label).clicked() {
                                *current_screen = screen;
                            }
                            ui.add_space(12.0);
                        }
                    });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Chat => self.ui_chat(ui),
                    Screen::Settings => self.ui_settings_screen(ui),
                    Screen::Website => self.ui_website_screen(ui),
                    Screen::Logs => self.ui_logs_screen(ui),
                });
        });
    }
}
