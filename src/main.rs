use std::sync::Arc;

use anyhow::Result;
use bobur_voice_rs::backend::LiveBackend;
use bobur_voice_rs::config::Config;
use bobur_voice_rs::session::{PublicPhase, SessionController};
use bobur_voice_rs::visualizer::LevelVisualizer;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "bobur_voice".to_string());
    let config = Config::load(&config_path)?;
    log::info!("model: {}, voice: {}", config.model, config.voice);

    let mut controller = SessionController::new(config, Arc::new(LiveBackend));
    let mut status = controller.subscribe();

    let visualizer = LevelVisualizer::new(controller.analyzer(), 24);
    let visualizer = tokio::spawn(visualizer.run(controller.subscribe()));

    controller.start()?;
    println!("Session starting. Press Ctrl-C to hang up.");

    let mut last_phase = PublicPhase::Idle;
    let mut last_input = String::new();
    let mut last_output = String::new();
    let mut was_active = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nHanging up...");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                if snapshot.phase != last_phase {
                    match snapshot.phase {
                        PublicPhase::Connecting => println!("Connecting..."),
                        PublicPhase::Connected => println!("Connected. Speak freely."),
                        PublicPhase::Idle => {}
                    }
                    last_phase = snapshot.phase;
                }
                if snapshot.input_transcript != last_input
                    && !snapshot.input_transcript.is_empty()
                {
                    println!("\rYou: {}", snapshot.input_transcript);
                    last_input = snapshot.input_transcript;
                }
                if snapshot.output_transcript != last_output
                    && !snapshot.output_transcript.is_empty()
                {
                    println!("\rBobur: {}", snapshot.output_transcript);
                    last_output = snapshot.output_transcript;
                }
                match snapshot.phase {
                    PublicPhase::Idle if was_active => {
                        if let Some(error) = &snapshot.error {
                            eprintln!("Session ended with an error: {error}");
                        } else {
                            println!("Session ended.");
                        }
                        break;
                    }
                    PublicPhase::Idle => {}
                    _ => was_active = true,
                }
            }
        }
    }

    tokio::select! {
        _ = controller.stop() => {}
        _ = tokio::signal::ctrl_c() => {
            // Second Ctrl-C: give up on a graceful hang-up.
            eprintln!("forced exit");
            std::process::exit(1);
        }
    }
    visualizer.abort();
    Ok(())
}
