//! Terminal level visualizer driven by the capture analyzer.
//!
//! Purely observational: reads frequency bins from an [`Analyzer`]
//! handle passed in at construction and renders a bar row. Has no
//! effect on the audio path.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::analyzer::Analyzer;
use crate::session::{PublicPhase, SessionStatus};

const BAR_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

pub struct LevelVisualizer {
    analyzer: Arc<Analyzer>,
    bars: usize,
}

impl LevelVisualizer {
    pub fn new(analyzer: Arc<Analyzer>, bars: usize) -> Self {
        Self {
            analyzer,
            bars: bars.max(1),
        }
    }

    /// One rendered frame: frequency bins bucketed into `bars` columns.
    pub fn render_row(&self) -> String {
        let bins = self.analyzer.frequency_bins();
        let per_bar = (bins.len() / self.bars).max(1);
        let mut row = String::with_capacity(self.bars * 3);
        for bar in 0..self.bars {
            let start = bar * per_bar;
            if start >= bins.len() {
                row.push(BAR_GLYPHS[0]);
                continue;
            }
            let end = (start + per_bar).min(bins.len());
            let avg: f32 = bins[start..end].iter().sum::<f32>() / (end - start) as f32;
            // Magnitudes for speech-level input sit well below 1.0;
            // stretch them across the glyph range.
            let scaled = (avg * 24.0).min(1.0);
            let step = ((scaled * (BAR_GLYPHS.len() - 1) as f32).round() as usize)
                .min(BAR_GLYPHS.len() - 1);
            row.push(BAR_GLYPHS[step]);
        }
        row
    }

    /// Animation loop: redraws while the session is connected, exits
    /// when the status channel closes.
    pub async fn run(self, mut status: watch::Receiver<SessionStatus>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        let mut drawn = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if status.borrow().phase == PublicPhase::Connected {
                        let row = self.render_row();
                        print!("\r{row} ");
                        let _ = std::io::stdout().flush();
                        drawn = true;
                    } else if drawn {
                        // Clear the bar row once the session ends.
                        print!("\r{}\r", " ".repeat(self.bars + 1));
                        let _ = std::io::stdout().flush();
                        drawn = false;
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
