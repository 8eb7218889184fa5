//! 📊 progress.rs: "Are we there yet?" Every import, every time, forever.
//!
//! 🚀 Rows processed out of the total the source counted up front, a rows/s
//! rate over a sliding window, and an ETA that assumes the future looks like
//! the past (historically a bad assumption, fine for CSVs).
//!
//! ⚠️ Watching this progress bar will not make it go faster. Science says no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

// ⏱️ rate window. short bursts won't spike you into existential terror.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 🔢 "1000000 rows" → "1,000,000 rows". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Row-level progress for one import.
pub(crate) struct ImportProgress {
    source_name: String,
    total_rows: u64,
    processed_rows: u64,
    progress_bar: ProgressBar,
    // 🔄 sliding window of (timestamp, rows) for the rate
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ImportProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ImportProgress")
            .field("source_name", &self.source_name)
            .field("total_rows", &self.total_rows)
            .field("processed_rows", &self.processed_rows)
            .finish()
    }
}

impl ImportProgress {
    /// 🚀 `visible = false` keeps the bar hidden (tests, background imports).
    pub(crate) fn new(source_name: String, total_rows: u64, visible: bool) -> Self {
        let progress_bar = ProgressBar::with_draw_target(
            Some(total_rows),
            if visible {
                ProgressDrawTarget::stderr()
            } else {
                ProgressDrawTarget::hidden()
            },
        );
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]")
        {
            progress_bar.set_style(style.progress_chars("=>-"));
        }

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            source_name,
            total_rows,
            processed_rows: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Call after every handled batch.
    pub(crate) fn update(&mut self, rows: u64) {
        self.processed_rows += rows;
        let rows_per_sec = self.rows_per_sec();
        self.render(rows_per_sec);
        self.progress_bar.set_position(self.processed_rows);
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    #[cfg(test)]
    pub(crate) fn processed_rows(&self) -> u64 {
        self.processed_rows
    }

    /// 📊 0-100, clamped. Zero total means "nothing to do", which is 100% done.
    pub(crate) fn percent(&self) -> f64 {
        if self.total_rows == 0 {
            return 100.0;
        }
        ((self.processed_rows as f64 / self.total_rows as f64) * 100.0).min(100.0)
    }

    fn rows_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.processed_rows));

        if let Some(&(oldest_time, oldest_rows)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                return self.processed_rows.saturating_sub(oldest_rows) as f64 / elapsed;
            }
        }
        0.0
    }

    fn render(&self, rows_per_sec: f64) {
        let percent = self.percent();
        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 && percent < 100.0 {
            // 🔮 linear extrapolation
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            format_duration(Duration::from_secs_f64(
                (total_estimated - elapsed.as_secs_f64()).max(0.0),
            ))
        } else {
            "--:--".to_string()
        };

        self.progress_bar.set_message(format!(
            "source: {}\n  {} rows/s   {} / {} rows   {:.2}%   {} elapsed   {} remaining",
            self.source_name,
            format_number(rows_per_sec as u64),
            format_number(self.processed_rows),
            format_number(self.total_rows),
            percent,
            format_duration(elapsed),
            remaining,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn the_one_where_long_imports_earn_an_hours_column() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3661)), "01:01:01");
    }

    #[test]
    fn the_one_where_percent_never_overshoots() {
        let mut the_progress = ImportProgress::new("mem://t".to_string(), 10, false);
        the_progress.update(4);
        assert_eq!(the_progress.percent(), 40.0);
        the_progress.update(20);
        assert_eq!(the_progress.percent(), 100.0);
        assert_eq!(the_progress.processed_rows(), 24);

        let the_empty = ImportProgress::new("mem://e".to_string(), 0, false);
        assert_eq!(the_empty.percent(), 100.0);
    }
}
