use crate::types::FinalResult;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

const TABLE_WIDTH: usize = 96;

/// 进度输出的唯一消费者
///
/// Every line is printed above a spinner; the spinner clears once all
/// senders are dropped.
pub fn spawn_progress_printer(mut rx: UnboundedReceiver<String>) -> JoinHandle<()> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("Working...");

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if line.starts_with("Step ") {
                pb.set_message(line.clone());
            }
            pb.println(line);
        }
        pb.finish_and_clear();
    })
}

/// Ranked result table, fastest first.
pub fn render_table(results: &[FinalResult]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<4} {:<40} {:<5} {:<15} {:>9} {:>6} {:>9}  DOMAIN\n",
        "RANK", "ADDRESS", "COLO", "REGION", "DELAY", "LOSS", "SPEED"
    ));
    out.push_str(&"-".repeat(TABLE_WIDTH));
    out.push('\n');

    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<40} {:<5} {:<15} {:>9} {:>6} {:>9}  {}\n",
            i + 1,
            r.address,
            r.colo,
            truncate(&r.region, 15),
            format!("{:.1}ms", r.delay_ms),
            format!("{:.0}%", r.loss_rate * 100.0),
            format!("{:.2}MB/s", r.speed_mb()),
            r.source_domain
        ));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(address: &str, speed: f64) -> FinalResult {
        FinalResult {
            address: address.to_string(),
            source_domain: "example.com".to_string(),
            delay_ms: 42.0,
            loss_rate: 0.0,
            colo: "HKG".to_string(),
            region: "Asia Pacific".to_string(),
            download_speed: speed,
        }
    }

    #[test]
    fn test_table_lists_rows_in_order() {
        let table = render_table(&[result("104.16.0.1", 2.0 * 1024.0 * 1024.0), result("104.16.0.2", 1024.0)]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("RANK"));
        assert!(lines[2].starts_with("1 "));
        assert!(lines[2].contains("104.16.0.1"));
        assert!(lines[2].contains("2.00MB/s"));
        assert!(lines[3].contains("104.16.0.2"));
    }

    #[test]
    fn test_truncate_long_region() {
        assert_eq!(truncate("Asia Pacific", 15), "Asia Pacific");
        assert_eq!(truncate("A very long region name", 10), "A very ...");
    }

    #[tokio::test]
    async fn test_printer_exits_when_senders_drop() {
        let (sink, rx) = crate::progress::ProgressSink::channel();
        let handle = spawn_progress_printer(rx);
        sink.emit("Step 1/5: DNS resolution...");
        drop(sink);
        assert!(handle.await.is_ok());
    }
}
